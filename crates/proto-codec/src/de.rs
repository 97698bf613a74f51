use crate::{
    error::ProtoError,
    types::{ProtoMessage, ProtoValue, WireType},
};

/// Payloads whose first byte is below this value are treated as nested
/// messages.
const CONTROL_BYTE_LIMIT: u8 = 0x20;

pub struct ProtoDeserializer<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ProtoDeserializer<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buffer.len()
    }

    pub fn read_raw_varint(&mut self) -> Result<u64, ProtoError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let byte = *self
                .buffer
                .get(self.pos)
                .ok_or(ProtoError::Truncated(self.pos))?;
            self.pos += 1;
            if shift == 63 && byte > 1 {
                return Err(ProtoError::VarintOverflow(start));
            }
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtoError::VarintOverflow(start))
    }

    pub fn read_key(&mut self) -> Result<(u32, u8), ProtoError> {
        let key = self.read_raw_varint()?;
        let tag = key >> 3;
        if tag == 0 || tag > u32::MAX as u64 {
            return Err(ProtoError::InvalidTag(tag));
        }
        Ok((tag as u32, (key & 0x07) as u8))
    }

    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], ProtoError> {
        let len = self.read_raw_varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(ProtoError::Truncated(self.buffer.len()))?;
        let payload = &self.buffer[self.pos..end];
        self.pos = end;
        Ok(payload)
    }

    pub fn read_message(&mut self) -> Result<ProtoMessage, ProtoError> {
        let mut message = ProtoMessage::new();
        while !self.is_empty() {
            let (tag, wire_type) = self.read_key()?;
            let value = match WireType::try_from(wire_type) {
                Ok(WireType::Varint) => ProtoValue::Varint(self.read_raw_varint()?),
                Ok(WireType::LengthDelimited) => classify_payload(self.read_length_delimited()?),
                Err(()) => return Err(ProtoError::UnsupportedWireType { tag, wire_type }),
            };
            message.insert(tag, value);
        }
        Ok(message)
    }
}

fn classify_payload(payload: &[u8]) -> ProtoValue {
    if let Some(first) = payload.first()
        && *first < CONTROL_BYTE_LIMIT
        && let Ok(nested) = ProtoDeserializer::new(payload).read_message()
    {
        return ProtoValue::Message(nested);
    }
    match std::str::from_utf8(payload) {
        Ok(s) => ProtoValue::String(s.to_string()),
        Err(_) => ProtoValue::Bytes(payload.to_vec()),
    }
}

/// Decode a full message into a tag -> value map.
///
/// Length-delimited payloads carry no type on the wire. One is read as a
/// nested message only when its first byte is below 0x20 and it parses
/// cleanly. A nested message whose first key byte is printable (any tag of
/// 4 or more with wire type 2, such as the platform block of the
/// client-token request, key byte 0x22) therefore comes back as
/// `ProtoValue::String` or `ProtoValue::Bytes`. Callers that know the schema
/// must decode such payloads again themselves.
pub fn decode(bytes: &[u8]) -> Result<ProtoMessage, ProtoError> {
    ProtoDeserializer::new(bytes).read_message()
}
