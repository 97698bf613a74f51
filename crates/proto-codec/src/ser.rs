use bytes::{BufMut, BytesMut};

use crate::types::WireType;

pub struct ProtoSerializer {
    buffer: BytesMut,
}

impl ProtoSerializer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    pub fn into_inner(self) -> BytesMut {
        self.buffer
    }

    pub fn write_raw_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buffer.put_u8((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buffer.put_u8(value as u8);
    }

    pub fn write_key(&mut self, tag: u32, wire_type: WireType) {
        self.write_raw_varint(((tag as u64) << 3) | u8::from(wire_type) as u64);
    }

    pub fn write_varint(&mut self, tag: u32, value: u64) {
        self.write_key(tag, WireType::Varint);
        self.write_raw_varint(value);
    }

    pub fn write_bytes(&mut self, tag: u32, value: &[u8]) {
        self.write_key(tag, WireType::LengthDelimited);
        self.write_raw_varint(value.len() as u64);
        self.buffer.put_slice(value);
    }

    pub fn write_string(&mut self, tag: u32, value: &str) {
        self.write_bytes(tag, value.as_bytes());
    }

    /// Write an already-encoded message as a length-delimited field.
    pub fn write_message(&mut self, tag: u32, encoded: &[u8]) {
        self.write_bytes(tag, encoded);
    }
}

impl Default for ProtoSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `n` as a base-128 varint, least significant group first.
pub fn encode_varint(n: u64) -> Vec<u8> {
    let mut ser = ProtoSerializer::new();
    ser.write_raw_varint(n);
    ser.into_inner().to_vec()
}

pub fn encode_tagged_string(tag: u32, s: &str) -> Vec<u8> {
    let mut ser = ProtoSerializer::new();
    ser.write_string(tag, s);
    ser.into_inner().to_vec()
}

pub fn encode_nested_message(tag: u32, encoded: &[u8]) -> Vec<u8> {
    let mut ser = ProtoSerializer::new();
    ser.write_message(tag, encoded);
    ser.into_inner().to_vec()
}
