use std::collections::BTreeMap;

/// Wire types understood by this codec. Fixed-width types (1 and 5) are
/// rejected on decode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    LengthDelimited = 2,
}

impl From<WireType> for u8 {
    fn from(t: WireType) -> Self {
        t as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::Varint),
            2 => Ok(WireType::LengthDelimited),
            _ => Err(()),
        }
    }
}

/// A decoded field value.
///
/// Length-delimited payloads carry no type information on the wire, so the
/// decoder guesses: a payload whose first byte is a control byte (< 0x20) is
/// parsed as a nested message, otherwise it is kept as UTF-8 text when valid
/// and as raw bytes when not. A string that happens to begin with a control
/// byte and also parses as a message will come back as `Message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoValue {
    Varint(u64),
    String(String),
    Message(ProtoMessage),
    Bytes(Vec<u8>),
}

impl ProtoValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ProtoValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ProtoValue::Varint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&ProtoMessage> {
        match self {
            ProtoValue::Message(m) => Some(m),
            _ => None,
        }
    }
}

/// A decoded message: tag -> value. A tag seen more than once keeps the
/// last value, which is what protobuf does for singular fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoMessage {
    fields: BTreeMap<u32, ProtoValue>,
}

impl ProtoMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: u32, value: ProtoValue) {
        self.fields.insert(tag, value);
    }

    pub fn get(&self, tag: u32) -> Option<&ProtoValue> {
        self.fields.get(&tag)
    }

    /// Walk nested messages along `path` and return the value at its end.
    pub fn get_path(&self, path: &[u32]) -> Option<&ProtoValue> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for tag in parents {
            current = current.get(*tag)?.as_message()?;
        }
        current.get(*last)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &ProtoValue)> {
        self.fields.iter()
    }
}

/// Render a tag path the way `MissingField` reports it, e.g. `2.3.1.4.1`.
pub fn format_path(path: &[u32]) -> String {
    path.iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(".")
}
