use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("Varint longer than 10 bytes at offset {0}")]
    VarintOverflow(usize),

    #[error("Unsupported wire type {wire_type} for tag {tag}")]
    UnsupportedWireType { tag: u32, wire_type: u8 },

    #[error("Invalid field tag {0}")]
    InvalidTag(u64),

    #[error("Missing required field(s): {}", fields.join(", "))]
    MissingField { fields: Vec<String> },

    #[error("Type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
