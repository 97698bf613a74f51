//! Time-based one-time codes for the web-player token endpoint (RFC 6238).

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::credentials::CredentialError;

/// Version reported alongside the codes.
pub const SECRET_VERSION: u32 = 5;

/// Obfuscated secret shipped by the web player.
const SECRET_CIPHER: &[u8] = &[
    12, 56, 76, 33, 88, 44, 88, 33, 78, 78, 11, 66, 22, 22, 55, 69, 54,
];

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// XOR each byte with `(i % 33) + 9`, join the results as decimal text and
/// use that text as the key.
pub fn derive_secret(cipher: &[u8]) -> Vec<u8> {
    cipher
        .iter()
        .enumerate()
        .map(|(i, b)| (b ^ ((i % 33) as u8 + 9)).to_string())
        .collect::<String>()
        .into_bytes()
}

pub fn embedded_secret() -> Vec<u8> {
    derive_secret(SECRET_CIPHER)
}

/// HMAC-SHA1 TOTP code for `unix_secs`.
pub fn generate(secret: &[u8], unix_secs: u64) -> Result<String, CredentialError> {
    let counter = unix_secs / STEP_SECS;
    let mut mac = Hmac::<Sha1>::new_from_slice(secret)
        .map_err(|e| CredentialError::Configuration(format!("invalid TOTP key: {e}")))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let code = binary % 10u32.pow(DIGITS);
    Ok(format!("{code:0width$}", width = DIGITS as usize))
}
