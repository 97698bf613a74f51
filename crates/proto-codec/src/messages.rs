//! The two fixed request shapes used by the binary login endpoints.
//!
//! Login request:
//! ```text
//! 1   { 1: device_id, 2: system_id }
//! 100 { 1: user_uri_id, 2: refresh_token }
//! ```
//!
//! Client-token request:
//! ```text
//! 1: 1 (varint)
//! 2 { 1: app_version, 2: device_id,
//!     3 { 1 { 4 { 1: cpu_arch, 3: os_build, 4: platform,
//!                 5: os_major, 6: os_minor, 8: client_model } },
//!         2: system_id } }
//! ```

use std::path::Path;

use crate::{
    de::decode,
    error::ProtoError,
    ser::ProtoSerializer,
    types::{ProtoMessage, ProtoValue, format_path},
};

const LOGIN_CLIENT: u32 = 1;
const LOGIN_STORED_CREDENTIAL: u32 = 100;

const CLIENT_TOKEN_REQUEST_TYPE: u32 = 1;
const CLIENT_TOKEN_CLIENT_DATA: u32 = 2;
const REQUEST_TYPE_CLIENT_DATA: u64 = 1;

const PATH_DEVICE_ID: &[u32] = &[1, 1];
const PATH_SYSTEM_ID: &[u32] = &[1, 2];
const PATH_USER_URI_ID: &[u32] = &[100, 1];
const PATH_REFRESH_TOKEN: &[u32] = &[100, 2];

const PATH_APP_VERSION: &[u32] = &[2, 1];
const PATH_CT_DEVICE_ID: &[u32] = &[2, 2];
const PATH_CT_SYSTEM_ID: &[u32] = &[2, 3, 2];
const PATH_CPU_ARCH: &[u32] = &[2, 3, 1, 4, 1];
const PATH_OS_BUILD: &[u32] = &[2, 3, 1, 4, 3];
const PATH_PLATFORM: &[u32] = &[2, 3, 1, 4, 4];
const PATH_OS_MAJOR: &[u32] = &[2, 3, 1, 4, 5];
const PATH_OS_MINOR: &[u32] = &[2, 3, 1, 4, 6];
const PATH_CLIENT_MODEL: &[u32] = &[2, 3, 1, 4, 8];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub device_id: String,
    pub system_id: String,
    pub user_uri_id: String,
    pub refresh_token: String,
}

impl LoginRequest {
    pub fn encode(&self) -> Vec<u8> {
        build_login_request(
            &self.device_id,
            &self.system_id,
            &self.user_uri_id,
            &self.refresh_token,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTokenRequest {
    pub app_version: String,
    pub device_id: String,
    pub system_id: String,
    pub cpu_arch: u64,
    pub os_build: u64,
    pub platform: u64,
    pub os_major: u64,
    pub os_minor: u64,
    pub client_model: u64,
}

impl ClientTokenRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut platform = ProtoSerializer::new();
        platform.write_varint(1, self.cpu_arch);
        platform.write_varint(3, self.os_build);
        platform.write_varint(4, self.platform);
        platform.write_varint(5, self.os_major);
        platform.write_varint(6, self.os_minor);
        platform.write_varint(8, self.client_model);

        let mut platform_wrapper = ProtoSerializer::new();
        platform_wrapper.write_message(4, &platform.into_inner());

        let mut connectivity = ProtoSerializer::new();
        connectivity.write_message(1, &platform_wrapper.into_inner());
        connectivity.write_string(2, &self.system_id);

        let mut client_data = ProtoSerializer::new();
        client_data.write_string(1, &self.app_version);
        client_data.write_string(2, &self.device_id);
        client_data.write_message(3, &connectivity.into_inner());

        let mut root = ProtoSerializer::new();
        root.write_varint(CLIENT_TOKEN_REQUEST_TYPE, REQUEST_TYPE_CLIENT_DATA);
        root.write_message(CLIENT_TOKEN_CLIENT_DATA, &client_data.into_inner());
        root.into_inner().to_vec()
    }
}

pub fn build_login_request(
    device_id: &str,
    system_id: &str,
    user_uri_id: &str,
    refresh_token: &str,
) -> Vec<u8> {
    let mut client = ProtoSerializer::new();
    client.write_string(1, device_id);
    client.write_string(2, system_id);

    let mut credential = ProtoSerializer::new();
    credential.write_string(1, user_uri_id);
    credential.write_string(2, refresh_token);

    let mut root = ProtoSerializer::new();
    root.write_message(LOGIN_CLIENT, &client.into_inner());
    root.write_message(LOGIN_STORED_CREDENTIAL, &credential.into_inner());
    root.into_inner().to_vec()
}

#[allow(clippy::too_many_arguments)]
pub fn build_client_token_request(
    app_version: &str,
    device_id: &str,
    system_id: &str,
    cpu_arch: u64,
    os_build: u64,
    platform: u64,
    os_major: u64,
    os_minor: u64,
    client_model: u64,
) -> Vec<u8> {
    ClientTokenRequest {
        app_version: app_version.to_string(),
        device_id: device_id.to_string(),
        system_id: system_id.to_string(),
        cpu_arch,
        os_build,
        platform,
        os_major,
        os_minor,
        client_model,
    }
    .encode()
}

/// Schema-directed lookup. Intermediate payloads the generic decoder kept as
/// text or bytes (a nested message whose first key byte is printable, such
/// as tag 4) are re-read as messages because the schema says they are.
fn lookup(message: &ProtoMessage, path: &[u32]) -> Option<ProtoValue> {
    let (last, parents) = path.split_last()?;
    let mut current = message.clone();
    for tag in parents {
        current = match current.get(*tag)? {
            ProtoValue::Message(m) => m.clone(),
            ProtoValue::String(s) => decode(s.as_bytes()).ok()?,
            ProtoValue::Bytes(b) => decode(b).ok()?,
            ProtoValue::Varint(_) => return None,
        };
    }
    current.get(*last).cloned()
}

/// Collects every absent field so a single error can name all of them.
struct FieldReader<'m> {
    message: &'m ProtoMessage,
    missing: Vec<String>,
}

impl<'m> FieldReader<'m> {
    fn new(message: &'m ProtoMessage) -> Self {
        Self {
            message,
            missing: Vec::new(),
        }
    }

    fn string(&mut self, path: &[u32]) -> String {
        match lookup(self.message, path) {
            Some(ProtoValue::String(s)) => s,
            _ => {
                self.missing.push(format_path(path));
                String::new()
            }
        }
    }

    fn varint(&mut self, path: &[u32]) -> u64 {
        match lookup(self.message, path) {
            Some(ProtoValue::Varint(v)) => v,
            _ => {
                self.missing.push(format_path(path));
                0
            }
        }
    }

    fn finish<T>(self, value: T) -> Result<T, ProtoError> {
        if self.missing.is_empty() {
            Ok(value)
        } else {
            Err(ProtoError::MissingField {
                fields: self.missing,
            })
        }
    }
}

pub fn parse_login_request(bytes: &[u8]) -> Result<LoginRequest, ProtoError> {
    let message = decode(bytes)?;
    let mut reader = FieldReader::new(&message);
    let request = LoginRequest {
        device_id: reader.string(PATH_DEVICE_ID),
        system_id: reader.string(PATH_SYSTEM_ID),
        user_uri_id: reader.string(PATH_USER_URI_ID),
        refresh_token: reader.string(PATH_REFRESH_TOKEN),
    };
    reader.finish(request)
}

pub fn parse_client_token_request(bytes: &[u8]) -> Result<ClientTokenRequest, ProtoError> {
    let message = decode(bytes)?;
    let mut reader = FieldReader::new(&message);
    let request = ClientTokenRequest {
        app_version: reader.string(PATH_APP_VERSION),
        device_id: reader.string(PATH_CT_DEVICE_ID),
        system_id: reader.string(PATH_CT_SYSTEM_ID),
        cpu_arch: reader.varint(PATH_CPU_ARCH),
        os_build: reader.varint(PATH_OS_BUILD),
        platform: reader.varint(PATH_PLATFORM),
        os_major: reader.varint(PATH_OS_MAJOR),
        os_minor: reader.varint(PATH_OS_MINOR),
        client_model: reader.varint(PATH_CLIENT_MODEL),
    };
    reader.finish(request)
}

pub fn parse_login_request_file(path: impl AsRef<Path>) -> Result<LoginRequest, ProtoError> {
    parse_login_request(&std::fs::read(path)?)
}

pub fn parse_client_token_request_file(
    path: impl AsRef<Path>,
) -> Result<ClientTokenRequest, ProtoError> {
    parse_client_token_request(&std::fs::read(path)?)
}

/// Decoded reply of the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    Ok {
        username: String,
        access_token: String,
        /// Rotated refresh credential, when the server issued one.
        stored_credential: Option<String>,
        expires_in: Option<u64>,
    },
    Error {
        code: u64,
    },
}

impl LoginResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut root = ProtoSerializer::new();
        match self {
            Self::Ok {
                username,
                access_token,
                stored_credential,
                expires_in,
            } => {
                let mut ok = ProtoSerializer::new();
                ok.write_string(1, username);
                ok.write_string(2, access_token);
                if let Some(credential) = stored_credential {
                    ok.write_string(3, credential);
                }
                if let Some(expires_in) = expires_in {
                    ok.write_varint(4, *expires_in);
                }
                root.write_message(LOGIN_RESPONSE_OK, &ok.into_inner());
            }
            Self::Error { code } => root.write_varint(LOGIN_RESPONSE_ERROR, *code),
        }
        root.into_inner().to_vec()
    }
}

const LOGIN_RESPONSE_OK: u32 = 1;
const LOGIN_RESPONSE_ERROR: u32 = 2;

pub fn parse_login_response(bytes: &[u8]) -> Result<LoginResponse, ProtoError> {
    let message = decode(bytes)?;
    if let Some(ProtoValue::Varint(code)) = message.get(LOGIN_RESPONSE_ERROR) {
        return Ok(LoginResponse::Error { code: *code });
    }
    let mut reader = FieldReader::new(&message);
    let username = reader.string(&[LOGIN_RESPONSE_OK, 1]);
    let access_token = reader.string(&[LOGIN_RESPONSE_OK, 2]);
    let stored_credential = match lookup(&message, &[LOGIN_RESPONSE_OK, 3]) {
        Some(ProtoValue::String(s)) => Some(s),
        _ => None,
    };
    let expires_in = lookup(&message, &[LOGIN_RESPONSE_OK, 4]).and_then(|v| v.as_u64());
    reader.finish(LoginResponse::Ok {
        username,
        access_token,
        stored_credential,
        expires_in,
    })
}

/// Decoded reply of the client-token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTokenResponse {
    pub token: String,
    pub expires_after_seconds: Option<u64>,
}

impl ClientTokenResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut granted = ProtoSerializer::new();
        granted.write_string(1, &self.token);
        if let Some(expires) = self.expires_after_seconds {
            granted.write_varint(2, expires);
        }
        let mut root = ProtoSerializer::new();
        root.write_varint(1, 1);
        root.write_message(2, &granted.into_inner());
        root.into_inner().to_vec()
    }
}

pub fn parse_client_token_response(bytes: &[u8]) -> Result<ClientTokenResponse, ProtoError> {
    let message = decode(bytes)?;
    let mut reader = FieldReader::new(&message);
    let token = reader.string(&[2, 1]);
    let expires_after_seconds = lookup(&message, &[2, 2]).and_then(|v| v.as_u64());
    reader.finish(ClientTokenResponse {
        token,
        expires_after_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::encode_nested_message;
    use rstest::rstest;

    fn sample_client_token_request() -> ClientTokenRequest {
        ClientTokenRequest {
            app_version: "1.2.52.442".to_string(),
            device_id: "a1b2c3d4e5f60718293a4b5c6d7e8f90".to_string(),
            system_id: "0f1e2d3c4b5a69788796a5b4c3d2e1f0".to_string(),
            cpu_arch: 10,
            os_build: 19045,
            platform: 2,
            os_major: 9,
            os_minor: 9,
            client_model: 34404,
        }
    }

    #[rstest]
    #[case("dev", "sys", "user", "refresh")]
    #[case(
        "4f2a9c0e7d3b",
        "9b8a7c6d5e4f",
        "31abcdefghijklmnopqrstuv",
        "AQD-long_refresh+token/with=symbols"
    )]
    #[case("", "", "", "")]
    fn test_login_request_roundtrip(
        #[case] device_id: &str,
        #[case] system_id: &str,
        #[case] user_uri_id: &str,
        #[case] refresh_token: &str,
    ) {
        let bytes = build_login_request(device_id, system_id, user_uri_id, refresh_token);
        let parsed = parse_login_request(&bytes).unwrap();
        assert_eq!(parsed.device_id, device_id);
        assert_eq!(parsed.system_id, system_id);
        assert_eq!(parsed.user_uri_id, user_uri_id);
        assert_eq!(parsed.refresh_token, refresh_token);
    }

    #[test]
    fn test_login_request_long_token_needs_multibyte_length() {
        let token = "x".repeat(600);
        let bytes = build_login_request("d", "s", "u", &token);
        assert_eq!(parse_login_request(&bytes).unwrap().refresh_token, token);
    }

    #[test]
    fn test_client_token_request_roundtrip() {
        let request = sample_client_token_request();
        let parsed = parse_client_token_request(&request.encode()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_client_token_request_top_level_shape() {
        let message = decode(&sample_client_token_request().encode()).unwrap();
        assert_eq!(message.get(1), Some(&ProtoValue::Varint(1)));
        assert!(message.get(2).and_then(ProtoValue::as_message).is_some());
    }

    #[test]
    fn test_generic_decode_does_not_see_platform_block_as_message() {
        // Key byte for tag 4 / length-delimited is 0x22, which is printable.
        let message = decode(&sample_client_token_request().encode()).unwrap();
        assert!(
            message
                .get_path(&[2, 3, 1])
                .and_then(ProtoValue::as_message)
                .is_none()
        );
    }

    #[test]
    fn test_missing_fields_are_all_reported() {
        // Only the client block is present; both credential fields are absent.
        let mut client = ProtoSerializer::new();
        client.write_string(1, "dev");
        client.write_string(2, "sys");
        let bytes = encode_nested_message(1, &client.into_inner());

        match parse_login_request(&bytes) {
            Err(ProtoError::MissingField { fields }) => {
                assert_eq!(fields, vec!["100.1".to_string(), "100.2".to_string()]);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_request_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("login.bin");
        std::fs::write(&path, build_login_request("d", "s", "u", "r")).unwrap();
        let parsed = parse_login_request_file(&path).unwrap();
        assert_eq!(parsed.user_uri_id, "u");

        let missing = parse_client_token_request_file(dir.path().join("absent.bin"));
        assert!(matches!(missing, Err(ProtoError::Io(_))));
    }

    #[test]
    fn test_login_response_ok_and_error() {
        let ok = LoginResponse::Ok {
            username: "31user".into(),
            access_token: "BQAccess".into(),
            stored_credential: Some("rotated".into()),
            expires_in: Some(3600),
        };
        assert_eq!(parse_login_response(&ok.encode()).unwrap(), ok);

        let err = LoginResponse::Error { code: 3 };
        assert_eq!(parse_login_response(&err.encode()).unwrap(), err);
    }

    #[test]
    fn test_login_response_without_token_is_missing_field() {
        let mut ok = ProtoSerializer::new();
        ok.write_string(1, "31user");
        let bytes = encode_nested_message(1, &ok.into_inner());
        match parse_login_response(&bytes) {
            Err(ProtoError::MissingField { fields }) => assert_eq!(fields, vec!["1.2".to_string()]),
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_client_token_response() {
        let response = ClientTokenResponse {
            token: "AAC-client".into(),
            expires_after_seconds: Some(1_209_600),
        };
        assert_eq!(parse_client_token_response(&response.encode()).unwrap(), response);
    }
}
