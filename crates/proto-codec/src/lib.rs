//! Minimal protobuf wire-format subset.
//!
//! Besides the two request shapes, the matching login and client-token
//! replies are decoded.
//!
//! Supports unsigned varints and length-delimited fields (strings and nested
//! messages) only; repeated, packed and fixed-width fields are out of scope.

pub mod de;
pub mod error;
pub mod messages;
pub mod ser;
pub mod types;

pub use crate::{
    de::{ProtoDeserializer, decode},
    error::ProtoError,
    messages::{
        ClientTokenRequest, ClientTokenResponse, LoginRequest, LoginResponse,
        build_client_token_request, build_login_request, parse_client_token_request,
        parse_client_token_request_file, parse_client_token_response, parse_login_request,
        parse_login_request_file, parse_login_response,
    },
    ser::{ProtoSerializer, encode_nested_message, encode_tagged_string, encode_varint},
    types::{ProtoMessage, ProtoValue, WireType},
};
