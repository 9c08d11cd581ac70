//! Postgres frontend/backend wire protocol (simple query subset)
//!
//! This module handles:
//! * Splitting the inbound byte stream into frames
//! * Decoding backend messages
//! * Encoding frontend messages

pub mod constants;
pub mod decode;
pub mod encode;
pub mod framer;
pub mod message;

pub use decode::decode_message;
pub use encode::encode_message;
pub use framer::{Frame, Framer};
pub use message::{AuthenticationMessage, BackendMessage, DbError, FieldDescription, FrontendMessage};
