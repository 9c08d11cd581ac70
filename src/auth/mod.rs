//! Authentication mechanisms
//!
//! Supports cleartext password, MD5 challenge and SCRAM-SHA-256 (SASL).

pub mod md5;
pub mod negotiator;
pub mod scram;

pub use negotiator::{AuthMechanism, AuthStep, Negotiator};
pub use scram::{ScramError, ScramSession};
