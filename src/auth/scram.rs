//! SCRAM-SHA-256 authentication implementation
//!
//! Implements the SCRAM-SHA-256 (Salted Challenge Response Authentication Mechanism)
//! as defined in RFC 5802 / RFC 7677, in the form Postgres expects: no channel
//! binding (`c=biws`) and an empty username in the client-first message, since
//! the server takes the user from the startup packet.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// SASL mechanism name
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Number of random bytes in the client nonce
const NONCE_LEN: usize = 18;

/// Base64 of the GS2 header "n,," (no channel binding)
const CHANNEL_BINDING: &str = "biws";

/// Upper bound on the server's PBKDF2 iteration count (Postgres defaults to 4096)
const MAX_ITERATIONS: u32 = 1_000_000;

/// SCRAM authentication error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    /// Server signature did not match the expected value
    SignatureMismatch,
    /// Server nonce does not extend the client nonce
    NonceMismatch,
    /// Server reported a SASL failure (`e=...`)
    ServerError(String),
    /// Invalid server message format
    InvalidServerMessage(String),
    /// Base64 decoding error
    Base64Error(String),
    /// Key derivation or HMAC rejected its input
    KeyError,
}

impl fmt::Display for ScramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScramError::SignatureMismatch => write!(f, "server signature mismatch"),
            ScramError::NonceMismatch => {
                write!(f, "server nonce does not start with client nonce")
            }
            ScramError::ServerError(msg) => write!(f, "server reported SASL error: {}", msg),
            ScramError::InvalidServerMessage(msg) => write!(f, "invalid server message: {}", msg),
            ScramError::Base64Error(msg) => write!(f, "Base64 error: {}", msg),
            ScramError::KeyError => write!(f, "key derivation error"),
        }
    }
}

impl std::error::Error for ScramError {}

/// Client side of one SCRAM exchange.
///
/// Lives from the SASL mechanism offer until the server-final message has been
/// verified; one per connection attempt.
pub struct ScramSession {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    expected_server_signature: Option<Vec<u8>>,
}

impl fmt::Debug for ScramSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramSession")
            .field("client_nonce", &self.client_nonce)
            .field("client_first_bare", &self.client_first_bare)
            .field("awaiting_final", &self.expected_server_signature.is_some())
            .finish_non_exhaustive()
    }
}

impl ScramSession {
    /// Start a session with a fresh random nonce
    pub fn new(password: impl Into<String>) -> Self {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        Self::from_parts("", password.into(), BASE64.encode(nonce_bytes))
    }

    fn from_parts(username: &str, password: String, client_nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", username, client_nonce);
        Self {
            password,
            client_nonce,
            client_first_bare,
            expected_server_signature: None,
        }
    }

    /// Client nonce (base64)
    pub fn client_nonce(&self) -> &str {
        &self.client_nonce
    }

    /// `n=,r=<nonce>`
    pub fn client_first_bare(&self) -> &str {
        &self.client_first_bare
    }

    /// Client first message: GS2 header plus the bare message
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Whether a client-final message was produced and the server-final is pending
    pub fn awaiting_final(&self) -> bool {
        self.expected_server_signature.is_some()
    }

    /// Process the server-first message and produce the client-final message.
    ///
    /// Stores the server signature the server must present in its final message.
    pub fn client_final(&mut self, server_first: &str) -> Result<String, ScramError> {
        let (server_nonce, salt, iterations) = parse_server_first(server_first)?;

        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::NonceMismatch);
        }

        let salt = BASE64
            .decode(salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = iterations
            .parse::<u32>()
            .map_err(|_| ScramError::InvalidServerMessage("invalid iteration count".to_string()))?;
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(ScramError::InvalidServerMessage(format!(
                "iteration count {} outside 1..={}",
                iterations, MAX_ITERATIONS
            )));
        }

        let client_final_without_proof = format!("c={},r={}", CHANNEL_BINDING, server_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let salted_password = salted_password(&self.password, &salt, iterations)?;
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        // ClientProof := ClientKey XOR ClientSignature
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        self.expected_server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes())?);

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(proof)
        ))
    }

    /// Verify the server-final message (`v=<signature>`).
    ///
    /// Clears the stored signature on success.
    pub fn verify_server_final(&mut self, server_final: &str) -> Result<(), ScramError> {
        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(reason.to_string()));
        }

        let expected = self.expected_server_signature.as_ref().ok_or_else(|| {
            ScramError::InvalidServerMessage("server final received before client final".into())
        })?;

        let encoded = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' attribute".into()))?;

        let signature = BASE64.decode(encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        if !constant_time_compare(&signature, expected) {
            return Err(ScramError::SignatureMismatch);
        }

        self.expected_server_signature = None;
        Ok(())
    }
}

/// Parse server first message format: r=<nonce>,s=<salt>,i=<iterations>
fn parse_server_first(msg: &str) -> Result<(&str, &str, &str), ScramError> {
    let mut nonce = "";
    let mut salt = "";
    let mut iterations = "";

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = value;
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = value;
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = value;
        }
    }

    if nonce.is_empty() || salt.is_empty() || iterations.is_empty() {
        return Err(ScramError::InvalidServerMessage(
            "missing required fields in server first message".to_string(),
        ));
    }

    Ok((nonce, salt, iterations))
}

/// SaltedPassword := PBKDF2-HMAC-SHA256(password, salt, iterations)
fn salted_password(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; 32], ScramError> {
    let mut out = [0u8; 32];
    pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut out)
        .map_err(|_| ScramError::KeyError)?;
    Ok(out)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ScramError::KeyError)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
