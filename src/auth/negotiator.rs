//! Authentication state machine
//!
//! Consumes backend Authentication messages and decides what, if anything, to
//! send back. Performs no I/O; the connection feeds it messages and writes the
//! responses it returns.

use super::md5::md5_password;
use super::scram::{ScramSession, MECHANISM as SCRAM_SHA_256};
use crate::protocol::constants::auth;
use crate::protocol::{AuthenticationMessage, FrontendMessage};
use crate::{Error, Result};

/// What the connection should do after an Authentication message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send this message and wait for the next Authentication message
    Respond(FrontendMessage),
    /// Nothing to send; wait for the next Authentication message
    Wait,
    /// The server accepted the credentials
    Authenticated,
}

/// Authentication method the server picked, for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// No password exchange happened (trust auth)
    None,
    /// Cleartext password
    Cleartext,
    /// MD5 challenge
    Md5,
    /// SCRAM-SHA-256 SASL exchange
    ScramSha256,
}

impl AuthMechanism {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cleartext => "cleartext",
            Self::Md5 => "md5",
            Self::ScramSha256 => "scram-sha-256",
        }
    }
}

/// Drives one authentication exchange for a user/password pair
#[derive(Debug)]
pub struct Negotiator {
    user: String,
    password: Option<String>,
    scram: Option<ScramSession>,
    mechanism: AuthMechanism,
}

impl Negotiator {
    /// Create a negotiator for the given credentials
    pub fn new(user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user: user.into(),
            password,
            scram: None,
            mechanism: AuthMechanism::None,
        }
    }

    /// Mechanism chosen by the server so far
    pub fn mechanism(&self) -> AuthMechanism {
        self.mechanism
    }

    fn password(&self, purpose: &str) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Authentication(format!("password required for {}", purpose)))
    }

    fn scram_session(&mut self, stage: &str) -> Result<&mut ScramSession> {
        self.scram.as_mut().ok_or_else(|| {
            Error::Protocol(format!("unexpected {} outside of SASL flow", stage))
        })
    }

    /// Advance the state machine with one Authentication message
    pub fn handle(&mut self, msg: AuthenticationMessage) -> Result<AuthStep> {
        match msg {
            AuthenticationMessage::Ok => {
                if self.scram.is_some() {
                    return Err(Error::Authentication(
                        "server completed authentication without a verified SCRAM final message"
                            .into(),
                    ));
                }
                Ok(AuthStep::Authenticated)
            }
            AuthenticationMessage::CleartextPassword => {
                self.mechanism = AuthMechanism::Cleartext;
                let password = self.password("cleartext authentication")?;
                Ok(AuthStep::Respond(FrontendMessage::Password(
                    password.to_string(),
                )))
            }
            AuthenticationMessage::Md5Password { salt } => {
                self.mechanism = AuthMechanism::Md5;
                let password = self.password("MD5 authentication")?;
                let hashed = md5_password(&self.user, password, &salt);
                Ok(AuthStep::Respond(FrontendMessage::Password(hashed)))
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                self.mechanism = AuthMechanism::ScramSha256;
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(Error::Authentication(format!(
                        "server does not support SCRAM-SHA-256. Available: {}",
                        mechanisms.join(", ")
                    )));
                }
                let password = self.password("SCRAM authentication")?;
                let session = ScramSession::new(password);
                let data = session.client_first_message().into_bytes();
                self.scram = Some(session);
                tracing::debug!("initiating SCRAM-SHA-256 authentication");

                Ok(AuthStep::Respond(FrontendMessage::SaslInitialResponse {
                    mechanism: SCRAM_SHA_256.to_string(),
                    data,
                }))
            }
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = sasl_text(data, "server first message")?;
                let session = self.scram_session("SASLContinue")?;
                let client_final = session
                    .client_final(&server_first)
                    .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;
                tracing::debug!("received SCRAM server first message");

                Ok(AuthStep::Respond(FrontendMessage::SaslResponse {
                    data: client_final.into_bytes(),
                }))
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = sasl_text(data, "server final message")?;
                let session = self.scram_session("SASLFinal")?;
                session.verify_server_final(&server_final).map_err(|e| {
                    Error::Authentication(format!("SCRAM verification failed: {}", e))
                })?;
                self.scram = None;
                tracing::debug!("SCRAM server signature verified");

                // AuthenticationOk follows
                Ok(AuthStep::Wait)
            }
            AuthenticationMessage::Unsupported(code) => Err(Error::Authentication(format!(
                "unsupported authentication type {} ({})",
                code,
                auth::name(code)
            ))),
        }
    }
}

fn sasl_text(data: Vec<u8>, what: &str) -> Result<String> {
    String::from_utf8(data)
        .map_err(|e| Error::Authentication(format!("invalid UTF-8 in {}: {}", what, e)))
}
