//! Connection state machine

use crate::{Error, Result};

/// Session state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket being opened
    Connecting,

    /// SSLRequest sent, awaiting S/N response
    NegotiatingTls,

    /// Startup sent, exchanging Authentication messages
    Authenticating,

    /// Idle and ready for a query
    Ready,

    /// A query is on the wire
    Querying,

    /// Terminal: no further work is accepted
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Connecting, NegotiatingTls)
                | (Connecting, Authenticating)
                | (NegotiatingTls, Authenticating)
                | (Authenticating, Ready)
                | (Ready, Querying)
                | (Querying, Ready)
                | (_, Closed)
        ) && *self != Closed
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::Protocol(format!(
                "invalid connection state transition {} -> {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }

    /// Whether queries may be sent
    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::NegotiatingTls => write!(f, "negotiating_tls"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Ready => write!(f, "ready"),
            Self::Querying => write!(f, "querying"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = ConnectionState::Connecting;
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
        assert!(state.transition(ConnectionState::Ready).is_ok());
        assert!(state.is_ready());
    }

    #[test]
    fn test_ready_cycles_per_query() {
        let mut state = ConnectionState::Ready;
        for _ in 0..3 {
            assert!(state.transition(ConnectionState::Querying).is_ok());
            assert!(state.transition(ConnectionState::Ready).is_ok());
        }
    }

    #[test]
    fn test_query_before_ready_rejected() {
        let mut state = ConnectionState::Authenticating;
        assert!(state.transition(ConnectionState::Querying).is_err());
        assert_eq!(state, ConnectionState::Authenticating);
    }

    #[test]
    fn test_never_returns_to_authenticating() {
        let mut state = ConnectionState::Ready;
        assert!(state.transition(ConnectionState::Authenticating).is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        let mut state = ConnectionState::Querying;
        assert!(state.transition(ConnectionState::Closed).is_ok());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = ConnectionState::Closed;
        assert!(state.transition(ConnectionState::Ready).is_err());
        assert!(state.transition(ConnectionState::Closed).is_err());
    }

    #[test]
    fn test_tls_negotiation_transitions() {
        let mut state = ConnectionState::Connecting;
        assert!(state.transition(ConnectionState::NegotiatingTls).is_ok());
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
    }

    #[test]
    fn test_invalid_tls_transition() {
        let mut state = ConnectionState::Ready;
        assert!(state.transition(ConnectionState::NegotiatingTls).is_err());
    }
}
