//! Protocol message encoding

use super::constants::{frontend_tags, SSL_REQUEST_CODE};
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            encode_startup(&mut buf, *version, params);
        }
        FrontendMessage::Password(password) => {
            encode_cstr_message(&mut buf, frontend_tags::PASSWORD, password);
        }
        FrontendMessage::Query(query) => {
            encode_cstr_message(&mut buf, frontend_tags::QUERY, query);
        }
        FrontendMessage::Terminate => {
            buf.put_u8(frontend_tags::TERMINATE);
            buf.put_i32(4); // Length includes itself
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            encode_sasl_initial_response(&mut buf, mechanism, data);
        }
        FrontendMessage::SaslResponse { data } => {
            buf.put_u8(frontend_tags::PASSWORD);
            let len_pos = begin_length(&mut buf);
            buf.put_slice(data);
            finish_length(&mut buf, len_pos);
        }
        FrontendMessage::SslRequest => {
            buf.put_i32(8); // Length (includes itself)
            buf.put_i32(SSL_REQUEST_CODE);
        }
    }

    buf
}

/// Reserve the 4-byte length slot and return its position
fn begin_length(buf: &mut BytesMut) -> usize {
    let len_pos = buf.len();
    buf.put_i32(0);
    len_pos
}

/// Back-fill the length slot; the length counts itself but not the tag
fn finish_length(buf: &mut BytesMut, len_pos: usize) {
    let len = buf.len() - len_pos;
    buf[len_pos..len_pos + 4].copy_from_slice(&(len as i32).to_be_bytes());
}

fn encode_startup(buf: &mut BytesMut, version: i32, params: &[(String, String)]) {
    // Startup messages don't have a type byte
    let len_pos = begin_length(buf);
    buf.put_i32(version);

    for (key, value) in params {
        buf.put(key.as_bytes());
        buf.put_u8(0);
        buf.put(value.as_bytes());
        buf.put_u8(0);
    }
    buf.put_u8(0);

    finish_length(buf, len_pos);
}

fn encode_cstr_message(buf: &mut BytesMut, tag: u8, body: &str) {
    buf.put_u8(tag);
    let len_pos = begin_length(buf);
    buf.put(body.as_bytes());
    buf.put_u8(0);
    finish_length(buf, len_pos);
}

fn encode_sasl_initial_response(buf: &mut BytesMut, mechanism: &str, data: &[u8]) {
    buf.put_u8(frontend_tags::PASSWORD);
    let len_pos = begin_length(buf);

    buf.put(mechanism.as_bytes());
    buf.put_u8(0);

    // Initial client response is itself length-prefixed
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);

    finish_length(buf, len_pos);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared_len(buf: &[u8], at: usize) -> i32 {
        i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn test_encode_query() {
        let buf = encode_message(&FrontendMessage::Query("SELECT 1".to_string()));

        assert_eq!(buf[0], b'Q');
        assert_eq!(declared_len(&buf, 1), (buf.len() - 1) as i32);
        assert_eq!(&buf[5..], b"SELECT 1\0");
    }

    #[test]
    fn test_encode_password() {
        let buf = encode_message(&FrontendMessage::Password("secret".to_string()));
        assert_eq!(buf[0], b'p');
        assert_eq!(declared_len(&buf, 1), 4 + 7);
        assert_eq!(&buf[5..], b"secret\0");
    }

    #[test]
    fn test_encode_terminate() {
        let buf = encode_message(&FrontendMessage::Terminate);

        assert_eq!(buf[0], b'X');
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_encode_startup() {
        let buf = encode_message(&FrontendMessage::Startup {
            version: crate::protocol::constants::PROTOCOL_VERSION,
            params: vec![("user".into(), "bot".into())],
        });

        assert_eq!(declared_len(&buf, 0), buf.len() as i32);
        assert_eq!(&buf[4..8], &[0x00, 0x03, 0x00, 0x00]);
        assert_eq!(&buf[8..], b"user\0bot\0\0");
    }

    #[test]
    fn test_encode_sasl_initial_response() {
        let buf = encode_message(&FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".to_string(),
            data: b"n,,n=,r=abc".to_vec(),
        });

        assert_eq!(buf[0], b'p');
        assert_eq!(declared_len(&buf, 1), (buf.len() - 1) as i32);
        assert_eq!(&buf[5..19], b"SCRAM-SHA-256\0");
        assert_eq!(declared_len(&buf, 19), 11);
        assert_eq!(&buf[23..], b"n,,n=,r=abc");
    }

    #[test]
    fn test_encode_sasl_response() {
        let buf = encode_message(&FrontendMessage::SaslResponse {
            data: b"c=biws".to_vec(),
        });
        assert_eq!(buf[0], b'p');
        assert_eq!(declared_len(&buf, 1), 10);
        assert_eq!(&buf[5..], b"c=biws");
    }

    #[test]
    fn test_encode_ssl_request() {
        let buf = encode_message(&FrontendMessage::SslRequest);

        // SSLRequest is exactly 8 bytes: 4-byte length (8) + 4-byte code (80877103)
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x08]);
        assert_eq!(&buf[4..8], &[0x04, 0xD2, 0x16, 0x2F]);
    }
}
