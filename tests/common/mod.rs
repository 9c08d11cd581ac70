//! Scripted fake Postgres server for integration tests

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{Buf, BufMut, BytesMut};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type HmacSha256 = Hmac<Sha256>;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bind a listener on an ephemeral port and run `script` against the first client.
///
/// Returns the connection string (TLS disabled) and the script's handle.
pub async fn spawn_server<F, Fut, T>(script: F) -> (String, JoinHandle<T>)
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(ServerConn::new(stream)).await
    });
    let url = format!(
        "postgres://{}:{}@127.0.0.1:{}/appdb?sslmode=disable",
        USER, PASSWORD, port
    );
    (url, handle)
}

pub const USER: &str = "bot";
pub const PASSWORD: &str = "s3cret";

/// Server side of one client connection
pub struct ServerConn {
    stream: TcpStream,
    buf: BytesMut,
}

impl ServerConn {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn fill(&mut self, n: usize) -> bool {
        while self.buf.len() < n {
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
        }
        true
    }

    /// Read the untagged startup packet and return its parameters
    pub async fn read_startup(&mut self) -> Vec<(String, String)> {
        assert!(self.fill(4).await, "client closed before startup");
        let len = u32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
        assert!(self.fill(len).await, "client closed during startup");
        let mut packet = self.buf.split_to(len);
        packet.advance(4);
        assert_eq!(packet.get_i32(), 0x0003_0000, "protocol version");

        let mut fields = packet[..]
            .split(|b| *b == 0)
            .map(|s| String::from_utf8(s.to_vec()).unwrap());
        let mut params = Vec::new();
        while let Some(key) = fields.next() {
            if key.is_empty() {
                break;
            }
            params.push((key, fields.next().unwrap()));
        }
        params
    }

    /// Read the 8-byte SSLRequest
    pub async fn read_ssl_request(&mut self) {
        assert!(self.fill(8).await);
        let packet = self.buf.split_to(8);
        assert_eq!(&packet[..], &[0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F]);
    }

    /// Read one tagged frontend message; `None` on EOF
    pub async fn read_message(&mut self) -> Option<(u8, Vec<u8>)> {
        if !self.fill(5).await {
            return None;
        }
        let len = u32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
        if !self.fill(len + 1).await {
            return None;
        }
        let mut frame = self.buf.split_to(len + 1);
        let tag = frame.get_u8();
        frame.advance(4);
        Some((tag, frame.to_vec()))
    }

    /// Expect a `Q` message and return its SQL text
    pub async fn expect_query(&mut self) -> String {
        let (tag, body) = self.read_message().await.expect("client closed");
        assert_eq!(tag, b'Q', "expected Query");
        cstr(&body)
    }

    /// Expect a `p` message and return its body
    pub async fn expect_password_message(&mut self) -> Vec<u8> {
        let (tag, body) = self.read_message().await.expect("client closed");
        assert_eq!(tag, b'p', "expected PasswordMessage");
        body
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Auth Ok plus the usual parameter burst, ending in ReadyForQuery
    pub async fn finish_startup(&mut self) {
        let mut out = auth(0, &[]);
        out.extend(parameter_status("server_version", "16.2"));
        out.extend(parameter_status("client_encoding", "UTF8"));
        out.extend(backend_key_data(4242, 777));
        out.extend(ready());
        self.send(&out).await;
    }

    /// Trust authentication
    pub async fn accept_trust(&mut self) {
        self.read_startup().await;
        self.finish_startup().await;
    }

    /// Answer a query with one text column and the given rows
    pub async fn reply_rows(&mut self, column: &str, rows: &[Option<&str>]) {
        let mut out = row_description(&[column]);
        for row in rows {
            out.extend(data_row(&[*row]));
        }
        out.extend(command_complete(&format!("SELECT {}", rows.len())));
        out.extend(ready());
        self.send(&out).await;
    }

    /// Close the socket
    pub async fn hang_up(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

pub fn cstr(body: &[u8]) -> String {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    String::from_utf8(body[..end].to_vec()).unwrap()
}

fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_u8(tag);
    out.put_i32(body.len() as i32 + 4);
    out.put_slice(body);
    out.to_vec()
}

pub fn auth(code: i32, extra: &[u8]) -> Vec<u8> {
    let mut body = code.to_be_bytes().to_vec();
    body.extend_from_slice(extra);
    message(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    message(b'S', format!("{}\0{}\0", name, value).as_bytes())
}

pub fn backend_key_data(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend_from_slice(&secret.to_be_bytes());
    message(b'K', &body)
}

pub fn ready() -> Vec<u8> {
    message(b'Z', b"I")
}

pub fn row_description(columns: &[&str]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_i16(columns.len() as i16);
    for name in columns {
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        body.put_i32(0); // table oid
        body.put_i16(0); // column attribute
        body.put_u32(25); // text
        body.put_i16(-1);
        body.put_i32(-1);
        body.put_i16(0);
    }
    message(b'T', &body)
}

pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(v) => {
                body.put_i32(v.len() as i32);
                body.put_slice(v.as_bytes());
            }
            None => body.put_i32(-1),
        }
    }
    message(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    message(b'C', format!("{}\0", tag).as_bytes())
}

fn fields_message(tag: u8, fields: &[(u8, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (code, value) in fields {
        body.push(*code);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    message(tag, &body)
}

pub fn error_response(code: &str, msg: &str) -> Vec<u8> {
    fields_message(
        b'E',
        &[(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', msg), (b't', "wallets")],
    )
}

pub fn notice_response(msg: &str) -> Vec<u8> {
    fields_message(b'N', &[(b'S', "NOTICE"), (b'C', "00000"), (b'M', msg)])
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Run the server side of SCRAM-SHA-256 after the SASL offer has been sent.
///
/// Returns the final message so the caller can decide to send it (possibly
/// corrupted). Panics if the client proof is wrong.
pub async fn scram_exchange(conn: &mut ServerConn, password: &str) -> String {
    let body = conn.expect_password_message().await;
    let mechanism = cstr(&body);
    assert_eq!(mechanism, "SCRAM-SHA-256");
    let rest = &body[mechanism.len() + 1..];
    let len = i32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
    let client_first = String::from_utf8(rest[4..4 + len].to_vec()).unwrap();
    let bare = client_first.strip_prefix("n,,").unwrap().to_string();
    let client_nonce = bare.strip_prefix("n=,r=").unwrap().to_string();

    let salt = b"fake-server-salt";
    let iterations = 4096;
    let server_first = format!(
        "r={}{},s={},i={}",
        client_nonce,
        "SRVNONCE",
        STANDARD.encode(salt),
        iterations
    );
    conn.send(&auth(11, server_first.as_bytes())).await;

    let client_final = String::from_utf8(conn.expect_password_message().await).unwrap();
    let (without_proof, proof) = client_final.rsplit_once(",p=").unwrap();
    assert!(without_proof.starts_with("c=biws,r="));
    let auth_message = format!("{},{},{}", bare, server_first, without_proof);

    let mut salted = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut salted).unwrap();
    let client_key = hmac(&salted, b"Client Key");
    let stored_key = Sha256::digest(&client_key);
    let client_signature = hmac(&stored_key, auth_message.as_bytes());
    let expected_proof: Vec<u8> = client_key
        .iter()
        .zip(&client_signature)
        .map(|(a, b)| a ^ b)
        .collect();
    assert_eq!(STANDARD.decode(proof).unwrap(), expected_proof, "client proof");

    let server_key = hmac(&salted, b"Server Key");
    format!(
        "v={}",
        STANDARD.encode(hmac(&server_key, auth_message.as_bytes()))
    )
}
