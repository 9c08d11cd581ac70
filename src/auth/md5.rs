//! MD5 password challenge response

/// Build the PasswordMessage body for an MD5 challenge:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut inner = md5::Context::new();
    inner.consume(password.as_bytes());
    inner.consume(user.as_bytes());
    let inner_hex = format!("{:x}", inner.compute());

    let mut outer = md5::Context::new();
    outer.consume(inner_hex.as_bytes());
    outer.consume(salt);
    format!("md5{:x}", outer.compute())
}
