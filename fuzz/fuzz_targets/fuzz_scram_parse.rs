#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgwire_lite::auth::ScramSession;

#[derive(Debug)]
struct ScramInput {
    password: String,
    server_first: String,
    server_final: String,
}

impl<'a> Arbitrary<'a> for ScramInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            password: u.arbitrary()?,
            server_first: u.arbitrary()?,
            server_final: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: ScramInput| {
    let mut session = ScramSession::new(input.password);
    let _first = session.client_first_message();

    // Make the nonce check pass often enough to reach the key derivation
    let server_first = match input.server_first.strip_prefix("r=") {
        Some(rest) => format!("r={}{}", session.client_nonce(), rest),
        None => input.server_first,
    };

    if session.client_final(&server_first).is_ok() {
        let _ = session.verify_server_final(&input.server_final);
    }
});
