use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::ControlError;

type HmacSha256 = Hmac<Sha256>;

const CLIENT_HASH_CONSTANT: &[u8] = b"Tor safe cookie authentication controller-to-server hash";
const SERVER_HASH_CONSTANT: &[u8] = b"Tor safe cookie authentication server-to-controller hash";

pub const NONCE_LEN: usize = 32;
pub const COOKIE_LEN: usize = 32;

/// The authentication method negotiated from a `PROTOCOLINFO` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Null,
    HashedPassword,
    SafeCookie { cookie_file: String },
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Generates a fresh 32-byte client nonce for an `AUTHCHALLENGE`.
pub fn generate_client_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Computes the `AUTHENTICATE` argument tor expects after a successful
/// `AUTHCHALLENGE`: `HMAC-SHA256(clientHashConstant, cookie || clientNonce ||
/// serverNonce)`, hex-encoded.
pub fn compute_client_hash(cookie: &[u8; COOKIE_LEN], client_nonce: &[u8; NONCE_LEN], server_nonce: &[u8]) -> [u8; 32] {
    hmac_sha256(CLIENT_HASH_CONSTANT, &[cookie, client_nonce, server_nonce])
}

/// Computes the hash tor's `AUTHCHALLENGE` reply's `SERVERHASH=` must match,
/// so the client can verify it is really talking to the daemon that owns the
/// cookie rather than to an impersonator on the same host.
pub fn compute_server_hash(cookie: &[u8; COOKIE_LEN], client_nonce: &[u8; NONCE_LEN], server_nonce: &[u8]) -> [u8; 32] {
    hmac_sha256(SERVER_HASH_CONSTANT, &[cookie, client_nonce, server_nonce])
}

pub fn verify_server_hash(
    claimed: &[u8],
    cookie: &[u8; COOKIE_LEN],
    client_nonce: &[u8; NONCE_LEN],
    server_nonce: &[u8],
) -> Result<(), ControlError> {
    let expected = compute_server_hash(cookie, client_nonce, server_nonce);
    if expected.as_slice() == claimed {
        Ok(())
    } else {
        Err(ControlError::Authentication {
            reason: "AUTHCHALLENGE server hash did not match the cookie on disk".to_string(),
        })
    }
}

/// Parses the `COOKIEFILE="..."` field out of a `PROTOCOLINFO` `AUTH` line's
/// arguments, and the hex `SERVERHASH=`/`SERVERNONCE=` fields out of an
/// `AUTHCHALLENGE` reply. Kept intentionally forgiving of field order, since
/// tor does not guarantee one.
pub fn parse_keyword_value(message: &str, keyword: &str) -> Option<String> {
    for token in message.split_whitespace() {
        if let Some(rest) = token.strip_prefix(keyword) {
            if let Some(rest) = rest.strip_prefix('=') {
                return Some(rest.trim_matches('"').to_string());
            }
        }
    }
    None
}

pub fn cookie_from_bytes(bytes: &[u8]) -> Result<[u8; COOKIE_LEN], ControlError> {
    if bytes.len() != COOKIE_LEN {
        return Err(ControlError::Authentication {
            reason: format!("cookie file is {} bytes, expected {COOKIE_LEN}", bytes.len()),
        });
    }
    let mut cookie = [0u8; COOKIE_LEN];
    cookie.copy_from_slice(bytes);
    Ok(cookie)
}
