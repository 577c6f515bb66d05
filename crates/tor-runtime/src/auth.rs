//! Drives the `PROTOCOLINFO` / `AUTHENTICATE` handshake (§6, scenario S1)
//! once a freshly spawned tor's control connection is up: negotiates
//! whichever of NULL, HASHEDPASSWORD, or SAFECOOKIE tor's `PROTOCOLINFO`
//! reply advertises, preferring SAFECOOKIE where available since it needs no
//! shared secret beyond a file this process can already read.

use std::path::Path;

use hex::ToHex;
use tor_ctl::auth::{
    compute_client_hash, cookie_from_bytes, generate_client_nonce, parse_keyword_value,
    verify_server_hash, AuthMethod,
};
use tor_ctl::{Command, Connection, ReplyGroup};

use crate::error::RuntimeError;

const CONTROL_PASSWORD_ENV: &str = "TOR_CONTROL_PASSWORD";

fn parse_auth_line(group: &ReplyGroup) -> Result<AuthMethod, RuntimeError> {
    let auth_line = group
        .lines
        .iter()
        .find(|line| line.message.starts_with("AUTH "))
        .ok_or_else(|| RuntimeError::config("PROTOCOLINFO reply had no AUTH line"))?;

    let methods = parse_keyword_value(&auth_line.message, "METHODS").ok_or_else(|| {
        RuntimeError::config("PROTOCOLINFO AUTH line had no METHODS field")
    })?;
    let methods: Vec<&str> = methods.split(',').collect();

    if methods.iter().any(|m| *m == "SAFECOOKIE") {
        let cookie_file = parse_keyword_value(&auth_line.message, "COOKIEFILE")
            .ok_or_else(|| RuntimeError::config("SAFECOOKIE advertised with no COOKIEFILE"))?;
        return Ok(AuthMethod::SafeCookie { cookie_file });
    }
    if methods.iter().any(|m| *m == "HASHEDPASSWORD") {
        return Ok(AuthMethod::HashedPassword);
    }
    if methods.iter().any(|m| *m == "NULL") {
        return Ok(AuthMethod::Null);
    }
    Err(RuntimeError::Authentication {
        reason: format!("no supported auth method in PROTOCOLINFO ({methods:?})"),
    })
}

async fn authenticate_safe_cookie(
    connection: &Connection,
    cookie_file: &str,
    fallback_cookie_path: &Path,
) -> Result<(), RuntimeError> {
    let cookie_path: &Path = if cookie_file.is_empty() {
        fallback_cookie_path
    } else {
        Path::new(cookie_file)
    };
    let cookie_bytes = tokio::fs::read(cookie_path).await.map_err(|source| {
        RuntimeError::Authentication {
            reason: format!("could not read cookie file {}: {source}", cookie_path.display()),
        }
    })?;
    let cookie = cookie_from_bytes(&cookie_bytes).map_err(|err| RuntimeError::Authentication {
        reason: err.to_string(),
    })?;

    let client_nonce = generate_client_nonce();
    let challenge = Command::new("AUTHCHALLENGE")
        .arg("SAFECOOKIE")
        .arg(client_nonce.encode_hex::<String>());
    let reply = connection.send(challenge).await?;

    let server_nonce_hex = parse_keyword_value(reply.final_message(), "SERVERNONCE")
        .ok_or_else(|| RuntimeError::Authentication {
            reason: "AUTHCHALLENGE reply had no SERVERNONCE".to_string(),
        })?;
    let server_hash_hex = parse_keyword_value(reply.final_message(), "SERVERHASH")
        .ok_or_else(|| RuntimeError::Authentication {
            reason: "AUTHCHALLENGE reply had no SERVERHASH".to_string(),
        })?;
    let server_nonce = hex::decode(&server_nonce_hex).map_err(|_| RuntimeError::Authentication {
        reason: "SERVERNONCE was not valid hex".to_string(),
    })?;
    let claimed_server_hash = hex::decode(&server_hash_hex).map_err(|_| RuntimeError::Authentication {
        reason: "SERVERHASH was not valid hex".to_string(),
    })?;

    verify_server_hash(&claimed_server_hash, &cookie, &client_nonce, &server_nonce)
        .map_err(|err| RuntimeError::Authentication { reason: err.to_string() })?;

    let client_hash = compute_client_hash(&cookie, &client_nonce, &server_nonce);
    let authenticate = Command::new("AUTHENTICATE").arg(client_hash.encode_hex::<String>());
    connection.send(authenticate).await?;
    Ok(())
}

async fn authenticate_hashed_password(connection: &Connection) -> Result<(), RuntimeError> {
    let password = std::env::var(CONTROL_PASSWORD_ENV).map_err(|_| RuntimeError::Authentication {
        reason: format!(
            "tor requires HASHEDPASSWORD authentication but {CONTROL_PASSWORD_ENV} is not set"
        ),
    })?;
    let authenticate = Command::new("AUTHENTICATE").arg(format!("\"{password}\""));
    connection.send(authenticate).await?;
    Ok(())
}

/// Runs the full handshake: `PROTOCOLINFO`, pick a method, `AUTHENTICATE`
/// (with an `AUTHCHALLENGE` round-trip first for SAFECOOKIE).
///
/// `fallback_cookie_path` is used only if `PROTOCOLINFO`'s `COOKIEFILE`
/// field is empty, which tor does not do in practice but which this crate
/// should not assume.
pub async fn negotiate_authentication(
    connection: &Connection,
    fallback_cookie_path: &Path,
) -> Result<(), RuntimeError> {
    let protocolinfo = connection.send(Command::new("PROTOCOLINFO").arg("1")).await?;
    let method = parse_auth_line(&protocolinfo)?;

    match method {
        AuthMethod::Null => {
            connection.send(Command::new("AUTHENTICATE")).await?;
            Ok(())
        }
        AuthMethod::HashedPassword => authenticate_hashed_password(connection).await,
        AuthMethod::SafeCookie { cookie_file } => {
            authenticate_safe_cookie(connection, &cookie_file, fallback_cookie_path).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tor_ctl::ReplyLine;

    fn group(lines: &[(u16, &str)]) -> ReplyGroup {
        ReplyGroup {
            lines: lines
                .iter()
                .map(|(status, message)| ReplyLine {
                    status: *status,
                    message: message.to_string(),
                    data: None,
                })
                .collect(),
        }
    }

    async fn read_line(io: &mut tokio::io::DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            io.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n") {
                buf.truncate(buf.len() - 2);
                return String::from_utf8(buf).unwrap();
            }
        }
    }

    /// Drives the full S1 scenario end to end: a fake tor peer answers
    /// `PROTOCOLINFO` advertising SAFECOOKIE, runs the `AUTHCHALLENGE`
    /// round trip with a real cookie on disk, and checks the
    /// `AUTHENTICATE` argument this module sends is the exact hash tor
    /// itself would require.
    #[tokio::test]
    async fn safe_cookie_handshake_sends_the_correct_authenticate_hash() {
        let cookie = [0x42u8; tor_ctl::auth::COOKIE_LEN];
        let dir = tempfile::tempdir().unwrap();
        let cookie_path = dir.path().join("control_auth_cookie");
        tokio::fs::write(&cookie_path, cookie).await.unwrap();

        let (client_io, mut server_io) = tokio::io::duplex(8192);
        let connection = Connection::from_io(client_io, 64 * 1024);
        let fallback = dir.path().join("unused");

        let cookie_path_str = cookie_path.to_str().unwrap().to_string();
        let handshake = tokio::spawn(async move {
            negotiate_authentication(&connection, &fallback).await
        });

        assert_eq!(read_line(&mut server_io).await, "PROTOCOLINFO 1");
        server_io
            .write_all(b"250-PROTOCOLINFO 1\r\n")
            .await
            .unwrap();
        server_io
            .write_all(
                format!(
                    "250-AUTH METHODS=SAFECOOKIE COOKIEFILE=\"{cookie_path_str}\"\r\n"
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        server_io
            .write_all(b"250-VERSION Tor=\"0.4.7.13\"\r\n")
            .await
            .unwrap();
        server_io.write_all(b"250 OK\r\n").await.unwrap();

        let challenge_line = read_line(&mut server_io).await;
        let mut parts = challenge_line.split_whitespace();
        assert_eq!(parts.next().unwrap(), "AUTHCHALLENGE");
        assert_eq!(parts.next().unwrap(), "SAFECOOKIE");
        let client_nonce_hex = parts.next().unwrap();
        let client_nonce = hex::decode(client_nonce_hex).unwrap();

        let server_nonce = [0x24u8; tor_ctl::auth::NONCE_LEN];
        let server_hash = tor_ctl::auth::compute_server_hash(&cookie, client_nonce.as_slice().try_into().unwrap(), &server_nonce);
        server_io
            .write_all(
                format!(
                    "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
                    hex::encode(server_hash),
                    hex::encode(server_nonce)
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let authenticate_line = read_line(&mut server_io).await;
        let mut parts = authenticate_line.split_whitespace();
        assert_eq!(parts.next().unwrap(), "AUTHENTICATE");
        let sent_hash = hex::decode(parts.next().unwrap()).unwrap();
        let expected_hash = tor_ctl::auth::compute_client_hash(
            &cookie,
            client_nonce.as_slice().try_into().unwrap(),
            &server_nonce,
        );
        assert_eq!(sent_hash, expected_hash);

        server_io.write_all(b"250 OK\r\n").await.unwrap();
        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn null_method_authenticates_with_no_argument() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);
        let connection = Connection::from_io(client_io, 64 * 1024);
        let fallback = std::path::PathBuf::from("/unused");

        let handshake = tokio::spawn(async move { negotiate_authentication(&connection, &fallback).await });

        assert_eq!(read_line(&mut server_io).await, "PROTOCOLINFO 1");
        server_io
            .write_all(b"250-AUTH METHODS=NULL\r\n")
            .await
            .unwrap();
        server_io.write_all(b"250 OK\r\n").await.unwrap();

        assert_eq!(read_line(&mut server_io).await, "AUTHENTICATE");
        server_io.write_all(b"250 OK\r\n").await.unwrap();

        handshake.await.unwrap().unwrap();
    }

    #[test]
    fn parses_safecookie_with_quoted_cookiefile() {
        let reply = group(&[
            (250, "PROTOCOLINFO 1"),
            (250, r#"AUTH METHODS=SAFECOOKIE,HASHEDPASSWORD COOKIEFILE="/tmp/c""#),
            (250, "VERSION Tor=\"0.4.7.13\""),
            (250, "OK"),
        ]);
        match parse_auth_line(&reply).unwrap() {
            AuthMethod::SafeCookie { cookie_file } => assert_eq!(cookie_file, "/tmp/c"),
            other => panic!("expected SafeCookie, got {other:?}"),
        }
    }

    #[test]
    fn prefers_safecookie_over_hashedpassword() {
        let reply = group(&[(250, r#"AUTH METHODS=HASHEDPASSWORD,SAFECOOKIE COOKIEFILE="/tmp/c""#)]);
        assert!(matches!(parse_auth_line(&reply).unwrap(), AuthMethod::SafeCookie { .. }));
    }

    #[test]
    fn falls_back_to_null() {
        let reply = group(&[(250, "AUTH METHODS=NULL")]);
        assert_eq!(parse_auth_line(&reply).unwrap(), AuthMethod::Null);
    }

    #[test]
    fn missing_auth_line_is_a_config_error() {
        let reply = group(&[(250, "VERSION Tor=\"0.4.7.13\"")]);
        assert!(parse_auth_line(&reply).is_err());
    }
}
