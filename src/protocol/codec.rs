// CLASSIFICATION: COMMUNITY
// Filename: codec.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Parse, deny and re-emit startup frames.

use std::io::{self, Read, Write};

use crate::protocol::types::*;

/// Read startup frames until a startup message arrives.
///
/// Each frame is a 4-byte big-endian total length (inclusive of itself), a
/// 4-byte big-endian protocol code and `length - 8` payload bytes. SSL
/// probes are answered with a single `b'N'` on the same stream and the loop
/// continues; after [`MAX_SSL_DENIALS`] probes the connection is treated as
/// misbehaving. Any other code fails the handshake.
pub fn parse_startup<S: Read + Write>(stream: &mut S) -> Result<StartupMessage, ProtocolError> {
    let mut denials = 0usize;
    loop {
        let mut header = [0u8; 4];
        read_frame_bytes(stream, &mut header)?;
        let length = u32::from_be_bytes(header);
        if length < 8 {
            return Err(ProtocolError::MalformedFrame("declared length below frame header"));
        }
        if length > MAX_STARTUP_LEN {
            return Err(ProtocolError::MalformedFrame("declared length exceeds startup cap"));
        }

        let mut code_buf = [0u8; 4];
        read_frame_bytes(stream, &mut code_buf)?;
        let code = u32::from_be_bytes(code_buf);

        let mut payload = vec![0u8; (length - 8) as usize];
        read_frame_bytes(stream, &mut payload)?;

        match code {
            SSL_REQUEST_CODE => {
                if denials >= MAX_SSL_DENIALS {
                    return Err(ProtocolError::UnsupportedCode(code));
                }
                stream.write_all(&[b'N'])?;
                denials += 1;
            }
            STARTUP_MESSAGE_CODE => return decode_payload(&payload),
            other => return Err(ProtocolError::UnsupportedCode(other)),
        }
    }
}

/// Encode a startup frame carrying only `user` and `database`.
///
/// The caller writes the returned buffer to the backend before any other
/// byte; the splice takes over from there.
pub fn encode_startup(user: &str, database: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    put_param(&mut payload, "user", user);
    put_param(&mut payload, "database", database);
    payload.push(0);

    let total = payload
        .len()
        .checked_add(8)
        .expect("startup payload length overflow");
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(&STARTUP_MESSAGE_CODE.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Split a client username into `(real_user, branch_id)`.
///
/// No `@` or an empty suffix selects [`DEFAULT_BRANCH`]. A non-empty suffix
/// is trimmed and must be usable as both a subvolume name and a container
/// name suffix.
pub fn extract_branch(full_username: &str) -> Result<(String, String), ProtocolError> {
    let Some((user, suffix)) = full_username.split_once('@') else {
        return Ok((full_username.to_owned(), DEFAULT_BRANCH.to_owned()));
    };
    if suffix.is_empty() {
        return Ok((user.to_owned(), DEFAULT_BRANCH.to_owned()));
    }
    let branch = suffix.trim();
    if !valid_branch(branch) {
        return Err(ProtocolError::InvalidBranch(suffix.to_owned()));
    }
    Ok((user.to_owned(), branch.to_owned()))
}

fn valid_branch(branch: &str) -> bool {
    let mut chars = branch.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
}

fn decode_payload(payload: &[u8]) -> Result<StartupMessage, ProtocolError> {
    let mut message = StartupMessage::default();
    let mut fields = payload.split(|byte| *byte == 0);
    while let Some(raw_key) = fields.next() {
        if raw_key.is_empty() {
            break;
        }
        let key = parameter_text(raw_key)?;
        let value = parameter_text(fields.next().unwrap_or(b""))?;
        match key {
            "user" => message.user = value.to_owned(),
            "database" => message.database = value.to_owned(),
            other => {
                message.options.insert(other.to_owned(), value.to_owned());
            }
        }
    }
    Ok(message)
}

fn parameter_text(raw: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::MalformedFrame("non-utf8 startup parameter"))
}

fn read_frame_bytes<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), ProtocolError> {
    stream.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => ProtocolError::MalformedFrame("stream ended mid-frame"),
        _ => ProtocolError::Io(err),
    })
}

fn put_param(buffer: &mut Vec<u8>, key: &str, value: &str) {
    buffer.extend_from_slice(key.as_bytes());
    buffer.push(0);
    buffer.extend_from_slice(value.as_bytes());
    buffer.push(0);
}
