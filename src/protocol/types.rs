// CLASSIFICATION: COMMUNITY
// Filename: types.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-06-30

//! Startup-dialect constants, message model and error taxonomy.

use std::collections::HashMap;

/// Protocol code carried by an SSL upgrade probe.
pub const SSL_REQUEST_CODE: u32 = 80877103;

/// Protocol code of a v3.0 startup message (major 3, minor 0).
pub const STARTUP_MESSAGE_CODE: u32 = 196608;

/// Upper bound on a declared startup frame, matching the PostgreSQL
/// server's own startup-packet cap.
pub const MAX_STARTUP_LEN: u32 = 10_000;

/// How many SSL probes a single connection may send before the handshake
/// is failed as misbehaving.
pub const MAX_SSL_DENIALS: usize = 2;

/// Branch used when the username carries no suffix.
pub const DEFAULT_BRANCH: &str = "master";

/// Decoded startup message.
///
/// `user` and `database` are pulled out of the parameter list; every other
/// key the client sent is retained verbatim in `options`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupMessage {
    /// Value of the `user` parameter, empty if the client omitted it.
    pub user: String,
    /// Value of the `database` parameter, empty if the client omitted it.
    pub database: String,
    /// Remaining startup parameters, unmodified.
    pub options: HashMap<String, String>,
}

/// Errors surfaced while framing or interpreting the startup handshake.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame violated the length-prefixed startup framing.
    #[error("malformed startup frame: {0}")]
    MalformedFrame(&'static str),
    /// Encountered a protocol code the gateway does not speak.
    #[error("unsupported protocol code {0}")]
    UnsupportedCode(u32),
    /// Username suffix is not usable as a subvolume and container name.
    #[error("invalid branch name {0:?}")]
    InvalidBranch(String),
    /// Transport failure underneath the handshake.
    #[error("handshake i/o: {0}")]
    Io(#[from] std::io::Error),
}
