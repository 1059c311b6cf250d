// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-06-30

//! Startup handshake codec for the PostgreSQL-family wire protocol (v3.0).
//!
//! The gateway only ever frames the startup dialect: everything after the
//! forwarded startup packet is opaque bytes handled by the splicer.

mod codec;
mod types;

pub use codec::{encode_startup, extract_branch, parse_startup};
pub use types::{
    ProtocolError, StartupMessage, DEFAULT_BRANCH, MAX_SSL_DENIALS, MAX_STARTUP_LEN,
    SSL_REQUEST_CODE, STARTUP_MESSAGE_CODE,
};
