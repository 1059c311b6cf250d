// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-07-21
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Prism: a wire-level gateway that multiplexes PostgreSQL clients onto
//! per-branch database backends.
//!
//! Clients select a branch by suffixing the authentication username with
//! `@<branch>`. The gateway materializes a copy-on-write clone of the
//! branch subvolume, spins up (or reuses) a dedicated backend container
//! bound to that clone, rewrites the startup packet, and splices the two
//! sockets for the rest of the session. Idle backends are reaped.

/// Command-line configuration for the gateway daemon.
pub mod config;
/// Backend lifecycle manager and container runtime bindings.
pub mod engine;
/// Read-only management HTTP surface.
pub mod mgmt;
/// Startup handshake codec for the PostgreSQL wire protocol.
pub mod protocol;
/// Per-connection session orchestration and the byte splicer.
pub mod session;
/// Copy-on-write storage driver over btrfs subvolumes.
pub mod storage;
