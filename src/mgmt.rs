// CLASSIFICATION: COMMUNITY
// Filename: mgmt.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-07-02

//! Read-only management HTTP surface.
//!
//! One endpoint: `GET /branches` returns a JSON object mapping branch id to
//! the RFC-3339 timestamp of its last activity.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{error, info};
use tiny_http::{Header, Method, Response, Server};

use crate::engine::Manager;

/// Serve the management API on `address`. Blocks the calling thread.
pub fn serve(address: &str, manager: Arc<Manager>) -> anyhow::Result<()> {
    let server = Server::http(address)
        .map_err(|err| anyhow!("failed to bind management endpoint {address}: {err}"))?;
    info!("management api live address={address}");

    for request in server.incoming_requests() {
        if request.method() == &Method::Get && request.url() == "/branches" {
            let branches: BTreeMap<String, String> = manager
                .list_branches()
                .into_iter()
                .map(|(branch, last_active)| {
                    (branch, DateTime::<Utc>::from(last_active).to_rfc3339())
                })
                .collect();
            match serde_json::to_string(&branches) {
                Ok(body) => {
                    let content_type =
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                            .expect("static header");
                    let _ = request.respond(Response::from_string(body).with_header(content_type));
                }
                Err(err) => {
                    error!("branch listing serialization failed: {err}");
                    let _ = request.respond(Response::empty(500));
                }
            }
        } else {
            let _ = request.respond(Response::empty(404));
        }
    }
    Ok(())
}
