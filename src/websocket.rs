//! WebSocket upgrade handling (RFC 6455 Section 4, server side).
//!
//! Weft accepts upgrades only for sessions already past bootstrap; the
//! framing itself belongs to the embedding listener. This module computes
//! the accept key and assembles the 101 response.

use crate::http::ResponseWriter;
use base64::Engine;
use sha1::{Digest, Sha1};

/// RFC 6455 GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the Sec-WebSocket-Accept value from a client key.
///
/// Per RFC 6455 Section 4.2.2: concatenate the client's key with the GUID,
/// SHA-1 the result, base64 encode the hash.
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Writes the 101 Switching Protocols response for `client_key`.
pub fn write_upgrade_response(rw: &mut ResponseWriter, client_key: &str) {
    rw.set_status(101);
    rw.add_header("Upgrade", "websocket");
    rw.add_header("Connection", "Upgrade");
    rw.add_header("Sec-WebSocket-Accept", compute_accept_key(client_key));
}
