//! Trusted caller identity.
//!
//! Credential verification happens upstream; by the time a request reaches
//! the broker its identity has already been checked and arrives as plain
//! request headers. The broker trusts them as-is and only rejects requests
//! that carry no usable identity at all.

use axum::http::{HeaderMap, StatusCode};

use arena_core::PlayerInfo;

pub const PLAYER_ID_HEADER: &str = "x-player-id";
pub const PLAYER_NAME_HEADER: &str = "x-player-name";
pub const PLAYER_EMAIL_HEADER: &str = "x-player-email";

/// Extract the authenticated player identity from request headers.
///
/// Missing or malformed identity is a 403: nothing gets bridged into a
/// session for a caller the auth layer did not vouch for. The email is the
/// contact key and must be non-empty.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<PlayerInfo, StatusCode> {
    let id = header_str(headers, PLAYER_ID_HEADER)?
        .parse::<u64>()
        .map_err(|_| StatusCode::FORBIDDEN)?;
    let name = header_str(headers, PLAYER_NAME_HEADER)?.to_owned();
    let email = header_str(headers, PLAYER_EMAIL_HEADER)?.to_owned();
    if email.is_empty() {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(PlayerInfo::new(id, name, email))
}

fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Result<&'a str, StatusCode> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .ok_or(StatusCode::FORBIDDEN)
}
