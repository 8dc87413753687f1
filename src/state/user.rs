//! User-related lobby state.

use std::collections::HashSet;
use std::net::IpAddr;

use tas_proto::ClientStatus;

/// A user known to the lobby server, keyed by name in [`super::LobbyState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// Two-letter country code, or `??` when the server hides it.
    pub country: String,
    /// Server-side account identifier, 0 when the server sends none.
    pub account_id: u32,
    /// Lobby client identification string, empty when the server sends none.
    pub lobby_client: String,
    /// Last seen client status bitfield.
    pub status: ClientStatus,
    /// IP address learned from CLIENTIPPORT, if any.
    pub ip: Option<IpAddr>,
    /// UDP port learned from CLIENTIPPORT, if any.
    pub port: Option<u16>,
    /// Channels this user is currently in (only channels we share).
    pub channels: HashSet<String>,
    /// Battle the user currently sits in, if any.
    pub battle_id: Option<u32>,
}

impl User {
    /// Builds a user record as announced by ADDUSER.
    pub fn new(country: String, account_id: u32, lobby_client: String) -> Self {
        User {
            country,
            account_id,
            lobby_client,
            ..User::default()
        }
    }
}
