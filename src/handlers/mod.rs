//! Internal state handlers for server events.
//!
//! Every mutation of [`LobbyState`] happens here, one function per command,
//! dispatched by name. Handlers are defensive: events that reference unknown
//! entities, arrive out of context or duplicate existing state are rejected
//! with an [`EventError`] and leave the model untouched, except where
//! self-healing applies (a user vanishing while memberships remain is
//! repaired first, then reported).
//!
//! Handlers never perform I/O. Soft anomalies that do not invalidate the
//! event (a non-numeric metadata field, an unparsable address) are recorded
//! in the `notes` list and the field falls back to its zero value.

mod battle;
mod channel;
mod session;
mod user;

use tas_proto::{Command, ProtocolError};

use crate::error::{EventError, EventResult};
use crate::state::LobbyState;

/// Applies one server event to the model.
///
/// Returns `None` for commands without an internal handler (chat traffic,
/// acknowledgments, prompts); those flow through to callbacks untouched.
pub(crate) fn dispatch(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> Option<EventResult> {
    let result = match cmd.name() {
        "ACCEPTED" => session::accepted(state, cmd),
        "SERVERMSG" => session::server_msg(state, cmd),
        "ADDUSER" => user::add_user(state, cmd, notes),
        "REMOVEUSER" => user::remove_user(state, cmd),
        "CLIENTSTATUS" => user::client_status(state, cmd),
        "JOIN" => channel::join(state, cmd),
        "CHANNELTOPIC" => channel::channel_topic(state, cmd),
        "CLIENTS" => channel::clients(state, cmd),
        "JOINED" => channel::joined(state, cmd),
        "LEFT" => channel::left(state, cmd),
        "FORCELEAVECHANNEL" => channel::force_leave(state, cmd),
        "BATTLEOPENED" => battle::battle_opened(state, cmd, notes),
        "BATTLECLOSED" => battle::battle_closed(state, cmd),
        "JOINEDBATTLE" => battle::joined_battle(state, cmd),
        "LEFTBATTLE" => battle::left_battle(state, cmd),
        "UPDATEBATTLEINFO" => battle::update_battle_info(state, cmd, notes),
        "OPENBATTLE" => battle::open_battle(state, cmd),
        "JOINBATTLE" => battle::join_battle(state, cmd),
        "JOINBATTLEFAILED" => battle::join_battle_failed(state, cmd),
        "CLIENTBATTLESTATUS" => battle::client_battle_status(state, cmd),
        "CLIENTIPPORT" => battle::client_ip_port(state, cmd, notes),
        "HOSTPORT" => battle::host_port(state, cmd, notes),
        "ADDBOT" => battle::add_bot(state, cmd),
        "REMOVEBOT" => battle::remove_bot(state, cmd),
        "UPDATEBOT" => battle::update_bot(state, cmd),
        "ADDSTARTRECT" => battle::add_start_rect(state, cmd, notes),
        "REMOVESTARTRECT" => battle::remove_start_rect(state, cmd, notes),
        "SETSCRIPTTAGS" => battle::set_script_tags(state, cmd, notes),
        "REMOVESCRIPTTAGS" => battle::remove_script_tags(state, cmd),
        "DISABLEUNITS" => battle::disable_units(state, cmd),
        "ENABLEUNITS" => battle::enable_units(state, cmd),
        "ENABLEALLUNITS" => battle::enable_all_units(state, cmd),
        _ => return None,
    };
    Some(result)
}

// ============================================================================
// Argument Helpers
// ============================================================================

/// Returns argument `n` or the missing-argument error for short lines.
fn required_arg<'a>(cmd: &'a Command, n: usize) -> Result<&'a str, EventError> {
    cmd.arg(n).ok_or_else(|| EventError::MissingArgs {
        command: cmd.name().to_string(),
    })
}

/// Parses a numeric field that identifies something; failure rejects the
/// event.
fn required_u32(cmd: &Command, n: usize, field: &'static str) -> Result<u32, EventError> {
    let raw = required_arg(cmd, n)?;
    raw.parse().map_err(|_| {
        EventError::Protocol(ProtocolError::BadInteger {
            field,
            value: raw.to_string(),
        })
    })
}

/// Signed variant of [`required_u32`] for battle-status values.
fn required_i32(cmd: &Command, n: usize, field: &'static str) -> Result<i32, EventError> {
    let raw = required_arg(cmd, n)?;
    raw.parse().map_err(|_| {
        EventError::Protocol(ProtocolError::BadInteger {
            field,
            value: raw.to_string(),
        })
    })
}

/// Parses a numeric metadata field; a malformed value coerces to 0 and is
/// recorded as a note, an absent value is 0 without comment.
fn lenient_u32(cmd: &Command, n: usize, field: &str, notes: &mut Vec<String>) -> u32 {
    match cmd.arg(n) {
        None => 0,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                notes.push(format!(
                    "{}: non-numeric {field} {raw:?} coerced to 0",
                    cmd.name()
                ));
                0
            }
        },
    }
}

/// Signed variant of [`lenient_u32`] for map hashes.
fn lenient_i32(cmd: &Command, n: usize, field: &str, notes: &mut Vec<String>) -> i32 {
    match cmd.arg(n) {
        None => 0,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                notes.push(format!(
                    "{}: non-numeric {field} {raw:?} coerced to 0",
                    cmd.name()
                ));
                0
            }
        },
    }
}
