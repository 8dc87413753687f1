//! Session lifecycle handlers.
//!
//! Handles ACCEPTED and the SERVERMSG protocol-extension declaration.

use std::collections::HashMap;

use tas_proto::{Command, StatusMode};
use tracing::{debug, warn};

use super::required_arg;
use crate::error::EventResult;
use crate::state::LobbyState;

/// Payload prefix marking a SERVERMSG as an extension declaration.
const EXTENSION_SENTINEL: &str = "ProtocolExtensions:";

/// Extension key selecting the 8-bit team/id battle-status layout.
const EXT_TEAMS_8BIT: &str = "battleStatus:teams-8bit";

pub(super) fn accepted(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    state.self_name = Some(name.to_string());
    Ok(())
}

/// Ordinary server messages carry no state; the one exception is the
/// extension declaration, a payload of the form
/// `ProtocolExtensions:{"key":value,...}`.
pub(super) fn server_msg(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let Some(text) = cmd.rest(0) else {
        return Ok(());
    };
    let Some(json) = text.strip_prefix(EXTENSION_SENTINEL) else {
        return Ok(());
    };

    match serde_json::from_str::<HashMap<String, serde_json::Value>>(json.trim()) {
        Ok(declared) => {
            debug!(count = declared.len(), "protocol extensions declared");
            state.extensions.extend(declared);
            state.status_mode = if truthy(state.extensions.get(EXT_TEAMS_8BIT)) {
                StatusMode::Extended
            } else {
                StatusMode::Narrow
            };
        }
        Err(e) => {
            warn!(error = %e, "ignoring malformed protocol-extension declaration");
        }
    }
    Ok(())
}

fn truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}
