//! User event handlers.
//!
//! Handles ADDUSER, REMOVEUSER and CLIENTSTATUS.

use tas_proto::{ClientStatus, Command};
use tracing::{debug, warn};

use super::battle::{purge_battle, purge_member};
use super::{lenient_u32, required_arg, required_u32};
use crate::error::{EventError, EventResult};
use crate::state::{LobbyState, User};

pub(super) fn add_user(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let country = required_arg(cmd, 1)?;
    if state.users.contains_key(name) {
        return Err(EventError::DuplicateUser(name.to_string()));
    }

    let account_id = lenient_u32(cmd, 2, "accountID", notes);
    let lobby_client = cmd.rest(3).unwrap_or_default();
    state.users.insert(
        name.to_string(),
        User::new(country.to_string(), account_id, lobby_client),
    );
    Ok(())
}

/// Removes a user, healing any memberships the server failed to retract
/// first.
///
/// A user that is still listed in a battle when it vanishes takes the
/// synthetic leave path (closing the battle when it founded one); channel
/// memberships are swept the same way. The removal always completes; the
/// healed inconsistencies are reported afterwards.
pub(super) fn remove_user(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let user = match state.users.get(name) {
        Some(user) => user.clone(),
        None => return Err(EventError::UnknownUser(name.to_string())),
    };

    let mut healed = Vec::new();
    if let Some(battle_id) = user.battle_id {
        let founded = state
            .battles
            .get(&battle_id)
            .is_some_and(|battle| battle.founder == name);
        purge_member(state, battle_id, name);
        healed.push(format!("{name} vanished while in battle {battle_id}"));
        if founded {
            purge_battle(state, battle_id);
            healed.push(format!("closed battle {battle_id} with its founder"));
        }
    }

    // Sweep every channel rather than trusting the user's own membership
    // set, so an asymmetry cannot survive the removal.
    for (chan, channel) in state.channels.iter_mut() {
        if channel.members.remove(name) {
            healed.push(format!("{name} vanished while in channel {chan}"));
        }
    }

    state.users.remove(name);

    if healed.is_empty() {
        Ok(())
    } else {
        warn!(user = %name, "healed stale memberships on user removal");
        Err(EventError::Healed(healed.join("; ")))
    }
}

pub(super) fn client_status(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let value = required_u32(cmd, 1, "status")?;
    let status = ClientStatus::unmarshall(value);

    let is_self = state.self_name.as_deref() == Some(name);
    let was_in_game = match state.users.get_mut(name) {
        Some(user) => {
            let was = user.status.in_game;
            user.status = status;
            was
        }
        None => return Err(EventError::UnknownUser(name.to_string())),
    };

    // Our own in-game edge drives the running-battle snapshot.
    if is_self {
        if status.in_game && !was_in_game {
            if state.store_running_battle() {
                debug!("froze running-battle snapshot");
            }
        } else if !status.in_game && was_in_game {
            state.clear_running_battle();
        }
    }
    Ok(())
}
