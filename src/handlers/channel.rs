//! Channel event handlers.
//!
//! Handles JOIN, CHANNELTOPIC, CLIENTS, JOINED, LEFT and FORCELEAVECHANNEL.
//! Channel membership is kept bidirectionally consistent with the per-user
//! channel sets: every mutation touches both sides.

use tas_proto::Command;
use tracing::info;

use super::required_arg;
use crate::error::{EventError, EventResult};
use crate::state::{Channel, LobbyState, Topic};

pub(super) fn join(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    if state.channels.contains_key(name) {
        return Err(EventError::DuplicateChannel(name.to_string()));
    }

    let mut channel = Channel::default();
    if let Some(self_name) = state.self_name.clone() {
        channel.members.insert(self_name.clone());
        if let Some(user) = state.users.get_mut(&self_name) {
            user.channels.insert(name.to_string());
        }
    }
    state.channels.insert(name.to_string(), channel);
    info!(channel = %name, "joined channel");
    Ok(())
}

pub(super) fn channel_topic(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let author = required_arg(cmd, 1)?.to_string();
    let text = cmd.rest(2).unwrap_or_default();

    match state.channels.get_mut(name) {
        Some(channel) => {
            channel.topic = Some(Topic { author, text });
            Ok(())
        }
        None => Err(EventError::UnknownChannel(name.to_string())),
    }
}

/// Member burst after a join. Names the server sends for users we have never
/// seen are skipped and reported; the rest of the burst still applies.
pub(super) fn clients(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    if !state.channels.contains_key(name) {
        return Err(EventError::UnknownChannel(name.to_string()));
    }

    let mut unknown = Vec::new();
    for member in cmd.args().iter().skip(1) {
        if let Some(user) = state.users.get_mut(member.as_str()) {
            user.channels.insert(name.to_string());
            if let Some(channel) = state.channels.get_mut(name) {
                channel.members.insert(member.clone());
            }
        } else {
            unknown.push(member.clone());
        }
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(EventError::Healed(format!(
            "CLIENTS {name}: skipped unknown users {}",
            unknown.join(", ")
        )))
    }
}

pub(super) fn joined(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let member = required_arg(cmd, 1)?;
    if !state.users.contains_key(member) {
        return Err(EventError::UnknownUser(member.to_string()));
    }
    let channel = state
        .channels
        .get_mut(name)
        .ok_or_else(|| EventError::UnknownChannel(name.to_string()))?;

    if !channel.members.insert(member.to_string()) {
        return Err(EventError::AlreadyMember {
            user: member.to_string(),
            target: name.to_string(),
        });
    }
    if let Some(user) = state.users.get_mut(member) {
        user.channels.insert(name.to_string());
    }
    Ok(())
}

pub(super) fn left(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let member = required_arg(cmd, 1)?;

    if state.self_name.as_deref() == Some(member) {
        if !state.channels.contains_key(name) {
            return Err(EventError::UnknownChannel(name.to_string()));
        }
        drop_channel(state, name);
        return Ok(());
    }

    let channel = state
        .channels
        .get_mut(name)
        .ok_or_else(|| EventError::UnknownChannel(name.to_string()))?;
    if !channel.members.remove(member) {
        return Err(EventError::NotMember {
            user: member.to_string(),
            target: name.to_string(),
        });
    }
    if let Some(user) = state.users.get_mut(member) {
        user.channels.remove(name);
    }
    Ok(())
}

pub(super) fn force_leave(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    if !state.channels.contains_key(name) {
        return Err(EventError::UnknownChannel(name.to_string()));
    }
    drop_channel(state, name);
    info!(channel = %name, "forced out of channel");
    Ok(())
}

/// Removes a channel we are leaving, retracting it from every member's
/// channel set so the bidirectional invariant survives.
fn drop_channel(state: &mut LobbyState, name: &str) {
    if let Some(channel) = state.channels.remove(name) {
        for member in &channel.members {
            if let Some(user) = state.users.get_mut(member) {
                user.channels.remove(name);
            }
        }
    }
}
