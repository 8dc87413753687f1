//! Battle event handlers.
//!
//! Handles the battle-list traffic (BATTLEOPENED, BATTLECLOSED,
//! JOINEDBATTLE, LEFTBATTLE, UPDATEBATTLEINFO), the joined-battle lifecycle
//! (OPENBATTLE, JOINBATTLE, JOINBATTLEFAILED) and everything scoped to the
//! joined battle: member status and addresses, bots, start rectangles,
//! script tags and unit restrictions.

use std::net::IpAddr;

use tas_proto::{BattleStatus, Color, Command, ProtocolError, StatusMode};
use tracing::info;

use super::{lenient_i32, lenient_u32, required_arg, required_i32, required_u32};
use crate::error::{EventError, EventResult};
use crate::state::{
    normalize_requested_status, reconcile_status, ActiveBattle, Battle, Bot, LobbyState,
    MemberDetail, StartRect,
};

// ============================================================================
// Guards
// ============================================================================

/// The joined battle, or the out-of-context error for `cmd`.
fn active_mut<'a>(
    state: &'a mut LobbyState,
    cmd: &Command,
) -> Result<&'a mut ActiveBattle, EventError> {
    state
        .active_battle
        .as_mut()
        .ok_or_else(|| EventError::NotInBattle(cmd.name().to_string()))
}

/// Like [`active_mut`], but also checks the event's battle id against the
/// joined battle.
fn active_for<'a>(
    state: &'a mut LobbyState,
    id: u32,
    cmd: &Command,
) -> Result<&'a mut ActiveBattle, EventError> {
    match state.active_battle.as_mut() {
        Some(active) if active.id == id => Ok(active),
        _ => Err(EventError::NotInBattle(cmd.name().to_string())),
    }
}

/// Read-only variant of [`active_for`] for two-phase handlers that validate
/// before touching pending state.
fn require_active<'a>(
    state: &'a LobbyState,
    id: u32,
    cmd: &Command,
) -> Result<&'a ActiveBattle, EventError> {
    match state.active_battle.as_ref() {
        Some(active) if active.id == id => Ok(active),
        _ => Err(EventError::NotInBattle(cmd.name().to_string())),
    }
}

// ============================================================================
// Battle List
// ============================================================================

pub(super) fn battle_opened(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    if state.battles.contains_key(&id) {
        return Err(EventError::DuplicateBattle(id));
    }
    let founder = required_arg(cmd, 3)?.to_string();
    match state.users.get(&founder) {
        None => return Err(EventError::UnknownUser(founder)),
        Some(user) => {
            if let Some(existing) = user.battle_id {
                return Err(EventError::AlreadyMember {
                    user: founder,
                    target: format!("battle {existing}"),
                });
            }
        }
    }

    let battle = Battle {
        founder: founder.clone(),
        battle_type: lenient_u32(cmd, 1, "type", notes),
        nat_type: lenient_u32(cmd, 2, "natType", notes),
        ip: required_arg(cmd, 4)?.to_string(),
        port: u16::try_from(lenient_u32(cmd, 5, "port", notes)).unwrap_or(0),
        max_players: lenient_u32(cmd, 6, "maxPlayers", notes),
        passworded: cmd.arg(7) == Some("1"),
        rank_limit: lenient_u32(cmd, 8, "rank", notes),
        map_hash: lenient_i32(cmd, 9, "mapHash", notes),
        engine_name: cmd.rest(10).unwrap_or_default(),
        engine_version: cmd.tail(0).unwrap_or_default().to_string(),
        map_name: cmd.tail(1).unwrap_or_default().to_string(),
        title: cmd.tail(2).unwrap_or_default().to_string(),
        game_name: cmd.tail(3).unwrap_or_default().to_string(),
        members: vec![founder.clone()],
        spectator_count: 0,
        locked: false,
    };
    state.battles.insert(id, battle);
    if let Some(user) = state.users.get_mut(&founder) {
        user.battle_id = Some(id);
    }
    Ok(())
}

pub(super) fn battle_closed(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    if !state.battles.contains_key(&id) {
        return Err(EventError::UnknownBattle(id));
    }
    purge_battle(state, id);
    Ok(())
}

pub(super) fn joined_battle(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    let name = required_arg(cmd, 1)?;
    if !state.battles.contains_key(&id) {
        return Err(EventError::UnknownBattle(id));
    }
    match state.users.get(name) {
        None => return Err(EventError::UnknownUser(name.to_string())),
        Some(user) => {
            if let Some(existing) = user.battle_id {
                return Err(EventError::AlreadyMember {
                    user: name.to_string(),
                    target: format!("battle {existing}"),
                });
            }
        }
    }

    if let Some(battle) = state.battles.get_mut(&id) {
        battle.members.push(name.to_string());
    }
    if let Some(user) = state.users.get_mut(name) {
        user.battle_id = Some(id);
    }
    if let Some(active) = state.active_battle.as_mut() {
        if active.id == id {
            let detail = active
                .members
                .entry(name.to_string())
                .or_insert_with(MemberDetail::default);
            // Hosts are told the joiner's script password.
            if let Some(password) = cmd.arg(2) {
                detail.script_password = Some(password.to_string());
            }
        }
    }
    Ok(())
}

pub(super) fn left_battle(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    let name = required_arg(cmd, 1)?;
    if !state.battles.contains_key(&id) {
        return Err(EventError::UnknownBattle(id));
    }
    let member_of = match state.users.get(name) {
        Some(user) => user.battle_id,
        None => return Err(EventError::UnknownUser(name.to_string())),
    };
    if member_of != Some(id) {
        return Err(EventError::NotMember {
            user: name.to_string(),
            target: format!("battle {id}"),
        });
    }

    if state.self_name.as_deref() == Some(name) {
        // Leaving ourselves drops the whole joined-battle detail, bots of
        // other members included.
        state.active_battle = None;
        if let Some(battle) = state.battles.get_mut(&id) {
            battle.members.retain(|member| member != name);
        }
        if let Some(user) = state.users.get_mut(name) {
            user.battle_id = None;
        }
    } else {
        purge_member(state, id, name);
    }
    Ok(())
}

pub(super) fn update_battle_info(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    let spectator_count = lenient_u32(cmd, 1, "spectatorCount", notes);
    let locked = cmd.arg(2) == Some("1");
    let map_hash = lenient_i32(cmd, 3, "mapHash", notes);
    let map_name = cmd.rest(4);

    let battle = state
        .battles
        .get_mut(&id)
        .ok_or(EventError::UnknownBattle(id))?;
    battle.spectator_count = spectator_count;
    battle.locked = locked;
    battle.map_hash = map_hash;
    if let Some(map_name) = map_name {
        battle.map_name = map_name;
    }
    Ok(())
}

// ============================================================================
// Joined-Battle Lifecycle
// ============================================================================

pub(super) fn open_battle(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    if state.active_battle.is_some() {
        return Err(EventError::AlreadyInBattle("OPENBATTLE".to_string()));
    }
    let battle = state
        .battles
        .get(&id)
        .ok_or(EventError::UnknownBattle(id))?;

    let mut active = ActiveBattle::new(id);
    for member in &battle.members {
        active.members.insert(member.clone(), MemberDetail::default());
    }
    state.active_battle = Some(active);
    info!(battle = id, "hosting battle");
    Ok(())
}

pub(super) fn join_battle(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    if state.active_battle.is_some() {
        return Err(EventError::AlreadyInBattle("JOINBATTLE".to_string()));
    }
    let battle = state
        .battles
        .get(&id)
        .ok_or(EventError::UnknownBattle(id))?;

    let mut active = ActiveBattle::new(id);
    for member in &battle.members {
        active.members.insert(member.clone(), MemberDetail::default());
    }
    if let Some(self_name) = state.self_name.clone() {
        active.members.insert(
            self_name,
            MemberDetail {
                script_password: state.pending_script_password.take(),
                ..MemberDetail::default()
            },
        );
    }
    state.active_battle = Some(active);
    info!(battle = id, "joined battle");
    Ok(())
}

pub(super) fn join_battle_failed(state: &mut LobbyState, _cmd: &Command) -> EventResult {
    state.pending_script_password = None;
    Ok(())
}

// ============================================================================
// Member Detail
// ============================================================================

pub(super) fn client_battle_status(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let status_raw = required_i32(cmd, 1, "battleStatus")?;
    let color_raw = required_u32(cmd, 2, "teamColor")?;

    let mode = state.status_mode;
    let active = active_mut(state, cmd)?;
    let battle_id = active.id;
    let detail = active
        .members
        .get_mut(name)
        .ok_or_else(|| EventError::NotMember {
            user: name.to_string(),
            target: format!("battle {battle_id}"),
        })?;

    let incoming = BattleStatus::unmarshall(status_raw, mode);
    detail.battle_status = Some(if mode == StatusMode::Narrow {
        reconcile_status(detail.battle_status.as_ref(), incoming)
    } else {
        incoming
    });
    detail.color = Color::unmarshall(color_raw);
    Ok(())
}

pub(super) fn client_ip_port(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let name = required_arg(cmd, 0)?;
    let ip_raw = required_arg(cmd, 1)?;
    let port_raw = required_arg(cmd, 2)?;

    let ip = match ip_raw.parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            notes.push(format!(
                "CLIENTIPPORT: unparsable address {ip_raw:?} for {name}"
            ));
            None
        }
    };
    let port = match port_raw.parse::<u16>() {
        Ok(port) => Some(port),
        Err(_) => {
            notes.push(format!(
                "CLIENTIPPORT: non-numeric port {port_raw:?} for {name}"
            ));
            None
        }
    };

    let active = active_mut(state, cmd)?;
    let battle_id = active.id;
    let detail = active
        .members
        .get_mut(name)
        .ok_or_else(|| EventError::NotMember {
            user: name.to_string(),
            target: format!("battle {battle_id}"),
        })?;
    if ip.is_some() {
        detail.ip = ip;
    }
    if port.is_some() {
        detail.port = port;
    }

    if let Some(user) = state.users.get_mut(name) {
        if ip.is_some() {
            user.ip = ip;
        }
        if port.is_some() {
            user.port = port;
        }
    }
    Ok(())
}

pub(super) fn host_port(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let port_raw = required_arg(cmd, 0)?;
    let battle_id = active_mut(state, cmd)?.id;
    let port = match port_raw.parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            notes.push(format!("HOSTPORT: non-numeric port {port_raw:?}"));
            return Ok(());
        }
    };

    let founder = state
        .battles
        .get(&battle_id)
        .map(|battle| battle.founder.clone())
        .ok_or(EventError::UnknownBattle(battle_id))?;
    match state
        .active_battle
        .as_mut()
        .and_then(|active| active.members.get_mut(&founder))
    {
        Some(detail) => {
            detail.port = Some(port);
            Ok(())
        }
        None => Err(EventError::NotMember {
            user: founder,
            target: format!("battle {battle_id}"),
        }),
    }
}

// ============================================================================
// Bots
// ============================================================================

pub(super) fn add_bot(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    let name = required_arg(cmd, 1)?.to_string();
    let owner = required_arg(cmd, 2)?.to_string();
    let status_raw = required_i32(cmd, 3, "battleStatus")?;
    let color_raw = required_u32(cmd, 4, "teamColor")?;
    let ai_label = cmd.rest(5).unwrap_or_default();

    {
        let active = require_active(state, id, cmd)?;
        if active.bots.contains_key(&name) {
            return Err(EventError::DuplicateBot(name));
        }
        if !active.members.contains_key(&owner) {
            return Err(EventError::NotMember {
                user: owner,
                target: format!("battle {id}"),
            });
        }
    }

    let mode = state.status_mode;
    let incoming = BattleStatus::unmarshall(status_raw, mode);
    let battle_status = match state.pending_bot_status.remove(&name) {
        Some(requested) if mode == StatusMode::Narrow => reconcile_status(
            Some(&normalize_requested_status(requested, mode)),
            incoming,
        ),
        _ => incoming,
    };

    let active = active_for(state, id, cmd)?;
    active.bots.insert(
        name.clone(),
        Bot {
            owner: owner.clone(),
            battle_status,
            color: Color::unmarshall(color_raw),
            ai_label,
        },
    );
    active.bot_names.push(name.clone());
    if let Some(detail) = active.members.get_mut(&owner) {
        detail.bots.insert(name);
    }
    Ok(())
}

pub(super) fn remove_bot(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    let name = required_arg(cmd, 1)?;

    let active = active_for(state, id, cmd)?;
    match active.remove_bot(name) {
        Some(bot) => {
            if let Some(detail) = active.members.get_mut(&bot.owner) {
                detail.bots.remove(name);
            }
            state.pending_bot_status.remove(name);
            Ok(())
        }
        None => Err(EventError::UnknownBot(name.to_string())),
    }
}

pub(super) fn update_bot(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let id = required_u32(cmd, 0, "battleID")?;
    let name = required_arg(cmd, 1)?;
    let status_raw = required_i32(cmd, 2, "battleStatus")?;
    let color_raw = required_u32(cmd, 3, "teamColor")?;

    {
        let active = require_active(state, id, cmd)?;
        if !active.bots.contains_key(name) {
            return Err(EventError::UnknownBot(name.to_string()));
        }
    }

    let mode = state.status_mode;
    let incoming = BattleStatus::unmarshall(status_raw, mode);
    let requested = state.pending_bot_status.remove(name);

    let active = active_for(state, id, cmd)?;
    if let Some(bot) = active.bots.get_mut(name) {
        bot.battle_status = if mode == StatusMode::Narrow {
            match requested {
                Some(requested) => reconcile_status(
                    Some(&normalize_requested_status(requested, mode)),
                    incoming,
                ),
                None => reconcile_status(Some(&bot.battle_status), incoming),
            }
        } else {
            incoming
        };
        bot.color = Color::unmarshall(color_raw);
    }
    Ok(())
}

// ============================================================================
// Start Rectangles, Script Tags, Unit Restrictions
// ============================================================================

pub(super) fn add_start_rect(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let ally_raw = required_u32(cmd, 0, "allyNo")?;
    let ally = u8::try_from(ally_raw).map_err(|_| {
        EventError::Protocol(ProtocolError::OutOfRange {
            field: "allyNo",
            value: ally_raw,
        })
    })?;

    let active = active_mut(state, cmd)?;
    let rect = StartRect {
        left: lenient_u32(cmd, 1, "left", notes),
        top: lenient_u32(cmd, 2, "top", notes),
        right: lenient_u32(cmd, 3, "right", notes),
        bottom: lenient_u32(cmd, 4, "bottom", notes),
    };
    active.start_rects.insert(ally, rect);
    Ok(())
}

pub(super) fn remove_start_rect(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let ally_raw = required_u32(cmd, 0, "allyNo")?;
    let ally = u8::try_from(ally_raw).map_err(|_| {
        EventError::Protocol(ProtocolError::OutOfRange {
            field: "allyNo",
            value: ally_raw,
        })
    })?;

    let active = active_mut(state, cmd)?;
    if active.start_rects.remove(&ally).is_none() {
        notes.push(format!("REMOVESTARTRECT: no rectangle for ally {ally}"));
    }
    Ok(())
}

pub(super) fn set_script_tags(
    state: &mut LobbyState,
    cmd: &Command,
    notes: &mut Vec<String>,
) -> EventResult {
    let active = active_mut(state, cmd)?;
    let first = cmd.rest(0);
    for pair in first
        .iter()
        .map(String::as_str)
        .chain(cmd.tails.iter().map(String::as_str))
    {
        match pair.split_once('=') {
            Some((key, value)) => {
                active
                    .script_tags
                    .insert(key.trim().to_lowercase(), value.to_string());
            }
            None if pair.is_empty() => {}
            None => notes.push(format!("SETSCRIPTTAGS: ignoring malformed pair {pair:?}")),
        }
    }
    Ok(())
}

pub(super) fn remove_script_tags(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let active = active_mut(state, cmd)?;
    for key in cmd.args() {
        active.script_tags.remove(&key.to_lowercase());
    }
    Ok(())
}

pub(super) fn disable_units(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let active = active_mut(state, cmd)?;
    for unit in cmd.args() {
        active.disabled_units.insert(unit.clone());
    }
    Ok(())
}

pub(super) fn enable_units(state: &mut LobbyState, cmd: &Command) -> EventResult {
    let active = active_mut(state, cmd)?;
    for unit in cmd.args() {
        active.disabled_units.remove(unit.as_str());
    }
    Ok(())
}

pub(super) fn enable_all_units(state: &mut LobbyState, cmd: &Command) -> EventResult {
    active_mut(state, cmd)?.disabled_units.clear();
    Ok(())
}

// ============================================================================
// Shared Removal Paths
// ============================================================================

/// Retracts one member from a battle: their bots first (the server never
/// sends REMOVEBOT for a leaver's bots), then the member detail, the battle
/// member list and the user's back-reference.
pub(super) fn purge_member(state: &mut LobbyState, battle_id: u32, name: &str) {
    let mut orphaned = Vec::new();
    if let Some(active) = state.active_battle.as_mut() {
        if active.id == battle_id {
            orphaned = active
                .bot_names
                .iter()
                .filter(|bot| {
                    active
                        .bots
                        .get(bot.as_str())
                        .is_some_and(|b| b.owner == name)
                })
                .cloned()
                .collect();
            for bot in &orphaned {
                active.remove_bot(bot);
            }
            active.members.remove(name);
        }
    }
    for bot in &orphaned {
        state.pending_bot_status.remove(bot);
    }
    if let Some(battle) = state.battles.get_mut(&battle_id) {
        battle.members.retain(|member| member != name);
    }
    if let Some(user) = state.users.get_mut(name) {
        user.battle_id = None;
    }
}

/// Closes a battle: clears every member's back-reference, drops the
/// joined-battle detail when it was ours, and removes the battle.
pub(super) fn purge_battle(state: &mut LobbyState, battle_id: u32) {
    if let Some(battle) = state.battles.remove(&battle_id) {
        for member in &battle.members {
            if let Some(user) = state.users.get_mut(member) {
                user.battle_id = None;
            }
        }
    }
    if state
        .active_battle
        .as_ref()
        .is_some_and(|active| active.id == battle_id)
    {
        state.active_battle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(state: &mut LobbyState, line: &str) -> EventResult {
        let cmd = tas_proto::unmarshall(line).expect("Should parse");
        crate::handlers::dispatch(state, &cmd, &mut Vec::new()).expect("Should have a handler")
    }

    /// Logged-in state with two users and one open battle hosted by Host.
    fn lobby_with_battle() -> LobbyState {
        let mut state = LobbyState::default();
        apply(&mut state, "ACCEPTED Self").expect("Should apply");
        apply(&mut state, "ADDUSER Host SE 10").expect("Should apply");
        apply(&mut state, "ADDUSER Self DE 11").expect("Should apply");
        apply(
            &mut state,
            "BATTLEOPENED 31 0 0 Host 192.168.1.10 8452 16 1 0 -1518495277 spring\t105.1.1\tQuicksilver Remake 1.24\tTeam fun\tBeyond All Reason",
        )
        .expect("Should apply");
        state
    }

    /// State where Self has joined battle 31 alongside Host.
    fn joined_battle_state() -> LobbyState {
        let mut state = lobby_with_battle();
        apply(&mut state, "JOINBATTLE 31 0").expect("Should apply");
        apply(&mut state, "JOINEDBATTLE 31 Self").expect("Should apply");
        state
    }

    // ========== battle list tests ==========

    #[test]
    fn battle_opened_parses_the_full_layout() {
        let state = lobby_with_battle();
        let battle = state.battle(31).expect("Should exist");
        assert_eq!(battle.founder, "Host");
        assert_eq!(battle.ip, "192.168.1.10");
        assert_eq!(battle.port, 8452);
        assert_eq!(battle.max_players, 16);
        assert!(battle.passworded);
        assert_eq!(battle.map_hash, -1_518_495_277);
        assert_eq!(battle.engine_name, "spring");
        assert_eq!(battle.engine_version, "105.1.1");
        assert_eq!(battle.map_name, "Quicksilver Remake 1.24");
        assert_eq!(battle.title, "Team fun");
        assert_eq!(battle.game_name, "Beyond All Reason");
        assert_eq!(battle.members, vec!["Host".to_string()]);
        assert_eq!(state.user("Host").and_then(|u| u.battle_id), Some(31));
    }

    #[test]
    fn join_flow_seeds_member_detail() {
        let mut state = lobby_with_battle();
        state.note_script_password("sekrit".to_string());
        apply(&mut state, "JOINBATTLE 31 0").expect("Should apply");
        apply(&mut state, "JOINEDBATTLE 31 Self").expect("Should apply");

        let active = state.active_battle().expect("Should exist");
        assert_eq!(active.id, 31);
        assert!(active.members.contains_key("Host"));
        assert_eq!(
            active.members["Self"].script_password.as_deref(),
            Some("sekrit")
        );
        assert_eq!(state.battle(31).map(|b| b.members.len()), Some(2));
        assert_eq!(state.user("Self").and_then(|u| u.battle_id), Some(31));
    }

    #[test]
    fn join_battle_failed_forgets_the_password() {
        let mut state = lobby_with_battle();
        state.note_script_password("sekrit".to_string());
        apply(&mut state, "JOINBATTLEFAILED Banned from host").expect("Should apply");
        assert!(state.pending_script_password.is_none());
    }

    #[test]
    fn self_leave_drops_joined_detail() {
        let mut state = joined_battle_state();
        apply(&mut state, "LEFTBATTLE 31 Self").expect("Should apply");
        assert!(state.active_battle().is_none());
        assert_eq!(state.battle(31).map(|b| b.members.len()), Some(1));
        assert_eq!(state.user("Self").and_then(|u| u.battle_id), None);
    }

    #[test]
    fn battle_closed_clears_members() {
        let mut state = joined_battle_state();
        apply(&mut state, "BATTLECLOSED 31").expect("Should apply");
        assert!(state.battle(31).is_none());
        assert!(state.active_battle().is_none());
        assert_eq!(state.user("Host").and_then(|u| u.battle_id), None);
    }

    #[test]
    fn update_battle_info_refreshes_metadata() {
        let mut state = lobby_with_battle();
        apply(&mut state, "UPDATEBATTLEINFO 31 3 1 77 Comet Catcher Redux").expect("Should apply");
        let battle = state.battle(31).expect("Should exist");
        assert_eq!(battle.spectator_count, 3);
        assert!(battle.locked);
        assert_eq!(battle.map_hash, 77);
        assert_eq!(battle.map_name, "Comet Catcher Redux");
    }

    // ========== healing tests ==========

    #[test]
    fn remove_user_heals_battle_and_channel_membership() {
        let mut state = joined_battle_state();
        apply(&mut state, "JOIN main").expect("Should apply");
        apply(&mut state, "JOINED main Host").expect("Should apply");

        let err = apply(&mut state, "REMOVEUSER Host").expect_err("Should report healing");
        assert!(matches!(err, EventError::Healed(_)));

        // The removal itself completed, and the founder's battle closed.
        assert!(state.user("Host").is_none());
        assert!(state.battle(31).is_none());
        assert!(state.active_battle().is_none());
        assert!(!state
            .channel("main")
            .expect("Should exist")
            .members
            .contains("Host"));
        assert_eq!(state.user("Self").and_then(|u| u.battle_id), None);
    }

    #[test]
    fn leaver_bots_are_removed_silently() {
        let mut state = joined_battle_state();
        apply(&mut state, "ADDBOT 31 Bitey Self 4194306 255 KAIK|0.13").expect("Should apply");
        apply(&mut state, "LEFTBATTLE 31 Self").expect("Should apply");
        assert!(state.active_battle().is_none());

        // Same cleanup when another member with bots leaves.
        let mut state = joined_battle_state();
        apply(&mut state, "ADDBOT 31 Chomper Host 2 255 KAIK|0.13").expect("Should apply");
        apply(&mut state, "LEFTBATTLE 31 Host").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert!(active.bots.is_empty());
        assert!(active.bot_names.is_empty());
    }

    // ========== member detail tests ==========

    #[test]
    fn client_battle_status_keeps_congruent_shadow() {
        let mut state = joined_battle_state();
        let wide = BattleStatus {
            id: 19,
            team: 20,
            mode: true,
            ..BattleStatus::default()
        };
        state.note_requested_self_status(wide, Color::default());

        // Echo carries only the narrow bits (id 3, team 4).
        let narrow_echo = BattleStatus {
            id: 3,
            team: 4,
            mode: true,
            ..BattleStatus::default()
        }
        .marshall(StatusMode::Narrow)
        .expect("Should marshall");
        apply(
            &mut state,
            &format!("CLIENTBATTLESTATUS Self {narrow_echo} 255"),
        )
        .expect("Should apply");

        let active = state.active_battle().expect("Should exist");
        let status = active.members["Self"].battle_status.expect("Should be set");
        assert_eq!(status.effective_id(), 19);
        assert_eq!(status.effective_team(), 20);

        // A divergent narrow update drops the shadows.
        let moved = BattleStatus {
            id: 5,
            team: 4,
            mode: true,
            ..BattleStatus::default()
        }
        .marshall(StatusMode::Narrow)
        .expect("Should marshall");
        apply(&mut state, &format!("CLIENTBATTLESTATUS Self {moved} 255")).expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        let status = active.members["Self"].battle_status.expect("Should be set");
        assert_eq!(status.effective_id(), 5);
        assert_eq!(status.effective_team(), 4);
    }

    #[test]
    fn client_ip_port_updates_member_and_user() {
        let mut state = joined_battle_state();
        apply(&mut state, "CLIENTIPPORT Host 10.0.0.7 53200").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert_eq!(
            active.members["Host"].ip.map(|ip| ip.to_string()),
            Some("10.0.0.7".to_string())
        );
        assert_eq!(active.members["Host"].port, Some(53200));
        assert_eq!(state.user("Host").and_then(|u| u.port), Some(53200));
    }

    #[test]
    fn host_port_targets_the_founder() {
        let mut state = joined_battle_state();
        apply(&mut state, "HOSTPORT 53247").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert_eq!(active.members["Host"].port, Some(53247));
    }

    // ========== bot tests ==========

    #[test]
    fn add_bot_reconciles_pending_wide_request() {
        let mut state = joined_battle_state();
        let requested = BattleStatus {
            id: 19,
            mode: true,
            ..BattleStatus::default()
        };
        state.note_requested_bot_status("Bitey", requested);

        let echoed = BattleStatus {
            id: 3,
            mode: true,
            ..BattleStatus::default()
        }
        .marshall(StatusMode::Narrow)
        .expect("Should marshall");
        apply(
            &mut state,
            &format!("ADDBOT 31 Bitey Self {echoed} 16711680 KAIK|0.13"),
        )
        .expect("Should apply");

        let active = state.active_battle().expect("Should exist");
        let bot = &active.bots["Bitey"];
        assert_eq!(bot.owner, "Self");
        assert_eq!(bot.ai_label, "KAIK|0.13");
        assert_eq!(bot.battle_status.effective_id(), 19);
        assert_eq!(active.bot_names, vec!["Bitey".to_string()]);
        assert!(active.members["Self"].bots.contains("Bitey"));
        assert!(state.pending_bot_status.is_empty());
    }

    #[test]
    fn remove_bot_clears_owner_reference() {
        let mut state = joined_battle_state();
        apply(&mut state, "ADDBOT 31 Bitey Self 2 255 KAIK|0.13").expect("Should apply");
        apply(&mut state, "REMOVEBOT 31 Bitey").expect("Should apply");

        let active = state.active_battle().expect("Should exist");
        assert!(active.bots.is_empty());
        assert!(!active.members["Self"].bots.contains("Bitey"));

        let mut state = joined_battle_state();
        let err = apply(&mut state, "REMOVEBOT 31 Nobody").expect_err("Should reject");
        assert_eq!(err, EventError::UnknownBot("Nobody".to_string()));
    }

    #[test]
    fn update_bot_carries_shadow_forward() {
        let mut state = joined_battle_state();
        state.note_requested_bot_status(
            "Bitey",
            BattleStatus {
                id: 19,
                mode: true,
                ..BattleStatus::default()
            },
        );
        apply(&mut state, "ADDBOT 31 Bitey Self 14 255 KAIK|0.13").expect("Should apply");

        // Congruent narrow update (id still 3 mod 16) keeps the wide id.
        apply(&mut state, "UPDATEBOT 31 Bitey 14 128").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert_eq!(active.bots["Bitey"].battle_status.effective_id(), 19);
        assert_eq!(active.bots["Bitey"].color.red, 128);
    }

    // ========== battlefield furniture tests ==========

    #[test]
    fn start_rects_follow_add_and_remove() {
        let mut state = joined_battle_state();
        apply(&mut state, "ADDSTARTRECT 1 0 0 100 200").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert_eq!(
            active.start_rects.get(&1),
            Some(&StartRect {
                left: 0,
                top: 0,
                right: 100,
                bottom: 200
            })
        );

        apply(&mut state, "REMOVESTARTRECT 1").expect("Should apply");
        assert!(state
            .active_battle()
            .expect("Should exist")
            .start_rects
            .is_empty());
    }

    #[test]
    fn script_tags_lowercase_keys() {
        let mut state = joined_battle_state();
        apply(
            &mut state,
            "SETSCRIPTTAGS GAME/StartPosType=2\tgame/ModOptions/deathmode=com",
        )
        .expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert_eq!(
            active.script_tags.get("game/startpostype").map(String::as_str),
            Some("2")
        );
        assert_eq!(
            active
                .script_tags
                .get("game/modoptions/deathmode")
                .map(String::as_str),
            Some("com")
        );

        apply(&mut state, "REMOVESCRIPTTAGS GAME/STARTPOSTYPE").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert!(!active.script_tags.contains_key("game/startpostype"));
    }

    #[test]
    fn unit_restrictions_accumulate_and_clear() {
        let mut state = joined_battle_state();
        apply(&mut state, "DISABLEUNITS armcom corcom").expect("Should apply");
        apply(&mut state, "ENABLEUNITS armcom").expect("Should apply");
        let active = state.active_battle().expect("Should exist");
        assert!(active.disabled_units.contains("corcom"));
        assert!(!active.disabled_units.contains("armcom"));

        apply(&mut state, "ENABLEALLUNITS").expect("Should apply");
        assert!(state
            .active_battle()
            .expect("Should exist")
            .disabled_units
            .is_empty());
    }

    #[test]
    fn battle_commands_require_context() {
        let mut state = LobbyState::default();
        let err = apply(&mut state, "CLIENTBATTLESTATUS Someone 0 0").expect_err("Should reject");
        assert_eq!(
            err,
            EventError::NotInBattle("CLIENTBATTLESTATUS".to_string())
        );

        let err = apply(&mut state, "ADDSTARTRECT 1 0 0 10 10").expect_err("Should reject");
        assert_eq!(err, EventError::NotInBattle("ADDSTARTRECT".to_string()));
    }
}
