//! Shared lobby session state.
//!
//! [`LobbyState`] is the single authoritative model of everything the server
//! has told us: users, channels, battles and the battle we joined. It is
//! mutated exclusively by the internal handlers; everything public hands out
//! defensive copies so no caller can observe or disturb a half-applied
//! update.

use std::collections::HashMap;

use tas_proto::{BattleStatus, Color, StatusMode};

use crate::state::battle::{normalize_requested_status, ActiveBattle, Battle, RunningBattle};
use crate::state::channel::Channel;
use crate::state::user::User;

// ============================================================================
// Inconsistency Sink
// ============================================================================

/// Trait for observing repaired or rejected server updates.
///
/// Called during dispatch whenever an internal handler rejects a message or
/// heals the model first (anomalies such as a user quitting while
/// still listed in a battle). Implementations must not call back into the
/// client.
pub trait InconsistencySink: Send + Sync {
    /// Called once per anomaly. `command` is the canonical command name of
    /// the message that exposed it, `detail` a human-readable description.
    fn on_inconsistency(&self, command: &str, detail: &str);
}

/// Sink that discards all reports.
///
/// Used when the embedding application does not care about model anomalies
/// beyond the log.
#[derive(Debug, Default)]
pub struct NoopSink;

impl InconsistencySink for NoopSink {
    fn on_inconsistency(&self, _command: &str, _detail: &str) {}
}

// ============================================================================
// Lobby State
// ============================================================================

/// Authoritative model of the lobby session.
#[derive(Debug, Default)]
pub struct LobbyState {
    /// Online users keyed by name.
    pub(crate) users: HashMap<String, User>,
    /// Channels the local user has joined, keyed by name.
    pub(crate) channels: HashMap<String, Channel>,
    /// Open battles keyed by battle id.
    pub(crate) battles: HashMap<u32, Battle>,
    /// Detail for the one battle the local user occupies.
    pub(crate) active_battle: Option<ActiveBattle>,
    /// Snapshot frozen when the local user went in-game.
    pub(crate) running_battle: Option<RunningBattle>,
    /// Local user name, set once the server accepts the login.
    pub(crate) self_name: Option<String>,
    /// Battle-status wire width negotiated via protocol extensions.
    pub(crate) status_mode: StatusMode,
    /// Raw protocol-extension declarations from the server.
    pub(crate) extensions: HashMap<String, serde_json::Value>,
    /// Script password sent with the last outgoing battle join.
    pub(crate) pending_script_password: Option<String>,
    /// Full-width statuses requested for bots, pending the server echo.
    pub(crate) pending_bot_status: HashMap<String, BattleStatus>,
}

impl LobbyState {
    // ========================================================================
    // Read accessors (defensive copies)
    // ========================================================================

    /// All online users, copied.
    pub fn users(&self) -> HashMap<String, User> {
        self.users.clone()
    }

    /// One user by name, copied.
    pub fn user(&self, name: &str) -> Option<User> {
        self.users.get(name).cloned()
    }

    /// All joined channels, copied.
    pub fn channels(&self) -> HashMap<String, Channel> {
        self.channels.clone()
    }

    /// One joined channel by name, copied.
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).cloned()
    }

    /// All open battles, copied.
    pub fn battles(&self) -> HashMap<u32, Battle> {
        self.battles.clone()
    }

    /// One open battle by id, copied.
    pub fn battle(&self, id: u32) -> Option<Battle> {
        self.battles.get(&id).cloned()
    }

    /// Detail of the battle the local user occupies, copied.
    pub fn active_battle(&self) -> Option<ActiveBattle> {
        self.active_battle.clone()
    }

    /// The frozen in-game snapshot, copied.
    pub fn running_battle(&self) -> Option<RunningBattle> {
        self.running_battle.clone()
    }

    /// Local user name once authenticated.
    pub fn self_name(&self) -> Option<&str> {
        self.self_name.as_deref()
    }

    /// Negotiated battle-status wire width.
    pub fn status_mode(&self) -> StatusMode {
        self.status_mode
    }

    /// All protocol-extension declarations, copied.
    pub fn extensions(&self) -> HashMap<String, serde_json::Value> {
        self.extensions.clone()
    }

    /// One protocol-extension value by key, copied.
    pub fn extension(&self, key: &str) -> Option<serde_json::Value> {
        self.extensions.get(key).cloned()
    }

    // ========================================================================
    // Running-battle snapshot
    // ========================================================================

    /// Deep copy of the joined battle with denormalized user records.
    pub(crate) fn make_snapshot(&self) -> Option<RunningBattle> {
        let detail = self.active_battle.as_ref()?;
        let battle = self.battles.get(&detail.id)?;
        let self_name = self.self_name.clone()?;

        let mut users = HashMap::new();
        for name in battle.members.iter().chain(detail.members.keys()) {
            if let Some(user) = self.users.get(name) {
                users.entry(name.clone()).or_insert_with(|| user.clone());
            }
        }
        Some(RunningBattle {
            battle: battle.clone(),
            detail: detail.clone(),
            users,
            self_name,
        })
    }

    /// Freezes the joined battle into the running-battle slot.
    ///
    /// Returns false when there is no joined battle to freeze. Called
    /// automatically when the local user's status flips to in-game.
    pub fn store_running_battle(&mut self) -> bool {
        match self.make_snapshot() {
            Some(snapshot) => {
                self.running_battle = Some(snapshot);
                true
            }
            None => false,
        }
    }

    /// Drops the running-battle snapshot.
    pub fn clear_running_battle(&mut self) {
        self.running_battle = None;
    }

    // ========================================================================
    // Outgoing-command notes (send hooks)
    // ========================================================================

    /// Remembers the script password sent with an outgoing battle join.
    pub(crate) fn note_script_password(&mut self, password: String) {
        self.pending_script_password = Some(password);
    }

    /// Applies a requested self battle status optimistically.
    ///
    /// The server echo will confirm or correct it; full-width team/id values
    /// that cannot cross a narrow wire are kept as shadow fields.
    pub(crate) fn note_requested_self_status(&mut self, status: BattleStatus, color: Color) {
        let name = match &self.self_name {
            Some(name) => name.clone(),
            None => return,
        };
        if let Some(detail) = self
            .active_battle
            .as_mut()
            .and_then(|battle| battle.members.get_mut(&name))
        {
            detail.battle_status = Some(normalize_requested_status(status, self.status_mode));
            detail.color = color;
        }
    }

    /// Remembers the full-width status requested for a bot until the echo.
    pub(crate) fn note_requested_bot_status(&mut self, bot: &str, status: BattleStatus) {
        self.pending_bot_status.insert(bot.to_string(), status);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Returns the model to its pristine post-construction state.
    pub(crate) fn reset(&mut self) {
        *self = LobbyState::default();
    }
}
