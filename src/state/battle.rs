//! Battle-related lobby state.
//!
//! Two levels of detail exist side by side: every open battle on the server
//! is tracked as a [`Battle`] summary, while the single battle the local
//! user has joined carries an [`ActiveBattle`] with per-member status, bots,
//! start rectangles and script tags. When a game launches, the whole thing
//! is frozen into a [`RunningBattle`] snapshot so late lobby updates cannot
//! disturb start-script generation.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tas_proto::{BattleStatus, Color, StatusMode};

use crate::state::user::User;

// ============================================================================
// Battle List
// ============================================================================

/// An open battle as listed by BATTLEOPENED / UPDATEBATTLEINFO.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Battle {
    /// Founder name. Also the first entry of `members`.
    pub founder: String,
    /// Battle type (0 = normal, 1 = replay).
    pub battle_type: u32,
    /// NAT traversal type advertised by the founder.
    pub nat_type: u32,
    /// Host address as sent by the server.
    pub ip: String,
    /// Host port.
    pub port: u16,
    /// Maximum number of players.
    pub max_players: u32,
    /// Whether a password is required to join.
    pub passworded: bool,
    /// Minimum rank required to join.
    pub rank_limit: u32,
    /// Map hash (signed on the wire).
    pub map_hash: i32,
    /// Engine name, e.g. `spring`.
    pub engine_name: String,
    /// Engine version string.
    pub engine_version: String,
    /// Map name.
    pub map_name: String,
    /// Battle title.
    pub title: String,
    /// Game (mod) name.
    pub game_name: String,
    /// Members in join order, founder first.
    pub members: Vec<String>,
    /// Spectator count as reported by UPDATEBATTLEINFO.
    pub spectator_count: u32,
    /// Whether the battle is locked.
    pub locked: bool,
}

/// Per-ally start rectangle, coordinates in 0..=200 map fractions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartRect {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Right edge.
    pub right: u32,
    /// Bottom edge.
    pub bottom: u32,
}

// ============================================================================
// Joined Battle Detail
// ============================================================================

/// Detail tracked for each human member of the joined battle.
#[derive(Debug, Clone, Default)]
pub struct MemberDetail {
    /// Battle status, absent until the first CLIENTBATTLESTATUS.
    pub battle_status: Option<BattleStatus>,
    /// Team color.
    pub color: Color,
    /// In-battle IP from CLIENTIPPORT, if announced.
    pub ip: Option<IpAddr>,
    /// In-battle port from CLIENTIPPORT or HOSTPORT, if announced.
    pub port: Option<u16>,
    /// Script password, known only for the local user.
    pub script_password: Option<String>,
    /// Names of the bots this member owns.
    pub bots: HashSet<String>,
}

/// An AI bot added to the joined battle.
#[derive(Debug, Clone, Default)]
pub struct Bot {
    /// Name of the member who added the bot.
    pub owner: String,
    /// Battle status of the bot.
    pub battle_status: BattleStatus,
    /// Team color of the bot.
    pub color: Color,
    /// Combined `ShortName|Version` AI identifier.
    pub ai_label: String,
}

/// Rich state for the one battle the local user has joined.
#[derive(Debug, Clone, Default)]
pub struct ActiveBattle {
    /// Battle identifier, also a key into the battle list.
    pub id: u32,
    /// Member detail keyed by user name.
    pub members: HashMap<String, MemberDetail>,
    /// Bots keyed by bot name.
    pub bots: HashMap<String, Bot>,
    /// Bot names in add order.
    pub bot_names: Vec<String>,
    /// Units disabled by the host.
    pub disabled_units: HashSet<String>,
    /// Start rectangles keyed by ally team number.
    pub start_rects: HashMap<u8, StartRect>,
    /// Script tags, keys lowercased on receipt.
    pub script_tags: HashMap<String, String>,
}

impl ActiveBattle {
    /// Creates the detail record for a freshly joined battle.
    pub fn new(id: u32) -> Self {
        ActiveBattle {
            id,
            ..ActiveBattle::default()
        }
    }

    /// Removes a bot from both the map and the ordered name list.
    pub(crate) fn remove_bot(&mut self, name: &str) -> Option<Bot> {
        self.bot_names.retain(|n| n != name);
        self.bots.remove(name)
    }
}

// ============================================================================
// Running Battle Snapshot
// ============================================================================

/// Frozen copy of the joined battle taken when the game launches.
///
/// Start-script generation works from this snapshot so that lobby traffic
/// arriving after launch cannot change the script content.
#[derive(Debug, Clone)]
pub struct RunningBattle {
    /// Battle summary at snapshot time.
    pub battle: Battle,
    /// Joined-battle detail at snapshot time.
    pub detail: ActiveBattle,
    /// User records of all members at snapshot time.
    pub users: HashMap<String, User>,
    /// Local user name at snapshot time.
    pub self_name: String,
}

// ============================================================================
// Shadow Reconciliation
// ============================================================================

/// Shapes a locally requested battle status for storage under the given
/// wire width.
///
/// Under the narrow layout, team/id values above the 4-bit range cannot
/// cross the wire; the full value moves into the shadow field and the low
/// bits stay as the wire-visible value.
pub(crate) fn normalize_requested_status(status: BattleStatus, mode: StatusMode) -> BattleStatus {
    if mode == StatusMode::Extended {
        return status;
    }
    let id = status.effective_id();
    let team = status.effective_team();
    let mut out = status;
    out.id = id % 16;
    out.workaround_id = (id >= 16).then_some(id);
    out.team = team % 16;
    out.workaround_team = (team >= 16).then_some(team);
    out
}

/// Merges an incoming narrow-width battle status with previously tracked
/// wide team/id values.
///
/// While a wide value stays congruent with the narrow wire value modulo the
/// narrow field width it is kept as the effective value; once the low bits
/// diverge the wide value is discarded and the wire value wins.
pub(crate) fn reconcile_status(
    previous: Option<&BattleStatus>,
    mut incoming: BattleStatus,
) -> BattleStatus {
    if let Some(previous) = previous {
        if let Some(wide) = previous.workaround_id {
            if wide % 16 == incoming.id % 16 {
                incoming.workaround_id = Some(wide);
            }
        }
        if let Some(wide) = previous.workaround_team {
            if wide % 16 == incoming.team % 16 {
                incoming.workaround_team = Some(wide);
            }
        }
    }
    incoming
}
