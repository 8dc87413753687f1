//! Packed status bitfields and team colors.
//!
//! Lobby servers ship per-user state as signed decimal integers whose bits
//! carry several small fields at once. Two layouts exist for battle status:
//! the original *narrow* layout gives player and ally numbers four bits each
//! (0-15), and the *extended* layout grows both to eight bits (0-255) by
//! placing the high nibbles in zones the narrow layout leaves undefined. A
//! narrow reader of an extended value therefore still sees the low nibble,
//! which is why wide numbers are only usable when they stay consistent with
//! their value modulo 16.
//!
//! Wide values and the shadow bookkeeping around them are tracked on
//! [`BattleStatus`] via [`BattleStatus::workaround_id`] and
//! [`BattleStatus::workaround_team`]; the codec itself writes whatever
//! [`BattleStatus::effective_id`] and [`BattleStatus::effective_team`]
//! resolve to, masked to the active layout's width.

use crate::error::{ProtocolError, Result};

/// Which battle-status layout is in force for a session.
///
/// Sessions start [`Narrow`](StatusMode::Narrow) and switch to
/// [`Extended`](StatusMode::Extended) when the server advertises the
/// corresponding protocol extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusMode {
    /// 4-bit player and ally numbers (bits 2-5 and 6-9).
    #[default]
    Narrow,
    /// 8-bit player and ally numbers; high nibbles at bits 18-21 and 28-31.
    Extended,
}

/// Decoded `CLIENTSTATUS` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientStatus {
    /// Bit 0: the user is in a running game.
    pub in_game: bool,
    /// Bit 1: the user is marked away.
    pub away: bool,
    /// Bits 2-4: server-assigned rank, 0-7.
    pub rank: u32,
    /// Bit 5: the user holds moderator access.
    pub moderator: bool,
    /// Bit 6: the account is an automated client.
    pub bot: bool,
}

impl ClientStatus {
    /// Decode a client status integer. Bits outside the defined layout are
    /// ignored.
    pub fn unmarshall(value: u32) -> Self {
        Self {
            in_game: value & 0x1 != 0,
            away: value >> 1 & 0x1 != 0,
            rank: value >> 2 & 0x7,
            moderator: value >> 5 & 0x1 != 0,
            bot: value >> 6 & 0x1 != 0,
        }
    }

    /// Encode into the wire integer. Fails when `rank` exceeds its three
    /// bits.
    pub fn marshall(&self) -> Result<u32> {
        if self.rank > 7 {
            return Err(ProtocolError::OutOfRange {
                field: "rank",
                value: self.rank,
            });
        }
        Ok(u32::from(self.in_game)
            | u32::from(self.away) << 1
            | self.rank << 2
            | u32::from(self.moderator) << 5
            | u32::from(self.bot) << 6)
    }
}

/// Decoded `CLIENTBATTLESTATUS` / `MYBATTLESTATUS` value.
///
/// The wire integer is signed; extended-mode values with a high ally nibble
/// set come out negative in decimal and that is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BattleStatus {
    /// Bit 1: ready to start.
    pub ready: bool,
    /// Player number as read off the wire (4 or 8 bits depending on mode).
    pub id: u32,
    /// Ally team number as read off the wire.
    pub team: u32,
    /// Bit 10: `true` for a player, `false` for a spectator.
    pub mode: bool,
    /// Bits 11-17: resource bonus percentage, 0-127.
    pub bonus: u32,
    /// Bits 22-23: map sync state (0 unknown, 1 synced, 2 unsynced).
    pub sync: u32,
    /// Bits 24-27: faction index, 0-15.
    pub side: u32,
    /// Wide player number remembered from our own sends while the session
    /// is still narrow. Never produced by [`BattleStatus::unmarshall`].
    pub workaround_id: Option<u32>,
    /// Wide ally number, same bookkeeping as `workaround_id`.
    pub workaround_team: Option<u32>,
}

impl BattleStatus {
    /// Decode a battle status integer under the given layout. Shadow fields
    /// come back empty; reconciling them against previous state is the
    /// caller's business.
    pub fn unmarshall(value: i32, mode: StatusMode) -> Self {
        let v = value as u32;
        let mut id = v >> 2 & 0xF;
        let mut team = v >> 6 & 0xF;
        if mode == StatusMode::Extended {
            id |= (v >> 18 & 0xF) << 4;
            team |= (v >> 28 & 0xF) << 4;
        }
        Self {
            ready: v >> 1 & 0x1 != 0,
            id,
            team,
            mode: v >> 10 & 0x1 != 0,
            bonus: v >> 11 & 0x7F,
            sync: v >> 22 & 0x3,
            side: v >> 24 & 0xF,
            workaround_id: None,
            workaround_team: None,
        }
    }

    /// Encode into the wire integer under the given layout.
    ///
    /// Player and ally numbers are taken from [`BattleStatus::effective_id`]
    /// and [`BattleStatus::effective_team`] and masked to the layout's
    /// width, so a wide number encodes as its low nibble on a narrow
    /// session. `side`, `sync` and `bonus` have no such escape hatch and
    /// fail when out of range.
    pub fn marshall(&self, mode: StatusMode) -> Result<i32> {
        if self.side > 15 {
            return Err(ProtocolError::OutOfRange {
                field: "side",
                value: self.side,
            });
        }
        if self.sync > 3 {
            return Err(ProtocolError::OutOfRange {
                field: "sync",
                value: self.sync,
            });
        }
        if self.bonus > 127 {
            return Err(ProtocolError::OutOfRange {
                field: "bonus",
                value: self.bonus,
            });
        }

        let id = self.effective_id();
        let team = self.effective_team();
        let mut v = u32::from(self.ready) << 1
            | (id & 0xF) << 2
            | (team & 0xF) << 6
            | u32::from(self.mode) << 10
            | self.bonus << 11
            | self.sync << 22
            | self.side << 24;
        if mode == StatusMode::Extended {
            v |= (id >> 4 & 0xF) << 18;
            v |= (team >> 4 & 0xF) << 28;
        }
        Ok(v as i32)
    }

    /// The player number this status really means: the wide shadow when one
    /// is tracked, the wire value otherwise.
    pub fn effective_id(&self) -> u32 {
        self.workaround_id.unwrap_or(self.id)
    }

    /// The ally number this status really means.
    pub fn effective_team(&self) -> u32 {
        self.workaround_team.unwrap_or(self.team)
    }

    /// Set a wide player number, keeping the wire field at its low nibble so
    /// the value stays consistent with what a narrow server echoes back.
    #[must_use]
    pub fn with_wide_id(mut self, id: u32) -> Self {
        self.workaround_id = Some(id);
        self.id = id & 0xF;
        self
    }

    /// Set a wide ally number, same contract as
    /// [`BattleStatus::with_wide_id`].
    #[must_use]
    pub fn with_wide_team(mut self, team: u32) -> Self {
        self.workaround_team = Some(team);
        self.team = team & 0xF;
        self
    }
}

/// A team color, packed on the wire as `0x00BBGGRR` in signed decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    /// Red channel.
    pub red: u8,
    /// Green channel.
    pub green: u8,
    /// Blue channel.
    pub blue: u8,
}

impl Color {
    /// Decode a packed color integer.
    pub fn unmarshall(value: u32) -> Self {
        Self {
            red: (value & 0xFF) as u8,
            green: (value >> 8 & 0xFF) as u8,
            blue: (value >> 16 & 0xFF) as u8,
        }
    }

    /// Encode into the packed integer.
    pub fn marshall(&self) -> u32 {
        u32::from(self.red) | u32::from(self.green) << 8 | u32::from(self.blue) << 16
    }
}
