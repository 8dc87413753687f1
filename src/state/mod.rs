//! Lobby state model.
//!
//! Contains the [`LobbyState`] (the session's view of the server) and the
//! entities it is built from.

mod battle;
mod channel;
mod lobby;
mod user;

pub use battle::{ActiveBattle, Battle, Bot, MemberDetail, RunningBattle, StartRect};
pub use channel::{Channel, Topic};
pub use lobby::{InconsistencySink, LobbyState, NoopSink};
pub use user::User;

pub(crate) use battle::{normalize_requested_status, reconcile_status};
