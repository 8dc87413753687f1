//! taslink - a client engine for the TAS lobby protocol.
//!
//! The engine drives one lobby session end to end: TCP connect, line
//! framing, optional in-band TLS upgrade, ordered callback dispatch with
//! request/response correlation, a defensive in-memory model of users,
//! channels and battles, and deterministic start-script generation for the
//! game engine.
//!
//! Wire marshalling lives in the [`tas_proto`] crate; this crate never
//! touches protocol bits directly.
//!
//! ## Typical embedding
//!
//! ```no_run
//! use taslink::{ClientConfig, LobbyClient, ReceiveOutcome};
//! use tas_proto::Command;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = LobbyClient::new(ClientConfig::default());
//! client.connect().await?;
//! client
//!     .send_command(&Command::new("LOGIN").word("Bot").word("..."))
//!     .await?;
//! loop {
//!     match client.receive().await? {
//!         ReceiveOutcome::Disconnected(reason) => {
//!             eprintln!("session over: {reason}");
//!             break;
//!         }
//!         _ => client.check_timeouts().await,
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
pub mod dispatch;
pub mod error;
mod handlers;
pub mod script;
pub mod state;
mod transport;

pub use client::{BatchSummary, LobbyClient, ReceiveOutcome, SessionPhase};
pub use config::ClientConfig;
pub use dispatch::{
    CallbackId, EventCallback, Outbox, Priority, ResponseCallback, TimeoutCallback, TlsCallback,
    DEFAULT_BUCKET, WILDCARD,
};
pub use error::{
    ConfigError, ConnectError, DisconnectReason, EventError, ScriptError, SessionError,
};
pub use script::{StartScript, StartScriptOverlay};
pub use state::{
    ActiveBattle, Battle, Bot, Channel, InconsistencySink, LobbyState, MemberDetail, NoopSink,
    RunningBattle, StartRect, Topic, User,
};
pub use transport::tls::TlsDetails;

pub use tas_proto;
