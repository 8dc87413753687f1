//! # tas-proto
//!
//! Marshalling for the TAS lobby protocol: the line-oriented command grammar
//! (space-separated words plus TAB-separated trailing sentences), the packed
//! client/battle status bitfields, packed team colors, and the legacy login
//! password digest.
//!
//! This crate is deliberately I/O-free. It turns wire text into structured
//! values and back; framing, state and dispatch live in the engine crate that
//! consumes it.
//!
//! ## Quick start
//!
//! ```rust
//! use tas_proto::{marshall, unmarshall, Command};
//!
//! let cmd = Command::new("SAYPRIVATE").word("Bitey").sentence("hello there");
//! assert_eq!(marshall(&cmd).unwrap(), "SAYPRIVATE Bitey hello there");
//!
//! let parsed = unmarshall("JOINEDBATTLE 17 Fleet").unwrap();
//! assert_eq!(parsed.name(), "JOINEDBATTLE");
//! assert_eq!(parsed.arg(0), Some("17"));
//! assert_eq!(parsed.arg(1), Some("Fleet"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod hash;
pub mod status;

pub use self::command::{marshall, unmarshall, Command};
pub use self::error::{ProtocolError, Result};
pub use self::hash::hash_password;
pub use self::status::{BattleStatus, ClientStatus, Color, StatusMode};
