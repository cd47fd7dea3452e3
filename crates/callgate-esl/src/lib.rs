//! # Callgate ESL
//!
//! Client side of the switch's event socket, shaped for call control:
//!
//! - **protocol** - frame decoder and command encoding
//! - **connection** - one authenticated socket with a reader task
//! - **link** - the shared, reconnect-on-demand [`ControlLink`]
//! - **executor** - `api` commands with per-command timeouts
//! - **event** - typed channel events and hangup metadata
//! - **commands** - argument builders for the commands the gateway issues
//!
//! ## Example
//! ```rust,ignore
//! use callgate_esl::{ControlLink, EslConfig, SwitchControl};
//!
//! let link = ControlLink::new(EslConfig::from_env()?);
//! let version = link.ping().await?;
//! let mut events = link.subscribe();
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod errors;
pub mod event;
pub mod executor;
pub mod link;
pub mod protocol;

pub use commands::ChannelVars;
pub use config::EslConfig;
pub use connection::EslConnection;
pub use errors::{EslError, Result};
pub use event::{ChannelEvent, EventName, HangupMeta, LinkEvent};
pub use executor::{execute, CommandTimeouts};
pub use link::{ControlLink, SwitchControl};

/// Default event socket port
pub const DEFAULT_ESL_PORT: u16 = 8021;
