//! Client core for two-channel, line-oriented chat servers.
//!
//! The server exposes one port that only broadcasts (the *read* channel) and
//! one port that accepts authenticated messages (the *send* channel). This
//! crate keeps both open, authenticates the send channel with an opaque
//! token, watches for silent connection death and reconnects the whole
//! session when anything goes wrong.
//!
//! Most consumers only need [`client::connect`], which returns a
//! [`client::ClientHandle`] for outgoing messages and a receiver of
//! [`event::Event`]s for the display.

pub mod auth;
pub mod channel;
pub mod client;
pub mod codec;
pub mod connect;
pub mod error;
pub mod event;
pub mod group;
pub mod history;
pub mod reader;
pub mod sender;
pub mod supervisor;
pub mod watchdog;

pub use error::{ConnectionError, CycleError, Error};
