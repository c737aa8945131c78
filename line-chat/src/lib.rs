//! Line-oriented TCP chat server and terminal client.
//!
//! Every newline-terminated line a client sends after its username is relayed
//! to all other connected clients. Each module focuses on a concrete
//! responsibility:
//!
//! - [`connection`] frames lines over a byte stream and owns the per-connection
//!   writer task that other sessions reach through an [`connection::Outbox`].
//! - [`registry`] is the single synchronised owner of membership state:
//!   registration, removal, fan-out and the connected-users listing.
//! - [`session`] runs one accepted connection through its
//!   `AwaitingUsername -> Active -> Terminated` lifecycle.
//! - [`server`] accepts TCP connections and spawns a session for each.
//! - [`client`] connects to a server, printing incoming lines while stdin is
//!   forwarded with the user's name as prefix.
//! - [`event_log`] is the timestamped append-only event file.
//! - [`cli`] parses arguments and prompts for anything left out.

pub mod cli;
pub mod client;
pub mod connection;
pub mod event_log;
pub mod registry;
pub mod server;
pub mod session;
