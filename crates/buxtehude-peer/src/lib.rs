//! Broker and client endpoints for the buxtehude IPC protocol.
//!
//! A broker ([`Server`]) routes envelopes between named teams over three
//! transports: Unix domain sockets, TCP, and a zero-copy in-process
//! channel. A [`Client`] joins a team, registers per-type handlers and
//! exchanges envelopes through the broker.

pub mod client;
pub mod error;
mod handle;
pub mod init;
pub mod proto;
pub mod server;

pub use client::Client;
pub use error::{ConnectError, ListenError};
pub use init::{initialise, initialise_with};
pub use proto::{
    ClientPreferences, CURRENT_VERSION, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_PORT,
    DEFAULT_UNIX_PATH, MINIMUM_COMPATIBLE_VERSION, MSG_ALL, MSG_AVAILABLE, MSG_DISCONNECT,
    MSG_ERROR, MSG_HANDSHAKE, MSG_INFO, MSG_SERVER, MSG_SUBSCRIBE, MSG_YOU, TEAM_UNAUTHORISED,
};
pub use server::{ClientInfo, Server, ServerConfig};
