//! Buxtehude: a small interprocess-communication broker.
//!
//! Clients join named teams; the broker routes each envelope to the team
//! named in its destination, either to every member or to the first
//! available one. Three transports carry the same protocol: Unix domain
//! sockets, TCP, and a zero-copy in-process channel.
//!
//! # Crate Structure
//!
//! - [`transport`] — Byte-stream transports and the per-endpoint reactor
//! - [`frame`] — Envelope model, wire framing and the incremental reader
//! - [`validate`] — Declarative JSON-shape checks at protocol boundaries
//! - [`peer`] — The broker ([`Server`]) and client ([`Client`]) endpoints

/// Re-export transport types.
pub mod transport {
    pub use buxtehude_transport::*;
}

/// Re-export framing types.
pub mod frame {
    pub use buxtehude_frame::*;
}

/// Re-export validation types.
pub mod validate {
    pub use buxtehude_validate::*;
}

/// Re-export endpoint types.
pub mod peer {
    pub use buxtehude_peer::*;
}

pub use buxtehude_frame::{Envelope, MessageFormat};
pub use buxtehude_peer::{initialise, Client, ClientPreferences, Server, ServerConfig};
