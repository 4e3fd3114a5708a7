//! Protocol constants, preferences and the validation series applied at
//! handshake and control-message boundaries.

use std::time::Duration;

use buxtehude_frame::{Envelope, MessageFormat, DEFAULT_MAX_MSG_LENGTH};
use buxtehude_validate::{Check, Predicate};
use serde_json::json;

/// Reserved destination token: every connected team.
pub const MSG_ALL: &str = "$$all";
/// Reserved type: availability control message.
pub const MSG_AVAILABLE: &str = "$$available";
/// Reserved type: a peer departed, or the farewell to a departing peer.
pub const MSG_DISCONNECT: &str = "$$disconnect";
/// Reserved type: server-originated error text.
pub const MSG_ERROR: &str = "$$error";
/// Reserved type: the first envelope in both directions of a connection.
pub const MSG_HANDSHAKE: &str = "$$handshake";
/// Reserved type, held for future control messages.
pub const MSG_INFO: &str = "$$info";
/// Reserved destination token: the broker itself.
pub const MSG_SERVER: &str = "$$server";
/// Reserved type, held for future control messages.
pub const MSG_SUBSCRIBE: &str = "$$subscribe";
/// Reserved destination token: the receiving peer.
pub const MSG_YOU: &str = "$$you";

/// Placeholder teamname of a connection that has not handshaken.
pub const TEAM_UNAUTHORISED: &str = "$$unauthorised";

pub const CURRENT_VERSION: u32 = 0;
pub const MINIMUM_COMPATIBLE_VERSION: u32 = 0;

/// Default TCP port of the broker.
pub const DEFAULT_PORT: u16 = 1637;
/// Default filesystem path of the local byte-stream socket.
pub const DEFAULT_UNIX_PATH: &str = "buxtehude_unix";
/// A connection must complete its handshake within this window.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// A client endpoint's negotiable settings.
#[derive(Debug, Clone)]
pub struct ClientPreferences {
    /// Team joined at handshake.
    pub teamname: String,
    /// Preferred payload encoding.
    pub format: MessageFormat,
    /// Largest message payload this endpoint will accept.
    pub max_msg_length: u32,
}

impl Default for ClientPreferences {
    fn default() -> Self {
        Self {
            teamname: TEAM_UNAUTHORISED.to_string(),
            format: MessageFormat::MsgPack,
            max_msg_length: DEFAULT_MAX_MSG_LENGTH,
        }
    }
}

impl ClientPreferences {
    /// Preferences for a named team, defaults otherwise.
    pub fn team(teamname: impl Into<String>) -> Self {
        Self {
            teamname: teamname.into(),
            ..Self::default()
        }
    }
}

/// The handshake envelope a broker sends on accept.
pub fn server_handshake() -> Envelope {
    Envelope {
        msg_type: MSG_HANDSHAKE.into(),
        content: json!({ "version": CURRENT_VERSION }),
        ..Envelope::default()
    }
}

/// The handshake envelope a client sends on connect.
pub fn client_handshake(preferences: &ClientPreferences) -> Envelope {
    Envelope {
        msg_type: MSG_HANDSHAKE.into(),
        content: json!({
            "format": preferences.format,
            "teamname": preferences.teamname,
            "version": CURRENT_VERSION,
            "max-message-length": preferences.max_msg_length,
        }),
        ..Envelope::default()
    }
}

/// Checks a broker applies to an inbound handshake's content.
pub fn handshake_serverside_checks() -> Vec<Check> {
    vec![
        Check::new("/teamname", Predicate::NotEmpty),
        Check::new("/format", Predicate::Matches(vec![json!(0), json!(1)])),
        Check::new("/max-message-length", Predicate::IsNumber),
        version_check(),
    ]
}

/// Checks a client applies to the broker's handshake content.
pub fn handshake_clientside_checks() -> Vec<Check> {
    vec![version_check()]
}

/// Checks applied to a `$$available` control message's content.
pub fn available_checks() -> Vec<Check> {
    vec![
        Check::new("/type", Predicate::NotEmpty),
        Check::new("/available", Predicate::IsBool),
    ]
}

/// Checks applied to server-originated error content.
pub fn server_message_checks() -> Vec<Check> {
    vec![Check::new("", Predicate::NotEmpty)]
}

fn version_check() -> Check {
    Check::new(
        "/version",
        Predicate::GreaterEq(MINIMUM_COMPATIBLE_VERSION as i64),
    )
}
