use std::collections::HashSet;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use buxtehude_frame::{
    arm_message_pipeline, finish_message, write_envelope, Envelope, ReadError, Stream,
    StreamStatus, WriteError,
};
use buxtehude_transport::{BuxStream, SocketKind, TransportError};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::ClientShared;
use crate::proto::{self, ClientPreferences, MSG_DISCONNECT, MSG_ERROR, MSG_YOU};

const ERROR_REPLY_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) enum HandleTransport {
    Socket {
        stream: Stream<BuxStream>,
        writer: BuxStream,
        fd: RawFd,
        kind: SocketKind,
    },
    InProcess {
        peer: Weak<ClientShared>,
        token: u64,
    },
}

/// The broker-side record of one connected peer.
///
/// Owns the transport; destroying the handle closes it. All fields are
/// touched only by the broker's reactor thread while the handle lives in
/// the client list.
pub(crate) struct ClientHandle {
    pub(crate) transport: HandleTransport,
    pub(crate) preferences: ClientPreferences,
    pub(crate) unavailable: HashSet<String>,
    last_error: Option<Instant>,
    pub(crate) handshaken: bool,
    pub(crate) connected: bool,
}

impl ClientHandle {
    /// Wrap an accepted socket and prime its message pipeline.
    pub fn from_socket(stream: BuxStream, max_msg_length: u32) -> Result<Self, TransportError> {
        let kind = stream.kind();
        let fd = stream.as_raw_fd();
        let writer = stream.try_clone()?;

        let mut reader = Stream::new(stream);
        arm_message_pipeline(&mut reader, max_msg_length);

        Ok(Self {
            transport: HandleTransport::Socket {
                stream: reader,
                writer,
                fd,
                kind,
            },
            preferences: ClientPreferences::default(),
            unavailable: HashSet::new(),
            last_error: None,
            handshaken: false,
            connected: true,
        })
    }

    /// Attach a co-resident client. No bytes are produced on this path;
    /// writes call straight into the peer's delivery entry point.
    pub fn from_internal(peer: &Arc<ClientShared>, token: u64) -> Self {
        let preferences = ClientPreferences {
            teamname: peer.preferences.teamname.clone(),
            ..ClientPreferences::default()
        };
        Self {
            transport: HandleTransport::InProcess {
                peer: Arc::downgrade(peer),
                token,
            },
            preferences,
            unavailable: HashSet::new(),
            last_error: None,
            handshaken: false,
            connected: true,
        }
    }

    /// Send the broker's handshake envelope.
    pub fn handshake(&mut self) -> Result<(), WriteError> {
        self.write(&proto::server_handshake())
    }

    pub fn write(&mut self, envelope: &Envelope) -> Result<(), WriteError> {
        if !self.connected {
            return Err(WriteError);
        }
        match &mut self.transport {
            HandleTransport::Socket { writer, .. } => {
                write_envelope(writer, envelope, self.preferences.format)
            }
            HandleTransport::InProcess { peer, .. } => match peer.upgrade() {
                Some(peer) => {
                    peer.deliver(envelope.clone());
                    Ok(())
                }
                None => Err(WriteError),
            },
        }
    }

    /// Send a `$$error` envelope, rate-limited to one per second.
    ///
    /// A peer that errors before completing its handshake, or whose
    /// error write fails, is disconnected.
    pub fn error(&mut self, text: &str) {
        if self
            .last_error
            .is_some_and(|t| t.elapsed() < ERROR_REPLY_INTERVAL)
        {
            return;
        }
        self.last_error = Some(Instant::now());

        let sent = self
            .write(&Envelope {
                msg_type: MSG_ERROR.into(),
                content: Value::String(text.into()),
                ..Envelope::default()
            })
            .is_ok();
        if !self.handshaken || !sent {
            self.disconnect("Failed handshake");
        }
    }

    /// Write a farewell to the peer (ignoring failure) and close.
    pub fn disconnect(&mut self, reason: &str) {
        if !self.connected {
            return;
        }
        let _ = self.write(&Envelope {
            msg_type: MSG_DISCONNECT.into(),
            content: json!({ "reason": reason, "who": MSG_YOU }),
            ..Envelope::default()
        });
        self.disconnect_no_write();
    }

    /// Close without attempting another write.
    pub fn disconnect_no_write(&mut self) {
        if !self.connected {
            return;
        }
        match &self.transport {
            HandleTransport::Socket { writer, .. } => {
                let _ = writer.shutdown();
            }
            HandleTransport::InProcess { peer, .. } => {
                if let Some(peer) = peer.upgrade() {
                    peer.peer_disconnected();
                }
            }
        }
        debug!(team = %self.preferences.teamname, "disconnecting client");
        self.connected = false;
    }

    /// Whether `only_first` routing may prefer this peer for a type.
    pub fn available(&self, msg_type: &str) -> bool {
        !self.unavailable.contains(msg_type)
    }

    /// Pump the socket and try to complete one message.
    pub fn read(&mut self) -> Result<Envelope, ReadError> {
        if !self.connected {
            return Err(ReadError::Connection);
        }

        let (completed, failure, eof) = match &mut self.transport {
            HandleTransport::Socket { stream, .. } => {
                let completed = stream.read();
                (
                    completed,
                    stream.take_failure(),
                    stream.status() == StreamStatus::Eof,
                )
            }
            HandleTransport::InProcess { .. } => return Err(ReadError::Connection),
        };

        if let Some(reason) = failure {
            warn!(team = %self.preferences.teamname, %reason, "rejected message header");
            self.error(&reason);
            if !self.connected {
                return Err(ReadError::Connection);
            }
        }

        if !completed {
            if eof {
                self.disconnect("Disconnected by server");
                return Err(ReadError::Connection);
            }
            return Err(ReadError::Incomplete);
        }

        let result = match &mut self.transport {
            HandleTransport::Socket { stream, .. } => finish_message(stream),
            HandleTransport::InProcess { .. } => unreachable!("socket transport checked above"),
        };

        match result {
            Ok(envelope) => Ok(envelope),
            Err(ReadError::Parse(detail)) => {
                let text = format!(
                    "Error parsing message from {}: {detail}",
                    self.preferences.teamname
                );
                warn!("{text}");
                self.error(&text);
                Err(ReadError::Parse(detail))
            }
            Err(other) => Err(other),
        }
    }

    /// A handshaken in-process handle with no live peer, for routing
    /// tests.
    #[cfg(test)]
    pub(crate) fn detached(teamname: &str, token: u64) -> Self {
        Self {
            transport: HandleTransport::InProcess {
                peer: Weak::new(),
                token,
            },
            preferences: ClientPreferences {
                teamname: teamname.to_string(),
                ..ClientPreferences::default()
            },
            unavailable: HashSet::new(),
            last_error: None,
            handshaken: true,
            connected: true,
        }
    }

    pub fn fd(&self) -> Option<RawFd> {
        match &self.transport {
            HandleTransport::Socket { fd, .. } => Some(*fd),
            HandleTransport::InProcess { .. } => None,
        }
    }

    pub fn token(&self) -> Option<u64> {
        match &self.transport {
            HandleTransport::Socket { .. } => None,
            HandleTransport::InProcess { token, .. } => Some(*token),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        match &self.transport {
            HandleTransport::Socket { kind, .. } => kind.name(),
            HandleTransport::InProcess { .. } => "in-process",
        }
    }
}
