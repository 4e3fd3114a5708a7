use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use buxtehude_frame::{
    arm_message_pipeline, finish_message, write_envelope, Envelope, ReadError, Stream,
    StreamStatus, WriteError,
};
use buxtehude_transport::{tcp, BuxStream, LocalSocket, Reactor, ReactorEvent};
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::error::ConnectError;
use crate::init;
use crate::proto::{
    self, ClientPreferences, DEFAULT_HANDSHAKE_TIMEOUT, MSG_AVAILABLE, MSG_ERROR, MSG_HANDSHAKE,
};
use crate::server::{Server, ServerShared};

/// A per-type message callback.
pub type Handler = Box<dyn FnMut(&Client, &Envelope) + Send>;

struct InflightHandler {
    name: String,
    erased: bool,
}

#[derive(Default)]
struct HandlerTable {
    map: HashMap<String, Handler>,
    // Handlers are taken out of the map while they run so they can
    // mutate the table themselves; the stack records erasures that
    // target an in-flight handler.
    inflight: Vec<InflightHandler>,
}

enum Connection {
    Disconnected,
    Socket {
        writer: BuxStream,
        reactor: Arc<Reactor>,
    },
    Internal {
        server: Weak<ServerShared>,
        token: u64,
    },
}

pub(crate) struct ClientShared {
    pub(crate) preferences: ClientPreferences,
    conn: Mutex<Connection>,
    handlers: Mutex<HandlerTable>,
    connected: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
    reader_thread: Mutex<Option<ThreadId>>,
}

impl ClientShared {
    /// Dispatch an inbound envelope into the handler map.
    ///
    /// Called by the socket reader thread, or directly by the broker for
    /// in-process clients. Nothing is dispatched after disconnect.
    pub(crate) fn deliver(self: &Arc<Self>, envelope: Envelope) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        if envelope.msg_type.is_empty() {
            warn!("received message with no type");
            return;
        }

        let taken = {
            let mut table = self.handlers.lock().unwrap();
            match table.map.remove(&envelope.msg_type) {
                Some(handler) => {
                    table.inflight.push(InflightHandler {
                        name: envelope.msg_type.clone(),
                        erased: false,
                    });
                    Some(handler)
                }
                None => None,
            }
        };
        let Some(mut handler) = taken else {
            warn!(msg_type = %envelope.msg_type, "no handler registered for message type");
            return;
        };

        let client = Client {
            shared: Arc::clone(self),
            owned: false,
        };
        handler(&client, &envelope);

        let mut table = self.handlers.lock().unwrap();
        let erased = table.inflight.pop().is_some_and(|f| f.erased);
        if !erased {
            table.map.entry(envelope.msg_type).or_insert(handler);
        }
    }

    /// The broker closed our in-process attachment.
    pub(crate) fn peer_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.conn.lock().unwrap() = Connection::Disconnected;
    }
}

/// A user-facing broker client.
///
/// Connects over one of three transports, joins a team and dispatches
/// inbound envelopes to registered handlers. Socket transports run a
/// dedicated reader thread; dropping the client disconnects it.
pub struct Client {
    shared: Arc<ClientShared>,
    owned: bool,
}

impl Client {
    pub fn new(preferences: ClientPreferences) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                preferences,
                conn: Mutex::new(Connection::Disconnected),
                handlers: Mutex::new(HandlerTable::default()),
                connected: AtomicBool::new(false),
                reader: Mutex::new(None),
                reader_thread: Mutex::new(None),
            }),
            owned: true,
        }
    }

    pub fn preferences(&self) -> &ClientPreferences {
        &self.shared.preferences
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Connect over a Unix domain socket.
    pub fn connect_local(&self, path: impl AsRef<Path>) -> Result<(), ConnectError> {
        init::initialise();
        if self.is_connected() {
            return Err(ConnectError::AlreadyConnected);
        }
        let path = path.as_ref();
        let stream = LocalSocket::connect(path).map_err(ConnectError::from_transport)?;
        self.finish_socket_connect(stream, path.display().to_string())
    }

    /// Connect over TCP to `host:port`.
    pub fn connect_tcp(&self, host: &str, port: u16) -> Result<(), ConnectError> {
        init::initialise();
        if self.is_connected() {
            return Err(ConnectError::AlreadyConnected);
        }
        let stream = tcp::connect(host, port).map_err(ConnectError::from_transport)?;
        self.finish_socket_connect(stream, format!("{host}:{port}"))
    }

    /// Attach directly to a co-resident broker. No bytes are produced;
    /// envelopes cross by direct call plus a wakeup queue.
    pub fn connect_internal(&self, server: &Server) -> Result<(), ConnectError> {
        init::initialise();
        let server_shared = server.shared_handle();
        self.prime_default_handlers();

        let token;
        {
            let mut conn = self.shared.conn.lock().unwrap();
            if !matches!(*conn, Connection::Disconnected) {
                return Err(ConnectError::AlreadyConnected);
            }
            if !server_shared.ready_for_internal() {
                return Err(ConnectError::Connect {
                    endpoint: "internal".into(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "broker is not listening for in-process clients",
                    ),
                });
            }
            token = server_shared.allocate_token();
            *conn = Connection::Internal {
                server: Arc::downgrade(server_shared),
                token,
            };
            self.shared.connected.store(true, Ordering::SeqCst);
        }

        // The broker's handshake arrives synchronously through deliver.
        server_shared.internal_attach(Arc::clone(&self.shared), token);

        if self
            .write(&proto::client_handshake(&self.shared.preferences))
            .is_err()
        {
            self.disconnect();
            return Err(ConnectError::HandshakeWrite);
        }
        debug!(team = %self.shared.preferences.teamname, "attached in-process client");
        Ok(())
    }

    fn finish_socket_connect(
        &self,
        stream: BuxStream,
        endpoint: String,
    ) -> Result<(), ConnectError> {
        stream.set_nonblocking(true).map_err(|e| ConnectError::Connect {
            endpoint: endpoint.clone(),
            source: e.into_io(),
        })?;
        let reader_stream = stream.try_clone().map_err(|e| ConnectError::Connect {
            endpoint: endpoint.clone(),
            source: e.into_io(),
        })?;
        let reactor = Arc::new(Reactor::new().map_err(ConnectError::ReactorInit)?);

        self.prime_default_handlers();

        let mut conn = self.shared.conn.lock().unwrap();
        if !matches!(*conn, Connection::Disconnected) {
            return Err(ConnectError::AlreadyConnected);
        }

        let mut writer = stream;
        if write_envelope(
            &mut writer,
            &proto::client_handshake(&self.shared.preferences),
            self.shared.preferences.format,
        )
        .is_err()
        {
            return Err(ConnectError::HandshakeWrite);
        }

        let fd = reader_stream.as_raw_fd();
        reactor.watch(fd, Some(DEFAULT_HANDSHAKE_TIMEOUT));

        *conn = Connection::Socket {
            writer,
            reactor: Arc::clone(&reactor),
        };
        self.shared.connected.store(true, Ordering::SeqCst);
        drop(conn);

        let mut reader = Stream::new(reader_stream);
        arm_message_pipeline(&mut reader, self.shared.preferences.max_msg_length);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("buxtehude-client".into())
            .spawn(move || reader_loop(shared, reader, reactor));
        match spawned {
            Ok(handle) => {
                *self.shared.reader.lock().unwrap() = Some(handle);
                debug!(%endpoint, "client connected");
                Ok(())
            }
            Err(e) => {
                self.shared.connected.store(false, Ordering::SeqCst);
                *self.shared.conn.lock().unwrap() = Connection::Disconnected;
                Err(ConnectError::ReactorInit(e))
            }
        }
    }

    /// Encode and send an envelope to the broker.
    ///
    /// A socket write failure tears the connection down before the error
    /// is returned.
    pub fn write(&self, envelope: &Envelope) -> Result<(), WriteError> {
        let result = {
            let mut conn = self.shared.conn.lock().unwrap();
            match &mut *conn {
                Connection::Disconnected => return Err(WriteError),
                Connection::Socket { writer, .. } => {
                    write_envelope(writer, envelope, self.shared.preferences.format)
                }
                Connection::Internal { server, token } => {
                    return match server.upgrade() {
                        Some(server) => server.internal_deliver_from(*token, envelope.clone()),
                        None => Err(WriteError),
                    };
                }
            }
        };
        if result.is_err() {
            warn!("failed to write, closing connection");
            self.disconnect();
        }
        result
    }

    /// Announce whether `only_first` routing should prefer this client
    /// for a message type.
    pub fn set_available(&self, msg_type: &str, available: bool) -> Result<(), WriteError> {
        self.write(&Envelope {
            msg_type: MSG_AVAILABLE.into(),
            content: json!({ "type": msg_type, "available": available }),
            ..Envelope::default()
        })
    }

    /// Register a handler for a message type. An existing handler for
    /// the same type is left in place.
    pub fn add_handler(
        &self,
        msg_type: impl Into<String>,
        handler: impl FnMut(&Client, &Envelope) + Send + 'static,
    ) {
        let mut table = self.shared.handlers.lock().unwrap();
        table
            .map
            .entry(msg_type.into())
            .or_insert_with(|| Box::new(handler));
    }

    pub fn erase_handler(&self, msg_type: &str) {
        let mut table = self.shared.handlers.lock().unwrap();
        table.map.remove(msg_type);
        for inflight in &mut table.inflight {
            if inflight.name == msg_type {
                inflight.erased = true;
            }
        }
    }

    pub fn clear_handlers(&self) {
        let mut table = self.shared.handlers.lock().unwrap();
        table.map.clear();
        for inflight in &mut table.inflight {
            inflight.erased = true;
        }
    }

    /// Tear the connection down. Idempotent; safe to call from inside a
    /// handler (the reader join is skipped on the reader's own thread).
    pub fn disconnect(&self) {
        let previous = {
            let mut conn = self.shared.conn.lock().unwrap();
            std::mem::replace(&mut *conn, Connection::Disconnected)
        };
        self.shared.connected.store(false, Ordering::SeqCst);

        match previous {
            Connection::Disconnected => {}
            Connection::Socket { writer, reactor } => {
                debug!("closing client connection");
                reactor.interrupt();
                let _ = writer.shutdown();
            }
            Connection::Internal { server, token } => {
                debug!("detaching in-process client");
                if let Some(server) = server.upgrade() {
                    server.internal_detach(token);
                }
            }
        }

        let on_reader_thread = self
            .shared
            .reader_thread
            .lock()
            .unwrap()
            .is_some_and(|id| id == thread::current().id());
        if !on_reader_thread {
            let handle = self.shared.reader.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }

    fn prime_default_handlers(&self) {
        let mut table = self.shared.handlers.lock().unwrap();
        table
            .map
            .entry(MSG_HANDSHAKE.to_string())
            .or_insert_with(|| {
                Box::new(|client: &Client, envelope: &Envelope| {
                    if !buxtehude_validate::validate(
                        &envelope.content,
                        &proto::handshake_clientside_checks(),
                    ) {
                        warn!("rejected server handshake, disconnecting");
                        client.disconnect();
                        return;
                    }
                    client.erase_handler(MSG_HANDSHAKE);
                })
            });
        table.map.entry(MSG_ERROR.to_string()).or_insert_with(|| {
            Box::new(|_client: &Client, envelope: &Envelope| {
                if !buxtehude_validate::validate(&envelope.content, &proto::server_message_checks())
                {
                    warn!("malformed server error message");
                    return;
                }
                info!(
                    text = envelope.content.as_str().unwrap_or_default(),
                    "error message from server"
                );
            })
        });
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.owned {
            self.disconnect();
        }
    }
}

fn reader_loop(shared: Arc<ClientShared>, mut stream: Stream<BuxStream>, reactor: Arc<Reactor>) {
    *shared.reader_thread.lock().unwrap() = Some(thread::current().id());
    let mut last_error: Option<Instant> = None;

    while shared.connected.load(Ordering::SeqCst) {
        match reactor.wait() {
            Err(err) => {
                warn!(%err, "client reactor failed");
                break;
            }
            Ok(ReactorEvent::Interrupted) => break,
            Ok(ReactorEvent::Notified) => {}
            Ok(ReactorEvent::TimedOut(_)) => trace!("client transport idle"),
            Ok(ReactorEvent::Readable(_)) => {
                let completed = stream.read();

                if let Some(reason) = stream.take_failure() {
                    warn!(%reason, "rejected message header");
                    let replied = last_error
                        .is_some_and(|t| t.elapsed() < Duration::from_secs(1));
                    if !replied {
                        last_error = Some(Instant::now());
                        let client = Client {
                            shared: Arc::clone(&shared),
                            owned: false,
                        };
                        let _ = client.write(&Envelope {
                            msg_type: MSG_ERROR.into(),
                            content: Value::String(reason),
                            ..Envelope::default()
                        });
                    }
                }

                if completed {
                    match finish_message(&mut stream) {
                        Ok(envelope) => shared.deliver(envelope),
                        Err(ReadError::Parse(detail)) => {
                            warn!(%detail, "error parsing message");
                        }
                        Err(_) => {}
                    }
                } else if stream.status() == StreamStatus::Eof {
                    debug!("server closed the connection");
                    let client = Client {
                        shared: Arc::clone(&shared),
                        owned: false,
                    };
                    client.disconnect();
                    break;
                }
            }
        }
    }

    *shared.reader_thread.lock().unwrap() = None;
}
