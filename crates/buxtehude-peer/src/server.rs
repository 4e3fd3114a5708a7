use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use buxtehude_frame::{Envelope, MessageFormat, WriteError, DEFAULT_MAX_MSG_LENGTH};
use buxtehude_transport::{
    LocalSocket, Reactor, ReactorEvent, SocketKind, TcpServerSocket, TransportError,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::client::ClientShared;
use crate::error::ListenError;
use crate::handle::ClientHandle;
use crate::init;
use crate::proto::{
    self, DEFAULT_HANDSHAKE_TIMEOUT, MSG_ALL, MSG_AVAILABLE, MSG_DISCONNECT, MSG_HANDSHAKE,
};

/// Broker-wide settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest message payload accepted from any peer, propagated to
    /// each accepted connection.
    pub max_msg_length: u32,
    /// Window within which an accepted connection must handshake.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_msg_length: DEFAULT_MAX_MSG_LENGTH,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// A snapshot row from [`Server::get_clients`].
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub teamname: String,
    pub transport: &'static str,
    pub handshaken: bool,
}

#[derive(Default)]
struct ListenerSet {
    local: Option<LocalSocket>,
    tcp: Option<TcpServerSocket>,
}

enum PendingOp {
    Attach(Arc<ClientShared>, u64),
    Detach(u64),
}

pub(crate) struct ServerShared {
    config: ServerConfig,
    reactor: Mutex<Option<Arc<Reactor>>>,
    clients: Mutex<Vec<ClientHandle>>,
    internal_queue: Mutex<Vec<(u64, Envelope)>>,
    pending: Mutex<Vec<PendingOp>>,
    listeners: Mutex<ListenerSet>,
    thread: Mutex<Option<JoinHandle<()>>>,
    reactor_thread: Mutex<Option<ThreadId>>,
    started: AtomicBool,
    next_token: AtomicU64,
}

/// The broker endpoint.
///
/// Listens on any combination of the three transports, gates every
/// connection behind the handshake, and routes envelopes between teams.
/// One background thread runs the reactor; user API calls execute on the
/// caller's thread.
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                reactor: Mutex::new(None),
                clients: Mutex::new(Vec::new()),
                internal_queue: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                listeners: Mutex::new(ListenerSet::default()),
                thread: Mutex::new(None),
                reactor_thread: Mutex::new(None),
                started: AtomicBool::new(false),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn shared_handle(&self) -> &Arc<ServerShared> {
        &self.shared
    }

    /// Listen on a filesystem-path Unix domain socket. Idempotent while
    /// a local listener is active; starts the reactor thread on the
    /// first successful listen.
    pub fn listen_local(&self, path: impl AsRef<Path>) -> Result<(), ListenError> {
        init::initialise();
        let reactor = self.shared.ensure_reactor()?;

        let mut listeners = self.shared.listeners.lock().unwrap();
        if listeners.local.is_some() {
            return Ok(());
        }
        let socket = LocalSocket::bind(path).map_err(ListenError::from_transport)?;
        socket
            .set_nonblocking(true)
            .map_err(ListenError::from_transport)?;
        reactor.watch(socket.as_raw_fd(), None);
        listeners.local = Some(socket);
        drop(listeners);

        self.start();
        Ok(())
    }

    /// Listen on TCP, bound to the any-address. Port 0 picks an
    /// ephemeral port (see [`Server::tcp_port`]). Idempotent while a TCP
    /// listener is active.
    pub fn listen_tcp(&self, port: u16) -> Result<(), ListenError> {
        init::initialise();
        let reactor = self.shared.ensure_reactor()?;

        let mut listeners = self.shared.listeners.lock().unwrap();
        if listeners.tcp.is_some() {
            return Ok(());
        }
        let socket = TcpServerSocket::bind(port).map_err(ListenError::from_transport)?;
        socket
            .set_nonblocking(true)
            .map_err(ListenError::from_transport)?;
        reactor.watch(socket.as_raw_fd(), None);
        listeners.tcp = Some(socket);
        drop(listeners);

        self.start();
        Ok(())
    }

    /// Enable the in-process transport.
    pub fn listen_internal(&self) -> Result<(), ListenError> {
        init::initialise();
        self.shared.ensure_reactor()?;
        self.start();
        Ok(())
    }

    /// The port the TCP listener is bound to, if one is active.
    pub fn tcp_port(&self) -> Option<u16> {
        self.shared
            .listeners
            .lock()
            .unwrap()
            .tcp
            .as_ref()
            .map(TcpServerSocket::port)
    }

    /// Send an envelope to every connected, handshaken client.
    pub fn broadcast(&self, envelope: &Envelope) {
        let mut clients = self.shared.clients.lock().unwrap();
        broadcast_locked(&mut clients, envelope);
    }

    /// A snapshot of connected clients, optionally filtered by team.
    pub fn get_clients(&self, team: Option<&str>) -> Vec<ClientInfo> {
        let clients = self.shared.clients.lock().unwrap();
        clients
            .iter()
            .filter(|handle| handle.connected)
            .filter(|handle| match team {
                None => true,
                Some(MSG_ALL) => true,
                Some(team) => handle.preferences.teamname == team,
            })
            .map(|handle| ClientInfo {
                teamname: handle.preferences.teamname.clone(),
                transport: handle.transport_name(),
                handshaken: handle.handshaken,
            })
            .collect()
    }

    /// Stop the reactor, disconnect every client and release the
    /// listening sockets (unlinking the local socket path). Idempotent.
    pub fn close(&self) {
        debug!("shutting down server");
        self.shared.started.store(false, Ordering::SeqCst);

        if let Some(reactor) = self.shared.reactor() {
            reactor.interrupt();
        }
        if !self.shared.on_reactor_thread() {
            let handle = self.shared.thread.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }

        // Farewells go out without the clients lock held: in-process
        // peers run their handlers on this thread.
        let handles = std::mem::take(&mut *self.shared.clients.lock().unwrap());
        for mut handle in handles {
            handle.disconnect("Shutting down server");
        }

        let mut listeners = self.shared.listeners.lock().unwrap();
        listeners.local = None;
        listeners.tcp = None;
        drop(listeners);

        self.shared.internal_queue.lock().unwrap().clear();
        self.shared.pending.lock().unwrap().clear();
    }

    fn start(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("buxtehude-server".into())
            .spawn(move || run_loop(shared));
        match spawned {
            Ok(handle) => *self.shared.thread.lock().unwrap() = Some(handle),
            Err(err) => {
                warn!(%err, "failed to spawn server thread");
                self.shared.started.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

impl ServerShared {
    fn reactor(&self) -> Option<Arc<Reactor>> {
        self.reactor.lock().unwrap().clone()
    }

    fn ensure_reactor(&self) -> Result<Arc<Reactor>, ListenError> {
        let mut slot = self.reactor.lock().unwrap();
        if let Some(reactor) = slot.as_ref() {
            return Ok(Arc::clone(reactor));
        }
        let reactor = Arc::new(Reactor::new().map_err(ListenError::ReactorInit)?);
        *slot = Some(Arc::clone(&reactor));
        Ok(reactor)
    }

    fn on_reactor_thread(&self) -> bool {
        self.reactor_thread
            .lock()
            .unwrap()
            .is_some_and(|id| id == thread::current().id())
    }

    pub(crate) fn ready_for_internal(&self) -> bool {
        self.started.load(Ordering::SeqCst) && self.reactor.lock().unwrap().is_some()
    }

    pub(crate) fn allocate_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Attach an in-process client. From the reactor thread the attach
    /// is deferred to the queue drain; otherwise it happens here, with
    /// the broker handshake delivered before the handle joins the list.
    pub(crate) fn internal_attach(self: &Arc<Self>, peer: Arc<ClientShared>, token: u64) {
        if self.on_reactor_thread() {
            self.pending
                .lock()
                .unwrap()
                .push(PendingOp::Attach(peer, token));
            if let Some(reactor) = self.reactor() {
                reactor.notify();
            }
            return;
        }

        let mut handle = ClientHandle::from_internal(&peer, token);
        if handle.handshake().is_err() {
            handle.disconnect_no_write();
            return;
        }
        self.clients.lock().unwrap().push(handle);
    }

    /// Detach an in-process client and tell the remaining teams.
    pub(crate) fn internal_detach(&self, token: u64) {
        if self.on_reactor_thread() {
            self.pending.lock().unwrap().push(PendingOp::Detach(token));
            if let Some(reactor) = self.reactor() {
                reactor.notify();
            }
            return;
        }

        let mut clients = self.clients.lock().unwrap();
        detach_locked(&mut clients, token);
    }

    /// Queue an envelope from an in-process client and wake the reactor.
    pub(crate) fn internal_deliver_from(
        &self,
        token: u64,
        envelope: Envelope,
    ) -> Result<(), WriteError> {
        let reactor = match self.reactor() {
            Some(reactor) if self.started.load(Ordering::SeqCst) => reactor,
            _ => return Err(WriteError),
        };
        self.internal_queue.lock().unwrap().push((token, envelope));
        reactor.notify();
        Ok(())
    }
}

fn run_loop(shared: Arc<ServerShared>) {
    *shared.reactor_thread.lock().unwrap() = Some(thread::current().id());
    let reactor = match shared.reactor() {
        Some(reactor) => reactor,
        None => return,
    };

    loop {
        match reactor.wait() {
            Err(err) => {
                warn!(%err, "server reactor failed");
                break;
            }
            Ok(ReactorEvent::Interrupted) => break,
            Ok(ReactorEvent::Notified) => drain_internal(&shared, &reactor),
            Ok(ReactorEvent::TimedOut(fd)) => handle_timeout(&shared, &reactor, fd),
            Ok(ReactorEvent::Readable(fd)) => {
                let listener = {
                    let listeners = shared.listeners.lock().unwrap();
                    if listeners.local.as_ref().map(AsRawFd::as_raw_fd) == Some(fd) {
                        Some(SocketKind::Local)
                    } else if listeners.tcp.as_ref().map(AsRawFd::as_raw_fd) == Some(fd) {
                        Some(SocketKind::Tcp)
                    } else {
                        None
                    }
                };
                match listener {
                    Some(kind) => accept_connection(&shared, &reactor, kind),
                    None => serve_socket(&shared, &reactor, fd),
                }
            }
        }
    }

    *shared.reactor_thread.lock().unwrap() = None;
}

fn accept_connection(shared: &ServerShared, reactor: &Reactor, kind: SocketKind) {
    let accepted = {
        let listeners = shared.listeners.lock().unwrap();
        match kind {
            SocketKind::Local => listeners.local.as_ref().map(LocalSocket::accept),
            SocketKind::Tcp => listeners.tcp.as_ref().map(TcpServerSocket::accept),
        }
    };
    let stream = match accepted {
        None => return,
        Some(Ok(stream)) => stream,
        Some(Err(TransportError::Accept(err)))
            if err.kind() == std::io::ErrorKind::WouldBlock =>
        {
            return;
        }
        Some(Err(err)) => {
            warn!(%err, "accept failed");
            return;
        }
    };

    if let Err(err) = stream.set_nonblocking(true) {
        warn!(%err, "could not configure accepted connection");
        return;
    }
    let handle = match ClientHandle::from_socket(stream, shared.config.max_msg_length) {
        Ok(handle) => handle,
        Err(err) => {
            warn!(%err, "could not wrap accepted connection");
            return;
        }
    };
    let fd = handle.fd();

    let mut clients = shared.clients.lock().unwrap();
    clients.push(handle);
    if let Some(fd) = fd {
        reactor.watch(fd, Some(shared.config.handshake_timeout));
        debug!(fd, transport = kind.name(), "new client connected");
    }

    let idx = clients.len() - 1;
    if clients[idx].handshake().is_err() {
        clients[idx].disconnect_no_write();
    }
    sweep(reactor, &mut clients);
}

fn serve_socket(shared: &ServerShared, reactor: &Reactor, fd: std::os::fd::RawFd) {
    let mut clients = shared.clients.lock().unwrap();
    let Some(idx) = clients.iter().position(|h| h.fd() == Some(fd)) else {
        warn!(fd, "no client with this descriptor");
        reactor.unwatch(fd);
        return;
    };

    if let Ok(envelope) = clients[idx].read() {
        handle_message(&shared.config, &mut clients, idx, envelope);
    }
    sweep(reactor, &mut clients);
}

fn handle_timeout(shared: &ServerShared, reactor: &Reactor, fd: std::os::fd::RawFd) {
    let mut clients = shared.clients.lock().unwrap();
    let Some(idx) = clients.iter().position(|h| h.fd() == Some(fd)) else {
        reactor.unwatch(fd);
        return;
    };
    if !clients[idx].handshaken {
        clients[idx].disconnect("Failed handshake");
    }
    sweep(reactor, &mut clients);
}

fn drain_internal(shared: &ServerShared, reactor: &Reactor) {
    let ops = std::mem::take(&mut *shared.pending.lock().unwrap());
    let messages = std::mem::take(&mut *shared.internal_queue.lock().unwrap());

    // Deferred attaches handshake before joining the list, so the
    // peer's handlers run without the clients lock held.
    let mut attached = Vec::new();
    let mut detached = Vec::new();
    for op in ops {
        match op {
            PendingOp::Attach(peer, token) => {
                let mut handle = ClientHandle::from_internal(&peer, token);
                if handle.handshake().is_err() {
                    handle.disconnect_no_write();
                    continue;
                }
                attached.push(handle);
            }
            PendingOp::Detach(token) => detached.push(token),
        }
    }

    let mut clients = shared.clients.lock().unwrap();
    clients.extend(attached);
    for token in detached {
        detach_locked(&mut clients, token);
    }

    for (token, envelope) in messages {
        let Some(idx) = clients.iter().position(|h| h.token() == Some(token)) else {
            continue;
        };
        handle_message(&shared.config, &mut clients, idx, envelope);
    }
    sweep(reactor, &mut clients);
}

/// Handshake gating, availability control and team routing for one
/// inbound envelope. Runs on the reactor thread with the clients lock
/// held.
fn handle_message(
    config: &ServerConfig,
    clients: &mut Vec<ClientHandle>,
    idx: usize,
    mut envelope: Envelope,
) {
    if !clients[idx].handshaken {
        if envelope.msg_type != MSG_HANDSHAKE
            || !buxtehude_validate::validate(
                &envelope.content,
                &proto::handshake_serverside_checks(),
            )
        {
            clients[idx].disconnect("Failed handshake");
            return;
        }
        let handle = &mut clients[idx];
        let content = &envelope.content;
        handle.preferences.teamname = content["teamname"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        handle.preferences.format = content["format"]
            .as_u64()
            .and_then(|code| MessageFormat::from_code(code as u8))
            .unwrap_or(MessageFormat::MsgPack);
        handle.preferences.max_msg_length = content["max-message-length"]
            .as_u64()
            .map_or(config.max_msg_length, |n| n as u32);
        handle.handshaken = true;
        debug!(team = %handle.preferences.teamname, "client handshake complete");
        return;
    }

    if envelope.msg_type == MSG_AVAILABLE {
        if !buxtehude_validate::validate(&envelope.content, &proto::available_checks()) {
            clients[idx].error("Incorrect format for $$available message");
            return;
        }
        let msg_type = envelope.content["type"].as_str().unwrap_or_default();
        let available = envelope.content["available"].as_bool().unwrap_or(false);
        if available {
            clients[idx].unavailable.remove(msg_type);
        } else {
            clients[idx].unavailable.insert(msg_type.to_string());
        }
        // An availability notice with a destination is also routed.
    }

    if envelope.dest.is_empty() {
        return;
    }

    envelope.src = clients[idx].preferences.teamname.clone();

    if envelope.only_first {
        if let Some(dst) = first_available(clients, &envelope.dest, &envelope.msg_type, idx) {
            if clients[dst].write(&envelope).is_err() {
                clients[dst].disconnect_no_write();
            }
        }
        return;
    }

    for j in 0..clients.len() {
        if j == idx || !clients[j].handshaken {
            continue;
        }
        if clients[j].preferences.teamname == envelope.dest || envelope.dest == MSG_ALL {
            if clients[j].write(&envelope).is_err() {
                clients[j].disconnect_no_write();
            }
        }
    }
}

/// The first client, in connection order, matching the team and
/// available for the type. Falls back to the last matching client when
/// none are available.
fn first_available(
    clients: &[ClientHandle],
    team: &str,
    msg_type: &str,
    exclude: usize,
) -> Option<usize> {
    let mut fallback = None;
    for (j, handle) in clients.iter().enumerate() {
        if j == exclude || !handle.handshaken || !handle.connected {
            continue;
        }
        if handle.preferences.teamname == team || team == MSG_ALL {
            fallback = Some(j);
            if handle.available(msg_type) {
                return fallback;
            }
        }
    }
    fallback
}

fn broadcast_locked(clients: &mut [ClientHandle], envelope: &Envelope) {
    for handle in clients.iter_mut() {
        if !handle.connected || !handle.handshaken {
            continue;
        }
        if handle.write(envelope).is_err() {
            handle.disconnect_no_write();
        }
    }
}

fn detach_locked(clients: &mut Vec<ClientHandle>, token: u64) {
    let Some(pos) = clients.iter().position(|h| h.token() == Some(token)) else {
        return;
    };
    let mut handle = clients.remove(pos);
    let announce = handle.handshaken;
    handle.disconnect_no_write();
    if announce {
        broadcast_locked(clients, &departure_notice(&handle.preferences.teamname));
    }
}

/// Remove dead handles and tell the remaining teams who left.
///
/// The departing handle leaves the list before the broadcast goes out.
fn sweep(reactor: &Reactor, clients: &mut Vec<ClientHandle>) {
    let mut i = 0;
    while i < clients.len() {
        if clients[i].connected {
            i += 1;
            continue;
        }
        let handle = clients.remove(i);
        if let Some(fd) = handle.fd() {
            reactor.unwatch(fd);
        }
        if handle.handshaken {
            broadcast_locked(clients, &departure_notice(&handle.preferences.teamname));
        }
    }
}

fn departure_notice(teamname: &str) -> Envelope {
    Envelope {
        msg_type: MSG_DISCONNECT.into(),
        content: json!({ "who": teamname }),
        ..Envelope::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_handles(teams: &[&str]) -> Vec<ClientHandle> {
        teams
            .iter()
            .enumerate()
            .map(|(i, team)| ClientHandle::detached(team, i as u64 + 1))
            .collect()
    }

    #[test]
    fn first_available_prefers_connection_order() {
        let clients = team_handles(&["x", "x", "x", "y"]);
        let sender = 3;
        assert_eq!(first_available(&clients, "x", "job", sender), Some(0));
    }

    #[test]
    fn first_available_skips_unavailable() {
        let mut clients = team_handles(&["x", "x", "x", "y"]);
        clients[0].unavailable.insert("job".into());
        let sender = 3;
        assert_eq!(first_available(&clients, "x", "job", sender), Some(1));
    }

    #[test]
    fn first_available_falls_back_to_last_match() {
        let mut clients = team_handles(&["x", "x", "x", "y"]);
        for handle in clients.iter_mut().take(3) {
            handle.unavailable.insert("job".into());
        }
        let sender = 3;
        assert_eq!(first_available(&clients, "x", "job", sender), Some(2));
    }

    #[test]
    fn first_available_with_no_match_selects_nobody() {
        let clients = team_handles(&["x", "y"]);
        assert_eq!(first_available(&clients, "z", "job", 1), None);
    }

    #[test]
    fn first_available_never_selects_the_sender() {
        let clients = team_handles(&["x"]);
        assert_eq!(first_available(&clients, "x", "job", 0), None);
    }

    #[test]
    fn all_token_matches_every_team() {
        let clients = team_handles(&["x", "y", "z"]);
        assert_eq!(first_available(&clients, MSG_ALL, "job", 1), Some(0));
    }

    #[test]
    fn unavailable_set_tracks_by_type() {
        let mut clients = team_handles(&["x", "x"]);
        clients[0].unavailable.insert("job".into());
        assert!(!clients[0].available("job"));
        assert!(clients[0].available("other"));
        assert_eq!(first_available(&clients, "x", "other", 1), Some(0));
    }

    #[test]
    fn availability_message_mutates_the_set() {
        let config = ServerConfig::default();
        let mut clients = team_handles(&["x", "y"]);

        let notice = Envelope {
            msg_type: MSG_AVAILABLE.into(),
            content: json!({ "type": "job", "available": false }),
            ..Envelope::default()
        };
        handle_message(&config, &mut clients, 0, notice);
        assert!(clients[0].unavailable.contains("job"));

        let notice = Envelope {
            msg_type: MSG_AVAILABLE.into(),
            content: json!({ "type": "job", "available": true }),
            ..Envelope::default()
        };
        handle_message(&config, &mut clients, 0, notice);
        assert!(!clients[0].unavailable.contains("job"));
    }

    #[test]
    fn malformed_availability_is_not_applied() {
        let config = ServerConfig::default();
        let mut clients = team_handles(&["x"]);

        let notice = Envelope {
            msg_type: MSG_AVAILABLE.into(),
            content: json!({ "type": "job" }),
            ..Envelope::default()
        };
        handle_message(&config, &mut clients, 0, notice);
        assert!(clients[0].unavailable.is_empty());
    }

    #[test]
    fn pre_handshake_message_disconnects() {
        let config = ServerConfig::default();
        let mut clients = team_handles(&["x"]);
        clients[0].handshaken = false;

        handle_message(&config, &mut clients, 0, Envelope::of_type("hello"));
        assert!(!clients[0].connected);
    }

    #[test]
    fn handshake_adopts_preferences() {
        let config = ServerConfig::default();
        let mut clients = team_handles(&["x"]);
        clients[0].handshaken = false;
        clients[0].preferences.teamname = proto::TEAM_UNAUTHORISED.into();

        let handshake = Envelope {
            msg_type: MSG_HANDSHAKE.into(),
            content: json!({
                "teamname": "alpha",
                "format": 0,
                "version": 0,
                "max-message-length": 4096,
            }),
            ..Envelope::default()
        };
        handle_message(&config, &mut clients, 0, handshake);

        let handle = &clients[0];
        assert!(handle.handshaken);
        assert!(handle.connected);
        assert_eq!(handle.preferences.teamname, "alpha");
        assert_eq!(handle.preferences.format, MessageFormat::Json);
        assert_eq!(handle.preferences.max_msg_length, 4096);
    }

    #[test]
    fn handshake_with_bad_content_disconnects() {
        let config = ServerConfig::default();
        let mut clients = team_handles(&["x"]);
        clients[0].handshaken = false;

        let handshake = Envelope {
            msg_type: MSG_HANDSHAKE.into(),
            content: json!({ "teamname": "", "format": 0, "version": 0,
                             "max-message-length": 4096 }),
            ..Envelope::default()
        };
        handle_message(&config, &mut clients, 0, handshake);
        assert!(!clients[0].connected);
    }

    #[test]
    fn empty_dest_is_not_forwarded() {
        let config = ServerConfig::default();
        let mut clients = team_handles(&["x", "y"]);

        // Routing to a dangling in-process peer would mark the
        // destination disconnected; an empty dest must not.
        handle_message(&config, &mut clients, 0, Envelope::of_type("note"));
        assert!(clients[1].connected);
    }
}
