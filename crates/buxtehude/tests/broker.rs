use std::io::{ErrorKind, Read};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use buxtehude::frame::{write_envelope, Envelope, MessageFormat};
use buxtehude::peer::{
    initialise, Client, ClientPreferences, Server, ServerConfig, MSG_DISCONNECT, MSG_HANDSHAKE,
};
use serde_json::json;

fn tcp_server() -> (Server, u16) {
    let server = Server::new();
    server.listen_tcp(0).expect("broker should listen on tcp");
    let port = server.tcp_port().expect("tcp port should be bound");
    (server, port)
}

fn tcp_client(team: &str, port: u16) -> Client {
    let client = Client::new(ClientPreferences::team(team));
    client
        .connect_tcp("127.0.0.1", port)
        .expect("client should connect");
    client
}

fn envelopes_of(client: &Client, msg_type: &str) -> mpsc::Receiver<Envelope> {
    let (tx, rx) = mpsc::channel();
    client.add_handler(msg_type, move |_, envelope: &Envelope| {
        let _ = tx.send(envelope.clone());
    });
    rx
}

fn recv_one(rx: &mpsc::Receiver<Envelope>) -> Envelope {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("envelope should arrive")
}

fn assert_nothing(rx: &mpsc::Receiver<Envelope>) {
    assert!(
        rx.recv_timeout(Duration::from_millis(300)).is_err(),
        "unexpected envelope delivered"
    );
}

fn wait_for_team(server: &Server, team: &str, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let ready = server
            .get_clients(Some(team))
            .iter()
            .filter(|c| c.handshaken)
            .count();
        if ready >= count {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "team {team} never reached {count} handshaken members"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn tcp_round_trip() {
    initialise();
    let (server, port) = tcp_server();
    let a = tcp_client("alpha", port);
    let b = tcp_client("beta", port);
    wait_for_team(&server, "alpha", 1);
    wait_for_team(&server, "beta", 1);
    let hello = envelopes_of(&b, "hello");

    a.write(&Envelope {
        msg_type: "hello".into(),
        dest: "beta".into(),
        content: json!("hi"),
        ..Envelope::default()
    })
    .expect("write should succeed");

    let received = recv_one(&hello);
    assert_eq!(
        received,
        Envelope {
            msg_type: "hello".into(),
            src: "alpha".into(),
            dest: "beta".into(),
            only_first: false,
            content: json!("hi"),
        }
    );

    server.close();
}

#[test]
fn single_sender_envelopes_arrive_in_order() {
    initialise();
    let (server, port) = tcp_server();
    let sender = tcp_client("alpha", port);
    let receiver = tcp_client("beta", port);
    wait_for_team(&server, "beta", 1);
    let seq = envelopes_of(&receiver, "seq");

    for n in 0..5 {
        sender
            .write(&Envelope {
                msg_type: "seq".into(),
                dest: "beta".into(),
                content: json!(n),
                ..Envelope::default()
            })
            .expect("write should succeed");
    }

    for n in 0..5 {
        assert_eq!(recv_one(&seq).content, json!(n));
    }

    server.close();
}

#[test]
fn disconnect_is_broadcast_to_remaining_teams() {
    initialise();
    let (server, port) = tcp_server();
    let a1 = tcp_client("a", port);
    let a2 = tcp_client("a", port);
    let b = tcp_client("b", port);
    wait_for_team(&server, "a", 2);
    wait_for_team(&server, "b", 1);

    let seen_by_a2 = envelopes_of(&a2, MSG_DISCONNECT);
    let seen_by_b = envelopes_of(&b, MSG_DISCONNECT);

    a1.disconnect();

    let notice = recv_one(&seen_by_a2);
    assert_eq!(notice.content["who"], json!("a"));
    let notice = recv_one(&seen_by_b);
    assert_eq!(notice.content["who"], json!("a"));

    server.close();
}

#[test]
fn only_first_prefers_first_available_member() {
    initialise();
    let (server, port) = tcp_server();
    let x1 = tcp_client("x", port);
    wait_for_team(&server, "x", 1);
    let x2 = tcp_client("x", port);
    wait_for_team(&server, "x", 2);
    let x3 = tcp_client("x", port);
    wait_for_team(&server, "x", 3);
    let y = tcp_client("y", port);
    wait_for_team(&server, "y", 1);

    let jobs_1 = envelopes_of(&x1, "job");
    let jobs_2 = envelopes_of(&x2, "job");
    let jobs_3 = envelopes_of(&x3, "job");

    x1.set_available("job", false)
        .expect("availability notice should send");
    thread::sleep(Duration::from_millis(200));

    y.write(&Envelope {
        msg_type: "job".into(),
        dest: "x".into(),
        only_first: true,
        ..Envelope::default()
    })
    .expect("write should succeed");

    let received = recv_one(&jobs_2);
    assert_eq!(received.src, "y");
    assert_nothing(&jobs_1);
    assert_nothing(&jobs_3);

    server.close();
}

#[test]
fn only_first_falls_back_to_last_member_when_none_available() {
    initialise();
    let (server, port) = tcp_server();
    let x1 = tcp_client("x", port);
    wait_for_team(&server, "x", 1);
    let x2 = tcp_client("x", port);
    wait_for_team(&server, "x", 2);
    let y = tcp_client("y", port);
    wait_for_team(&server, "y", 1);

    let jobs_1 = envelopes_of(&x1, "job");
    let jobs_2 = envelopes_of(&x2, "job");

    x1.set_available("job", false)
        .expect("availability notice should send");
    x2.set_available("job", false)
        .expect("availability notice should send");
    thread::sleep(Duration::from_millis(200));

    y.write(&Envelope {
        msg_type: "job".into(),
        dest: "x".into(),
        only_first: true,
        ..Envelope::default()
    })
    .expect("write should succeed");

    recv_one(&jobs_2);
    assert_nothing(&jobs_1);

    server.close();
}

#[test]
fn oversize_message_is_dropped_but_connection_survives() {
    initialise();
    let (server, port) = tcp_server();

    let small = Client::new(ClientPreferences {
        teamname: "small".into(),
        max_msg_length: 256,
        ..ClientPreferences::default()
    });
    small
        .connect_tcp("127.0.0.1", port)
        .expect("client should connect");
    let big = tcp_client("big", port);
    wait_for_team(&server, "small", 1);
    wait_for_team(&server, "big", 1);

    let blobs = envelopes_of(&small, "blob");
    let pings = envelopes_of(&small, "ping");

    big.write(&Envelope {
        msg_type: "blob".into(),
        dest: "small".into(),
        content: json!("x".repeat(300)),
        ..Envelope::default()
    })
    .expect("write should succeed");
    big.write(&Envelope {
        msg_type: "ping".into(),
        dest: "small".into(),
        ..Envelope::default()
    })
    .expect("write should succeed");

    // The oversize envelope is never decoded; the next one still lands.
    recv_one(&pings);
    assert_nothing(&blobs);

    server.close();
}

#[test]
fn empty_dest_is_not_forwarded_and_does_not_disconnect() {
    initialise();
    let (server, port) = tcp_server();
    let a = tcp_client("alpha", port);
    let b = tcp_client("beta", port);
    wait_for_team(&server, "alpha", 1);
    wait_for_team(&server, "beta", 1);

    let notes = envelopes_of(&b, "note");
    let hellos = envelopes_of(&b, "hello");

    a.write(&Envelope::of_type("note"))
        .expect("write should succeed");
    assert_nothing(&notes);

    a.write(&Envelope {
        msg_type: "hello".into(),
        dest: "beta".into(),
        ..Envelope::default()
    })
    .expect("write should succeed");
    recv_one(&hellos);

    server.close();
}

#[test]
fn in_process_and_tcp_clients_interoperate() {
    initialise();
    let (server, port) = tcp_server();
    server
        .listen_internal()
        .expect("in-process transport should enable");

    let internal = Client::new(ClientPreferences::team("alpha"));
    let pings = envelopes_of(&internal, "ping");
    internal
        .connect_internal(&server)
        .expect("in-process client should attach");
    wait_for_team(&server, "alpha", 1);

    let external = tcp_client("beta", port);
    wait_for_team(&server, "beta", 1);
    let pongs = envelopes_of(&external, "pong");

    external
        .write(&Envelope {
            msg_type: "ping".into(),
            dest: "alpha".into(),
            ..Envelope::default()
        })
        .expect("write should succeed");

    let received = recv_one(&pings);
    assert_eq!(received.src, "beta");
    assert_nothing(&pings);

    internal
        .write(&Envelope {
            msg_type: "pong".into(),
            dest: "beta".into(),
            ..Envelope::default()
        })
        .expect("write should succeed");

    let received = recv_one(&pongs);
    assert_eq!(received.src, "alpha");
    assert_nothing(&pongs);

    server.close();
}

#[test]
fn in_process_disconnect_is_broadcast() {
    initialise();
    let (server, port) = tcp_server();
    server
        .listen_internal()
        .expect("in-process transport should enable");

    let internal = Client::new(ClientPreferences::team("alpha"));
    internal
        .connect_internal(&server)
        .expect("in-process client should attach");
    wait_for_team(&server, "alpha", 1);

    let external = tcp_client("beta", port);
    wait_for_team(&server, "beta", 1);
    let departures = envelopes_of(&external, MSG_DISCONNECT);

    internal.disconnect();

    let notice = recv_one(&departures);
    assert_eq!(notice.content["who"], json!("alpha"));

    server.close();
}

#[test]
fn local_socket_round_trip_and_cleanup() {
    initialise();
    let dir = std::env::temp_dir().join(format!("bux-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    let path = dir.join("broker.sock");

    let server = Server::new();
    server
        .listen_local(&path)
        .expect("broker should listen on the local socket");

    let a = Client::new(ClientPreferences::team("alpha"));
    a.connect_local(&path).expect("client should connect");
    let b = Client::new(ClientPreferences::team("beta"));
    b.connect_local(&path).expect("client should connect");
    wait_for_team(&server, "beta", 1);

    let hellos = envelopes_of(&b, "hello");
    a.write(&Envelope {
        msg_type: "hello".into(),
        dest: "beta".into(),
        content: json!({ "n": 1 }),
        ..Envelope::default()
    })
    .expect("write should succeed");
    recv_one(&hellos);

    drop(a);
    drop(b);
    server.close();
    assert!(!path.exists(), "socket path should be unlinked on close");
    let _ = std::fs::remove_dir_all(&dir);
}

fn read_to_eof(stream: &mut std::net::TcpStream) {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout should apply");
    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                panic!("server did not close the connection")
            }
            Err(_) => return,
        }
    }
}

#[test]
fn non_handshake_first_message_is_rejected_without_routing() {
    initialise();
    let (server, port) = tcp_server();
    let victim = tcp_client("victim", port);
    wait_for_team(&server, "victim", 1);
    let hellos = envelopes_of(&victim, "hello");

    let mut raw =
        std::net::TcpStream::connect(("127.0.0.1", port)).expect("raw connect should succeed");
    write_envelope(
        &mut raw,
        &Envelope {
            msg_type: "hello".into(),
            dest: "victim".into(),
            ..Envelope::default()
        },
        MessageFormat::Json,
    )
    .expect("raw frame should write");

    read_to_eof(&mut raw);
    assert_nothing(&hellos);

    server.close();
}

#[test]
fn malformed_handshake_disconnects() {
    initialise();
    let (server, port) = tcp_server();

    let mut raw =
        std::net::TcpStream::connect(("127.0.0.1", port)).expect("raw connect should succeed");
    write_envelope(
        &mut raw,
        &Envelope {
            msg_type: MSG_HANDSHAKE.into(),
            content: json!({ "teamname": "", "format": 0, "version": 0,
                             "max-message-length": 1024 }),
            ..Envelope::default()
        },
        MessageFormat::Json,
    )
    .expect("raw frame should write");

    read_to_eof(&mut raw);
    server.close();
}

#[test]
fn silent_connection_times_out_of_handshake() {
    initialise();
    let server = Server::with_config(ServerConfig {
        handshake_timeout: Duration::from_millis(200),
        ..ServerConfig::default()
    });
    server.listen_tcp(0).expect("broker should listen on tcp");
    let port = server.tcp_port().expect("tcp port should be bound");

    let mut raw =
        std::net::TcpStream::connect(("127.0.0.1", port)).expect("raw connect should succeed");

    let started = Instant::now();
    read_to_eof(&mut raw);
    assert!(started.elapsed() >= Duration::from_millis(150));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !server.get_clients(None).is_empty() {
        assert!(
            Instant::now() < deadline,
            "timed-out connection should leave no routing state"
        );
        thread::sleep(Duration::from_millis(10));
    }

    server.close();
}

#[test]
fn error_replies_are_rate_limited() {
    use buxtehude::frame::{arm_message_pipeline, finish_message, Stream};
    use std::io::Write;

    initialise();
    let (server, port) = tcp_server();

    let raw =
        std::net::TcpStream::connect(("127.0.0.1", port)).expect("raw connect should succeed");
    raw.set_read_timeout(Some(Duration::from_millis(300)))
        .expect("read timeout should apply");

    let mut writer = raw.try_clone().expect("socket should clone");
    write_envelope(
        &mut writer,
        &Envelope {
            msg_type: MSG_HANDSHAKE.into(),
            content: json!({ "teamname": "noisy", "format": 0, "version": 0,
                             "max-message-length": 1024 }),
            ..Envelope::default()
        },
        MessageFormat::Json,
    )
    .expect("handshake should write");

    // Two malformed payloads in quick succession; the broker must reply
    // with at most one $$error per second.
    for _ in 0..2 {
        let payload = b"{not-json";
        let mut frame = vec![MessageFormat::Json.code()];
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        writer.write_all(&frame).expect("bad frame should write");
    }

    let mut inbound = Stream::new(raw);
    arm_message_pipeline(&mut inbound, 128 * 1024);

    let read_envelope = |stream: &mut Stream<std::net::TcpStream>| -> Option<Envelope> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if stream.read() {
                return finish_message(stream).ok();
            }
        }
        None
    };

    let first = read_envelope(&mut inbound).expect("server handshake should arrive");
    assert_eq!(first.msg_type, MSG_HANDSHAKE);
    let second = read_envelope(&mut inbound).expect("error reply should arrive");
    assert_eq!(second.msg_type, "$$error");
    assert!(
        read_envelope(&mut inbound).is_none(),
        "second error within a second should be suppressed"
    );

    server.close();
}

#[test]
fn second_connect_is_rejected() {
    initialise();
    let (server, port) = tcp_server();
    let client = tcp_client("alpha", port);

    let result = client.connect_tcp("127.0.0.1", port);
    assert!(matches!(
        result,
        Err(buxtehude::peer::ConnectError::AlreadyConnected)
    ));

    server.close();
}
