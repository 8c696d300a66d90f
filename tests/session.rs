//! VncClient lifecycle tests
//!
//! Drives a session end to end against a scripted protocol engine whose "server socket"
//! is one end of a Unix socket pair; the test writes to the other end to make a message
//! available.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use droidvnc_viewer::vnc::{
    AuthError, ClientMessage, ConnectParams, ConnectionInfo, Credential, CredentialKind,
    EngineError, ErrorClass, EventDispatcher, MessageWriter, Progress, ProtocolEngine,
    SecurityType, ServerInit, SessionError, SessionListener, SessionState, VncClient,
};

type Handshake = Result<ServerInit, EngineError>;
type ConnectStep =
    Box<dyn FnOnce(&ConnectParams<'_>, &mut EventDispatcher<'_>) -> Handshake + Send>;
type MessageStep = Box<dyn FnOnce(&mut EventDispatcher<'_>) -> Result<(), EngineError> + Send>;

fn on_connect(
    f: impl FnOnce(&ConnectParams<'_>, &mut EventDispatcher<'_>) -> Handshake + Send + 'static,
) -> ConnectStep {
    Box::new(f)
}

fn step(
    f: impl FnOnce(&mut EventDispatcher<'_>) -> Result<(), EngineError> + Send + 'static,
) -> MessageStep {
    Box::new(f)
}

fn server_init(width: u32, height: u32) -> ServerInit {
    ServerInit {
        desktop_name: "test desktop".to_string(),
        width,
        height,
        encrypted: false,
    }
}

/// Handshake that announces the framebuffer size itself.
fn handshake(width: u32, height: u32) -> ConnectStep {
    on_connect(move |_, events| {
        events.resize_framebuffer(width, height)?;
        Ok(server_init(width, height))
    })
}

/// What the engine saw and sent.
#[derive(Default)]
struct EngineLog {
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<ClientMessage>>,
}

impl EngineLog {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }
}

struct RecordingWriter(Arc<EngineLog>);

impl MessageWriter for RecordingWriter {
    fn write_message(&mut self, message: &ClientMessage) -> Result<(), EngineError> {
        self.0.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct ScriptedEngine {
    socket: UnixStream,
    connect: Option<ConnectStep>,
    messages: VecDeque<MessageStep>,
    log: Arc<EngineLog>,
}

impl ProtocolEngine for ScriptedEngine {
    fn connect(
        &mut self,
        params: &ConnectParams<'_>,
        events: &mut EventDispatcher<'_>,
    ) -> Handshake {
        let mut calls = self.log.calls.lock().unwrap();
        calls.push(format!("connect {}:{}", params.host, params.port));
        calls.push(format!(
            "security {:?} local_cursor {}",
            params.security_type, params.use_local_cursor
        ));
        if let Some(proxy) = params.proxy {
            calls.push(format!("proxy {}:{}", proxy.host, proxy.port));
        }
        drop(calls);

        match self.connect.take() {
            Some(step) => step(params, events),
            None => Err(EngineError::Closed),
        }
    }

    fn message_writer(&mut self) -> Result<Box<dyn MessageWriter>, EngineError> {
        Ok(Box::new(RecordingWriter(self.log.clone())))
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        Some(self.socket.as_raw_fd())
    }

    fn handle_server_message(
        &mut self,
        events: &mut EventDispatcher<'_>,
    ) -> Result<(), EngineError> {
        let mut byte = [0u8; 1];
        if self.socket.read(&mut byte)? == 0 {
            return Err(EngineError::Closed);
        }
        let step = self
            .messages
            .pop_front()
            .ok_or_else(|| EngineError::Protocol("unscripted message".to_string()))?;
        step(events)
    }

    fn shutdown(&mut self) {
        self.log.calls.lock().unwrap().push("shutdown".to_string());
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    credential: Option<Credential>,
    password: String,
    /// Claim pointer position updates instead of letting the server cursor move.
    draws_cursor: bool,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionListener for Recorder {
    fn password(&self) -> String {
        self.password.clone()
    }

    fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }

    fn cursor_position(&self, x: u16, y: u16) -> bool {
        self.push(format!("cursor at {},{}", x, y));
        self.draws_cursor
    }

    fn bell(&self) {
        self.push("bell".to_string());
    }

    fn clipboard_text(&self, text: &str) {
        self.push(format!("clipboard {}", text));
    }

    fn framebuffer_resized(&self, width: u32, height: u32) {
        self.push(format!("resized {}x{}", width, height));
    }

    fn framebuffer_updated(&self) {
        self.push("updated".to_string());
    }
}

struct Harness {
    client: VncClient,
    /// Server side of the socket; write a byte to deliver the next scripted message.
    peer: UnixStream,
    log: Arc<EngineLog>,
    listener: Arc<Recorder>,
}

impl Harness {
    fn deliver(&mut self) {
        self.peer.write_all(&[0]).unwrap();
    }
}

fn harness_with(connect: ConnectStep, messages: Vec<MessageStep>, listener: Recorder) -> Harness {
    let (socket, peer) = UnixStream::pair().unwrap();
    let log = Arc::new(EngineLog::default());
    let listener = Arc::new(listener);
    let engine = ScriptedEngine {
        socket,
        connect: Some(connect),
        messages: messages.into(),
        log: log.clone(),
    };

    let client = VncClient::create(Box::new(engine), listener.clone()).unwrap();
    Harness {
        client,
        peer,
        log,
        listener,
    }
}

fn harness(connect: ConnectStep, messages: Vec<MessageStep>) -> Harness {
    harness_with(connect, messages, Recorder::default())
}

/// A session connected to an 800x600 desktop.
fn connected(messages: Vec<MessageStep>) -> Harness {
    let mut h = harness(handshake(800, 600), messages);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 5901).unwrap();
    h
}

#[test]
fn test_connect_reports_server_details() {
    let h = connected(vec![]);

    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(
        h.client.connection_info().unwrap(),
        ConnectionInfo {
            desktop_name: "test desktop".to_string(),
            width: 800,
            height: 600,
            encrypted: false,
        }
    );
    assert_eq!(h.listener.events(), vec!["resized 800x600"]);
    assert_eq!(h.log.calls()[0], "connect 203.0.113.5:5901");
    assert_eq!(h.client.last_error_description(), "");
}

#[test]
fn test_display_numbers_become_ports() {
    let mut h = harness(handshake(8, 8), vec![]);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 1).unwrap();
    assert_eq!(h.log.calls()[0], "connect 203.0.113.5:5901");

    let mut h = harness(handshake(8, 8), vec![]);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 5950).unwrap();
    assert_eq!(h.log.calls()[0], "connect 203.0.113.5:5950");
}

#[test]
fn test_configuration_reaches_engine() {
    let mut h = harness(handshake(8, 8), vec![]);
    h.client.configure(SecurityType::from(2), false).unwrap();
    h.client.set_proxy_destination("10.0.0.2", 5900);
    h.client.connect("repeater.example", 5500).unwrap();

    let calls = h.log.calls();
    assert_eq!(calls[1], "security Only(2) local_cursor false");
    assert_eq!(calls[2], "proxy 10.0.0.2:5900");
}

#[test]
fn test_server_init_sizes_framebuffer() {
    let mut h = harness(on_connect(|_, _| Ok(server_init(640, 480))), vec![]);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 0).unwrap();

    let dims = h
        .client
        .handle()
        .with_framebuffer(|fb| (fb.width, fb.height, fb.data.len()))
        .unwrap();
    assert_eq!(dims, (640, 480, 640 * 480 * 4));
    assert_eq!(h.listener.events(), vec!["resized 640x480"]);
}

#[test]
fn test_connect_before_configure_can_be_retried() {
    let mut h = harness(handshake(8, 8), vec![]);

    let err = h.client.connect("203.0.113.5", 5901).unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
    assert_eq!(h.client.state(), SessionState::Created);
    assert!(h.log.calls().is_empty());

    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 5901).unwrap();
    assert_eq!(h.client.state(), SessionState::Connected);
}

#[test]
fn test_declined_credential_is_an_auth_failure() {
    let connect = on_connect(|_, events| {
        if events.credential(CredentialKind::UserPassword).is_err() {
            return Err(EngineError::Protocol("security handshake failed".to_string()));
        }
        Ok(server_init(8, 8))
    });
    let mut h = harness(connect, vec![]);
    h.client.configure(SecurityType::Any, true).unwrap();

    let err = h.client.connect("203.0.113.5", 5901).unwrap_err();
    assert!(err.is_auth());
    assert_eq!(h.client.state(), SessionState::Failed);
    assert_eq!(h.client.last_error_description(), "Authentication failed");
}

#[test]
fn test_supplied_credential_reaches_engine() {
    let connect = on_connect(|_, events| {
        let credential = events.credential(CredentialKind::UserPassword)?;
        assert_eq!(credential.username, "alice");
        assert_eq!(credential.password, "secret");
        Ok(server_init(8, 8))
    });
    let listener = Recorder {
        credential: Some(Credential {
            username: "alice".to_string(),
            password: "secret".to_string(),
        }),
        ..Default::default()
    };
    let mut h = harness_with(connect, vec![], listener);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 5901).unwrap();
}

#[test]
fn test_unsupported_credential_is_an_auth_failure() {
    let connect = on_connect(|_, events| {
        // Kind 1 is an X.509 certificate request, which the viewer cannot answer.
        if events.credential(CredentialKind::from_id(1)).is_err() {
            return Err(EngineError::Protocol("security handshake failed".to_string()));
        }
        Ok(server_init(8, 8))
    });
    let mut h = harness(connect, vec![]);
    h.client.configure(SecurityType::Any, true).unwrap();

    let err = h.client.connect("203.0.113.5", 5901).unwrap_err();
    assert!(err.is_auth());
    assert!(matches!(err, SessionError::Auth(AuthError::UnsupportedCredential(1))));
    assert_eq!(h.client.state(), SessionState::Failed);
    assert_eq!(h.client.last_error_description(), "Authentication failed");
}

#[test]
fn test_password_comes_from_listener() {
    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let connect = on_connect(move |_, events| {
        *record.lock().unwrap() = Some(events.password());
        Ok(server_init(8, 8))
    });
    let listener = Recorder {
        password: "hunter2".to_string(),
        ..Default::default()
    };
    let mut h = harness_with(connect, vec![], listener);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 5901).unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some("hunter2"));
}

#[test]
fn test_password_defaults_to_empty() {
    struct Silent;
    impl SessionListener for Silent {}

    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let (socket, _peer) = UnixStream::pair().unwrap();
    let engine = ScriptedEngine {
        socket,
        connect: Some(on_connect(move |_, events| {
            *record.lock().unwrap() = Some(events.password());
            Ok(server_init(8, 8))
        })),
        messages: VecDeque::new(),
        log: Arc::new(EngineLog::default()),
    };
    let mut client = VncClient::create(Box::new(engine), Arc::new(Silent)).unwrap();
    client.configure(SecurityType::Any, true).unwrap();
    client.connect("203.0.113.5", 5901).unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some(""));
}

#[test]
fn test_cursor_position_answer_reaches_engine() {
    let answers = Arc::new(Mutex::new(Vec::new()));
    let record = answers.clone();
    let listener = Recorder {
        draws_cursor: true,
        ..Default::default()
    };
    let messages = vec![step(move |events| {
        record.lock().unwrap().push(events.cursor_position(5, 6));
        Ok(())
    })];
    let mut h = harness_with(handshake(800, 600), messages, listener);
    h.client.configure(SecurityType::Any, true).unwrap();
    h.client.connect("203.0.113.5", 5901).unwrap();

    h.deliver();
    let progress = h.client.process_messages(Duration::from_secs(1)).unwrap();
    assert_eq!(progress, Progress::Processed);
    assert_eq!(*answers.lock().unwrap(), vec![true]);
    assert_eq!(h.listener.events(), vec!["resized 800x600", "cursor at 5,6"]);
}

#[test]
fn test_cursor_position_declined_by_listener() {
    let answers = Arc::new(Mutex::new(Vec::new()));
    let record = answers.clone();
    let mut h = connected(vec![step(move |events| {
        record.lock().unwrap().push(events.cursor_position(5, 6));
        Ok(())
    })]);

    h.deliver();
    h.client.process_messages(Duration::from_secs(1)).unwrap();
    assert_eq!(*answers.lock().unwrap(), vec![false]);
}

#[test]
fn test_refused_connection_is_classified() {
    let connect = on_connect(|_, _| {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into())
    });
    let mut h = harness(connect, vec![]);
    h.client.configure(SecurityType::Any, true).unwrap();

    let err = h.client.connect("203.0.113.5", 5901).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Network {
            class: ErrorClass::ConnectionRefused,
            ..
        }
    ));
    assert_eq!(h.client.state(), SessionState::Failed);
    assert_eq!(h.client.last_error_description(), "Connection refused by the server");
    assert!(h.client.connection_info().is_err());
}

#[test]
fn test_queries_before_connect_are_rejected() {
    let h = harness(handshake(8, 8), vec![]);
    let handle = h.client.handle();

    assert!(matches!(
        handle.connection_info().unwrap_err(),
        SessionError::InvalidState { .. }
    ));
    assert!(matches!(
        handle.send_key_event(0xff0d, true).unwrap_err(),
        SessionError::InvalidState { .. }
    ));
}

#[test]
fn test_process_times_out_without_data() {
    let mut h = connected(vec![]);
    let progress = h.client.process_messages(Duration::from_millis(20)).unwrap();
    assert_eq!(progress, Progress::TimedOut);
    assert_eq!(h.client.state(), SessionState::Connected);
}

#[test]
fn test_process_handles_one_message() {
    let mut h = connected(vec![
        step(|events| {
            events.bell();
            Ok(())
        }),
        step(|events| {
            events.clipboard_text("hello");
            Ok(())
        }),
    ]);

    h.deliver();
    h.deliver();
    assert_eq!(h.client.process_messages(Duration::from_secs(1)).unwrap(), Progress::Processed);
    assert_eq!(h.client.process_messages(Duration::from_secs(1)).unwrap(), Progress::Processed);
    assert_eq!(h.listener.events(), vec!["resized 800x600", "bell", "clipboard hello"]);
}

#[test]
fn test_interrupt_from_another_thread() {
    let mut h = connected(vec![]);
    let handle = h.client.handle();
    assert!(handle.is_interruptible());

    let waker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.interrupt();
    });

    let start = Instant::now();
    let progress = h.client.process_messages(Duration::from_secs(10)).unwrap();
    waker.join().unwrap();

    assert_eq!(progress, Progress::Interrupted);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_interrupt_before_wait_is_consumed_once() {
    let mut h = connected(vec![]);
    let handle = h.client.handle();
    handle.interrupt();
    handle.interrupt();

    let start = Instant::now();
    assert_eq!(h.client.process_messages(Duration::from_secs(10)).unwrap(), Progress::Interrupted);
    assert!(start.elapsed() < Duration::from_secs(5));

    assert_eq!(h.client.process_messages(Duration::from_millis(20)).unwrap(), Progress::TimedOut);
}

#[test]
fn test_input_goes_through_writer() {
    let h = connected(vec![]);
    let handle = h.client.handle();

    handle.send_key_event(0x61, true).unwrap();
    handle.send_pointer_event(10, 20, 1).unwrap();
    handle.send_clipboard_text("copied").unwrap();
    handle.request_full_refresh().unwrap();

    assert_eq!(
        h.log.sent(),
        vec![
            ClientMessage::KeyEvent { keysym: 0x61, down: true },
            ClientMessage::PointerEvent {
                x: 10,
                y: 20,
                button_mask: 1
            },
            ClientMessage::ClientCutText("copied".to_string()),
            ClientMessage::FramebufferUpdateRequest {
                x: 0,
                y: 0,
                width: 800,
                height: 600,
                incremental: false
            },
        ]
    );
}

#[test]
fn test_frame_update_sequence() {
    let mut h = connected(vec![step(|events| {
        events.resize_framebuffer(4, 2)?;
        events.fill_rect(0, 0, 4, 2, [9, 8, 7, 255])?;
        events.finished_update();
        Ok(())
    })]);

    h.deliver();
    h.client.process_messages(Duration::from_secs(1)).unwrap();

    assert_eq!(h.listener.events(), vec!["resized 800x600", "resized 4x2", "updated"]);
    let info = h.client.connection_info().unwrap();
    assert_eq!((info.width, info.height), (4, 2));
    let all_filled = h
        .client
        .handle()
        .with_framebuffer(|fb| fb.data.chunks(4).all(|px| px == [9, 8, 7, 255]))
        .unwrap();
    assert!(all_filled);
}

#[test]
fn test_bad_cursor_keeps_previous_shape() {
    let mut h = connected(vec![step(|events| {
        assert!(events.update_cursor(&[0; 4], &[], 2, 2, 0, 0).is_err());
        events
            .update_cursor(&[255; 16], &[1; 4], 2, 2, 1, 1)
            .map_err(|e| EngineError::Protocol(e.to_string()))
    })]);

    let before = h.client.handle().with_cursor(|c| (c.width, c.height)).unwrap();
    assert_eq!(before, (10, 16));

    h.deliver();
    h.client.process_messages(Duration::from_secs(1)).unwrap();

    let cursor = h
        .client
        .handle()
        .with_cursor(|c| (c.width, c.height, c.x_hot, c.y_hot, c.data.to_vec()))
        .unwrap();
    assert_eq!(cursor, (2, 2, 1, 1, vec![255; 16]));
}

#[test]
fn test_decode_error_fails_session() {
    let mut h = connected(vec![step(|_| Err(EngineError::Protocol("bad rectangle".to_string())))]);

    h.deliver();
    let err = h.client.process_messages(Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)));
    assert_eq!(h.client.state(), SessionState::Failed);
    assert_eq!(h.client.last_error_description(), "Protocol error");

    // Still answers for the UI, but refuses to process further.
    assert_eq!(h.client.connection_info().unwrap().width, 800);
    assert!(matches!(
        h.client.process_messages(Duration::from_millis(10)).unwrap_err(),
        SessionError::InvalidState { .. }
    ));
}

#[test]
fn test_server_hangup_fails_session() {
    let mut h = connected(vec![]);
    h.peer.shutdown(std::net::Shutdown::Both).unwrap();

    let err = h.client.process_messages(Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, SessionError::Closed));
    assert_eq!(h.client.state(), SessionState::Failed);
    assert_eq!(h.client.last_error_description(), "Connection reset by peer");
}

#[test]
fn test_cleanup_releases_session() {
    let h = connected(vec![]);
    let handle = h.client.handle();
    let log = h.log.clone();

    h.client.cleanup();

    assert_eq!(handle.state(), SessionState::Closed);
    let released = handle.with_framebuffer(|fb| (fb.width, fb.height, fb.data.len())).unwrap();
    assert_eq!(released, (0, 0, 0));
    assert!(matches!(
        handle.send_pointer_event(1, 1, 0).unwrap_err(),
        SessionError::InvalidState { .. }
    ));
    assert_eq!(log.calls().iter().filter(|c| *c == "shutdown").count(), 1);
}

#[test]
fn test_drop_tears_down_once() {
    let h = connected(vec![]);
    let handle = h.client.handle();
    let log = h.log.clone();

    drop(h);

    assert_eq!(handle.state(), SessionState::Closed);
    assert_eq!(log.calls().iter().filter(|c| *c == "shutdown").count(), 1);
}

#[test]
fn test_snapshots_stay_consistent_across_resizes() {
    const SIZES: [(u32, u32); 4] = [(64, 48), (17, 3), (200, 100), (1, 1)];
    let rounds = 40;

    let messages = (0..rounds)
        .map(|i| {
            let (w, h) = SIZES[i % SIZES.len()];
            step(move |events| {
                events.resize_framebuffer(w, h)?;
                events.fill_rect(0, 0, w, h, [i as u8, 0, 0, 255])?;
                events.finished_update();
                Ok(())
            })
        })
        .collect();
    let mut h = connected(messages);

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let handle = h.client.handle();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let consistent = handle
                        .with_framebuffer(|fb| {
                            fb.data.len() == fb.width as usize * fb.height as usize * 4
                        })
                        .unwrap();
                    assert!(consistent);
                }
            })
        })
        .collect();

    for _ in 0..rounds {
        h.deliver();
        assert_eq!(h.client.process_messages(Duration::from_secs(1)).unwrap(), Progress::Processed);
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
}
