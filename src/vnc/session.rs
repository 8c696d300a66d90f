//! Session lifecycle and the message-processing loop.
//!
//! [`VncClient`] is the connection manager for one session. It is owned by the
//! processing thread, which configures it, connects, and then calls
//! [`VncClient::process_messages`] until it is interrupted or fails.
//! [`SessionHandle`] shares the parts other threads need: input injection,
//! render snapshots, interruption and status queries.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::config::{Destination, SecurityType, SessionConfig};
use super::cursor::{CursorStore, CursorView};
use super::engine::{
    ClientMessage, ConnectParams, MessageWriter, PixelFormat, ProtocolEngine, ServerInit,
};
use super::error::{CursorError, ErrorClass, SessionError, StoreError};
use super::events::{EventDispatcher, SessionListener};
use super::framebuffer::{FramebufferStore, FramebufferView};
use super::interrupt::{self, InterruptChannel, InterruptSignal, WaitOutcome};
use super::normalize_port;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Configured,
    Connecting,
    Connected,
    Closed,
    /// Terminal. Only `cleanup` remains valid.
    Failed,
}

/// Non-fatal outcome of [`VncClient::process_messages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// One server message was handled.
    Processed,
    /// No data arrived before the timeout.
    TimedOut,
    /// The wait was cut short by [`SessionHandle::interrupt`].
    Interrupted,
}

/// Snapshot of the negotiated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub desktop_name: String,
    pub width: u32,
    pub height: u32,
    pub encrypted: bool,
}

/// State shared between the processing thread and handles.
struct Shared {
    framebuffer: FramebufferStore,
    cursor: CursorStore,
    interrupt: Option<InterruptSignal>,
    state: Mutex<SessionState>,
    server: Mutex<Option<ServerInit>>,
    writer: Mutex<Option<Box<dyn MessageWriter>>>,
    last_error: Mutex<Option<ErrorClass>>,
}

/// Locks a plain-data mutex, ignoring poisoning.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!("Session state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        let state = self.state();
        warn!("{} rejected in state {:?}", operation, state);
        SessionError::InvalidState { operation, state }
    }

    /// Remembers the class of `err` for `last_error_description` and logs it.
    fn record_error(&self, context: &str, err: &SessionError) {
        match err.class() {
            Some(class) if class.is_transient() => {
                debug!("{}: transient error: {}", context, err);
                *lock(&self.last_error) = Some(class);
            }
            Some(class) => {
                error!("{}: {}", context, err);
                *lock(&self.last_error) = Some(class);
            }
            None => warn!("{}: {}", context, err),
        }
    }

    fn connection_info(&self) -> Result<ConnectionInfo, SessionError> {
        let state = self.state();
        let (desktop_name, encrypted) = {
            let server = lock(&self.server);
            match (state, server.as_ref()) {
                (SessionState::Connected | SessionState::Failed, Some(server)) => {
                    (server.desktop_name.clone(), server.encrypted)
                }
                _ => return Err(self.invalid_state("connection_info")),
            }
        };
        let (width, height) = self.framebuffer.dimensions()?;
        Ok(ConnectionInfo {
            desktop_name,
            width,
            height,
            encrypted,
        })
    }

    fn send(&self, message: ClientMessage) -> Result<(), SessionError> {
        let mut guard = lock(&self.writer);
        let Some(writer) = guard.as_mut() else {
            return Err(self.invalid_state("send"));
        };

        writer.write_message(&message).map_err(|e| {
            let err = SessionError::from_engine(e, None);
            self.record_error("Failed to send client message", &err);
            err
        })
    }
}

/// Connection manager for a single VNC session.
///
/// Created with a protocol engine and a listener, then driven through
/// `configure` → `connect` → `process_messages`* → `cleanup`. Dropping the
/// client performs the same teardown as `cleanup`.
pub struct VncClient {
    engine: Box<dyn ProtocolEngine>,
    listener: Arc<dyn SessionListener>,
    config: SessionConfig,
    interrupt: Option<InterruptChannel>,
    shared: Arc<Shared>,
}

impl fmt::Debug for VncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VncClient")
            .field("state", &self.shared.state())
            .field("config", &self.config)
            .field("interruptible", &self.interrupt.is_some())
            .finish()
    }
}

impl VncClient {
    /// Creates a session with default configuration, the default cursor and
    /// an empty framebuffer.
    ///
    /// If the interrupt channel cannot be created the session still works,
    /// but [`SessionHandle::interrupt`] has no effect and `process_messages`
    /// only returns on data or timeout.
    pub fn create(
        engine: Box<dyn ProtocolEngine>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<Self, SessionError> {
        Self::create_with(engine, listener, InterruptChannel::new())
    }

    /// Like [`create`](Self::create), with the outcome of opening the
    /// interrupt channel supplied by the caller.
    pub(crate) fn create_with(
        engine: Box<dyn ProtocolEngine>,
        listener: Arc<dyn SessionListener>,
        interrupt: io::Result<InterruptChannel>,
    ) -> Result<Self, SessionError> {
        let cursor = CursorStore::new().map_err(|e| match e {
            CursorError::Allocation { .. } => SessionError::Allocation("default cursor"),
            other => SessionError::Protocol(other.to_string()),
        })?;

        let interrupt = match interrupt {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("Interrupt channel unavailable, falling back to timeout-only waits: {}", e);
                None
            }
        };

        let shared = Arc::new(Shared {
            framebuffer: FramebufferStore::new(),
            cursor,
            interrupt: interrupt.as_ref().map(InterruptChannel::signal_handle),
            state: Mutex::new(SessionState::Created),
            server: Mutex::new(None),
            writer: Mutex::new(None),
            last_error: Mutex::new(None),
        });

        Ok(Self {
            engine,
            listener,
            config: SessionConfig::default(),
            interrupt,
            shared,
        })
    }

    /// Sets the accepted security type and cursor mode. Must precede
    /// [`connect`](Self::connect).
    pub fn configure(
        &mut self,
        security_type: SecurityType,
        use_local_cursor: bool,
    ) -> Result<(), SessionError> {
        match self.shared.state() {
            SessionState::Created | SessionState::Configured => {
                self.config.security_type = security_type;
                self.config.use_local_cursor = use_local_cursor;
                self.shared.set_state(SessionState::Configured);
                Ok(())
            }
            _ => Err(self.shared.invalid_state("configure")),
        }
    }

    /// Records the final destination for repeater and proxy setups. Takes
    /// effect on the next `connect`.
    pub fn set_proxy_destination(&mut self, host: impl Into<String>, port: u16) {
        self.config.proxy = Some(Destination {
            host: host.into(),
            port,
        });
    }

    /// Connects and performs the handshake.
    ///
    /// Ports below 100 are display numbers and are offset by 5900. Calling
    /// this before `configure` is rejected without changing state, so the
    /// caller may configure and retry. Any other failure leaves the session
    /// in [`SessionState::Failed`].
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        if self.shared.state() != SessionState::Configured {
            return Err(self.shared.invalid_state("connect"));
        }

        let port = normalize_port(port);
        self.shared.set_state(SessionState::Connecting);
        info!("Connecting to {}:{}", host, port);

        let params = ConnectParams {
            host,
            port,
            security_type: self.config.security_type,
            use_local_cursor: self.config.use_local_cursor,
            proxy: self.config.proxy.as_ref(),
            pixel_format: PixelFormat::RGBA32,
        };

        let shared = &*self.shared;
        let mut events = EventDispatcher::new(&*self.listener, &shared.framebuffer, &shared.cursor);

        let result = self
            .engine
            .connect(&params, &mut events)
            .map_err(|e| SessionError::from_engine(e, events.auth_failure()))
            .and_then(|server| {
                if shared.framebuffer.dimensions()? != (server.width, server.height) {
                    events.resize_framebuffer(server.width, server.height)?;
                }
                let writer = self
                    .engine
                    .message_writer()
                    .map_err(|e| SessionError::from_engine(e, None))?;
                Ok((server, writer))
            });

        match result {
            Ok((server, writer)) => {
                info!(
                    "Connected to '{}' ({}x{}, encrypted: {})",
                    server.desktop_name, server.width, server.height, server.encrypted
                );
                *lock(&shared.server) = Some(server);
                *lock(&shared.writer) = Some(writer);
                *lock(&shared.last_error) = None;
                shared.set_state(SessionState::Connected);
                Ok(())
            }
            Err(err) => {
                shared.record_error("Connect failed", &err);
                shared.set_state(SessionState::Failed);
                Err(err)
            }
        }
    }

    /// Waits up to `timeout` for server data and handles one message.
    ///
    /// Returns [`Progress::Interrupted`] promptly after
    /// [`SessionHandle::interrupt`], including when the signal arrived before
    /// this call. An error is fatal: the session moves to
    /// [`SessionState::Failed`] and the caller should stop its loop and call
    /// [`cleanup`](Self::cleanup).
    pub fn process_messages(&mut self, timeout: Duration) -> Result<Progress, SessionError> {
        if self.shared.state() != SessionState::Connected {
            return Err(self.shared.invalid_state("process_messages"));
        }

        let outcome = if self.engine.has_buffered_data() {
            WaitOutcome::Readable
        } else {
            let waited = match self.engine.readiness_fd() {
                Some(fd) => interrupt::wait_readable(fd, self.interrupt.as_ref(), timeout)
                    .map_err(|source| SessionError::Network {
                        class: ErrorClass::from_io(&source),
                        source,
                    }),
                None => Err(SessionError::Protocol("engine has no readiness descriptor".into())),
            };
            waited.map_err(|err| self.fail("Wait for server message failed", err))?
        };

        match outcome {
            WaitOutcome::TimedOut => return Ok(Progress::TimedOut),
            WaitOutcome::Interrupted => {
                debug!("Message wait interrupted");
                return Ok(Progress::Interrupted);
            }
            WaitOutcome::Readable => {}
        }

        let shared = &*self.shared;
        let mut events = EventDispatcher::new(&*self.listener, &shared.framebuffer, &shared.cursor);
        match self.engine.handle_server_message(&mut events) {
            Ok(()) => Ok(Progress::Processed),
            Err(e) => {
                let err = SessionError::from_engine(e, events.auth_failure());
                Err(self.fail("Failed to handle server message", err))
            }
        }
    }

    fn fail(&self, context: &str, err: SessionError) -> SessionError {
        self.shared.record_error(context, &err);
        self.shared.set_state(SessionState::Failed);
        err
    }

    /// Tears the session down: releases the framebuffer, drops the message
    /// writer and shuts the engine down.
    ///
    /// Consumes the client, so it cannot overlap a running
    /// `process_messages`. Handles stay valid but report
    /// [`SessionState::Closed`] and refuse input.
    pub fn cleanup(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.shared.state() == SessionState::Closed {
            return;
        }

        lock(&self.shared.writer).take();
        if let Err(e) = self.shared.framebuffer.release() {
            error!("Failed to release framebuffer: {}", e);
        }
        self.engine.shutdown();
        self.shared.set_state(SessionState::Closed);
        info!("Session closed");
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Thread-safe handle for input, rendering and interruption.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn interrupt(&self) {
        if let Some(channel) = &self.interrupt {
            channel.signal();
        }
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo, SessionError> {
        self.shared.connection_info()
    }

    pub fn last_error_description(&self) -> String {
        self.handle().last_error_description()
    }
}

impl Drop for VncClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Cloneable, thread-safe view of a session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Wakes the processing thread's current or next wait.
    ///
    /// Safe to call from any thread at any time. Has no effect if the
    /// interrupt channel could not be created.
    pub fn interrupt(&self) {
        match &self.shared.interrupt {
            Some(signal) => signal.signal(),
            None => debug!("Interrupt requested but session has no interrupt channel"),
        }
    }

    pub fn is_interruptible(&self) -> bool {
        self.shared.interrupt.is_some()
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo, SessionError> {
        self.shared.connection_info()
    }

    /// Describes the most recent failure, or returns an empty string if there
    /// was none or it was transient.
    pub fn last_error_description(&self) -> String {
        lock(&self.shared.last_error)
            .map(|class| class.description().to_string())
            .unwrap_or_default()
    }

    pub fn send_key_event(&self, keysym: u32, down: bool) -> Result<(), SessionError> {
        self.shared.send(ClientMessage::KeyEvent { keysym, down })
    }

    pub fn send_pointer_event(&self, x: u16, y: u16, button_mask: u8) -> Result<(), SessionError> {
        self.shared.send(ClientMessage::PointerEvent { x, y, button_mask })
    }

    pub fn send_clipboard_text(&self, text: &str) -> Result<(), SessionError> {
        self.shared.send(ClientMessage::ClientCutText(text.to_string()))
    }

    pub fn request_framebuffer_update(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        incremental: bool,
    ) -> Result<(), SessionError> {
        self.shared.send(ClientMessage::FramebufferUpdateRequest {
            x,
            y,
            width,
            height,
            incremental,
        })
    }

    /// Requests a non-incremental update of the whole framebuffer.
    pub fn request_full_refresh(&self) -> Result<(), SessionError> {
        let (width, height) = self.shared.framebuffer.dimensions()?;
        let width = u16::try_from(width).unwrap_or(u16::MAX);
        let height = u16::try_from(height).unwrap_or(u16::MAX);
        self.request_framebuffer_update(0, 0, width, height, false)
    }

    /// Runs `f` with the current framebuffer under its lock.
    pub fn with_framebuffer<R>(
        &self,
        f: impl FnOnce(FramebufferView<'_>) -> R,
    ) -> Result<R, StoreError> {
        self.shared.framebuffer.with_snapshot(f)
    }

    /// Runs `f` with the current cursor under its lock.
    pub fn with_cursor<R>(&self, f: impl FnOnce(CursorView<'_>) -> R) -> Result<R, StoreError> {
        self.shared.cursor.with_snapshot(f)
    }
}
