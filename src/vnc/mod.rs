//! Core VNC (Virtual Network Computing) viewer runtime.
//!
//! This module provides the parts of a Remote Framebuffer (RFB) client that sit
//! between a protocol engine and the host application: session lifecycle,
//! lock-protected framebuffer and cursor state, and an interruptible wait for
//! the message-processing loop. The byte-level protocol itself is supplied by
//! an implementation of [`ProtocolEngine`].
//!
//! # Architecture
//!
//! - **`session`**: [`VncClient`] drives the lifecycle and the processing loop,
//!   [`SessionHandle`] is its thread-safe view for input and rendering
//! - **`framebuffer`**: RGBA32 pixel storage with atomic resize semantics
//! - **`cursor`**: Cursor bitmap and hotspot, with a built-in fallback arrow
//! - **`events`**: Listener trait and the dispatcher the engine calls into
//! - **`interrupt`**: Cross-thread wake-up for a blocking `poll(2)` wait
//! - **`engine`**: The seam to the external protocol engine
//!
//! # Threading
//!
//! One processing thread owns the [`VncClient`] and calls
//! [`VncClient::process_messages`] in a loop. Any number of other threads hold
//! a [`SessionHandle`] to inject input, take render snapshots, or interrupt the
//! processing thread.
//!
//! # Example Flow
//!
//! ```ignore
//! let mut client = VncClient::create(engine, listener)?;
//! client.configure(SecurityType::Any, true)?;
//! client.connect("203.0.113.5", 1)?; // display :1, port 5901
//!
//! let handle = client.handle();
//! std::thread::spawn(move || loop {
//!     match client.process_messages(Duration::from_millis(500)) {
//!         Ok(Progress::Interrupted) | Err(_) => break client.cleanup(),
//!         Ok(_) => {}
//!     }
//! });
//!
//! handle.with_framebuffer(|fb| upload_texture(fb.width, fb.height, fb.data))?;
//! handle.interrupt();
//! ```

pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod events;
pub mod framebuffer;
pub mod interrupt;
pub mod session;

mod lock;

pub use config::{Destination, SecurityType, SessionConfig};
pub use cursor::{CursorStore, CursorView};
pub use engine::{
    ClientMessage, ConnectParams, MessageWriter, PixelFormat, ProtocolEngine, ServerInit,
};
pub use error::{
    AuthError, CursorError, EngineError, ErrorClass, FramebufferError, SessionError, StoreError,
};
pub use events::{Credential, CredentialKind, EventDispatcher, SessionListener};
pub use framebuffer::{FramebufferStore, FramebufferView};
pub use interrupt::{InterruptChannel, InterruptSignal, WaitOutcome};
pub use session::{ConnectionInfo, Progress, SessionHandle, SessionState, VncClient};

/// Default VNC port, also the base for display numbers.
pub const DEFAULT_PORT: u16 = 5900;

/// Ports below this value are treated as display numbers.
pub const DISPLAY_PORT_LIMIT: u16 = 100;

/// Maps a user-supplied port to a TCP port.
///
/// Values below [`DISPLAY_PORT_LIMIT`] are display numbers (`:1` is port 5901);
/// anything else is used verbatim.
pub fn normalize_port(port: u16) -> u16 {
    if port < DISPLAY_PORT_LIMIT {
        DEFAULT_PORT + port
    } else {
        port
    }
}
