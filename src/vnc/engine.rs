//! The seam to the external RFB protocol engine.
//!
//! The viewer runtime does not parse the wire protocol. A [`ProtocolEngine`]
//! implementation performs the handshake, decodes server messages and encodes
//! client messages; it reports everything it decodes through the
//! [`EventDispatcher`] it is handed.

use std::os::fd::RawFd;

use super::config::{Destination, SecurityType};
use super::error::EngineError;
use super::events::EventDispatcher;

/// Pixel format requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_colour: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// 32 bpp, R G B X in memory order. The only format the stores accept.
    pub const RGBA32: PixelFormat = PixelFormat {
        bits_per_pixel: 32,
        depth: 24,
        big_endian: false,
        true_colour: true,
        red_max: 255,
        green_max: 255,
        blue_max: 255,
        red_shift: 0,
        green_shift: 8,
        blue_shift: 16,
    };
}

/// Everything the engine needs to open and negotiate a connection.
#[derive(Debug, Clone)]
pub struct ConnectParams<'a> {
    pub host: &'a str,
    /// Already normalised; display numbers have been converted.
    pub port: u16,
    pub security_type: SecurityType,
    /// Ask the server for cursor shape updates instead of painting the cursor.
    pub use_local_cursor: bool,
    pub proxy: Option<&'a Destination>,
    pub pixel_format: PixelFormat,
}

/// Server details reported after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub desktop_name: String,
    pub width: u32,
    pub height: u32,
    /// Whether the transport is encrypted (TLS, VeNCrypt, ...).
    pub encrypted: bool,
}

/// Client-to-server messages the runtime asks the engine to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    KeyEvent {
        keysym: u32,
        down: bool,
    },
    PointerEvent {
        x: u16,
        y: u16,
        button_mask: u8,
    },
    ClientCutText(String),
    FramebufferUpdateRequest {
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        incremental: bool,
    },
}

/// Encodes and sends client messages.
///
/// Used from input threads while the processing thread is blocked in a
/// read, so it must not share a lock with the decoding side.
pub trait MessageWriter: Send {
    fn write_message(&mut self, message: &ClientMessage) -> Result<(), EngineError>;
}

/// An RFB protocol implementation driven by [`VncClient`](super::VncClient).
///
/// All methods except the writer run on the processing thread.
pub trait ProtocolEngine: Send {
    /// Connects to `params.host:params.port` and runs the handshake.
    ///
    /// Credentials are requested through `events`. The engine may announce
    /// the initial framebuffer size through
    /// [`EventDispatcher::resize_framebuffer`]; if it does not, the runtime
    /// sizes the framebuffer from the returned [`ServerInit`].
    fn connect(
        &mut self,
        params: &ConnectParams<'_>,
        events: &mut EventDispatcher<'_>,
    ) -> Result<ServerInit, EngineError>;

    /// Returns a writer for client messages. Called once after `connect`.
    fn message_writer(&mut self) -> Result<Box<dyn MessageWriter>, EngineError>;

    /// Descriptor that becomes readable when server data arrives.
    fn readiness_fd(&self) -> Option<RawFd>;

    /// Whether decoded-but-unprocessed bytes are already buffered, in which
    /// case the runtime skips the wait.
    fn has_buffered_data(&self) -> bool {
        false
    }

    /// Decodes and handles exactly one server message.
    fn handle_server_message(
        &mut self,
        events: &mut EventDispatcher<'_>,
    ) -> Result<(), EngineError>;

    /// Closes the connection and frees engine resources.
    fn shutdown(&mut self);
}
