//! Protocol events and the listener they are forwarded to.
//!
//! The protocol engine calls into an [`EventDispatcher`] while it decodes. The
//! dispatcher applies framebuffer and cursor changes to the stores and
//! forwards everything else to the host's [`SessionListener`], synchronously,
//! on the processing thread.

use std::fmt;

use log::{debug, error, warn};

use super::cursor::CursorStore;
use super::error::{AuthError, CursorError, FramebufferError};
use super::framebuffer::FramebufferStore;

/// libvncclient-compatible credential type ids.
pub const CREDENTIAL_TYPE_X509: u32 = 1;
pub const CREDENTIAL_TYPE_USER: u32 = 2;

/// Kind of credential a security type asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Username and password. The only supported kind.
    UserPassword,
    Other(u32),
}

impl CredentialKind {
    pub fn from_id(id: u32) -> Self {
        match id {
            CREDENTIAL_TYPE_USER => CredentialKind::UserPassword,
            other => CredentialKind::Other(other),
        }
    }
}

/// Username and password supplied by the listener. Never stored by the
/// runtime beyond the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host callbacks for protocol events.
///
/// Called synchronously on the processing thread; a slow listener stalls the
/// session. Methods must not take a snapshot of a store from inside another
/// snapshot of the same store.
pub trait SessionListener: Send + Sync {
    /// Password for VNC authentication. Empty if none is available.
    fn password(&self) -> String {
        String::new()
    }

    /// Username and password, or `None` to abort authentication.
    fn credential(&self) -> Option<Credential> {
        None
    }

    fn bell(&self) {}

    fn clipboard_text(&self, _text: &str) {}

    /// Server-side pointer position. Return `true` if the listener handled
    /// it (for example by moving a locally drawn cursor).
    fn cursor_position(&self, _x: u16, _y: u16) -> bool {
        false
    }

    /// The framebuffer was reallocated. Always delivered before any pixel
    /// update for the new size.
    fn framebuffer_resized(&self, _width: u32, _height: u32) {}

    /// A batch of pixel updates has been applied; a new frame is ready.
    fn framebuffer_updated(&self) {}
}

/// The event surface a protocol engine drives during `connect` and
/// `process_messages`.
pub struct EventDispatcher<'a> {
    listener: &'a dyn SessionListener,
    framebuffer: &'a FramebufferStore,
    cursor: &'a CursorStore,
    auth_failure: Option<AuthError>,
}

impl<'a> EventDispatcher<'a> {
    pub fn new(
        listener: &'a dyn SessionListener,
        framebuffer: &'a FramebufferStore,
        cursor: &'a CursorStore,
    ) -> Self {
        Self {
            listener,
            framebuffer,
            cursor,
            auth_failure: None,
        }
    }

    pub fn password(&mut self) -> String {
        self.listener.password()
    }

    /// Requests a credential of the given kind.
    ///
    /// Only [`CredentialKind::UserPassword`] is supported. A declined request
    /// or an unsupported kind is remembered so the session reports an
    /// authentication failure.
    pub fn credential(&mut self, kind: CredentialKind) -> Result<Credential, AuthError> {
        match kind {
            CredentialKind::UserPassword => match self.listener.credential() {
                Some(credential) => Ok(credential),
                None => {
                    warn!("Credential request declined by listener");
                    self.auth_failure = Some(AuthError::Aborted);
                    Err(AuthError::Aborted)
                }
            },
            CredentialKind::Other(id) => {
                error!("Unsupported credential type {} requested", id);
                self.auth_failure = Some(AuthError::UnsupportedCredential(id));
                Err(AuthError::UnsupportedCredential(id))
            }
        }
    }

    pub fn bell(&mut self) {
        self.listener.bell();
    }

    pub fn clipboard_text(&mut self, text: &str) {
        self.listener.clipboard_text(text);
    }

    pub fn cursor_position(&mut self, x: u16, y: u16) -> bool {
        self.listener.cursor_position(x, y)
    }

    /// Reallocates the framebuffer and notifies the listener.
    ///
    /// The listener is called after the store lock is released but before this
    /// returns, so it sees the new size before the engine writes any pixels.
    /// Errors are fatal to the connection.
    pub fn resize_framebuffer(&mut self, width: u32, height: u32) -> Result<(), FramebufferError> {
        match self.framebuffer.reallocate(width, height) {
            Ok(_) => {
                self.listener.framebuffer_resized(width, height);
                Ok(())
            }
            Err(e) => {
                error!("Framebuffer resize to {}x{} failed: {}", width, height, e);
                Err(e)
            }
        }
    }

    /// Copies decoded RGBA pixels into the framebuffer.
    pub fn write_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), FramebufferError> {
        self.framebuffer.write_rect(x, y, width, height, pixels)
    }

    pub fn fill_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixel: [u8; 4],
    ) -> Result<(), FramebufferError> {
        self.framebuffer.fill_rect(x, y, width, height, pixel)
    }

    /// Installs a new cursor shape. Failure keeps the previous cursor and is
    /// not fatal to the connection.
    pub fn update_cursor(
        &mut self,
        buffer: &[u8],
        mask: &[u8],
        width: u16,
        height: u16,
        x_hot: u16,
        y_hot: u16,
    ) -> Result<(), CursorError> {
        self.cursor
            .update(buffer, mask, width, height, x_hot, y_hot)
            .inspect_err(|e| warn!("Keeping previous cursor: {}", e))
    }

    /// Signals the end of a framebuffer update batch.
    pub fn finished_update(&mut self) {
        debug!("Framebuffer update finished");
        self.listener.framebuffer_updated();
    }

    /// The credential failure raised during this dispatcher's lifetime, if any.
    pub(crate) fn auth_failure(&self) -> Option<AuthError> {
        self.auth_failure.clone()
    }
}
