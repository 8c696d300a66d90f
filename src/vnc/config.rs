//! Per-session connection settings.

/// RFB security type the client is willing to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityType {
    /// Accept whatever the server offers first.
    #[default]
    Any,
    /// Only accept this RFB security type id (2 = VNC auth, 19 = VeNCrypt, ...).
    Only(u8),
}

impl From<u8> for SecurityType {
    /// `0` selects [`SecurityType::Any`], as it does on the JNI boundary.
    fn from(id: u8) -> Self {
        match id {
            0 => SecurityType::Any,
            id => SecurityType::Only(id),
        }
    }
}

/// A host and port pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

/// Settings applied by `configure` and `set_proxy_destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub security_type: SecurityType,
    /// Draw the cursor locally from the cursor store instead of letting the
    /// server paint it into the framebuffer.
    pub use_local_cursor: bool,
    /// Final destination behind a repeater or proxy.
    pub proxy: Option<Destination>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            security_type: SecurityType::Any,
            use_local_cursor: true,
            proxy: None,
        }
    }
}
