//! DroidVNC-NG Rust VNC Viewer Runtime
//!
//! This crate provides the native core of a VNC viewer for Android: session lifecycle,
//! thread-safe framebuffer and cursor state, and an interruptible message loop. The RFB
//! wire protocol is delegated to a pluggable protocol engine.
//!
//! # Modules
//!
//! - `vnc`: Contains the core VNC viewer runtime.
//! - `vnc_jni`: Provides the JNI bindings for the viewer to interface with Java code.
//! - `logging`: Routes the crate's log output on non-Android hosts.

pub mod logging;
pub mod vnc;
pub mod vnc_jni;

pub use vnc::*;
pub use vnc_jni::register_engine_factory;
