//! JNI bindings for the VNC viewer runtime, allowing a managed `VncClient` class to drive
//! a session from Java/Android.
//!
//! Each managed `VncClient` owns one native session, passed back and forth as a `jlong`
//! pointer. Protocol events are delivered to the managed object through its `cb*` methods
//! on the thread that calls `nativeProcessServerMessage`.
//!
//! The protocol engine is not part of this crate. The embedding library registers a
//! factory with [`register_engine_factory`] before the first `nativeClientCreate`.

use jni::JNIEnv;
use jni::JavaVM;
use jni::objects::{GlobalRef, JClass, JObject, JString, JValue};
use jni::sys::{jboolean, jint, jintArray, jlong, jobject, jstring, JNI_FALSE, JNI_TRUE};
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::vnc::{
    Credential, Progress, ProtocolEngine, SecurityType, SessionHandle, SessionListener, VncClient,
};

/// Creates a fresh protocol engine for each new session.
pub type EngineFactory = Box<dyn Fn() -> Box<dyn ProtocolEngine> + Send + Sync>;

/// Global engine factory, set once by the embedding library.
static ENGINE_FACTORY: OnceCell<EngineFactory> = OnceCell::new();

/// Signature of the managed `UserCredential` return type.
const CREDENTIAL_SIG: &str = "()Lnet/christianbeier/droidvnc_ng/viewer/UserCredential;";
/// Managed `ConnectionInfo` class. Constructor arguments must stay in sync with
/// `nativeGetConnectionInfo`.
const CONNECTION_INFO_CLASS: &str =
    "net/christianbeier/droidvnc_ng/viewer/VncClient$ConnectionInfo";

/// `nativeProcessServerMessage` results.
const PROCESS_PROGRESS: jint = 1;
const PROCESS_IDLE: jint = 0;
const PROCESS_FATAL: jint = -1;

/// Registers the protocol engine used by all sessions created over JNI.
///
/// # Returns
///
/// `false` if a factory was already registered; the first one stays in effect.
pub fn register_engine_factory(factory: EngineFactory) -> bool {
    ENGINE_FACTORY.set(factory).is_ok()
}

/// Native side of a managed `VncClient`.
struct NativeClient {
    /// Locked by the processing thread for the duration of each call.
    client: Mutex<VncClient>,
    /// Lock-free access for input, rendering and interruption.
    handle: SessionHandle,
}

/// Resolves a `jlong` handed out by `nativeClientCreate`.
///
/// # Safety
///
/// `ptr` must be 0 or a pointer returned by `nativeClientCreate` that has not yet been
/// passed to `nativeCleanup`.
unsafe fn native_client<'a>(ptr: jlong) -> Option<&'a NativeClient> {
    let client = (ptr as *const NativeClient).as_ref();
    if client.is_none() {
        error!("Native client pointer is null");
    }
    client
}

fn to_jboolean(value: bool) -> jboolean {
    if value { JNI_TRUE } else { JNI_FALSE }
}

fn clamp_u16(value: jint) -> u16 {
    u16::try_from(value.max(0)).unwrap_or(u16::MAX)
}

fn clamp_jint(value: u32) -> jint {
    jint::try_from(value).unwrap_or(jint::MAX)
}

/// Forwards session events to the managed `VncClient` object.
struct JniListener {
    vm: JavaVM,
    client: GlobalRef,
}

impl JniListener {
    /// Attaches to the JVM and runs `f`. JNI failures and pending Java exceptions are
    /// logged and cleared so they cannot leak into the next callback.
    fn with_env<R>(
        &self,
        callback: &str,
        f: impl FnOnce(&mut JNIEnv) -> jni::errors::Result<R>,
    ) -> Option<R> {
        let mut env = match self.vm.attach_current_thread() {
            Ok(env) => env,
            Err(e) => {
                error!("Failed to attach to Java thread for {}: {}", callback, e);
                return None;
            }
        };

        match f(&mut *env) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Failed to call {}: {}", callback, e);
                if env.exception_check().unwrap_or(false) {
                    let _ = env.exception_describe();
                    let _ = env.exception_clear();
                }
                None
            }
        }
    }
}

fn read_string_field(env: &mut JNIEnv, obj: &JObject, name: &str) -> jni::errors::Result<String> {
    let value = env.get_field(obj, name, "Ljava/lang/String;")?.l()?;
    if value.is_null() {
        return Ok(String::new());
    }
    let value = JString::from(value);
    let text: String = env.get_string(&value)?.into();
    env.delete_local_ref(value)?;
    Ok(text)
}

impl SessionListener for JniListener {
    fn password(&self) -> String {
        self.with_env("cbGetPassword", |env| {
            let value = env
                .call_method(&self.client, "cbGetPassword", "()Ljava/lang/String;", &[])?
                .l()?;
            if value.is_null() {
                return Ok(String::new());
            }
            let value = JString::from(value);
            let password: String = env.get_string(&value)?.into();
            env.delete_local_ref(value)?;
            Ok(password)
        })
        .unwrap_or_default()
    }

    fn credential(&self) -> Option<Credential> {
        self.with_env("cbGetCredential", |env| {
            let obj = env.call_method(&self.client, "cbGetCredential", CREDENTIAL_SIG, &[])?.l()?;
            if obj.is_null() {
                return Ok(None);
            }
            let username = read_string_field(env, &obj, "username")?;
            let password = read_string_field(env, &obj, "password")?;
            env.delete_local_ref(obj)?;
            Ok(Some(Credential { username, password }))
        })
        .flatten()
    }

    fn bell(&self) {
        self.with_env("cbBell", |env| env.call_method(&self.client, "cbBell", "()V", &[])?.v());
    }

    fn clipboard_text(&self, text: &str) {
        self.with_env("cbGotXCutText", |env| {
            let jtext = env.new_string(text)?;
            env.call_method(
                &self.client,
                "cbGotXCutText",
                "(Ljava/lang/String;)V",
                &[JValue::Object(&jtext)],
            )?
            .v()?;
            env.delete_local_ref(jtext)
        });
    }

    fn cursor_position(&self, x: u16, y: u16) -> bool {
        self.with_env("cbHandleCursorPos", |env| {
            env.call_method(
                &self.client,
                "cbHandleCursorPos",
                "(II)Z",
                &[JValue::Int(jint::from(x)), JValue::Int(jint::from(y))],
            )?
            .z()
        })
        .unwrap_or(false)
    }

    fn framebuffer_resized(&self, width: u32, height: u32) {
        self.with_env("cbFramebufferSizeChanged", |env| {
            env.call_method(
                &self.client,
                "cbFramebufferSizeChanged",
                "(II)V",
                &[JValue::Int(clamp_jint(width)), JValue::Int(clamp_jint(height))],
            )?
            .v()
        });
    }

    fn framebuffer_updated(&self) {
        self.with_env("cbFinishedFrameBufferUpdate", |env| {
            env.call_method(&self.client, "cbFinishedFrameBufferUpdate", "()V", &[])?.v()
        });
    }
}

/// JNI entry point to initialize the native library.
///
/// Should be called once from the managed class's static initializer. Installs the Android
/// logger so the runtime's log output reaches logcat.
///
/// # Arguments
///
/// * `_env` - The JNI environment.
/// * `_class` - The Java class from which this method is called.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_initLibrary(
    _env: JNIEnv,
    _class: JClass,
) {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("DroidVNC-Viewer")
    );

    info!("VNC viewer native library initialized");
}

/// JNI entry point to create a native session for a managed `VncClient`.
///
/// # Arguments
///
/// * `env` - The JNI environment.
/// * `thiz` - The managed `VncClient`; a global reference is kept for callbacks.
///
/// # Returns
///
/// The native client pointer, or `0` on failure.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeClientCreate(
    env: JNIEnv,
    thiz: JObject,
) -> jlong {
    let factory = match ENGINE_FACTORY.get() {
        Some(factory) => factory,
        None => {
            error!("No protocol engine registered");
            return 0;
        }
    };

    let vm = match env.get_java_vm() {
        Ok(vm) => vm,
        Err(e) => {
            error!("Failed to get Java VM: {}", e);
            return 0;
        }
    };

    let managed = match env.new_global_ref(&thiz) {
        Ok(global_ref) => global_ref,
        Err(e) => {
            error!("Failed to create global reference to VncClient: {}", e);
            return 0;
        }
    };

    let listener = Arc::new(JniListener { vm, client: managed });
    match VncClient::create(factory(), listener) {
        Ok(client) => {
            let handle = client.handle();
            if !handle.is_interruptible() {
                warn!("Session created without interrupt support");
            }
            let native = Box::new(NativeClient {
                client: Mutex::new(client),
                handle,
            });
            Box::into_raw(native) as jlong
        }
        Err(e) => {
            error!("Failed to create VNC client: {}", e);
            0
        }
    }
}

/// JNI entry point to configure security and cursor handling before connecting.
///
/// # Arguments
///
/// * `client_ptr` - Native client pointer.
/// * `security_type` - RFB security type id, or `0` to accept any.
/// * `use_local_cursor` - Whether the app draws the cursor itself.
///
/// # Returns
///
/// `JNI_TRUE` on success, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeConfigure(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    security_type: jint,
    use_local_cursor: jboolean,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let security_type = match u8::try_from(security_type) {
        Ok(id) => SecurityType::from(id),
        Err(_) => {
            error!("Invalid security type: {}", security_type);
            return JNI_FALSE;
        }
    };

    match native.client.lock() {
        Ok(mut client) => match client.configure(security_type, use_local_cursor == JNI_TRUE) {
            Ok(()) => JNI_TRUE,
            Err(e) => {
                error!("Failed to configure client: {}", e);
                JNI_FALSE
            }
        },
        Err(e) => {
            error!("Failed to lock client: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to record the destination behind a repeater or proxy.
///
/// # Arguments
///
/// * `env` - The JNI environment.
/// * `client_ptr` - Native client pointer.
/// * `host` - Destination host.
/// * `port` - Destination port.
///
/// # Returns
///
/// `JNI_TRUE` on success, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeSetDest(
    mut env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    host: JString,
    port: jint,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let host_str: String = match env.get_string(&host) {
        Ok(s) => s.into(),
        Err(e) => {
            error!("Failed to get destination host: {}", e);
            return JNI_FALSE;
        }
    };

    let port = match u16::try_from(port) {
        Ok(p) => p,
        Err(_) => {
            error!("Invalid destination port: {}", port);
            return JNI_FALSE;
        }
    };

    match native.client.lock() {
        Ok(mut client) => {
            client.set_proxy_destination(host_str, port);
            JNI_TRUE
        }
        Err(e) => {
            error!("Failed to lock client: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to connect to a server and run the handshake.
///
/// Blocks until the handshake succeeds or fails. Credential callbacks are invoked on the
/// calling thread.
///
/// # Arguments
///
/// * `env` - The JNI environment.
/// * `client_ptr` - Native client pointer.
/// * `host` - Server host name or address.
/// * `port` - Server port, or a display number below 100.
///
/// # Returns
///
/// `JNI_TRUE` if connected, `JNI_FALSE` otherwise. See `nativeGetLastErrorStr`.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeInit(
    mut env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    host: JString,
    port: jint,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let host_str: String = match env.get_string(&host) {
        Ok(s) => s.into(),
        Err(e) => {
            error!("Failed to get host: {}", e);
            return JNI_FALSE;
        }
    };

    let port = match u16::try_from(port) {
        Ok(p) => p,
        Err(_) => {
            error!("Invalid port: {} (must be 0-65535)", port);
            return JNI_FALSE;
        }
    };

    let mut client = match native.client.lock() {
        Ok(guard) => guard,
        Err(e) => {
            error!("Failed to lock client: {}", e);
            return JNI_FALSE;
        }
    };

    match client.connect(&host_str, port) {
        Ok(()) => JNI_TRUE,
        Err(e) if e.is_auth() => {
            warn!("Authentication with {}:{} failed: {}", host_str, port, e);
            JNI_FALSE
        }
        Err(e) => {
            error!("Failed to connect to {}:{}: {}", host_str, port, e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to wait for and handle one server message.
///
/// # Arguments
///
/// * `client_ptr` - Native client pointer.
/// * `u_sec_timeout` - Maximum wait in microseconds.
///
/// # Returns
///
/// `1` if a message was handled, `0` on timeout or interrupt, `-1` on a fatal error.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeProcessServerMessage(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    u_sec_timeout: jint,
) -> jint {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return PROCESS_FATAL;
    };

    let timeout = Duration::from_micros(u64::try_from(u_sec_timeout).unwrap_or(0));

    let mut client = match native.client.lock() {
        Ok(guard) => guard,
        Err(e) => {
            error!("Failed to lock client: {}", e);
            return PROCESS_FATAL;
        }
    };

    match client.process_messages(timeout) {
        Ok(Progress::Processed) => PROCESS_PROGRESS,
        Ok(Progress::TimedOut | Progress::Interrupted) => PROCESS_IDLE,
        Err(e) => {
            error!("Failed to process server message: {}", e);
            PROCESS_FATAL
        }
    }
}

/// JNI entry point to wake a thread blocked in `nativeProcessServerMessage`.
///
/// Safe to call from any thread.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeInterrupt(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
) {
    if let Some(native) = unsafe { native_client(client_ptr) } {
        native.handle.interrupt();
    }
}

/// JNI entry point to send a key event.
///
/// # Arguments
///
/// * `key` - X11 keysym.
/// * `is_down` - Whether the key is pressed.
///
/// # Returns
///
/// `JNI_TRUE` if the event was sent, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeSendKeyEvent(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    key: jlong,
    is_down: jboolean,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let keysym = match u32::try_from(key) {
        Ok(k) => k,
        Err(_) => {
            error!("Invalid keysym: {}", key);
            return JNI_FALSE;
        }
    };

    match native.handle.send_key_event(keysym, is_down == JNI_TRUE) {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            error!("Failed to send key event: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to send a pointer event.
///
/// Coordinates are clamped to the protocol's 16-bit range.
///
/// # Returns
///
/// `JNI_TRUE` if the event was sent, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeSendPointerEvent(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    x: jint,
    y: jint,
    mask: jint,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let button_mask = (mask & 0xFF) as u8;
    match native.handle.send_pointer_event(clamp_u16(x), clamp_u16(y), button_mask) {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            error!("Failed to send pointer event: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to send clipboard text to the server.
///
/// # Returns
///
/// `JNI_TRUE` if the text was sent, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeSendCutText(
    mut env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    text: JString,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let text_str: String = match env.get_string(&text) {
        Ok(s) => s.into(),
        Err(e) => {
            error!("Failed to get cut text: {}", e);
            return JNI_FALSE;
        }
    };

    match native.handle.send_clipboard_text(&text_str) {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            error!("Failed to send cut text: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to request a framebuffer update for a region.
///
/// # Returns
///
/// `JNI_TRUE` if the request was sent, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeSendFrameBufferUpdateRequest(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    x: jint,
    y: jint,
    w: jint,
    h: jint,
    incremental: jboolean,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    match native.handle.request_framebuffer_update(
        clamp_u16(x),
        clamp_u16(y),
        clamp_u16(w),
        clamp_u16(h),
        incremental == JNI_TRUE,
    ) {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            error!("Failed to send framebuffer update request: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to request a full, non-incremental refresh.
///
/// # Returns
///
/// `JNI_TRUE` if the request was sent, `JNI_FALSE` otherwise.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeRefreshFrameBuffer(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    match native.handle.request_full_refresh() {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            error!("Failed to request full refresh: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to build a managed `ConnectionInfo` for the current session.
///
/// # Returns
///
/// A `ConnectionInfo` object, or `null` if the session is not connected.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeGetConnectionInfo(
    mut env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
) -> jobject {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return std::ptr::null_mut();
    };

    let info = match native.handle.connection_info() {
        Ok(info) => info,
        Err(e) => {
            error!("Connection info unavailable: {}", e);
            return std::ptr::null_mut();
        }
    };

    let desktop_name = match env.new_string(&info.desktop_name) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create desktop name string: {}", e);
            return std::ptr::null_mut();
        }
    };

    let args = [
        JValue::Object(&desktop_name),
        JValue::Int(clamp_jint(info.width)),
        JValue::Int(clamp_jint(info.height)),
        JValue::Bool(to_jboolean(info.encrypted)),
    ];
    match env.new_object(CONNECTION_INFO_CLASS, "(Ljava/lang/String;IIZ)V", &args) {
        Ok(obj) => obj.into_raw(),
        Err(e) => {
            error!("Failed to construct ConnectionInfo: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// JNI entry point to describe the most recent connection failure.
///
/// # Returns
///
/// A user-facing description, or an empty string if there is nothing to report.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeGetLastErrorStr(
    env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
) -> jstring {
    let description = match unsafe { native_client(client_ptr) } {
        Some(native) => native.handle.last_error_description(),
        None => String::new(),
    };

    match env.new_string(description) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            error!("Failed to create error string: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// JNI entry point to copy the framebuffer into a direct `ByteBuffer`.
///
/// # Arguments
///
/// * `env` - The JNI environment.
/// * `client_ptr` - Native client pointer.
/// * `buffer` - A direct `ByteBuffer` of at least `width * height * 4` bytes.
///
/// # Returns
///
/// `JNI_TRUE` if the frame was copied, `JNI_FALSE` if the buffer is too small or invalid.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeCopyFrameBuffer(
    env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    buffer: JObject,
) -> jboolean {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return JNI_FALSE;
    };

    let Some((buffer_ptr, buffer_capacity)) = direct_buffer(&env, &buffer) else {
        return JNI_FALSE;
    };
    // SAFETY: a direct buffer's memory stays valid while `buffer` is referenced, which
    // holds for the duration of this call.
    let target = unsafe { std::slice::from_raw_parts_mut(buffer_ptr, buffer_capacity) };

    match native.handle.with_framebuffer(|fb| copy_into(target, fb.data)) {
        Ok(copied) => to_jboolean(copied),
        Err(e) => {
            error!("Failed to read framebuffer: {}", e);
            JNI_FALSE
        }
    }
}

/// JNI entry point to copy the cursor bitmap into a direct `ByteBuffer`.
///
/// # Returns
///
/// `[width, height, xHot, yHot]`, or `null` if the buffer is too small or invalid.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeCopyCursor(
    env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
    buffer: JObject,
) -> jintArray {
    let Some(native) = (unsafe { native_client(client_ptr) }) else {
        return std::ptr::null_mut();
    };

    let Some((buffer_ptr, buffer_capacity)) = direct_buffer(&env, &buffer) else {
        return std::ptr::null_mut();
    };
    // SAFETY: as in `nativeCopyFrameBuffer`.
    let target = unsafe { std::slice::from_raw_parts_mut(buffer_ptr, buffer_capacity) };

    let shape = native.handle.with_cursor(|cursor| {
        copy_into(target, cursor.data).then(|| {
            [
                jint::from(cursor.width),
                jint::from(cursor.height),
                jint::from(cursor.x_hot),
                jint::from(cursor.y_hot),
            ]
        })
    });

    let shape = match shape {
        Ok(Some(shape)) => shape,
        Ok(None) => return std::ptr::null_mut(),
        Err(e) => {
            error!("Failed to read cursor: {}", e);
            return std::ptr::null_mut();
        }
    };

    let array = match env.new_int_array(shape.len() as jint) {
        Ok(array) => array,
        Err(e) => {
            error!("Failed to allocate cursor info array: {}", e);
            return std::ptr::null_mut();
        }
    };
    if let Err(e) = env.set_int_array_region(&array, 0, &shape) {
        error!("Failed to fill cursor info array: {}", e);
        return std::ptr::null_mut();
    }
    array.into_raw()
}

/// Resolves a direct `ByteBuffer` to its address and capacity.
fn direct_buffer(env: &JNIEnv, buffer: &JObject) -> Option<(*mut u8, usize)> {
    let buffer_ptr = match env.get_direct_buffer_address(buffer.into()) {
        Ok(ptr) => ptr,
        Err(e) => {
            error!("Failed to get buffer address: {}", e);
            return None;
        }
    };

    let buffer_capacity = match env.get_direct_buffer_capacity(buffer.into()) {
        Ok(cap) => cap,
        Err(e) => {
            error!("Failed to get buffer capacity: {}", e);
            return None;
        }
    };

    Some((buffer_ptr, buffer_capacity))
}

fn copy_into(target: &mut [u8], source: &[u8]) -> bool {
    if target.len() < source.len() {
        error!("Target buffer too small: {} < {}", target.len(), source.len());
        return false;
    }
    target[..source.len()].copy_from_slice(source);
    true
}

/// JNI entry point to release a native session.
///
/// The managed side must have stopped its processing thread first; this blocks until any
/// in-flight `nativeProcessServerMessage` call returns.
///
/// # Arguments
///
/// * `client_ptr` - Native client pointer; invalid after this call.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn Java_net_christianbeier_droidvnc_1ng_viewer_VncClient_nativeCleanup(
    _env: JNIEnv,
    _thiz: JObject,
    client_ptr: jlong,
) {
    if client_ptr == 0 {
        warn!("nativeCleanup called with null client");
        return;
    }

    // SAFETY: `client_ptr` came from `Box::into_raw` in `nativeClientCreate` and the managed
    // side drops its copy after this call.
    let native = unsafe { Box::from_raw(client_ptr as *mut NativeClient) };
    let client = native.client.into_inner().unwrap_or_else(PoisonError::into_inner);
    client.cleanup();
}
