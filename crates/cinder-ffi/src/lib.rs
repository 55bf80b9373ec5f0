//! C FFI surface for cinder.
//!
//! Pattern: opaque TransportHandle + C strings + JSON serialization.
//! Intents go in as JSON, state snapshots and events come out as JSON, so
//! any host with a C FFI (Dart, Swift, Kotlin, Python) can drive playback.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::mpsc::Receiver;

use cinder_core::effects::import;
use cinder_core::{default_tracks, Intent, TrackEntry, Transport, TransportConfig, TransportEvent};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `cinder_string_free`).
#[no_mangle]
pub extern "C" fn cinder_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from cinder FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn cinder_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct TransportHandle {
    _private: [u8; 0],
}

struct TransportHandleInner {
    transport: Transport,
    events: Mutex<Receiver<TransportEvent>>,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Open a transport on the default output device, loaded with the built-in
/// synth tracks. `config_json` may be NULL for defaults.
#[no_mangle]
pub extern "C" fn cinder_open(config_json: *const c_char) -> *mut TransportHandle {
    clear_error();
    let config = match read_config(config_json) {
        Ok(c) => c,
        Err(e) => return err_handle(e),
    };
    match Transport::native(default_tracks(), config) {
        Ok(transport) => into_handle(transport),
        Err(e) => err_handle(e.to_string()),
    }
}

/// Open a transport that keeps time without producing sound.
#[no_mangle]
pub extern "C" fn cinder_open_headless(config_json: *const c_char) -> *mut TransportHandle {
    clear_error();
    let config = match read_config(config_json) {
        Ok(c) => c,
        Err(e) => return err_handle(e),
    };
    match Transport::headless(default_tracks(), config) {
        Ok(transport) => into_handle(transport),
        Err(e) => err_handle(e.to_string()),
    }
}

/// Stops playback and releases all resources.
#[no_mangle]
pub extern "C" fn cinder_close(handle: *mut TransportHandle) {
    if !handle.is_null() {
        unsafe {
            let inner = Box::from_raw(handle as *mut TransportHandleInner);
            inner.transport.shutdown();
        }
    }
}

/// Re-enable plays after the audio device came back.
#[no_mangle]
pub extern "C" fn cinder_recover_audio(handle: *mut TransportHandle) -> i32 {
    clear_error();
    match transport_ref(handle) {
        Ok(t) => {
            t.recover_audio();
            1
        }
        Err(e) => {
            set_error(e);
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Dispatch one intent, e.g. `{"action":"seek_to","percent":50}`.
/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn cinder_dispatch(handle: *mut TransportHandle, intent_json: *const c_char) -> i32 {
    clear_error();
    let transport = match transport_ref(handle) { Ok(t) => t, Err(e) => { set_error(e); return 0; } };
    let json_str = match read_cstr(intent_json) { Ok(s) => s, Err(e) => { set_error(e); return 0; } };
    let intent: Intent = match serde_json::from_str(&json_str) {
        Ok(i) => i,
        Err(e) => {
            set_error(format!("invalid intent: {}", e));
            return 0;
        }
    };
    match transport.dispatch(intent) {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.to_string());
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Current transport state as JSON (caller frees).
#[no_mangle]
pub extern "C" fn cinder_state(handle: *mut TransportHandle) -> *mut c_char {
    clear_error();
    match transport_ref(handle) {
        Ok(t) => json_to_cstr(&t.state()),
        Err(e) => err_null(e),
    }
}

/// The playlist as a JSON array of tracks (caller frees).
#[no_mangle]
pub extern "C" fn cinder_playlist(handle: *mut TransportHandle) -> *mut c_char {
    clear_error();
    match transport_ref(handle) {
        Ok(t) => json_to_cstr(&t.playlist()),
        Err(e) => err_null(e),
    }
}

/// Next pending event as JSON (caller frees), or NULL when none is queued.
#[no_mangle]
pub extern "C" fn cinder_poll_event(handle: *mut TransportHandle) -> *mut c_char {
    clear_error();
    let inner = match inner_ref(handle) {
        Ok(i) => i,
        Err(e) => return err_null(e),
    };
    let event = inner.events.lock().try_recv().ok();
    match event {
        Some(event) => json_to_cstr(&event),
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Append `[{"title","artist","locator"}, ...]` as stream tracks.
/// Returns the index of the first appended track, or -1 on error.
#[no_mangle]
pub extern "C" fn cinder_append(handle: *mut TransportHandle, entries_json: *const c_char) -> i32 {
    clear_error();
    let transport = match transport_ref(handle) { Ok(t) => t, Err(e) => { set_error(e); return -1; } };
    let json_str = match read_cstr(entries_json) { Ok(s) => s, Err(e) => { set_error(e); return -1; } };
    let entries: Vec<TrackEntry> = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => {
            set_error(format!("invalid entries: {}", e));
            return -1;
        }
    };
    if entries.is_empty() {
        set_error("no entries to append".to_string());
        return -1;
    }
    transport.append_entries(entries).start as i32
}

/// Import a file or directory of audio files.
/// Returns the index of the first appended track, or -1 if nothing was found.
#[no_mangle]
pub extern "C" fn cinder_import(handle: *mut TransportHandle, path: *const c_char) -> i32 {
    clear_error();
    let transport = match transport_ref(handle) { Ok(t) => t, Err(e) => { set_error(e); return -1; } };
    let path_str = match read_cstr(path) { Ok(s) => s, Err(e) => { set_error(e); return -1; } };
    let entries = import::entries_for_paths(&[path_str.as_str()]);
    if entries.is_empty() {
        set_error(format!("no audio files at {}", path_str));
        return -1;
    }
    transport.append_entries(entries).start as i32
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Returns the FFI API version.
#[no_mangle]
pub extern "C" fn cinder_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn into_handle(transport: Transport) -> *mut TransportHandle {
    let events = transport.subscribe();
    transport.start();
    Box::into_raw(Box::new(TransportHandleInner {
        transport,
        events: Mutex::new(events),
    })) as *mut TransportHandle
}

fn inner_ref<'a>(handle: *mut TransportHandle) -> Result<&'a TransportHandleInner, String> {
    if handle.is_null() {
        return Err("null transport handle".into());
    }
    Ok(unsafe { &*(handle as *mut TransportHandleInner) })
}

fn transport_ref<'a>(handle: *mut TransportHandle) -> Result<&'a Transport, String> {
    inner_ref(handle).map(|inner| &inner.transport)
}

fn read_config(ptr: *const c_char) -> Result<TransportConfig, String> {
    if ptr.is_null() {
        return Ok(TransportConfig::default());
    }
    let json_str = read_cstr(ptr)?;
    let value: serde_json::Value =
        serde_json::from_str(&json_str).map_err(|e| format!("invalid config: {}", e))?;
    Ok(TransportConfig::from_value(&value))
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_cstr(json),
        Err(e) => err_null(e.to_string()),
    }
}

fn to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(|c| c.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}

fn err_handle(msg: String) -> *mut TransportHandle {
    log::error!("cinder: open failed: {}", msg);
    set_error(msg);
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// FFI Integration Tests
// ---------------------------------------------------------------------------
