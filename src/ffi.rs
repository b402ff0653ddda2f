//! FFI bindings for the SEI scoring engine
//!
//! This module provides C-compatible functions for calling the engine from other
//! languages. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `sei_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::EngineConfig;
use crate::pipeline::{evaluate_json, score_recording};
use crate::types::SessionRecording;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score a session recording JSON and return the report JSON.
///
/// # Safety
/// - `recording_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL (default configuration) or a valid C string.
/// - Returns a newly allocated string that must be freed with `sei_free_string`.
/// - Returns NULL on error; call `sei_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sei_evaluate_json(
    recording_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let recording = match cstr_to_string(recording_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid recording string pointer");
            return ptr::null_mut();
        }
    };

    let config = if config_json.is_null() {
        None
    } else {
        match cstr_to_string(config_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid config string (not UTF-8)");
                return ptr::null_mut();
            }
        }
    };

    match evaluate_json(&recording, config.as_deref()) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Return the default engine configuration as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `sei_free_string`.
#[no_mangle]
pub unsafe extern "C" fn sei_default_config_json() -> *mut c_char {
    clear_last_error();

    match EngineConfig::default().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Validate an engine configuration.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string.
/// - Returns 0 when valid, -1 otherwise (see `sei_last_error`).
#[no_mangle]
pub unsafe extern "C" fn sei_validate_config_json(config_json: *const c_char) -> i32 {
    clear_last_error();

    let json = match cstr_to_string(config_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid config string pointer");
            return -1;
        }
    };

    match EngineConfig::from_json(&json) {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Scorer Handle API
// ============================================================================

/// Opaque handle holding a validated configuration
pub struct SeiScorerHandle {
    config: EngineConfig,
}

/// Create a scorer from a configuration JSON (NULL for the default).
///
/// # Safety
/// - `config_json` may be NULL or a valid null-terminated C string.
/// - Must be freed with `sei_scorer_free`.
/// - Returns NULL on error; call `sei_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sei_scorer_new(config_json: *const c_char) -> *mut SeiScorerHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        EngineConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string (not UTF-8)");
                return ptr::null_mut();
            }
        };
        match EngineConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    Box::into_raw(Box::new(SeiScorerHandle { config }))
}

/// Free a scorer.
///
/// # Safety
/// - `scorer` must be a valid pointer returned by `sei_scorer_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sei_scorer_free(scorer: *mut SeiScorerHandle) {
    if !scorer.is_null() {
        drop(Box::from_raw(scorer));
    }
}

/// Score a session recording JSON with the scorer's configuration.
///
/// # Safety
/// - `scorer` must be a valid pointer returned by `sei_scorer_new`.
/// - `recording_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `sei_free_string`.
/// - Returns NULL on error; call `sei_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn sei_scorer_score(
    scorer: *const SeiScorerHandle,
    recording_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if scorer.is_null() {
        set_last_error("Null scorer pointer");
        return ptr::null_mut();
    }
    let handle = &*scorer;

    let json = match cstr_to_string(recording_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid recording string pointer");
            return ptr::null_mut();
        }
    };

    let recording: SessionRecording = match serde_json::from_str(&json) {
        Ok(r) => r,
        Err(e) => {
            set_last_error(&format!("Failed to parse input: invalid session recording: {}", e));
            return ptr::null_mut();
        }
    };

    match score_recording(&recording, &handle.config).and_then(|report| report.to_json()) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by SEI functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a SEI function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn sei_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next SEI function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn sei_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the engine version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn sei_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
