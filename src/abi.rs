//! Purpose: C ABI bridge (libcryptoshare) for the wrapped crypto library and its host.
//! Exports: load/unload hooks, per-caller attach/detach, errno accessors, locking callback.
//! Role: The only module holding process-wide state; loader hooks carry no context pointer.
//! Invariants: Caller identity is the calling OS thread.
//! Invariants: Functions return 0 on success and -1 with an optional `csh_error` on failure.
//! Invariants: Locking-callback contract violations abort the process after logging.
//! Notes: Error kind codes match `to_exit_code`.
#![allow(non_camel_case_types)]

use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

use crate::core::caller::{CallerId, ContextToken};
use crate::core::config::FacilityConfig;
use crate::core::error::{Error, ErrorKind, to_exit_code};
use crate::core::lifecycle::{Facility, LifecycleController};
use crate::core::registry::AttachOptions;
use crate::logging::init_tracing;

static LIBRARY: LifecycleController = LifecycleController::new();

#[repr(C)]
pub struct csh_error {
    kind: i32,
    message: *mut c_char,
    caller: u64,
    resource: u64,
    has_caller: u8,
    has_resource: u8,
}

#[repr(C)]
#[derive(Debug)]
pub struct csh_caller_state {
    pub last_error: i32,
    pub env_selector: i64,
    pub context: *mut c_void,
    pub stack: *mut c_void,
}

/// Load hook. Reads `FacilityConfig` from the environment.
#[unsafe(no_mangle)]
pub extern "C" fn csh_library_init(out_err: *mut *mut csh_error) -> i32 {
    init_tracing("warn");
    let config = match FacilityConfig::from_env() {
        Ok(config) => config,
        Err(err) => return fail(out_err, err),
    };
    match LIBRARY.load(config) {
        Ok(_) => 0,
        Err(err) => fail(out_err, err),
    }
}

/// Unload hook. Sweeps callers that never detached.
#[unsafe(no_mangle)]
pub extern "C" fn csh_library_cleanup() {
    let report = LIBRARY.unload();
    if report.was_loaded {
        tracing::info!(
            swept = report.swept,
            released_slots = report.released_slots,
            "library unloaded"
        );
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn csh_attach(
    context: *mut c_void,
    stack: *mut c_void,
    version_app: i64,
    has_version_app: u32,
    out_err: *mut *mut csh_error,
) -> i32 {
    let caller = CallerId::current();
    let facility = match loaded_facility(caller) {
        Ok(facility) => facility,
        Err(err) => return fail(out_err, err),
    };
    let mut options = AttachOptions::new()
        .with_context(ContextToken::from_ptr(context))
        .with_stack(ContextToken::from_ptr(stack));
    if has_version_app != 0 {
        options = options.with_version_app(version_app);
    }
    match facility.attach(caller, options) {
        Ok(_) => 0,
        Err(err) => fail(out_err, err),
    }
}

/// Idempotent; succeeds even when nothing is loaded or attached.
#[unsafe(no_mangle)]
pub extern "C" fn csh_detach() -> i32 {
    if let Some(facility) = LIBRARY.facility() {
        facility.detach(CallerId::current());
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn csh_get_state(
    out_state: *mut csh_caller_state,
    out_err: *mut *mut csh_error,
) -> i32 {
    if out_state.is_null() {
        return fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("out_state is null"),
        );
    }
    let caller = CallerId::current();
    let facility = match loaded_facility(caller) {
        Ok(facility) => facility,
        Err(err) => return fail(out_err, err),
    };
    let Some(state) = facility.lookup(caller) else {
        return fail(
            out_err,
            Error::new(ErrorKind::NotAttached)
                .with_message("caller has no state; attach first")
                .with_caller(caller),
        );
    };
    unsafe {
        *out_state = csh_caller_state {
            last_error: state.last_error,
            env_selector: state.env_selector,
            context: state.context.as_ptr(),
            stack: state.stack.as_ptr(),
        };
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn csh_get_errno(out_code: *mut i32, out_err: *mut *mut csh_error) -> i32 {
    if out_code.is_null() {
        return fail(
            out_err,
            Error::new(ErrorKind::Usage).with_message("out_code is null"),
        );
    }
    let caller = CallerId::current();
    let code = match loaded_facility(caller).and_then(|facility| facility.get_error(caller)) {
        Ok(code) => code,
        Err(err) => return fail(out_err, err),
    };
    unsafe {
        *out_code = code;
    }
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn csh_set_errno(code: i32, out_err: *mut *mut csh_error) -> i32 {
    let caller = CallerId::current();
    match loaded_facility(caller).and_then(|facility| facility.set_error(caller, code)) {
        Ok(()) => 0,
        Err(err) => fail(out_err, err),
    }
}

/// Locking callback in the classic `(mode, type, file, line)` shape.
#[unsafe(no_mangle)]
pub extern "C" fn csh_locking_callback(
    mode: c_int,
    kind: c_int,
    file: *const c_char,
    line: c_int,
) {
    let caller = CallerId::current();
    let result = loaded_facility(caller)
        .and_then(|facility| facility.locking_callback(mode, kind, caller));
    if let Err(err) = result {
        fatal(&err, file, line);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn csh_error_free(err: *mut csh_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
        }
    }
}

/// Reads back an error's kind code; 0 for a null error.
#[unsafe(no_mangle)]
pub extern "C" fn csh_error_kind(err: *const csh_error) -> i32 {
    if err.is_null() {
        return 0;
    }
    unsafe { (*err).kind }
}

/// Borrowed message pointer, valid until `csh_error_free`.
#[unsafe(no_mangle)]
pub extern "C" fn csh_error_message(err: *const csh_error) -> *const c_char {
    if err.is_null() {
        return ptr::null();
    }
    unsafe { (*err).message }
}

fn loaded_facility(caller: CallerId) -> Result<Arc<Facility>, Error> {
    LIBRARY.facility().ok_or_else(|| {
        Error::new(ErrorKind::State)
            .with_message("library is not loaded")
            .with_caller(caller)
    })
}

fn fatal(err: &Error, file: *const c_char, line: c_int) -> ! {
    let file = if file.is_null() {
        "unknown".to_string()
    } else {
        unsafe { CStr::from_ptr(file) }.to_string_lossy().into_owned()
    };
    tracing::error!(error = %err, file = %file, line, "locking callback contract violation");
    eprintln!("cryptoshare: fatal: {err} at {file}:{line}");
    std::process::abort();
}

fn fail(out_err: *mut *mut csh_error, err: Error) -> i32 {
    if err.kind().is_contract_violation() {
        tracing::error!(error = %err, "contract violation");
    } else {
        tracing::debug!(error = %err, "call failed");
    }
    if out_err.is_null() {
        return -1;
    }
    let error = Box::new(csh_error {
        kind: to_exit_code(err.kind()),
        message: to_c_string(&err.to_string()),
        caller: err.caller().map(CallerId::as_raw).unwrap_or(0),
        resource: err.resource().map(|resource| resource as u64).unwrap_or(0),
        has_caller: u8::from(err.caller().is_some()),
        has_resource: u8::from(err.resource().is_some()),
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    -1
}

fn to_c_string(input: &str) -> *mut c_char {
    CString::new(input)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}
