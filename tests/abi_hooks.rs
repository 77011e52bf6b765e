// C ABI hooks driven from Rust. One test: the library state is process-wide.
use std::ffi::{CStr, c_void};
use std::ptr;
use std::thread;

use cryptoshare::abi::{
    csh_attach, csh_caller_state, csh_detach, csh_error, csh_error_free, csh_error_kind,
    csh_error_message, csh_get_errno, csh_get_state, csh_library_cleanup, csh_library_init,
    csh_locking_callback, csh_set_errno,
};
use cryptoshare::api::{ErrorKind, LOCK_MODE_LOCK, LOCK_MODE_UNLOCK, to_exit_code};

fn take_error(err: *mut csh_error) -> (i32, String) {
    assert!(!err.is_null());
    let kind = csh_error_kind(err);
    let message = unsafe { CStr::from_ptr(csh_error_message(err)) }
        .to_string_lossy()
        .into_owned();
    csh_error_free(err);
    (kind, message)
}

#[test]
fn abi_lifecycle_round_trip() {
    let mut err: *mut csh_error = ptr::null_mut();

    assert_eq!(csh_set_errno(1, &mut err), -1);
    let (kind, message) = take_error(err);
    assert_eq!(kind, to_exit_code(ErrorKind::State));
    assert!(message.contains("not loaded"));
    assert_eq!(csh_detach(), 0);

    err = ptr::null_mut();
    assert_eq!(csh_library_init(&mut err), 0);
    assert!(err.is_null());

    let mut code = 0;
    assert_eq!(csh_get_errno(&mut code, &mut err), -1);
    let (kind, _) = take_error(err);
    assert_eq!(kind, to_exit_code(ErrorKind::NotAttached));

    let mut context_value = 11u64;
    let context = &mut context_value as *mut u64 as *mut c_void;
    err = ptr::null_mut();
    assert_eq!(csh_attach(context, ptr::null_mut(), 3, 1, &mut err), 0);
    assert_eq!(csh_attach(context, ptr::null_mut(), 0, 0, &mut err), -1);
    let (kind, _) = take_error(err);
    assert_eq!(kind, to_exit_code(ErrorKind::AlreadyAttached));

    err = ptr::null_mut();
    for value in [0, -1, 42, i32::MIN, i32::MAX] {
        assert_eq!(csh_set_errno(value, &mut err), 0);
        assert_eq!(csh_get_errno(&mut code, &mut err), 0);
        assert_eq!(code, value);
    }

    let mut state = csh_caller_state {
        last_error: 0,
        env_selector: 0,
        context: ptr::null_mut(),
        stack: ptr::null_mut(),
    };
    assert_eq!(csh_get_state(&mut state, &mut err), 0);
    assert_eq!(state.context, context);
    assert!(state.stack.is_null());
    assert_eq!(state.env_selector, 3);
    assert_eq!(state.last_error, i32::MAX);

    csh_locking_callback(LOCK_MODE_LOCK, 0, c"abi_hooks.rs".as_ptr(), 1);
    csh_locking_callback(LOCK_MODE_UNLOCK, 0, c"abi_hooks.rs".as_ptr(), 2);

    let leftover = thread::spawn(|| {
        let mut err: *mut csh_error = ptr::null_mut();
        assert_eq!(csh_attach(ptr::null_mut(), ptr::null_mut(), 0, 0, &mut err), 0);
        let mut state = csh_caller_state {
            last_error: -1,
            env_selector: -1,
            context: ptr::null_mut(),
            stack: ptr::null_mut(),
        };
        assert_eq!(csh_get_state(&mut state, &mut err), 0);
        assert_eq!(state.last_error, 0);
        assert_eq!(state.env_selector, 3);
        csh_locking_callback(LOCK_MODE_LOCK, 1, ptr::null(), 0);
    });
    leftover.join().expect("join");

    assert_eq!(csh_detach(), 0);
    assert_eq!(csh_detach(), 0);
    csh_library_cleanup();
    csh_library_cleanup();

    err = ptr::null_mut();
    assert_eq!(csh_library_init(&mut err), 0);
    assert_eq!(csh_get_errno(&mut code, &mut err), -1);
    let (kind, _) = take_error(err);
    assert_eq!(kind, to_exit_code(ErrorKind::NotAttached));
    csh_library_cleanup();
}
