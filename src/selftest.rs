// End-to-end lifecycle check: two callers, caller-local errno, one leftover swept at unload.
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use serde_json::{Value, json};

use cryptoshare::api::{
    AttachOptions, CallerId, ContextToken, Error, ErrorKind, Facility, FacilityConfig,
    LifecycleController, LifecycleState,
};

pub fn run_selftest(config: FacilityConfig) -> Result<Value, Error> {
    let controller = LifecycleController::new();
    let mut steps = Vec::new();

    let facility = controller.load(config)?;
    steps.push(step("load", format!("{:?}", controller.state())));

    let caller_a = CallerId::current();
    facility.attach(
        caller_a,
        AttachOptions::new().with_context(ContextToken::from_raw(0xA)),
    )?;
    steps.push(step("attach", format!("A={caller_a}")));

    let caller_b = attach_leftover_caller(&facility, 9)?;
    steps.push(step("attach", format!("B={caller_b}")));

    facility.set_error(caller_a, 5)?;
    expect_code(&facility, caller_a, 5)?;
    expect_code(&facility, caller_b, 9)?;
    steps.push(step("errno", "A=5 B=9".to_string()));

    facility.detach(caller_a);
    steps.push(step("detach", format!("A={caller_a}")));

    let report = controller.unload();
    steps.push(step("unload", format!("swept={}", report.swept)));

    let registry_empty = facility.registry().is_empty();
    let ok = report.swept == 1
        && registry_empty
        && report.teardown.is_clean()
        && controller.state() == LifecycleState::Unloaded;
    if !ok {
        return Err(Error::new(ErrorKind::Internal).with_message(format!(
            "selftest failed: swept={} registry_empty={registry_empty}",
            report.swept
        )));
    }

    Ok(json!({
        "ok": ok,
        "steps": steps,
        "swept": report.swept,
        "registry_empty": registry_empty,
    }))
}

/// Attaches from a separate thread, records `code`, and exits without detaching.
fn attach_leftover_caller(facility: &Arc<Facility>, code: i32) -> Result<CallerId, Error> {
    let (tx, rx) = mpsc::channel();
    let worker = {
        let facility = Arc::clone(facility);
        thread::spawn(move || {
            let caller = CallerId::current();
            let result = facility
                .attach(caller, AttachOptions::new().with_context(ContextToken::from_raw(0xB)))
                .and_then(|_| facility.set_error(caller, code))
                .map(|()| caller);
            let _ = tx.send(result);
        })
    };
    let result = rx
        .recv()
        .map_err(|err| Error::new(ErrorKind::Internal).with_source(err))?;
    worker
        .join()
        .map_err(|_| Error::new(ErrorKind::Internal).with_message("selftest caller panicked"))?;
    result
}

fn expect_code(facility: &Facility, caller: CallerId, expected: i32) -> Result<(), Error> {
    let actual = facility.get_error(caller)?;
    if actual != expected {
        return Err(Error::new(ErrorKind::Internal)
            .with_message(format!("errno for caller {caller}: expected {expected}, got {actual}")));
    }
    Ok(())
}

fn step(name: &str, detail: String) -> Value {
    json!({ "step": name, "detail": detail })
}
