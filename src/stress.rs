// Contention harness for the registry and lock table.
//
// Purpose:
// - Drive many concurrent callers through attach, errno round-trips, locking-callback
//   pairs, and detach against one loaded facility.
// - Emit machine-readable JSON to stdout and a human-readable table to stderr.
//
// Design notes:
// - Some callers deliberately skip detach so the unload sweep is exercised every run.
// - Threads, not processes: caller identity is per thread.

use std::io::{self, Write};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use cryptoshare::api::{
    AttachOptions, CallerId, ContextToken, Error, ErrorKind, Facility, FacilityConfig,
    LOCK_MODE_LOCK, LOCK_MODE_UNLOCK, LifecycleController, LockProvider,
};

#[derive(Clone, Debug)]
pub struct StressArgs {
    pub callers: usize,
    pub iterations: u64,
    pub leak: usize,
    pub format: StressFormat,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StressFormat {
    Json,
    Table,
    Both,
}

impl StressFormat {
    pub fn parse(input: &str) -> Result<Self, Error> {
        match input.trim() {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "both" => Ok(Self::Both),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message("invalid --format (use json|table|both)")),
        }
    }
}

struct CallerOutcome {
    caller: CallerId,
    elapsed: Duration,
    detached: bool,
}

pub fn run_stress(config: FacilityConfig, args: StressArgs) -> Result<(), Error> {
    if args.callers == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("--callers must be at least 1"));
    }
    if args.leak > args.callers {
        return Err(Error::new(ErrorKind::Usage).with_message("--leak cannot exceed --callers"));
    }

    let start = SystemTime::now();
    let controller = LifecycleController::new();
    let facility = controller.load(config.clone())?;

    let barrier = Arc::new(Barrier::new(args.callers));
    let started = Instant::now();
    let handles: Vec<_> = (0..args.callers)
        .map(|index| {
            let facility = Arc::clone(&facility);
            let barrier = Arc::clone(&barrier);
            let iterations = args.iterations;
            let detach = index >= args.leak;
            thread::spawn(move || run_caller(&facility, &barrier, index, iterations, detach))
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle
            .join()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("stress caller panicked"))??;
        outcomes.push(outcome);
    }
    let elapsed = started.elapsed();

    let attached_before_unload = facility.registry().len();
    let (acquisitions, contended) = (0..facility.locks().slot_count())
        .filter_map(|resource| facility.locks().stats(resource))
        .fold((0u64, 0u64), |(a, c), stats| {
            (a + stats.acquisitions, c + stats.contended)
        });
    let report = controller.unload();

    let total_ops = args.callers as u64 * args.iterations;
    let slowest = outcomes
        .iter()
        .max_by_key(|outcome| outcome.elapsed)
        .map(|outcome| (outcome.caller.as_raw(), outcome.elapsed.as_secs_f64() * 1000.0));
    let output = json!({
        "name": "cryptoshare",
        "version": env!("CARGO_PKG_VERSION"),
        "ts": rfc3339_now(start),
        "params": {
            "callers": args.callers,
            "iterations": args.iterations,
            "leak": args.leak,
            "lock_slots": config.lock_slots,
            "debug_build": cfg!(debug_assertions),
        },
        "results": {
            "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
            "ops": total_ops,
            "ops_per_sec": ops_per_sec(total_ops, elapsed),
            "acquisitions": acquisitions,
            "contended": contended,
            "detached": outcomes.iter().filter(|outcome| outcome.detached).count(),
            "attached_before_unload": attached_before_unload,
            "swept": report.swept,
            "released_slots": report.released_slots,
            "teardown_clean": report.teardown.is_clean(),
            "slowest_caller": slowest.map(|(caller, ms)| json!({"caller": caller, "ms": ms})),
        },
    });

    emit_stress_output(output, args.format)
}

fn run_caller(
    facility: &Facility,
    barrier: &Barrier,
    index: usize,
    iterations: u64,
    detach: bool,
) -> Result<CallerOutcome, Error> {
    let caller = CallerId::current();
    let slots = facility.locks().slot_count();
    let attached = facility.attach(
        caller,
        AttachOptions::new().with_context(ContextToken::from_raw(index + 1)),
    );
    barrier.wait();
    attached?;

    let started = Instant::now();
    for i in 0..iterations {
        let resource = ((index as u64 + i) % slots as u64) as i32;
        facility.locking_callback(LOCK_MODE_LOCK, resource, caller)?;
        let code = (i as i32).wrapping_mul(if index % 2 == 0 { 1 } else { -1 });
        let round_trip = facility
            .set_error(caller, code)
            .and_then(|()| facility.get_error(caller));
        let unlock = facility.locking_callback(LOCK_MODE_UNLOCK, resource, caller);
        let observed = round_trip?;
        unlock?;
        if observed != code {
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!("errno mismatch: wrote {code}, read {observed}"))
                .with_caller(caller));
        }
    }
    let elapsed = started.elapsed();

    if detach {
        facility.detach(caller);
    }
    Ok(CallerOutcome {
        caller,
        elapsed,
        detached: detach,
    })
}

fn ops_per_sec(ops: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    ops as f64 / secs
}

fn emit_stress_output(value: Value, format: StressFormat) -> Result<(), Error> {
    match format {
        StressFormat::Json => {
            print_json(&value);
            Ok(())
        }
        StressFormat::Table => emit_table(&value),
        StressFormat::Both => {
            print_json(&value);
            emit_table(&value)
        }
    }
}

fn print_json(value: &Value) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    println!("{json}");
}

fn emit_table(value: &Value) -> Result<(), Error> {
    let results = value
        .get("results")
        .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("stress results missing"))?;
    let params = value
        .get("params")
        .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("stress params missing"))?;

    let mut stderr = io::stderr().lock();
    let rows = [
        ("callers", params.get("callers").cloned()),
        ("iterations", params.get("iterations").cloned()),
        ("lock_slots", params.get("lock_slots").cloned()),
        ("elapsed_ms", results.get("elapsed_ms").cloned()),
        ("ops_per_sec", results.get("ops_per_sec").cloned()),
        ("contended", results.get("contended").cloned()),
        ("swept", results.get("swept").cloned()),
        ("teardown_clean", results.get("teardown_clean").cloned()),
    ];
    writeln!(stderr, "cryptoshare stress (table)").map_err(table_io_error)?;
    for (label, cell) in rows {
        let cell = match cell {
            Some(Value::Number(number)) if number.is_f64() => {
                format!("{:.3}", number.as_f64().unwrap_or(f64::NAN))
            }
            Some(other) => other.to_string(),
            None => "?".to_string(),
        };
        writeln!(stderr, "{label:>16}  {cell}").map_err(table_io_error)?;
    }
    Ok(())
}

fn table_io_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write stress table")
        .with_source(err)
}

fn rfc3339_now(ts: SystemTime) -> String {
    let dur = ts.duration_since(UNIX_EPOCH).unwrap_or_default();
    let tm = time::OffsetDateTime::from_unix_timestamp_nanos(dur.as_nanos() as i128)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH);
    tm.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::{StressFormat, ops_per_sec};
    use std::time::Duration;

    #[test]
    fn format_parse_accepts_known_values() {
        assert_eq!(StressFormat::parse("json").expect("json"), StressFormat::Json);
        assert_eq!(StressFormat::parse(" both ").expect("both"), StressFormat::Both);
        assert!(StressFormat::parse("yaml").is_err());
    }

    #[test]
    fn ops_per_sec_handles_zero_elapsed() {
        assert_eq!(ops_per_sec(10, Duration::ZERO), 0.0);
        assert_eq!(ops_per_sec(10, Duration::from_secs(2)), 5.0);
    }
}
