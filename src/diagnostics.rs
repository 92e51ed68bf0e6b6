//! Startup trace for failures that happen before the event log exists.
//! Enabled by `MATLAB_KERNEL_DEBUG_STARTUP` (or by naming a file via
//! `MATLAB_KERNEL_DEBUG_STARTUP_FILE`); otherwise every call is a no-op.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

const TRACE_ENV: &str = "MATLAB_KERNEL_DEBUG_STARTUP";
const TRACE_FILE_ENV: &str = "MATLAB_KERNEL_DEBUG_STARTUP_FILE";
const TRACE_FILE_DEFAULT: &str = "matlab-kernel-startup.log";

static TRACE_EPOCH: OnceLock<Instant> = OnceLock::new();
static TRACE_TARGET: OnceLock<Option<Mutex<File>>> = OnceLock::new();

fn env_set(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn trace_target() -> Option<&'static Mutex<File>> {
    TRACE_TARGET
        .get_or_init(|| {
            let path = env_set(TRACE_FILE_ENV)
                .or_else(|| env_set(TRACE_ENV).map(|_| TRACE_FILE_DEFAULT.to_string()))?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
                .map(Mutex::new)
        })
        .as_ref()
}

pub fn startup_log(message: impl AsRef<str>) {
    let epoch = *TRACE_EPOCH.get_or_init(Instant::now);
    let Some(target) = trace_target() else {
        return;
    };
    if let Ok(mut file) = target.lock() {
        let _ = writeln!(
            *file,
            "[matlab-kernel][startup +{:>6}ms] {}",
            epoch.elapsed().as_millis(),
            message.as_ref()
        );
        let _ = file.flush();
    }
}
