#![allow(dead_code)]

use std::error::Error;
use std::path::PathBuf;

pub type TestResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub fn resolve_exe() -> TestResult<PathBuf> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_matlab-kernel") {
        return Ok(PathBuf::from(path));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    path.pop();
    let mut candidate = path;
    candidate.push("matlab-kernel");
    if cfg!(windows) {
        candidate.set_extension("exe");
    }
    if candidate.exists() {
        return Ok(candidate);
    }
    Err("unable to locate matlab-kernel test binary".into())
}
