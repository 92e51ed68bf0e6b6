use crate::engine::{Engine, EngineError};

/// Engine-side variable holding the persisted capture preference.
pub const OUTPUT_CAPTURE_KEY: &str = "kernel_output_capture";

/// Persisted capture preference. `Auto` resolves per request; the other two
/// force a mechanism outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Auto,
    Wrapper,
    Engine,
}

impl CaptureMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Some(CaptureMode::Auto),
            "wrapper" => Some(CaptureMode::Wrapper),
            "engine" => Some(CaptureMode::Engine),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureMode::Auto => "auto",
            CaptureMode::Wrapper => "wrapper",
            CaptureMode::Engine => "engine",
        }
    }
}

/// The mechanism actually used for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveCapture {
    /// Process-level stream redirection around the engine call; output
    /// arrives incrementally, per write.
    Wrapper,
    /// The engine redirects its own streams into the provided sinks; output
    /// arrives as one aggregated write after the call.
    Engine,
}

/// Whether the process-level redirection mechanism exists on this platform.
pub fn wrapper_capture_available() -> bool {
    cfg!(target_family = "unix")
}

/// Maps the persisted mode and per-request interactivity hint to the capture
/// mechanism for exactly this execution. Total and side-effect free.
pub fn resolve_capture(
    mode: CaptureMode,
    allow_stdin: bool,
    wrapper_available: bool,
) -> EffectiveCapture {
    if !wrapper_available {
        return EffectiveCapture::Engine;
    }
    match mode {
        CaptureMode::Auto => {
            if allow_stdin {
                EffectiveCapture::Wrapper
            } else {
                EffectiveCapture::Engine
            }
        }
        CaptureMode::Wrapper => EffectiveCapture::Wrapper,
        CaptureMode::Engine => EffectiveCapture::Engine,
    }
}

#[derive(Debug)]
pub enum CaptureReadError {
    Engine(EngineError),
    /// A persisted value outside the allowed set. The default has already
    /// been written back by the time this is returned.
    Invalid(String),
}

impl std::fmt::Display for CaptureReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureReadError::Engine(err) => write!(f, "{err}"),
            CaptureReadError::Invalid(raw) => write!(f, "unknown output capture '{raw}'"),
        }
    }
}

/// Reads the persisted capture mode, establishing the default on first use.
/// An absent or empty value becomes `Auto` and is re-persisted; an invalid
/// value is also replaced with `Auto` but reported to the caller.
pub fn read_capture_mode(engine: &mut dyn Engine) -> Result<CaptureMode, CaptureReadError> {
    let raw = engine
        .get_state(OUTPUT_CAPTURE_KEY)
        .map_err(CaptureReadError::Engine)?;
    match raw {
        Some(value) if !value.trim().is_empty() => match CaptureMode::parse(&value) {
            Some(mode) => Ok(mode),
            None => {
                engine
                    .set_state(OUTPUT_CAPTURE_KEY, CaptureMode::Auto.as_str())
                    .map_err(CaptureReadError::Engine)?;
                Err(CaptureReadError::Invalid(value.trim().to_string()))
            }
        },
        _ => {
            engine
                .set_state(OUTPUT_CAPTURE_KEY, CaptureMode::Auto.as_str())
                .map_err(CaptureReadError::Engine)?;
            Ok(CaptureMode::Auto)
        }
    }
}
