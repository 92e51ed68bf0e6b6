use std::path::Path;
use std::sync::Arc;

use crate::capture::EffectiveCapture;

/// Identifier of an open figure window inside the engine. Enumeration order
/// follows window creation order, oldest first.
pub type FigureId = u64;

#[derive(Debug)]
pub enum EngineError {
    /// The engine process could not be spawned or never became ready.
    StartFailed(String),
    Io(std::io::Error),
    /// The engine replied with something the control protocol does not allow.
    Protocol(String),
    /// The control channel went away; the engine process is gone.
    Disconnected,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::StartFailed(message) => write!(f, "engine start failed: {message}"),
            EngineError::Io(err) => write!(f, "engine io error: {err}"),
            EngineError::Protocol(message) => write!(f, "engine protocol error: {message}"),
            EngineError::Disconnected => write!(f, "engine disconnected"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

/// Outcome of one code evaluation. Guest-language errors and in-band engine
/// termination are ordinary values here, not `Err`s, so the orchestrator
/// switches on the tag instead of catching distinguished failure types.
#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    Ok,
    /// A runtime or syntax error in the guest code. The engine has already
    /// written the error text to the error sink; nothing else to report.
    GuestError(String),
    /// The engine was stopped by an in-band user command (`quit`/`exit`).
    EngineStopped,
    UnexpectedFailure(String),
}

/// Receives captured output text. Written once per execution under engine
/// capture, once per engine write under wrapper capture.
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);
}

/// The computational engine, held behind a trait so the session manager and
/// orchestrator never depend on how the process is driven.
pub trait Engine: Send {
    fn version(&mut self) -> Result<String, EngineError>;

    /// Evaluates guest code. Under [`EffectiveCapture::Engine`] the engine
    /// redirects its own output into the sinks and each sink sees a single
    /// aggregated write after the call; under [`EffectiveCapture::Wrapper`]
    /// the process-level streams are forwarded to the sinks per write while
    /// the call runs.
    fn eval(
        &mut self,
        code: &str,
        capture: EffectiveCapture,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> RunOutcome;

    /// Evaluates an engine expression expected to yield a string array.
    fn eval_strings(&mut self, expr: &str) -> Result<Vec<String>, EngineError>;

    /// Reads a named persisted engine variable. `None` when unset.
    fn get_state(&mut self, name: &str) -> Result<Option<String>, EngineError>;

    fn set_state(&mut self, name: &str, value: &str) -> Result<(), EngineError>;

    fn screen_dpi(&mut self) -> Result<u32, EngineError>;

    fn set_figures_visible(&mut self, visible: bool) -> Result<(), EngineError>;

    /// Open figure windows in creation order, oldest first.
    fn open_figures(&mut self) -> Result<Vec<FigureId>, EngineError>;

    /// Renders one figure to `path` in the given renderer format. `fit_page`
    /// asks for output sized to the figure rather than a full page and is set
    /// for page-oriented formats.
    fn render_figure(
        &mut self,
        figure: FigureId,
        path: &Path,
        format: &str,
        resolution_dpi: u32,
        fit_page: bool,
    ) -> Result<(), EngineError>;

    fn close_figure(&mut self, figure: FigureId) -> Result<(), EngineError>;

    /// Documentation text for a name. `None` when the engine has none.
    fn help(&mut self, name: &str) -> Result<Option<String>, EngineError>;

    /// Asks the engine to terminate. Idempotent; the underlying exit call may
    /// legitimately fail when the engine is already gone, and callers are
    /// expected to tolerate that.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Builds a fresh engine. The session manager launches through this once at
/// startup and again on every restart.
pub trait EngineLauncher: Send {
    fn launch(&self) -> Result<Box<dyn Engine>, EngineError>;
}
