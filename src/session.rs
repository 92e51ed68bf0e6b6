use std::sync::Arc;

use serde_json::json;

use crate::capture::EffectiveCapture;
use crate::engine::{Engine, EngineError, EngineLauncher, OutputSink, RunOutcome};
use crate::event_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    Restarting,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Restarting => "restarting",
            SessionState::Terminated => "terminated",
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// The engine could not be started. Unrecoverable at kernel startup.
    Start(EngineError),
    /// An operation was issued while the session was not `Ready`.
    NotReady(SessionState),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Start(err) => write!(f, "failed to start MATLAB engine: {err}"),
            SessionError::NotReady(state) => {
                write!(f, "engine session is {} and cannot run code", state.as_str())
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Start(err) => Some(err),
            SessionError::NotReady(_) => None,
        }
    }
}

/// Exclusive owner of one engine process handle. At most one session is
/// `Ready` per kernel; while `Restarting`, nothing reaches the engine.
pub struct EngineSession {
    launcher: Box<dyn EngineLauncher>,
    engine: Option<Box<dyn Engine>>,
    state: SessionState,
    engine_version: Option<String>,
}

impl EngineSession {
    /// Spawns the engine and blocks until it is ready. Start failure is
    /// fatal: the session lands in `Terminated` and the caller aborts.
    pub fn start(launcher: Box<dyn EngineLauncher>) -> Result<Self, SessionError> {
        let mut session = Self {
            launcher,
            engine: None,
            state: SessionState::Starting,
            engine_version: None,
        };
        session.start_engine()?;
        Ok(session)
    }

    fn start_engine(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Starting;
        event_log::log("engine_start_begin", json!({}));
        let mut engine = self.launcher.launch().map_err(|err| {
            self.state = SessionState::Terminated;
            event_log::log("engine_start_error", json!({ "error": err.to_string() }));
            SessionError::Start(err)
        })?;
        let version = engine.version().map_err(|err| {
            self.state = SessionState::Terminated;
            event_log::log("engine_start_error", json!({ "error": err.to_string() }));
            SessionError::Start(err)
        })?;
        event_log::log("engine_start_end", json!({ "version": version }));
        self.engine = Some(engine);
        self.engine_version = Some(version);
        self.state = SessionState::Ready;
        Ok(())
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn engine_version(&self) -> Option<&str> {
        self.engine_version.as_deref()
    }

    pub fn banner(&self) -> String {
        match &self.engine_version {
            Some(version) => format!("matlab-kernel: MATLAB {version}"),
            None => "matlab-kernel".to_string(),
        }
    }

    /// Direct engine access for configuration, plots and completion queries.
    /// Refused unless the session is `Ready`.
    pub fn engine_mut(&mut self) -> Result<&mut dyn Engine, SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady(self.state));
        }
        match self.engine.as_mut() {
            Some(engine) => Ok(engine.as_mut()),
            None => Err(SessionError::NotReady(self.state)),
        }
    }

    /// Submits code for execution under the chosen capture mode. Guest
    /// errors keep the session `Ready`; they are outcomes, not crashes.
    pub fn run(
        &mut self,
        code: &str,
        capture: EffectiveCapture,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<RunOutcome, SessionError> {
        let engine = self.engine_mut()?;
        Ok(engine.eval(code, capture, stdout, stderr))
    }

    /// Full teardown and rebuild of the engine handle. The engine cannot be
    /// restarted from inside itself; the old handle is discarded first, and
    /// its exit call may legitimately fail a second time, which is swallowed.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Restarting;
        event_log::log("engine_restart_begin", json!({}));
        if let Some(mut engine) = self.engine.take() {
            let _ = engine.close();
        }
        self.start_engine()?;
        event_log::log("engine_restart_end", json!({ "state": self.state.as_str() }));
        Ok(())
    }

    /// Asks the engine to terminate cleanly, tolerating failure. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if let Err(err) = engine.close() {
                event_log::log("engine_close_error", json!({ "error": err.to_string() }));
            }
        }
        self.state = SessionState::Terminated;
    }
}
