//! Scripted fakes shared by unit tests: an in-process engine, a launcher
//! producing scripted engines, and a message sink that records everything.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::capture::EffectiveCapture;
use crate::engine::{Engine, EngineError, EngineLauncher, FigureId, OutputSink, RunOutcome};
use crate::protocol::{MessageSink, SideMessage, StreamName};

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<SideMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<SideMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn stream_text(&self, name: StreamName) -> String {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                SideMessage::Stream {
                    name: message_name,
                    text,
                } if message_name == name => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn display_data(&self) -> Vec<(String, String)> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                SideMessage::DisplayData { mime_type, data } => Some((mime_type, data)),
                _ => None,
            })
            .collect()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: SideMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

/// One scripted `eval` call: text pushed to the sinks, then the outcome.
pub struct EvalStep {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub outcome: RunOutcome,
}

impl EvalStep {
    pub fn ok() -> Self {
        Self {
            stdout: None,
            stderr: None,
            outcome: RunOutcome::Ok,
        }
    }

    pub fn ok_with_stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: Some(text.into()),
            stderr: None,
            outcome: RunOutcome::Ok,
        }
    }

    pub fn guest_error(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: None,
            stderr: Some(stderr.into()),
            outcome: RunOutcome::GuestError(message.into()),
        }
    }

    pub fn stopped() -> Self {
        Self {
            stdout: None,
            stderr: None,
            outcome: RunOutcome::EngineStopped,
        }
    }
}

#[derive(Default)]
struct FakeEngineState {
    version: Option<String>,
    state: HashMap<String, String>,
    screen_dpi: Option<u32>,
    figures: Vec<FigureId>,
    render_payload: Option<Vec<u8>>,
    render_failures: HashMap<FigureId, String>,
    rendered: Vec<(FigureId, PathBuf, String, u32, bool)>,
    closed: Vec<FigureId>,
    figures_visible: Option<bool>,
    eval_script: VecDeque<EvalStep>,
    eval_calls: Vec<(String, EffectiveCapture)>,
    string_queries: Vec<String>,
    string_results: Vec<String>,
    help: HashMap<String, String>,
    close_calls: usize,
}

/// Scripted engine with shared interior so tests keep a handle after the
/// session takes ownership of a clone.
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<Mutex<FakeEngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, version: impl Into<String>) -> Self {
        self.inner.lock().unwrap().version = Some(version.into());
        self
    }

    pub fn with_screen_dpi(self, dpi: u32) -> Self {
        self.inner.lock().unwrap().screen_dpi = Some(dpi);
        self
    }

    pub fn with_figures(self, figures: Vec<FigureId>) -> Self {
        self.inner.lock().unwrap().figures = figures;
        self
    }

    pub fn with_render_payload(self, payload: Vec<u8>) -> Self {
        self.inner.lock().unwrap().render_payload = Some(payload);
        self
    }

    pub fn with_render_failure(self, figure: FigureId, message: impl Into<String>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .render_failures
            .insert(figure, message.into());
        self
    }

    pub fn with_eval_steps(self, steps: Vec<EvalStep>) -> Self {
        self.inner.lock().unwrap().eval_script = steps.into();
        self
    }

    pub fn with_string_results(self, results: Vec<String>) -> Self {
        self.inner.lock().unwrap().string_results = results;
        self
    }

    pub fn with_help(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .help
            .insert(name.into(), text.into());
        self
    }

    pub fn state(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().state.get(name).cloned()
    }

    pub fn set_state_raw(&mut self, name: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .state
            .insert(name.to_string(), value.to_string());
    }

    pub fn rendered_figures(&self) -> Vec<FigureId> {
        self.inner
            .lock()
            .unwrap()
            .rendered
            .iter()
            .map(|(figure, ..)| *figure)
            .collect()
    }

    pub fn rendered_file_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .rendered
            .iter()
            .filter_map(|(_, path, ..)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .collect()
    }

    pub fn last_render_fit_page(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .rendered
            .last()
            .map(|(.., fit_page)| *fit_page)
            .unwrap_or(false)
    }

    pub fn closed_figures(&self) -> Vec<FigureId> {
        self.inner.lock().unwrap().closed.clone()
    }

    pub fn figures_visible(&self) -> Option<bool> {
        self.inner.lock().unwrap().figures_visible
    }

    pub fn eval_calls(&self) -> Vec<(String, EffectiveCapture)> {
        self.inner.lock().unwrap().eval_calls.clone()
    }

    pub fn string_queries(&self) -> Vec<String> {
        self.inner.lock().unwrap().string_queries.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.inner.lock().unwrap().close_calls
    }
}

impl Engine for FakeEngine {
    fn version(&mut self) -> Result<String, EngineError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .version
            .clone()
            .unwrap_or_else(|| "9.14.0 (R2023a)".to_string()))
    }

    fn eval(
        &mut self,
        code: &str,
        capture: EffectiveCapture,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> RunOutcome {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner.eval_calls.push((code.to_string(), capture));
            inner.eval_script.pop_front()
        };
        let Some(step) = step else {
            return RunOutcome::Ok;
        };
        if let Some(text) = &step.stdout {
            stdout.write(text);
        }
        if let Some(text) = &step.stderr {
            stderr.write(text);
        }
        step.outcome
    }

    fn eval_strings(&mut self, expr: &str) -> Result<Vec<String>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.string_queries.push(expr.to_string());
        Ok(inner.string_results.clone())
    }

    fn get_state(&mut self, name: &str) -> Result<Option<String>, EngineError> {
        Ok(self.inner.lock().unwrap().state.get(name).cloned())
    }

    fn set_state(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        self.inner
            .lock()
            .unwrap()
            .state
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn screen_dpi(&mut self) -> Result<u32, EngineError> {
        Ok(self.inner.lock().unwrap().screen_dpi.unwrap_or(96))
    }

    fn set_figures_visible(&mut self, visible: bool) -> Result<(), EngineError> {
        self.inner.lock().unwrap().figures_visible = Some(visible);
        Ok(())
    }

    fn open_figures(&mut self) -> Result<Vec<FigureId>, EngineError> {
        Ok(self.inner.lock().unwrap().figures.clone())
    }

    fn render_figure(
        &mut self,
        figure: FigureId,
        path: &Path,
        format: &str,
        resolution_dpi: u32,
        fit_page: bool,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.render_failures.get(&figure) {
            return Err(EngineError::Protocol(message.clone()));
        }
        let payload = inner
            .render_payload
            .clone()
            .unwrap_or_else(|| b"fake-plot".to_vec());
        std::fs::write(path, payload)?;
        inner.rendered.push((
            figure,
            path.to_path_buf(),
            format.to_string(),
            resolution_dpi,
            fit_page,
        ));
        Ok(())
    }

    fn close_figure(&mut self, figure: FigureId) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.figures.retain(|open| *open != figure);
        inner.closed.push(figure);
        Ok(())
    }

    fn help(&mut self, name: &str) -> Result<Option<String>, EngineError> {
        Ok(self.inner.lock().unwrap().help.get(name).cloned())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.inner.lock().unwrap().close_calls += 1;
        Ok(())
    }
}

/// Launcher yielding a prepared queue of scripted engines; launching with an
/// empty queue fails, which doubles as the fatal-startup case.
pub struct FakeLauncher {
    engines: Mutex<VecDeque<FakeEngine>>,
}

impl FakeLauncher {
    pub fn new(engines: Vec<FakeEngine>) -> Self {
        Self {
            engines: Mutex::new(engines.into()),
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }
}

impl EngineLauncher for FakeLauncher {
    fn launch(&self) -> Result<Box<dyn Engine>, EngineError> {
        let engine = self.engines.lock().unwrap().pop_front();
        match engine {
            Some(engine) => Ok(Box::new(engine)),
            None => Err(EngineError::StartFailed(
                "no scripted engine available".to_string(),
            )),
        }
    }
}
