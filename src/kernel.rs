use std::sync::Arc;

use serde_json::json;

use crate::capture::{self, CaptureMode};
use crate::completion;
use crate::engine::{EngineLauncher, RunOutcome};
use crate::event_log;
use crate::output_filter::StreamSink;
use crate::plots::{self, PlotBackend};
use crate::protocol::{
    Completeness, KernelReply, MessageSink, ReplyStatus, SideMessage, StreamName,
};
use crate::session::{EngineSession, SessionError};

/// Shown in place of executing an in-band `quit`/`exit`, right before the
/// replacement engine comes up.
const RESTART_MESSAGE: &str = "matlab-kernel does not support `quit` or `exit`.\n\
To shut down the kernel in the console, press Ctrl-D.\n\
To shut down the kernel in a notebook, stop the notebook.\n\
Restarting MATLAB.\n";

/// Kernel-originated diagnostics go to the client as stderr text with a
/// fixed prefix, never into the reply.
fn report(messages: &Arc<dyn MessageSink>, detail: impl std::fmt::Display) {
    messages.send(SideMessage::stderr(format!("matlab-kernel: {detail}\n")));
}

pub struct ExecutionRequest<'a> {
    pub code: &'a str,
    pub silent: bool,
    pub allow_stdin: bool,
}

/// The orchestrator behind every protocol request. Owns the engine session
/// and the monotonically increasing execution counter.
pub struct Kernel {
    session: EngineSession,
    execution_count: u64,
}

impl Kernel {
    pub fn start(launcher: Box<dyn EngineLauncher>) -> Result<Self, SessionError> {
        let session = EngineSession::start(launcher)?;
        Ok(Self {
            session,
            execution_count: 0,
        })
    }

    pub fn banner(&self) -> String {
        self.session.banner()
    }

    /// Runs one execute request end to end. The protocol status is `ok` no
    /// matter what happened inside; anything worth telling the user has
    /// already gone out through `messages`.
    pub fn execute(
        &mut self,
        request: ExecutionRequest<'_>,
        messages: Arc<dyn MessageSink>,
    ) -> KernelReply {
        self.execution_count += 1;
        event_log::log_lazy("execute_begin", || {
            json!({
                "execution_count": self.execution_count,
                "code_bytes": request.code.len(),
                "silent": request.silent,
            })
        });

        self.prepare_execution(&messages);
        self.run_code(&request, &messages);
        self.emit_plots(&messages);

        KernelReply::ExecuteResult {
            status: ReplyStatus::Ok,
            execution_count: self.execution_count,
        }
    }

    /// Pre-flight before user code runs: figure window visibility tracks the
    /// plot backend, and the capture setting is validated so a bad value is
    /// reported against the request that will feel it. Failures never block
    /// execution.
    fn prepare_execution(&mut self, messages: &Arc<dyn MessageSink>) {
        let engine = match self.session.engine_mut() {
            Ok(engine) => engine,
            Err(err) => {
                report(messages, err);
                return;
            }
        };
        match plots::read_plot_backend(engine) {
            Ok(backend) => {
                if let Err(err) = engine.set_figures_visible(backend == PlotBackend::Native) {
                    report(messages, err);
                }
            }
            Err(err) => report(messages, err),
        }
        if let Err(err) = capture::read_capture_mode(engine) {
            report(messages, err);
        }
    }

    fn run_code(&mut self, request: &ExecutionRequest<'_>, messages: &Arc<dyn MessageSink>) {
        let mode = match self.session.engine_mut() {
            Ok(engine) => capture::read_capture_mode(engine).unwrap_or(CaptureMode::Auto),
            Err(err) => {
                report(messages, err);
                return;
            }
        };
        let effective = capture::resolve_capture(
            mode,
            request.allow_stdin,
            capture::wrapper_capture_available(),
        );
        let stdout = Arc::new(StreamSink::new(
            StreamName::Stdout,
            request.silent,
            Arc::clone(messages),
        ));
        let stderr = Arc::new(StreamSink::new(
            StreamName::Stderr,
            request.silent,
            Arc::clone(messages),
        ));
        let outcome = match self.session.run(request.code, effective, stdout, stderr) {
            Ok(outcome) => outcome,
            Err(err) => {
                report(messages, err);
                return;
            }
        };
        match outcome {
            // The engine already wrote the error text to stderr; reporting
            // it again would double it up in the client.
            RunOutcome::Ok | RunOutcome::GuestError(_) => {}
            RunOutcome::EngineStopped => {
                messages.send(SideMessage::stderr(RESTART_MESSAGE));
                if let Err(err) = self.session.restart() {
                    report(messages, err);
                }
            }
            RunOutcome::UnexpectedFailure(detail) => {
                event_log::log("execute_failure", json!({ "detail": detail }));
                report(messages, detail);
            }
        }
    }

    fn emit_plots(&mut self, messages: &Arc<dyn MessageSink>) {
        let engine = match self.session.engine_mut() {
            Ok(engine) => engine,
            // Already reported while running; nothing to render anyway.
            Err(_) => return,
        };
        if let Err(err) = plots::write_plots(engine, messages.as_ref()) {
            report(messages, err);
        }
    }

    /// Tab completion via the engine's completion service. Any failure along
    /// the way degrades to an empty match list.
    pub fn complete(&mut self, code: &str, cursor_pos: usize) -> KernelReply {
        let mut cursor_pos = cursor_pos.min(code.len());
        while cursor_pos > 0 && !code.is_char_boundary(cursor_pos) {
            cursor_pos -= 1;
        }
        let matches = self
            .session
            .engine_mut()
            .ok()
            .and_then(|engine| {
                let query = completion::build_completion_query(code, cursor_pos);
                engine.eval_strings(&query).ok()
            })
            .unwrap_or_default();
        let prefix = completion::common_prefix_ci(&matches);
        let overlap = completion::prefix_overlap(&code[..cursor_pos], &prefix);
        KernelReply::CompleteResult {
            status: ReplyStatus::Ok,
            matches,
            cursor_start: cursor_pos - overlap,
            cursor_end: cursor_pos,
        }
    }

    /// Documentation lookup for the token under the cursor.
    pub fn inspect(&mut self, code: &str, cursor_pos: usize) -> KernelReply {
        let help = completion::token_at_cursor(code, cursor_pos).and_then(|token| {
            let engine = self.session.engine_mut().ok()?;
            let text = engine.help(token).ok()??;
            Some(format!(
                "<h1>Help for <code>{token}</code></h1>\n<pre>{text}</pre>"
            ))
        });
        KernelReply::InspectResult {
            status: ReplyStatus::Ok,
            found: help.is_some(),
            html: help,
        }
    }

    /// A cell is submittable once its last line is empty. The engine has no
    /// incremental parser to consult, so this mirrors its own command window
    /// heuristic for continued input. A whitespace-only last line counts as
    /// still being typed.
    pub fn is_complete(&mut self, code: &str) -> KernelReply {
        let complete = code.is_empty() || code.ends_with('\n');
        KernelReply::IsCompleteResult {
            status: if complete {
                Completeness::Complete
            } else {
                Completeness::Incomplete
            },
        }
    }

    /// History is not persisted engine-side; the client keeps its own.
    pub fn history(&mut self) -> KernelReply {
        KernelReply::HistoryResult {
            status: ReplyStatus::Ok,
            history: Vec::new(),
        }
    }

    pub fn shutdown(&mut self, restart: bool) -> KernelReply {
        event_log::log("shutdown", json!({ "restart": restart }));
        self.session.close();
        KernelReply::ShutdownResult {
            status: ReplyStatus::Ok,
            restart,
        }
    }
}
