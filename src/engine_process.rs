//! Process-backed engine: spawns the engine host executable, which connects
//! back over a loopback control socket and speaks a line-oriented JSON
//! protocol. The host's own stdout/stderr are held in pipes so their chunks
//! can be forwarded live during wrapper-captured executions.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capture::EffectiveCapture;
use crate::engine::{Engine, EngineError, EngineLauncher, FigureId, OutputSink, RunOutcome};
use crate::event_log;

pub const ENGINE_COMMAND_ENV: &str = "MATLAB_KERNEL_ENGINE";
pub const ENGINE_ARGS_ENV: &str = "MATLAB_KERNEL_ENGINE_ARGS";
pub const ENGINE_PORT_ENV: &str = "MATLAB_KERNEL_ENGINE_PORT";
pub const DEFAULT_ENGINE_COMMAND: &str = "matlab-engine-host";

const ENGINE_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const ENGINE_EXIT_GRACE: Duration = Duration::from_secs(5);
const WRAPPER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One control request to the engine host.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostRequest {
    Version,
    Eval { code: String, capture: String },
    EvalStrings { expr: String },
    GetState { name: String },
    SetState { name: String, value: String },
    ScreenDpi,
    SetFiguresVisible { visible: bool },
    ListFigures,
    RenderFigure {
        figure: FigureId,
        path: String,
        format: String,
        resolution_dpi: u32,
        fit_page: bool,
    },
    CloseFigure { figure: FigureId },
    Help { name: String },
    Exit,
}

/// Reply from the engine host. `stopped` means the engine was torn down from
/// inside the evaluated code and the host is about to exit.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostResponse {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        values: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        figures: Option<Vec<FigureId>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dpi: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_bytes: Option<u64>,
    },
    GuestError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_bytes: Option<u64>,
    },
    Stopped,
    Error { message: String },
}

/// Shared forwarding slot for the host's process-level streams. The pipe
/// reader threads always drain; chunks only go somewhere while an execution
/// has sinks attached, otherwise they are dropped. Bytes delivered since the
/// last attach are counted per stream so an execution can wait for trailing
/// chunks that race the eval reply on the control socket.
#[derive(Default)]
struct ForwardTarget {
    inner: Mutex<ForwardState>,
    drained: Condvar,
}

#[derive(Default)]
struct ForwardState {
    sinks: Option<(Arc<dyn OutputSink>, Arc<dyn OutputSink>)>,
    // [stdout, stderr] raw pipe bytes forwarded since attach
    delivered: [u64; 2],
}

impl ForwardTarget {
    fn forward(&self, is_stderr: bool, text: &str, raw_len: u64) {
        let mut state = self.inner.lock().unwrap();
        let Some((stdout, stderr)) = state.sinks.clone() else {
            return;
        };
        if is_stderr {
            stderr.write(text);
        } else {
            stdout.write(text);
        }
        state.delivered[usize::from(is_stderr)] += raw_len;
        self.drained.notify_all();
    }

    fn attach(&self, stdout: Arc<dyn OutputSink>, stderr: Arc<dyn OutputSink>) {
        let mut state = self.inner.lock().unwrap();
        state.sinks = Some((stdout, stderr));
        state.delivered = [0, 0];
    }

    fn detach(&self) {
        self.inner.lock().unwrap().sinks = None;
    }

    /// Blocks until the reader threads have forwarded at least the given
    /// number of bytes per stream, or the timeout passes. The host reports
    /// how much it wrote in the eval reply; the final pipe chunks may still
    /// be in flight when that reply arrives.
    fn wait_drained(&self, stdout_bytes: u64, stderr_bytes: u64, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock().unwrap();
        while state.delivered[0] < stdout_bytes || state.delivered[1] < stderr_bytes {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            let (next, timed_out) = self.drained.wait_timeout(state, remaining).unwrap();
            state = next;
            if timed_out.timed_out() {
                break;
            }
        }
    }
}

/// Scopes sink attachment to one wrapper-captured execution. Dropping the
/// guard detaches on every exit path.
struct WrapperCaptureGuard<'a> {
    target: &'a ForwardTarget,
}

impl<'a> WrapperCaptureGuard<'a> {
    fn attach(
        target: &'a ForwardTarget,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Self {
        target.attach(stdout, stderr);
        Self { target }
    }
}

impl Drop for WrapperCaptureGuard<'_> {
    fn drop(&mut self) {
        self.target.detach();
    }
}

/// Per-stream byte counts the host reports for a wrapper-captured eval.
/// Absent counts mean the host wrote nothing on that stream.
fn wrapper_stream_bytes(reply: &HostResponse) -> (u64, u64) {
    match reply {
        HostResponse::Ok {
            stdout_bytes,
            stderr_bytes,
            ..
        }
        | HostResponse::GuestError {
            stdout_bytes,
            stderr_bytes,
            ..
        } => (stdout_bytes.unwrap_or(0), stderr_bytes.unwrap_or(0)),
        HostResponse::Stopped | HostResponse::Error { .. } => (0, 0),
    }
}

fn spawn_forward_reader<R>(stream: Option<R>, is_stderr: bool, target: Arc<ForwardTarget>)
where
    R: Read + Send + 'static,
{
    let Some(mut stream) = stream else {
        return;
    };
    thread::spawn(move || {
        let mut buffer = [0u8; 8192];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buffer[..n]);
                    target.forward(is_stderr, &text, n as u64);
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

/// Line-oriented JSON control channel to the host.
struct ControlChannel {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ControlChannel {
    fn new(stream: TcpStream) -> Result<Self, EngineError> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn request(&mut self, request: &HostRequest) -> Result<HostResponse, EngineError> {
        let line = serde_json::to_string(request)
            .map_err(|err| EngineError::Protocol(err.to_string()))?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply)?;
        if read == 0 {
            return Err(EngineError::Disconnected);
        }
        serde_json::from_str(&reply)
            .map_err(|err| EngineError::Protocol(format!("bad host reply: {err}")))
    }
}

/// Builds engines by spawning the host command fresh each time.
pub struct ProcessEngineLauncher {
    command: String,
    args: Vec<String>,
}

impl ProcessEngineLauncher {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// Command and arguments from the environment, with overrides taking
    /// precedence over the defaults.
    pub fn from_env(command_override: Option<String>, extra_args: Vec<String>) -> Self {
        let command = command_override
            .or_else(|| std::env::var(ENGINE_COMMAND_ENV).ok())
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENGINE_COMMAND.to_string());
        let mut args: Vec<String> = std::env::var(ENGINE_ARGS_ENV)
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        args.extend(extra_args);
        Self { command, args }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl EngineLauncher for ProcessEngineLauncher {
    fn launch(&self) -> Result<Box<dyn Engine>, EngineError> {
        let engine = MatlabProcessEngine::spawn(&self.command, &self.args)?;
        Ok(Box::new(engine))
    }
}

pub struct MatlabProcessEngine {
    child: Child,
    channel: ControlChannel,
    forward: Arc<ForwardTarget>,
    closed: bool,
}

impl MatlabProcessEngine {
    fn spawn(command: &str, args: &[String]) -> Result<Self, EngineError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        crate::diagnostics::startup_log(format!("engine: spawning '{command}' (port {port})"));

        let mut child = Command::new(command)
            .args(args)
            .env(ENGINE_PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                EngineError::StartFailed(format!("could not spawn '{command}': {err}"))
            })?;

        if let Some(status) = child.try_wait()? {
            return Err(EngineError::StartFailed(format!(
                "engine host exited immediately with status {status}"
            )));
        }

        let forward = Arc::new(ForwardTarget::default());
        spawn_forward_reader(child.stdout.take(), false, forward.clone());
        spawn_forward_reader(child.stderr.take(), true, forward.clone());

        let stream = match accept_with_timeout(listener, ENGINE_CONNECT_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        crate::diagnostics::startup_log("engine: connected");
        event_log::log(
            "engine_host_connected",
            json!({ "command": command, "port": port }),
        );
        Ok(Self {
            child,
            channel: ControlChannel::new(stream)?,
            forward,
            closed: false,
        })
    }

    fn simple(&mut self, request: HostRequest) -> Result<HostResponse, EngineError> {
        match self.channel.request(&request)? {
            HostResponse::Error { message } => Err(EngineError::Protocol(message)),
            HostResponse::Stopped => Err(EngineError::Disconnected),
            reply => Ok(reply),
        }
    }

    fn eval_reply_to_outcome(
        reply: HostResponse,
        stdout: &Arc<dyn OutputSink>,
        stderr: &Arc<dyn OutputSink>,
        aggregated: bool,
    ) -> RunOutcome {
        match reply {
            HostResponse::Ok {
                stdout: out_text,
                stderr: err_text,
                ..
            } => {
                if aggregated {
                    if let Some(text) = out_text {
                        stdout.write(&text);
                    }
                    if let Some(text) = err_text {
                        stderr.write(&text);
                    }
                }
                RunOutcome::Ok
            }
            HostResponse::GuestError {
                message,
                stdout: out_text,
                stderr: err_text,
                ..
            } => {
                if aggregated {
                    if let Some(text) = out_text {
                        stdout.write(&text);
                    }
                    if let Some(text) = err_text {
                        stderr.write(&text);
                    }
                }
                RunOutcome::GuestError(message)
            }
            HostResponse::Stopped => RunOutcome::EngineStopped,
            HostResponse::Error { message } => RunOutcome::UnexpectedFailure(message),
        }
    }
}

fn accept_with_timeout(
    listener: TcpListener,
    timeout: Duration,
) -> Result<TcpStream, EngineError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(listener.accept());
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok((stream, _addr))) => Ok(stream),
        Ok(Err(err)) => Err(EngineError::StartFailed(format!(
            "engine host connection failed: {err}"
        ))),
        Err(_) => Err(EngineError::StartFailed(format!(
            "engine host did not connect within {}s",
            timeout.as_secs()
        ))),
    }
}

impl Engine for MatlabProcessEngine {
    fn version(&mut self) -> Result<String, EngineError> {
        match self.simple(HostRequest::Version)? {
            HostResponse::Ok {
                value: Some(version),
                ..
            } => Ok(version),
            _ => Err(EngineError::Protocol(
                "host version reply carried no value".to_string(),
            )),
        }
    }

    fn eval(
        &mut self,
        code: &str,
        capture: EffectiveCapture,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> RunOutcome {
        let request = HostRequest::Eval {
            code: code.to_string(),
            capture: match capture {
                EffectiveCapture::Wrapper => "wrapper".to_string(),
                EffectiveCapture::Engine => "engine".to_string(),
            },
        };
        let result = match capture {
            EffectiveCapture::Wrapper => {
                let _guard =
                    WrapperCaptureGuard::attach(&self.forward, stdout.clone(), stderr.clone());
                let result = self.channel.request(&request);
                // The reply races the last pipe chunks; hold the sinks
                // attached until everything the host wrote has come through.
                if let Ok(reply) = &result {
                    let (out_bytes, err_bytes) = wrapper_stream_bytes(reply);
                    self.forward
                        .wait_drained(out_bytes, err_bytes, WRAPPER_DRAIN_TIMEOUT);
                }
                result
            }
            EffectiveCapture::Engine => self.channel.request(&request),
        };
        match result {
            Ok(reply) => Self::eval_reply_to_outcome(
                reply,
                &stdout,
                &stderr,
                capture == EffectiveCapture::Engine,
            ),
            // The control channel going away mid-eval means the engine
            // process is gone, which is how an uncaught in-band shutdown
            // surfaces.
            Err(EngineError::Disconnected) => RunOutcome::EngineStopped,
            Err(err) => RunOutcome::UnexpectedFailure(err.to_string()),
        }
    }

    fn eval_strings(&mut self, expr: &str) -> Result<Vec<String>, EngineError> {
        match self.simple(HostRequest::EvalStrings {
            expr: expr.to_string(),
        })? {
            HostResponse::Ok { values, .. } => Ok(values.unwrap_or_default()),
            _ => Err(EngineError::Protocol(
                "unexpected reply to string query".to_string(),
            )),
        }
    }

    fn get_state(&mut self, name: &str) -> Result<Option<String>, EngineError> {
        match self.simple(HostRequest::GetState {
            name: name.to_string(),
        })? {
            HostResponse::Ok { value, .. } => Ok(value),
            _ => Err(EngineError::Protocol(
                "unexpected reply to state read".to_string(),
            )),
        }
    }

    fn set_state(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        self.simple(HostRequest::SetState {
            name: name.to_string(),
            value: value.to_string(),
        })?;
        Ok(())
    }

    fn screen_dpi(&mut self) -> Result<u32, EngineError> {
        match self.simple(HostRequest::ScreenDpi)? {
            HostResponse::Ok { dpi: Some(dpi), .. } => Ok(dpi),
            _ => Err(EngineError::Protocol(
                "host dpi reply carried no value".to_string(),
            )),
        }
    }

    fn set_figures_visible(&mut self, visible: bool) -> Result<(), EngineError> {
        self.simple(HostRequest::SetFiguresVisible { visible })?;
        Ok(())
    }

    fn open_figures(&mut self) -> Result<Vec<FigureId>, EngineError> {
        match self.simple(HostRequest::ListFigures)? {
            HostResponse::Ok { figures, .. } => Ok(figures.unwrap_or_default()),
            _ => Err(EngineError::Protocol(
                "unexpected reply to figure listing".to_string(),
            )),
        }
    }

    fn render_figure(
        &mut self,
        figure: FigureId,
        path: &Path,
        format: &str,
        resolution_dpi: u32,
        fit_page: bool,
    ) -> Result<(), EngineError> {
        let path = path
            .to_str()
            .ok_or_else(|| EngineError::Protocol("non-utf8 render path".to_string()))?;
        self.simple(HostRequest::RenderFigure {
            figure,
            path: path.to_string(),
            format: format.to_string(),
            resolution_dpi,
            fit_page,
        })?;
        Ok(())
    }

    fn close_figure(&mut self, figure: FigureId) -> Result<(), EngineError> {
        self.simple(HostRequest::CloseFigure { figure })?;
        Ok(())
    }

    fn help(&mut self, name: &str) -> Result<Option<String>, EngineError> {
        match self.simple(HostRequest::Help {
            name: name.to_string(),
        })? {
            HostResponse::Ok { value, .. } => Ok(value),
            _ => Err(EngineError::Protocol(
                "unexpected reply to help lookup".to_string(),
            )),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The host may already be gone; the exit request is best effort.
        let _ = self.channel.request(&HostRequest::Exit);
        let deadline = Instant::now() + ENGINE_EXIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(50));
                }
                Ok(None) => {
                    self.child.kill()?;
                    self.child.wait()?;
                    return Ok(());
                }
                Err(err) => return Err(EngineError::Io(err)),
            }
        }
    }
}

impl Drop for MatlabProcessEngine {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CollectingSink {
        chunks: StdMutex<Vec<String>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                chunks: StdMutex::new(Vec::new()),
            })
        }

        fn text(&self) -> String {
            self.chunks.lock().unwrap().concat()
        }
    }

    impl OutputSink for CollectingSink {
        fn write(&self, text: &str) {
            self.chunks.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn host_request_serializes_with_op_tag() {
        let request = HostRequest::Eval {
            code: "x = 1\n".to_string(),
            capture: "engine".to_string(),
        };
        let text = serde_json::to_string(&request).expect("serialize");
        assert_eq!(text, r#"{"op":"eval","code":"x = 1\n","capture":"engine"}"#);
    }

    #[test]
    fn host_response_parses_sparse_ok() {
        let reply: HostResponse =
            serde_json::from_str(r#"{"status":"ok","stdout":"ans = 2\n"}"#).expect("parse");
        assert_eq!(
            reply,
            HostResponse::Ok {
                value: None,
                values: None,
                stdout: Some("ans = 2\n".to_string()),
                stderr: None,
                figures: None,
                dpi: None,
                stdout_bytes: None,
                stderr_bytes: None,
            }
        );
    }

    #[test]
    fn host_response_parses_stopped_and_error() {
        let stopped: HostResponse = serde_json::from_str(r#"{"status":"stopped"}"#).expect("parse");
        assert_eq!(stopped, HostResponse::Stopped);
        let error: HostResponse =
            serde_json::from_str(r#"{"status":"error","message":"boom"}"#).expect("parse");
        assert_eq!(
            error,
            HostResponse::Error {
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn forward_target_only_delivers_while_attached() {
        let target = ForwardTarget::default();
        let stdout = CollectingSink::new();
        let stderr = CollectingSink::new();

        target.forward(false, "dropped", 7);
        {
            let _guard = WrapperCaptureGuard::attach(
                &target,
                stdout.clone() as Arc<dyn OutputSink>,
                stderr.clone() as Arc<dyn OutputSink>,
            );
            target.forward(false, "kept", 4);
            target.forward(true, "warned", 6);
        }
        target.forward(false, "dropped again", 13);

        assert_eq!(stdout.text(), "kept");
        assert_eq!(stderr.text(), "warned");
    }

    #[test]
    fn wait_drained_holds_the_sinks_for_late_chunks() {
        let target = Arc::new(ForwardTarget::default());
        let stdout = CollectingSink::new();
        let stderr = CollectingSink::new();
        target.attach(
            stdout.clone() as Arc<dyn OutputSink>,
            stderr.clone() as Arc<dyn OutputSink>,
        );

        // The chunk arrives after the eval reply would have been read.
        let late = Arc::clone(&target);
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            late.forward(false, "done\n", 5);
        });
        target.wait_drained(5, 0, Duration::from_secs(5));
        target.detach();
        writer.join().expect("writer thread");

        assert_eq!(stdout.text(), "done\n");
        assert_eq!(stderr.text(), "");
    }

    #[test]
    fn wait_drained_gives_up_after_the_timeout() {
        let target = ForwardTarget::default();
        let stdout = CollectingSink::new();
        let stderr = CollectingSink::new();
        target.attach(
            stdout.clone() as Arc<dyn OutputSink>,
            stderr.clone() as Arc<dyn OutputSink>,
        );
        let start = Instant::now();
        target.wait_drained(1, 0, Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wrapper_stream_bytes_reads_ok_and_guest_error_counts() {
        let ok: HostResponse = serde_json::from_str(
            r#"{"status":"ok","stdout_bytes":5,"stderr_bytes":2}"#,
        )
        .expect("parse");
        assert_eq!(wrapper_stream_bytes(&ok), (5, 2));
        let failed: HostResponse =
            serde_json::from_str(r#"{"status":"guest_error","message":"bad"}"#).expect("parse");
        assert_eq!(wrapper_stream_bytes(&failed), (0, 0));
        assert_eq!(wrapper_stream_bytes(&HostResponse::Stopped), (0, 0));
    }

    #[test]
    fn control_channel_round_trips_one_request() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request");
            let request: HostRequest = serde_json::from_str(&line).expect("parse request");
            assert_eq!(request, HostRequest::Version);
            let mut writer = stream;
            writeln!(writer, r#"{{"status":"ok","value":"9.14.0 (R2023a)"}}"#)
                .expect("write reply");
        });

        let stream = TcpStream::connect(addr).expect("connect");
        let mut channel = ControlChannel::new(stream).expect("channel");
        let reply = channel.request(&HostRequest::Version).expect("request");
        assert_eq!(
            reply,
            HostResponse::Ok {
                value: Some("9.14.0 (R2023a)".to_string()),
                values: None,
                stdout: None,
                stderr: None,
                figures: None,
                dpi: None,
                stdout_bytes: None,
                stderr_bytes: None,
            }
        );
        server.join().expect("server thread");
    }

    #[test]
    fn control_channel_reports_disconnect_on_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).expect("read request");
            // Dropped without a reply; the client sees EOF.
        });

        let stream = TcpStream::connect(addr).expect("connect");
        let mut channel = ControlChannel::new(stream).expect("channel");
        let err = channel
            .request(&HostRequest::Version)
            .expect_err("closed peer");
        assert!(matches!(err, EngineError::Disconnected));
        server.join().expect("server thread");
    }
}
