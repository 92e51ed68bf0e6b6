//! Protocol front end: reads one JSON request per stdin line, hands it to
//! the kernel on a blocking thread, and writes the reply as a JSON line on
//! stdout. Side messages produced while a request runs share the same
//! stdout writer, so lines never interleave.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::engine::EngineLauncher;
use crate::event_log;
use crate::kernel::{ExecutionRequest, Kernel};
use crate::protocol::{
    KernelReply, KernelRequest, MessageSink, StdoutMessageWriter, write_json_line,
};

pub async fn run(launcher: Box<dyn EngineLauncher>) -> Result<(), Box<dyn std::error::Error>> {
    let kernel = Kernel::start(launcher).map_err(|err| err.to_string())?;
    eprintln!("{}", kernel.banner());
    // Guest code can check this variable to detect that it runs under the
    // kernel. `std::env::set_var` is `unsafe` in Rust 2024 because mutating
    // process-global environment variables can violate assumptions in other
    // threads / libraries; nothing else is running yet at this point.
    unsafe {
        std::env::set_var("MATLAB_KERNEL", env!("CARGO_PKG_VERSION"));
    }
    let kernel = Arc::new(Mutex::new(kernel));
    let messages: Arc<dyn MessageSink> = Arc::new(StdoutMessageWriter);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        let Some(line) = lines.next_line().await? else {
            // Client went away; shut the engine down before exiting.
            let kernel = Arc::clone(&kernel);
            tokio::task::spawn_blocking(move || {
                kernel.lock().unwrap().shutdown(false);
            })
            .await?;
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: KernelRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                event_log::log("bad_request", json!({ "error": err.to_string() }));
                write_json_line(&KernelReply::Error {
                    message: format!("malformed request: {err}"),
                });
                continue;
            }
        };
        let is_shutdown = matches!(request, KernelRequest::Shutdown { .. });
        let reply = dispatch(Arc::clone(&kernel), Arc::clone(&messages), request).await?;
        write_json_line(&reply);
        if is_shutdown {
            break;
        }
    }
    Ok(())
}

/// Requests run one at a time on a blocking thread; the engine is strictly
/// sequential and the mutex enforces that even if dispatches ever overlap.
async fn dispatch(
    kernel: Arc<Mutex<Kernel>>,
    messages: Arc<dyn MessageSink>,
    request: KernelRequest,
) -> Result<KernelReply, tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let mut kernel = kernel.lock().unwrap();
        match request {
            KernelRequest::Execute {
                code,
                silent,
                allow_stdin,
            } => kernel.execute(
                ExecutionRequest {
                    code: &code,
                    silent,
                    allow_stdin,
                },
                messages,
            ),
            KernelRequest::Complete { code, cursor_pos } => kernel.complete(&code, cursor_pos),
            KernelRequest::Inspect { code, cursor_pos } => kernel.inspect(&code, cursor_pos),
            KernelRequest::IsComplete { code } => kernel.is_complete(&code),
            KernelRequest::History => kernel.history(),
            KernelRequest::Shutdown { restart } => kernel.shutdown(restart),
        }
    })
    .await
}
