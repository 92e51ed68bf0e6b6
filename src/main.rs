mod capture;
mod completion;
mod diagnostics;
mod engine;
mod engine_process;
mod event_log;
mod install;
mod kernel;
mod output_filter;
mod plots;
mod protocol;
mod server;
mod session;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use crate::engine_process::ProcessEngineLauncher;

enum CliCommand {
    RunServer(CliOptions),
    Install(install::InstallOptions),
}

struct CliOptions {
    engine_command: Option<String>,
    engine_args: Vec<String>,
    debug_events_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(target_family = "unix")]
    // The client may disconnect and close its read end while the kernel is
    // still writing. Ignore SIGPIPE so writes fail with broken-pipe errors
    // instead of killing the process.
    ignore_sigpipe();

    diagnostics::startup_log("main: entry");
    match parse_cli_args()? {
        CliCommand::RunServer(options) => {
            diagnostics::startup_log("main: server mode");
            let launcher =
                ProcessEngineLauncher::from_env(options.engine_command, options.engine_args);
            event_log::initialize(
                options.debug_events_dir,
                event_log::StartupContext {
                    mode: "server".to_string(),
                    engine_command: launcher.command().to_string(),
                },
            )?;
            server::run(Box::new(launcher)).await
        }
        CliCommand::Install(options) => {
            diagnostics::startup_log("main: install mode");
            install::run(options)
        }
    }
}

#[cfg(target_family = "unix")]
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn parse_cli_args() -> Result<CliCommand, Box<dyn std::error::Error>> {
    let mut parser = ArgParser::new();
    if let Some(arg) = parser.peek()
        && arg == "install"
    {
        parser.next();
        return Ok(CliCommand::Install(parse_install_args(&mut parser)?));
    }

    let mut engine_command = None;
    let mut engine_args = Vec::new();
    let mut debug_events_dir = None;
    while let Some(arg) = parser.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--engine" => {
                let value = parser.next_value("--engine")?;
                if value.trim().is_empty() {
                    return Err("missing value for --engine".into());
                }
                engine_command = Some(value);
            }
            _ if arg.starts_with("--engine=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.trim().is_empty() {
                    return Err("missing value for --engine".into());
                }
                engine_command = Some(value.to_string());
            }
            "--engine-arg" => {
                engine_args.push(parser.next_value("--engine-arg")?);
            }
            _ if arg.starts_with("--engine-arg=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.is_empty() {
                    return Err("missing value for --engine-arg".into());
                }
                engine_args.push(value.to_string());
            }
            "--debug-events-dir" => {
                let value = parser.next_value("--debug-events-dir")?;
                if value.trim().is_empty() {
                    return Err("missing value for --debug-events-dir".into());
                }
                debug_events_dir = Some(PathBuf::from(value));
            }
            _ if arg.starts_with("--debug-events-dir=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.trim().is_empty() {
                    return Err("missing value for --debug-events-dir".into());
                }
                debug_events_dir = Some(PathBuf::from(value));
            }
            _ => return Err(format!("unknown argument: {arg}").into()),
        }
    }

    Ok(CliCommand::RunServer(CliOptions {
        engine_command,
        engine_args,
        debug_events_dir,
    }))
}

fn parse_install_args(
    parser: &mut ArgParser,
) -> Result<install::InstallOptions, Box<dyn std::error::Error>> {
    let mut options = install::InstallOptions::default();
    while let Some(arg) = parser.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_install_usage();
                std::process::exit(0);
            }
            "--kernels-dir" => {
                let value = parser.next_value("--kernels-dir")?;
                if value.trim().is_empty() {
                    return Err("missing value for --kernels-dir".into());
                }
                options.kernels_dir = Some(PathBuf::from(value));
            }
            _ if arg.starts_with("--kernels-dir=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.trim().is_empty() {
                    return Err("missing value for --kernels-dir".into());
                }
                options.kernels_dir = Some(PathBuf::from(value));
            }
            "--command" => {
                options.command = Some(parser.next_value("--command")?);
            }
            _ if arg.starts_with("--command=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.is_empty() {
                    return Err("missing value for --command".into());
                }
                options.command = Some(value.to_string());
            }
            "--arg" => {
                options.args.push(parser.next_value("--arg")?);
            }
            _ if arg.starts_with("--arg=") => {
                let value = arg.split_once('=').map(|(_, value)| value).unwrap_or("");
                if value.is_empty() {
                    return Err("missing value for --arg".into());
                }
                options.args.push(value.to_string());
            }
            _ => return Err(format!("unknown install option: {arg}").into()),
        }
    }
    Ok(options)
}

struct ArgParser {
    args: Vec<String>,
    index: usize,
}

impl ArgParser {
    fn new() -> Self {
        Self {
            args: std::env::args().skip(1).collect(),
            index: 0,
        }
    }

    fn next(&mut self) -> Option<String> {
        let value = self.args.get(self.index)?.clone();
        self.index += 1;
        Some(value)
    }

    fn peek(&self) -> Option<&str> {
        self.args.get(self.index).map(String::as_str)
    }

    fn next_value(&mut self, flag: &str) -> Result<String, Box<dyn std::error::Error>> {
        self.next()
            .ok_or_else(|| format!("missing value for {flag}").into())
    }
}

fn print_usage() {
    println!(
        "Usage:\n\
matlab-kernel [--engine <command>] [--engine-arg <value>]... [--debug-events-dir <dir>]\n\
matlab-kernel install [--kernels-dir <dir>] [--command <path>] [--arg <value>]...\n\n\
--engine: engine host command (default: matlab-engine-host; env: {engine_env})\n\
--engine-arg: extra argument passed to the engine host (repeatable; env: {args_env})\n\
--debug-events-dir: optional directory for per-startup JSONL debug event logs (env: {events_env})\n\
install: write a Jupyter kernelspec for this kernel",
        engine_env = engine_process::ENGINE_COMMAND_ENV,
        args_env = engine_process::ENGINE_ARGS_ENV,
        events_env = event_log::DEBUG_EVENTS_DIR_ENV,
    );
}

fn print_install_usage() {
    println!(
        "Usage:\n\
matlab-kernel install [--kernels-dir <dir>] [--command <path>] [--arg <value>]...\n\n\
Writes kernels/{name}/kernel.json under the Jupyter user data directory\n\
(or --kernels-dir). The recorded command defaults to this executable.",
        name = install::KERNELSPEC_NAME,
    );
}
