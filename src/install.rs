//! `install` subcommand: registers the kernel with Jupyter by writing a
//! kernelspec directory under the user's kernels location.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

pub const KERNELSPEC_NAME: &str = "matlab";
pub const JUPYTER_DATA_DIR_ENV: &str = "JUPYTER_DATA_DIR";

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Explicit kernels directory; replaces the platform default.
    pub kernels_dir: Option<PathBuf>,
    /// Command recorded in the kernelspec; defaults to this executable.
    pub command: Option<String>,
    /// Extra arguments appended after the command.
    pub args: Vec<String>,
}

pub fn run(options: InstallOptions) -> Result<(), Box<dyn std::error::Error>> {
    let command = options.command.unwrap_or_else(default_command);
    let kernels_dir = match options.kernels_dir {
        Some(dir) => dir,
        None => default_kernels_dir()?,
    };
    let spec_dir = kernels_dir.join(KERNELSPEC_NAME);
    fs::create_dir_all(&spec_dir)?;
    let spec_path = spec_dir.join("kernel.json");
    fs::write(&spec_path, kernelspec_json(&command, &options.args))?;
    println!("installed kernelspec to {}", spec_path.display());
    Ok(())
}

fn kernelspec_json(command: &str, args: &[String]) -> String {
    let mut argv = vec![command.to_string()];
    argv.extend(args.iter().cloned());
    let spec = json!({
        "argv": argv,
        "display_name": "MATLAB",
        "language": "matlab",
        "interrupt_mode": "message",
    });
    let mut text = serde_json::to_string_pretty(&spec).unwrap_or_default();
    text.push('\n');
    text
}

fn default_command() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| path.into_os_string().into_string().ok())
        .unwrap_or_else(|| "matlab-kernel".to_string())
}

fn default_kernels_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(dir) = env::var_os(JUPYTER_DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir).join("kernels"));
    }
    let home = home_dir()?;
    Ok(platform_kernels_dir(&home))
}

#[cfg(target_os = "macos")]
fn platform_kernels_dir(home: &Path) -> PathBuf {
    home.join("Library").join("Jupyter").join("kernels")
}

#[cfg(target_family = "windows")]
fn platform_kernels_dir(home: &Path) -> PathBuf {
    match env::var_os("APPDATA").filter(|value| !value.is_empty()) {
        Some(appdata) => PathBuf::from(appdata).join("jupyter").join("kernels"),
        None => home.join("jupyter").join("kernels"),
    }
}

#[cfg(all(target_family = "unix", not(target_os = "macos")))]
fn platform_kernels_dir(home: &Path) -> PathBuf {
    let data_home = env::var_os("XDG_DATA_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(".local").join("share"));
    data_home.join("jupyter").join("kernels")
}

fn home_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    resolve_home_dir_from_env(env::var_os("HOME"), env::var_os("USERPROFILE"))
        .ok_or_else(|| "could not determine home directory (HOME is unset)".into())
}

fn resolve_home_dir_from_env(
    home: Option<OsString>,
    userprofile: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(home) = home.filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(home));
    }
    userprofile
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
