mod common;

use std::process::Command;

use common::TestResult;
use serde_json::Value as JsonValue;

#[test]
fn install_writes_kernelspec_into_named_directory() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let kernels_dir = temp.path().join("kernels");
    let exe = common::resolve_exe()?;

    let status = Command::new(exe)
        .arg("install")
        .arg("--kernels-dir")
        .arg(&kernels_dir)
        .arg("--command")
        .arg("/usr/local/bin/matlab-kernel")
        .arg("--arg")
        .arg("--engine-arg=-nodesktop")
        .status()?;
    assert!(status.success(), "install failed with status {status}");

    let spec_path = kernels_dir.join("matlab").join("kernel.json");
    let text = std::fs::read_to_string(spec_path)?;
    let spec: JsonValue = serde_json::from_str(&text)?;

    assert_eq!(spec["display_name"], "MATLAB");
    assert_eq!(spec["language"], "matlab");
    let argv: Vec<&str> = spec["argv"]
        .as_array()
        .expect("argv array")
        .iter()
        .filter_map(JsonValue::as_str)
        .collect();
    assert_eq!(
        argv,
        vec!["/usr/local/bin/matlab-kernel", "--engine-arg=-nodesktop"]
    );
    Ok(())
}

#[test]
fn install_respects_jupyter_data_dir_env() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let data_dir = temp.path().join("jupyter-data");
    let exe = common::resolve_exe()?;

    let status = Command::new(exe)
        .arg("install")
        .arg("--command")
        .arg("matlab-kernel")
        .env("JUPYTER_DATA_DIR", &data_dir)
        .status()?;
    assert!(status.success(), "install failed with status {status}");

    let spec_path = data_dir.join("kernels").join("matlab").join("kernel.json");
    assert!(spec_path.is_file(), "expected {}", spec_path.display());
    Ok(())
}
