//! Startup failures must abort before the listening socket is bound.

use std::net::TcpListener;
use std::process::{Command, Output};

fn netwatchd(args: &[&str], port: u16) -> Output {
    Command::new(env!("CARGO_BIN_EXE_netwatchd"))
        .args(args)
        .env_remove("NETWATCHD_CONFIG")
        .env_remove("NETWATCHD_LOG_LEVEL")
        .env_remove("RUST_LOG")
        .env("NETWATCH_PORT", port.to_string())
        .env("NETWATCHD_SERVER__HOST", "127.0.0.1")
        .output()
        .expect("failed to run netwatchd")
}

/// A port that was free a moment ago
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn test_missing_path_argument_exits_nonzero() {
    let port = free_port();
    let output = netwatchd(&[], port);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no file specified"), "stderr: {stderr}");
    // Nothing was left listening
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[test]
fn test_nonexistent_path_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist.txt");
    let port = free_port();

    let output = netwatchd(&[missing.to_str().unwrap()], port);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot watch"), "stderr: {stderr}");
    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[test]
fn test_port_in_use_exits_nonzero() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let output = netwatchd(&[file.path().to_str().unwrap()], port);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to bind"), "stderr: {stderr}");
}
