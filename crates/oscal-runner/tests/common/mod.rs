#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_file(true)
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

/// Write an executable shell script and return its path
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A localhost port nothing listens on
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
