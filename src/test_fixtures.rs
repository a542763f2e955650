//! Test fixtures for process and download tests
//!
//! Writes small executable shell scripts that stand in for the real tools,
//! and serves one-shot or stalled HTTP responses from a local socket.

#![cfg(test)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

#[cfg(unix)]
use tempfile::TempDir;

/// Write an executable `#!/bin/sh` script named `name` into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("Failed to chmod script");
    path
}

/// Write a non-executable file
#[cfg(unix)]
pub fn write_plain_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write file");
    path
}

/// Temp dir holding a fake `probe` that answers `-version` like ffprobe
#[cfg(unix)]
pub fn fake_tool_dir() -> TempDir {
    let dir = TempDir::new().expect("Failed to create fixture dir");
    write_script(
        dir.path(),
        "probe",
        r#"if [ "$1" = "-version" ]; then
  echo "probe version 6.1.1 Copyright (c) 2007-2023 the FFmpeg developers"
  exit 0
fi
echo "unrecognized option '$1'" >&2
exit 1"#,
    );
    dir
}

fn read_request_head(stream: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
}

/// Answer exactly one HTTP request with `status` and `body`
///
/// Returns the base URL (`http://127.0.0.1:<port>`) and the server thread.
pub fn serve_once(status: &str, body: Vec<u8>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    let base = format!("http://{}", listener.local_addr().unwrap());
    let status = status.to_string();

    let handle = thread::spawn(move || {
        let (mut stream, _) = match listener.accept() {
            Ok(conn) => conn,
            Err(_) => return,
        };

        read_request_head(&mut stream);

        let header = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        let _ = stream.write_all(header.as_bytes());
        let _ = stream.write_all(&body);
        let _ = stream.flush();
    });

    (base, handle)
}

/// Send the headers and the first `sent` bytes of a longer body, then stall
///
/// The connection stays open until the returned sender is used or dropped.
pub fn serve_stalled(sent: Vec<u8>, content_length: usize) -> (String, mpsc::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        let (mut stream, _) = match listener.accept() {
            Ok(conn) => conn,
            Err(_) => return,
        };
        read_request_head(&mut stream);

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            content_length
        );
        let _ = stream.write_all(header.as_bytes());
        let _ = stream.write_all(&sent);
        let _ = stream.flush();

        let _ = release_rx.recv();
    });

    (base, release_tx, handle)
}
