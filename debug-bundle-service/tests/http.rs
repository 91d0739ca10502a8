//! End-to-end tests against the actual compiled binary, grounded on
//! `harmonia-cache/tests/daemon.rs`'s spawn-and-poll-the-port style.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

use tokio::time::{sleep, timeout};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

struct ServiceGuard {
    child: Child,
    addr: String,
}

impl ServiceGuard {
    fn get(&self, path: &str) -> Result<(u16, String)> {
        http_request("GET", &self.addr, path, None)
    }

    fn post(&self, path: &str, body: &str) -> Result<(u16, String)> {
        http_request("POST", &self.addr, path, Some(body))
    }

    fn delete(&self, path: &str) -> Result<(u16, String)> {
        http_request("DELETE", &self.addr, path, None)
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn http_request(method: &str, addr: &str, path: &str, body: Option<&str>) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(addr)?;
    let body = body.unwrap_or_default();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes())?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;

    let mut lines = response.splitn(2, "\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or("malformed status line")?;
    let body = response.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
    Ok((status, body))
}

async fn start_service(data_dir: &Path, collector_path: &Path, port: u16) -> Result<ServiceGuard> {
    let config_path = data_dir.join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "collector_binary_path = \"{}\"\ndata_dir = \"{}\"\n",
            collector_path.display(),
            data_dir.display()
        ),
    )?;

    let addr = format!("127.0.0.1:{port}");
    let child = Command::new(env!("CARGO_BIN_EXE_debug-bundle-service"))
        .env("DEBUG_BUNDLE_SERVICE_CONFIG", &config_path)
        .env("DEBUG_BUNDLE_SERVICE_BIND", &addr)
        .spawn()?;

    wait_for_port(&addr, Duration::from_secs(10)).await?;
    Ok(ServiceGuard { child, addr })
}

async fn wait_for_port(addr: &str, duration: Duration) -> Result<()> {
    timeout(duration, async {
        loop {
            if TcpStream::connect(addr).is_ok() {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .map_err(|_| format!("timed out waiting for {addr}").into())
}

fn fake_collector_script(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("fake-collector.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn pick_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn initiate_then_status_then_fetch_file_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let collector = fake_collector_script(
        dir.path(),
        r#"for a in "$@"; do case "$a" in --output) shift; printf hi > "$1";; esac; done
exit 0"#,
    );
    let service = start_service(dir.path(), &collector, pick_port()).await?;

    let job_id = uuid::Uuid::new_v4();
    let (status, _) = service.post(
        "/v1/debug/bundle",
        &format!(r#"{{"job_id":"{job_id}","params":{{}}}}"#),
    )?;
    assert_eq!(status, 202);

    let mut last_body = String::new();
    for _ in 0..200 {
        let (status, body) = service.get("/v1/debug/bundle")?;
        assert_eq!(status, 200);
        last_body = body;
        if !last_body.contains("\"running\"") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(last_body.contains("\"success\""), "unexpected status body: {last_body}");

    let (status, _) = service.get(&format!("/v1/debug/bundle/{job_id}/file"))?;
    assert_eq!(status, 200);
    Ok(())
}

#[tokio::test]
async fn initiate_with_missing_binary_returns_service_unavailable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let service = start_service(dir.path(), &dir.path().join("nonexistent"), pick_port()).await?;

    let job_id = uuid::Uuid::new_v4();
    let (status, body) = service.post(
        "/v1/debug/bundle",
        &format!(r#"{{"job_id":"{job_id}","params":{{}}}}"#),
    )?;
    assert_eq!(status, 503);
    assert!(body.contains("rpk_binary_not_present"));
    Ok(())
}

#[tokio::test]
async fn cancel_running_job_returns_ok() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let collector = fake_collector_script(dir.path(), "sleep 60");
    let service = start_service(dir.path(), &collector, pick_port()).await?;

    let job_id = uuid::Uuid::new_v4();
    let (status, _) = service.post(
        "/v1/debug/bundle",
        &format!(r#"{{"job_id":"{job_id}","params":{{}}}}"#),
    )?;
    assert_eq!(status, 202);

    let (status, _) = service.post(&format!("/v1/debug/bundle/{job_id}/cancel"), "")?;
    assert_eq!(status, 200);
    Ok(())
}

#[tokio::test]
async fn delete_before_any_run_returns_not_found() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let collector = fake_collector_script(dir.path(), "exit 0");
    let service = start_service(dir.path(), &collector, pick_port()).await?;

    let (status, _) = service.delete(&format!("/v1/debug/bundle/{}", uuid::Uuid::new_v4()))?;
    assert_eq!(status, 404);
    Ok(())
}
