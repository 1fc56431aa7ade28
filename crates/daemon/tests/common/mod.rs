// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for black-box node tests: spawn `munchkind`, talk HTTP.

#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::Value;

pub const RULE: &str = r#"{"source": ["billing"], "detail": {"state": ["open"]}}"#;
pub const MATCHING_EVENT: &str = r#"{"source": "billing", "detail": {"state": "open", "id": 7}}"#;

/// A running `munchkind` on ephemeral loopback ports
pub struct NodeProcess {
    child: Child,
    // Held so the node never writes into a closed pipe
    _stdout: BufReader<ChildStdout>,
    pub match_url: String,
    pub admin_url: String,
    pub replication_addr: String,
}

impl NodeProcess {
    /// Start a node with `extra` flags and wait for its READY line
    pub fn start(extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_munchkind"))
            .args([
                "--bind",
                "127.0.0.1",
                "--match-api-port",
                "0",
                "--admin-api-port",
                "0",
                "--replication-port",
                "0",
                "--probe-interval-ms",
                "100",
                // Replicas are not synchronized with each other
                "--pool-size",
                "1",
            ])
            .args(extra)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn munchkind");

        let mut stdout = BufReader::new(child.stdout.take().expect("stdout is piped"));
        let mut line = String::new();
        stdout.read_line(&mut line).expect("Failed to read READY line");
        assert!(line.starts_with("READY "), "unexpected first line: {line:?}");

        let field = |name: &str| {
            line.split_whitespace()
                .find_map(|part| part.strip_prefix(&format!("{name}=")).map(str::to_string))
                .unwrap_or_else(|| panic!("READY line lacks {name}: {line:?}"))
        };

        Self {
            match_url: format!("http://{}", field("match")),
            admin_url: format!("http://{}", field("admin")),
            replication_addr: field("replication"),
            child,
            _stdout: stdout,
        }
    }

    /// Start a node journaling into `wal_dir`
    pub fn with_wal(wal_dir: &Path, extra: &[&str]) -> Self {
        let mut args = vec!["--wal-dir", wal_dir.to_str().expect("utf-8 path")];
        args.extend_from_slice(extra);
        Self::start(&args)
    }

    pub fn add(&self, key: &str, pattern: &str) -> (u16, Value) {
        let mut response = agent()
            .post(format!("{}/api/admin/v1/add?key={key}", self.admin_url))
            .send(pattern)
            .expect("add request failed");
        read(&mut response)
    }

    pub fn delete(&self, key: &str) -> (u16, Value) {
        let mut response = agent()
            .delete(format!("{}/api/admin/v1/delete-by-key?key={key}", self.admin_url))
            .call()
            .expect("delete request failed");
        read(&mut response)
    }

    pub fn matches(&self, event: &str) -> Vec<String> {
        let mut response = agent()
            .post(format!("{}/api/v1/match", self.match_url))
            .send(event)
            .expect("match request failed");
        let (status, body) = read(&mut response);
        assert_eq!(status, 200, "match failed: {body}");
        serde_json::from_value(body["matches"].clone()).expect("matches is a list of ids")
    }

    pub fn heartbeat(&self) -> (u16, Value) {
        let mut response = agent()
            .get(format!("{}/api/v1/heartbeat", self.match_url))
            .call()
            .expect("heartbeat request failed");
        read(&mut response)
    }

    /// SIGTERM and wait for a clean exit
    pub fn stop(mut self) {
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM).expect("Failed to send SIGTERM");
        let status = self.child.wait().expect("Failed to wait for munchkind");
        assert!(status.success(), "munchkind exited with {status:?}");
    }
}

impl Drop for NodeProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(10)))
        .build()
        .into()
}

fn read(response: &mut ureq::http::Response<ureq::Body>) -> (u16, Value) {
    let status = response.status().as_u16();
    let text = response.body_mut().read_to_string().expect("Failed to read body");
    let body = serde_json::from_str(&text).unwrap_or(Value::Null);
    (status, body)
}

/// Poll `check` for up to five seconds
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}
