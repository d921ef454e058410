// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `waitgate` binary as a subprocess and exercises its
//! HTTP surface (spec §6), covering the numbered scenarios in spec §8.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `waitgate` binary.
pub fn waitgate_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("waitgate")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `waitgate` process, killed on drop.
pub struct WaitgateProcess {
    child: Child,
    port: u16,
}

/// Builder for configuring test-speed knobs (heartbeat timeout, reaper
/// cadence) before spawning a [`WaitgateProcess`].
pub struct WaitgateBuilder {
    admin_key: Option<String>,
    heartbeat_timeout_ms: u64,
    grace_ms: u64,
    reaper_interval_ms: u64,
    rate_limit_per_sec: u32,
    rate_limit_burst: u32,
}

impl Default for WaitgateBuilder {
    fn default() -> Self {
        Self {
            admin_key: Some("test-admin-key".to_owned()),
            heartbeat_timeout_ms: 60_000,
            grace_ms: 30_000,
            reaper_interval_ms: 5_000,
            rate_limit_per_sec: 1_000,
            rate_limit_burst: 1_000,
        }
    }
}

impl WaitgateBuilder {
    pub fn heartbeat_timeout_ms(mut self, v: u64) -> Self {
        self.heartbeat_timeout_ms = v;
        self
    }

    pub fn grace_ms(mut self, v: u64) -> Self {
        self.grace_ms = v;
        self
    }

    pub fn reaper_interval_ms(mut self, v: u64) -> Self {
        self.reaper_interval_ms = v;
        self
    }

    pub fn spawn(self) -> anyhow::Result<WaitgateProcess> {
        let binary = waitgate_binary();
        anyhow::ensure!(binary.exists(), "waitgate binary not found at {}", binary.display());

        let port = free_port()?;
        let mut cmd = Command::new(&binary);
        cmd.args([
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--log-level",
            "warn",
            "--heartbeat-timeout-ms",
            &self.heartbeat_timeout_ms.to_string(),
            "--grace-ms",
            &self.grace_ms.to_string(),
            "--reaper-interval-ms",
            &self.reaper_interval_ms.to_string(),
            "--rate-limit-per-sec",
            &self.rate_limit_per_sec.to_string(),
            "--rate-limit-burst",
            &self.rate_limit_burst.to_string(),
        ]);
        if let Some(ref key) = self.admin_key {
            cmd.args(["--admin-key", key]);
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let child = cmd.spawn()?;
        Ok(WaitgateProcess { child, port })
    }
}

impl WaitgateProcess {
    pub fn build() -> WaitgateBuilder {
        WaitgateBuilder::default()
    }

    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn admin_key(&self) -> &str {
        "test-admin-key"
    }

    /// Poll `/health` until it responds successfully.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("waitgate did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Create a queue via the admin API.
    pub async fn create_queue(&self, body: serde_json::Value) -> anyhow::Result<reqwest::Response> {
        let client = reqwest::Client::new();
        Ok(client
            .post(format!("{}/admin/queues", self.base_url()))
            .bearer_auth(self.admin_key())
            .json(&body)
            .send()
            .await?)
    }
}

impl Drop for WaitgateProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
