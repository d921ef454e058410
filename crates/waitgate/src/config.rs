// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Which `StoreAdapter` backing to use (spec §9, "pluggable store").
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum StoreKind {
    /// Embedded ordered map + mutex, single process only.
    Memory,
    /// Redis (or Redis-protocol-compatible) server, shared across processes.
    Redis,
}

/// Top-level configuration for the waitgate server.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "WAITGATE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "WAITGATE_PORT")]
    pub port: u16,

    /// Bearer key for admin endpoints (`/admin/...`). Fatal if unset and
    /// `--require-production-salt` implies production mode.
    #[arg(long, env = "WAITGATE_ADMIN_KEY")]
    pub admin_key: Option<String>,

    /// Store backend.
    #[arg(long, value_enum, default_value_t = StoreKind::Memory, env = "WAITGATE_STORE_KIND")]
    pub store_kind: StoreKind,

    /// Store server address (only used when `--store-kind redis`).
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "WAITGATE_STORE_ADDR")]
    pub store_addr: String,

    /// Event bus (NATS) address. If unset, events are logged but not published.
    #[arg(long, env = "WAITGATE_EVENT_BUS_ADDR")]
    pub event_bus_addr: Option<String>,

    /// Subject prefix for published events.
    #[arg(long, default_value = "waitgate", env = "WAITGATE_EVENT_PREFIX")]
    pub event_prefix: String,

    /// Salt mixed into client fingerprints before hashing. Must be set
    /// explicitly in production — see `require_production_salt`.
    #[arg(long, env = "WAITGATE_FINGERPRINT_SALT")]
    pub fingerprint_salt: Option<String>,

    /// Refuse to start if `fingerprint_salt` is unset (spec §6: "no silent
    /// defaulting of the fingerprint-salt in production").
    #[arg(long, default_value_t = false, env = "WAITGATE_REQUIRE_PRODUCTION_SALT")]
    pub require_production_salt: bool,

    /// Default heartbeat interval advertised to clients, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "WAITGATE_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// Default heartbeat timeout before a position is reaped, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "WAITGATE_HEARTBEAT_TIMEOUT_MS")]
    pub heartbeat_timeout_ms: u64,

    /// Grace period after expiry/cancellation before metadata is dropped, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "WAITGATE_GRACE_MS")]
    pub grace_ms: u64,

    /// Reaper tick cadence, in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "WAITGATE_REAPER_INTERVAL_MS")]
    pub reaper_interval_ms: u64,

    /// Max positions the reaper evicts per queue per tick.
    #[arg(long, default_value_t = 100, env = "WAITGATE_REAPER_BATCH_SIZE")]
    pub reaper_batch_size: u64,

    /// Per-fingerprint request budget for the gateway's rate limiter
    /// (requests per second, sustained).
    #[arg(long, default_value_t = 10, env = "WAITGATE_RATE_LIMIT_PER_SEC")]
    pub rate_limit_per_sec: u32,

    /// Burst allowance on top of `rate_limit_per_sec`.
    #[arg(long, default_value_t = 20, env = "WAITGATE_RATE_LIMIT_BURST")]
    pub rate_limit_burst: u32,

    /// Clock skew tolerance for credential validation, in seconds.
    #[arg(long, default_value_t = 30, env = "WAITGATE_CLOCK_SKEW_SECS")]
    pub clock_skew_secs: u64,

    /// Whether to reject requests whose presented fingerprint does not match
    /// the credential's bound fingerprint (`bound-mismatch`), versus logging
    /// and accepting anyway (spec §4.B, §9 open question).
    #[arg(long, default_value_t = true, env = "WAITGATE_BIND_FINGERPRINT_STRICT")]
    pub bind_fingerprint_strict: bool,

    /// Log level (also controlled via `RUST_LOG`).
    #[arg(long, default_value = "info", env = "WAITGATE_LOG_LEVEL")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Validate fatal-at-startup conditions (spec §7 class (e)).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.require_production_salt && self.fingerprint_salt.is_none() {
            anyhow::bail!(
                "configuration-error: WAITGATE_FINGERPRINT_SALT must be set when \
                 --require-production-salt is set"
            );
        }
        Ok(())
    }

    pub fn fingerprint_salt(&self) -> &str {
        self.fingerprint_salt.as_deref().unwrap_or("waitgate-dev-salt")
    }
}
