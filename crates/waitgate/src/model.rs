// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core data model (spec §3): positions, queue descriptors, active sessions.

use serde::{Deserialize, Serialize};

/// Discrete priority level. Higher admits first (spec §3, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Normal = 0,
    Elevated = 1,
    Vip = 2,
    PremiumImmediate = 3,
}

impl Priority {
    pub const ALL_DESCENDING: [Priority; 4] =
        [Priority::PremiumImmediate, Priority::Vip, Priority::Elevated, Priority::Normal];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Normal),
            1 => Some(Self::Elevated),
            2 => Some(Self::Vip),
            3 => Some(Self::PremiumImmediate),
            _ => None,
        }
    }
}

/// Position lifecycle status (spec §3, §8: monotone state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Waiting,
    Admitted,
    Expired,
    Completed,
    Cancelled,
}

impl PositionStatus {
    /// Whether `self -> next` is a legal state-machine transition.
    pub fn can_transition_to(self, next: PositionStatus) -> bool {
        use PositionStatus::*;
        matches!(
            (self, next),
            (Waiting, Admitted) | (Waiting, Expired) | (Waiting, Cancelled)
        )
    }
}

/// A client's slot in one queue (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub queue_id: String,
    pub priority: Priority,
    pub status: PositionStatus,
    /// Microsecond-resolution monotonic enqueue score, used for strict FIFO
    /// ordering within a priority (spec §4.C step 4).
    pub enqueued_at_micros: u64,
    pub last_heartbeat_at_secs: u64,
    pub fingerprint: String,
    pub user_agent_hash: Option<String>,
    pub metadata: serde_json::Value,
    pub admitted_at_secs: Option<u64>,
    pub expired_at_secs: Option<u64>,
    pub expiry_reason: Option<String>,
    /// Set once this position is dequeued, linking it to the active-session
    /// record minted by the admission controller (spec §3 "Cyclic
    /// references avoided": the link is id-only, no back-pointer hash).
    pub session_id: Option<String>,
}

/// Per-queue configuration (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Active,
    Paused,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub name: String,
    pub target_url: String,
    pub max_active: u64,
    /// 0 == unbounded.
    pub max_size: u64,
    /// Positions admitted per second (may be fractional).
    pub admission_rate: f64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub grace_period_secs: u64,
    pub status: QueueStatus,
}

impl QueueDescriptor {
    /// Estimated wait, clamped at zero (spec §4.C "Estimated wait").
    pub fn estimated_wait_secs(&self, rank: u64) -> f64 {
        if self.admission_rate <= 0.0 {
            return 0.0;
        }
        (rank as f64 / self.admission_rate).max(0.0)
    }
}

/// Active-session record for an admitted client (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Terminated,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!((self, next), (Active, Expired) | (Active, Terminated))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: String,
    pub queue_id: String,
    pub position_id: String,
    pub issued_at_secs: u64,
    pub expires_at_secs: u64,
    pub last_activity_at_secs: u64,
    pub view_count: u64,
    pub status: SessionStatus,
}
