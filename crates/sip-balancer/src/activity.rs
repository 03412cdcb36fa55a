// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Last-seen bookkeeping for pinned calls.
//!
//! The balancer runs without a transaction layer, so nothing reports a
//! timeout on its own. Every pinned call is tracked here and a periodic sweep
//! hands back the calls that went quiet.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use smol_str::SmolStr;

/// How far a call has progressed, as seen from the messages crossing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// Requests only, no response yet.
    Trying,
    /// Some response came back.
    Proceeding,
    /// A 2xx answered a dialog-creating request.
    Established,
}

#[derive(Debug, Clone, Copy)]
struct CallEntry {
    phase: CallPhase,
    last_seen: Instant,
}

/// Idle horizons applied by [`CallActivity::expire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Allowed silence before the first response (64 x T1 in a stateful stack).
    pub unanswered: Duration,
    /// Allowed silence once the call has been answered.
    pub idle: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            unanswered: Duration::from_secs(32),
            idle: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Default)]
pub struct CallActivity {
    calls: DashMap<SmolStr, CallEntry>,
}

impl CallActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request of `call_id` went through.
    pub fn record_request(&self, call_id: &str) {
        let now = Instant::now();
        self.calls
            .entry(SmolStr::new(call_id))
            .and_modify(|entry| entry.last_seen = now)
            .or_insert(CallEntry {
                phase: CallPhase::Trying,
                last_seen: now,
            });
    }

    /// A response of a tracked call went through. Untracked calls are ignored.
    pub fn record_response(&self, call_id: &str, establishes: bool) {
        if let Some(mut entry) = self.calls.get_mut(call_id) {
            entry.last_seen = Instant::now();
            entry.phase = match (entry.phase, establishes) {
                (_, true) | (CallPhase::Established, _) => CallPhase::Established,
                _ => CallPhase::Proceeding,
            };
        }
    }

    pub fn phase(&self, call_id: &str) -> Option<CallPhase> {
        self.calls.get(call_id).map(|entry| entry.phase)
    }

    pub fn forget(&self, call_id: &str) {
        self.calls.remove(call_id);
    }

    /// Drops and returns every call silent for longer than its horizon.
    pub fn expire(&self, timeouts: &CallTimeouts) -> Vec<SmolStr> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.calls.retain(|call_id, entry| {
            let limit = match entry.phase {
                CallPhase::Trying => timeouts.unanswered,
                CallPhase::Proceeding | CallPhase::Established => timeouts.idle,
            };
            let keep = now.duration_since(entry.last_seen) < limit;
            if !keep {
                expired.push(call_id.clone());
            }
            keep
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
