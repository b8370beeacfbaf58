// sentinel/src/state/session.rs
//
// Hot session state and its store.
//
// The store is the in-memory equivalent of the shared key/value tier:
//   session:{id}:state      → versioned SessionState, 30 min sliding TTL
//   blacklist:{user_id}     → "{provenance}|{reason}", 5 min / 1 h / 24 h
//   global_strikes:{user_id}→ int, 7 day TTL
//   rate counters           → per-session per-second fixed windows
//
// Writers never mutate in place: update_transactional loads a snapshot,
// applies a deterministic closure, and commits with a version
// compare-and-set. Retries up to 5 times, then surfaces TransientConflict.
// Partial completion equals no completion.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{SentinelError, SentinelResult};
use crate::events::{Decision, FeatureWindow, GeoPoint, Mode, Phase};
use crate::extractors::keyboard::KeyboardBuffer;
use crate::extractors::mouse::MouseBuffer;
use crate::util::Clock;
use crate::workers::navigator::TofuContext;

pub const SESSION_TTL_S: u64 = 1800;
pub const STRIKE_TTL_S: u64 = 7 * 24 * 3600;
pub const MAX_RETRIES: u32 = 5;
pub const MAX_COMPLETED_WINDOWS: usize = 20;

// ── Session state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub user_id: String,
    pub trust_score: f64,
    pub mode: Mode,
    pub phase: Phase,
    pub last_kb_batch_id: u64,
    pub last_mouse_batch_id: u64,
    /// Most recent first, capped at MAX_COMPLETED_WINDOWS.
    pub completed_windows: Vec<FeatureWindow>,
    /// Completions fired since session start; survives window clearing.
    pub kb_window_count: u64,
    /// Wall-clock arrival (ms) of the session's first keyboard event.
    pub first_kb_event_time: Option<f64>,
    pub last_kb_score: f64,
    pub last_mouse_score: f64,
    pub last_nav_score: f64,
    pub last_identity_score: f64,
    pub last_identity_confidence: f64,
    pub consecutive_allows: u32,
    /// Fractional: gap resets add 0.5; compared rounded half-up.
    pub strike_count: f32,
    pub learning_suspended_until: u64,
    /// Last instant the navigator scored ≥ the suspension trigger.
    pub last_dirty_nav_ms: u64,
    pub context_stable_since: Option<u64>,
    pub tofu_context: Option<TofuContext>,
    pub last_geo: Option<(GeoPoint, u64)>,
    pub keyboard: KeyboardBuffer,
    pub mouse: MouseBuffer,
    pub last_activity_ms: u64,
    pub last_decision: Option<Decision>,
    pub last_risk: Option<f64>,
}

impl SessionState {
    pub fn new(user_id: &str, now_ms: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            trust_score: 0.5,
            mode: Mode::Normal,
            phase: Phase::Unknown,
            last_kb_batch_id: 0,
            last_mouse_batch_id: 0,
            completed_windows: Vec::new(),
            kb_window_count: 0,
            first_kb_event_time: None,
            last_kb_score: 0.0,
            last_mouse_score: 0.0,
            last_nav_score: 0.0,
            last_identity_score: 0.0,
            last_identity_confidence: 0.0,
            consecutive_allows: 0,
            strike_count: 0.0,
            learning_suspended_until: 0,
            last_dirty_nav_ms: 0,
            context_stable_since: None,
            tofu_context: None,
            last_geo: None,
            keyboard: KeyboardBuffer::default(),
            mouse: MouseBuffer::default(),
            last_activity_ms: now_ms,
            last_decision: None,
            last_risk: None,
        }
    }

    /// Integer strike count, half-up: one gap reset (+0.5) already counts.
    pub fn strikes_rounded(&self) -> u32 {
        (self.strike_count + 0.5).floor().max(0.0) as u32
    }

    pub fn push_window(&mut self, window: FeatureWindow) {
        self.completed_windows.insert(0, window);
        self.completed_windows.truncate(MAX_COMPLETED_WINDOWS);
        self.kb_window_count += 1;
    }
}

// ── Store entries ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct VersionedSession {
    version: u64,
    state: SessionState,
    expires_at_ms: u64,
}

#[derive(Debug, Clone)]
struct BanEntry {
    value: String, // "{provenance}|{reason}"
    expires_at_ms: u64,
}

#[derive(Debug, Clone)]
struct StrikeEntry {
    count: u32,
    expires_at_ms: u64,
}

// ── Store ─────────────────────────────────────────────────────────────────────

pub struct SessionStore {
    sessions: DashMap<String, VersionedSession>,
    bans: DashMap<String, BanEntry>,
    strikes: DashMap<String, StrikeEntry>,
    rate: DashMap<String, u32>,
    clock: Clock,
    ttl_ms: u64,
}

impl SessionStore {
    pub fn new(clock: Clock) -> Self {
        Self {
            sessions: DashMap::new(),
            bans: DashMap::new(),
            strikes: DashMap::new(),
            rate: DashMap::new(),
            clock,
            ttl_ms: SESSION_TTL_S * 1000,
        }
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    pub async fn get(&self, session_id: &str) -> SentinelResult<Option<SessionState>> {
        let now = self.clock.now_ms();
        let expired = match self.sessions.get(session_id) {
            Some(entry) if entry.expires_at_ms > now => return Ok(Some(entry.state.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            drop(self.sessions.remove(session_id));
        }
        Ok(None)
    }

    pub async fn put(&self, session_id: &str, state: SessionState) -> SentinelResult<()> {
        let now = self.clock.now_ms();
        let version = self
            .sessions
            .get(session_id)
            .map(|e| e.version + 1)
            .unwrap_or(1);
        self.sessions.insert(
            session_id.to_string(),
            VersionedSession {
                version,
                state,
                expires_at_ms: now + self.ttl_ms,
            },
        );
        Ok(())
    }

    /// Optimistic transactional update. `apply` must be a deterministic
    /// function of the loaded state so retries converge. A missing or
    /// expired session is hydrated fresh before the closure runs.
    pub async fn update_transactional<F>(
        &self,
        session_id: &str,
        user_id: &str,
        apply: F,
    ) -> SentinelResult<SessionState>
    where
        F: Fn(&mut SessionState),
    {
        let now = self.clock.now_ms();
        for attempt in 0..MAX_RETRIES {
            // Snapshot phase: observed version 0 means "absent".
            let (expected, mut state) = match self.sessions.get(session_id) {
                Some(entry) if entry.expires_at_ms > now => {
                    (entry.version, entry.state.clone())
                }
                _ => (0, SessionState::new(user_id, now)),
            };

            state.last_activity_ms = now;
            apply(&mut state);

            let next = VersionedSession {
                version: expected + 1,
                state: state.clone(),
                expires_at_ms: now + self.ttl_ms,
            };

            // Commit phase: the entry lock makes the version check and the
            // write one atomic step.
            let committed = match self.sessions.entry(session_id.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(mut occ) => {
                    let current = occ.get();
                    let live = current.expires_at_ms > now;
                    if (live && current.version == expected) || (!live && expected == 0) {
                        occ.insert(next);
                        true
                    } else {
                        false
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(vac) => {
                    if expected == 0 {
                        vac.insert(next);
                        true
                    } else {
                        false
                    }
                }
            };

            if committed {
                return Ok(state);
            }
            debug!(session_id, attempt, "optimistic conflict, retrying");
        }

        Err(SentinelError::TransientConflict {
            key: format!("session:{session_id}:state"),
            attempts: MAX_RETRIES,
        })
    }

    // ── Bans ──────────────────────────────────────────────────────────────────

    pub async fn set_ban(
        &self,
        user_id: &str,
        ttl_s: u64,
        provenance: &str,
        reason: &str,
    ) -> SentinelResult<()> {
        let now = self.clock.now_ms();
        self.bans.insert(
            user_id.to_string(),
            BanEntry {
                value: format!("{provenance}|{reason}"),
                expires_at_ms: now + ttl_s * 1000,
            },
        );
        Ok(())
    }

    /// Active ban, as (value, remaining seconds).
    pub async fn get_ban(&self, user_id: &str) -> SentinelResult<Option<(String, u64)>> {
        let now = self.clock.now_ms();
        let expired = match self.bans.get(user_id) {
            Some(entry) if entry.expires_at_ms > now => {
                let remaining = (entry.expires_at_ms - now) / 1000;
                return Ok(Some((entry.value.clone(), remaining)));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            drop(self.bans.remove(user_id));
        }
        Ok(None)
    }

    pub async fn clear_ban(&self, user_id: &str) -> SentinelResult<()> {
        self.bans.remove(user_id);
        Ok(())
    }

    // ── Strikes ───────────────────────────────────────────────────────────────

    pub async fn incr_strike(&self, user_id: &str) -> SentinelResult<u32> {
        let now = self.clock.now_ms();
        let mut entry = self
            .strikes
            .entry(user_id.to_string())
            .or_insert(StrikeEntry {
                count: 0,
                expires_at_ms: now + STRIKE_TTL_S * 1000,
            });
        if entry.expires_at_ms <= now {
            entry.count = 0;
            entry.expires_at_ms = now + STRIKE_TTL_S * 1000;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    pub async fn get_strikes(&self, user_id: &str) -> SentinelResult<u32> {
        let now = self.clock.now_ms();
        Ok(self
            .strikes
            .get(user_id)
            .filter(|e| e.expires_at_ms > now)
            .map(|e| e.count)
            .unwrap_or(0))
    }

    // ── Rate limiting ─────────────────────────────────────────────────────────

    /// Fixed one-second window counter. Returns false when the budget for
    /// the current second is exhausted.
    pub fn check_rate(&self, prefix: &str, session_id: &str, limit: u32) -> bool {
        let second = self.clock.now_ms() / 1000;
        let key = format!("{prefix}:{session_id}:{second}");
        let mut count = self.rate.entry(key).or_insert(0);
        *count += 1;
        *count <= limit
    }

    // ── Housekeeping ──────────────────────────────────────────────────────────

    pub async fn housekeeping_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
            self.sweep_expired();
        }
    }

    pub fn sweep_expired(&self) {
        let now = self.clock.now_ms();
        self.sessions.retain(|_, v| v.expires_at_ms > now);
        self.bans.retain(|_, v| v.expires_at_ms > now);
        self.strikes.retain(|_, v| v.expires_at_ms > now);
        let current_second = now / 1000;
        self.rate.retain(|k, _| {
            k.rsplit(':')
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|s| s + 2 >= current_second)
                .unwrap_or(false)
        });
    }

    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }
}
