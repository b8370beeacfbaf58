// sentinel/src/persist/model_store.rs
//
// Cold-state persistence for per-user behavioral models.
//
// Table shape: user_behavior_models keyed by (user_id, model_type) with
// model_blob_base64, sha256 checksum, feature_window_count, version.
//
// Blob contract:
//   write — canonical padded base-64; an encoded length not divisible by 4
//           aborts the save (the prior valid row is preserved)
//   read  — the same length check plus checksum verification; any failure
//           deletes the offending row and returns null (auto-heal), so the
//           caller proceeds as cold start
//
// Versions move only through the conditional update: a save carrying
// expected_version commits iff the stored version still matches, then
// bumps it by one. Cross-process serialization lives here; within the
// process a per-(user, model) non-blocking lock keeps a single
// load-train-save cycle in flight — a concurrent second learner is
// dropped, not queued, and the next stream batch picks it up.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::SentinelConfig;
use crate::error::{SentinelError, SentinelResult};
use crate::events::FeatureWindow;
use crate::models::{BehaviorModel, ModelKind};
use crate::util::Clock;

pub const MAX_LEARN_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct StoredModel {
    pub model: BehaviorModel,
    pub feature_window_count: u32,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Saved,
    Conflict,
}

#[derive(Debug, Clone)]
struct ModelRow {
    blob_b64: String,
    checksum: String,
    feature_window_count: u32,
    version: u32,
    updated_at_ms: u64,
}

pub struct ModelStore {
    rows: DashMap<(String, ModelKind), ModelRow>,
    learn_locks: DashMap<(String, ModelKind), Arc<Mutex<()>>>,
    clock: Clock,
    cfg: SentinelConfig,
}

impl ModelStore {
    pub fn new(cfg: SentinelConfig, clock: Clock) -> Self {
        Self {
            rows: DashMap::new(),
            learn_locks: DashMap::new(),
            clock,
            cfg,
        }
    }

    // ── Load ──────────────────────────────────────────────────────────────────

    pub async fn load(
        &self,
        user_id: &str,
        kind: ModelKind,
    ) -> SentinelResult<Option<StoredModel>> {
        let key = (user_id.to_string(), kind);
        let row = match self.rows.get(&key) {
            Some(r) => r.clone(),
            None => return Ok(None),
        };

        if row.blob_b64.len() % 4 != 0 {
            error!(
                user_id,
                model_type = %kind,
                len = row.blob_b64.len(),
                "corrupted blob: base64 length not divisible by 4, deleting row"
            );
            self.rows.remove(&key);
            return Ok(None);
        }

        let bytes = match B64.decode(&row.blob_b64) {
            Ok(b) => b,
            Err(e) => {
                error!(user_id, model_type = %kind, %e, "blob decode failed, deleting row");
                self.rows.remove(&key);
                return Ok(None);
            }
        };

        let computed = hex_digest(&bytes);
        if computed != row.checksum {
            error!(user_id, model_type = %kind, "blob checksum mismatch, deleting row");
            self.rows.remove(&key);
            return Ok(None);
        }

        match BehaviorModel::from_blob(&bytes) {
            Ok(model) => Ok(Some(StoredModel {
                model,
                feature_window_count: row.feature_window_count,
                version: row.version,
            })),
            Err(e) => {
                error!(user_id, model_type = %kind, %e, "blob deserialize failed, deleting row");
                self.rows.remove(&key);
                Ok(None)
            }
        }
    }

    /// feature_window_count without materializing the model.
    pub async fn sample_count(&self, user_id: &str, kind: ModelKind) -> u32 {
        self.rows
            .get(&(user_id.to_string(), kind))
            .map(|r| r.feature_window_count)
            .unwrap_or(0)
    }

    // ── Save ──────────────────────────────────────────────────────────────────

    /// `expected_version = None` creates the row (conflicts if one
    /// appeared meanwhile); `Some(v)` updates iff the stored version is
    /// still `v`, committing as `v + 1`.
    pub async fn save(
        &self,
        user_id: &str,
        kind: ModelKind,
        model: &BehaviorModel,
        feature_window_count: u32,
        expected_version: Option<u32>,
    ) -> SentinelResult<SaveResult> {
        let bytes = model.to_blob().map_err(|e| SentinelError::BlobIntegrity {
            user_id: user_id.to_string(),
            model_type: kind.as_str().to_string(),
            detail: format!("serialize failed: {e}"),
        })?;
        let encoded = B64.encode(&bytes);
        if encoded.len() % 4 != 0 {
            return Err(SentinelError::BlobIntegrity {
                user_id: user_id.to_string(),
                model_type: kind.as_str().to_string(),
                detail: format!("encoded length {} not divisible by 4", encoded.len()),
            });
        }

        let row = ModelRow {
            checksum: hex_digest(&bytes),
            blob_b64: encoded,
            feature_window_count,
            version: expected_version.map(|v| v + 1).unwrap_or(1),
            updated_at_ms: self.clock.now_ms(),
        };

        let key = (user_id.to_string(), kind);
        let result = match self.rows.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occ) => match expected_version {
                Some(v) if occ.get().version == v => {
                    occ.insert(row);
                    SaveResult::Saved
                }
                _ => SaveResult::Conflict,
            },
            dashmap::mapref::entry::Entry::Vacant(vac) => match expected_version {
                None => {
                    vac.insert(row);
                    SaveResult::Saved
                }
                Some(_) => SaveResult::Conflict,
            },
        };

        if result == SaveResult::Conflict {
            warn!(user_id, model_type = %kind, "version conflict on model save");
        } else {
            debug!(
                user_id,
                model_type = %kind,
                windows = feature_window_count,
                "model saved"
            );
        }
        Ok(result)
    }

    /// Test/ops hook: overwrite the stored encoding directly, bypassing the
    /// write-side contract. How corruption enters the system in the wild.
    pub fn poke_raw_blob(&self, user_id: &str, kind: ModelKind, blob_b64: String) {
        if let Some(mut row) = self.rows.get_mut(&(user_id.to_string(), kind)) {
            row.blob_b64 = blob_b64;
        }
    }

    // ── Learning ──────────────────────────────────────────────────────────────

    fn learn_lock(&self, user_id: &str, kind: ModelKind) -> Arc<Mutex<()>> {
        self.learn_locks
            .entry((user_id.to_string(), kind))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load → train on `windows` → save with the observed version.
    /// Returns Ok(true) when a learning pass committed, Ok(false) when the
    /// cycle was skipped (lock held, nothing to learn) or retries ran out.
    pub async fn learn_with_retry(
        &self,
        user_id: &str,
        kind: ModelKind,
        windows: &[FeatureWindow],
    ) -> SentinelResult<bool> {
        if windows.is_empty() {
            return Ok(false);
        }

        // Non-blocking: if another task is mid-cycle for this user+model,
        // drop this one instead of queueing. Serializing here is what
        // prevents interleaved load-train-save cycles from clobbering
        // each other's blobs.
        let lock = self.learn_lock(user_id, kind);
        let _guard = match lock.try_lock_owned() {
            Ok(g) => g,
            Err(_) => {
                debug!(user_id, model_type = %kind, "learning lock held, skipping cycle");
                return Ok(false);
            }
        };

        for attempt in 0..MAX_LEARN_RETRIES {
            let (mut model, count, expected) = match self.load(user_id, kind).await? {
                Some(stored) => (
                    stored.model,
                    stored.feature_window_count,
                    Some(stored.version),
                ),
                None => (BehaviorModel::new(kind, &self.cfg), 0, None),
            };

            for window in windows {
                model.learn_one(window);
            }
            let new_count = count + windows.len() as u32;

            match self.save(user_id, kind, &model, new_count, expected).await? {
                SaveResult::Saved => return Ok(true),
                SaveResult::Conflict => {
                    debug!(user_id, model_type = %kind, attempt, "reloading after conflict");
                }
            }
        }

        warn!(
            user_id,
            model_type = %kind,
            "learning abandoned after {MAX_LEARN_RETRIES} version conflicts"
        );
        Ok(false)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
