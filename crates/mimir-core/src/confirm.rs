//! Confirmation ledger for destructive operations.
//!
//! Tokens are single-use, bound to `(action, params digest)`, and expire
//! after [`CONFIRMATION_TTL`]. The ledger is process-local state; a
//! background sweep drops expired entries so the map stays bounded.

use crate::{MimirError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

pub const CONFIRMATION_TTL: Duration = Duration::from_secs(60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct LedgerEntry {
    action: String,
    params_digest: String,
    issued_at: DateTime<Utc>,
    consumed: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LedgerStats {
    pub issued: u64,
    pub active: usize,
    pub consumed: u64,
    pub swept: u64,
}

/// One-shot confirmation handed back to the caller of a destructive preview.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Confirmation {
    #[serde(rename = "confirmationId")]
    pub id: String,
    #[serde(rename = "expiresIn")]
    pub expires_in_secs: u64,
}

pub struct ConfirmationLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    stats: Mutex<LedgerStats>,
}

impl ConfirmationLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(LedgerStats::default()),
        }
    }

    pub fn issue(&self, action: &str, params: &Value) -> Confirmation {
        let mut raw = [0u8; 32];
        rand::rng().fill_bytes(&mut raw);
        let token = hex_encode(&raw);

        let entry = LedgerEntry {
            action: action.to_string(),
            params_digest: params_digest(params),
            issued_at: Utc::now(),
            consumed: false,
        };
        self.entries.lock().insert(token.clone(), entry);
        self.stats.lock().issued += 1;

        Confirmation {
            id: token,
            expires_in_secs: CONFIRMATION_TTL.as_secs(),
        }
    }

    /// True iff the token exists, matches `(action, params)`, has not been
    /// consumed, and has not expired.
    pub fn validate(&self, token: &str, action: &str, params: &Value) -> bool {
        let entries = self.entries.lock();
        match entries.get(token) {
            Some(entry) => {
                !entry.consumed
                    && !is_expired(entry)
                    && entry.action == action
                    && entry.params_digest == params_digest(params)
            }
            None => false,
        }
    }

    /// Marks the token consumed. Fails for unknown, expired, or already
    /// consumed tokens.
    pub fn consume(&self, token: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(token)
            .ok_or_else(|| MimirError::ConfirmationInvalid("unknown confirmation id".into()))?;
        if entry.consumed {
            return Err(MimirError::ConfirmationInvalid(
                "confirmation already used".into(),
            ));
        }
        if is_expired(entry) {
            return Err(MimirError::ConfirmationInvalid("confirmation expired".into()));
        }
        entry.consumed = true;
        self.stats.lock().consumed += 1;
        Ok(())
    }

    /// Drops expired and consumed entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.consumed && !is_expired(e));
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.lock().swept += removed as u64;
            debug!(removed, "confirmation ledger sweep");
        }
        removed
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = self.stats.lock().clone();
        stats.active = self.entries.lock().len();
        stats
    }

    #[cfg(test)]
    fn backdate(&self, token: &str, by: Duration) {
        if let Some(entry) = self.entries.lock().get_mut(token) {
            entry.issued_at = entry.issued_at - ChronoDuration::from_std(by).unwrap();
        }
    }
}

impl Default for ConfirmationLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(entry: &LedgerEntry) -> bool {
    let ttl = ChronoDuration::from_std(CONFIRMATION_TTL).unwrap_or(ChronoDuration::seconds(60));
    Utc::now() - entry.issued_at > ttl
}

fn params_digest(params: &Value) -> String {
    // serde_json maps are key-ordered, so this serialization is canonical.
    let encoded = serde_json::to_vec(params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

static GLOBAL_LEDGER: Lazy<RwLock<Option<Arc<ConfirmationLedger>>>> =
    Lazy::new(|| RwLock::new(None));

/// Installs the process-wide ledger, replacing any previous one.
pub fn init_global() -> Arc<ConfirmationLedger> {
    let ledger = Arc::new(ConfirmationLedger::new());
    *GLOBAL_LEDGER.write() = Some(Arc::clone(&ledger));
    ledger
}

pub fn global() -> Result<Arc<ConfirmationLedger>> {
    GLOBAL_LEDGER
        .read()
        .clone()
        .ok_or_else(|| MimirError::Configuration("confirmation ledger not initialized".into()))
}

pub fn teardown_global() {
    *GLOBAL_LEDGER.write() = None;
}

/// Periodic sweep task. Holds only a weak reference so teardown lets the
/// task wind down on its next tick.
pub fn spawn_sweeper(ledger: &Arc<ConfirmationLedger>) -> tokio::task::JoinHandle<()> {
    let weak: Weak<ConfirmationLedger> = Arc::downgrade(ledger);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match weak.upgrade() {
                Some(ledger) => {
                    ledger.sweep();
                }
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_requires_matching_bundle() {
        let ledger = ConfirmationLedger::new();
        let params = json!({"type": "todo"});
        let c = ledger.issue("clear", &params);

        assert!(ledger.validate(&c.id, "clear", &params));
        assert!(!ledger.validate(&c.id, "delete", &params));
        assert!(!ledger.validate(&c.id, "clear", &json!({"type": "memory"})));
        assert!(!ledger.validate("bogus", "clear", &params));
    }

    #[test]
    fn consume_is_single_use() {
        let ledger = ConfirmationLedger::new();
        let params = json!({"id": "n1"});
        let c = ledger.issue("delete_node", &params);

        ledger.consume(&c.id).unwrap();
        assert!(!ledger.validate(&c.id, "delete_node", &params));
        let err = ledger.consume(&c.id).unwrap_err();
        assert_eq!(err.kind(), "EConfirmationInvalid");
    }

    #[test]
    fn expired_tokens_fail_and_sweep() {
        let ledger = ConfirmationLedger::new();
        let params = json!({});
        let c = ledger.issue("clear", &params);
        ledger.backdate(&c.id, Duration::from_secs(120));

        assert!(!ledger.validate(&c.id, "clear", &params));
        assert!(ledger.consume(&c.id).is_err());
        assert_eq!(ledger.sweep(), 1);
        assert_eq!(ledger.stats().active, 0);
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let ledger = ConfirmationLedger::new();
        let a = ledger.issue("x", &json!({}));
        let b = ledger.issue("x", &json!({}));
        assert_eq!(a.id.len(), 64);
        assert_ne!(a.id, b.id);
        assert_eq!(a.expires_in_secs, 60);
    }

    #[test]
    fn stats_track_issue_and_consume() {
        let ledger = ConfirmationLedger::new();
        let c = ledger.issue("clear", &json!({}));
        ledger.issue("clear", &json!({}));
        ledger.consume(&c.id).unwrap();
        let stats = ledger.stats();
        assert_eq!(stats.issued, 2);
        assert_eq!(stats.consumed, 1);
        assert_eq!(stats.active, 2);
    }
}
