use crate::error::PipelineError;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    #[serde(rename = "access_token")]
    pub value: String,
    #[serde(rename = "expires_at_ms")]
    pub expires_at_ms: i64,
}

impl AccessToken {
    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        !self.value.is_empty() && now_ms < self.expires_at_ms
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TokenGranted {
    pub expires_at_ms: i64,
}

/// One OAuth access token, persisted as a single JSON record so value and
/// expiry can never be observed out of step.
pub struct TokenStore {
    path: PathBuf,
    guard: Mutex<()>,
    listeners: Mutex<Vec<Sender<TokenGranted>>>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the token only while it is still valid. An expired or
    /// unreadable record is removed as a side effect.
    pub fn get(&self) -> Option<AccessToken> {
        let _lock = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        let token = match load_record(&self.path) {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(err) => {
                warn!("Discarding unreadable token record: {}", err);
                remove_record(&self.path);
                return None;
            }
        };

        if token.is_usable_at(now_ms()) {
            Some(token)
        } else {
            info!("Stored Google token expired; clearing it");
            remove_record(&self.path);
            None
        }
    }

    pub fn access_token(&self) -> Result<String, PipelineError> {
        self.get()
            .map(|token| token.value)
            .ok_or(PipelineError::AuthRequired)
    }

    pub fn is_connected(&self) -> bool {
        self.get().is_some()
    }

    pub fn set(&self, value: &str, ttl_seconds: u64) -> Result<AccessToken, PipelineError> {
        let ttl_ms = i64::try_from(ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let token = AccessToken {
            value: value.to_string(),
            expires_at_ms: now_ms().saturating_add(ttl_ms),
        };
        let _lock = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        save_record(&self.path, &token)?;
        Ok(token)
    }

    pub fn clear(&self) {
        let _lock = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        remove_record(&self.path);
    }

    /// Each receiver gets one message per completed grant.
    pub fn subscribe(&self) -> Receiver<TokenGranted> {
        let (tx, rx) = mpsc::channel();
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        rx
    }

    pub fn complete_grant(&self, value: &str, ttl_seconds: u64) -> Result<(), PipelineError> {
        let token = self.set(value, ttl_seconds)?;
        let notice = TokenGranted {
            expires_at_ms: token.expires_at_ms,
        };
        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        listeners.retain(|tx| tx.send(notice.clone()).is_ok());
        info!("Google access granted");
        Ok(())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn load_record(path: &Path) -> Result<Option<AccessToken>, PipelineError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let token: AccessToken = serde_json::from_str(&content)?;
    Ok(Some(token))
}

fn save_record(path: &Path, token: &AccessToken) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(token)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_record(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove token record {:?}: {}", path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_then_get_returns_token() {
        let dir = temp_dir("token-set");
        let store = TokenStore::new(dir.join("token.json"));
        store.set("ya29.abc", 3600).expect("set");
        let token = store.get().expect("token");
        assert_eq!(token.value, "ya29.abc");
        assert!(token.expires_at_ms > now_ms() + 3_500_000);
    }

    #[test]
    fn get_after_expiry_returns_none_and_clears_record() {
        let dir = temp_dir("token-expired");
        let path = dir.join("token.json");
        let store = TokenStore::new(&path);
        store.set("stale", 0).expect("set");
        assert!(path.exists());

        assert_eq!(store.get(), None);
        assert!(!path.exists());
    }

    #[test]
    fn record_with_past_expiry_is_cleared_on_read() {
        let dir = temp_dir("token-past");
        let path = dir.join("token.json");
        fs::write(
            &path,
            r#"{"access_token":"old","expires_at_ms":1000}"#,
        )
        .expect("write");
        let store = TokenStore::new(&path);
        assert!(!store.is_connected());
        assert!(!path.exists());
        assert!(matches!(store.access_token(), Err(PipelineError::AuthRequired)));
    }

    #[test]
    fn corrupt_record_is_treated_as_absent() {
        let dir = temp_dir("token-corrupt");
        let path = dir.join("token.json");
        fs::write(&path, "{not json").expect("write");
        let store = TokenStore::new(&path);
        assert_eq!(store.get(), None);
        assert!(!path.exists());
    }

    #[test]
    fn clear_removes_record() {
        let dir = temp_dir("token-clear");
        let store = TokenStore::new(dir.join("token.json"));
        store.set("abc", 60).expect("set");
        store.clear();
        assert_eq!(store.get(), None);
        store.clear();
    }

    #[test]
    fn grant_notifies_each_listener_once() {
        let dir = temp_dir("token-grant");
        let store = TokenStore::new(dir.join("token.json"));
        let first = store.subscribe();
        let second = store.subscribe();

        store.complete_grant("granted", 3600).expect("grant");
        let _ = store.get();
        let _ = store.get();

        assert!(first.try_recv().is_ok());
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_ok());
        assert!(second.try_recv().is_err());
    }

    #[test]
    fn dropped_listener_does_not_block_grant() {
        let dir = temp_dir("token-dropped");
        let store = TokenStore::new(dir.join("token.json"));
        drop(store.subscribe());
        let live = store.subscribe();
        store.complete_grant("granted", 60).expect("grant");
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn concurrent_reads_of_expired_token_never_see_it_valid() {
        let dir = temp_dir("token-race");
        let store = Arc::new(TokenStore::new(dir.join("token.json")));
        store.set("stale", 0).expect("set");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.get())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("join"), None);
        }
    }
}
