use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HistoryResponse, PersistentHistoryEntry};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredHistoryEntry {
    identity: String,
    #[serde(rename = "roundsPlayed", alias = "rounds_played")]
    rounds_played: u64,
    escapes: u64,
    #[serde(rename = "bestScore", alias = "best_score")]
    best_score: i64,
    #[serde(rename = "claimedUsd", alias = "claimed_usd")]
    claimed_usd: u64,
    #[serde(rename = "updatedAtMs", alias = "updated_at_ms")]
    updated_at_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct HistoryStoreFile {
    version: u8,
    players: HashMap<String, StoredHistoryEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct HistoryStoreFileRaw {
    version: u8,
    players: HashMap<String, serde_json::Value>,
}

/// Durable per-identity play history. Guest identities are session-scoped
/// and never persisted; only wallet-backed identities accumulate history.
pub struct HistoryStore {
    file_path: PathBuf,
    players: HashMap<String, StoredHistoryEntry>,
}

impl HistoryStore {
    pub fn new(file_path: PathBuf) -> Self {
        let players = load_players(&file_path);
        Self { file_path, players }
    }

    pub fn record_game(&mut self, identity: &str, rounds_played: u64, escaped: bool, score: i64) {
        let Some(entry) = self.entry_for(identity) else {
            return;
        };
        entry.rounds_played += rounds_played;
        if escaped {
            entry.escapes += 1;
        }
        entry.best_score = entry.best_score.max(score);
        entry.updated_at_ms = now_ms();
        self.save();
    }

    pub fn record_claim(&mut self, identity: &str, amount_usd: u32) {
        let Some(entry) = self.entry_for(identity) else {
            return;
        };
        entry.claimed_usd += amount_usd as u64;
        entry.updated_at_ms = now_ms();
        self.save();
    }

    pub fn build_response(&self, requested_limit: Option<usize>) -> HistoryResponse {
        HistoryResponse {
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            entries: self.get_top(requested_limit),
        }
    }

    fn entry_for(&mut self, identity: &str) -> Option<&mut StoredHistoryEntry> {
        let key = history_key(identity);
        if key.is_empty() || is_guest_identity(identity) {
            return None;
        }
        let now_ms = now_ms();
        Some(
            self.players
                .entry(key)
                .or_insert_with(|| StoredHistoryEntry {
                    identity: identity.trim().to_string(),
                    rounds_played: 0,
                    escapes: 0,
                    best_score: 0,
                    claimed_usd: 0,
                    updated_at_ms: now_ms,
                }),
        )
    }

    fn get_top(&self, requested_limit: Option<usize>) -> Vec<PersistentHistoryEntry> {
        let normalized_limit = requested_limit.unwrap_or(10).clamp(1, 100);
        let mut entries: Vec<PersistentHistoryEntry> = self
            .players
            .values()
            .map(|entry| PersistentHistoryEntry {
                identity: entry.identity.clone(),
                rounds_played: entry.rounds_played,
                escapes: entry.escapes,
                best_score: entry.best_score,
                claimed_usd: entry.claimed_usd,
                updated_at_ms: entry.updated_at_ms,
            })
            .collect();

        entries.sort_by(|a, b| {
            b.escapes
                .cmp(&a.escapes)
                .then_with(|| b.best_score.cmp(&a.best_score))
                .then_with(|| b.claimed_usd.cmp(&a.claimed_usd))
                .then_with(|| cmp_identity(&a.identity, &b.identity))
        });
        entries.truncate(normalized_limit);
        entries
    }

    fn save(&self) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                eprintln!(
                    "[history-store] failed to create parent dir {}: {error}",
                    parent.display()
                );
                return;
            }
        }

        let payload = HistoryStoreFile {
            version: 1,
            players: self.players.clone(),
        };
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => {
                if let Err(error) = fs::write(&self.file_path, text) {
                    eprintln!(
                        "[history-store] failed to write {}: {error}",
                        self.file_path.display()
                    );
                }
            }
            Err(error) => {
                eprintln!(
                    "[history-store] failed to serialize payload for {}: {error}",
                    self.file_path.display()
                );
            }
        }
    }
}

fn cmp_identity(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn load_players(path: &Path) -> HashMap<String, StoredHistoryEntry> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                eprintln!("[history-store] failed to read {}: {error}", path.display());
            }
            return HashMap::new();
        }
    };
    let parsed: HistoryStoreFileRaw = match serde_json::from_str::<HistoryStoreFileRaw>(&text) {
        Ok(value) if value.version == 1 => value,
        Ok(value) => {
            eprintln!(
                "[history-store] unsupported version {} at {}",
                value.version,
                path.display()
            );
            return HashMap::new();
        }
        Err(error) => {
            eprintln!(
                "[history-store] failed to parse {}: {error}",
                path.display()
            );
            return HashMap::new();
        }
    };

    let mut sanitized = HashMap::<String, StoredHistoryEntry>::new();
    for (player_key, raw_value) in parsed.players {
        let value: StoredHistoryEntry = match serde_json::from_value(raw_value) {
            Ok(entry) => entry,
            Err(error) => {
                eprintln!(
                    "[history-store] failed to parse entry '{}' in {}: {error}",
                    player_key,
                    path.display()
                );
                continue;
            }
        };
        let Some(normalized) = sanitize_stored_entry(value) else {
            continue;
        };
        let key = history_key(&normalized.identity);
        if key.is_empty() {
            continue;
        }

        match sanitized.get_mut(&key) {
            Some(current) => {
                current.identity = normalized.identity;
                current.rounds_played += normalized.rounds_played;
                current.escapes += normalized.escapes;
                current.best_score = current.best_score.max(normalized.best_score);
                current.claimed_usd += normalized.claimed_usd;
                current.updated_at_ms = current.updated_at_ms.max(normalized.updated_at_ms);
            }
            None => {
                sanitized.insert(key, normalized);
            }
        }
    }

    sanitized
}

fn sanitize_stored_entry(value: StoredHistoryEntry) -> Option<StoredHistoryEntry> {
    let normalized_identity = value.identity.trim().to_string();
    if normalized_identity.is_empty() || is_guest_identity(&normalized_identity) {
        return None;
    }
    Some(StoredHistoryEntry {
        identity: normalized_identity,
        rounds_played: value.rounds_played,
        escapes: value.escapes,
        best_score: value.best_score.max(0),
        claimed_usd: value.claimed_usd,
        updated_at_ms: value.updated_at_ms,
    })
}

fn history_key(identity: &str) -> String {
    identity.trim().to_lowercase()
}

fn is_guest_identity(identity: &str) -> bool {
    identity.trim().starts_with("guest_")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            now_ms().saturating_add(rand::random::<u32>() as u64)
        );
        std::env::temp_dir().join(unique).join("history.json")
    }

    #[test]
    fn record_game_aggregates_wallet_identities_only() {
        let path = temp_file("history-store-record");
        let mut store = HistoryStore::new(path.clone());
        store.record_game("0xAbc", 3, true, 5_000);
        store.record_game("0xAbc", 5, false, 2_000);
        store.record_game("guest_1", 2, true, 5_000);

        let response = store.build_response(Some(10));
        assert_eq!(response.entries.len(), 1);
        let entry = &response.entries[0];
        assert_eq!(entry.identity, "0xAbc");
        assert_eq!(entry.rounds_played, 8);
        assert_eq!(entry.escapes, 1);
        assert_eq!(entry.best_score, 5_000);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn record_claim_accumulates_usd() {
        let path = temp_file("history-store-claim");
        let mut store = HistoryStore::new(path.clone());
        store.record_claim("0xabc", 25);
        store.record_claim("0xabc", 25);

        let response = store.build_response(Some(10));
        assert_eq!(response.entries[0].claimed_usd, 50);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_merges_case_insensitive_identities() {
        let path = temp_file("history-store-load");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        let raw = r#"{
  "version": 1,
  "players": {
    "0XABC": {
      "identity": "0xAbc",
      "roundsPlayed": 4,
      "escapes": 1,
      "bestScore": 3000,
      "claimedUsd": 25,
      "updatedAtMs": 10
    },
    "legacy": {
      "identity": " 0xabc ",
      "roundsPlayed": 2,
      "escapes": 1,
      "bestScore": 5000,
      "claimedUsd": 0,
      "updatedAtMs": 20
    }
  }
}"#;
        fs::write(&path, raw).expect("write file");

        let store = HistoryStore::new(path.clone());
        let response = store.build_response(Some(10));
        assert_eq!(response.entries.len(), 1);
        let entry = &response.entries[0];
        assert_eq!(entry.rounds_played, 6);
        assert_eq!(entry.escapes, 2);
        assert_eq!(entry.best_score, 5_000);

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn load_keeps_valid_entries_when_invalid_entries_exist() {
        let path = temp_file("history-store-partial");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        let raw = r#"{
  "version": 1,
  "players": {
    "valid": {
      "identity": "0xAbc",
      "roundsPlayed": 4,
      "escapes": 1,
      "bestScore": 3000,
      "claimedUsd": 25,
      "updatedAtMs": 10
    },
    "invalid": {
      "identity": "0xBroken",
      "roundsPlayed": -1
    },
    "guest": {
      "identity": "guest_9",
      "roundsPlayed": 1,
      "escapes": 0,
      "bestScore": 0,
      "claimedUsd": 0,
      "updatedAtMs": 5
    }
  }
}"#;
        fs::write(&path, raw).expect("write file");

        let store = HistoryStore::new(path.clone());
        let response = store.build_response(Some(10));
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].identity, "0xAbc");

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn build_response_limits_range() {
        let path = temp_file("history-store-limit");
        let mut store = HistoryStore::new(path.clone());
        for idx in 0..3 {
            store.record_game(&format!("0xplayer{idx}"), 1, false, idx);
        }

        assert_eq!(store.build_response(Some(1)).entries.len(), 1);
        assert_eq!(store.build_response(Some(0)).entries.len(), 1);
        assert_eq!(store.build_response(Some(999)).entries.len(), 3);
        assert_eq!(store.build_response(None).entries.len(), 3);

        let _ = fs::remove_file(path);
    }
}
