//! Rebuilds the record table from disk and publishes it to the server.
//!
//! A new table is always built off to the side and swapped in whole through the
//! watch channel, so a lookup never sees a partially loaded table.

use crate::config::{self, Settings};
use crate::service::metrics::{RECORDS_LOADED, RELOAD_FAILED_TOTAL, RELOAD_VERSION_INFO};
use crate::table::RecordTable;
use anyhow::{Context, Result};
use rand::Rng;
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

const MIN_INTERVAL: Duration = Duration::from_secs(2);
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const MAX_JITTER: Duration = Duration::from_secs(15);

/// The record file together with the channel its tables are published on.
///
/// Shared by the poll watcher and the SIGHUP listener so both see the hash of
/// whatever was loaded last, no matter which of them loaded it.
pub struct TableSource {
    path: PathBuf,
    settings: Settings,
    publisher: watch::Sender<Arc<RecordTable>>,
    loaded_hash: Mutex<String>,
}

impl TableSource {
    pub fn new(path: PathBuf, settings: Settings, publisher: watch::Sender<Arc<RecordTable>>) -> Self {
        Self { path, settings, publisher, loaded_hash: Mutex::new(String::new()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-512 of the file content behind the table currently published.
    /// Empty until the first successful load.
    pub fn loaded_hash(&self) -> String {
        self.loaded_hash.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RecordTable>> {
        self.publisher.subscribe()
    }

    /// Loads the file and publishes the result. On failure the served table is left alone.
    pub fn reload(&self) -> Result<usize> {
        let (table, hash) = match self.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                RELOAD_FAILED_TOTAL.inc();
                return Err(e);
            }
        };
        let count = table.len();
        self.publisher.send_replace(Arc::new(table));
        RECORDS_LOADED.set(count as i64);

        let mut loaded_hash = self.loaded_hash.lock().unwrap_or_else(PoisonError::into_inner);
        if !loaded_hash.is_empty() && *loaded_hash != hash {
            RELOAD_VERSION_INFO.with_label_values(&["sha512", loaded_hash.as_str()]).set(0.0);
        }
        RELOAD_VERSION_INFO.with_label_values(&["sha512", &hash]).set(1.0);
        *loaded_hash = hash;
        Ok(count)
    }

    // hash and table come from the same read
    fn load(&self) -> Result<(RecordTable, String)> {
        let content = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read record file '{}'", self.path.display()))?;
        let text = std::str::from_utf8(&content)
            .with_context(|| format!("Record file '{}' is not valid UTF-8", self.path.display()))?;
        Ok((config::parse_table(text, &self.settings), hash_bytes(&content)))
    }
}

/// Polls the record file every `interval` (plus or minus jitter) and reloads
/// when its SHA-512 differs from the one last loaded.
pub fn spawn_watcher(source: Arc<TableSource>, interval: Duration) -> JoinHandle<()> {
    let interval = interval.min(MAX_INTERVAL);
    let jitter = MAX_JITTER.min(interval / 2);

    tracing::info!(
        "[reload] Watching changes for {} (Interval: {:?}, Jitter: {:?})",
        source.path().display(),
        interval,
        jitter
    );

    tokio::spawn(async move {
        loop {
            sleep(jittered(interval, jitter)).await;

            let new_hash = match hash_file(source.path()) {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::error!("[reload] Failed to read {}: {}", source.path().display(), e);
                    RELOAD_FAILED_TOTAL.inc();
                    continue;
                }
            };
            if new_hash == source.loaded_hash() {
                continue;
            }

            tracing::info!("[reload] Record file change detected! New SHA512: {}", new_hash);
            match source.reload() {
                Ok(count) => tracing::info!("[reload] Serving {} records", count),
                Err(e) => tracing::error!("[reload] Keeping previous table: {:#}", e),
            }
        }
    })
}

/// Reloads the table each time the process receives SIGHUP.
#[cfg(unix)]
pub fn spawn_hangup_listener(source: Arc<TableSource>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            tracing::info!("[reload] SIGHUP received, reloading {}", source.path().display());
            match source.reload() {
                Ok(count) => tracing::info!("[reload] Serving {} records", count),
                Err(e) => tracing::error!("[reload] Keeping previous table: {:#}", e),
            }
        }
    }))
}

/// Parses `500ms`, `30s`, `5m` or `1h`. The result is clamped to between two
/// seconds and one day.
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let interval = parse_duration(s).map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    Ok(interval.clamp(MIN_INTERVAL, MAX_INTERVAL))
}

fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (value, unit_secs) = if let Some(stripped) = s.strip_suffix("ms") {
        return Ok(Duration::from_millis(stripped.parse()?));
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60)
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, 3600)
    } else {
        anyhow::bail!("missing unit")
    };
    let secs = value
        .parse::<u64>()?
        .checked_mul(unit_secs)
        .ok_or_else(|| anyhow::anyhow!("value out of range"))?;
    Ok(Duration::from_secs(secs))
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return interval;
    }
    let offset = rand::thread_rng().gen_range(0..=jitter_ms * 2) as i64 - jitter_ms as i64;
    if offset > 0 {
        interval.saturating_add(Duration::from_millis(offset as u64))
    } else {
        interval.saturating_sub(Duration::from_millis(offset.unsigned_abs()))
    }
}

fn hash_file(path: &Path) -> Result<String> {
    Ok(hash_bytes(&std::fs::read(path)?))
}

fn hash_bytes(content: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
