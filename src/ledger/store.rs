use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::ledger::event::{event_types, AuditEvent};

const ACTIVE_FILE_NAME: &str = "ledger.jsonl";
const LOCK_FILE_NAME: &str = "ledger.lock";
const ARCHIVE_PREFIX: &str = "ledger-";
const ARCHIVE_SUFFIX: &str = ".jsonl.gz";

/// Errors that can occur during ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another process holds the ledger lock.
    #[error("ledger at {0} is locked by another process")]
    Locked(PathBuf),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Configuration for the cost ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Directory holding the active file, archives, and lock file.
    pub dir: PathBuf,
    /// Active file size past which rotation happens, in bytes.
    pub rotation_threshold_bytes: u64,
    /// Buffered lines that force a flush.
    pub flush_max_lines: usize,
    /// Elapsed time since the last flush that forces one.
    pub flush_interval: Duration,
}

impl LedgerConfig {
    /// Config rooted at the given directory with default cadence.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            rotation_threshold_bytes: 10 * 1024 * 1024,
            flush_max_lines: 32,
            flush_interval: Duration::from_secs(5),
        }
    }

    /// Set the rotation threshold.
    pub fn with_rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold_bytes = bytes;
        self
    }

    /// Set the flush cadence.
    pub fn with_flush_cadence(mut self, max_lines: usize, interval: Duration) -> Self {
        self.flush_max_lines = max_lines;
        self.flush_interval = interval;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(default_ledger_dir())
    }
}

/// Default ledger directory under the per-user data directory.
pub fn default_ledger_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill")
}

/// Reference-accuracy summary derived from nav validation events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyMetrics {
    /// Total nav validation events recorded.
    pub total: u64,
    /// Validations that confirmed the claimed reference.
    pub validated_ok: u64,
    /// Percentage of confirmed references. 100.0 when no events exist.
    pub accuracy_pct: f64,
}

#[derive(Debug)]
struct LedgerInner {
    file: fs::File,
    active_bytes: u64,
    buffer: Vec<String>,
    last_flush: Instant,
    rotation_seq: u32,
    session_spend: f64,
    event_count: u64,
}

/// Append-only, crash-durable cost ledger.
///
/// Single writer per process: opening takes an exclusive lock file for the
/// lifetime of the handle, and a second open of the same directory fails
/// with [`LedgerError::Locked`]. Writes buffer in memory and flush to disk
/// when enough lines accumulate or enough time passes; `flush` forces an
/// fsync. Past the rotation threshold the active file becomes an immutable
/// gzip archive and a fresh file opens in its place.
#[derive(Debug)]
pub struct CostLedger {
    config: LedgerConfig,
    session_id: String,
    lock_path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl CostLedger {
    /// Open (or create) the ledger in the configured directory.
    pub fn open(config: LedgerConfig, session_id: impl Into<String>) -> LedgerResult<Self> {
        fs::create_dir_all(&config.dir)?;

        let lock_path = config.dir.join(LOCK_FILE_NAME);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut lock) => {
                let _ = writeln!(lock, "{}", std::process::id());
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LedgerError::Locked(config.dir.clone()));
            }
            Err(err) => return Err(LedgerError::Io(err)),
        }

        let active_path = config.dir.join(ACTIVE_FILE_NAME);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)?;
        let active_bytes = file.metadata()?.len();
        let rotation_seq = next_rotation_seq(&config.dir)?;

        Ok(Self {
            config,
            session_id: session_id.into(),
            lock_path,
            inner: Mutex::new(LedgerInner {
                file,
                active_bytes,
                buffer: Vec::new(),
                last_flush: Instant::now(),
                rotation_seq,
                session_spend: 0.0,
                event_count: 0,
            }),
        })
    }

    /// Session identifier embedded in every event this handle writes.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Total cost recorded through this handle.
    pub fn session_spend(&self) -> f64 {
        self.lock_inner().session_spend
    }

    /// Number of events recorded through this handle.
    pub fn event_count(&self) -> u64 {
        self.lock_inner().event_count
    }

    /// Record an event. Fails only on unrecoverable disk failure.
    pub fn log(&self, event_type: &str, cost_usd: f64, metadata: Value) -> LedgerResult<()> {
        let event = AuditEvent::new(event_type, cost_usd, self.session_id.clone(), metadata);
        self.append_event(event)
    }

    /// Append a fully-formed event. Exposed within the crate so tests can
    /// control timestamps.
    pub(crate) fn append_event(&self, event: AuditEvent) -> LedgerResult<()> {
        let line = serde_json::to_string(&event)?;
        let mut inner = self.lock_inner();
        inner.session_spend += event.cost_usd;
        inner.event_count += 1;
        inner.buffer.push(line);

        let due = inner.buffer.len() >= self.config.flush_max_lines
            || inner.last_flush.elapsed() >= self.config.flush_interval;
        if due {
            self.flush_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Flush buffered events to disk and fsync.
    pub fn flush(&self) -> LedgerResult<()> {
        let mut inner = self.lock_inner();
        self.flush_locked(&mut inner)
    }

    /// Sum event cost across the trailing window of `hours`.
    ///
    /// Combines the in-memory buffer (flushed first) and on-disk segments.
    pub fn hourly_spend(&self, hours: f64) -> LedgerResult<f64> {
        let window = chrono::Duration::milliseconds((hours * 3_600_000.0) as i64);
        let since = Utc::now() - window;
        Ok(self.query(since, None)?.map(|e| e.cost_usd).sum())
    }

    /// Lazy, restartable query over events at or after `since`, optionally
    /// filtered by event type, in append order across segments.
    ///
    /// Buffered events are flushed first so the sequence is complete. Lines
    /// that fail to parse are skipped with a warning, never fatal.
    pub fn query(
        &self,
        since: DateTime<Utc>,
        event_type: Option<&str>,
    ) -> LedgerResult<EventQuery> {
        self.flush()?;
        let mut segments = archive_paths(&self.config.dir)?;
        segments.push(self.config.dir.join(ACTIVE_FILE_NAME));
        Ok(EventQuery {
            segments: segments.into_iter().collect(),
            current: None,
            since,
            event_type: event_type.map(str::to_string),
        })
    }

    /// Reference-accuracy metrics from nav validation events.
    ///
    /// Reports 100% when no nav events have been recorded.
    pub fn accuracy_metrics(&self) -> LedgerResult<AccuracyMetrics> {
        let mut total = 0u64;
        let mut validated_ok = 0u64;
        for event in self.query(DateTime::<Utc>::MIN_UTC, Some(event_types::NAV_VALIDATION))? {
            total += 1;
            if event
                .metadata
                .get("is_valid")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                validated_ok += 1;
            }
        }
        let accuracy_pct = if total == 0 {
            100.0
        } else {
            validated_ok as f64 / total as f64 * 100.0
        };
        Ok(AccuracyMetrics {
            total,
            validated_ok,
            accuracy_pct,
        })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn flush_locked(&self, inner: &mut LedgerInner) -> LedgerResult<()> {
        if !inner.buffer.is_empty() {
            let mut chunk = String::new();
            for line in inner.buffer.drain(..) {
                chunk.push_str(&line);
                chunk.push('\n');
            }
            inner.file.write_all(chunk.as_bytes())?;
            inner.file.sync_all()?;
            inner.active_bytes += chunk.len() as u64;
        }
        inner.last_flush = Instant::now();

        if inner.active_bytes > self.config.rotation_threshold_bytes {
            self.rotate_locked(inner)?;
        }
        Ok(())
    }

    /// Rename the active file to an archive, gzip it, mark it read-only,
    /// and open a fresh active file. Transparent to callers.
    fn rotate_locked(&self, inner: &mut LedgerInner) -> LedgerResult<()> {
        let active_path = self.config.dir.join(ACTIVE_FILE_NAME);
        let seq = inner.rotation_seq;
        let plain_path = self
            .config
            .dir
            .join(format!("{}{:04}.jsonl", ARCHIVE_PREFIX, seq));
        let archive_path = self
            .config
            .dir
            .join(format!("{}{:04}{}", ARCHIVE_PREFIX, seq, ARCHIVE_SUFFIX));

        inner.file.sync_all()?;
        fs::rename(&active_path, &plain_path)?;

        let mut source = fs::File::open(&plain_path)?;
        let mut encoder = GzEncoder::new(fs::File::create(&archive_path)?, Compression::default());
        io::copy(&mut source, &mut encoder)?;
        let compressed = encoder.finish()?;
        compressed.sync_all()?;
        fs::remove_file(&plain_path)?;

        let mut perms = fs::metadata(&archive_path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&archive_path, perms)?;

        inner.file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active_path)?;
        inner.active_bytes = 0;
        inner.rotation_seq = seq + 1;
        tracing::info!(archive = %archive_path.display(), "ledger rotated");
        Ok(())
    }
}

impl Drop for CostLedger {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = %err, "final ledger flush failed");
        }
        if let Err(err) = fs::remove_file(&self.lock_path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(error = %err, "failed to remove ledger lock file");
            }
        }
    }
}

/// Iterator over ledger events across segments, oldest segment first.
///
/// Opens one segment at a time; a fresh iterator is returned by every
/// [`CostLedger::query`] call, so the sequence is restartable.
pub struct EventQuery {
    segments: std::collections::VecDeque<PathBuf>,
    current: Option<Box<dyn BufRead + Send>>,
    since: DateTime<Utc>,
    event_type: Option<String>,
}

impl EventQuery {
    fn open_next(&mut self) -> bool {
        while let Some(path) = self.segments.pop_front() {
            match open_segment(&path) {
                Ok(Some(reader)) => {
                    self.current = Some(reader);
                    return true;
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(segment = %path.display(), error = %err, "skipping unreadable ledger segment");
                    continue;
                }
            }
        }
        false
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        if event.timestamp < self.since {
            return false;
        }
        match &self.event_type {
            Some(kind) => event.event_type == *kind,
            None => true,
        }
    }
}

impl Iterator for EventQuery {
    type Item = AuditEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() && !self.open_next() {
                return None;
            }
            let reader = self.current.as_mut()?;
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.current = None;
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "ledger segment read failed mid-stream");
                    self.current = None;
                    continue;
                }
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(trimmed) {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "skipping unparsable ledger line");
                    continue;
                }
            }
        }
    }
}

fn open_segment(path: &Path) -> io::Result<Option<Box<dyn BufRead + Send>>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Some(Box::new(BufReader::new(GzDecoder::new(file)))))
    } else {
        Ok(Some(Box::new(BufReader::new(file))))
    }
}

fn archive_paths(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut archives: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(seq) = parse_archive_seq(name) {
            archives.push((seq, entry.path()));
        }
    }
    archives.sort_by_key(|(seq, _)| *seq);
    Ok(archives.into_iter().map(|(_, path)| path).collect())
}

fn parse_archive_seq(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(ARCHIVE_PREFIX)?;
    let digits = rest.strip_suffix(ARCHIVE_SUFFIX)?;
    digits.parse().ok()
}

fn next_rotation_seq(dir: &Path) -> io::Result<u32> {
    let mut max_seq = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(seq) = parse_archive_seq(name) {
                max_seq = Some(max_seq.map_or(seq, |m: u32| m.max(seq)));
            }
        }
    }
    Ok(max_seq.map_or(0, |m| m + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::event::generate_session_id;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_ledger(dir: &Path) -> CostLedger {
        let config = LedgerConfig::new(dir).with_flush_cadence(4, Duration::from_secs(3600));
        CostLedger::open(config, generate_session_id()).expect("open ledger")
    }

    #[test]
    fn test_log_flush_query_exact_order() {
        let temp = TempDir::new().expect("temp dir");
        let ledger = test_ledger(temp.path());

        for i in 0..7 {
            ledger
                .log(event_types::LLM_CALL, 0.01, json!({"seq": i}))
                .expect("log");
        }
        ledger.flush().expect("flush");

        let seen: Vec<i64> = ledger
            .query(DateTime::<Utc>::MIN_UTC, None)
            .expect("query")
            .map(|e| e.metadata["seq"].as_i64().expect("seq"))
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_query_is_restartable() {
        let temp = TempDir::new().expect("temp dir");
        let ledger = test_ledger(temp.path());
        ledger
            .log(event_types::LLM_CALL, 0.02, json!({}))
            .expect("log");

        let first: Vec<_> = ledger
            .query(DateTime::<Utc>::MIN_UTC, None)
            .expect("query")
            .collect();
        let second: Vec<_> = ledger
            .query(DateTime::<Utc>::MIN_UTC, None)
            .expect("query")
            .collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_unparsable_line_is_skipped() {
        let temp = TempDir::new().expect("temp dir");
        {
            let ledger = test_ledger(temp.path());
            ledger
                .log(event_types::LLM_CALL, 0.01, json!({"ok": true}))
                .expect("log");
            ledger.flush().expect("flush");
        }
        let active = temp.path().join(ACTIVE_FILE_NAME);
        let mut content = fs::read_to_string(&active).expect("read");
        content.push_str("this is not json\n");
        fs::write(&active, content).expect("write");

        let ledger = test_ledger(temp.path());
        ledger
            .log(event_types::LLM_CALL, 0.01, json!({"ok": true}))
            .expect("log");
        let events: Vec<_> = ledger
            .query(DateTime::<Utc>::MIN_UTC, None)
            .expect("query")
            .collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_rotation_produces_single_readonly_archive() {
        let temp = TempDir::new().expect("temp dir");
        let config = LedgerConfig::new(temp.path())
            .with_rotation_threshold(4_096)
            .with_flush_cadence(1, Duration::from_secs(3600));
        let ledger = CostLedger::open(config, "s-test-1").expect("open");

        // Each event serializes to roughly 220 bytes, so 24 events
        // (~5.3 KiB) cross the 4 KiB threshold exactly once, and the
        // remainder stays well under a second rotation.
        let logged = 24;
        for n in 0..logged {
            ledger
                .log(
                    event_types::LLM_CALL,
                    0.001,
                    json!({"filler": "x".repeat(96), "n": n}),
                )
                .expect("log");
        }
        ledger.flush().expect("flush");

        let archives = archive_paths(temp.path()).expect("list");
        assert_eq!(archives.len(), 1, "exactly one rotation");
        let perms = fs::metadata(&archives[0]).expect("meta").permissions();
        assert!(perms.readonly(), "archive is read-only");

        let active_len = fs::metadata(temp.path().join(ACTIVE_FILE_NAME))
            .expect("meta")
            .len();
        assert!(active_len < 4_096, "subsequent writes land in a fresh file");

        // All events remain reachable through the archive + active file.
        let count = ledger
            .query(DateTime::<Utc>::MIN_UTC, None)
            .expect("query")
            .count();
        assert_eq!(count, logged);
    }

    #[test]
    fn test_hourly_spend_window() {
        let temp = TempDir::new().expect("temp dir");
        let ledger = test_ledger(temp.path());

        let mut old = AuditEvent::new(event_types::LLM_CALL, 5.0, "s-old", json!({}));
        old.timestamp = Utc::now() - chrono::Duration::hours(3);
        ledger.append_event(old).expect("append");
        ledger
            .log(event_types::LLM_CALL, 0.25, json!({}))
            .expect("log");
        ledger
            .log(event_types::BUDGET_BLOCK, 0.0, json!({}))
            .expect("log");

        let spend = ledger.hourly_spend(1.0).expect("spend");
        assert!((spend - 0.25).abs() < 1e-9, "old event excluded: {spend}");

        let wide = ledger.hourly_spend(4.0).expect("spend");
        assert!((wide - 5.25).abs() < 1e-9, "old event included: {wide}");
    }

    #[test]
    fn test_accuracy_metrics() {
        let temp = TempDir::new().expect("temp dir");
        let ledger = test_ledger(temp.path());

        let empty = ledger.accuracy_metrics().expect("metrics");
        assert_eq!(empty.total, 0);
        assert!((empty.accuracy_pct - 100.0).abs() < f64::EPSILON);

        for valid in [true, true, true, false] {
            ledger
                .log(event_types::NAV_VALIDATION, 0.0, json!({"is_valid": valid}))
                .expect("log");
        }
        let metrics = ledger.accuracy_metrics().expect("metrics");
        assert_eq!(metrics.total, 4);
        assert_eq!(metrics.validated_ok, 3);
        assert!((metrics.accuracy_pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_open_fails_while_locked() {
        let temp = TempDir::new().expect("temp dir");
        let _ledger = test_ledger(temp.path());
        let config = LedgerConfig::new(temp.path());
        match CostLedger::open(config, "s-intruder") {
            Err(LedgerError::Locked(_)) => {}
            other => panic!("expected Locked, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp = TempDir::new().expect("temp dir");
        {
            let _ledger = test_ledger(temp.path());
        }
        let _reopened = test_ledger(temp.path());
    }

    #[test]
    fn test_session_bookkeeping() {
        let temp = TempDir::new().expect("temp dir");
        let ledger = test_ledger(temp.path());
        ledger
            .log(event_types::LLM_CALL, 0.02, json!({}))
            .expect("log");
        ledger
            .log(event_types::SKIP_FRESH, 0.0, json!({}))
            .expect("log");

        assert_eq!(ledger.event_count(), 2);
        assert!((ledger.session_spend() - 0.02).abs() < 1e-9);
        assert!(ledger.session_id().starts_with("s-"));
    }

    #[test]
    fn test_event_type_filter() {
        let temp = TempDir::new().expect("temp dir");
        let ledger = test_ledger(temp.path());
        ledger
            .log(event_types::LLM_CALL, 0.01, json!({}))
            .expect("log");
        ledger
            .log(event_types::SKIP_FRESH, 0.0, json!({}))
            .expect("log");

        let count = ledger
            .query(DateTime::<Utc>::MIN_UTC, Some(event_types::SKIP_FRESH))
            .expect("query")
            .count();
        assert_eq!(count, 1);
    }
}
