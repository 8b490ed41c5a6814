//! Append-only change ledger plus the synthesis watermark and counter.
//!
//! One entry per line, `TIMESTAMP | KIND | SUBJECT`. Timestamps are
//! zero-padded ISO-8601 to the second, so string order is time order and
//! entries newer than the watermark are found with a plain `>`.

use crate::layout::Layout;
use crate::preferences::Synthesis;
use crate::snapshot::timestamp;
use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const HEADER: &str = "# Project Pilot Change Ledger\n# Format: TIMESTAMP | ACTION | FILE_PATH_OR_COMMAND\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Edit,
    Bash,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Edit => "EDIT",
            Self::Bash => "BASH",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "EDIT" => Some(Self::Edit),
            "BASH" => Some(Self::Bash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp: String,
    pub kind: ChangeKind,
    pub subject: String,
}

impl LedgerEntry {
    /// An entry stamped with the current time.
    pub fn now(kind: ChangeKind, subject: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp(),
            kind,
            subject: subject.into(),
        }
    }

    /// Parse one ledger line. Header, blank and malformed lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }
        let mut parts = line.splitn(3, " | ");
        let timestamp = parts.next()?.trim();
        let kind = ChangeKind::parse(parts.next()?.trim())?;
        let subject = parts.next()?;
        if timestamp.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp.to_string(),
            kind,
            subject: subject.to_string(),
        })
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Subjects are single-line; a multi-line command is folded so one
        // append stays one entry.
        let subject = self.subject.replace(['\r', '\n'], " ");
        write!(f, "{} | {} | {}", self.timestamp, self.kind.as_str(), subject)
    }
}

/// How much review a synthesis pass deserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWeight {
    Light,
    Medium,
    Heavy,
}

impl fmt::Display for SessionWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Heavy => "heavy",
        })
    }
}

/// Weight for `count` pending changes on synthesis number `number`.
/// Every `deep_review_every`-th synthesis is heavy regardless of volume.
pub fn weight(count: usize, number: u64, cfg: &Synthesis) -> SessionWeight {
    if cfg.deep_review_every > 0 && number > 0 && number % cfg.deep_review_every == 0 {
        return SessionWeight::Heavy;
    }
    if count >= cfg.heavy_at {
        SessionWeight::Heavy
    } else if count >= cfg.medium_at {
        SessionWeight::Medium
    } else {
        SessionWeight::Light
    }
}

/// Entries strictly newer than `watermark`; all of them when there is none.
pub fn since<'a>(entries: &'a [LedgerEntry], watermark: Option<&str>) -> Vec<&'a LedgerEntry> {
    entries
        .iter()
        .filter(|e| watermark.is_none_or(|w| e.timestamp.as_str() > w))
        .collect()
}

/// Persistent storage for the ledger, watermark and synthesis counter.
pub trait LedgerStore {
    fn append(&self, entry: &LedgerEntry) -> Result<()>;
    fn entries(&self) -> Result<Vec<LedgerEntry>>;
    fn watermark(&self) -> Result<Option<String>>;
    fn synthesis_count(&self) -> Result<Option<u64>>;
    fn set_synthesis_count(&self, count: u64) -> Result<()>;

    /// Entries not yet folded into the knowledge base.
    fn pending(&self) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries()?;
        let watermark = self.watermark()?;
        Ok(since(&entries, watermark.as_deref())
            .into_iter()
            .cloned()
            .collect())
    }

    /// Increment and persist the synthesis counter, returning the new value.
    /// A missing or unreadable counter restarts at 1.
    fn next_synthesis(&self) -> Result<u64> {
        let next = self.synthesis_count()?.map_or(1, |n| n + 1);
        self.set_synthesis_count(next)?;
        Ok(next)
    }
}

/// The on-disk ledger under `.pilot/internal/`.
#[derive(Debug, Clone)]
pub struct Ledger {
    log: PathBuf,
    watermark: PathBuf,
    count: PathBuf,
}

impl Ledger {
    pub fn new(layout: &Layout) -> Self {
        Self {
            log: layout.ledger(),
            watermark: layout.last_synthesis(),
            count: layout.synthesis_count(),
        }
    }

    pub fn exists(&self) -> bool {
        self.log.is_file()
    }

    /// Create the ledger with its header unless it already exists.
    pub fn init(&self) -> Result<()> {
        if self.exists() {
            return Ok(());
        }
        fs::write(&self.log, HEADER)
            .with_context(|| format!("writing {}", self.log.display()))
    }

    /// Record `timestamp` as the point up to which everything is synthesized.
    pub fn stamp_watermark(&self, timestamp: &str) -> Result<()> {
        fs::write(&self.watermark, format!("{timestamp}\n"))
            .with_context(|| format!("writing {}", self.watermark.display()))
    }
}

/// Read a text file the agent may also write. Invalid UTF-8 is replaced
/// rather than rejected, so one stray byte never hides the whole file.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

impl LedgerStore for Ledger {
    fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let line = format!("{entry}\n");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)
            .with_context(|| format!("opening {}", self.log.display()))?;
        // A single write keeps concurrent appends from interleaving mid-line.
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.log.display()))?;
        tracing::debug!(kind = entry.kind.as_str(), "ledger entry appended");
        Ok(())
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(read_optional(&self.log)?
            .map(|s| s.lines().filter_map(LedgerEntry::parse).collect())
            .unwrap_or_default())
    }

    fn watermark(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.watermark)?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    fn synthesis_count(&self) -> Result<Option<u64>> {
        Ok(read_optional(&self.count)?.and_then(|s| s.trim().parse().ok()))
    }

    fn set_synthesis_count(&self, count: u64) -> Result<()> {
        fs::write(&self.count, count.to_string())
            .with_context(|| format!("writing {}", self.count.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: &str, subject: &str) -> LedgerEntry {
        LedgerEntry {
            timestamp: ts.into(),
            kind: ChangeKind::Edit,
            subject: subject.into(),
        }
    }

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::with_durable_base(dir.path(), dir.path().join("durable"));
        fs::create_dir_all(layout.internal_dir()).unwrap();
        (dir, Ledger::new(&layout))
    }

    // ---------------------------------------------------------------
    // Parsing and formatting
    // ---------------------------------------------------------------

    #[test]
    fn parse_round_trips_display() {
        let e = LedgerEntry {
            timestamp: "2025-01-15T10:30:00Z".into(),
            kind: ChangeKind::Bash,
            subject: "echo a | grep a".into(),
        };
        let line = e.to_string();
        assert_eq!(line, "2025-01-15T10:30:00Z | BASH | echo a | grep a");
        assert_eq!(LedgerEntry::parse(&line), Some(e));
    }

    #[test]
    fn parse_skips_headers_blanks_and_garbage() {
        assert_eq!(LedgerEntry::parse("# Project Pilot Change Ledger"), None);
        assert_eq!(LedgerEntry::parse("   "), None);
        assert_eq!(LedgerEntry::parse("not a ledger line"), None);
        assert_eq!(LedgerEntry::parse("2025-01-15T10:30:00Z | RENAME | x"), None);
    }

    #[test]
    fn multi_line_subjects_stay_on_one_line() {
        let e = entry("2025-01-15T10:30:00Z", "cat <<EOF\nhi\nEOF");
        assert_eq!(e.to_string().lines().count(), 1);
    }

    #[test]
    fn now_uses_second_precision() {
        let e = LedgerEntry::now(ChangeKind::Created, "CLAUDE.md");
        assert_eq!(e.timestamp.len(), 20);
        assert!(e.timestamp.ends_with('Z'));
    }

    // ---------------------------------------------------------------
    // Watermark partition
    // ---------------------------------------------------------------

    #[test]
    fn since_partitions_on_watermark() {
        let entries = vec![
            entry("2025-01-15T10:00:00Z", "t1"),
            entry("2025-01-15T11:00:00Z", "t2"),
            entry("2025-01-15T12:00:00Z", "t3"),
        ];
        let w = "2025-01-15T10:30:00Z";
        assert_eq!(since(&entries, Some(w)).len(), 2);
        let pending: Vec<_> = since(&entries, Some(w)).iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(pending, vec!["t2", "t3"]);
    }

    #[test]
    fn entries_at_the_watermark_are_synthesized() {
        let entries = vec![entry("2025-01-15T10:30:00Z", "same second")];
        assert_eq!(since(&entries, Some("2025-01-15T10:30:00Z")).len(), 0);
    }

    #[test]
    fn no_watermark_means_everything_is_pending() {
        let entries = vec![entry("2025-01-15T10:00:00Z", "a"), entry("2025-01-15T11:00:00Z", "b")];
        assert_eq!(since(&entries, None).len(), 2);
    }

    // ---------------------------------------------------------------
    // Weight
    // ---------------------------------------------------------------

    #[test]
    fn weight_thresholds() {
        let cfg = Synthesis::default();
        assert_eq!(weight(5, 1, &cfg), SessionWeight::Light);
        assert_eq!(weight(6, 1, &cfg), SessionWeight::Medium);
        assert_eq!(weight(15, 1, &cfg), SessionWeight::Medium);
        assert_eq!(weight(16, 1, &cfg), SessionWeight::Heavy);
    }

    #[test]
    fn every_fifth_synthesis_is_heavy() {
        let cfg = Synthesis::default();
        assert_eq!(weight(6, 5, &cfg), SessionWeight::Heavy);
        assert_eq!(weight(1, 10, &cfg), SessionWeight::Heavy);
        assert_eq!(weight(1, 4, &cfg), SessionWeight::Light);
    }

    #[test]
    fn zero_cadence_disables_deep_review() {
        let cfg = Synthesis {
            deep_review_every: 0,
            ..Synthesis::default()
        };
        assert_eq!(weight(1, 5, &cfg), SessionWeight::Light);
    }

    // ---------------------------------------------------------------
    // On-disk ledger
    // ---------------------------------------------------------------

    #[test]
    fn append_and_read_back() {
        let (_dir, ledger) = ledger();
        ledger.init().unwrap();
        ledger.append(&entry("2025-01-15T10:00:00Z", "src/a.rs")).unwrap();
        ledger.append(&entry("2025-01-15T11:00:00Z", "src/b.rs")).unwrap();

        let raw = fs::read_to_string(&ledger.log).unwrap();
        assert!(raw.starts_with(HEADER));
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].subject, "src/b.rs");
    }

    #[test]
    fn init_does_not_truncate() {
        let (_dir, ledger) = ledger();
        ledger.append(&entry("2025-01-15T10:00:00Z", "kept")).unwrap();
        ledger.init().unwrap();
        assert_eq!(ledger.entries().unwrap().len(), 1);
    }

    #[test]
    fn pending_uses_stamped_watermark() {
        let (_dir, ledger) = ledger();
        ledger.append(&entry("2025-01-15T10:00:00Z", "old")).unwrap();
        ledger.append(&entry("2025-01-15T12:00:00Z", "new")).unwrap();
        assert_eq!(ledger.pending().unwrap().len(), 2);

        ledger.stamp_watermark("2025-01-15T11:00:00Z").unwrap();
        let pending = ledger.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, "new");
    }

    #[test]
    fn missing_files_read_as_empty() {
        let (_dir, ledger) = ledger();
        assert!(!ledger.exists());
        assert!(ledger.entries().unwrap().is_empty());
        assert_eq!(ledger.watermark().unwrap(), None);
        assert_eq!(ledger.synthesis_count().unwrap(), None);
    }

    #[test]
    fn invalid_utf8_lines_do_not_hide_the_ledger() {
        let (_dir, ledger) = ledger();
        ledger.init().unwrap();
        let mut file = OpenOptions::new().append(true).open(&ledger.log).unwrap();
        file.write_all(b"2025-01-15T10:00:00Z | EDIT | caf\xe9.rs\n").unwrap();
        ledger.append(&entry("2025-01-15T11:00:00Z", "src/b.rs")).unwrap();

        let pending = ledger.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].subject, "caf\u{FFFD}.rs");
    }

    #[test]
    fn synthesis_counter_increments_and_recovers_from_garbage() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.next_synthesis().unwrap(), 1);
        assert_eq!(ledger.next_synthesis().unwrap(), 2);
        fs::write(&ledger.count, "not a number").unwrap();
        assert_eq!(ledger.next_synthesis().unwrap(), 1);
        assert_eq!(ledger.synthesis_count().unwrap(), Some(1));
    }
}
