//! Point-in-time copies of the protected files, kept at more than one
//! location so a destructive command can be undone after the fact.
//!
//! Each [`Location`] holds at most one snapshot. Capturing overwrites it item
//! by item; there is no history. A provenance marker (`.sentinel`) is written
//! last and doubles as proof that the project was initialized.

use crate::layout::Layout;
use chrono::Utc;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the provenance marker inside a location.
pub const PROVENANCE_FILE: &str = ".sentinel";

// ===================================================================
// Protected items and locations
// ===================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Tree,
    File,
}

/// A path that must survive arbitrary shell commands once the project is
/// initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedItem {
    /// Name of the staged copy inside a location.
    pub name: &'static str,
    /// How the item is shown to the operator.
    pub label: &'static str,
    pub live: PathBuf,
    pub kind: ItemKind,
}

impl ProtectedItem {
    /// The intelligence layer and the root `CLAUDE.md`.
    pub fn all(layout: &Layout) -> Vec<Self> {
        vec![
            Self {
                name: "pilot",
                label: ".pilot/",
                live: layout.pilot_dir(),
                kind: ItemKind::Tree,
            },
            Self {
                name: "CLAUDE.md",
                label: "CLAUDE.md",
                live: layout.claude_md(),
                kind: ItemKind::File,
            },
        ]
    }
}

impl fmt::Display for ProtectedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocationId {
    /// Inside the project's `.claude/` directory.
    Local,
    /// Outside the project, keyed by the project path.
    Durable,
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Durable => f.write_str("durable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub id: LocationId,
    pub root: PathBuf,
}

impl Location {
    /// All locations in restore priority order.
    pub fn all(layout: &Layout) -> Vec<Self> {
        vec![
            Self {
                id: LocationId::Local,
                root: layout.local_snapshot(),
            },
            Self {
                id: LocationId::Durable,
                root: layout.durable_snapshot(),
            },
        ]
    }

    pub fn staged(&self, item: &ProtectedItem) -> PathBuf {
        self.root.join(item.name)
    }

    fn staging(&self, item: &ProtectedItem) -> PathBuf {
        self.root.join(format!(".staging-{}", item.name))
    }

    pub fn provenance(&self) -> PathBuf {
        self.root.join(PROVENANCE_FILE)
    }
}

/// Who captured a snapshot, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub identity: String,
    pub captured_at: String,
}

impl Provenance {
    pub fn now(layout: &Layout) -> Self {
        Self {
            identity: layout.identity(),
            captured_at: timestamp(),
        }
    }

    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.identity, self.captured_at)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mut lines = s.lines();
        let identity = lines.next()?.trim().to_string();
        let captured_at = lines.next()?.trim().to_string();
        Some(Self {
            identity,
            captured_at,
        })
    }
}

/// Current UTC time, second precision, zero-padded ISO-8601.
pub fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ===================================================================
// Results
// ===================================================================

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("not in this snapshot")]
    NotInSnapshot,
    #[error("error: {0}")]
    Io(#[from] io::Error),
}

/// What one capture did. Logged, never shown to the operator.
#[derive(Debug, Default)]
pub struct CaptureReport {
    pub copied: Vec<&'static str>,
    pub absent: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
    pub provenance_written: bool,
}

impl CaptureReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.provenance_written
    }
}

// ===================================================================
// Store
// ===================================================================

/// Everything the guard needs from the filesystem.
pub trait SnapshotStore {
    /// Whether the live item currently exists.
    fn item_exists(&self, item: &ProtectedItem) -> bool;

    /// Replace the snapshot at `location` with the current state of `items`,
    /// then write the provenance marker. Per-item failures are recorded and
    /// the remaining items are still attempted.
    fn capture(
        &self,
        location: &Location,
        items: &[ProtectedItem],
        provenance: &Provenance,
    ) -> CaptureReport;

    /// Whether `location` holds a copy of `item`. No content inspection.
    fn has(&self, location: &Location, item: &ProtectedItem) -> bool;

    /// Whether `location` carries a provenance marker. A marker that cannot
    /// be parsed still counts.
    fn has_provenance(&self, location: &Location) -> bool;

    /// The parsed provenance marker at `location`, if readable.
    fn provenance(&self, location: &Location) -> Option<Provenance>;

    /// Copy the staged `item` from `location` back to its live path.
    fn restore_item(
        &self,
        location: &Location,
        item: &ProtectedItem,
    ) -> Result<(), RestoreError>;

    /// Delete the snapshot at `location` entirely.
    fn discard(&self, location: &Location) -> io::Result<()>;
}

/// [`SnapshotStore`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStore;

impl DiskStore {
    fn capture_item(&self, location: &Location, item: &ProtectedItem) -> io::Result<bool> {
        let staged = location.staged(item);
        if !item.live.exists() {
            remove_path(&staged)?;
            return Ok(false);
        }

        // Copy beside the old snapshot first so a failed copy leaves it intact.
        let staging = location.staging(item);
        remove_path(&staging)?;
        if let Err(e) = copy_item(&item.live, &staging, item.kind) {
            let _ = remove_path(&staging);
            return Err(e);
        }
        remove_path(&staged)?;
        fs::rename(&staging, &staged)?;
        Ok(true)
    }
}

impl SnapshotStore for DiskStore {
    fn item_exists(&self, item: &ProtectedItem) -> bool {
        item.live.exists()
    }

    fn capture(
        &self,
        location: &Location,
        items: &[ProtectedItem],
        provenance: &Provenance,
    ) -> CaptureReport {
        let mut report = CaptureReport::default();

        if let Err(e) = fs::create_dir_all(&location.root) {
            tracing::warn!(location = %location.id, "cannot create snapshot dir: {e}");
            report.failed = items.iter().map(|i| (i.name, e.to_string())).collect();
            return report;
        }

        for item in items {
            match self.capture_item(location, item) {
                Ok(true) => report.copied.push(item.name),
                Ok(false) => report.absent.push(item.name),
                Err(e) => {
                    tracing::warn!(location = %location.id, item = item.name, "capture failed: {e}");
                    report.failed.push((item.name, e.to_string()));
                }
            }
        }

        match fs::write(location.provenance(), provenance.render()) {
            Ok(()) => report.provenance_written = true,
            Err(e) => {
                tracing::warn!(location = %location.id, "writing provenance failed: {e}");
            }
        }

        tracing::debug!(
            location = %location.id,
            copied = ?report.copied,
            absent = ?report.absent,
            "snapshot captured"
        );
        report
    }

    fn has(&self, location: &Location, item: &ProtectedItem) -> bool {
        location.staged(item).exists()
    }

    fn has_provenance(&self, location: &Location) -> bool {
        location.provenance().is_file()
    }

    fn provenance(&self, location: &Location) -> Option<Provenance> {
        let bytes = fs::read(location.provenance()).ok()?;
        Provenance::parse(&String::from_utf8_lossy(&bytes))
    }

    fn restore_item(
        &self,
        location: &Location,
        item: &ProtectedItem,
    ) -> Result<(), RestoreError> {
        let staged = location.staged(item);
        if !staged.exists() {
            return Err(RestoreError::NotInSnapshot);
        }

        // Assembled beside the live path and moved in whole: a failed copy
        // never reaches the live path.
        let restoring = restoring_path(item);
        remove_path(&restoring)?;
        let moved = copy_item(&staged, &restoring, item.kind)
            .and_then(|()| fs::rename(&restoring, &item.live));
        if let Err(e) = moved {
            let _ = remove_path(&restoring);
            return Err(e.into());
        }
        tracing::info!(location = %location.id, item = item.name, "restored from snapshot");
        Ok(())
    }

    fn discard(&self, location: &Location) -> io::Result<()> {
        remove_path(&location.root)
    }
}

// ===================================================================
// Filesystem helpers
// ===================================================================

/// Sibling of the live path that a restore is assembled in.
fn restoring_path(item: &ProtectedItem) -> PathBuf {
    item.live.with_file_name(format!(".pp-restore-{}", item.name))
}

fn copy_item(src: &Path, dest: &Path, kind: ItemKind) -> io::Result<()> {
    match kind {
        ItemKind::Tree => copy_dir(src, dest),
        ItemKind::File => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(src, dest).map(|_| ())
        }
    }
}

/// Recursively copy regular files and directories. Symlinks and other
/// special files are skipped.
pub fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let to = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir(&entry.path(), &to)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

/// Remove a file or directory tree, ignoring "not found".
pub fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
