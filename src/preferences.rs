use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

pub const FILENAME: &str = "project-pilot.toml";

const DEFAULT_SYNTHESIS_TEMPLATE: &str = "Session synthesis #{{ number }}: {{ count }} change(s), \
weight: {{ weight }}. Read .pilot/internal/synthesis-instructions.md and update pilot files \
accordingly. IMPORTANT: as the absolute final step, after all files are written, write the \
current UTC timestamp (format: 2025-01-15T10:30:00Z) to .pilot/internal/.last-synthesis \
using the Write tool.";

/// Age limits (in hours) for the knowledge files checked at session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Staleness {
    /// `active-context.md` older than this gets a "verify before relying" warning.
    pub context_warn_hours: u64,
    /// `active-context.md` older than this is treated as an extended absence.
    pub absence_hours: u64,
    pub dependency_map_hours: u64,
}

impl Default for Staleness {
    fn default() -> Self {
        Self {
            context_warn_hours: 48,
            absence_hours: 336,
            dependency_map_hours: 72,
        }
    }
}

/// Synthesis cadence and weighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Synthesis {
    /// Pending count at which a synthesis becomes `medium`.
    pub medium_at: usize,
    /// Pending count at which a synthesis becomes `heavy`.
    pub heavy_at: usize,
    /// Every n-th synthesis is forced to `heavy`; also the revisit cadence.
    pub deep_review_every: u64,
    /// Decision revisit reminders start after this many syntheses.
    pub revisit_after: u64,
    /// Jinja template for the Stop-hook trigger. Receives `number`, `count`
    /// and `weight`.
    pub template: String,
}

impl Default for Synthesis {
    fn default() -> Self {
        Self {
            medium_at: 6,
            heavy_at: 16,
            deep_review_every: 5,
            revisit_after: 10,
            template: DEFAULT_SYNTHESIS_TEMPLATE.into(),
        }
    }
}

/// User-facing preferences stored in `.claude/project-pilot.toml`.
///
/// ```toml
/// [staleness]
/// context_warn_hours = 48
///
/// [synthesis]
/// heavy_at = 20
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    #[serde(default)]
    pub staleness: Staleness,
    #[serde(default)]
    pub synthesis: Synthesis,
}

impl Preferences {
    /// Load preferences from `dir/project-pilot.toml`, falling back to
    /// defaults when the file doesn't exist. Missing keys are filled in by
    /// serde.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FILENAME);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Write the defaults to `dir/project-pilot.toml` unless a file is
    /// already there. Returns whether a file was written.
    pub fn write_default(dir: &Path) -> Result<bool> {
        let path = dir.join(FILENAME);
        if path.exists() {
            return Ok(false);
        }
        let toml_str = toml::to_string_pretty(&Preferences::default())
            .context("serializing default preferences")?;
        fs::write(&path, toml_str)
            .with_context(|| format!("writing default {}", path.display()))?;
        Ok(true)
    }
}
