use sha2::{Digest, Sha256};
use std::env;
use std::path::{Path, PathBuf};

/// Overrides the parent directory of the durable snapshot location.
pub const SNAPSHOT_DIR_ENV: &str = "PROJECT_PILOT_SNAPSHOT_DIR";

pub const PILOT_DIR: &str = ".pilot";
pub const CLAUDE_MD: &str = "CLAUDE.md";
pub const CLAUDE_DIR: &str = ".claude";

/// Every path the plugin reads or writes for one project.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    durable_base: PathBuf,
}

impl Layout {
    /// Layout for `root`, with the durable snapshot under the OS temp dir (or
    /// `$PROJECT_PILOT_SNAPSHOT_DIR`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let durable_base = env::var_os(SNAPSHOT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        Self::with_durable_base(root, durable_base)
    }

    pub fn with_durable_base(root: impl Into<PathBuf>, durable_base: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            durable_base: durable_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identity recorded in provenance markers and hashed for the durable slot.
    pub fn identity(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    // ---------------------------------------------------------------
    // Protected items
    // ---------------------------------------------------------------

    pub fn pilot_dir(&self) -> PathBuf {
        self.root.join(PILOT_DIR)
    }

    pub fn claude_md(&self) -> PathBuf {
        self.root.join(CLAUDE_MD)
    }

    // ---------------------------------------------------------------
    // Ledger state
    // ---------------------------------------------------------------

    pub fn internal_dir(&self) -> PathBuf {
        self.pilot_dir().join("internal")
    }

    pub fn ledger(&self) -> PathBuf {
        self.internal_dir().join("change-ledger.log")
    }

    pub fn last_synthesis(&self) -> PathBuf {
        self.internal_dir().join(".last-synthesis")
    }

    pub fn synthesis_count(&self) -> PathBuf {
        self.internal_dir().join(".synthesis-count")
    }

    pub fn onboarding_flag(&self) -> PathBuf {
        self.internal_dir().join(".onboarding")
    }

    pub fn critical_paths(&self) -> PathBuf {
        self.internal_dir().join("critical-paths.txt")
    }

    pub fn dependency_map(&self) -> PathBuf {
        self.internal_dir().join("dependency-map.md")
    }

    pub fn synthesis_instructions(&self) -> PathBuf {
        self.internal_dir().join("synthesis-instructions.md")
    }

    // ---------------------------------------------------------------
    // Knowledge files read at session boundaries
    // ---------------------------------------------------------------

    pub fn active_context(&self) -> PathBuf {
        self.pilot_dir().join("active-context.md")
    }

    pub fn progress(&self) -> PathBuf {
        self.pilot_dir().join("progress.md")
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.pilot_dir().join("modules")
    }

    pub fn decisions(&self) -> PathBuf {
        self.pilot_dir().join("decisions.md")
    }

    // ---------------------------------------------------------------
    // Guard state (outside the protected tree)
    // ---------------------------------------------------------------

    pub fn claude_dir(&self) -> PathBuf {
        self.root.join(CLAUDE_DIR)
    }

    pub fn sentinel(&self) -> PathBuf {
        self.claude_dir().join("project-pilot-initialized")
    }

    pub fn opt_out_flag(&self) -> PathBuf {
        self.claude_dir().join(".pp-no-guard")
    }

    pub fn local_snapshot(&self) -> PathBuf {
        self.claude_dir().join(".pp-snapshot")
    }

    /// Durable snapshot slot, keyed by the project path so projects never
    /// share a slot and the same project always reuses its own.
    pub fn durable_snapshot(&self) -> PathBuf {
        self.durable_base.join(format!("pp-{}", path_hash(&self.identity())))
    }
}

/// First 16 hex digits of the SHA-256 of `path`.
pub fn path_hash(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}
