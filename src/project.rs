use crate::critical::{self, CriticalPath};
use crate::guard::{Flags, Guard, GuardMode};
use crate::layout::Layout;
use crate::ledger::{ChangeKind, Ledger, LedgerEntry, LedgerStore, read_optional};
use crate::lifecycle::{
    self, INSTALL_NUDGE, SessionStartContext, SynthesisTrigger, decide_session_start,
};
use crate::preferences::{Preferences, Synthesis};
use crate::snapshot::{DiskStore, Provenance, remove_path, timestamp};
use crate::types::{Event, Response, SessionStartSource};
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Knowledge files `finalize` records as created, relative to the root.
const EXPECTED_FILES: &[&str] = &[
    ".pilot/project-brief.md",
    ".pilot/architecture.md",
    ".pilot/active-context.md",
    ".pilot/progress.md",
    ".pilot/patterns.md",
    ".pilot/decisions.md",
    ".pilot/internal/critical-paths.txt",
    ".pilot/internal/dependency-map.md",
    "CLAUDE.md",
];

const CLAUDE_GITIGNORE_HEADER: &str =
    "# Project Pilot runtime files: machine-local, do not commit\n";
const CLAUDE_GITIGNORE_ENTRIES: &[&str] =
    &[".pp-snapshot/", "project-pilot-initialized", ".pp-no-guard"];

const INTERNAL_GITIGNORE: &str = ".last-synthesis\n.synthesis-count\n.onboarding\n";

const SYNTHESIS_INSTRUCTIONS: &str = "# Synthesis Instructions\n\
Update .pilot/ files to reflect session changes. See plugin documentation.\n";

const DEPENDENCY_MAP: &str = "# Dependency Map\nAuto-maintained by Project Pilot.\n";

const ACTIVE_CONTEXT: &str = "# Active Context\n\
## Currently Working On\n_Being generated..._\n\
## Next Up\n_Being generated..._\n\
## Known Issues / Tech Debt\n_Being generated..._\n";

const PROGRESS: &str = "# Progress Log\n\
## Verified\n\n\
## Implemented (Unverified)\n\n\
## Has Known Issues\n\n\
## In Progress\n_Being generated..._\n";

/// Whole hours since `path` was last modified, if it exists.
fn age_hours(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let modified: DateTime<Utc> = modified.into();
    Some((Utc::now() - modified).num_hours())
}

/// Keep a session-start signal from failing the others: log the error and
/// use `fallback` in its place.
fn or_warn<T>(signal: &str, result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|err| {
        tracing::warn!(signal, "{err:#}");
        fallback
    })
}

/// Write `contents` unless the file already exists. Returns whether it wrote.
fn write_if_absent(path: &Path, contents: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

fn advise_all(messages: Vec<String>) -> Response {
    if messages.is_empty() {
        Response::Silent
    } else {
        Response::Advise(format!("{}\n", messages.join("\n")))
    }
}

/// One project's guard, ledger and lifecycle state, plus the handlers that
/// act on them.
pub struct Project {
    layout: Layout,
    ledger: Ledger,
    store: DiskStore,
    pub prefs: Preferences,
}

impl Project {
    /// Resolve every path under `root` and load preferences. Unreadable
    /// preferences fall back to defaults so the guard keeps running.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let layout = Layout::new(root);
        let prefs = Preferences::load(&layout.claude_dir()).unwrap_or_else(|err| {
            tracing::warn!("{err:#}; using default preferences");
            Preferences::default()
        });
        Self {
            ledger: Ledger::new(&layout),
            layout,
            store: DiskStore,
            prefs,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn guard(&self) -> Guard<'_, DiskStore> {
        Guard::for_layout(&self.store, &self.layout)
    }

    fn onboarding(&self) -> bool {
        self.layout.onboarding_flag().exists()
    }

    /// Route one hook event to its handler.
    pub fn handle(&self, event: &Event) -> Result<Response> {
        match event {
            Event::BeforeCommand => self.handle_before_command(),
            Event::AfterCommand { command } => self.handle_after_command(command.as_deref()),
            Event::AfterEdit { file_path } => self.handle_after_edit(file_path),
            Event::SessionStart { source } => self.handle_session_start(*source),
            Event::Stop { stop_hook_active } => self.handle_stop(*stop_hook_active),
            Event::PreCompact => self.handle_pre_compact(),
            Event::Ignored => Ok(Response::Silent),
        }
    }

    // ---------------------------------------------------------------
    // Integrity guard
    // ---------------------------------------------------------------

    fn handle_before_command(&self) -> Result<Response> {
        let guard = self.guard();
        match guard.mode(Flags::read(&self.layout)) {
            GuardMode::Armed => guard.prepare(&Provenance::now(&self.layout)),
            mode => tracing::debug!(?mode, "guard dormant, no snapshot"),
        }
        Ok(Response::Silent)
    }

    fn handle_after_command(&self, command: Option<&str>) -> Result<Response> {
        let guard = self.guard();
        let response = match guard.mode(Flags::read(&self.layout)) {
            GuardMode::Onboarding | GuardMode::Uninitialized => Response::Silent,
            GuardMode::OptOutPending => {
                self.consume_opt_out(&guard);
                Response::Silent
            }
            GuardMode::Armed => {
                let outcome = guard.verify();
                if outcome.needs_attention() {
                    tracing::warn!(?outcome, "integrity check needs attention");
                }
                outcome.response()
            }
        };

        // After the check, so a restored ledger still receives the entry.
        if let Some(command) = command {
            if let Err(err) = self.record(ChangeKind::Bash, command) {
                tracing::warn!("{err:#}");
            }
        }
        Ok(response)
    }

    /// Single use: the flag, the sentinel and every snapshot go, leaving the
    /// guard dormant until the project is initialized again.
    /// Each step is attempted even when an earlier one fails.
    fn consume_opt_out(&self, guard: &Guard<'_, DiskStore>) {
        for path in [self.layout.opt_out_flag(), self.layout.sentinel()] {
            if let Err(e) = remove_path(&path) {
                tracing::warn!("removing {}: {e}", path.display());
            }
        }
        guard.reset();
        tracing::info!("opt-out consumed, guard disarmed");
    }

    // ---------------------------------------------------------------
    // Change logging
    // ---------------------------------------------------------------

    /// Append to the ledger when the project is initialized and not
    /// onboarding. Returns whether an entry was written.
    fn record(&self, kind: ChangeKind, subject: &str) -> Result<bool> {
        if !self.layout.internal_dir().is_dir() || self.onboarding() {
            return Ok(false);
        }
        self.ledger.append(&LedgerEntry::now(kind, subject))?;
        Ok(true)
    }

    fn handle_after_edit(&self, file_path: &str) -> Result<Response> {
        let path = file_path.replace('\\', "/");
        if path.contains(".pilot/internal/") || path.contains(".claude/") {
            return Ok(Response::Silent);
        }
        if !self.record(ChangeKind::Edit, &path)? {
            return Ok(Response::Silent);
        }

        let paths = read_optional(&self.layout.critical_paths())?
            .map(|s| CriticalPath::parse_all(&s))
            .unwrap_or_default();
        Ok(match critical::warnings(&paths, &path) {
            Some(text) => Response::Advise(text),
            None => Response::Silent,
        })
    }

    // ---------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------

    fn handle_session_start(&self, source: SessionStartSource) -> Result<Response> {
        if self.onboarding() {
            return Ok(Response::Silent);
        }
        if !self.layout.pilot_dir().is_dir() {
            return Ok(match source {
                SessionStartSource::Startup => Response::hint(INSTALL_NUDGE),
                _ => Response::Silent,
            });
        }

        let pending = if self.ledger.exists() {
            or_warn("pending", self.ledger.pending().map(|p| Some(p.len())), None)
        } else {
            None
        };
        let ctx = SessionStartContext {
            source,
            pending,
            active_context_age_hours: age_hours(&self.layout.active_context()),
            modules: or_warn("modules", self.module_names(), Vec::new()),
            dependency_map_age_hours: age_hours(&self.layout.dependency_map()),
            synthesis_count: or_warn("synthesis count", self.ledger.synthesis_count(), None),
            revisit_markers: or_warn("revisit markers", self.revisit_markers(), 0),
        };
        tracing::debug!(?ctx, "session start");
        Ok(advise_all(decide_session_start(&ctx, &self.prefs)))
    }

    /// `*.md` names under `.pilot/modules/`, extension stripped.
    fn module_names(&self) -> Result<Vec<String>> {
        let dir = self.layout.modules_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", dir.display())),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("reading {}", dir.display()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "md") {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        Ok(names)
    }

    fn revisit_markers(&self) -> Result<usize> {
        Ok(read_optional(&self.layout.decisions())?
            .map(|s| s.matches("Revisit When").count())
            .unwrap_or(0))
    }

    fn handle_stop(&self, stop_hook_active: bool) -> Result<Response> {
        if stop_hook_active
            || !self.layout.pilot_dir().is_dir()
            || !self.ledger.exists()
            || self.onboarding()
        {
            return Ok(Response::Silent);
        }
        let count = self.ledger.pending()?.len();
        if count == 0 {
            return Ok(Response::Silent);
        }

        let number = self.ledger.next_synthesis()?;
        let trigger = SynthesisTrigger::new(count, number, &self.prefs.synthesis);
        tracing::info!(number, count, weight = %trigger.weight, "synthesis triggered");
        let message = trigger
            .render(&self.prefs.synthesis.template)
            .or_else(|err| {
                tracing::warn!("{err:#}; falling back to the default template");
                trigger.render(&Synthesis::default().template)
            })?;
        Ok(Response::Advise(format!("{message}\n")))
    }

    fn handle_pre_compact(&self) -> Result<Response> {
        if self.onboarding() || !self.ledger.exists() {
            return Ok(Response::Silent);
        }
        let pending = self.ledger.pending()?.len();
        Ok(lifecycle::compaction_notice(pending)
            .map(Response::hint)
            .unwrap_or(Response::Silent))
    }

    // ---------------------------------------------------------------
    // Operator subcommands
    // ---------------------------------------------------------------

    /// Scaffold the intelligence layer and enter onboarding. Existing
    /// knowledge files are left alone.
    pub fn init(&self) -> Result<()> {
        let layout = &self.layout;
        for dir in [layout.internal_dir(), layout.modules_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        }

        let flag = layout.onboarding_flag();
        fs::write(&flag, "in-progress\n").with_context(|| format!("writing {}", flag.display()))?;

        self.ledger.init()?;
        write_if_absent(&layout.internal_dir().join(".gitignore"), INTERNAL_GITIGNORE)?;
        write_if_absent(&layout.synthesis_instructions(), SYNTHESIS_INSTRUCTIONS)?;
        write_if_absent(&layout.dependency_map(), DEPENDENCY_MAP)?;
        write_if_absent(&layout.active_context(), ACTIVE_CONTEXT)?;
        write_if_absent(&layout.progress(), PROGRESS)?;

        self.stamp_sentinel(&timestamp())?;
        self.ignore_runtime_files()?;
        Preferences::write_default(&layout.claude_dir())?;
        tracing::info!(root = %layout.root().display(), "project initialized, onboarding");
        Ok(())
    }

    /// Close onboarding: record what was generated, stamp the watermark so
    /// none of it is pending, and arm the guard. Returns the recorded paths.
    pub fn finalize(&self) -> Result<Vec<String>> {
        let layout = &self.layout;
        ensure!(
            layout.internal_dir().is_dir(),
            "{} is not initialized; run `project-pilot init` first",
            layout.root().display()
        );

        let mut created: Vec<String> = EXPECTED_FILES.iter().map(|s| s.to_string()).collect();
        let mut modules = self.module_names()?;
        modules.sort();
        created.extend(modules.into_iter().map(|m| format!(".pilot/modules/{m}.md")));
        created.retain(|rel| layout.root().join(rel).exists());

        let ts = timestamp();
        for subject in &created {
            self.ledger.append(&LedgerEntry {
                timestamp: ts.clone(),
                kind: ChangeKind::Created,
                subject: subject.clone(),
            })?;
        }
        self.ledger.stamp_watermark(&ts)?;

        let flag = layout.onboarding_flag();
        remove_path(&flag).with_context(|| format!("removing {}", flag.display()))?;
        self.stamp_sentinel(&ts)?;
        Ok(created)
    }

    /// Let the next guarded command delete protected files without a restore.
    pub fn allow_delete(&self) -> Result<PathBuf> {
        let dir = self.layout.claude_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let flag = self.layout.opt_out_flag();
        fs::write(&flag, format!("{}\n", timestamp()))
            .with_context(|| format!("writing {}", flag.display()))?;
        Ok(flag)
    }

    fn stamp_sentinel(&self, ts: &str) -> Result<()> {
        let dir = self.layout.claude_dir();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let sentinel = self.layout.sentinel();
        fs::write(&sentinel, format!("{ts}\n"))
            .with_context(|| format!("writing {}", sentinel.display()))
    }

    /// Add the guard's runtime files to `.claude/.gitignore`, once each.
    fn ignore_runtime_files(&self) -> Result<()> {
        let path = self.layout.claude_dir().join(".gitignore");
        let existing =
            read_optional(&path)?.unwrap_or_else(|| CLAUDE_GITIGNORE_HEADER.to_string());
        let missing: Vec<&str> = CLAUDE_GITIGNORE_ENTRIES
            .iter()
            .copied()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let mut contents = existing;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&missing.join("\n"));
        contents.push('\n');
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
    }
}
