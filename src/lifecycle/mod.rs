use crate::ledger::{self, SessionWeight};
use crate::preferences::{Preferences, Synthesis};
use crate::types::SessionStartSource;
use anyhow::{Context, Result};
use minijinja::{Environment, context};

// ===================================================================
// Input: all I/O-derived state, gathered by Project before deciding
// ===================================================================

#[derive(Debug, Clone, Default)]
pub struct SessionStartContext {
    pub source: SessionStartSource,
    /// Ledger entries newer than the watermark; `None` without a ledger.
    pub pending: Option<usize>,
    pub active_context_age_hours: Option<i64>,
    /// Module note names, extension stripped.
    pub modules: Vec<String>,
    pub dependency_map_age_hours: Option<i64>,
    pub synthesis_count: Option<u64>,
    /// Occurrences of `Revisit When` in `decisions.md`.
    pub revisit_markers: usize,
}

// ===================================================================
// Session start
// ===================================================================

/// Every advisory that applies at this boundary, in a fixed order. Checks
/// are independent; one firing never suppresses another.
pub fn decide_session_start(ctx: &SessionStartContext, prefs: &Preferences) -> Vec<String> {
    let mut out = Vec::new();
    let staleness = &prefs.staleness;

    if ctx.source.is_recovery() {
        if let Some(n) = ctx.pending.filter(|n| *n > 0) {
            out.push(format!(
                "Recovery: {n} unsynthesized change(s) from before /{}. Read \
                 .pilot/internal/synthesis-instructions.md and synthesize before resuming work.",
                ctx.source.as_str()
            ));
        }
    }

    if let Some(age) = ctx.active_context_age_hours {
        if age > staleness.absence_hours as i64 {
            out.push(format!(
                "Returning after {} days away. Run /project-pilot:pilot-dashboard for a guided \
                 re-onboarding.",
                age / 24
            ));
        } else if age > staleness.context_warn_hours as i64 {
            out.push(format!(
                "Warning: active-context.md is {age}h old, verify before relying on it."
            ));
        }
    }

    if !ctx.modules.is_empty() {
        let mut names = ctx.modules.clone();
        names.sort();
        out.push(format!(
            "Modules available: {}. Read .pilot/modules/[name].md when working in a module \
             directory.",
            names.join(", ")
        ));
    }

    if let Some(age) = ctx.dependency_map_age_hours {
        if age > staleness.dependency_map_hours as i64 {
            out.push(format!("Warning: dependency-map.md is {age}h old."));
        }
    }

    if let Some(count) = ctx.synthesis_count {
        if revisit_due(count, &prefs.synthesis) && ctx.revisit_markers > 0 {
            out.push(format!(
                "{count} sessions completed. Check {} decision revisitation condition(s) in \
                 .pilot/decisions.md.",
                ctx.revisit_markers
            ));
        }
    }

    out
}

/// Decision revisits come up on the deep-review cadence once enough
/// syntheses have happened.
fn revisit_due(count: u64, cfg: &Synthesis) -> bool {
    count >= cfg.revisit_after && cfg.deep_review_every > 0 && count % cfg.deep_review_every == 0
}

/// Shown on `startup` when the plugin is installed but the project has no
/// intelligence layer yet.
pub const INSTALL_NUDGE: &str = "Project Pilot is installed. Run /project-pilot:init-pilot to set \
up your project intelligence layer.";

// ===================================================================
// Stop: synthesis trigger
// ===================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisTrigger {
    /// 1-based synthesis number, already persisted.
    pub number: u64,
    pub count: usize,
    pub weight: SessionWeight,
}

impl SynthesisTrigger {
    pub fn new(count: usize, number: u64, cfg: &Synthesis) -> Self {
        Self {
            number,
            count,
            weight: ledger::weight(count, number, cfg),
        }
    }

    /// Render the trigger message from a Jinja template.
    pub fn render(&self, template: &str) -> Result<String> {
        let env = Environment::new();
        let tmpl = env
            .template_from_str(template)
            .context("parsing synthesis template")?;
        tmpl.render(context! {
            number => self.number,
            count => self.count,
            weight => self.weight.to_string(),
        })
        .context("rendering synthesis template")
    }
}

// ===================================================================
// PreCompact
// ===================================================================

pub fn compaction_notice(pending: usize) -> Option<String> {
    (pending > 0).then(|| {
        format!(
            "Compacting with {pending} unsynthesized change(s). Will recover after compaction."
        )
    })
}
