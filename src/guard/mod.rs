//! Snapshot-before, verify-after protection for shell commands.
//!
//! The guard never sees the command itself. Before it runs, every location
//! gets a fresh snapshot; after it runs, any protected item that vanished is
//! copied back from the first location that can supply it, and the result is
//! classified for the operator.

use crate::layout::Layout;
use crate::snapshot::{Location, LocationId, ProtectedItem, Provenance, SnapshotStore};
use crate::types::{AdditionalContext, HookOutput, HookSpecificOutput, Response};
use std::fmt;

// ===================================================================
// Mode: the single dormant/armed decision
// ===================================================================

/// Presence-only flags that switch the guard on and off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub onboarding: bool,
    pub opt_out: bool,
    pub sentinel: bool,
}

impl Flags {
    pub fn read(layout: &Layout) -> Self {
        Self {
            onboarding: layout.onboarding_flag().exists(),
            opt_out: layout.opt_out_flag().exists(),
            sentinel: layout.sentinel().exists(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Initial scaffolding is writing the protected files.
    Onboarding,
    /// The operator asked for the next command to go unguarded.
    OptOutPending,
    /// No sentinel anywhere: this project was never protected.
    Uninitialized,
    Armed,
}

impl GuardMode {
    /// `any_provenance` is whether any snapshot location carries a
    /// provenance marker, which survives deletion of the project's own
    /// sentinel.
    pub fn resolve(flags: Flags, any_provenance: bool) -> Self {
        if flags.onboarding {
            Self::Onboarding
        } else if flags.opt_out {
            Self::OptOutPending
        } else if flags.sentinel || any_provenance {
            Self::Armed
        } else {
            Self::Uninitialized
        }
    }
}

// ===================================================================
// Outcome
// ===================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub item: &'static str,
    pub from: LocationId,
    /// When the snapshot was taken, if its provenance marker is readable.
    pub taken: Option<String>,
}

impl fmt::Display for Restored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.taken {
            Some(at) => write!(f, "{} (from {} snapshot of {at})", self.item, self.from),
            None => write!(f, "{} (from {} snapshot)", self.item, self.from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failed {
    pub item: &'static str,
    /// Why each location could not supply the item, in the order tried.
    pub attempts: Vec<(LocationId, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every protected item is present.
    NoOp,
    FullRecovery { restored: Vec<Restored> },
    PartialRecovery {
        restored: Vec<Restored>,
        failed: Vec<Failed>,
    },
    /// A snapshot held a missing item but copying it back failed.
    RestoreFailed { failed: Vec<Failed> },
    /// Items are gone and no snapshot ever held them.
    Unrecoverable { missing: Vec<&'static str> },
}

impl Outcome {
    fn classify(restored: Vec<Restored>, failed: Vec<Failed>, snapshot_had_missing: bool) -> Self {
        if restored.is_empty() && failed.is_empty() {
            Self::NoOp
        } else if failed.is_empty() {
            Self::FullRecovery { restored }
        } else if !restored.is_empty() {
            Self::PartialRecovery { restored, failed }
        } else if snapshot_had_missing {
            Self::RestoreFailed { failed }
        } else {
            Self::Unrecoverable {
                missing: failed.into_iter().map(|f| f.item).collect(),
            }
        }
    }

    pub fn needs_attention(&self) -> bool {
        !matches!(self, Self::NoOp | Self::FullRecovery { .. })
    }

    /// What the hook should surface for this outcome.
    pub fn response(&self) -> Response {
        match self {
            Self::NoOp => Response::Silent,
            Self::FullRecovery { restored } => {
                let list = restored
                    .iter()
                    .map(Restored::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                Response::Inform(HookOutput {
                    system_message: Some(format!("[project-pilot] restored {list}")),
                    hook_specific_output: Some(HookSpecificOutput::PostToolUse(
                        AdditionalContext {
                            additional_context: Some(format!(
                                "The last command deleted Project Pilot file(s). They were \
                                 restored automatically: {list}. The intelligence layer is \
                                 intact. Tell the developer what happened and suggest running \
                                 scaffolding tools in a clean, empty directory."
                            )),
                        },
                    )),
                    ..Default::default()
                })
            }
            Self::PartialRecovery { restored, failed } => {
                let mut out = String::from(
                    "[project-pilot] integrity alert: the last command deleted Project Pilot file(s).\n",
                );
                out.push_str("Restored automatically:\n");
                for r in restored {
                    out.push_str(&format!("  - {r}\n"));
                }
                push_failed(&mut out, failed);
                Response::Advise(out)
            }
            Self::RestoreFailed { failed } => {
                let mut out = String::from(
                    "[project-pilot] integrity alert: the last command deleted Project Pilot file(s).\n",
                );
                push_failed(&mut out, failed);
                Response::Advise(out)
            }
            Self::Unrecoverable { missing } => Response::Advise(format!(
                "[project-pilot] files missing, cannot restore: {}\n\
                 No snapshot ever held them, so automatic restore is not possible.\n\
                 {STOP_NOTICE}",
                missing.join(", ")
            )),
        }
    }
}

const STOP_NOTICE: &str = "STOP. Tell the developer: \"Project Pilot data was deleted and could \
not be restored automatically. Run /project-pilot:init-pilot to regenerate it. Your codebase is \
intact; only the intelligence layer was lost.\" Do NOT continue until the developer confirms \
what to do.\n";

fn push_failed(out: &mut String, failed: &[Failed]) {
    out.push_str("Could not restore:\n");
    for f in failed {
        let reasons = f
            .attempts
            .iter()
            .map(|(loc, why)| format!("{loc}: {why}"))
            .collect::<Vec<_>>()
            .join("; ");
        out.push_str(&format!("  - {} ({reasons})\n", f.item));
    }
    out.push_str(STOP_NOTICE);
}

// ===================================================================
// Guard
// ===================================================================

pub struct Guard<'a, S: SnapshotStore> {
    store: &'a S,
    items: Vec<ProtectedItem>,
    locations: Vec<Location>,
}

impl<'a, S: SnapshotStore> Guard<'a, S> {
    /// `locations` are tried in order when restoring.
    pub fn new(store: &'a S, items: Vec<ProtectedItem>, locations: Vec<Location>) -> Self {
        Self {
            store,
            items,
            locations,
        }
    }

    /// Guard over the project's protected items and both snapshot locations.
    pub fn for_layout(store: &'a S, layout: &Layout) -> Self {
        Self::new(store, ProtectedItem::all(layout), Location::all(layout))
    }

    pub fn mode(&self, flags: Flags) -> GuardMode {
        let any_provenance = self.locations.iter().any(|l| self.store.has_provenance(l));
        GuardMode::resolve(flags, any_provenance)
    }

    /// Snapshot every item into every location. Locations are independent:
    /// one failing does not stop the next.
    pub fn prepare(&self, provenance: &Provenance) {
        for location in &self.locations {
            let report = self.store.capture(location, &self.items, provenance);
            if !report.is_clean() {
                tracing::warn!(location = %location.id, failed = ?report.failed, "partial snapshot");
            }
        }
    }

    /// Check every item, restore what is missing and classify the result.
    pub fn verify(&self) -> Outcome {
        let missing: Vec<&ProtectedItem> = self
            .items
            .iter()
            .filter(|item| !self.store.item_exists(item))
            .collect();
        if missing.is_empty() {
            return Outcome::NoOp;
        }
        let names: Vec<&str> = missing.iter().map(|i| i.name).collect();
        tracing::info!(missing = ?names, "protected items missing");

        // Decided before restoring, from snapshot contents alone.
        let snapshot_had_missing = missing
            .iter()
            .any(|item| self.locations.iter().any(|l| self.store.has(l, item)));

        let mut restored = Vec::new();
        let mut failed = Vec::new();
        for item in missing {
            match self.restore(item) {
                Ok(from) => restored.push(Restored {
                    item: item.label,
                    from: from.id,
                    taken: self.store.provenance(from).map(|p| p.captured_at),
                }),
                Err(attempts) => failed.push(Failed {
                    item: item.label,
                    attempts,
                }),
            }
        }
        Outcome::classify(restored, failed, snapshot_had_missing)
    }

    /// First location that restores `item` wins.
    fn restore(&self, item: &ProtectedItem) -> Result<&Location, Vec<(LocationId, String)>> {
        let mut attempts = Vec::new();
        for location in &self.locations {
            match self.store.restore_item(location, item) {
                Ok(()) => return Ok(location),
                Err(e) => {
                    tracing::debug!(location = %location.id, item = item.name, "restore attempt failed: {e}");
                    attempts.push((location.id, e.to_string()));
                }
            }
        }
        Err(attempts)
    }

    /// Drop every snapshot so the guard stays dormant until the project is
    /// initialized again.
    pub fn reset(&self) {
        for location in &self.locations {
            if let Err(e) = self.store.discard(location) {
                tracing::warn!(location = %location.id, "discarding snapshot failed: {e}");
            }
        }
    }
}
