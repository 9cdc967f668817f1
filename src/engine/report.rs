//! Plan and apply reports

use crate::graph::ResourceKind;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write as _;

/// What a plan expects to do with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlannedAction {
    Create,
    Update,
    NoChange,
}

impl PlannedAction {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::NoChange => "=",
        }
    }
}

/// One resource in a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedChange {
    pub name: String,
    pub kind: ResourceKind,
    pub action: PlannedAction,
    /// Redacted configuration; `None` when it depends on values known only after apply
    pub config: Option<Value>,
    /// Attributes whose values are only known after apply
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending_refs: Vec<String>,
}

/// Result of `plan`: order and per-resource actions, no provisioning calls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub topology: String,
    pub order: Vec<String>,
    pub changes: Vec<PlannedChange>,
    /// Recorded in state but no longer declared
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orphaned: Vec<String>,
}

impl Plan {
    pub fn change(&self, name: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.name == name)
    }

    pub fn count(&self, action: PlannedAction) -> usize {
        self.changes.iter().filter(|c| c.action == action).count()
    }

    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action != PlannedAction::NoChange)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Plan for {}:", self.topology);
        for change in &self.changes {
            let _ = write!(
                out,
                "  {} {} ({})",
                change.action.symbol(),
                change.name,
                change.kind
            );
            if !change.pending_refs.is_empty() {
                let _ = write!(out, " [known after apply: {}]", change.pending_refs.join(", "));
            }
            out.push('\n');
        }
        for name in &self.orphaned {
            let _ = writeln!(out, "  ! {} (recorded in state, no longer declared)", name);
        }
        let _ = writeln!(
            out,
            "{} to create, {} to update, {} unchanged",
            self.count(PlannedAction::Create),
            self.count(PlannedAction::Update),
            self.count(PlannedAction::NoChange)
        );
        out
    }
}

/// How one resource ended an apply run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ResourceOutcome {
    Created,
    Updated,
    /// No configuration drift; no provisioning call was made
    Unchanged,
    Failed { error: String },
    /// Not attempted because a dependency failed
    Skipped { blocked_by: String },
    /// Not attempted because the run was cancelled
    Cancelled,
}

impl ResourceOutcome {
    pub fn is_realized(&self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Unchanged)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceReport {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(flatten)]
    pub outcome: ResourceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Result of `apply`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub run_id: String,
    pub topology: String,
    /// Declaration order
    pub resources: Vec<ResourceReport>,
    /// Order in which provisioning calls were started
    pub started: Vec<String>,
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn outcome(&self, name: &str) -> Option<&ResourceOutcome> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.outcome)
    }

    fn names_where(&self, pred: impl Fn(&ResourceOutcome) -> bool) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| pred(&r.outcome))
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn realized(&self) -> Vec<&str> {
        self.names_where(ResourceOutcome::is_realized)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, ResourceOutcome::Skipped { .. } | ResourceOutcome::Cancelled))
    }

    /// Every resource realized; drives the CLI exit code
    pub fn is_success(&self) -> bool {
        self.failed().is_empty() && !self.cancelled
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Apply {} ({}):", self.topology, self.run_id);
        for report in &self.resources {
            let _ = write!(out, "  {:<10} {} ({})", report.outcome.label(), report.name, report.kind);
            match &report.outcome {
                ResourceOutcome::Failed { error } => {
                    let _ = write!(out, ": {}", error);
                }
                ResourceOutcome::Skipped { blocked_by } => {
                    let _ = write!(out, ": blocked by {}", blocked_by);
                }
                _ => {}
            }
            if let Some(ms) = report.duration_ms {
                let _ = write!(out, " [{}]", format_duration_ms(ms));
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "{} realized, {} failed, {} skipped{}",
            self.realized().len(),
            self.failed().len(),
            self.skipped().len(),
            if self.cancelled { " (cancelled)" } else { "" }
        );
        out
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
