//! Plans, steps and plan revision.
//!
//! A [`Plan`] is produced by the host during plan creation and revised by
//! [`Plan::apply`] during plan update. Revisions never touch the original:
//! `apply` works on a clone with a bumped version and either returns the
//! whole revision or fails without side effects.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thinkloop_core::{Message, PlanError};
use tracing::warn;

/// Lifecycle of a plan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether a step in this state will never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one specialist run on one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub output: Message,
    pub confidence: f32,
    /// Filled in from the round's feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Name of the specialist assigned to this step
    #[serde(default, alias = "agent", alias = "assigned_specialist")]
    pub specialist: String,

    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: u32,

    #[serde(default)]
    pub status: StepStatus,

    /// Ids of steps that must complete first
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub parameters: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
}

impl PlanStep {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        specialist: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            specialist: specialist.into(),
            priority: 0,
            status: StepStatus::Pending,
            dependencies: Vec::new(),
            parameters: Map::new(),
            result: None,
        }
    }

    pub fn with_dependencies<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Models write priorities as numbers, numeric strings or words.
fn lenient_priority<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().map(|n| n.min(u32::MAX as u64) as u32).unwrap_or(0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "highest" => 1,
            "high" => 2,
            "medium" | "normal" => 3,
            "low" => 4,
            other => other.parse().unwrap_or(0),
        },
        _ => 0,
    })
}

/// Overall plan status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// An ordered, versioned collection of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub id: String,

    #[serde(default = "first_version")]
    pub version: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: PlanStatus,

    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

fn first_version() -> u32 {
    1
}

/// One edit in a plan revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOperation {
    /// Append a new pending step.
    Add { step: PlanStep },

    /// Patch a step that has not completed.
    Modify {
        step_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dependencies: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameters: Option<Map<String, Value>>,
    },

    /// Delete a step that is not running.
    Remove { step_id: String },
}

impl PlanOperation {
    /// The existing step this operation targets, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Add { .. } => None,
            Self::Modify { step_id, .. } | Self::Remove { step_id } => Some(step_id),
        }
    }
}

/// A revised plan and the step ids whose results it invalidates.
#[derive(Debug, Clone)]
pub struct PlanRevision {
    pub plan: Plan,
    pub invalidated: Vec<String>,
}

impl Plan {
    pub fn new(name: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: 1,
            name: name.into(),
            description: String::new(),
            status: PlanStatus::Active,
            steps,
        }
    }

    /// Fill in missing ids, drop dangling dependencies and reject cycles.
    ///
    /// Models routinely omit step ids or reference steps that do not exist;
    /// a dependency on a missing step, or a cycle, would block its
    /// dependants forever.
    pub fn normalize(&mut self) -> Result<(), PlanError> {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.version = self.version.max(1);

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter_mut().enumerate() {
            if step.id.trim().is_empty() {
                step.id = format!("step_{}", index + 1);
            }
            if step.name.is_empty() {
                step.name = step.id.clone();
            }
            if !seen.insert(step.id.clone()) {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }

        self.prune_dependencies();
        self.check_acyclic()
    }

    /// Drop self-references and dependencies on steps not in the plan.
    fn prune_dependencies(&mut self) {
        let ids: HashSet<String> = self.steps.iter().map(|s| s.id.clone()).collect();
        for step in &mut self.steps {
            let own = step.id.clone();
            step.dependencies.retain(|dep| {
                let keep = dep != &own && ids.contains(dep);
                if !keep {
                    warn!(step_id = %own, dependency = %dep, "Dropping unknown plan dependency");
                }
                keep
            });
        }
    }

    /// Depth-first search over the dependency edges.
    fn check_acyclic(&self) -> Result<(), PlanError> {
        let edges: HashMap<&str, Vec<&str>> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.iter().map(String::as_str).collect()))
            .collect();

        fn visit<'a>(
            node: &'a str,
            edges: &HashMap<&'a str, Vec<&'a str>>,
            done: &mut HashSet<&'a str>,
            on_path: &mut HashSet<&'a str>,
        ) -> Option<&'a str> {
            if done.contains(node) {
                return None;
            }
            if !on_path.insert(node) {
                return Some(node);
            }
            for &dep in edges.get(node).into_iter().flatten() {
                if let Some(cycle) = visit(dep, edges, done, on_path) {
                    return Some(cycle);
                }
            }
            on_path.remove(node);
            done.insert(node);
            None
        }

        let mut done = HashSet::new();
        let mut on_path = HashSet::new();
        for step in &self.steps {
            if let Some(cycle) = visit(&step.id, &edges, &mut done, &mut on_path) {
                return Err(PlanError::DependencyCycle(cycle.to_string()));
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    fn status_of(&self, id: &str) -> Option<StepStatus> {
        self.step(id).map(|s| s.status)
    }

    /// The first pending step, in declaration order, whose dependencies
    /// have all completed.
    pub fn next_ready_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|step| {
            step.status == StepStatus::Pending
                && step
                    .dependencies
                    .iter()
                    .all(|dep| self.status_of(dep) == Some(StepStatus::Completed))
        })
    }

    /// Mark pending steps whose dependencies failed or were skipped as
    /// skipped, transitively. Returns the ids that changed.
    pub fn skip_blocked_steps(&mut self) -> Vec<String> {
        let mut skipped = Vec::new();
        loop {
            let blocked: Vec<String> = self
                .steps
                .iter()
                .filter(|step| step.status == StepStatus::Pending)
                .filter(|step| {
                    step.dependencies.iter().any(|dep| {
                        matches!(
                            self.status_of(dep),
                            Some(StepStatus::Failed | StepStatus::Skipped)
                        )
                    })
                })
                .map(|step| step.id.clone())
                .collect();
            if blocked.is_empty() {
                return skipped;
            }
            for id in blocked {
                if let Some(step) = self.step_mut(&id) {
                    step.status = StepStatus::Skipped;
                }
                skipped.push(id);
            }
        }
    }

    /// Transition a step to `running`.
    ///
    /// Fails unless every dependency has completed.
    pub fn start_step(&mut self, id: &str) -> Result<(), PlanError> {
        let step = self
            .step(id)
            .ok_or_else(|| PlanError::StepNotFound(id.to_string()))?;
        if let Some(dep) = step
            .dependencies
            .iter()
            .find(|dep| self.status_of(dep) != Some(StepStatus::Completed))
        {
            return Err(PlanError::DependenciesIncomplete {
                step: id.to_string(),
                dependency: dep.clone(),
            });
        }
        if let Some(step) = self.step_mut(id) {
            step.status = StepStatus::Running;
        }
        Ok(())
    }

    /// Record a specialist's result and the step's final status.
    pub fn finish_step(&mut self, id: &str, result: StepResult) -> Result<StepStatus, PlanError> {
        let step = self
            .step_mut(id)
            .ok_or_else(|| PlanError::StepNotFound(id.to_string()))?;
        step.status = if result.success {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        step.result = Some(result);
        Ok(step.status)
    }

    /// True when no step can run any more.
    pub fn is_finished(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// The terminal plan status: completed only if every step completed.
    pub fn outcome(&self) -> PlanStatus {
        if self.steps.iter().all(|s| s.status == StepStatus::Completed) {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        }
    }

    /// Apply an ordered list of operations to a copy of this plan.
    ///
    /// The copy carries the next version number. On error the revision is
    /// abandoned and `self` is untouched. The returned revision lists the
    /// ids targeted by `modify` and `remove`, whose specialist results must
    /// be discarded. Dependencies are checked again on the revised plan:
    /// unknown ids are dropped and a cycle fails the revision.
    pub fn apply(&self, operations: &[PlanOperation]) -> Result<PlanRevision, PlanError> {
        let mut plan = self.clone();
        plan.version += 1;
        let mut invalidated = Vec::new();

        for op in operations {
            match op {
                PlanOperation::Add { step } => {
                    let mut step = step.clone();
                    if step.id.trim().is_empty() {
                        step.id = plan.unused_step_id();
                    }
                    if plan.step(&step.id).is_some() {
                        return Err(PlanError::DuplicateStep(step.id));
                    }
                    if step.name.is_empty() {
                        step.name = step.id.clone();
                    }
                    step.status = StepStatus::Pending;
                    step.result = None;
                    plan.steps.push(step);
                }
                PlanOperation::Modify {
                    step_id,
                    name,
                    description,
                    priority,
                    dependencies,
                    parameters,
                } => {
                    let step = plan
                        .step_mut(step_id)
                        .ok_or_else(|| PlanError::StepNotFound(step_id.clone()))?;
                    if step.status == StepStatus::Completed {
                        return Err(PlanError::StepCompleted(step_id.clone()));
                    }
                    if let Some(name) = name {
                        step.name = name.clone();
                    }
                    if let Some(description) = description {
                        step.description = description.clone();
                    }
                    if let Some(priority) = priority {
                        step.priority = *priority;
                    }
                    if let Some(dependencies) = dependencies {
                        step.dependencies = dependencies.clone();
                    }
                    if let Some(parameters) = parameters {
                        step.parameters = parameters.clone();
                    }
                    // A revised failed or skipped step gets another chance.
                    if matches!(step.status, StepStatus::Failed | StepStatus::Skipped) {
                        step.status = StepStatus::Pending;
                    }
                    step.result = None;
                    invalidated.push(step_id.clone());
                }
                PlanOperation::Remove { step_id } => {
                    let step = plan
                        .step(step_id)
                        .ok_or_else(|| PlanError::StepNotFound(step_id.clone()))?;
                    if step.status == StepStatus::Running {
                        return Err(PlanError::StepRunning(step_id.clone()));
                    }
                    plan.steps.retain(|s| &s.id != step_id);
                    for step in &mut plan.steps {
                        step.dependencies.retain(|dep| dep != step_id);
                    }
                    invalidated.push(step_id.clone());
                }
            }
        }

        plan.prune_dependencies();
        plan.check_acyclic()?;
        if !plan.is_finished() {
            plan.status = PlanStatus::Active;
        }
        Ok(PlanRevision { plan, invalidated })
    }

    fn unused_step_id(&self) -> String {
        (self.steps.len() + 1..)
            .map(|n| format!("step_{n}"))
            .find(|id| self.step(id).is_none())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// A compact text rendering for prompts.
    pub fn render(&self) -> String {
        let mut out = format!("Plan '{}' (version {})\n", self.name, self.version);
        for step in &self.steps {
            out.push_str(&format!(
                "- [{}] {} ({}) specialist={} status={}",
                step.id, step.name, step.description, step.specialist, step.status
            ));
            if !step.dependencies.is_empty() {
                out.push_str(&format!(" depends_on={}", step.dependencies.join(",")));
            }
            out.push('\n');
        }
        out
    }
}
