//! Workflow definition model, signals, and run input/output types
//!
//! Definitions are authored by tenants as JSON (or TOML) documents and are
//! immutable for the lifetime of an execution. Step kinds form a closed sum
//! type: an unknown `type` is rejected when the definition is loaded, never at
//! dispatch time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/* ===================== Definition Errors ===================== */

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DefinitionError {
    #[error("Failed to parse workflow definition: {0}")]
    Parse(String),
    #[error("Step at position {0} has an empty id")]
    EmptyStepId(usize),
    #[error("Duplicate step id '{0}'")]
    DuplicateStepId(String),
    #[error("Duplicate status id '{0}' in status schema")]
    DuplicateStatusId(String),
    #[error("Duplicate status order {0} in status schema")]
    DuplicateStatusOrder(i32),
}

/* ===================== Status Schema ===================== */

/// One entry of a tenant's ordered status vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub order: i32,
}

/// Optional ordered list of business statuses a tenant allows
///
/// An empty schema means the tenant has no vocabulary and any status is legal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSchema(pub Vec<StatusEntry>);

impl StatusSchema {
    pub fn new(entries: Vec<StatusEntry>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|entry| entry.id == id)
    }

    /// The entry with the lowest `order`, if any
    pub fn lowest(&self) -> Option<&StatusEntry> {
        self.0.iter().min_by_key(|entry| entry.order)
    }

    pub fn entries(&self) -> &[StatusEntry] {
        &self.0
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for entry in &self.0 {
            if !ids.insert(entry.id.as_str()) {
                return Err(DefinitionError::DuplicateStatusId(entry.id.clone()));
            }
            if !orders.insert(entry.order) {
                return Err(DefinitionError::DuplicateStatusOrder(entry.order));
            }
        }
        Ok(())
    }
}

/* ===================== Workflow Definition ===================== */

/// Immutable, versioned workflow program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "StatusSchema::is_empty")]
    pub statuses: StatusSchema,
}

impl WorkflowDefinition {
    pub fn new(steps: Vec<Step>, statuses: StatusSchema) -> Self {
        Self { steps, statuses }
    }

    /// Parse and validate a JSON definition document
    pub fn from_json(source: &str) -> Result<Self, DefinitionError> {
        let definition: Self =
            serde_json::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Parse and validate a TOML definition document
    pub fn from_toml(source: &str) -> Result<Self, DefinitionError> {
        let definition: Self =
            toml::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check structural invariants that do not depend on execution state
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen = HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.id.is_empty() {
                return Err(DefinitionError::EmptyStepId(idx));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(DefinitionError::DuplicateStepId(step.id.clone()));
            }
        }
        self.statuses.validate()
    }

    /// Index of the step with the given id
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }

    /// SHA-256 of the canonical JSON form, used as the version identity
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

/* ===================== Steps ===================== */

/// One addressable unit of a workflow program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct Step {
    pub id: String,
    pub label: String,
    pub phase_id: Option<String>,
    pub kind: StepKind,
}

impl Step {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            phase_id: None,
            kind,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_phase(mut self, phase_id: impl Into<String>) -> Self {
        self.phase_id = Some(phase_id.into());
        self
    }
}

/// Step kind together with its kind-specific configuration
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Trigger,
    AssignTask(AssignTaskConfig),
    WaitForTask(WaitConfig),
    WaitForApproval(WaitConfig),
    UpdateStatus(UpdateStatusConfig),
    Condition(ConditionConfig),
    SendEmail(SendEmailConfig),
    Delay(DelayConfig),
    UpdateContact(UpdateContactConfig),
    UpdateTask(UpdateTaskConfig),
}

impl StepKind {
    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Trigger => StepType::Trigger,
            StepKind::AssignTask(_) => StepType::AssignTask,
            StepKind::WaitForTask(_) => StepType::WaitForTask,
            StepKind::WaitForApproval(_) => StepType::WaitForApproval,
            StepKind::UpdateStatus(_) => StepType::UpdateStatus,
            StepKind::Condition(_) => StepType::Condition,
            StepKind::SendEmail(_) => StepType::SendEmail,
            StepKind::Delay(_) => StepType::Delay,
            StepKind::UpdateContact(_) => StepType::UpdateContact,
            StepKind::UpdateTask(_) => StepType::UpdateTask,
        }
    }
}

/// Discriminant of [`StepKind`] as it appears in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Trigger,
    AssignTask,
    WaitForTask,
    WaitForApproval,
    UpdateStatus,
    Condition,
    SendEmail,
    Delay,
    UpdateContact,
    UpdateTask,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{}", name)
    }
}

/// Wire shape of a step: `{id, type, label, phaseId?, config}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    id: String,
    #[serde(rename = "type")]
    step_type: StepType,
    #[serde(default)]
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phase_id: Option<String>,
    #[serde(default)]
    config: JsonValue,
}

fn parse_config<T: serde::de::DeserializeOwned>(
    step_id: &str,
    config: JsonValue,
) -> Result<T, String> {
    let config = match config {
        JsonValue::Null => JsonValue::Object(serde_json::Map::new()),
        other => other,
    };
    serde_json::from_value(config).map_err(|e| format!("invalid config for step '{}': {}", step_id, e))
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let id = raw.id;
        let kind = match raw.step_type {
            StepType::Trigger => StepKind::Trigger,
            StepType::AssignTask => StepKind::AssignTask(parse_config(&id, raw.config)?),
            StepType::WaitForTask => StepKind::WaitForTask(parse_config(&id, raw.config)?),
            StepType::WaitForApproval => StepKind::WaitForApproval(parse_config(&id, raw.config)?),
            StepType::UpdateStatus => StepKind::UpdateStatus(parse_config(&id, raw.config)?),
            StepType::Condition => StepKind::Condition(parse_config(&id, raw.config)?),
            StepType::SendEmail => StepKind::SendEmail(parse_config(&id, raw.config)?),
            StepType::Delay => StepKind::Delay(parse_config(&id, raw.config)?),
            StepType::UpdateContact => StepKind::UpdateContact(parse_config(&id, raw.config)?),
            StepType::UpdateTask => StepKind::UpdateTask(parse_config(&id, raw.config)?),
        };
        Ok(Step {
            id,
            label: raw.label,
            phase_id: raw.phase_id,
            kind,
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let step_type = step.kind.step_type();
        let config = match &step.kind {
            StepKind::Trigger => Ok(JsonValue::Object(serde_json::Map::new())),
            StepKind::AssignTask(c) => serde_json::to_value(c),
            StepKind::WaitForTask(c) | StepKind::WaitForApproval(c) => serde_json::to_value(c),
            StepKind::UpdateStatus(c) => serde_json::to_value(c),
            StepKind::Condition(c) => serde_json::to_value(c),
            StepKind::SendEmail(c) => serde_json::to_value(c),
            StepKind::Delay(c) => serde_json::to_value(c),
            StepKind::UpdateContact(c) => serde_json::to_value(c),
            StepKind::UpdateTask(c) => serde_json::to_value(c),
        };
        RawStep {
            id: step.id,
            step_type,
            label: step.label,
            phase_id: step.phase_id,
            config: config.unwrap_or_default(),
        }
    }
}

/* ===================== Step Configs ===================== */

fn default_task_type() -> String {
    "general".to_string()
}

/// Accept strings, numbers and booleans; numbers and booleans are stringified
fn stringified<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        JsonValue::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, number or boolean, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_days: Option<u32>,
}

impl AssignTaskConfig {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            task_type: default_task_type(),
            assigned_role: None,
            assigned_to: None,
            priority: TaskPriority::default(),
            due_days: None,
        }
    }
}

/// Shared by `wait_for_task` and `wait_for_approval`
///
/// Without `timeoutDays` the wait has no deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusConfig {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionBranch {
    #[serde(deserialize_with = "stringified")]
    pub value: String,
    pub goto_step_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionConfig {
    pub field: String,
    #[serde(default)]
    pub branches: Vec<ConditionBranch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_step_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailConfig {
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    #[serde(alias = "second")]
    Seconds,
    #[serde(alias = "minute")]
    Minutes,
    #[serde(alias = "hour")]
    Hours,
    #[serde(alias = "day")]
    Days,
    #[serde(alias = "week")]
    Weeks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    pub duration: u32,
    pub unit: DelayUnit,
}

impl DelayConfig {
    /// `None` when the duration does not fit a `chrono::Duration`
    pub fn as_duration(&self) -> Option<chrono::Duration> {
        let n = i64::from(self.duration);
        match self.unit {
            DelayUnit::Seconds => chrono::Duration::try_seconds(n),
            DelayUnit::Minutes => chrono::Duration::try_minutes(n),
            DelayUnit::Hours => chrono::Duration::try_hours(n),
            DelayUnit::Days => chrono::Duration::try_days(n),
            DelayUnit::Weeks => chrono::Duration::try_weeks(n),
        }
    }
}

/// `{field, value}` pair whose value is a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAssignment {
    pub field: String,
    #[serde(deserialize_with = "stringified")]
    pub value: String,
}

impl FieldAssignment {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactConfig {
    #[serde(default)]
    pub fields: Vec<FieldAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskConfig {
    pub task_step_id: String,
    #[serde(default)]
    pub fields: Vec<FieldAssignment>,
}

/* ===================== Tasks ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [Self::Low, Self::Medium, Self::High, Self::Urgent];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }
}

/// Task lifecycle values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [Self::Todo, Self::InProgress, Self::Blocked, Self::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// Task creation request sent to the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub org_id: String,
    pub contact_id: String,
    pub title: String,
    pub description: Option<String>,
    pub task_type: String,
    pub assigned_role: Option<String>,
    pub assigned_to: Option<String>,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by_step_id: String,
}

/* ===================== Execution State ===================== */

/// System-level run status, independent of the business status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Running,
    Completed,
    Timeout,
    Error,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Timeout => "timeout",
            ExecutionState::Error => "error",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ===================== Signals ===================== */

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompleted {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub completed_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
}

impl ApprovalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalOutcome::Approved => "approved",
            ApprovalOutcome::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalSubmitted {
    pub outcome: ApprovalOutcome,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub approved_by: String,
}

/// Out-of-band message delivered to a running execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    TaskCompleted(TaskCompleted),
    ApprovalSubmitted(ApprovalSubmitted),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::TaskCompleted(_) => SignalKind::TaskCompleted,
            Signal::ApprovalSubmitted(_) => SignalKind::ApprovalSubmitted,
        }
    }

    /// Build a signal from its kind and a JSON payload without the `kind` tag
    pub fn from_payload(kind: SignalKind, payload: JsonValue) -> Result<Self, serde_json::Error> {
        match kind {
            SignalKind::TaskCompleted => serde_json::from_value(payload).map(Signal::TaskCompleted),
            SignalKind::ApprovalSubmitted => {
                serde_json::from_value(payload).map(Signal::ApprovalSubmitted)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    TaskCompleted,
    ApprovalSubmitted,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::TaskCompleted => "task_completed",
            SignalKind::ApprovalSubmitted => "approval_submitted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "task_completed" | "taskCompleted" => Some(SignalKind::TaskCompleted),
            "approval_submitted" | "approvalSubmitted" => Some(SignalKind::ApprovalSubmitted),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ===================== Run Input / Output ===================== */

/// Construction parameters for one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    pub execution_id: String,
    pub org_id: String,
    pub contact_id: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub contact_first_name: String,
    #[serde(default)]
    pub contact_last_name: String,
    #[serde(default)]
    pub contact_phone: String,
    pub definition_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub execution_id: String,
    pub final_status: String,
    pub variables: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_definition_with_all_step_kinds() {
        let source = json!({
            "steps": [
                {"id": "start", "type": "trigger", "label": "Start"},
                {"id": "assign", "type": "assign_task", "phaseId": "intake",
                 "config": {"title": "Review {{contact.firstName}}", "dueDays": 3, "assignedRole": "reviewer"}},
                {"id": "wait", "type": "wait_for_task", "config": {"timeoutDays": 7}},
                {"id": "approve", "type": "wait_for_approval", "config": {}},
                {"id": "status", "type": "update_status", "config": {"status": "approved"}},
                {"id": "branch", "type": "condition",
                 "config": {"field": "{{approve.outcome}}", "branches": [{"value": "approved", "gotoStepId": "email"}], "defaultStepId": "status"}},
                {"id": "email", "type": "send_email", "config": {"to": "{{contact.email}}", "subject": "Hi", "body": "Welcome"}},
                {"id": "pause", "type": "delay", "config": {"duration": 2, "unit": "hours"}},
                {"id": "contact", "type": "update_contact", "config": {"fields": [{"field": "score", "value": 10}]}},
                {"id": "task", "type": "update_task", "config": {"taskStepId": "assign", "fields": [{"field": "priority", "value": "high"}]}}
            ],
            "statuses": [{"id": "draft", "label": "Draft", "order": 0}]
        })
        .to_string();

        let def = WorkflowDefinition::from_json(&source).unwrap();
        assert_eq!(def.steps.len(), 10);
        assert_eq!(def.steps[1].phase_id.as_deref(), Some("intake"));

        match &def.steps[1].kind {
            StepKind::AssignTask(c) => {
                assert_eq!(c.due_days, Some(3));
                assert_eq!(c.priority, TaskPriority::Medium);
                assert_eq!(c.task_type, "general");
            }
            other => panic!("Expected AssignTask, got {:?}", other),
        }

        // Numeric field values are stringified
        match &def.steps[8].kind {
            StepKind::UpdateContact(c) => assert_eq!(c.fields[0].value, "10"),
            other => panic!("Expected UpdateContact, got {:?}", other),
        }
        assert_eq!(def.statuses.lowest().map(|s| s.id.as_str()), Some("draft"));
    }

    #[test]
    fn test_unknown_step_type_rejected_at_load() {
        let source = r#"{"steps": [{"id": "a", "type": "launch_rocket", "config": {}}]}"#;
        let err = WorkflowDefinition::from_json(source).unwrap_err();
        assert!(matches!(err, DefinitionError::Parse(_)));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let def = WorkflowDefinition::new(
            vec![Step::new("a", StepKind::Trigger), Step::new("a", StepKind::Trigger)],
            StatusSchema::default(),
        );
        assert_eq!(
            def.validate(),
            Err(DefinitionError::DuplicateStepId("a".to_string()))
        );
    }

    #[test]
    fn test_status_schema_uniqueness() {
        let def = WorkflowDefinition::new(
            vec![],
            StatusSchema::new(vec![
                StatusEntry { id: "draft".into(), label: String::new(), order: 0 },
                StatusEntry { id: "done".into(), label: String::new(), order: 0 },
            ]),
        );
        assert_eq!(def.validate(), Err(DefinitionError::DuplicateStatusOrder(0)));
    }

    #[test]
    fn test_step_serialization_keeps_wire_shape() {
        let step = Step::new(
            "s1",
            StepKind::UpdateStatus(UpdateStatusConfig { status: "approved".into() }),
        )
        .with_phase("review");

        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "update_status");
        assert_eq!(value["phaseId"], "review");
        assert_eq!(value["config"]["status"], "approved");

        let back: Step = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = WorkflowDefinition::new(vec![Step::new("a", StepKind::Trigger)], StatusSchema::default());
        let b = WorkflowDefinition::new(vec![Step::new("b", StepKind::Trigger)], StatusSchema::default());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_toml_definition() {
        let source = r#"
            [[steps]]
            id = "start"
            type = "trigger"

            [[steps]]
            id = "pause"
            type = "delay"
            config = { duration = 1, unit = "day" }
        "#;
        let def = WorkflowDefinition::from_toml(source).unwrap();
        match &def.steps[1].kind {
            StepKind::Delay(c) => assert_eq!(c.as_duration(), Some(chrono::Duration::days(1))),
            other => panic!("Expected Delay, got {:?}", other),
        }
    }

    #[test]
    fn test_signal_wire_format() {
        let signal: Signal = serde_json::from_value(json!({
            "kind": "approval_submitted",
            "outcome": "rejected",
            "approvedBy": "u-1"
        }))
        .unwrap();
        assert_eq!(signal.kind(), SignalKind::ApprovalSubmitted);

        let from_payload =
            Signal::from_payload(SignalKind::TaskCompleted, json!({"taskId": "t-1"})).unwrap();
        assert_eq!(
            from_payload,
            Signal::TaskCompleted(TaskCompleted {
                task_id: Some("t-1".into()),
                completed_by: None
            })
        );
    }
}
