//! Workflow domain types for Flowgate.
//!
//! A workflow is a registered (trigger, action-sequence) pair. Definitions are
//! immutable once registered; the engine hands them around behind an `Arc`.
//! This module also contains the per-run outcome types reported by the
//! pipeline executor.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A registered workflow: one trigger plus an ordered list of actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned at registration time.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Caller identity whose tier and quota gate this workflow's actions.
    /// `None` means the workflow runs ungated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// The single trigger that starts a run.
    pub trigger: TriggerSpec,
    /// Actions executed strictly in this order.
    pub actions: Vec<ActionSpec>,
    /// When the workflow was registered.
    pub registered_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Build a definition with a fresh id and registration timestamp.
    pub fn new(
        name: impl Into<String>,
        owner: Option<String>,
        trigger: TriggerSpec,
        actions: Vec<ActionSpec>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            owner,
            trigger,
            actions,
            registered_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger specification
// ---------------------------------------------------------------------------

/// How a workflow is started.
///
/// ```yaml
/// trigger:
///   type: file_arrival
///   pattern: "*.pdf"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// A new file matching `pattern` appeared under the watch root.
    FileArrival {
        /// Glob pattern matched against the file name.
        pattern: String,
        /// Optional sub-directory of the watch root to scope the watch to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdir: Option<String>,
    },
}

impl TriggerSpec {
    /// Shorthand for a file-arrival trigger on the watch root itself.
    pub fn file_arrival(pattern: impl Into<String>) -> Self {
        TriggerSpec::FileArrival {
            pattern: pattern.into(),
            subdir: None,
        }
    }

    /// The trigger kind as it appears in definitions and events.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerSpec::FileArrival { .. } => "file_arrival",
        }
    }

    /// The match pattern for this trigger.
    pub fn pattern(&self) -> &str {
        match self {
            TriggerSpec::FileArrival { pattern, .. } => pattern,
        }
    }
}

// ---------------------------------------------------------------------------
// Action specification
// ---------------------------------------------------------------------------

/// The kind of a pipeline action.
///
/// The five built-in kinds have engine-provided behavior; any other name is
/// resolved through the action registry at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Transform,
    Notify,
    Relocate,
    Delete,
    Delay,
    /// Registry-supplied kind.
    Custom(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Transform => "transform",
            ActionKind::Notify => "notify",
            ActionKind::Relocate => "relocate",
            ActionKind::Delete => "delete",
            ActionKind::Delay => "delay",
            ActionKind::Custom(name) => name,
        }
    }

    /// Whether the engine has a built-in behavior for this kind.
    pub fn is_builtin(&self) -> bool {
        !matches!(self, ActionKind::Custom(_))
    }

    /// Whether a successful action of this kind may replace the current resource.
    ///
    /// `notify`, `delete` and `delay` never do.
    pub fn produces_resource(&self) -> bool {
        matches!(
            self,
            ActionKind::Transform | ActionKind::Relocate | ActionKind::Custom(_)
        )
    }

    /// Whether this kind consumes quota and is checked by the access gate.
    ///
    /// `delay` performs no work and is never charged.
    pub fn is_gated(&self) -> bool {
        !matches!(self, ActionKind::Delay)
    }
}

impl From<&str> for ActionKind {
    fn from(s: &str) -> Self {
        match s {
            "transform" => ActionKind::Transform,
            "notify" => ActionKind::Notify,
            "relocate" | "move" => ActionKind::Relocate,
            "delete" => ActionKind::Delete,
            "delay" => ActionKind::Delay,
            other => ActionKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for ActionKind {
    fn from(s: String) -> Self {
        ActionKind::from(s.as_str())
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key/value parameter bag for an action.
///
/// Validated by the action implementation, never by the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionParams(pub Map<String, Value>);

impl ActionParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A non-empty string parameter.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// A boolean parameter; also accepts the strings "true"/"false".
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// An unsigned integer parameter; also accepts numeric strings.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// One step in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub kind: ActionKind,
    #[serde(default)]
    pub params: ActionParams,
}

impl ActionSpec {
    pub fn new(kind: impl Into<ActionKind>, params: ActionParams) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    /// The entitlement key checked by the access gate.
    ///
    /// For `transform` this is the concrete tool being applied, so tier
    /// entitlements are expressed per tool; every other kind uses its name.
    pub fn gate_key(&self) -> &str {
        match self.kind {
            ActionKind::Transform => self.params.get_str("tool").unwrap_or("transform"),
            _ => self.kind.as_str(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Errors raised when a workflow definition is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow name '{0}' contains invalid characters (only alphanumeric, '-' and '_' allowed)")]
    InvalidName(String),

    #[error("workflow '{0}' must have at least one action")]
    NoActions(String),

    #[error("workflow '{0}' has an empty trigger pattern")]
    EmptyPattern(String),

    #[error("workflow name '{0}' is already registered")]
    DuplicateName(String),
}

/// Check the structural constraints of a definition.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::EmptyName);
    }
    if !def
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DefinitionError::InvalidName(def.name.clone()));
    }
    if def.actions.is_empty() {
        return Err(DefinitionError::NoActions(def.name.clone()));
    }
    if def.trigger.pattern().trim().is_empty() {
        return Err(DefinitionError::EmptyPattern(def.name.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// The action at `action_index` (0-based) failed; later actions never ran.
    Failed {
        action_index: usize,
        action_kind: String,
        reason: String,
    },
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub trigger_resource: PathBuf,
    /// The current resource when the run ended.
    pub final_resource: PathBuf,
    /// Number of actions that were invoked and succeeded.
    pub actions_completed: usize,
    /// Number of actions skipped because their kind was not registered.
    pub actions_skipped: usize,
    pub status: RunStatus,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice_flow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "invoice-flow",
            Some("0xabc".to_string()),
            TriggerSpec::file_arrival("*.pdf"),
            vec![
                ActionSpec::new("transform", ActionParams::new().with("tool", "watermark")),
                ActionSpec::new(
                    "notify",
                    ActionParams::new()
                        .with("destination", "X")
                        .with("message", "Processed {filename}"),
                ),
            ],
        )
    }

    #[test]
    fn action_kind_parses_builtins_and_custom() {
        assert_eq!(ActionKind::from("transform"), ActionKind::Transform);
        assert_eq!(ActionKind::from("move"), ActionKind::Relocate);
        assert_eq!(
            ActionKind::from("pdf-merge"),
            ActionKind::Custom("pdf-merge".to_string())
        );
        assert!(!ActionKind::from("pdf-merge").is_builtin());
        assert!(!ActionKind::Delay.is_gated());
        assert!(ActionKind::Relocate.produces_resource());
        assert!(!ActionKind::Notify.produces_resource());
        assert!(ActionKind::Delete.is_gated());
    }

    #[test]
    fn action_spec_deserializes_from_yaml() {
        let yaml = r#"
kind: notify
params:
  destination: ops
  message: "Processed {filename}"
  attach: true
"#;
        let spec: ActionSpec = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(spec.kind, ActionKind::Notify);
        assert_eq!(spec.params.get_str("destination"), Some("ops"));
        assert_eq!(spec.params.get_bool("attach"), Some(true));
    }

    #[test]
    fn action_kind_serializes_as_plain_string() {
        let spec = ActionSpec::new("delay", ActionParams::new().with("ms", 50));
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["kind"], "delay");
        assert_eq!(value["params"]["ms"], 50);
    }

    #[test]
    fn params_accessors_handle_strings() {
        let params = ActionParams(
            json!({ "ms": "250", "attach": "true", "blank": "  " })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(params.get_u64("ms"), Some(250));
        assert_eq!(params.get_bool("attach"), Some(true));
        assert_eq!(params.get_str("blank"), None);
        assert_eq!(params.get_str("missing"), None);
    }

    #[test]
    fn gate_key_uses_tool_for_transform() {
        let def = invoice_flow();
        assert_eq!(def.actions[0].gate_key(), "watermark");
        assert_eq!(def.actions[1].gate_key(), "notify");
    }

    #[test]
    fn trigger_spec_yaml_shape() {
        let yaml = "type: file_arrival\npattern: \"*.pdf\"\n";
        let trigger: TriggerSpec = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(trigger, TriggerSpec::file_arrival("*.pdf"));
        assert_eq!(trigger.kind(), "file_arrival");
    }

    #[test]
    fn validate_accepts_well_formed_definition() {
        assert!(validate_definition(&invoice_flow()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_names_and_empty_actions() {
        let mut def = invoice_flow();
        def.name = "bad name!".to_string();
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::InvalidName(_))
        ));

        let mut def = invoice_flow();
        def.actions.clear();
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::NoActions(_))
        ));

        let mut def = invoice_flow();
        def.trigger = TriggerSpec::file_arrival(" ");
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::EmptyPattern(_))
        ));
    }

    #[test]
    fn free_tier_entitles_every_invoice_flow_action() {
        let free = &crate::tier::default_tier_policies()[0];
        let def = invoice_flow();
        for action in &def.actions {
            assert!(free.allows(action.gate_key()), "{} not entitled", action.gate_key());
        }
        let ocr = ActionSpec::new("transform", ActionParams::new().with("tool", "ocr"));
        assert!(!free.allows(ocr.gate_key()));
    }

    #[test]
    fn run_status_serializes_with_tag() {
        let status = RunStatus::Failed {
            action_index: 1,
            action_kind: "notify".to_string(),
            reason: "missing parameter 'message'".to_string(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["action_index"], 1);
    }
}
