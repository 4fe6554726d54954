//! Workflow files: YAML parsing, validation, and filesystem discovery.
//!
//! A workflow file carries what a caller passes to `register_workflow`;
//! the id and registration time are assigned by the engine.
//!
//! ```yaml
//! name: invoice-flow
//! owner: "0xabc"
//! trigger:
//!   type: file_arrival
//!   pattern: "*.pdf"
//! actions:
//!   - kind: transform
//!     params: { tool: watermark }
//!   - kind: notify
//!     params: { destination: X, message: "Processed {filename}" }
//! ```

use std::path::{Path, PathBuf};

use flowgate_types::workflow::{
    ActionSpec, DefinitionError, TriggerSpec, WorkflowDefinition, validate_definition,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowFileError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// The file parsed but describes an invalid workflow.
    #[error("invalid workflow: {0}")]
    Invalid(#[from] DefinitionError),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// WorkflowFile
// ---------------------------------------------------------------------------

/// On-disk form of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub trigger: TriggerSpec,
    pub actions: Vec<ActionSpec>,
}

impl WorkflowFile {
    /// Build a fresh definition (new id, registered now).
    pub fn to_definition(&self) -> WorkflowDefinition {
        WorkflowDefinition::new(
            self.name.clone(),
            self.owner.clone(),
            self.trigger.clone(),
            self.actions.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a workflow file.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowFile, WorkflowFileError> {
    let file: WorkflowFile =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowFileError::Parse(e.to_string()))?;
    validate_definition(&file.to_definition())?;
    Ok(file)
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

pub fn load_workflow_file(path: &Path) -> Result<WorkflowFile, WorkflowFileError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Find every `.yaml`/`.yml` workflow under `base_dir`, sorted by path.
///
/// Files that fail to parse or validate are logged and skipped. A missing
/// directory yields no workflows.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowFile)>, WorkflowFileError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowFile)>,
) -> Result<(), WorkflowFileError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }
        match load_workflow_file(&path) {
            Ok(file) => results.push((path, file)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping workflow file"),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::workflow::{ActionKind, ActionParams};

    const INVOICE_FLOW: &str = r#"
name: invoice-flow
owner: "0xabc"
trigger:
  type: file_arrival
  pattern: "*.pdf"
actions:
  - kind: transform
    params:
      tool: watermark
  - kind: notify
    params:
      destination: X
      message: "Processed {filename}"
      attach: true
  - kind: move
    params:
      destination: /archive
"#;

    fn minimal(name: &str) -> WorkflowFile {
        WorkflowFile {
            name: name.to_string(),
            owner: None,
            trigger: TriggerSpec::file_arrival("*.csv"),
            actions: vec![ActionSpec::new("delay", ActionParams::new().with("ms", 10))],
        }
    }

    fn minimal_yaml(name: &str) -> String {
        format!(
            "name: {name}\ntrigger: {{ type: file_arrival, pattern: '*.csv' }}\nactions:\n  - kind: delay\n    params: {{ ms: 10 }}\n"
        )
    }

    #[test]
    fn parses_full_workflow() {
        let file = parse_workflow_yaml(INVOICE_FLOW).unwrap();
        assert_eq!(file.name, "invoice-flow");
        assert_eq!(file.owner.as_deref(), Some("0xabc"));
        assert_eq!(file.trigger.pattern(), "*.pdf");
        assert_eq!(file.actions.len(), 3);
        assert_eq!(file.actions[0].kind, ActionKind::Transform);
        assert_eq!(file.actions[0].params.get_str("tool"), Some("watermark"));
        assert_eq!(file.actions[1].params.get_bool("attach"), Some(true));
        assert_eq!(file.actions[2].kind, ActionKind::Relocate);
    }

    #[test]
    fn rejects_workflow_without_actions() {
        let yaml = "name: empty\ntrigger: { type: file_arrival, pattern: '*' }\nactions: []\n";
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            WorkflowFileError::Invalid(DefinitionError::NoActions(_))
        ));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = parse_workflow_yaml("name: [unclosed").unwrap_err();
        assert!(matches!(err, WorkflowFileError::Parse(_)));
    }

    #[test]
    fn to_definition_assigns_fresh_ids() {
        let file = minimal("csv-import");
        let a = file.to_definition();
        let b = file.to_definition();
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, file.name);
        assert_eq!(a.actions, file.actions);
    }

    #[test]
    fn discover_finds_nested_workflows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.yaml"), minimal_yaml("wf-b")).unwrap();
        std::fs::write(dir.path().join("nested/a.yml"), minimal_yaml("wf-a")).unwrap();
        std::fs::write(dir.path().join("junk.yaml"), "key: value").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let found = discover_workflows(dir.path()).unwrap();
        let names: Vec<&str> = found.iter().map(|(_, f)| f.name.as_str()).collect();
        assert_eq!(names, vec!["wf-b", "wf-a"]);
    }

    #[test]
    fn discover_missing_dir_is_empty() {
        let found = discover_workflows(Path::new("/nonexistent/flowgate/workflows")).unwrap();
        assert!(found.is_empty());
    }
}
