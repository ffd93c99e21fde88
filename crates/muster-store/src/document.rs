//! Definition documents on disk.
//!
//! A document holds exactly one definition under a top-level `serviceclass`
//! or `workflow` table, in TOML or YAML:
//!
//! ```toml
//! [workflow]
//! name = "deploy"
//!
//! [[workflow.steps]]
//! id = "create"
//! tool = "x_create"
//! store = true
//! args = { name = "{{ .args.name }}" }
//! ```

use std::path::Path;

use muster_types::{Definition, ServiceClassDefinition, WorkflowDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Surface syntax of a definition document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Yaml,
}

impl DocumentFormat {
    /// Format implied by a file extension; `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Yaml => "yaml",
        }
    }
}

/// On-disk wrapper: one of the two tables must be present.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DefinitionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    serviceclass: Option<ServiceClassDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow: Option<WorkflowDefinition>,
}

/// Parse document text. `path` is only used in error messages.
pub fn parse_document(text: &str, format: DocumentFormat, path: &Path) -> Result<Definition> {
    let doc: DefinitionDocument = match format {
        DocumentFormat::Toml => toml::from_str(text).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            message: format!("TOML parse error: {}", e),
        })?,
        DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| StoreError::Parse {
            path: path.to_path_buf(),
            message: format!("YAML parse error: {}", e),
        })?,
    };

    match (doc.serviceclass, doc.workflow) {
        (Some(c), None) => Ok(Definition::ServiceClass(c)),
        (None, Some(w)) => Ok(Definition::Workflow(w)),
        (Some(_), Some(_)) => Err(StoreError::Parse {
            path: path.to_path_buf(),
            message: "document must define either [serviceclass] or [workflow], not both".into(),
        }),
        (None, None) => Err(StoreError::Parse {
            path: path.to_path_buf(),
            message: "document defines neither [serviceclass] nor [workflow]".into(),
        }),
    }
}

/// Render a definition as document text.
pub fn render_document(definition: &Definition, format: DocumentFormat) -> Result<String> {
    let doc = match definition {
        Definition::ServiceClass(c) => DefinitionDocument {
            serviceclass: Some(c.clone()),
            workflow: None,
        },
        Definition::Workflow(w) => DefinitionDocument {
            serviceclass: None,
            workflow: Some(w.clone()),
        },
    };
    match format {
        DocumentFormat::Toml => {
            toml::to_string_pretty(&doc).map_err(|e| StoreError::Serialize(format!("{}: {}", definition.name(), e)))
        }
        DocumentFormat::Yaml => {
            serde_yaml::to_string(&doc).map_err(|e| StoreError::Serialize(format!("{}: {}", definition.name(), e)))
        }
    }
}

/// Read and parse a definition file, without validating it.
pub fn read_definition_file(path: &Path) -> Result<Definition> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| StoreError::Parse {
        path: path.to_path_buf(),
        message: "expected a .toml, .yaml or .yml file".into(),
    })?;
    let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    parse_document(&text, format, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_types::DefinitionKind;

    const CLASS_TOML: &str = r#"
[serviceclass]
name = "port-forward"
description = "Forward a local port"

[serviceclass.argSchema.port]
type = "integer"
required = true

[serviceclass.serviceConfig]
dependencies = ["kube-auth"]

[serviceclass.serviceConfig.lifecycleTools.start]
tool = "x_pf_start"
args = { port = "{{ .args.port }}" }
outputs = { "session.id" = "sessionId" }

[serviceclass.serviceConfig.lifecycleTools.stop]
tool = "x_pf_stop"
args = { session = "{{ .sessionId }}" }

[serviceclass.serviceConfig.lifecycleTools.healthCheck]
tool = "x_pf_status"
expect = { jsonPath = { state = "up" } }

[serviceclass.serviceConfig.healthCheckPolicy]
enabled = true
interval = "10s"
failureThreshold = 2
"#;

    #[test]
    fn test_parse_service_class_toml() {
        let def = parse_document(CLASS_TOML, DocumentFormat::Toml, Path::new("pf.toml")).unwrap();
        assert_eq!(def.kind(), DefinitionKind::ServiceClass);
        let Definition::ServiceClass(c) = def else { panic!("expected a class") };
        assert_eq!(c.dependencies(), ["kube-auth".to_string()]);
        let hc = c.tools().health_check.as_ref().unwrap();
        assert_eq!(hc.call.tool, "x_pf_status");
        assert!(hc.expect.as_ref().unwrap().field_checks.contains_key("state"));
        assert_eq!(c.service_config.health_check_policy.failure_threshold, Some(2));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_parse_workflow_yaml() {
        let yaml = r#"
workflow:
  name: deploy
  argSchema:
    name:
      type: string
      required: true
  steps:
    - id: create
      tool: x_create
      store: true
      args:
        name: "{{ .args.name }}"
    - id: verify
      tool: x_status
      allowFailure: true
      condition:
        fromStep: create
        expect:
          success: true
"#;
        let def = parse_document(yaml, DocumentFormat::Yaml, Path::new("deploy.yaml")).unwrap();
        let Definition::Workflow(w) = def else { panic!("expected a workflow") };
        assert_eq!(w.steps.len(), 2);
        assert!(w.steps[1].allow_failure);
        assert_eq!(
            w.steps[1].condition.as_ref().unwrap().from_step.as_deref(),
            Some("create")
        );
        assert!(w.validate().is_ok());
    }

    #[test]
    fn test_document_needs_exactly_one_table() {
        let err = parse_document("[other]\nx = 1\n", DocumentFormat::Toml, Path::new("x.toml")).unwrap_err();
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn test_render_then_parse_keeps_definition() {
        let def = parse_document(CLASS_TOML, DocumentFormat::Toml, Path::new("pf.toml")).unwrap();
        let text = render_document(&def, DocumentFormat::Toml).unwrap();
        let again = parse_document(&text, DocumentFormat::Toml, Path::new("pf.toml")).unwrap();
        assert_eq!(def, again);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.yml")), Some(DocumentFormat::Yaml));
        assert_eq!(DocumentFormat::from_path(Path::new("a.json")), None);
    }
}
