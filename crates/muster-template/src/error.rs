//! Error types for template parsing and rendering.

use muster_types::MusterError;
use thiserror::Error;

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Errors that can occur while parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    /// The template text is malformed (unbalanced `if`/`end`, empty expression).
    #[error("Template '{template}': {message}")]
    Parse { template: String, message: String },

    /// A reference names a key that is not in the context.
    #[error("Template '{{{{{path}}}}}': unknown context key '{key}'")]
    UnknownKey { path: String, key: String },

    /// A reference walks into a field or index that does not exist.
    #[error("Template '{{{{{path}}}}}': cannot resolve segment '{segment}' in path")]
    UnresolvedSegment { path: String, segment: String },
}

impl TemplateError {
    pub(crate) fn parse(template: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            template: template.to_string(),
            message: message.into(),
        }
    }

    /// Attach the subject (instance or workflow) the template belonged to.
    pub fn for_subject(self, subject: impl Into<String>) -> MusterError {
        MusterError::TemplateResolutionFailed {
            subject: subject.into(),
            message: self.to_string(),
        }
    }
}

impl From<TemplateError> for MusterError {
    fn from(err: TemplateError) -> Self {
        err.for_subject("template")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_display() {
        let err = TemplateError::UnknownKey {
            path: ".args.name".into(),
            key: "args".into(),
        };
        assert_eq!(
            err.to_string(),
            "Template '{{.args.name}}': unknown context key 'args'"
        );
    }

    #[test]
    fn test_subject_attached() {
        let err = TemplateError::parse("{{if .x}}", "missing {{end}}").for_subject("deploy");
        let msg = err.to_string();
        assert!(msg.contains("'deploy'"));
        assert!(msg.contains("missing {{end}}"));
    }
}
