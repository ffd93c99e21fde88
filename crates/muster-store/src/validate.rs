//! Write-time checks shared by both backends.

use muster_types::{Definition, Result, ServiceClassDefinition, check_class_graph};

/// Validate `definition` on its own and, for service classes, against the
/// classes already stored in the same scope.
pub(crate) fn validate_for_write(definition: &Definition, classes: &[ServiceClassDefinition]) -> Result<()> {
    definition.validate()?;
    if let Definition::ServiceClass(class) = definition {
        check_class_graph(class, classes)?;
    }
    Ok(())
}
