//! Dependency graph checks across the full service class set.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::definition::{DefinitionKind, ServiceClassDefinition};
use crate::error::{MusterError, Result};

/// Check that adding (or replacing) `candidate` in `existing` keeps the
/// dependency graph acyclic.
///
/// Dependencies on classes that do not exist yet are allowed; they simply
/// leave the dependent class unavailable until the missing class is created.
pub fn check_class_graph(candidate: &ServiceClassDefinition, existing: &[ServiceClassDefinition]) -> Result<()> {
    let mut graph: BTreeMap<&str, &[String]> = existing
        .iter()
        .map(|c| (c.name.as_str(), c.dependencies()))
        .collect();
    graph.insert(candidate.name.as_str(), candidate.dependencies());

    if let Some(cycle) = find_cycle(&graph) {
        return Err(MusterError::invalid(
            DefinitionKind::ServiceClass,
            &candidate.name,
            format!("dependency cycle detected: {}", cycle.join(" -> ")),
        ));
    }
    Ok(())
}

/// Kahn's algorithm over the known classes; returns the classes left on a
/// cycle (sorted) when the graph is not a DAG.
fn find_cycle(graph: &BTreeMap<&str, &[String]>) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = graph.keys().map(|k| (*k, 0)).collect();
    // dependency -> dependents
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, deps) in graph {
        for dep in deps.iter() {
            if !graph.contains_key(dep.as_str()) {
                continue;
            }
            adj.entry(dep.as_str()).or_default().push(*name);
            *in_degree.entry(*name).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| *k)
        .collect();
    let mut visited = 0;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        if let Some(dependents) = adj.get(node) {
            for d in dependents {
                if let Some(deg) = in_degree.get_mut(d) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(*d);
                    }
                }
            }
        }
    }

    if visited == graph.len() {
        return None;
    }
    let mut stuck: Vec<String> = in_degree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(k, _)| k.to_string())
        .collect();
    stuck.sort();
    Some(stuck)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ToolCall;

    fn class(name: &str, deps: &[&str]) -> ServiceClassDefinition {
        let mut c = ServiceClassDefinition::new(
            name,
            ToolCall::new(format!("{}_start", name)),
            ToolCall::new(format!("{}_stop", name)),
        );
        c.service_config.dependencies = deps.iter().map(|d| d.to_string()).collect();
        c
    }

    #[test]
    fn test_chain_is_fine() {
        let existing = vec![class("a", &[]), class("b", &["a"])];
        assert!(check_class_graph(&class("c", &["b"]), &existing).is_ok());
    }

    #[test]
    fn test_missing_dependency_allowed() {
        assert!(check_class_graph(&class("c", &["nope"]), &[]).is_ok());
    }

    #[test]
    fn test_cycle_rejected() {
        let existing = vec![class("a", &["c"]), class("b", &["a"])];
        let err = check_class_graph(&class("c", &["b"]), &existing).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dependency cycle detected"));
        assert!(msg.contains("a -> b -> c"));
    }

    #[test]
    fn test_update_replaces_existing_entry() {
        // b currently depends on a; updating a to depend on b closes a cycle
        let existing = vec![class("a", &[]), class("b", &["a"])];
        assert!(check_class_graph(&class("a", &["b"]), &existing).is_err());
        // updating b to drop its dependency is fine
        assert!(check_class_graph(&class("b", &[]), &existing).is_ok());
    }
}
