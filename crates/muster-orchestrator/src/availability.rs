//! Tool-availability gating for service classes.

use std::collections::{HashMap, HashSet};

use muster_types::{ServiceClassDefinition, is_core_tool};
use serde::Serialize;

/// Availability of one class against the current tool snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassAvailability {
    pub name: String,
    pub available: bool,
    /// Every tool the class itself can invoke.
    pub required_tools: Vec<String>,
    /// The subset of `required_tools` that is not resolvable right now.
    pub missing_tools: Vec<String>,
    /// First unavailable class on the dependency chain, when it is not this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmet_dependency: Option<String>,
}

/// The first unavailable link found while walking from a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnmetLink {
    pub class: String,
    /// Empty when the class definition itself is missing.
    pub missing_tools: Vec<String>,
}

/// Tools of `class` that are neither core tools nor in `tools`.
pub(crate) fn missing_tools(class: &ServiceClassDefinition, tools: &HashSet<String>) -> Vec<String> {
    class
        .required_tools()
        .into_iter()
        .filter(|t| !is_core_tool(t) && !tools.contains(t))
        .collect()
}

/// Walk `root` and its dependencies depth-first in declaration order and
/// return the first class that is missing or lacks a tool.
///
/// A class whose dependency leads back onto the current path is unmet: it can
/// never start, whichever file introduced the loop.
pub(crate) fn find_unmet(
    root: &ServiceClassDefinition,
    classes: &HashMap<String, ServiceClassDefinition>,
    tools: &HashSet<String>,
) -> Option<UnmetLink> {
    let mut path = Vec::new();
    let mut cleared = HashSet::new();
    walk(root, classes, tools, &mut path, &mut cleared)
}

fn walk<'a>(
    class: &'a ServiceClassDefinition,
    classes: &'a HashMap<String, ServiceClassDefinition>,
    tools: &HashSet<String>,
    path: &mut Vec<&'a str>,
    cleared: &mut HashSet<&'a str>,
) -> Option<UnmetLink> {
    let missing = missing_tools(class, tools);
    if !missing.is_empty() {
        return Some(UnmetLink {
            class: class.name.clone(),
            missing_tools: missing,
        });
    }

    path.push(class.name.as_str());
    for dep in class.dependencies() {
        if path.contains(&dep.as_str()) {
            return Some(UnmetLink {
                class: class.name.clone(),
                missing_tools: Vec::new(),
            });
        }
        if cleared.contains(dep.as_str()) {
            continue;
        }
        let Some(next) = classes.get(dep) else {
            return Some(UnmetLink {
                class: dep.clone(),
                missing_tools: Vec::new(),
            });
        };
        if let Some(unmet) = walk(next, classes, tools, path, cleared) {
            return Some(unmet);
        }
    }
    path.pop();
    cleared.insert(class.name.as_str());
    None
}

/// Full availability record for `class`.
pub(crate) fn describe(
    class: &ServiceClassDefinition,
    classes: &HashMap<String, ServiceClassDefinition>,
    tools: &HashSet<String>,
) -> ClassAvailability {
    let unmet = find_unmet(class, classes, tools);
    ClassAvailability {
        name: class.name.clone(),
        available: unmet.is_none(),
        required_tools: class.required_tools(),
        missing_tools: missing_tools(class, tools),
        unmet_dependency: unmet.map(|u| u.class).filter(|c| *c != class.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_types::ToolCall;

    fn class(name: &str, deps: &[&str]) -> ServiceClassDefinition {
        let mut c = ServiceClassDefinition::new(
            name,
            ToolCall::new(format!("x_{name}_start")),
            ToolCall::new(format!("x_{name}_stop")),
        );
        c.service_config.dependencies = deps.iter().map(|d| d.to_string()).collect();
        c
    }

    fn index(classes: &[ServiceClassDefinition]) -> HashMap<String, ServiceClassDefinition> {
        classes.iter().map(|c| (c.name.clone(), c.clone())).collect()
    }

    fn tools(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_available_when_chain_resolves() {
        let classes = index(&[class("api", &["db"]), class("db", &[])]);
        let t = tools(&["x_api_start", "x_api_stop", "x_db_start", "x_db_stop"]);
        assert_eq!(find_unmet(&classes["api"], &classes, &t), None);
    }

    #[test]
    fn test_dependency_missing_stop_tool() {
        let classes = index(&[class("api", &["db"]), class("db", &[])]);
        let t = tools(&["x_api_start", "x_api_stop", "x_db_start"]);
        let unmet = find_unmet(&classes["api"], &classes, &t).unwrap();
        assert_eq!(unmet.class, "db");
        assert_eq!(unmet.missing_tools, vec!["x_db_stop".to_string()]);

        let report = describe(&classes["api"], &classes, &t);
        assert!(!report.available);
        assert!(report.missing_tools.is_empty());
        assert_eq!(report.unmet_dependency.as_deref(), Some("db"));
    }

    #[test]
    fn test_transitive_and_missing_definition() {
        let classes = index(&[class("api", &["cache"]), class("cache", &["kv"])]);
        let t = tools(&["x_api_start", "x_api_stop", "x_cache_start", "x_cache_stop"]);
        let unmet = find_unmet(&classes["api"], &classes, &t).unwrap();
        assert_eq!(unmet.class, "kv");
        assert!(unmet.missing_tools.is_empty());
    }

    #[test]
    fn test_core_tools_always_resolvable() {
        let c = ServiceClassDefinition::new("local", ToolCall::new("core_noop"), ToolCall::new("core_noop"));
        assert!(find_unmet(&c, &HashMap::new(), &HashSet::new()).is_none());
    }

    #[test]
    fn test_cycle_in_loaded_definitions_is_unmet() {
        let classes = index(&[class("api", &["a"]), class("a", &["b"]), class("b", &["a"])]);
        let t = tools(&["x_api_start", "x_api_stop", "x_a_start", "x_a_stop", "x_b_start", "x_b_stop"]);
        let unmet = find_unmet(&classes["api"], &classes, &t).unwrap();
        assert_eq!(unmet.class, "b");
        assert!(unmet.missing_tools.is_empty());

        let report = describe(&classes["a"], &classes, &t);
        assert!(!report.available);
        assert_eq!(report.unmet_dependency.as_deref(), Some("b"));
    }

    #[test]
    fn test_shared_dependency_is_not_a_cycle() {
        let classes = index(&[
            class("api", &["cache", "db"]),
            class("cache", &["db"]),
            class("db", &[]),
        ]);
        let t = tools(&[
            "x_api_start", "x_api_stop", "x_cache_start", "x_cache_stop", "x_db_start", "x_db_stop",
        ]);
        assert_eq!(find_unmet(&classes["api"], &classes, &t), None);
    }
}
