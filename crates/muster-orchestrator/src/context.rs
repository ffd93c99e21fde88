//! Template context for lifecycle tool calls.

use muster_template::ExecutionContext;
use muster_types::ServiceInstance;
use serde_json::{Value, json};

/// Build the context lifecycle arguments are resolved against.
///
/// Creation args sit both at the root and under `args`; bound outputs sit
/// at the root and under `start`; identity is at the root and under `service`.
pub(crate) fn service_context(instance: &ServiceInstance) -> ExecutionContext {
    let mut ctx = ExecutionContext::from_map(instance.args.clone());
    ctx.insert("args", Value::Object(instance.args.clone()));
    ctx.extend(&instance.outputs);
    ctx.insert("start", Value::Object(instance.outputs.clone()));
    ctx.insert("name", Value::String(instance.name.clone()));
    ctx.insert("serviceClassName", Value::String(instance.service_class_name.clone()));
    ctx.insert("scope", Value::String(instance.scope.clone()));
    ctx.insert(
        "service",
        json!({
            "name": instance.name,
            "serviceClassName": instance.service_class_name,
            "outputs": instance.outputs,
        }),
    );
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_context_shape() {
        let mut args = Map::new();
        args.insert("port".into(), json!(8080));
        let mut inst = ServiceInstance::new("default", "pf-1", "port-forward", args);
        inst.outputs.insert("sessionId".into(), json!("s-1"));

        let ctx = service_context(&inst);
        assert_eq!(ctx.lookup("port"), Some(&json!(8080)));
        assert_eq!(ctx.lookup("args.port"), Some(&json!(8080)));
        assert_eq!(ctx.lookup("sessionId"), Some(&json!("s-1")));
        assert_eq!(ctx.lookup("start.sessionId"), Some(&json!("s-1")));
        assert_eq!(ctx.lookup("service.outputs.sessionId"), Some(&json!("s-1")));
        assert_eq!(ctx.lookup("name"), Some(&json!("pf-1")));
        assert_eq!(ctx.lookup("serviceClassName"), Some(&json!("port-forward")));
    }

    #[test]
    fn test_identity_wins_over_args() {
        let mut args = Map::new();
        args.insert("name".into(), json!("spoofed"));
        let inst = ServiceInstance::new("default", "real", "c", args);
        assert_eq!(service_context(&inst).lookup("name"), Some(&json!("real")));
    }
}
