//! Tool calls bounded by a timeout and a cancellation token.

use std::time::Duration;

use muster_types::{MusterError, ToolInvoker, ToolResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A failed lifecycle tool call.
#[derive(Debug)]
pub(crate) struct CallFailure {
    pub error: MusterError,
    /// Counts toward infrastructure backoff: unreachable, missing or timed out.
    pub infrastructure: bool,
}

/// What a call is for, used in error messages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallSite<'a> {
    pub subject: &'a str,
    pub operation: &'a str,
    pub tool: &'a str,
    pub timeout: Duration,
}

/// Dispatch one tool call.
///
/// A result with `is_error` set is returned as `Ok`; the caller decides what
/// a tool-reported failure means.
pub(crate) async fn call_tool(
    invoker: &dyn ToolInvoker,
    site: CallSite<'_>,
    args: Value,
    cancel: &CancellationToken,
) -> Result<ToolResult, CallFailure> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallFailure {
            error: MusterError::cancelled(site.subject, site.operation),
            infrastructure: false,
        }),
        outcome = tokio::time::timeout(site.timeout, invoker.execute(site.tool, args)) => match outcome {
            Err(_) => Err(CallFailure {
                error: MusterError::ToolTimeout {
                    subject: site.subject.to_string(),
                    operation: site.operation.to_string(),
                    tool: site.tool.to_string(),
                    timeout: site.timeout,
                },
                infrastructure: true,
            }),
            Ok(Err(e)) => Err(CallFailure {
                infrastructure: e.is_infrastructure(),
                error: MusterError::ToolInvocationFailed {
                    subject: site.subject.to_string(),
                    operation: site.operation.to_string(),
                    tool: site.tool.to_string(),
                    message: e.to_string(),
                },
            }),
            Ok(Ok(result)) => Ok(result),
        },
    }
}

/// Error for a result the tool itself flagged as failed.
pub(crate) fn reported_failure(site: CallSite<'_>, result: &ToolResult) -> MusterError {
    MusterError::ToolInvocationFailed {
        subject: site.subject.to_string(),
        operation: site.operation.to_string(),
        tool: site.tool.to_string(),
        message: result.text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_types::{StubInvoker, ToolError};
    use serde_json::json;

    fn site(timeout: Duration) -> CallSite<'static> {
        CallSite {
            subject: "db-1",
            operation: "start",
            tool: "x_start",
            timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_infrastructure() {
        let stub = StubInvoker::with_tools(["x_start"]);
        stub.set_delay("x_start", Duration::from_secs(10));
        let failure = call_tool(&stub, site(Duration::from_secs(1)), json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(failure.infrastructure);
        assert!(failure.error.is_timeout());
    }

    #[tokio::test]
    async fn test_tool_error_classification() {
        let stub = StubInvoker::with_tools(["x_start"]);
        stub.set_response(
            "x_start",
            Err(ToolError::Failed {
                tool: "x_start".into(),
                message: "quota".into(),
            }),
        );
        let failure = call_tool(&stub, site(Duration::from_secs(1)), json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!failure.infrastructure);
        assert!(failure.error.to_string().contains("quota"));

        stub.remove_tool("x_start");
        let failure = call_tool(&stub, site(Duration::from_secs(1)), json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(failure.infrastructure);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let stub = StubInvoker::with_tools(["x_start"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let failure = call_tool(&stub, site(Duration::from_secs(1)), json!({}), &cancel)
            .await
            .unwrap_err();
        assert!(failure.error.is_cancelled());
        assert_eq!(stub.call_count("x_start"), 0);
    }
}
