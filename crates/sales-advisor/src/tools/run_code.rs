//! Chart Code Execution Tool
//!
//! Runs generated chart-script in the restricted sandbox and returns either
//! the produced chart object or the captured output.

use async_trait::async_trait;

use agent_core::{
    tool::{ParameterSchema, Tool, ToolCall, ToolResult, ToolSchema},
    Result as CoreResult,
};

use super::required_str;
use crate::error::AdvisorError;
use crate::sandbox;

/// Tool for executing chart-script in the sandbox
pub struct RunChartCodeTool;

impl RunChartCodeTool {
    pub const NAME: &'static str = "run_chart_code";
}

#[async_trait]
impl Tool for RunChartCodeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "Run chart-script code in a restricted environment, \
                          as produced by generate_visualization."
                .into(),
            parameters: vec![ParameterSchema {
                name: "code".into(),
                param_type: "string".into(),
                description: "The chart-script code to run".into(),
                required: true,
            }],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let code = required_str(call, "code")?.to_string();

        // The interpreter is synchronous; run it off the async workers so
        // the controller's per-tool timeout stays observable and a slow
        // script cannot stall other requests.
        let outcome = match tokio::task::spawn_blocking(move || sandbox::execute(&code)).await {
            Ok(result) => result,
            Err(e) => Err(AdvisorError::Sandbox(format!("execution task failed: {e}"))),
        };

        match outcome {
            Ok(output) => Ok(ToolResult::success(Self::NAME, output)),
            Err(e) => Ok(ToolResult::failure(
                Self::NAME,
                format!("Error executing code: {e}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::tool_call;

    #[tokio::test]
    async fn test_chart_code_returns_chart_object() {
        let code = "chart({\"chart_type\": \"bar\", \"title\": \"Volume\"})";
        let result = RunChartCodeTool
            .execute(&tool_call(
                RunChartCodeTool::NAME,
                serde_json::json!({"code": code}),
            ))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.starts_with("Chart created:"));
    }

    #[tokio::test]
    async fn test_runaway_script_is_labelled_error() {
        let result = RunChartCodeTool
            .execute(&tool_call(
                RunChartCodeTool::NAME,
                serde_json::json!({"code": "x = range(20000000)"}),
            ))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.output.starts_with("Error executing code:"));
        assert!(result.output.contains("operation limit exceeded"));
    }

    #[tokio::test]
    async fn test_bad_code_is_labelled_error_not_crash() {
        let result = RunChartCodeTool
            .execute(&tool_call(
                RunChartCodeTool::NAME,
                serde_json::json!({"code": "import os"}),
            ))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.output.starts_with("Error executing code:"));
    }
}
