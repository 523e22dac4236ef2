//! Visualization Code Generation Tool
//!
//! Two sequential model calls: first derive a structured chart
//! configuration from the data and the stated goal, then generate
//! chart-script code for that configuration. The configuration must parse
//! strictly; a parse failure is reported as a labelled error result.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agent_core::{
    provider::{GenerationOptions, LlmProvider},
    tool::{ParameterSchema, Tool, ToolCall, ToolResult, ToolSchema},
    Result as CoreResult, Turn,
};

use super::{required_str, strip_code_fences};

/// Structured chart configuration derived by the model
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChartConfig {
    /// Type of chart to generate
    pub chart_type: String,
    /// Name of the x-axis column
    pub x_axis: String,
    /// Name of the y-axis column
    pub y_axis: String,
    /// Title of the chart
    pub title: String,
}

/// Tool that generates chart-script code for a visualization goal
pub struct GenerateVisualizationTool {
    provider: Arc<dyn LlmProvider>,
    generation: GenerationOptions,
}

impl GenerateVisualizationTool {
    pub const NAME: &'static str = "generate_visualization";

    pub fn new(provider: Arc<dyn LlmProvider>, generation: GenerationOptions) -> Self {
        Self {
            provider,
            generation,
        }
    }

    async fn ask(&self, prompt: String) -> CoreResult<String> {
        let completion = self
            .provider
            .complete(&[Turn::system(prompt)], &self.generation)
            .await?;
        Ok(completion.content)
    }

    async fn generate(&self, data: &str, goal: &str) -> anyhow::Result<String> {
        let config_prompt = format!(
            "Generate a chart configuration based on this data: {data}\n\
             The goal is to show: {goal}\n\
             Respond with only a JSON object with the keys \
             chart_type, x_axis, y_axis, and title."
        );

        let raw = self.ask(config_prompt).await?;
        let config: ChartConfig = serde_json::from_str(&strip_code_fences(&raw))
            .map_err(|e| anyhow::anyhow!("could not parse chart configuration: {e}"))?;

        let code_prompt = format!(
            "Write chart-script code to create a {chart_type} chart based on the \
             following configuration. Only return the code, no other text.\n\
             config: {config}\n\n\
             chart-script is line-oriented and supports variables, arithmetic, \
             lists, maps, and only these functions: print, len, range, sum, min, \
             max, abs, round, int, float, str, json, chart. Produce the chart by \
             calling chart() with a configuration map, for example:\n\
             chart({{\"chart_type\": \"bar\", \"x_axis\": \"store_number\", \
             \"y_axis\": \"total_sale_value\", \"title\": \"Sales by Store\"}})",
            chart_type = config.chart_type,
            config = serde_json::to_string(&config)?,
        );

        let code = self.ask(code_prompt).await?;
        Ok(strip_code_fences(&code))
    }
}

#[async_trait]
impl Tool for GenerateVisualizationTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description:
                "Generate chart-script code to visualize data. Pass the data to plot and \
                 the goal of the visualization; run the returned code with run_chart_code."
                    .into(),
            parameters: vec![
                ParameterSchema {
                    name: "data".into(),
                    param_type: "string".into(),
                    description: "The data to visualize, as returned by lookup_sales_data".into(),
                    required: true,
                },
                ParameterSchema {
                    name: "visualization_goal".into(),
                    param_type: "string".into(),
                    description: "What the chart should show".into(),
                    required: true,
                },
            ],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let data = required_str(call, "data")?;
        let goal = required_str(call, "visualization_goal")?;

        match self.generate(data, goal).await {
            Ok(code) => Ok(ToolResult::success(Self::NAME, code)),
            Err(e) => Ok(ToolResult::failure(
                Self::NAME,
                format!("Error generating visualization: {e}"),
            )),
        }
    }
}
