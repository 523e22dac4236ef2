//! Sales Analysis Tool
//!
//! One model call: answer a question about a data excerpt in prose.

use std::sync::Arc;

use async_trait::async_trait;

use agent_core::{
    provider::{GenerationOptions, LlmProvider},
    tool::{ParameterSchema, Tool, ToolCall, ToolResult, ToolSchema},
    Result as CoreResult, Turn,
};

use super::required_str;

/// Tool for extracting insights from retrieved sales data
pub struct AnalyzeSalesTool {
    provider: Arc<dyn LlmProvider>,
    generation: GenerationOptions,
}

impl AnalyzeSalesTool {
    pub const NAME: &'static str = "analyze_sales_data";

    pub fn new(provider: Arc<dyn LlmProvider>, generation: GenerationOptions) -> Self {
        Self {
            provider,
            generation,
        }
    }
}

#[async_trait]
impl Tool for AnalyzeSalesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "Analyze sales data to extract insights. Pass the data to analyze \
                          and the question to answer."
                .into(),
            parameters: vec![
                ParameterSchema {
                    name: "prompt".into(),
                    param_type: "string".into(),
                    description: "The question to answer about the data".into(),
                    required: true,
                },
                ParameterSchema {
                    name: "data".into(),
                    param_type: "string".into(),
                    description: "The data to analyze, as returned by lookup_sales_data".into(),
                    required: true,
                },
            ],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let prompt = required_str(call, "prompt")?;
        let data = required_str(call, "data")?;

        let formatted = format!(
            "Analyze the following data: {data}\n\
             Your job is to answer the following question: {prompt}"
        );

        match self
            .provider
            .complete(&[Turn::system(formatted)], &self.generation)
            .await
        {
            Ok(completion) if completion.content.trim().is_empty() => Ok(ToolResult::success(
                Self::NAME,
                "No analysis could be generated",
            )),
            Ok(completion) => Ok(ToolResult::success(Self::NAME, completion.content)),
            Err(e) => Ok(ToolResult::failure(
                Self::NAME,
                format!("Error analyzing data: {e}"),
            )),
        }
    }
}
