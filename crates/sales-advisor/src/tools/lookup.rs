//! Sales Data Lookup Tool
//!
//! Query synthesis plus execution: turns a natural-language request into a
//! single SQL statement over the sales table, runs it, and returns the
//! result set as text. Any failure along the way (model, SQL, store) comes
//! back as a labelled error result for the model to react to.

use std::sync::Arc;

use async_trait::async_trait;

use agent_core::{
    provider::{GenerationOptions, LlmProvider},
    tool::{ParameterSchema, Tool, ToolCall, ToolResult, ToolSchema},
    Result as CoreResult, Turn,
};

use super::{required_str, strip_code_fences};
use crate::dataset::Dataset;
use crate::store::{SalesStore, SALES_TABLE};

/// Ask the model for a single SQL statement, no commentary
pub async fn generate_sql_query(
    provider: &dyn LlmProvider,
    generation: &GenerationOptions,
    prompt: &str,
    columns: &[&str],
    table_name: &str,
) -> CoreResult<String> {
    let formatted = format!(
        "Generate an SQL query based on a prompt. \
         Do not reply with anything besides the SQL query.\n\
         The prompt is: {prompt}\n\n\
         The available columns are: {columns}\n\
         The table name is: {table_name}",
        columns = columns.join(", "),
    );

    let completion = provider
        .complete(&[Turn::system(formatted)], generation)
        .await?;

    Ok(strip_code_fences(&completion.content))
}

/// Tool for looking up data from the store sales dataset
pub struct LookupSalesTool {
    provider: Arc<dyn LlmProvider>,
    store: Arc<SalesStore>,
    generation: GenerationOptions,
}

impl LookupSalesTool {
    pub const NAME: &'static str = "lookup_sales_data";

    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<SalesStore>,
        generation: GenerationOptions,
    ) -> Self {
        Self {
            provider,
            store,
            generation,
        }
    }

    async fn lookup(&self, prompt: &str) -> anyhow::Result<String> {
        self.store.ensure_table()?;

        let sql = generate_sql_query(
            self.provider.as_ref(),
            &self.generation,
            prompt,
            Dataset::columns(),
            SALES_TABLE,
        )
        .await?;
        tracing::debug!(%sql, "synthesized query");

        Ok(self.store.execute_query(&sql)?)
    }
}

#[async_trait]
impl Tool for LookupSalesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description:
                "Look up data from the store sales / price elasticity / promotions dataset. \
                 Describe the data you need in plain language."
                    .into(),
            parameters: vec![ParameterSchema {
                name: "prompt".into(),
                param_type: "string".into(),
                description: "What data to retrieve, in plain language".into(),
                required: true,
            }],
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let prompt = required_str(call, "prompt")?;

        match self.lookup(prompt).await {
            Ok(table) => Ok(ToolResult::success(Self::NAME, table)),
            Err(e) => Ok(ToolResult::failure(
                Self::NAME,
                format!("Error accessing data: {e}"),
            )),
        }
    }
}
