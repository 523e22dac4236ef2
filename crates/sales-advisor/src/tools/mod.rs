//! Sales Tool Executors
//!
//! The four registered capabilities plus the internal query synthesis step.
//! Every executor converts its own failures into labelled failure results;
//! nothing in this module raises past the registry.

pub mod analysis;
pub mod lookup;
pub mod run_code;
pub mod visualization;

pub use analysis::AnalyzeSalesTool;
pub use lookup::LookupSalesTool;
pub use run_code::RunChartCodeTool;
pub use visualization::{ChartConfig, GenerateVisualizationTool};

use agent_core::error::{AgentError, Result};
use agent_core::tool::ToolCall;

/// Remove markdown code-fence markers from model output. Models wrap SQL,
/// JSON, and code in fences despite being told not to.
pub(crate) fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Fetch a required string argument from a tool call
pub(crate) fn required_str<'a>(call: &'a ToolCall, name: &str) -> Result<&'a str> {
    call.arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentError::ToolValidation(format!("parameter '{name}' must be a string")))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_sql_fences() {
        let text = "```sql\nSELECT SUM(total_sale_value) FROM sales\n```";
        assert_eq!(
            strip_code_fences(text),
            "SELECT SUM(total_sale_value) FROM sales"
        );
    }

    #[test]
    fn test_strip_unlabelled_fences() {
        assert_eq!(strip_code_fences("```\ncode here\n```"), "code here");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_code_fences("SELECT 1"), "SELECT 1");
    }
}
