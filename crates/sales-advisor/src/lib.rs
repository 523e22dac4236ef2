//! # sales-advisor
//!
//! Sales-data question answering on top of `agent-core`: the embedded store
//! sales dataset, an in-memory SQL store, a restricted chart-script sandbox,
//! and the tool executors the controller loop can dispatch to.
//!
//! ## Tools
//!
//! - `lookup_sales_data` — natural language to SQL to a text result table
//! - `generate_visualization` — chart config + chart-script code generation
//! - `run_chart_code` — sandboxed execution of generated chart-script
//! - `analyze_sales_data` — prose insights over a data excerpt

pub mod dataset;
pub mod error;
pub mod sandbox;
pub mod store;
pub mod tools;

pub use dataset::{Dataset, SalesRecord};
pub use error::{AdvisorError, Result};
pub use store::{SalesStore, SALES_TABLE};
pub use tools::{AnalyzeSalesTool, ChartConfig, GenerateVisualizationTool, LookupSalesTool, RunChartCodeTool};
