//! Sales Agent HTTP Server
//!
//! Axum-based server exposing the sales question-answering agent as a
//! one-shot endpoint and a server-sent-event stream.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{
    provider::GenerationOptions,
    reasoning::{Agent, AgentConfig},
    tool::ToolRegistry,
    LlmProvider,
};
use agent_runtime::OllamaProvider;
use sales_advisor::{
    AnalyzeSalesTool, Dataset, GenerateVisualizationTool, LookupSalesTool, RunChartCodeTool,
    SalesStore,
};

use crate::handlers::{health_check, invoke, invoke_streaming};
use crate::state::AppState;

const SYSTEM_PROMPT: &str = r#"You are a helpful data analyst for the store sales dataset.

Answer questions about sales, revenue, promotions, and product performance.
Use lookup_sales_data to fetch the data you need before answering, and
analyze_sales_data when a question calls for interpretation. For chart
requests, generate code with generate_visualization and run it with
run_chart_code.

When you need to use a tool, respond with a JSON block in this exact format:
```tool
{"tool": "tool_name", "arguments": {"arg1": "value1"}}
```

After receiving tool results, synthesize them into a helpful response.
Be concise and accurate."#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Initialize LLM provider
    let ollama = OllamaProvider::from_env();
    let endpoint = ollama.endpoint();
    let provider: Arc<dyn LlmProvider> = Arc::new(ollama);

    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to Ollama at {}", endpoint),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Ollama not available at {} - agent will fail", endpoint);
            tracing::warn!("  Make sure Ollama is running: ollama serve");
        }
    }

    // Load the dataset and materialize the sales table once; it is
    // read-only for the rest of the process lifetime.
    let dataset = Dataset::embedded()?;
    tracing::info!(rows = dataset.len(), "sales dataset loaded");

    let store = Arc::new(SalesStore::open(dataset)?);
    store.ensure_table()?;

    let generation = GenerationOptions {
        model: std::env::var("AGENT_MODEL").unwrap_or_else(|_| "llama3.2".into()),
        ..Default::default()
    };

    // Register the closed tool set
    let mut tools = ToolRegistry::new();
    tools.register(LookupSalesTool::new(
        provider.clone(),
        store.clone(),
        generation.clone(),
    ));
    tools.register(GenerateVisualizationTool::new(
        provider.clone(),
        generation.clone(),
    ));
    tools.register(RunChartCodeTool);
    tools.register(AnalyzeSalesTool::new(provider.clone(), generation.clone()));

    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    let config = AgentConfig {
        system_prompt: SYSTEM_PROMPT.into(),
        generation,
        ..Default::default()
    };
    let agent = Agent::new(provider, Arc::new(tools), config);

    let state = AppState { agent };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/invoke", post(invoke))
        .route("/invoke-streaming", post(invoke_streaming))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("sales agent server running on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  POST /invoke            - Answer a question");
    tracing::info!("  POST /invoke-streaming  - Answer a question over SSE");

    axum::serve(listener, app).await?;

    Ok(())
}
