use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use harbor_mcp::bridge::{
    ParamType, ParameterDescriptor, ResourceDescriptor, ToolDescriptor, ToolOutput,
};
use harbor_mcp::registry::{InMemoryCatalog, InMemoryTemplateRegistry, WorkflowTemplate};
use harbor_mcp::{
    McpServerBuilder, ServerConfig, SseTransport, StdioTransport, Transport, TransportKind,
    WebSocketTransport,
};

#[derive(Parser)]
#[command(name = "harbor-mcp")]
#[command(about = "Harbor Model Context Protocol (MCP) server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server
    Serve {
        /// Transport type to use
        #[arg(short, long, default_value = "stdio")]
        transport: TransportChoice,

        /// Bind host for network transports
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port for network transports
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Validate a configuration file
    ValidateConfig,
}

#[derive(Clone, ValueEnum)]
enum TransportChoice {
    /// Standard input/output
    Stdio,
    /// Server-sent events over HTTP
    Sse,
    /// WebSocket
    Websocket,
}

impl From<TransportChoice> for TransportKind {
    fn from(choice: TransportChoice) -> Self {
        match choice {
            TransportChoice::Stdio => TransportKind::Stdio,
            TransportChoice::Sse => TransportKind::Sse,
            TransportChoice::Websocket => TransportKind::Websocket,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            transport,
            host,
            port,
        } => serve(cli.config.as_deref(), transport.into(), &host, port).await,
        Commands::ValidateConfig => validate_config(cli.config.as_deref()).await,
    }
}

async fn serve(
    config_path: Option<&str>,
    transport: TransportKind,
    host: &str,
    port: u16,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => ServerConfig::from_file(path).await?,
        None => ServerConfig::default(),
    };
    config.transport = transport;
    config.host = host.to_string();
    config.port = port;
    let config = config.with_env_overrides();

    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Stdio => Arc::new(StdioTransport::new()),
        TransportKind::Sse => Arc::new(SseTransport::new(&config.host, config.port)),
        TransportKind::Websocket => Arc::new(WebSocketTransport::new(&config.host, config.port)),
    };

    let server = McpServerBuilder::new(config)
        .with_transport(transport)
        .with_catalog(Arc::new(builtin_catalog().await))
        .with_templates(Arc::new(builtin_templates().await))
        .build()?;

    let runner = server.clone();
    let run_task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");
    server.shutdown().await?;
    run_task.abort();
    Ok(())
}

async fn validate_config(config_path: Option<&str>) -> Result<()> {
    let path = config_path.ok_or_else(|| anyhow::anyhow!("--config is required"))?;

    let config = ServerConfig::from_file(path).await?;
    tracing::info!("Configuration loaded");
    tracing::info!("  transport: {:?}", config.transport);
    tracing::info!("  bind: {}:{}", config.host, config.port);
    tracing::info!("  max sessions: {}", config.session.max_sessions);
    tracing::info!("  request timeout: {}ms", config.protocol.request_timeout_ms);
    println!("Configuration is valid");
    Ok(())
}

/// The demonstration catalog the standalone binary serves
async fn builtin_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();

    catalog
        .register_tool(
            ToolDescriptor {
                name: "echo".into(),
                description: "Echo the given text back".into(),
                parameters: vec![ParameterDescriptor::new("text", ParamType::String)
                    .required()
                    .with_description("Text to echo")],
                category: "utility".into(),
                version: "1.0".into(),
                execution: Default::default(),
            },
            |params, _invocation| async move {
                let text = params["text"].as_str().unwrap_or_default().to_string();
                Ok(ToolOutput::Text(text))
            },
        )
        .await;

    catalog
        .register_tool(
            ToolDescriptor {
                name: "time.now".into(),
                description: "Current server time in RFC 3339".into(),
                parameters: vec![],
                category: "utility".into(),
                version: "1.0".into(),
                execution: Default::default(),
            },
            |_params, _invocation| async move {
                Ok(ToolOutput::Json(serde_json::json!({
                    "now": chrono::Utc::now().to_rfc3339(),
                })))
            },
        )
        .await;

    catalog
        .register_resource(
            ResourceDescriptor {
                uri: "workspace://info/about".into(),
                name: "about".into(),
                description: Some("Server description".into()),
                mime_type: Some("text/plain".into()),
            },
            "Harbor MCP server".into(),
        )
        .await;

    catalog
}

async fn builtin_templates() -> InMemoryTemplateRegistry {
    let templates = InMemoryTemplateRegistry::new();
    templates
        .register(WorkflowTemplate {
            name: "echo-twice".into(),
            description: Some("Echo a value through two chained steps".into()),
            variables: vec!["text".into()],
            spec: serde_json::json!({
                "type": "sequential",
                "steps": [
                    {"tool": "echo", "params": {"text": "{{text}}"}},
                    {"tool": "echo", "params": {"text": "{{text}}"}}
                ]
            }),
        })
        .await;
    templates
}
