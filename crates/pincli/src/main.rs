use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pincore::{ConnectionKind, Endpoint, ExecutionEvent, NodeEvent, NodeId, Value, EXEC_IN, EXEC_OUT};
use pinnodes::LOOP_CONTINUE;
use pinruntime::{ExecutionReport, FlowRuntime, Request, Response, RuntimeConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pinflow")]
#[command(about = "Pin-based flow graph runner", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    /// Show debug logs from the runtime
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Upper bound on nodes running at once
    #[arg(long, global = true)]
    max_parallel: Option<usize>,

    /// Timeout for nodes without their own
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a script of requests to the bus
    ///
    /// The script is a JSON array of requests. A request may carry an
    /// `"as": "<name>"` field; later requests refer to the id it produced
    /// with `"@<name>"`. Created flows and nodes are bound under their own
    /// names automatically.
    Run {
        /// Path to the script
        script: PathBuf,

        /// Print every response as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// List available node types
    Nodes,

    /// Build and run a small branching flow with a loop
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.settings.verbose);

    let config = load_config(&cli.settings)?;
    let runtime = FlowRuntime::with_registry(Arc::new(pinnodes::standard_registry()), config);

    match cli.command {
        Commands::Run { script, json } => run_script(&runtime, script, json).await?,
        Commands::Nodes => list_nodes(&runtime).await?,
        Commands::Demo => run_demo(&runtime).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(settings: &Settings) -> Result<RuntimeConfig> {
    let mut config = match &settings.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => RuntimeConfig::default(),
    };

    if let Some(max) = settings.max_parallel {
        if max == 0 {
            bail!("--max-parallel must be at least 1");
        }
        config.max_parallel_nodes = max;
    }
    if let Some(timeout) = settings.timeout_ms {
        config.default_node_timeout_ms = Some(timeout);
    }
    tracing::debug!(?config, "Runtime configuration loaded");
    Ok(config)
}

async fn run_script(runtime: &FlowRuntime, path: PathBuf, json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let steps: Vec<serde_json::Value> =
        serde_json::from_str(&raw).context("script must be a JSON array of requests")?;

    if !json {
        println!("🚀 Running {} requests from {}", steps.len(), path.display());
    }
    let printer = (!json).then(|| spawn_event_printer(runtime));

    let mut bindings: HashMap<String, String> = HashMap::new();
    let mut responses = Vec::new();

    for (index, mut step) in steps.into_iter().enumerate() {
        let alias = step
            .as_object_mut()
            .and_then(|obj| obj.remove("as"))
            .and_then(|v| v.as_str().map(str::to_string));
        substitute(&mut step, &bindings).with_context(|| format!("request #{}", index + 1))?;

        let flow_name = step.get("name").and_then(|v| v.as_str()).map(str::to_string);
        let request: Request = serde_json::from_value(step)
            .with_context(|| format!("request #{} is malformed", index + 1))?;
        let is_create_flow = matches!(request, Request::CreateFlow { .. });

        let response = runtime
            .handle_request(request)
            .await
            .with_context(|| format!("request #{} failed", index + 1))?;

        if is_create_flow {
            if let (Some(name), Some(id)) = (flow_name, primary_id(&response)) {
                bindings.insert(name, id);
            }
        }
        if let Response::NodeCreated { node_id, name, .. } = &response {
            bindings.insert(name.clone(), node_id.to_string());
        }
        if let (Some(alias), Some(id)) = (alias, primary_id(&response)) {
            bindings.insert(alias, id);
        }

        if json {
            responses.push(serde_json::to_value(&response)?);
        } else {
            print_response(&response);
        }
    }

    if let Some(printer) = printer {
        settle(printer).await;
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
    }
    Ok(())
}

/// Replace `"@name"` strings with the ids bound so far
fn substitute(value: &mut serde_json::Value, bindings: &HashMap<String, String>) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            if let Some(name) = s.strip_prefix('@') {
                match bindings.get(name) {
                    Some(id) => *s = id.clone(),
                    None => bail!("unknown reference @{}", name),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                substitute(item, bindings)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                substitute(item, bindings)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn primary_id(response: &Response) -> Option<String> {
    let id = match response {
        Response::FlowCreated { flow_id } | Response::FlowImported { flow_id } => flow_id.to_string(),
        Response::NodeCreated { node_id, .. } => node_id.to_string(),
        Response::ConnectionCreated { connection_id } => connection_id.to_string(),
        _ => return None,
    };
    Some(id)
}

fn print_response(response: &Response) {
    match response {
        Response::FlowCreated { flow_id } => println!("📁 Flow {}", flow_id),
        Response::NodeCreated { node_id, name, .. } => println!("  ➕ {} ({})", name, node_id),
        Response::ConnectionCreated { connection_id } => println!("  🔗 {}", connection_id),
        Response::Executed { report } => print_report(report),
        Response::Nodes { nodes } => {
            for node in nodes {
                println!("  • {} [{}]{}", node.name, node.node_type, if node.busy { " busy" } else { "" });
                for (name, value) in &node.values {
                    println!("      {} = {}", name, value.to_json());
                }
            }
        }
        Response::NodeTypes { types } => {
            for schema in types {
                println!("  • {} ({})", schema.node_type, schema.category);
            }
        }
        other => println!("  ✔ {}", serde_json::to_string(other).unwrap_or_default()),
    }
}

fn print_report(report: &ExecutionReport) {
    println!();
    println!("📊 Execution {} ({:?})", report.execution_id, report.status);
    println!("   Ran {} nodes in {}ms", report.order.len(), report.duration_ms);

    for node in &report.nodes {
        println!("   {} [{}] {:?}", node.name, node.node_type, node.state);
        for (port, value) in &node.outputs {
            println!("     {}: {}", port, value.to_json());
        }
    }
    for failure in &report.failures {
        println!("   ❌ {} ({}): {}", failure.node_name, failure.kind, failure.message);
    }
}

fn spawn_event_printer(runtime: &FlowRuntime) -> JoinHandle<()> {
    let mut events = runtime.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { flow_id, .. } => println!("▶️  Run started on {}", flow_id),
                ExecutionEvent::NodeStarted { node_id, node_type, .. } => {
                    println!("  ⚡ {} ({})", node_id, node_type)
                }
                ExecutionEvent::NodeCompleted { node_id, fired_port, duration_ms, .. } => println!(
                    "  ✅ {} in {}ms -> {}",
                    node_id,
                    duration_ms,
                    fired_port.as_deref().unwrap_or("-")
                ),
                ExecutionEvent::NodeFailed { node_id, error, .. } => println!("  ❌ {} failed: {}", node_id, error),
                ExecutionEvent::NodeSkipped { node_id, reason, .. } => println!("  ⏭  {} skipped: {}", node_id, reason),
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => println!("     ℹ️  [{}] {}", node_id, message),
                    NodeEvent::Warning { message } => println!("     ⚠️  [{}] {}", node_id, message),
                    NodeEvent::Data { port, value } => println!("     ~ [{}] {} = {}", node_id, port, value.to_json()),
                    _ => {}
                },
                ExecutionEvent::RunCompleted { status, duration_ms, .. } => {
                    println!("✨ Run finished {:?} after {}ms", status, duration_ms)
                }
            }
        }
    })
}

/// Give the printer a moment to drain buffered events
async fn settle(printer: JoinHandle<()>) {
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();
}

async fn list_nodes(runtime: &FlowRuntime) -> Result<()> {
    println!("📦 Available Node Types:");
    println!();

    let Response::NodeTypes { types } = runtime.handle_request(Request::ListNodeTypes).await? else {
        bail!("unexpected response to list_node_types");
    };
    for schema in types {
        println!("  • {} ({})", schema.node_type, schema.category);
        if !schema.description.is_empty() {
            println!("    {}", schema.description);
        }
        for parameter in &schema.parameters {
            println!(
                "      {:?} {}: {}{}",
                parameter.mode,
                parameter.name,
                parameter.describe_types(),
                if parameter.required { " (required)" } else { "" }
            );
        }
    }
    Ok(())
}

async fn run_demo(runtime: &FlowRuntime) -> Result<()> {
    let demo = Demo::new(runtime).await?;

    let start = demo.node("flow.start", "start").await?;
    let flag = demo.node("number.constant", "flag").await?;
    let check = demo.node("logic.if", "check").await?;
    let head = demo.node("flow.loop_start", "head").await?;
    let words = demo.node("text.stream_words", "words").await?;
    let tail = demo.node("flow.loop_end", "tail").await?;
    let done = demo.node("debug.log", "done").await?;
    let other = demo.node("debug.log", "other").await?;

    demo.set(flag, "value", 1.0).await?;
    demo.set(words, "text", "tick tock").await?;
    demo.set(tail, "max_iterations", 3.0).await?;
    demo.set(done, "label", "loop finished").await?;
    demo.set(other, "label", "condition was false").await?;
    demo.send(Request::PairLoop { start: head, end: tail }).await?;

    demo.data(flag, "number", check, "condition").await?;
    demo.data(tail, "passes", done, "value").await?;
    demo.then(start, EXEC_OUT, check).await?;
    demo.then(check, "then", head).await?;
    demo.then(check, "else", other).await?;
    demo.then(head, EXEC_OUT, words).await?;
    demo.then(words, EXEC_OUT, tail).await?;
    demo.then(tail, LOOP_CONTINUE, head).await?;
    demo.then(tail, EXEC_OUT, done).await?;

    let printer = spawn_event_printer(runtime);
    let response = demo.send(Request::RunFlow { flow: None }).await?;
    settle(printer).await;
    print_response(&response);
    Ok(())
}

/// Builds the demo flow through the request bus
struct Demo<'a> {
    runtime: &'a FlowRuntime,
}

impl<'a> Demo<'a> {
    async fn new(runtime: &'a FlowRuntime) -> Result<Demo<'a>> {
        let demo = Demo { runtime };
        let Response::FlowCreated { flow_id } = demo
            .send(Request::CreateFlow {
                name: "demo".to_string(),
                parent: None,
            })
            .await?
        else {
            bail!("unexpected response to create_flow");
        };
        demo.send(Request::PushContext { flow_id }).await?;
        Ok(demo)
    }

    async fn send(&self, request: Request) -> Result<Response> {
        Ok(self.runtime.handle_request(request).await?)
    }

    async fn node(&self, node_type: &str, name: &str) -> Result<NodeId> {
        let Response::NodeCreated { node_id, .. } = self
            .send(Request::CreateNode {
                flow: None,
                node_type: node_type.to_string(),
                name: Some(name.to_string()),
                timeout_ms: None,
            })
            .await?
        else {
            bail!("unexpected response to create_node");
        };
        Ok(node_id)
    }

    async fn set(&self, node_id: NodeId, parameter: &str, value: impl Into<Value>) -> Result<()> {
        self.send(Request::SetParameterValue {
            node_id,
            parameter: parameter.to_string(),
            value: value.into(),
        })
        .await?;
        Ok(())
    }

    async fn data(&self, from: NodeId, out: &str, to: NodeId, input: &str) -> Result<()> {
        self.send(Request::CreateConnection {
            kind: ConnectionKind::Data,
            from: Endpoint::new(from, out),
            to: Endpoint::new(to, input),
        })
        .await?;
        Ok(())
    }

    async fn then(&self, from: NodeId, port: &str, to: NodeId) -> Result<()> {
        self.send(Request::CreateConnection {
            kind: ConnectionKind::Control,
            from: Endpoint::new(from, port),
            to: Endpoint::new(to, EXEC_IN),
        })
        .await?;
        Ok(())
    }
}
