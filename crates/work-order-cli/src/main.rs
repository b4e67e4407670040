//! Work Order CLI binary.
//!
//! Lists, validates, renders and runs work order step configurations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use work_order_engine::engine::build_select;
use work_order_engine::{
    format_query_output, CancelSource, Context, DmlPlan, EngineConfig, PostgresQueryExecutor,
    QueryOutput, RunRequest, RunResult, SqlBuilder, StepConfigStore, StepDetail,
    StepInterpreter, StepKind,
};

#[derive(Parser)]
#[command(name = "work-order")]
#[command(version, about = "Work Order Command Line Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Step configuration directory (overrides WORK_ORDER_STEPS_DIR)
    #[arg(long, global = true)]
    steps_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured work order types
    List,

    /// Validate one configuration, or all of them
    Validate {
        /// Work order type (all types when omitted)
        #[arg(value_name = "TYPE")]
        work_order_type: Option<String>,
    },

    /// Run a work order against the database and print the generated DML
    Run {
        #[arg(value_name = "TYPE")]
        work_order_type: String,

        /// Extracted entities as a JSON object
        #[arg(long, value_name = "JSON", alias = "payload")]
        entities: Option<String>,

        /// Single entity (repeatable), value parsed as JSON when possible
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,

        /// Step to start from
        #[arg(long)]
        start_step: Option<u32>,

        /// Iteration ceiling for this run
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Wall-clock budget in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Task identifier carried into the result
        #[arg(long)]
        task_id: Option<String>,

        /// Print the full result envelope as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the statement of one step without touching the database
    Render {
        #[arg(value_name = "TYPE")]
        work_order_type: String,

        /// Step number to render
        #[arg(long)]
        step: u32,

        /// Entities as a JSON object
        #[arg(long, value_name = "JSON", alias = "payload")]
        entities: Option<String>,

        /// Single entity (repeatable), value parsed as JSON when possible
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.steps_dir {
        config.steps_dir = dir;
    }

    init_tracing(config.json_logs());

    let store = StepConfigStore::from_config(&config);

    match cli.command {
        Commands::List => {
            let types = store.list_types().await?;
            if types.is_empty() {
                println!("No work order types in {}", store.dir().display());
            }
            for name in types {
                let description = match store.get(&name).await {
                    Ok(c) => c.description.clone().unwrap_or_default(),
                    Err(e) => format!("(invalid: {})", e),
                };
                println!("{:<32} {}", name, description);
            }
        }
        Commands::Validate { work_order_type } => {
            let results = match work_order_type {
                Some(name) => vec![(name.clone(), store.get(&name).await)],
                None => store.validate_all().await?,
            };

            let mut failed = 0;
            for (name, result) in &results {
                match result {
                    Ok(c) => println!(
                        "✓ {} ({} steps, {} generating DML)",
                        name,
                        c.len(),
                        c.dml_steps().count()
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("✗ {}: {}", name, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} configurations are invalid", failed, results.len());
            }
        }
        Commands::Run {
            work_order_type,
            entities,
            variables,
            start_step,
            max_iterations,
            timeout,
            task_id,
            json,
        } => {
            let step_config = store
                .get(&work_order_type)
                .await
                .with_context(|| format!("Failed to load work order type '{}'", work_order_type))?;

            let settings = config
                .postgres_settings()
                .context("WORK_ORDER_DATABASE_URL is not set")?;
            let executor = PostgresQueryExecutor::new(settings)?;

            let mut options = config.interpreter_options();
            if let Some(max) = max_iterations {
                options.max_iterations = max;
            }
            let interpreter = StepInterpreter::new(Arc::new(executor)).with_options(options);

            let mut request = RunRequest::new(build_entities(entities.as_deref(), &variables)?);
            if let Some(step) = start_step {
                request = request.with_start_step(step);
            }
            if let Some(id) = task_id {
                request = request.with_task_id(id);
            }

            let source = CancelSource::new();
            let token = source.token();
            let budget = timeout.map(Duration::from_secs).or(config.run_timeout());

            // Cancel on ctrl-c or when the wall-clock budget runs out
            let watchdog = tokio::spawn(async move {
                let deadline = async {
                    match budget {
                        Some(d) => tokio::time::sleep(d).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = deadline => tracing::warn!("Run timeout reached, cancelling"),
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() {
                            return;
                        }
                        tracing::info!("Interrupt received, cancelling");
                    }
                }
                source.cancel();
            });

            let result = interpreter
                .run_with_cancel(&step_config, request, token)
                .await;
            watchdog.abort();

            let plan = DmlPlan::from_run(&result, step_config.description.as_deref())?;

            if json {
                let output = serde_json::json!({ "result": result, "dml": plan });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_run(&result);
                if let Some(plan) = &plan {
                    println!();
                    println!("Generated DML (risk: {}):", plan.risk_level);
                    println!("{}", plan.sql);
                }
            }

            // 2 for aborted or cancelled runs, 1 for business failures
            if result.is_fatal() {
                std::process::exit(2);
            }
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Render {
            work_order_type,
            step,
            entities,
            variables,
        } => {
            let step_config = store
                .get(&work_order_type)
                .await
                .with_context(|| format!("Failed to load work order type '{}'", work_order_type))?;
            let declared = step_config
                .get(step)
                .with_context(|| format!("Step {} not found in '{}'", step, work_order_type))?;
            let ctx = Context::from_map(build_entities(entities.as_deref(), &variables)?);

            match &declared.kind {
                StepKind::Query(query) => println!("{}", build_select(query, &ctx)),
                StepKind::GenerateDml(spec) => {
                    let sql = SqlBuilder::new().build(step, spec, &ctx)?;
                    println!("{}", sql);
                    println!("-- risk: {}", spec.risk());
                }
                other => bail!("Step {} is {} and has no statement to render", step, other.operation()),
            }
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,work_order_engine=debug".into());

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Build the entity map from a JSON object and --set flags (flags win).
fn build_entities(payload: Option<&str>, variables: &[String]) -> Result<Map<String, Value>> {
    let mut entities = match payload {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid JSON entities")? {
            Value::Object(map) => map,
            _ => bail!("Entities must be a JSON object, not array or primitive"),
        },
        None => Map::new(),
    };

    for var in variables {
        let Some((key, raw)) = var.split_once('=') else {
            bail!("Invalid variable format '{}', expected key=value", var);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        entities.insert(key.to_string(), value);
    }

    Ok(entities)
}

fn print_run(result: &RunResult) {
    println!(
        "Run {} [{}] {} in {}ms",
        result.run_id, result.work_order_type, result.status, result.duration_ms
    );

    for step in &result.steps {
        let mark = if step.success { "✓" } else { "✗" };
        println!();
        println!("{} Step {} {}", mark, step.step, step.operation);
        if let StepDetail::Query {
            sql, columns, rows, ..
        } = &step.detail
        {
            println!("  {}", sql);
            if step.success {
                let output = QueryOutput::new(columns.clone(), rows.clone());
                for line in format_query_output(&output).lines() {
                    println!("  {}", line);
                }
            }
        }
        if let Some(error) = &step.error {
            println!("  error: {}", error);
        }
    }

    if !result.context.is_empty() {
        println!();
        println!("Context:");
        for (name, value) in result.context.iter() {
            println!("  {} = {}", name, value);
        }
    }

    println!();
    match (&result.message, &result.error) {
        (_, Some(error)) => {
            let code = result.error_code.map(|c| c.as_str()).unwrap_or("ERROR");
            println!("{}: {}", code, error);
        }
        (Some(message), None) => println!("{}", message),
        (None, None) => {}
    }
}
