use anyhow::Result;
use calc_orchestrator::{
    DatabaseConfig, Expression, LivenessConfig, OperationTimes, Orchestrator, OrchestratorClient,
    SolverPool, evaluate, format_result, load_settings,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calc-orchestrator")]
#[command(about = "Distributed arithmetic expression orchestrator and solvers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator HTTP API and the liveness sweeper
    Server {
        #[arg(short, long, default_value = "8082", env = "CALC_PORT")]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Run a pool of solvers against an orchestrator
    Solver {
        /// Name prefix; solvers are called "<name> <i>"
        #[arg(long, default_value = "Solver")]
        name: String,
        #[arg(short, long, default_value_t = 1)]
        count: usize,
        #[arg(long, env = "ORCHESTRATOR_URL")]
        orchestrator_url: Option<String>,
    },
    /// Initialize the database
    Init {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Validate an expression locally and queue it
    Submit {
        expression: String,
        #[arg(long, env = "ORCHESTRATOR_URL")]
        orchestrator_url: Option<String>,
    },
    /// List tasks known to the orchestrator
    Tasks {
        #[arg(long, env = "ORCHESTRATOR_URL")]
        orchestrator_url: Option<String>,
    },
    /// List solvers known to the orchestrator
    Solvers {
        #[arg(long, env = "ORCHESTRATOR_URL")]
        orchestrator_url: Option<String>,
    },
    /// Change the simulated cost of operators, in seconds
    SetTimes {
        #[arg(long)]
        add: Option<u64>,
        #[arg(long)]
        sub: Option<u64>,
        #[arg(long)]
        mul: Option<u64>,
        #[arg(long)]
        div: Option<u64>,
        #[arg(long, env = "ORCHESTRATOR_URL")]
        orchestrator_url: Option<String>,
    },
    /// Evaluate an expression in this process
    Eval {
        expression: String,
        /// Seconds to pause after every operator
        #[arg(long, default_value_t = 0)]
        delay: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("calc_orchestrator=info".parse()?)
                .add_directive("surrealdb=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let settings = load_settings()?;
    let client_for = |url: Option<String>| -> Result<OrchestratorClient> {
        let url = url.unwrap_or_else(|| settings.solver.orchestrator_url.clone());
        Ok(OrchestratorClient::new(url)?)
    };

    match cli.command {
        Commands::Server {
            port,
            host,
            db_url,
        } => {
            let db_config = DatabaseConfig::from_env(db_url);
            info!("Using database url for server: {}", db_config.url);

            let orchestrator = Orchestrator::new(db_config, settings.liveness.clone()).await?;
            let shutdown = shutdown_on_ctrl_c();

            calc_orchestrator::server::serve(
                Arc::new(orchestrator),
                &format!("{}:{}", host, port),
                shutdown,
            )
            .await?;
        }
        Commands::Solver {
            name,
            count,
            orchestrator_url,
        } => {
            let client = client_for(orchestrator_url)?;
            info!(
                "Starting {} solver(s) named \"{} <i>\" against {}",
                count,
                name,
                client.base_url()
            );

            let pool = SolverPool::new(&name, count, client, settings.solver.clone());
            pool.run(shutdown_on_ctrl_c()).await;
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig::from_env(db_url);
            info!("Using database url for initialization: {}", db_config.url);

            info!("Initializing database...");
            let db = calc_orchestrator::create_connection(db_config).await?;
            calc_orchestrator::ensure_schema(&db).await?;
            // Loading the orchestrator also reports the operation costs in effect.
            Orchestrator::with_db(db, LivenessConfig::default()).await?;
            info!("Database initialized successfully");
        }
        Commands::Submit {
            expression,
            orchestrator_url,
        } => {
            if let Err(e) = calc_orchestrator::evaluator::parse(&expression) {
                error!("Not submitting `{}`: {}", expression, e);
                return Err(e.into());
            }

            let client = client_for(orchestrator_url)?;
            client.submit(&Expression::new(expression.clone())).await?;
            println!("Queued {}", expression);
        }
        Commands::Tasks { orchestrator_url } => {
            let tasks = client_for(orchestrator_url)?.list_tasks().await?;
            if tasks.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }

            println!(
                "{:<10} {:<30} {:<10} {:<20} {:<25} {:<25}",
                "HASH", "EXPRESSION", "STATUS", "RESULT", "SUBMITTED", "FINISHED"
            );
            println!("{}", "-".repeat(125));

            for task in tasks {
                let begin = task
                    .begin_time
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let end = task
                    .end_time
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let result = if task.result.is_empty() {
                    "-".to_string()
                } else {
                    task.result
                };

                println!(
                    "{:<10} {:<30} {:<10} {:<20} {:<25} {:<25}",
                    task.hash_id, task.expression, task.status, result, begin, end
                );
            }
        }
        Commands::Solvers { orchestrator_url } => {
            let solvers = client_for(orchestrator_url)?.list_solvers().await?;
            if solvers.is_empty() {
                println!("No solvers registered.");
                return Ok(());
            }

            println!(
                "{:<20} {:<30} {:<25} {:<25}",
                "NAME", "EXPRESSION", "LAST PING", "STATUS"
            );
            println!("{}", "-".repeat(100));

            for solver in solvers {
                println!(
                    "{:<20} {:<30} {:<25} {:<25}",
                    solver.solver_name,
                    solver.solving_expression,
                    solver.last_ping.format("%Y-%m-%d %H:%M:%S"),
                    solver.info_string
                );
            }
        }
        Commands::SetTimes {
            add,
            sub,
            mul,
            div,
            orchestrator_url,
        } => {
            let times: BTreeMap<String, u64> = [("+", add), ("-", sub), ("*", mul), ("/", div)]
                .into_iter()
                .filter_map(|(op, seconds)| seconds.map(|s| (op.to_string(), s)))
                .collect();

            if times.is_empty() {
                println!("Nothing to change; pass at least one of --add --sub --mul --div.");
                return Ok(());
            }

            client_for(orchestrator_url)?
                .set_operation_times(times.clone())
                .await?;
            for (op, seconds) in times {
                println!("{} now takes {}s", op, seconds);
            }
        }
        Commands::Eval { expression, delay } => {
            let value = evaluate(&expression, &OperationTimes::uniform(delay)).await?;
            println!("{} = {}", expression, format_result(value));
        }
    }

    Ok(())
}

/// Token cancelled on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                trigger.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    token
}
