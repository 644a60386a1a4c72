//! graphctl CLI - administer a hosted knowledge-graph service.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use graphctl::{
    AddBatchRequest, AddDataRequest, ApiClient, ClientError, CloneGraphRequest, Config,
    ConfigError, DataType, EpisodeInput, FilterArgs, FilterError, GraphSearchQuery, Metadata,
    OutputFormat, Profile, Reranker, SearchScope, StatusSink, StderrSink, TaskWaiter, WaitError,
    build_search_filters,
};
use serde::Serialize;
use serde_json::json;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Upper bound on episodes accepted by a single batch request.
const MAX_BATCH_EPISODES: usize = 20;

#[derive(Parser)]
#[command(name = "graphctl")]
#[command(about = "Administer a hosted knowledge-graph service")]
#[command(version)]
struct Cli {
    /// Config file (default is ~/.graphctl/config.yaml)
    #[arg(long, global = true, env = "GRAPHCTL_CONFIG")]
    config: Option<PathBuf>,

    /// API key for authentication
    #[arg(
        short = 'k',
        long,
        global = true,
        env = "GRAPHCTL_API_KEY",
        hide_env_values = true
    )]
    api_key: Option<String>,

    /// API endpoint URL (overrides the profile; also sets the URL for config add-profile)
    #[arg(long, global = true, env = "GRAPHCTL_API_URL")]
    api_url: Option<String>,

    /// Use a specific profile
    #[arg(short, long, global = true, env = "GRAPHCTL_PROFILE")]
    profile: Option<String>,

    /// Output format (json, yaml)
    #[arg(short, long, global = true, env = "GRAPHCTL_OUTPUT", value_enum)]
    output: Option<OutputFormat>,

    /// Suppress progress messages
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, add data to, and clone graphs
    Graph {
        #[command(subcommand)]
        graph_command: GraphCommands,
    },

    /// Get status of and wait for async tasks
    Task {
        #[command(subcommand)]
        task_command: TaskCommands,
    },

    /// Manage profiles and defaults
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

/// Timeout and cadence for task polling.
#[derive(Args, Clone, Copy)]
struct PollArgs {
    /// Maximum wait time (e.g. 90s, 5m)
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    timeout: Duration,

    /// Polling interval (e.g. 500ms, 1s)
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    poll_interval: Duration,
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Search a user graph or standalone graph
    Search {
        /// Search query
        query: String,

        /// Search a user graph
        #[arg(long)]
        user: Option<String>,

        /// Search a standalone graph
        #[arg(long)]
        graph: Option<String>,

        /// What to search
        #[arg(long, value_enum, default_value = "edges")]
        scope: SearchScope,

        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: u32,

        /// Reranker
        #[arg(long, value_enum)]
        reranker: Option<Reranker>,

        /// MMR diversity/relevance balance (0-1)
        #[arg(long)]
        mmr_lambda: Option<f64>,

        /// Minimum relevance score
        #[arg(long)]
        min_score: Option<f64>,

        /// Comma-separated node labels to exclude
        #[arg(long)]
        exclude_node_labels: Option<String>,

        /// Comma-separated edge types to exclude
        #[arg(long)]
        exclude_edge_types: Option<String>,

        /// Property filter, repeatable (name:op:value, name:IS NULL, name:IS NOT NULL)
        #[arg(long = "property-filter", value_name = "FILTER")]
        property_filters: Vec<String>,

        /// Date filter, repeatable; each one is OR'd (created_at:>:2024-01-01)
        #[arg(long = "date-filter", value_name = "FILTER")]
        date_filters: Vec<String>,
    },

    /// Add text, JSON, or message data to a graph
    Add {
        /// Standalone graph ID
        graph_id: Option<String>,

        /// Add to a user graph instead of a standalone graph
        #[arg(long)]
        user: Option<String>,

        /// Data type
        #[arg(long = "type", value_enum, default_value = "text")]
        data_type: DataType,

        /// Inline data string
        #[arg(long)]
        data: Option<String>,

        /// Path to data file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Read data from stdin
        #[arg(long)]
        stdin: bool,

        /// Treat input as a batch file: {"episodes": [{"type": ..., "data": ...}]}
        #[arg(long)]
        batch: bool,

        /// JSON object of metadata to attach (single episode only)
        #[arg(long, conflicts_with = "batch")]
        metadata: Option<String>,

        /// Wait for ingestion to complete
        #[arg(long)]
        wait: bool,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Clone a user graph or standalone graph
    #[command(name = "clone")]
    CloneGraph {
        /// Source user ID (for user graphs)
        #[arg(long, conflicts_with = "source_graph")]
        source_user: Option<String>,

        /// Target user ID (for user graphs)
        #[arg(long)]
        target_user: Option<String>,

        /// Source graph ID (for standalone graphs)
        #[arg(long)]
        source_graph: Option<String>,

        /// Target graph ID (for standalone graphs)
        #[arg(long)]
        target_graph: Option<String>,

        /// Wait for the clone to complete
        #[arg(long)]
        wait: bool,

        #[command(flatten)]
        poll: PollArgs,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Get task status
    Get {
        /// Task ID
        task_id: String,
    },

    /// Poll a task until it completes or fails
    Wait {
        /// Task ID
        task_id: String,

        #[command(flatten)]
        poll: PollArgs,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Display current configuration
    View,

    /// List all profiles
    GetProfiles,

    /// Switch active profile
    UseProfile {
        /// Profile name
        name: String,
    },

    /// Add a new profile (URL from --api-url)
    AddProfile {
        /// Profile name
        name: String,
    },

    /// Remove a profile
    DeleteProfile {
        /// Profile name
        name: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(thiserror::Error, Debug)]
enum AppError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Usage(String),
}

/// Parse durations like `500ms`, `30s`, `5m`, `1h`, `1d`. A bare number is seconds.
fn parse_duration(input: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid duration {:?} (expected e.g. 500ms, 30s, 5m, 1h)", input);
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(invalid());
    }
    let (digits, unit) = if let Some(d) = s.strip_suffix("ms") {
        (d, "ms")
    } else if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
        s.split_at(s.len() - 1)
    } else {
        (s.as_str(), "s")
    };
    let value = digits.parse::<u64>().map_err(|_| invalid())?;
    let secs = |mult: u64| value.checked_mul(mult).map(Duration::from_secs);
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        "d" => secs(24 * 60 * 60),
        _ => None,
    }
    .ok_or_else(invalid)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "graphctl=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_document<T: Serialize + ?Sized>(format: OutputFormat, data: &T) -> Result<(), AppError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
    }
    Ok(())
}

/// Shared state for command handlers.
struct Context {
    config: Config,
    api_key: Option<String>,
    api_url: Option<String>,
    profile: Option<String>,
    format: OutputFormat,
    sink: StderrSink,
}

impl Context {
    fn info(&self, message: &str) {
        self.sink.notify(message);
    }

    fn client(&self) -> Result<ApiClient, ClientError> {
        let api_key = self.api_key.as_deref().ok_or(ClientError::MissingApiKey)?;
        let url = self
            .config
            .api_url(self.api_url.as_deref(), self.profile.as_deref());
        debug!(%url, "using API endpoint");
        ApiClient::new(&url, api_key)
    }

    async fn wait_for(
        &self,
        client: &ApiClient,
        task_id: &str,
        poll: PollArgs,
    ) -> Result<graphctl::TaskRecord, WaitError> {
        TaskWaiter::new(client, &self.sink)
            .wait(task_id, poll.timeout, poll.poll_interval)
            .await
    }
}

fn read_input(
    data: Option<String>,
    file: Option<&PathBuf>,
    stdin: bool,
) -> Result<Option<String>, AppError> {
    if let Some(data) = data {
        return Ok(Some(data));
    }
    if let Some(path) = file {
        return Ok(Some(std::fs::read_to_string(path)?));
    }
    if stdin {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(Some(buf));
    }
    Ok(None)
}

fn confirm(prompt: &str) -> Result<bool, AppError> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().lock().read_line(&mut response)?;
    let response = response.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

/// Task ids in first-seen order, without duplicates.
fn unique_task_ids<'a>(ids: impl Iterator<Item = Option<&'a str>>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for id in ids.flatten() {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

async fn run_graph(ctx: &Context, command: GraphCommands) -> Result<(), AppError> {
    match command {
        GraphCommands::Search {
            query,
            user,
            graph,
            scope,
            limit,
            reranker,
            mmr_lambda,
            min_score,
            exclude_node_labels,
            exclude_edge_types,
            property_filters,
            date_filters,
        } => {
            if user.is_none() && graph.is_none() {
                return Err(AppError::Usage(
                    "either --user or --graph is required".to_string(),
                ));
            }

            // Filters are validated before a client exists so a bad
            // expression never turns into a request.
            let search_filters = build_search_filters(&FilterArgs {
                property_filters,
                date_filters,
                exclude_node_labels,
                exclude_edge_types,
            })?;

            let client = ctx.client()?;
            let (user_id, graph_id) = match user {
                Some(u) => (Some(u), None),
                None => (None, graph),
            };
            let request = GraphSearchQuery {
                query,
                user_id,
                graph_id,
                scope,
                limit,
                reranker,
                mmr_lambda: mmr_lambda.filter(|v| *v > 0.0),
                min_score: min_score.filter(|v| *v > 0.0),
                search_filters,
            };
            let results = client.search_graph(&request).await?;
            print_document(ctx.format, &results)
        }

        GraphCommands::Add {
            graph_id,
            user,
            data_type,
            data,
            file,
            stdin,
            batch,
            metadata,
            wait,
            poll,
        } => {
            if user.is_none() && graph_id.is_none() {
                return Err(AppError::Usage(
                    "either graph-id argument or --user flag is required".to_string(),
                ));
            }
            let (user_id, graph_id) = match user {
                Some(u) => (Some(u), None),
                None => (None, graph_id),
            };

            if batch {
                let content = read_input(None, file.as_ref(), stdin)?.ok_or_else(|| {
                    AppError::Usage("--file or --stdin is required for batch mode".to_string())
                })?;
                let input: EpisodeInput = serde_json::from_str(&content)?;
                if input.episodes.is_empty() {
                    return Err(AppError::Usage("batch file contains no episodes".to_string()));
                }
                if input.episodes.len() > MAX_BATCH_EPISODES {
                    return Err(AppError::Usage(format!(
                        "batch contains {} episodes; at most {} are allowed",
                        input.episodes.len(),
                        MAX_BATCH_EPISODES
                    )));
                }

                let client = ctx.client()?;
                let episodes = client
                    .add_batch(&AddBatchRequest {
                        episodes: input.episodes,
                        user_id,
                        graph_id,
                    })
                    .await?;
                ctx.info(&format!("Added {} episodes to graph", episodes.len()));

                if wait {
                    let task_ids = unique_task_ids(episodes.iter().map(|e| e.task_id.as_deref()));
                    if task_ids.is_empty() {
                        ctx.info("No task returned; nothing to wait for");
                    }
                    for task_id in task_ids {
                        ctx.wait_for(&client, task_id, poll).await?;
                    }
                }
                return print_document(ctx.format, &episodes);
            }

            let content = read_input(data, file.as_ref(), stdin)?.ok_or_else(|| {
                AppError::Usage("--data, --file, or --stdin is required".to_string())
            })?;
            let metadata: Option<Metadata> = metadata
                .as_deref()
                .map(serde_json::from_str::<Metadata>)
                .transpose()?;

            let client = ctx.client()?;
            let episode = client
                .add_data(&AddDataRequest {
                    data: content,
                    data_type,
                    user_id,
                    graph_id,
                    metadata,
                })
                .await?;
            ctx.info("Added data to graph");

            if wait {
                match episode.task_id.as_deref() {
                    Some(task_id) => {
                        ctx.wait_for(&client, task_id, poll).await?;
                    }
                    None => ctx.info("No task returned; nothing to wait for"),
                }
            }
            print_document(ctx.format, &episode)
        }

        GraphCommands::CloneGraph {
            source_user,
            target_user,
            source_graph,
            target_graph,
            wait,
            poll,
        } => {
            let request = match (source_user, source_graph) {
                (Some(source_user), _) => CloneGraphRequest {
                    source_user_id: Some(source_user),
                    target_user_id: target_user,
                    ..Default::default()
                },
                (None, Some(source_graph)) => CloneGraphRequest {
                    source_graph_id: Some(source_graph),
                    target_graph_id: target_graph,
                    ..Default::default()
                },
                (None, None) => {
                    return Err(AppError::Usage(
                        "either --source-user or --source-graph is required".to_string(),
                    ));
                }
            };

            let client = ctx.client()?;
            let resp = client.clone_graph(&request).await?;
            if let Some(graph_id) = &resp.graph_id {
                ctx.info(&format!("Cloned to graph: {}", graph_id));
            } else if let Some(user_id) = &resp.user_id {
                ctx.info(&format!("Cloned to user: {}", user_id));
            }

            if wait {
                match resp.task_id.as_deref() {
                    Some(task_id) => {
                        ctx.wait_for(&client, task_id, poll).await?;
                    }
                    None => ctx.info("No task returned; nothing to wait for"),
                }
            }
            print_document(ctx.format, &resp)
        }
    }
}

async fn run_task(ctx: &Context, command: TaskCommands) -> Result<(), AppError> {
    match command {
        TaskCommands::Get { task_id } => {
            let client = ctx.client()?;
            let task = client.get_task(&task_id).await?;
            print_document(ctx.format, &task)
        }
        TaskCommands::Wait { task_id, poll } => {
            let client = ctx.client()?;
            let task = ctx.wait_for(&client, &task_id, poll).await?;
            print_document(ctx.format, &task)
        }
    }
}

fn run_config(ctx: &Context, command: ConfigCommands) -> Result<(), AppError> {
    let config = &ctx.config;
    match command {
        ConfigCommands::View => print_document(ctx.format, config),

        ConfigCommands::GetProfiles => {
            let profiles: Vec<_> = config
                .profiles
                .iter()
                .map(|p| {
                    json!({
                        "name": p.name,
                        "api_url": p.api_url,
                        "current": p.name == config.current_profile,
                    })
                })
                .collect();
            print_document(ctx.format, &profiles)
        }

        ConfigCommands::UseProfile { name } => {
            let mut config = config.reload()?;
            config.use_profile(&name)?;
            config.save()?;
            ctx.info(&format!("Switched to profile {:?}", name));
            Ok(())
        }

        ConfigCommands::AddProfile { name } => {
            let mut config = config.reload()?;
            config.add_profile(Profile {
                name: name.clone(),
                api_url: ctx.api_url.clone().filter(|u| !u.is_empty()),
            })?;
            config.save()?;
            ctx.info(&format!("Added profile {:?}", name));
            Ok(())
        }

        ConfigCommands::DeleteProfile { name, force } => {
            let mut config = config.reload()?;
            if config.profile(&name).is_none() {
                return Err(ConfigError::ProfileNotFound(name).into());
            }
            if !force && !confirm(&format!("Delete profile {:?}?", name))? {
                ctx.info("Aborted");
                return Ok(());
            }
            config.remove_profile(&name)?;
            config.save()?;
            ctx.info(&format!("Deleted profile {:?}", name));
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    debug!(path = %path.display(), "using config file");
    let config = Config::load(&path)?;

    let ctx = Context {
        format: cli.output.unwrap_or(config.defaults.output),
        config,
        api_key: cli.api_key.filter(|k| !k.trim().is_empty()),
        api_url: cli.api_url,
        profile: cli.profile,
        sink: StderrSink::new(cli.quiet),
    };

    match cli.command {
        Commands::Graph { graph_command } => run_graph(&ctx, graph_command).await,
        Commands::Task { task_command } => run_task(&ctx, task_command).await,
        Commands::Config { config_command } => run_config(&ctx, config_command),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{}", format!("Error: {}", e).red());
        process::exit(1);
    }
}
