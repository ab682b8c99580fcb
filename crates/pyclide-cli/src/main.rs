use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use pyclide_session::protocol::{
    ExtractMethodRequest, ExtractVarRequest, MoveRequest, OrganizeImportsRequest, PositionRequest,
    RenameRequest,
};
use pyclide_session::{
    Dispatcher, OutputFormat, PYCLIDE_VERSION, RegistryError, SessionConfig, SessionResolver,
    WorkerRequest,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "pyclide", version, about = "Python code intelligence via per-workspace workers")]
struct Cli {
    /// Workspace root the command applies to.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Operation(OperationCommand),
    /// List registered workers with their health
    Servers,
    /// Stop the worker serving --root
    Stop,
    /// Forget workers that no longer answer
    Prune,
}

#[derive(Subcommand)]
enum OperationCommand {
    /// Go to definition
    Defs(PositionArgs),
    /// Find references
    Refs(PositionArgs),
    /// Type and documentation at a position
    Hover(PositionArgs),
    /// Occurrences of the symbol within its file
    Occurrences(PositionArgs),
    /// Rename a symbol across the workspace
    Rename {
        #[command(flatten)]
        position: PositionArgs,
        new_name: String,
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Extract lines into a new method
    ExtractMethod {
        file: String,
        start_line: u32,
        end_line: u32,
        method_name: String,
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Extract an expression into a variable
    ExtractVar {
        file: String,
        start_line: u32,
        end_line: u32,
        var_name: String,
        #[arg(long)]
        start_col: Option<u32>,
        #[arg(long)]
        end_col: Option<u32>,
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Move a symbol to another module
    Move {
        #[command(flatten)]
        position: PositionArgs,
        dest_file: String,
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Sort and clean up imports
    OrganizeImports {
        file: String,
        #[command(flatten)]
        format: FormatArgs,
    },
}

#[derive(Args)]
struct PositionArgs {
    /// File path relative to the workspace root
    file: String,
    /// 1-based line
    line: u32,
    /// 1-based column
    col: u32,
}

impl From<PositionArgs> for PositionRequest {
    fn from(args: PositionArgs) -> Self {
        Self {
            file: args.file,
            line: args.line,
            col: args.col,
        }
    }
}

#[derive(Args)]
struct FormatArgs {
    #[arg(long, value_enum, default_value_t = FormatArg::Diff)]
    output_format: FormatArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Diff,
    Full,
}

impl From<FormatArgs> for OutputFormat {
    fn from(args: FormatArgs) -> Self {
        match args.output_format {
            FormatArg::Diff => OutputFormat::Diff,
            FormatArg::Full => OutputFormat::Full,
        }
    }
}

impl OperationCommand {
    fn into_request(self) -> WorkerRequest {
        match self {
            Self::Defs(position) => WorkerRequest::Defs(position.into()),
            Self::Refs(position) => WorkerRequest::Refs(position.into()),
            Self::Hover(position) => WorkerRequest::Hover(position.into()),
            Self::Occurrences(position) => WorkerRequest::Occurrences(position.into()),
            Self::Rename {
                position,
                new_name,
                format,
            } => WorkerRequest::Rename(RenameRequest {
                position: position.into(),
                new_name,
                output_format: format.into(),
            }),
            Self::ExtractMethod {
                file,
                start_line,
                end_line,
                method_name,
                format,
            } => WorkerRequest::ExtractMethod(ExtractMethodRequest {
                file,
                start_line,
                end_line,
                method_name,
                output_format: format.into(),
            }),
            Self::ExtractVar {
                file,
                start_line,
                end_line,
                var_name,
                start_col,
                end_col,
                format,
            } => WorkerRequest::ExtractVar(ExtractVarRequest {
                file,
                start_line,
                end_line: Some(end_line),
                start_col,
                end_col,
                var_name,
                output_format: format.into(),
            }),
            Self::Move {
                position,
                dest_file,
                format,
            } => WorkerRequest::Move(MoveRequest {
                position: position.into(),
                dest_file,
                output_format: format.into(),
            }),
            Self::OrganizeImports { file, format } => {
                WorkerRequest::OrganizeImports(OrganizeImportsRequest {
                    file,
                    output_format: format.into(),
                })
            }
        }
    }
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("PYCLIDE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!("pyclide={level},pyclide_session={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    tracing::debug!("pyclide {PYCLIDE_VERSION}");

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SessionConfig::from_env()?;
    let dispatcher = Dispatcher::from_config(&config);

    let output = match cli.command {
        Command::Operation(operation) => dispatcher.request(&cli.root, &operation.into_request())?,
        Command::Servers => servers(dispatcher.resolver())?,
        Command::Stop => serde_json::to_value(dispatcher.shutdown(&cli.root)?)?,
        Command::Prune => serde_json::to_value(dispatcher.resolver().prune()?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn servers(resolver: &SessionResolver) -> Result<serde_json::Value, RegistryError> {
    Ok(resolver
        .sessions()?
        .into_iter()
        .map(|session| {
            let health = if session.healthy {
                resolver.prober().fetch(&session.record)
            } else {
                None
            };
            serde_json::json!({
                "workspace_root": session.record.workspace_root,
                "port": session.record.port,
                "started_at": session.record.started_at_utc().map(|t| t.to_rfc3339()),
                "healthy": session.healthy,
                "health": health,
            })
        })
        .collect())
}
