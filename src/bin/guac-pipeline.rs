//! guac-pipeline CLI: collect documents into the artifact graph.
//!
//! Usage:
//!   guac-pipeline files <path> [--gdbaddr path] [--realm name] [--follow]

use clap::{Args, CommandFactory, Parser, Subcommand};
use guac_pipeline::config::{PipelineOptions, RawOptions, DEFAULT_REALM};
use guac_pipeline::pipeline::Pipeline;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "guac-pipeline",
    version,
    about = "Collect artifact documents and assemble them into a graph"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a folder of files and create a GUAC graph
    Files(FilesArgs),
}

#[derive(Args)]
struct FilesArgs {
    /// Path to a file or folder of documents
    #[arg(value_name = "PATH")]
    paths: Vec<String>,

    /// Address of the graph database (a SQLite file)
    #[arg(long, env = "GUAC_GDB_ADDR")]
    gdbaddr: Option<PathBuf>,

    /// Graph database user
    #[arg(long, env = "GUAC_GDB_USER", default_value = "")]
    gdbuser: String,

    /// Graph database password
    #[arg(long, env = "GUAC_GDB_PASS", default_value = "", hide_env_values = true)]
    gdbpass: String,

    /// Graph database realm
    #[arg(long, env = "GUAC_REALM", default_value = DEFAULT_REALM)]
    realm: String,

    /// Path to the key used to verify documents (must be .pem)
    #[arg(long)]
    verifier_key_path: Option<String>,

    /// ID of the key used to verify documents
    #[arg(long)]
    verifier_key_id: Option<String>,

    /// Location of the durable bus
    #[arg(long, env = "GUAC_BUS_PATH")]
    bus_path: Option<PathBuf>,

    /// Drop queued messages before collecting. Test runs only
    #[arg(long)]
    recreate_stream: bool,

    /// Keep consuming after collection until Ctrl-C
    #[arg(long)]
    follow: bool,
}

impl FilesArgs {
    fn into_raw(self) -> RawOptions {
        let db_addr = self.gdbaddr.unwrap_or_else(|| data_path("graph.db"));
        RawOptions {
            db_addr: db_addr.to_string_lossy().into_owned(),
            user: self.gdbuser,
            pass: self.gdbpass,
            realm: self.realm,
            key_path: self.verifier_key_path,
            key_id: self.verifier_key_id,
            bus_path: self.bus_path.unwrap_or_else(|| data_path("bus.db")),
            recreate_stream: self.recreate_stream,
            follow: self.follow,
            args: self.paths,
        }
    }
}

/// `<data dir>/guac-pipeline/<file>`
fn data_path(file: &str) -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("guac-pipeline").join(file)
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "guac_pipeline=info",
        1 => "guac_pipeline=debug",
        _ => "guac_pipeline=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.log_json {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_files_help() {
    let mut command = Cli::command();
    if let Some(files) = command.find_subcommand_mut("files") {
        files.print_help().ok();
    }
}

async fn run_pipeline(options: PipelineOptions) -> i32 {
    let pipeline = match Pipeline::from_options(&options).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Unable to start pipeline");
            return 1;
        }
    };

    if options.follow {
        let shutdown = pipeline.shutdown_token();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => shutdown.cancel(),
                Err(e) => error!(error = %e, "Unable to listen for Ctrl-C"),
            }
        });
    }

    match pipeline.run().await {
        Ok(report) => {
            for failure in report.stage_failures() {
                warn!(error = %failure, "Stage did not finish cleanly");
            }
            for blocked in &report.blocked {
                warn!(
                    stage = blocked.stage,
                    sequence = blocked.sequence,
                    "{} is stuck on a message from an earlier run; use --recreate-stream to discard it",
                    blocked.stage
                );
            }
            info!(
                documents = report.documents_published,
                processed = report.processor.handled(),
                ingested = report.ingestor.handled(),
                "Pipeline finished"
            );
            0
        }
        Err(e) if e.is_fatal() => {
            error!(error = %e, "Pipeline aborted");
            1
        }
        Err(e) => {
            warn!(error = %e, "Pipeline finished with errors");
            0
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let code = match cli.command {
        Commands::Files(args) => {
            let options = match PipelineOptions::validate(args.into_raw()) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    print_files_help();
                    std::process::exit(1);
                }
            };
            match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime.block_on(run_pipeline(options)),
                Err(e) => {
                    eprintln!("Error: failed to start runtime: {}", e);
                    1
                }
            }
        }
    };

    std::process::exit(code);
}
