mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::EXIT_CONFIG_ERROR;
use geosync_core::CopyOptions;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "geosync",
    version,
    about = "Copy catalog records with their map layers and styles between geospatial platforms"
)]
struct Cli {
    /// Configuration file (defaults to $GEOSYNC_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which parts of a dataset to copy. Without any flag, everything is copied.
#[derive(Debug, Args)]
struct PartFlags {
    /// Copy the catalog record.
    #[arg(long, default_value_t = false)]
    meta: bool,
    /// Copy the layers the record links to.
    #[arg(long, default_value_t = false)]
    layers: bool,
    /// Copy the styles of those layers.
    #[arg(long, default_value_t = false)]
    styles: bool,
}

impl PartFlags {
    fn options(&self) -> CopyOptions {
        if !(self.meta || self.layers || self.styles) {
            return CopyOptions::all();
        }
        CopyOptions {
            include_meta: self.meta,
            include_layers: self.layers,
            include_styles: self.styles,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Copy a record and the layers and styles it links to.
    Copy {
        /// Source catalog name.
        src: String,
        /// Destination name.
        dst: String,
        /// Record uuid.
        uuid: String,
        #[command(flatten)]
        parts: PartFlags,
    },
    /// Show what `copy` would copy, without writing anything.
    Preview {
        /// Source catalog name.
        src: String,
        /// Destination name.
        dst: String,
        /// Record uuid.
        uuid: String,
        #[command(flatten)]
        parts: PartFlags,
    },
    /// List configured source catalogs.
    Sources,
    /// List configured destinations.
    Destinations,
    /// List registered transformations and the chains between platforms.
    Transformations,
    /// Search a source catalog.
    Search {
        /// Source catalog name.
        src: String,
        /// Search request body (JSON).
        #[arg(long, default_value = r#"{"query":{"match_all":{}}}"#)]
        query: String,
    },
    /// Run the HTTP server.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to listen on.
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GEOSYNC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Completions { shell } => {
            return ExitCode::from(commands::completions::run::<Cli>(*shell));
        }
        Commands::ManPages { dir } => {
            return match commands::man_pages::run::<Cli>(dir) {
                Ok(code) => ExitCode::from(code),
                Err(msg) => {
                    eprintln!("error: {msg}");
                    ExitCode::from(commands::EXIT_FAILURE)
                }
            };
        }
        _ => {}
    }

    let config = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Copy {
            src,
            dst,
            uuid,
            parts,
        } => commands::copy::run(config, &src, &dst, &uuid, parts.options(), json_output),
        Commands::Preview {
            src,
            dst,
            uuid,
            parts,
        } => commands::preview::run(config, &src, &dst, &uuid, parts.options(), json_output),
        Commands::Sources => commands::sources::run(&config, json_output),
        Commands::Destinations => commands::destinations::run(&config, json_output),
        Commands::Transformations => commands::transformations::run(&config, json_output),
        Commands::Search { src, query } => commands::search::run(config, &src, &query, json_output),
        Commands::Serve { bind, port } => commands::serve::run(config, &bind, port),
        Commands::Completions { .. } | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::EXIT_FAILURE)
        }
    }
}
