use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use trench_repl::config::{Options, DEFAULT_HOST};
use trench_repl::host::ColorMode;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "TRENCH_LOG";

/// trench - a command-line nREPL client
#[derive(Parser, Debug)]
#[command(name = "trench")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to connect to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to connect to
    #[arg(short, long)]
    port: Option<u16>,

    /// File to read the port from, .nrepl-port when not given
    #[arg(long, value_name = "FILE")]
    port_file: Option<PathBuf>,

    /// Server URL, nrepl://host[:port]
    #[arg(short, long, value_name = "URL")]
    server: Option<String>,

    /// Evaluate an expression and exit
    #[arg(short, long, value_name = "EXPR")]
    eval: Option<String>,

    /// Load a file and exit
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Call the -main function of a namespace and exit
    #[arg(short, long, value_name = "NS")]
    main: Option<String>,

    /// When to use colors
    #[arg(short = 'C', long, value_enum, default_value_t = ColorMode::Auto)]
    color: ColorMode,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl From<Args> for Options {
    fn from(args: Args) -> Self {
        Options {
            host: Some(args.host),
            port: args.port,
            port_file: args.port_file,
            server: args.server,
            eval: args.eval,
            file: args.file,
            main_ns: args.main,
            color: args.color,
        }
    }
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = Options::from(args)
        .resolve()
        .map_err(trench_repl::Error::from)
        .and_then(trench_repl::run);

    if let Err(e) = result {
        eprintln!("trench: {e}");
        std::process::exit(1);
    }
}
