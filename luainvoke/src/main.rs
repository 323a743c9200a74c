use std::fs::File;
use std::io;

use luainvoke::cli::{self, CliArgs, ScriptArg, USAGE};
use luainvoke::config::InvokerConfig;
use luainvoke::{ControlSignal, InvokeError, ScriptInvoker};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`tracing_subscriber` syntax).
const LOG_ENV: &str = "LUAINVOKE_LOG";

fn main() {
    init_tracing();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("luainvoke: {e}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if args.help {
        println!("{USAGE}");
        return;
    }
    if args.version {
        println!("luainvoke {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("luainvoke: {e}");
            std::process::exit(2);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Run the script and map its outcome to a process exit status.
fn run(args: CliArgs) -> Result<i32, Box<dyn std::error::Error>> {
    // ── Layer configuration: environment, options file, command line ──────────
    let mut config = InvokerConfig::from_env()?;
    if let Some(path) = &args.config.options_file {
        let (file, errors) =
            InvokerConfig::load_file(path).map_err(|e| format!("{}: {e}", path.display()))?;
        for e in errors {
            eprintln!("luainvoke: warning: {}: {e}", path.display());
        }
        config.merge(file);
    }
    config.merge(args.config);
    config.lib_paths = cli::resolve_libdirs(&config.lib_paths);

    // ── Script source ─────────────────────────────────────────────────────────
    tracing::debug!(script = %cli::script_label(&args.script), "loading script");
    let mut invoker = match args.script {
        ScriptArg::Stdin => ScriptInvoker::from_reader(io::stdin()),
        ScriptArg::File(path) => {
            let file = File::open(&path).map_err(|e| format!("{}: {e}", path.display()))?;
            ScriptInvoker::from_reader(file)
        }
        ScriptArg::Inline(code) => ScriptInvoker::from_source(code),
    };
    config.apply_to(&mut invoker);
    for arg in args.args {
        invoker.add_arg(arg);
    }

    // ── Evaluate ──────────────────────────────────────────────────────────────
    match invoker.evaluate_with(io::stdout(), io::stderr())? {
        ControlSignal::NormalValue(_) => Ok(0),
        ControlSignal::ExitSignal(status) => Ok(i32::try_from(status).unwrap_or(1)),
        ControlSignal::RaisedFault(_) => Ok(1),
        ControlSignal::Unclassified(err) => Err(InvokeError::UnclassifiedControlSignal(err).into()),
    }
}
