use argh::FromArgs;
use pipesh::{ExitCode, Interpreter};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// A small POSIX-like shell with pipes and file redirection.
struct Args {
    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status
    command: Option<String>,

    #[argh(option)]
    /// log filter, e.g. `debug` or `pipesh::external=debug` (default: $RUST_LOG, then `warn`)
    log: Option<String>,

    #[argh(switch)]
    /// disable tab-completion in interactive mode
    no_completion: bool,
}

fn init_logging(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Map a shell status onto a process exit code.
fn process_status(status: ExitCode) -> i32 {
    match status {
        0..=255 => status,
        s if s > 255 => s & 0xff,
        s if s < -1 => 128 + -s,
        _ => 1,
    }
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    init_logging(args.log.as_deref());

    let mut shell = Interpreter::default();
    let status = match &args.command {
        Some(line) => shell.execute_line(line),
        None => shell.repl(!args.no_completion)?,
    };
    let status = if shell.env().should_exit {
        shell.env().exit_status
    } else {
        status
    };

    std::process::exit(process_status(status))
}
