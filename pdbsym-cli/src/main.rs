use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context as _, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use pdbsym::{Context, Resolver};

const DEFAULT_CONFIG: &str = "config.json";
const DEFAULT_TEXT: &str = "callstacks.txt";

fn cli() -> Command {
    Command::new("pdbsym")
        .about("Resolves module+offset call stack frames into symbols using PDB files")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Log every step to stderr"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the full context as JSON instead of readable frames"),
        )
        .arg(
            Arg::new("cin")
                .long("cin")
                .action(ArgAction::SetTrue)
                .conflicts_with("config")
                .help("Read the JSON configuration from standard input"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the JSON configuration [default: config.json next to the executable]"),
        )
        .arg(
            Arg::new("text")
                .long("text")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the plain-text input [default: callstacks.txt next to the executable]"),
        )
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .event_format(fmt::format().compact().with_target(false).without_time())
        .init();
}

fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("failed to locate the executable")?;
    match exe.parent() {
        Some(dir) => Ok(dir.to_path_buf()),
        None => bail!("the executable has no parent directory"),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    Ok(cwd.join(path))
}

/// Fills the context from the configuration and text inputs.
fn load_inputs(matches: &ArgMatches, context: &mut Context) -> Result<()> {
    let exe_dir = exe_dir()?;
    let announce = !matches.get_flag("json");

    if matches.get_flag("cin") {
        context
            .read_config(io::stdin().lock(), Some(&exe_dir))
            .context("failed to read the configuration from stdin")?;
    } else {
        let config = match matches.get_one::<PathBuf>("config") {
            Some(path) => absolute(path)?,
            None => {
                let path = exe_dir.join(DEFAULT_CONFIG);
                if announce {
                    eprintln!("using default configuration {}", path.display());
                }
                path
            }
        };

        if !config.is_file() {
            bail!("configuration file {} does not exist", config.display());
        }
        context
            .read_config_file(&config)
            .context("failed to read the configuration")?;
    }

    // Frames from the configuration take precedence over the text file.
    if !matches.get_flag("cin") && context.callstacks().is_empty() {
        let text = match matches.get_one::<PathBuf>("text") {
            Some(path) => {
                let path = absolute(path)?;
                if !path.is_file() {
                    bail!("input text file {} does not exist", path.display());
                }
                Some(path)
            }
            None => {
                let path = exe_dir.join(DEFAULT_TEXT);
                path.is_file().then(|| {
                    if announce {
                        eprintln!("using default input text file {}", path.display());
                    }
                    path
                })
            }
        };

        if let Some(text) = text {
            context
                .read_text_file(&text)
                .context("failed to read the input text file")?;
        }
    }

    if context.symbols().is_empty() {
        bail!("no symbol storage");
    }
    if context.callstacks().is_empty() {
        bail!("no call stack to resolve");
    }

    Ok(())
}

fn execute(matches: &ArgMatches) -> Result<()> {
    let mut context = Context::new();
    load_inputs(matches, &mut context)?;
    context
        .parse_callstacks(false)
        .context("failed to prepare the call stacks")?;

    if matches.get_flag("verbose") {
        let json = pdbsym::to_json(&context)?;
        tracing::debug!("input context:\n{json}");
    }

    let mut resolver =
        Resolver::from_context(&context).context("failed to initialize the symbol engine")?;
    let summary = resolver.resolve(&mut context);
    if let Err(e) = resolver.finalize() {
        tracing::error!("failed to finalize the symbol engine: {e}");
    }
    tracing::debug!(%summary, "done");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    if matches.get_flag("json") {
        pdbsym::write_json(&context, &mut out)?;
    } else {
        pdbsym::write_readable(&context, &mut out)?;
    }
    out.flush()?;

    Ok(())
}

fn main() {
    let matches = match cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            // Help and version requests are not errors.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    init_logging(matches.get_flag("verbose"));

    if let Err(e) = execute(&matches) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
