use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use pagesaver::app::App;
use pagesaver::gate::CheckOutcome;
use pagesaver::sink::ExportFormat;
use pagesaver::sites::SiteId;

const HELP: &str = "Pagesaver - Save the manga pages currently on screen.

  --version, -V              Show version and exit
  --help,    -h              Show this help message
  --config <file>            Read settings from <file> instead of the default
  --check-updates            Check for a newer release and exit
  --capture <snapshot>       Capture the pages recorded in <snapshot>
  --format <png|jpg|webp>    Output format for --capture
  --force                    Skip the check interval and ask the feed again
  --reset-counter <site>     Restart page numbering for <site>
  --open-release             Open the release page in a browser
  --bridge                   Serve gate requests as JSON lines on stdin/stdout";

#[derive(Debug, Default)]
struct Cli {
    config: Option<PathBuf>,
    check_updates: bool,
    capture: Option<PathBuf>,
    format: Option<ExportFormat>,
    force: bool,
    reset_counter: Option<SiteId>,
    open_release: bool,
    bridge: bool,
}

fn main() {
    let cli = match handle_cli_flags() {
        Ok(Some(cli)) => cli,
        Ok(None) => return,
        Err(err) => {
            eprintln!("error: {err:#}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when a flag was fully handled here (version, help).
fn handle_cli_flags() -> Result<Option<Cli>> {
    let mut cli = Cli::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| anyhow!("{flag} needs a value"));
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Pagesaver {}", pagesaver::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--config" => cli.config = Some(PathBuf::from(value("--config")?)),
            "--check-updates" => cli.check_updates = true,
            "--capture" => cli.capture = Some(PathBuf::from(value("--capture")?)),
            "--format" => cli.format = Some(value("--format")?.parse()?),
            "--force" => cli.force = true,
            "--reset-counter" => cli.reset_counter = Some(value("--reset-counter")?.parse()?),
            "--open-release" => cli.open_release = true,
            "--bridge" => cli.bridge = true,
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(Some(cli))
}

fn run(cli: Cli) -> Result<()> {
    let app = App::load(cli.config.clone())?;

    if let Some(site) = cli.reset_counter {
        app.reset_counter(site);
    }

    if cli.bridge {
        return app.serve_bridge_stdio();
    }

    if let Some(snapshot) = cli.capture.as_deref() {
        let result = app
            .capture_snapshot(snapshot, cli.format, cli.force)
            .with_context(|| format!("capture {}", snapshot.display()))?;
        return match result.capture {
            Some(Ok(report)) => {
                for file in &report.files {
                    println!("{}", file.location.display());
                }
                Ok(())
            }
            Some(Err(err)) => Err(err.into()),
            None => {
                if cli.open_release {
                    app.open_release_page()?;
                }
                std::process::exit(3);
            }
        };
    }

    if cli.check_updates {
        match app.check_updates(true) {
            CheckOutcome::UpToDate { local, remote, .. } => match remote {
                Some(remote) => println!("Pagesaver {local} is up to date (latest {remote})."),
                None => println!("Pagesaver {local} is up to date."),
            },
            CheckOutcome::UpdateAvailable(notice) => {
                println!("Update available: {}\n{}", notice.name, notice.url);
            }
            CheckOutcome::Failed { message } => bail!("update check failed: {message}"),
        }
    }

    if cli.open_release {
        app.open_release_page()?;
    }

    if !(cli.check_updates || cli.open_release || cli.reset_counter.is_some()) {
        println!("{HELP}");
    }
    Ok(())
}
