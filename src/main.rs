//! # TeX Timelapse CLI (`tlx`)
//!
//! The `tlx` binary talks to a TeX Timelapse render server: it lists
//! projects, shows per-commit snapshots, triggers compile/reset/render,
//! imports repositories, and follows live render progress.
//!
//! ## Usage
//!
//! ```bash
//! tlx --config ./config/tlx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tlx projects` | List projects on the server |
//! | `tlx show <project>` | Show the project's snapshots and their status |
//! | `tlx compile <project> <sha>` | Compile one snapshot |
//! | `tlx reset <project> <sha>` | Reset a snapshot, optionally from one stage |
//! | `tlx reset-project <project>` | Reset every snapshot |
//! | `tlx render <project>` | Start the full render |
//! | `tlx import <name> <zip>` | Upload a zipped repository as a new project |
//! | `tlx image` / `tlx pdf` | Download a page image or the snapshot PDF |
//! | `tlx timeline <project>` | Print the timeline and exercise scrubbing |
//! | `tlx config <project> [key=value...]` | Show or edit the project config |
//! | `tlx watch <project>` | Follow push updates until Ctrl-C |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tex_timelapse::models::Stage;
use tex_timelapse::progress::ProgressMode;
use tex_timelapse::{commands, config, logging};

/// TeX Timelapse CLI: browse and drive per-commit LaTeX renders.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tlx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tlx",
    about = "TeX Timelapse: browse and drive per-commit LaTeX renders",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tlx.toml")]
    config: PathBuf,

    /// Server URL. Overrides `[server].url`; the config file becomes
    /// optional when set.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Debug-level diagnostics on stderr (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Render progress output for `watch`. Defaults to human when stderr
    /// is a terminal, off otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List projects on the server.
    Projects,

    /// Show a project's snapshots.
    Show { project: String },

    /// Compile one snapshot.
    Compile {
        project: String,
        /// Commit hash or unique prefix.
        sha: String,
    },

    /// Reset one snapshot.
    ///
    /// Without `--stage` every stage is reset. With a stage, that stage and
    /// every later one go back to pending.
    Reset {
        project: String,
        sha: String,
        /// Stage name, e.g. `"Compile LaTeX"`.
        #[arg(long)]
        stage: Option<Stage>,
    },

    /// Reset every snapshot of a project.
    ResetProject { project: String },

    /// Start rendering the whole project.
    Render { project: String },

    /// Import a zipped Git repository as a new project.
    Import {
        name: String,
        /// Path to a `.zip` containing a `.git` directory.
        archive: PathBuf,
    },

    /// Download one page image of a snapshot.
    Image {
        project: String,
        sha: String,
        page: String,
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Download the compiled PDF of a snapshot.
    Pdf {
        project: String,
        sha: String,
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Print the timeline; optionally look up, seek, or simulate a drag.
    Timeline {
        project: String,
        /// Time-axis position (0-100) to resolve to the nearest snapshot.
        #[arg(long)]
        at: Option<f64>,
        /// Index fraction (0-1) to seek to.
        #[arg(long)]
        seek: Option<f64>,
        /// Pointer x coordinates over a 100-unit track.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        drag: Vec<f64>,
    },

    /// Show the project config, or set keys (`concatCommits=3`).
    Config {
        project: String,
        #[arg(value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },

    /// Follow live updates until Ctrl-C.
    Watch { project: String },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = match &cli.server {
        Some(url) => match config::load_config(&cli.config) {
            Ok(mut cfg) => {
                cfg.server.url = url.clone();
                cfg
            }
            Err(_) => config::Config::minimal(url),
        },
        None => config::load_config(&cli.config)?,
    };
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Projects => commands::run_projects(&cfg).await?,
        Commands::Show { project } => commands::run_show(&cfg, &project).await?,
        Commands::Compile { project, sha } => commands::run_compile(&cfg, &project, &sha).await?,
        Commands::Reset {
            project,
            sha,
            stage,
        } => commands::run_reset(&cfg, &project, &sha, stage).await?,
        Commands::ResetProject { project } => commands::run_reset_project(&cfg, &project).await?,
        Commands::Render { project } => commands::run_render(&cfg, &project).await?,
        Commands::Import { name, archive } => commands::run_import(&cfg, &name, &archive).await?,
        Commands::Image {
            project,
            sha,
            page,
            out,
        } => commands::run_image(&cfg, &project, &sha, &page, &out).await?,
        Commands::Pdf { project, sha, out } => commands::run_pdf(&cfg, &project, &sha, &out).await?,
        Commands::Timeline {
            project,
            at,
            seek,
            drag,
        } => commands::run_timeline(&cfg, &project, at, seek, &drag).await?,
        Commands::Config { project, set } => commands::run_config(&cfg, &project, &set).await?,
        Commands::Watch { project } => commands::run_watch(&cfg, &project, progress).await?,
    }

    Ok(())
}
