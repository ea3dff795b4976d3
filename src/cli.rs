use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use fsredirect::checkout::Checkout;
use fsredirect::config::Config;
use fsredirect::mtab;
use fsredirect::platform::Platform;
use fsredirect::redirect::{
    self, AddOutcome, RedirectEnv, RedirectionType, ReconcileReport, Redirector, output,
};

/// Exit status when the user declines a destructive prompt.
const EXIT_DECLINED: u8 = 2;

/// Manage bind and symlink redirections inside a checkout
#[derive(Parser)]
#[command(name = "fsredirect", version, about, long_about = None)]
pub struct Cli {
    /// Tool configuration file (default: ./fsredirect.toml if present)
    #[arg(long, global = true, env = "FSREDIRECT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct MountArg {
    /// The checkout root (default: the checkout containing the working directory)
    #[arg(long)]
    pub mount: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List redirections
    List {
        #[command(flatten)]
        mount: MountArg,

        /// Output in JSON rather than a human readable table
        #[arg(long)]
        json: bool,
    },

    /// Add or change a redirection
    Add {
        #[command(flatten)]
        mount: MountArg,

        /// The path in the repo which should be redirected
        repo_path: PathBuf,

        /// The type of the redirection
        #[arg(value_enum)]
        kind: KindArg,

        /// Unmount and re-bind mount any bind mount redirections to ensure that
        /// they are pointing to the right target
        #[arg(long)]
        force_remount_bind_mounts: bool,
    },

    /// Delete a redirection
    Del {
        #[command(flatten)]
        mount: MountArg,

        /// The path in the repo whose redirection should be removed
        repo_path: String,
    },

    /// Fix up redirections to match their configuration
    Fixup {
        #[command(flatten)]
        mount: MountArg,

        /// Unmount and re-bind mount any bind mount redirections to ensure that
        /// they are pointing to the right target
        #[arg(long)]
        force_remount_bind_mounts: bool,
    },

    /// Unmount all effective redirections, keeping the configuration so that
    /// a later fixup restores them
    Unmount {
        #[command(flatten)]
        mount: MountArg,
    },

    /// Delete stale APFS volumes
    CleanupApfs {
        /// A live checkout whose volumes must be kept; repeat for every
        /// checkout on this machine (added to `bind.known_checkouts`)
        #[arg(long = "mount")]
        mounts: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Bind,
    Symlink,
}

impl From<KindArg> for RedirectionType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Bind => RedirectionType::Bind,
            KindArg::Symlink => RedirectionType::Symlink,
        }
    }
}

fn find_checkout(mount: &MountArg) -> anyhow::Result<Checkout> {
    let checkout = match &mount.mount {
        Some(path) => Checkout::new(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to read the working directory")?;
            Checkout::discover(cwd)?
        }
    };
    tracing::debug!("Using checkout {}", checkout.path().display());
    Ok(checkout)
}

fn redirector(mount: &MountArg, config: &Config) -> anyhow::Result<Redirector> {
    let checkout = find_checkout(mount)?;
    Ok(Redirector::new(RedirectEnv::from_config(checkout, config)))
}

fn report_status(report: &ReconcileReport) -> ExitCode {
    for failure in &report.failures {
        eprintln!("{}: {}", failure.repo_path.display(), failure.message);
    }
    if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::List { mount, json } => {
            let redirs = redirector(&mount, &config)?.list()?;
            if json {
                println!("{}", output::render_json(&redirs)?);
            } else {
                print!("{}", output::render_table(&redirs));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Add { mount, repo_path, kind, force_remount_bind_mounts } => {
            let redirector = redirector(&mount, &config)?;
            match redirector.add(&repo_path, kind.into(), force_remount_bind_mounts)? {
                AddOutcome::Applied => {}
                AddOutcome::AlreadyInPlace => {
                    println!("Skipping {}; it is already configured", repo_path.display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Del { mount, repo_path } => {
            redirector(&mount, &config)?.del(&repo_path)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Fixup { mount, force_remount_bind_mounts } => {
            let report = redirector(&mount, &config)?.fixup(force_remount_bind_mounts)?;
            Ok(report_status(&report))
        }
        Command::Unmount { mount } => {
            let report = redirector(&mount, &config)?.unmount()?;
            Ok(report_status(&report))
        }
        Command::CleanupApfs { mounts } => cleanup_apfs(&mounts, &config),
    }
}

/// Every checkout whose volumes are live. The helper treats a volume owned by
/// any checkout missing from this list as stale, so an empty list is refused.
fn live_checkouts(mounts: &[PathBuf], config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let mut checkouts = Vec::new();
    for path in config.bind.known_checkouts.iter().chain(mounts) {
        let checkout = Checkout::new(path)?.path().to_path_buf();
        if !checkouts.contains(&checkout) {
            checkouts.push(checkout);
        }
    }
    if checkouts.is_empty() {
        bail!(
            "Cannot tell which volumes are live: pass --mount for every checkout on this \
             machine or set bind.known_checkouts"
        );
    }
    Ok(checkouts)
}

fn cleanup_apfs(mounts: &[PathBuf], config: &Config) -> anyhow::Result<ExitCode> {
    let helper = &config.bind.apfs_helper;
    let platform = Platform::current();
    let mount_table = mtab::for_platform(platform);
    if platform != Platform::MacOs || !redirect::have_apfs_helper(mount_table.as_ref(), helper) {
        bail!("Unsupported platform {}", platform);
    }

    let checkouts = live_checkouts(mounts, config)?;
    let stale = redirect::list_stale_apfs_volumes(helper, &checkouts)?;
    if stale.is_empty() {
        println!("No stale volumes detected");
        return Ok(ExitCode::SUCCESS);
    }

    if std::io::stdin().is_terminal() {
        println!(
            "Warning: this operation will permanently delete the following volumes:\n  {}\n",
            stale.join("\n  ")
        );
        if !confirm("Proceed?")? {
            println!("Not deleting volumes");
            return Ok(ExitCode::from(EXIT_DECLINED));
        }
    }

    let mut code = ExitCode::SUCCESS;
    for volume in &stale {
        match redirect::delete_apfs_volume(helper, volume) {
            Ok(()) => println!("Deleted volume: {}", volume),
            Err(e) => {
                println!("Failed to delete volume {} due to {}", volume, e);
                code = ExitCode::FAILURE;
            }
        }
    }
    Ok(code)
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
