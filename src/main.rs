use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::debug;

mod config;
mod console;
mod datetime;
mod driver;
mod error;
mod logging;
mod memory_store;
mod reconciler;
mod report_command;
mod repository;
mod rest_store;
mod time_entry;
mod timer_command;
mod watch_command;

use config::{Config, TimerSettings};
use console::{ConsoleMarkdownList, ConsolePresenter};
use memory_store::MemoryTimeEntryStore;
use report_command::{ReportArgs, ReportCommand};
use repository::TimeEntryRepository;
use rest_store::RestTimeEntryStore;
use time_entry::{format_duration, Project};
use timer_command::{SaveArgs, StartArgs, TimerAction, TimerCommand, TimerOutcome};

/// 作業時間を計測、記録するためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- start --project "Website Redesign" --rate 120
/// $ cargo run -- pause
/// $ cargo run -- save --note "hero section"
/// $ cargo run -- report --week
/// $ cargo run -- --local watch
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(
        short = 'v',
        long = "verbose",
        parse(from_occurrences),
        help = "Increases log verbosity (-v info, -vv debug, -vvv trace)"
    )]
    verbose: u64,

    #[clap(long = "local", help = "Uses an in-memory store instead of the remote API")]
    local: bool,

    #[clap(subcommand)]
    subcommand: SubCommands,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Shows the current timer
    Status,
    /// Starts a new timer
    Start(StartArgs),
    /// Pauses the running timer
    Pause,
    /// Resumes the paused timer
    Resume,
    /// Stops the timer and saves the time entry
    Save(SaveArgs),
    /// Discards the current timer
    Reset,
    /// Keeps the timer running and accepts commands from stdin
    Watch,
    /// Shows the time entries of a day or a week
    Report(ReportArgs),
    /// Lists the projects
    Projects,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_logger(args.verbose)?;
    let settings = TimerSettings::from_env()?;
    debug!("Timer settings: {:?}", settings);

    if args.local {
        run(
            MemoryTimeEntryStore::with_projects(demo_projects()),
            args.subcommand,
            settings,
        )
        .await
    } else {
        let store = RestTimeEntryStore::new(Config::load()?)
            .context("Failed to create the time entry store")?;
        run(store, args.subcommand, settings).await
    }
}

async fn run<R: TimeEntryRepository + 'static>(
    repository: R,
    subcommand: SubCommands,
    settings: TimerSettings,
) -> Result<()> {
    let action = match subcommand {
        SubCommands::Watch => return watch_command::watch(repository, settings).await,
        SubCommands::Report(report_args) => {
            let report = ReportCommand::new(&repository).run(report_args).await?;
            let mut stdout = io::stdout();
            let mut presenter = ConsoleMarkdownList::new(&mut stdout);
            presenter.show_time_entries(&report.entries)?;
            return presenter.show_totals(report.total_seconds, report.total_billable);
        }
        SubCommands::Projects => {
            let projects = repository
                .read_projects()
                .await
                .context("Failed to retrieve projects")?;
            return ConsoleMarkdownList::new(&mut io::stdout()).show_projects(&projects);
        }
        SubCommands::Status => TimerAction::Status,
        SubCommands::Start(start_args) => TimerAction::Start(start_args),
        SubCommands::Pause => TimerAction::Pause,
        SubCommands::Resume => TimerAction::Resume,
        SubCommands::Save(save_args) => TimerAction::Save(save_args),
        SubCommands::Reset => TimerAction::Reset,
    };

    let outcome = TimerCommand::new(repository, settings.drift_tolerance_secs)
        .run(action)
        .await?;
    let mut stdout = io::stdout();
    let mut presenter = ConsoleMarkdownList::new(&mut stdout);
    match outcome {
        TimerOutcome::Snapshot(snapshot) => presenter.show_timer(&snapshot),
        TimerOutcome::Saved(entry) => presenter.show_message(&format!(
            "Time entry saved: {} ${:.2}",
            format_duration(entry.duration_seconds.unwrap_or(0)),
            entry.billable_amount.unwrap_or(0.0)
        )),
        TimerOutcome::Reset(true) => presenter.show_message("Timer reset"),
        TimerOutcome::Reset(false) => presenter.show_message("Nothing to reset"),
    }
}

/// `--local`で利用するプロジェクト。
fn demo_projects() -> Vec<Project> {
    ["Website Redesign", "Mobile App", "Consulting"]
        .iter()
        .enumerate()
        .map(|(index, name)| Project {
            id: format!("p{}", index + 1),
            name: name.to_string(),
        })
        .collect()
}
