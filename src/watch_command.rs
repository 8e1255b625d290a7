use std::io;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::TimerSettings;
use crate::console::{ConsoleMarkdownList, ConsolePresenter};
use crate::driver::{Command, Notice, TimerDriver};
use crate::reconciler::TimerReconciler;
use crate::repository::TimeEntryRepository;
use crate::time_entry::Project;
use crate::timer_command::find_project;

const HELP: &str = "Commands: start <project> [rate], pause, resume, save, reset, note [text], rate [amount], quit";

/// タイマーを動かし続け、標準入力から操作を受け付ける。
///
/// 経過時間の変化や通知を標準出力に表示する。標準入力が閉じられるか`quit`を受け取ると終了する。
pub async fn watch<R: TimeEntryRepository + 'static>(
    repository: R,
    settings: TimerSettings,
) -> Result<()> {
    let projects = repository
        .read_projects()
        .await
        .context("Failed to retrieve projects")?;
    let reconciler = TimerReconciler::new(repository, settings.drift_tolerance_secs);
    let (driver, mut handle) = TimerDriver::new(reconciler, settings);
    let task = tokio::spawn(driver.run());

    let mut stdout = io::stdout();
    let mut presenter = ConsoleMarkdownList::new(&mut stdout);
    presenter.show_message(HELP)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let command = match line.context("Failed to read from stdin")? {
                    Some(line) => match parse_watch_line(&line, &projects) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(err) => {
                            presenter.show_message(&format!("Error: {}", err))?;
                            continue;
                        }
                    },
                    None => Command::Shutdown,
                };
                let shutdown = command == Command::Shutdown;
                if handle.commands.send(command).await.is_err() || shutdown {
                    break;
                }
            }
            changed = handle.snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = handle.snapshots.borrow_and_update().clone();
                presenter.show_timer(&snapshot)?;
            }
            Some(notice) = handle.notices.recv() => match notice {
                Notice::Info(message) => presenter.show_message(&message)?,
                Notice::Error(message) => presenter.show_message(&format!("Error: {}", message))?,
            },
        }
    }

    let reconciler = task.await.context("Timer driver stopped unexpectedly")?;
    info!("Stopped watching in {:?} state", reconciler.phase());
    Ok(())
}

/// 入力された1行を操作に変換する。空行の場合は`None`を返す。
fn parse_watch_line(line: &str, projects: &[Project]) -> Result<Option<Command>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    debug!("Parsing command: {:?} {:?}", word, rest);

    let command = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "start" => {
            // 数字で終わるプロジェクト名を優先し、一致しない場合のみ末尾を時間単価とみなす
            let (key, rate) = match rest.rsplit_once(char::is_whitespace) {
                Some((key, rate))
                    if find_project(projects, rest).is_err() && rate.parse::<f64>().is_ok() =>
                {
                    (key.trim(), Some(rate))
                }
                _ => (rest, None),
            };
            let project = if key.is_empty() {
                None
            } else {
                Some(find_project(projects, key)?)
            };
            Command::Start {
                project,
                hourly_rate: rate.map(parse_rate).transpose()?,
                note: None,
            }
        }
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "save" => Command::Save,
        "reset" => Command::Reset,
        "note" => Command::SetNote(Some(rest.to_string()).filter(|note| !note.is_empty())),
        "rate" => Command::SetHourlyRate(if rest.is_empty() {
            None
        } else {
            Some(parse_rate(rest)?)
        }),
        "quit" | "exit" => Command::Shutdown,
        other => bail!("Unknown command: {}. {}", other, HELP),
    };

    Ok(Some(command))
}

fn parse_rate(value: &str) -> Result<f64> {
    let rate = value
        .parse::<f64>()
        .with_context(|| format!("Invalid hourly rate: {}", value))?;
    if rate < 0.0 {
        bail!("Hourly rate must not be negative: {}", value);
    }
    Ok(rate)
}
