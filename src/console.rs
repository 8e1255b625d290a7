use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;

use crate::reconciler::{TimerPhase, TimerSnapshot};
use crate::time_entry::{format_duration, format_time_display, Project, TimeEntry};

/// Consoleにタイマーやtime entryを表示するためのtrait。
pub trait ConsolePresenter {
    /// タイムエントリーを表示する。
    ///
    /// # Arguments
    ///
    /// * `time_entries` - 表示するタイムエントリー
    fn show_time_entries(&mut self, time_entries: &[TimeEntry]) -> Result<()>;

    /// タイマーの状態を表示する。
    fn show_timer(&mut self, snapshot: &TimerSnapshot) -> Result<()>;

    /// 合計時間と合計請求金額を表示する。
    fn show_totals(&mut self, duration_seconds: i64, billable_amount: f64) -> Result<()>;

    /// プロジェクトの一覧を表示する。
    fn show_projects(&mut self, projects: &[Project]) -> Result<()>;

    /// 1行のメッセージを表示する。
    fn show_message(&mut self, message: &str) -> Result<()>;
}

/// Markdownのlist形式で表示する。
pub struct ConsoleMarkdownList<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ConsoleMarkdownList<'a, W> {
    /// 新しい`ConsoleMarkdownList`を返す。
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleMarkdownList<'a, W> {
    // time entryを開始時刻順のlist形式で表示する。
    fn show_time_entries(&mut self, time_entries: &[TimeEntry]) -> Result<()> {
        let mut sorted_entries = time_entries.to_vec();
        sorted_entries.sort_by_key(|entry| entry.start_time);

        for entry in sorted_entries {
            writeln!(self.writer, "{}", entry_line(&entry))
                .with_context(|| format!("Failed to write time entry: {:?}", entry))?;
        }

        Ok(())
    }

    fn show_timer(&mut self, snapshot: &TimerSnapshot) -> Result<()> {
        let line = match snapshot.phase {
            TimerPhase::Idle => "idle".to_string(),
            TimerPhase::Running | TimerPhase::Paused => {
                let label = if snapshot.phase == TimerPhase::Running {
                    "running"
                } else {
                    "paused"
                };
                let mut line = format!(
                    "{} {} {}",
                    label,
                    format_time_display(snapshot.elapsed_seconds),
                    snapshot.project_name
                );
                if let Some(note) = &snapshot.note {
                    line.push_str(&format!(" ({})", note));
                }
                line
            }
        };
        writeln!(self.writer, "{}", line).context("Failed to write timer state")?;

        Ok(())
    }

    fn show_totals(&mut self, duration_seconds: i64, billable_amount: f64) -> Result<()> {
        writeln!(
            self.writer,
            "\nTotal: {} / ${:.2}",
            format_duration(duration_seconds),
            billable_amount
        )
        .context("Failed to write totals")?;

        Ok(())
    }

    fn show_projects(&mut self, projects: &[Project]) -> Result<()> {
        for project in projects {
            writeln!(self.writer, "- {}: {}", project.id, project.name)
                .with_context(|| format!("Failed to write project: {:?}", project))?;
        }

        Ok(())
    }

    fn show_message(&mut self, message: &str) -> Result<()> {
        writeln!(self.writer, "{}", message).context("Failed to write message")?;

        Ok(())
    }
}

/// 1 time entryを表す行を作成する。
fn entry_line(entry: &TimeEntry) -> String {
    let start_str = entry
        .start_time
        .with_timezone(&Local)
        .format("%H:%M")
        .to_string();
    let end_str = entry
        .end_time
        .map(|end| end.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "now".to_string());
    let mut line = format!("- {} ~ {}: {}", start_str, end_str, entry.project_name);
    if let Some(duration) = entry.duration_seconds {
        line.push_str(&format!(" [{}]", format_duration(duration)));
    }
    if let Some(amount) = entry.billable_amount.filter(|amount| *amount > 0.0) {
        line.push_str(&format!(" ${:.2}", amount));
    }
    if let Some(note) = &entry.note {
        line.push_str(&format!(" - {}", note));
    }
    line
}
