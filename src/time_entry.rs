use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::elapsed_seconds;

/// 1件の作業記録。
///
/// 実行中、一時停止中、終了済みのいずれかの状態を持つ。
/// - 実行中: `is_running`が`true`
/// - 一時停止中: `is_running`が`false`かつ`end_time`が未設定。`updated_at`が一時停止した時刻を表す
/// - 終了済み: `end_time`が設定済み
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: String,
    pub account_id: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub duration_seconds: Option<i64>,
    pub hourly_rate: Option<f64>,
    pub billable_amount: Option<f64>,
    pub note: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    /// 一時停止中かどうかを返す。
    pub fn is_paused(&self) -> bool {
        !self.is_running && self.end_time.is_none()
    }

    /// 指定時刻における経過秒数を返す。
    ///
    /// 一時停止中は一時停止した時刻(`updated_at`)までの経過秒数となる。
    pub fn elapsed_at(&self, now: &DateTime<Utc>) -> i64 {
        if self.is_running {
            return elapsed_seconds(&self.start_time, now);
        }
        match (self.end_time, self.duration_seconds) {
            (Some(_), Some(duration)) => duration,
            (Some(end_time), None) => elapsed_seconds(&self.start_time, &end_time),
            (None, _) => elapsed_seconds(&self.start_time, &self.updated_at),
        }
    }

    /// 指定時刻で終了する場合の確定値を計算する。
    ///
    /// 一時停止中のエントリーは一時停止していた時間を含めない。
    pub fn finalize(&self, now: DateTime<Utc>) -> Finalization {
        let duration_seconds = self.elapsed_at(&now);

        Finalization {
            end_time: now,
            duration_seconds,
            billable_amount: billable_amount(duration_seconds, self.hourly_rate),
        }
    }
}

/// エントリー終了時に確定する値。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finalization {
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub billable_amount: f64,
}

/// 新規エントリーの作成内容。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NewTimeEntry {
    pub project_id: String,
    pub project_name: String,
    pub hourly_rate: Option<f64>,
    pub note: Option<String>,
}

/// エントリーの部分更新内容。未設定の項目は更新しない。
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimeEntryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
}

impl TimeEntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.hourly_rate.is_none()
    }
}

/// 作業記録を紐づけるプロジェクト。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// 請求金額を計算する。
///
/// 時間単価が未設定の場合は0とし、結果はセント単位に丸める。
pub fn billable_amount(duration_seconds: i64, hourly_rate: Option<f64>) -> f64 {
    let rate = hourly_rate.unwrap_or(0.0);
    let amount = duration_seconds as f64 / 3600.0 * rate;
    (amount * 100.0).round() / 100.0
}

/// エントリーの合計秒数を計算する。確定していないエントリーは0秒として扱う。
pub fn calculate_total_duration(entries: &[TimeEntry]) -> i64 {
    entries
        .iter()
        .map(|entry| entry.duration_seconds.unwrap_or(0))
        .sum()
}

/// エントリーの合計請求金額を計算する。
pub fn calculate_total_billable(entries: &[TimeEntry]) -> f64 {
    entries
        .iter()
        .map(|entry| entry.billable_amount.unwrap_or(0.0))
        .sum()
}

/// 秒数を`1h 5m`、`5m`の形式に整形する。
pub fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        return format!("{}h {}m", hours, minutes);
    }
    format!("{}m", minutes)
}

/// 秒数を`HH:MM:SS`の形式に整形する。
pub fn format_time_display(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
