use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::error::StoreError;
use crate::time_entry::{NewTimeEntry, Project, TimeEntry, TimeEntryUpdate};

/// タイムエントリーを永続化するストア。
///
/// ログイン中のユーザーのエントリーのみを対象とする。
/// 実行中のエントリーはユーザーごとに高々1件となるよう、`start_timer`は既存の実行中エントリーを先に終了させる。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TimeEntryRepository: Send + Sync {
    /// 新しいエントリーを実行中の状態で作成する。
    async fn start_timer(&self, entry: NewTimeEntry) -> Result<TimeEntry, StoreError>;

    /// エントリーを一時停止する。一時停止した時刻は`updated_at`に記録される。
    async fn pause_timer(&self, entry_id: &str) -> Result<(), StoreError>;

    /// エントリーを再開する。
    ///
    /// `start_time`を`現在時刻 - elapsed_seconds`に更新し、経過時間が連続するようにする。
    async fn resume_timer(&self, entry_id: &str, elapsed_seconds: i64) -> Result<(), StoreError>;

    /// エントリーを終了し、`end_time`、`duration_seconds`、`billable_amount`を確定する。
    async fn stop_timer(&self, entry_id: &str) -> Result<TimeEntry, StoreError>;

    /// エントリーを削除する。
    async fn delete_timer(&self, entry_id: &str) -> Result<(), StoreError>;

    /// 実行中のエントリーを取得する。
    async fn get_running_timer(&self) -> Result<Option<TimeEntry>, StoreError>;

    /// 指定したエントリーが一時停止中であれば取得する。
    async fn get_paused_timer(&self, entry_id: &str) -> Result<Option<TimeEntry>, StoreError>;

    /// 最後に開始した一時停止中のエントリーを取得する。
    async fn get_latest_paused_timer(&self) -> Result<Option<TimeEntry>, StoreError>;

    /// エントリーのメモや時間単価を更新する。
    async fn update_timer(
        &self,
        entry_id: &str,
        update: TimeEntryUpdate,
    ) -> Result<TimeEntry, StoreError>;

    /// プロジェクトの一覧を取得する。
    async fn read_projects(&self) -> Result<Vec<Project>, StoreError>;

    /// 開始時刻が指定範囲に含まれるエントリーを開始時刻の降順で取得する。
    async fn read_time_entries(
        &self,
        start_at: &DateTime<Utc>,
        end_at: &DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, StoreError>;
}
