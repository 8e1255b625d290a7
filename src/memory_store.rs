use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::datetime::now;
use crate::error::StoreError;
use crate::repository::TimeEntryRepository;
use crate::time_entry::{NewTimeEntry, Project, TimeEntry, TimeEntryUpdate};

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<TimeEntry>,
    projects: Vec<Project>,
}

impl MemoryState {
    fn entry_mut(&mut self, entry_id: &str) -> Result<&mut TimeEntry, StoreError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == entry_id)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))
    }

    fn stop(&mut self, entry_id: &str) -> Result<TimeEntry, StoreError> {
        let stopped_at = now();
        let entry = self.entry_mut(entry_id)?;
        let finalization = entry.finalize(stopped_at);
        entry.end_time = Some(finalization.end_time);
        entry.duration_seconds = Some(finalization.duration_seconds);
        entry.billable_amount = Some(finalization.billable_amount);
        entry.is_running = false;
        entry.updated_at = stopped_at;

        Ok(entry.clone())
    }
}

/// プロセス内でエントリーを保持するストア。
///
/// クローンしたストアは同じ状態を共有するため、複数のタイマーから同一アカウントを操作する状況を再現できる。
#[derive(Clone, Debug, Default)]
pub struct MemoryTimeEntryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTimeEntryStore {
    /// 指定したプロジェクトを持つ新しい`MemoryTimeEntryStore`を返す。
    pub fn with_projects(projects: Vec<Project>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                entries: Vec::new(),
                projects,
            })),
        }
    }

    /// 保持している全エントリーを返す。
    #[cfg(test)]
    pub async fn entries(&self) -> Vec<TimeEntry> {
        self.state.lock().await.entries.clone()
    }
}

#[async_trait]
impl TimeEntryRepository for MemoryTimeEntryStore {
    async fn start_timer(&self, entry: NewTimeEntry) -> Result<TimeEntry, StoreError> {
        let mut state = self.state.lock().await;
        let running_ids: Vec<String> = state
            .entries
            .iter()
            .filter(|entry| entry.is_running)
            .map(|entry| entry.id.clone())
            .collect();
        for running_id in running_ids {
            debug!("Stopping running entry {} before starting a new one", running_id);
            state.stop(&running_id)?;
        }

        let started_at = now();
        let created = TimeEntry {
            id: Uuid::new_v4().to_string(),
            account_id: None,
            user_id: None,
            project_id: Some(entry.project_id),
            project_name: entry.project_name,
            start_time: started_at,
            end_time: None,
            is_running: true,
            duration_seconds: None,
            hourly_rate: entry.hourly_rate,
            billable_amount: None,
            note: entry.note,
            created_at: Some(started_at),
            updated_at: started_at,
        };
        state.entries.push(created.clone());

        Ok(created)
    }

    async fn pause_timer(&self, entry_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(entry_id)?;
        entry.is_running = false;
        entry.updated_at = now();

        Ok(())
    }

    async fn resume_timer(&self, entry_id: &str, elapsed_seconds: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(entry_id)?;
        let resumed_at = now();
        entry.is_running = true;
        entry.start_time = resumed_at - Duration::seconds(elapsed_seconds);
        entry.updated_at = resumed_at;

        Ok(())
    }

    async fn stop_timer(&self, entry_id: &str) -> Result<TimeEntry, StoreError> {
        self.state.lock().await.stop(entry_id)
    }

    async fn delete_timer(&self, entry_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|entry| entry.id != entry_id);
        if state.entries.len() == before {
            return Err(StoreError::NotFound(entry_id.to_string()));
        }

        Ok(())
    }

    async fn get_running_timer(&self) -> Result<Option<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        let running = state
            .entries
            .iter()
            .filter(|entry| entry.is_running)
            .max_by_key(|entry| entry.start_time)
            .cloned();

        Ok(running)
    }

    async fn get_paused_timer(&self, entry_id: &str) -> Result<Option<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        let paused = state
            .entries
            .iter()
            .find(|entry| entry.id == entry_id && entry.is_paused())
            .cloned();

        Ok(paused)
    }

    async fn get_latest_paused_timer(&self) -> Result<Option<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        let paused = state
            .entries
            .iter()
            .filter(|entry| entry.is_paused())
            .max_by_key(|entry| entry.start_time)
            .cloned();

        Ok(paused)
    }

    async fn update_timer(
        &self,
        entry_id: &str,
        update: TimeEntryUpdate,
    ) -> Result<TimeEntry, StoreError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(entry_id)?;
        if let Some(note) = update.note {
            entry.note = Some(note);
        }
        if let Some(hourly_rate) = update.hourly_rate {
            entry.hourly_rate = Some(hourly_rate);
        }

        Ok(entry.clone())
    }

    async fn read_projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.state.lock().await.projects.clone())
    }

    async fn read_time_entries(
        &self,
        start_at: &DateTime<Utc>,
        end_at: &DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<TimeEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.start_time >= *start_at && entry.start_time <= *end_at)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        Ok(entries)
    }
}
