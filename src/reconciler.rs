use log::{debug, info};
use serde::Serialize;

use crate::datetime::now;
use crate::error::{StoreError, TimerError, ValidationError};
use crate::repository::TimeEntryRepository;
use crate::time_entry::{NewTimeEntry, Project, TimeEntry, TimeEntryUpdate};

/// タイマーの状態。
///
/// `Idle -> Running -> {Paused -> Running | Idle}`と遷移する。保存やリセットの後は`Idle`に戻る。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

/// 画面に表示するタイマーの状態。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub entry_id: Option<String>,
    pub project_id: Option<String>,
    pub project_name: String,
    pub elapsed_seconds: i64,
    pub hourly_rate: Option<f64>,
    pub note: Option<String>,
}

impl Default for TimerSnapshot {
    fn default() -> Self {
        Self {
            phase: TimerPhase::Idle,
            entry_id: None,
            project_id: None,
            project_name: String::new(),
            elapsed_seconds: 0,
            hourly_rate: None,
            note: None,
        }
    }
}

/// リモートの状態との照合結果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// ローカルの状態はリモートと一致していた。
    Unchanged,
    /// 実行中のエントリーをリモートから取り込んだ。
    AdoptedRunning,
    /// 一時停止中のエントリーをリモートから取り込んだ。
    AdoptedPaused,
    /// エントリーが他所で終了、削除されたためローカルの状態を初期化した。
    Cleared,
    /// リモートへの問い合わせに失敗した。状態は変更していない。
    Failed,
}

/// ずれ補正の結果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftCorrection {
    /// 実行中でない、もしくはリモートの実行中エントリーが別のものだったため何もしなかった。
    Skipped,
    /// ずれが許容範囲内だった。
    WithinTolerance,
    /// ローカルの経過時間をリモートの値に合わせた。
    Corrected { local: i64, server: i64 },
}

/// ローカルで刻む経過時間を、リモートに保存されたタイムエントリーと同期させる。
///
/// 状態を変更する操作はリモートへの保存に成功した場合のみローカルの状態を進める。
/// 失敗した場合も状態は変えず、次回の`reconcile`でリモートの状態を取り込む。
pub struct TimerReconciler<R: TimeEntryRepository> {
    repository: R,
    state: TimerSnapshot,
    persisted: TimeEntryUpdate,
    drift_tolerance_secs: i64,
}

impl<R: TimeEntryRepository> TimerReconciler<R> {
    /// 新しい`TimerReconciler`を返す。
    ///
    /// # Arguments
    ///
    /// * `repository` - タイムエントリーを保存するストア
    /// * `drift_tolerance_secs` - ずれ補正を行う閾値(秒)
    pub fn new(repository: R, drift_tolerance_secs: i64) -> Self {
        Self {
            repository,
            state: TimerSnapshot::default(),
            persisted: TimeEntryUpdate::default(),
            drift_tolerance_secs,
        }
    }

    pub fn snapshot(&self) -> &TimerSnapshot {
        &self.state
    }

    pub fn phase(&self) -> TimerPhase {
        self.state.phase
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// メモを変更する。リモートへは保存時に反映する。
    pub fn set_note(&mut self, note: Option<String>) {
        self.state.note = note;
    }

    /// 時間単価を変更する。リモートへは保存時に反映する。
    pub fn set_hourly_rate(&mut self, hourly_rate: Option<f64>) {
        self.state.hourly_rate = hourly_rate;
    }

    /// 実行中であれば経過時間を1秒進める。
    pub fn tick(&mut self) {
        if self.state.phase == TimerPhase::Running {
            self.state.elapsed_seconds += 1;
        }
    }

    /// 新しいエントリーを開始する。
    ///
    /// # Errors
    ///
    /// * プロジェクトが選択されていない場合は`ValidationError::NoProjectSelected`
    /// * 既にタイマーが動作している場合は`ValidationError::TimerAlreadyActive`
    /// * 保存に失敗した場合は`TimerError::Persistence`
    pub async fn start(
        &mut self,
        project: Option<Project>,
        hourly_rate: Option<f64>,
        note: Option<String>,
    ) -> Result<&TimerSnapshot, TimerError> {
        let project = project
            .filter(|project| !project.id.is_empty())
            .ok_or(ValidationError::NoProjectSelected)?;
        if self.state.phase != TimerPhase::Idle {
            return Err(ValidationError::TimerAlreadyActive.into());
        }

        let entry = self
            .repository
            .start_timer(NewTimeEntry {
                project_id: project.id,
                project_name: project.name,
                hourly_rate,
                note,
            })
            .await
            .map_err(TimerError::persistence("start"))?;
        info!("Timer started: {} ({})", entry.id, entry.project_name);

        self.adopt(&entry, TimerPhase::Running, 0);
        Ok(&self.state)
    }

    /// 実行中のエントリーを一時停止する。
    ///
    /// 経過時間は直前の値のまま固定される。
    ///
    /// # Errors
    ///
    /// * 実行中でない場合は`ValidationError::NoActiveEntry`
    /// * 保存に失敗した場合は`TimerError::Persistence`
    pub async fn pause(&mut self) -> Result<&TimerSnapshot, TimerError> {
        let entry_id = self.active_entry_id(TimerPhase::Running)?;
        self.repository
            .pause_timer(&entry_id)
            .await
            .map_err(TimerError::persistence("pause"))?;
        info!(
            "Timer paused: {} at {}s",
            entry_id, self.state.elapsed_seconds
        );

        self.state.phase = TimerPhase::Paused;
        Ok(&self.state)
    }

    /// 一時停止中のエントリーを再開する。
    ///
    /// リモートの開始時刻を`現在時刻 - 経過時間`にずらし、ローカルは一時停止時の経過時間から刻み直す。
    ///
    /// # Errors
    ///
    /// * 一時停止中でない場合は`ValidationError::NoActiveEntry`
    /// * 保存に失敗した場合は`TimerError::Persistence`
    pub async fn resume(&mut self) -> Result<&TimerSnapshot, TimerError> {
        let entry_id = self.active_entry_id(TimerPhase::Paused)?;
        let elapsed = self.state.elapsed_seconds;
        self.repository
            .resume_timer(&entry_id, elapsed)
            .await
            .map_err(TimerError::persistence("resume"))?;
        info!("Timer resumed: {} from {}s", entry_id, elapsed);

        self.state.phase = TimerPhase::Running;
        Ok(&self.state)
    }

    /// エントリーを終了して保存する。
    ///
    /// メモや時間単価が変更されていれば終了前に反映する。保存後は`Idle`に戻る。
    ///
    /// # Errors
    ///
    /// * 保存するエントリーがない場合は`ValidationError::NothingToSave`
    /// * 保存に失敗した場合は`TimerError::Persistence`
    pub async fn save(&mut self) -> Result<TimeEntry, TimerError> {
        let entry_id = self
            .state
            .entry_id
            .clone()
            .ok_or(ValidationError::NothingToSave)?;

        let update = self.pending_update();
        if !update.is_empty() {
            debug!("Updating entry {} before saving: {:?}", entry_id, update);
            self.repository
                .update_timer(&entry_id, update)
                .await
                .map_err(TimerError::persistence("save"))?;
        }
        let saved = self
            .repository
            .stop_timer(&entry_id)
            .await
            .map_err(TimerError::persistence("save"))?;
        info!(
            "Timer saved: {} ({}s, {:.2})",
            saved.id,
            saved.duration_seconds.unwrap_or(0),
            saved.billable_amount.unwrap_or(0.0)
        );

        self.clear();
        Ok(saved)
    }

    /// エントリーを破棄する。
    ///
    /// 何も計測していない場合は何もせず`false`を返す。
    /// 経過時間が0秒でもエントリーが存在すれば削除する。
    ///
    /// # Errors
    ///
    /// * 削除に失敗した場合は`TimerError::Persistence`
    pub async fn reset(&mut self) -> Result<bool, TimerError> {
        if self.state.phase != TimerPhase::Running
            && self.state.elapsed_seconds == 0
            && self.state.entry_id.is_none()
        {
            return Ok(false);
        }

        if let Some(entry_id) = self.state.entry_id.clone() {
            self.repository
                .delete_timer(&entry_id)
                .await
                .map_err(TimerError::persistence("reset"))?;
            info!("Timer reset: {}", entry_id);
        }

        self.clear();
        Ok(true)
    }

    /// リモートの状態を確認し、ローカルの状態と食い違っていればリモートの状態を取り込む。
    ///
    /// 同じエントリーが実行中のままであれば、表示のちらつきを避けるため経過時間は上書きしない。
    /// 問い合わせの失敗はログに出力するのみで、状態は変更しない。
    pub async fn reconcile(&mut self) -> ReconcileOutcome {
        let running = match self.repository.get_running_timer().await {
            Ok(running) => running,
            Err(err) => return self.poll_failed(err),
        };

        if let Some(running) = running {
            if self.state.phase == TimerPhase::Running
                && self.state.entry_id.as_deref() == Some(running.id.as_str())
            {
                return ReconcileOutcome::Unchanged;
            }
            let elapsed = running.elapsed_at(&now());
            info!(
                "Adopting running timer {} from remote ({}s)",
                running.id, elapsed
            );
            self.adopt(&running, TimerPhase::Running, elapsed);
            return ReconcileOutcome::AdoptedRunning;
        }

        let Some(entry_id) = self.state.entry_id.clone() else {
            if self.state == TimerSnapshot::default() {
                return ReconcileOutcome::Unchanged;
            }
            self.clear();
            return ReconcileOutcome::Cleared;
        };

        match self.repository.get_paused_timer(&entry_id).await {
            Ok(Some(paused)) => {
                let elapsed = paused.elapsed_at(&now());
                if self.state.phase == TimerPhase::Paused {
                    if self.state.elapsed_seconds == elapsed {
                        return ReconcileOutcome::Unchanged;
                    }
                    // メモや時間単価の未保存の変更は残し、経過時間のみリモートに合わせる
                    debug!(
                        "Confirming paused elapsed for {}: local {}s, remote {}s",
                        paused.id, self.state.elapsed_seconds, elapsed
                    );
                    self.state.elapsed_seconds = elapsed;
                    return ReconcileOutcome::AdoptedPaused;
                }
                info!(
                    "Timer {} was paused elsewhere at {}s",
                    paused.id, elapsed
                );
                self.adopt(&paused, TimerPhase::Paused, elapsed);
                ReconcileOutcome::AdoptedPaused
            }
            Ok(None) => {
                info!("Timer {} was stopped elsewhere", entry_id);
                self.clear();
                ReconcileOutcome::Cleared
            }
            Err(err) => self.poll_failed(err),
        }
    }

    /// 起動時にリモートの状態を取り込む。
    ///
    /// 実行中のエントリーがなければ、最後に一時停止したエントリーを一時停止中として取り込む。
    pub async fn restore(&mut self) -> ReconcileOutcome {
        let outcome = self.reconcile().await;
        if outcome == ReconcileOutcome::Failed || self.state.entry_id.is_some() {
            return outcome;
        }

        match self.repository.get_latest_paused_timer().await {
            Ok(Some(paused)) => {
                let elapsed = paused.elapsed_at(&now());
                info!("Restoring paused timer {} ({}s)", paused.id, elapsed);
                self.adopt(&paused, TimerPhase::Paused, elapsed);
                ReconcileOutcome::AdoptedPaused
            }
            Ok(None) => outcome,
            Err(err) => self.poll_failed(err),
        }
    }

    /// 実行中であれば、リモートの開始時刻から求めた経過時間とローカルの経過時間を比較し、
    /// 許容範囲を超えてずれていればリモートの値に合わせる。
    pub async fn correct_drift(&mut self) -> DriftCorrection {
        if self.state.phase != TimerPhase::Running {
            return DriftCorrection::Skipped;
        }

        let running = match self.repository.get_running_timer().await {
            Ok(Some(running)) => running,
            Ok(None) => return DriftCorrection::Skipped,
            Err(err) => {
                self.poll_failed(err);
                return DriftCorrection::Skipped;
            }
        };
        if self.state.entry_id.as_deref() != Some(running.id.as_str()) {
            return DriftCorrection::Skipped;
        }

        let server = running.elapsed_at(&now());
        let local = self.state.elapsed_seconds;
        if (server - local).abs() <= self.drift_tolerance_secs {
            return DriftCorrection::WithinTolerance;
        }

        debug!("Correcting drift: local {}s, remote {}s", local, server);
        self.state.elapsed_seconds = server;
        DriftCorrection::Corrected { local, server }
    }

    fn active_entry_id(&self, expected: TimerPhase) -> Result<String, ValidationError> {
        match (&self.state.entry_id, self.state.phase) {
            (Some(entry_id), phase) if phase == expected => Ok(entry_id.clone()),
            _ => Err(ValidationError::NoActiveEntry),
        }
    }

    fn pending_update(&self) -> TimeEntryUpdate {
        TimeEntryUpdate {
            note: self
                .state
                .note
                .clone()
                .filter(|note| Some(note) != self.persisted.note.as_ref()),
            hourly_rate: self
                .state
                .hourly_rate
                .filter(|rate| Some(*rate) != self.persisted.hourly_rate),
        }
    }

    fn adopt(&mut self, entry: &TimeEntry, phase: TimerPhase, elapsed_seconds: i64) {
        self.state = TimerSnapshot {
            phase,
            entry_id: Some(entry.id.clone()),
            project_id: entry.project_id.clone(),
            project_name: entry.project_name.clone(),
            elapsed_seconds,
            hourly_rate: entry.hourly_rate,
            note: entry.note.clone(),
        };
        self.persisted = TimeEntryUpdate {
            note: entry.note.clone(),
            hourly_rate: entry.hourly_rate,
        };
    }

    fn clear(&mut self) {
        self.state = TimerSnapshot::default();
        self.persisted = TimeEntryUpdate::default();
    }

    fn poll_failed(&self, err: StoreError) -> ReconcileOutcome {
        let err = TimerError::Poll(err);
        debug!("{}: {:?}", err, err);
        ReconcileOutcome::Failed
    }
}
