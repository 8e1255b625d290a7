use anyhow::{bail, Context, Result};
use log::info;

use crate::error::ValidationError;
use crate::reconciler::{ReconcileOutcome, TimerReconciler, TimerSnapshot};
use crate::repository::TimeEntryRepository;
use crate::time_entry::{Project, TimeEntry};

/// タイマーを開始するサブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct StartArgs {
    #[clap(short = 'p', long = "project", help = "Project id or name")]
    pub project: String,

    #[clap(short = 'r', long = "rate", help = "Hourly rate for this entry")]
    pub rate: Option<f64>,

    #[clap(short = 'n', long = "note", help = "Note for this entry")]
    pub note: Option<String>,
}

/// タイマーを保存するサブコマンドの引数。保存前にメモや時間単価を変更できる。
#[derive(Debug, clap::Args)]
pub struct SaveArgs {
    #[clap(short = 'r', long = "rate", help = "Overrides the hourly rate before saving")]
    pub rate: Option<f64>,

    #[clap(short = 'n', long = "note", help = "Overrides the note before saving")]
    pub note: Option<String>,
}

/// 1回だけ実行するタイマー操作。
#[derive(Debug)]
pub enum TimerAction {
    Status,
    Start(StartArgs),
    Pause,
    Resume,
    Save(SaveArgs),
    Reset,
}

/// タイマー操作の結果。
#[derive(Debug, PartialEq)]
pub enum TimerOutcome {
    Snapshot(TimerSnapshot),
    Saved(TimeEntry),
    /// 破棄したエントリーがあった場合は`true`。
    Reset(bool),
}

pub struct TimerCommand<R: TimeEntryRepository> {
    reconciler: TimerReconciler<R>,
}

impl<R: TimeEntryRepository> TimerCommand<R> {
    /// 新しい`TimerCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - タイムエントリーを保存するストア
    /// * `drift_tolerance_secs` - ずれ補正を行う閾値(秒)
    pub fn new(repository: R, drift_tolerance_secs: i64) -> Self {
        Self {
            reconciler: TimerReconciler::new(repository, drift_tolerance_secs),
        }
    }

    /// リモートの状態を取り込んだ上でタイマー操作を行う。
    ///
    /// # Arguments
    ///
    /// * `action` - 実行する操作
    pub async fn run(&mut self, action: TimerAction) -> Result<TimerOutcome> {
        if self.reconciler.restore().await == ReconcileOutcome::Failed {
            bail!("Failed to load the current timer. Run with -vv for details.");
        }
        info!("Current timer: {:?}", self.reconciler.phase());

        let outcome = match action {
            TimerAction::Status => TimerOutcome::Snapshot(self.reconciler.snapshot().clone()),
            TimerAction::Start(args) => {
                let projects = self
                    .reconciler
                    .repository()
                    .read_projects()
                    .await
                    .context("Failed to retrieve projects")?;
                let project = find_project(&projects, &args.project)?;
                let snapshot = self
                    .reconciler
                    .start(Some(project), args.rate, args.note)
                    .await?;
                TimerOutcome::Snapshot(snapshot.clone())
            }
            TimerAction::Pause => TimerOutcome::Snapshot(self.reconciler.pause().await?.clone()),
            TimerAction::Resume => TimerOutcome::Snapshot(self.reconciler.resume().await?.clone()),
            TimerAction::Save(args) => {
                if args.rate.is_some() {
                    self.reconciler.set_hourly_rate(args.rate);
                }
                if args.note.is_some() {
                    self.reconciler.set_note(args.note);
                }
                TimerOutcome::Saved(self.reconciler.save().await?)
            }
            TimerAction::Reset => TimerOutcome::Reset(self.reconciler.reset().await?),
        };

        Ok(outcome)
    }
}

/// idもしくは名前(大文字小文字を区別しない)が一致するプロジェクトを返す。
pub fn find_project(projects: &[Project], key: &str) -> Result<Project, ValidationError> {
    projects
        .iter()
        .find(|project| project.id == key)
        .or_else(|| {
            projects
                .iter()
                .find(|project| project.name.eq_ignore_ascii_case(key))
        })
        .cloned()
        .ok_or_else(|| ValidationError::UnknownProject(key.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use reqwest::StatusCode;
    use rstest::rstest;

    use super::{find_project, SaveArgs, StartArgs, TimerAction, TimerCommand, TimerOutcome};
    use crate::datetime::mock_datetime;
    use crate::error::{StoreError, ValidationError};
    use crate::memory_store::MemoryTimeEntryStore;
    use crate::reconciler::TimerPhase;
    use crate::repository::MockTimeEntryRepository;
    use crate::time_entry::Project;

    fn projects() -> Vec<Project> {
        vec![
            Project {
                id: "p1".to_string(),
                name: "Website Redesign".to_string(),
            },
            Project {
                id: "p2".to_string(),
                name: "Mobile App".to_string(),
            },
        ]
    }

    fn start_args(project: &str, rate: Option<f64>) -> StartArgs {
        StartArgs {
            project: project.to_string(),
            rate,
            note: None,
        }
    }

    async fn run(store: &MemoryTimeEntryStore, action: TimerAction) -> TimerOutcome {
        TimerCommand::new(store.clone(), 2).run(action).await.unwrap()
    }

    /// 別々のプロセスから開始、一時停止、再開、保存しても経過時間が引き継がれる。
    #[tokio::test]
    async fn test_session_across_invocations() {
        mock_datetime::set_mock_time(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let store = MemoryTimeEntryStore::with_projects(projects());

        run(&store, TimerAction::Start(start_args("p1", Some(120.0)))).await;
        mock_datetime::advance_mock_time(65);
        let TimerOutcome::Snapshot(paused) = run(&store, TimerAction::Pause).await else {
            panic!("expected snapshot");
        };
        assert_eq!(paused.phase, TimerPhase::Paused);
        assert_eq!(paused.elapsed_seconds, 65);

        mock_datetime::advance_mock_time(600);
        let TimerOutcome::Snapshot(resumed) = run(&store, TimerAction::Resume).await else {
            panic!("expected snapshot");
        };
        assert_eq!(resumed.phase, TimerPhase::Running);
        assert_eq!(resumed.elapsed_seconds, 65);

        mock_datetime::advance_mock_time(10);
        let TimerOutcome::Saved(saved) = run(
            &store,
            TimerAction::Save(SaveArgs {
                rate: None,
                note: Some("hero section".to_string()),
            }),
        )
        .await
        else {
            panic!("expected saved entry");
        };
        assert_eq!(saved.duration_seconds, Some(75));
        assert_eq!(saved.billable_amount, Some(2.5));
        assert_eq!(saved.note.as_deref(), Some("hero section"));

        assert_eq!(
            run(&store, TimerAction::Status).await,
            TimerOutcome::Snapshot(Default::default())
        );
    }

    #[tokio::test]
    async fn test_start_by_project_name() {
        let store = MemoryTimeEntryStore::with_projects(projects());

        let TimerOutcome::Snapshot(snapshot) =
            run(&store, TimerAction::Start(start_args("mobile app", None))).await
        else {
            panic!("expected snapshot");
        };

        assert_eq!(snapshot.project_id.as_deref(), Some("p2"));
        assert_eq!(snapshot.project_name, "Mobile App");
    }

    #[tokio::test]
    async fn test_start_unknown_project() {
        let store = MemoryTimeEntryStore::with_projects(projects());

        let err = TimerCommand::new(store.clone(), 2)
            .run(TimerAction::Start(start_args("p9", None)))
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::UnknownProject("p9".to_string()))
        );
        assert!(store.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_reset() {
        let store = MemoryTimeEntryStore::with_projects(projects());
        run(&store, TimerAction::Start(start_args("p1", None))).await;

        assert_eq!(run(&store, TimerAction::Reset).await, TimerOutcome::Reset(true));
        assert!(store.entries().await.is_empty());
        assert_eq!(run(&store, TimerAction::Reset).await, TimerOutcome::Reset(false));
    }

    #[tokio::test]
    async fn test_save_without_entry() {
        let store = MemoryTimeEntryStore::with_projects(projects());

        let err = TimerCommand::new(store, 2)
            .run(TimerAction::Save(SaveArgs {
                rate: None,
                note: None,
            }))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("No time to save"));
    }

    /// リモートの状態を取得できない場合は操作しない。
    #[tokio::test]
    async fn test_run_fails_when_remote_unavailable() {
        let mut repository = MockTimeEntryRepository::new();
        repository.expect_get_running_timer().times(1).returning(|| {
            Err(StoreError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "down".to_string(),
            })
        });

        let result = TimerCommand::new(repository, 2).run(TimerAction::Pause).await;

        assert!(result.is_err());
    }

    #[rstest]
    #[case::by_id("p1", Ok("p1"))]
    #[case::by_name("Website Redesign", Ok("p1"))]
    #[case::case_insensitive("website redesign", Ok("p1"))]
    #[case::unknown("Logo", Err(ValidationError::UnknownProject("Logo".to_string())))]
    fn test_find_project(#[case] key: &str, #[case] expected: Result<&str, ValidationError>) {
        let result = find_project(&projects(), key).map(|project| project.id);

        assert_eq!(result, expected.map(str::to_string));
    }
}
