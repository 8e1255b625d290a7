use std::future::pending;

use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::TimerSettings;
use crate::reconciler::{DriftCorrection, TimerPhase, TimerReconciler, TimerSnapshot};
use crate::repository::TimeEntryRepository;
use crate::time_entry::{format_duration, Project};

const COMMAND_BUFFER: usize = 16;

/// ユーザーからの操作。
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Start {
        project: Option<Project>,
        hourly_rate: Option<f64>,
        note: Option<String>,
    },
    Pause,
    Resume,
    Save,
    Reset,
    SetNote(Option<String>),
    SetHourlyRate(Option<f64>),
    Shutdown,
}

/// ユーザーへの通知。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

/// 実行中のタイマーとやり取りするためのハンドル。
pub struct DriverHandle {
    pub commands: mpsc::Sender<Command>,
    pub snapshots: watch::Receiver<TimerSnapshot>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

/// 実行中の間だけ保持する周期タイマー。
///
/// 実行中でなくなった時点で破棄し、刻みとずれ補正を止める。
struct RunningIntervals {
    tick: Interval,
    drift: Interval,
}

enum RunningEvent {
    Tick,
    Drift,
}

impl RunningIntervals {
    fn start(settings: &TimerSettings) -> Self {
        let now = Instant::now();
        let mut drift = interval_at(now + settings.drift_interval, settings.drift_interval);
        drift.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            tick: interval_at(now + settings.tick_interval, settings.tick_interval),
            drift,
        }
    }

    async fn next(&mut self) -> RunningEvent {
        tokio::select! {
            _ = self.tick.tick() => RunningEvent::Tick,
            _ = self.drift.tick() => RunningEvent::Drift,
        }
    }
}

async fn next_running_event(running: &mut Option<RunningIntervals>) -> RunningEvent {
    match running {
        Some(intervals) => intervals.next().await,
        None => pending().await,
    }
}

/// タイマーのイベントループ。
///
/// 1秒ごとの刻み、定期的なリモートとの照合、ずれ補正、ユーザー操作を1つのタスクで順に処理する。
pub struct TimerDriver<R: TimeEntryRepository> {
    reconciler: TimerReconciler<R>,
    settings: TimerSettings,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<TimerSnapshot>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl<R: TimeEntryRepository> TimerDriver<R> {
    /// 新しい`TimerDriver`と、操作用の`DriverHandle`を返す。
    pub fn new(reconciler: TimerReconciler<R>, settings: TimerSettings) -> (Self, DriverHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(reconciler.snapshot().clone());
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let driver = Self {
            reconciler,
            settings,
            commands: command_rx,
            snapshots: snapshot_tx,
            notices: notice_tx,
        };
        let handle = DriverHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            notices: notice_rx,
        };
        (driver, handle)
    }

    /// `Command::Shutdown`を受け取るか、全ての`Sender`が破棄されるまでイベントを処理する。
    ///
    /// 終了時に`TimerReconciler`を返す。
    pub async fn run(mut self) -> TimerReconciler<R> {
        self.reconciler.restore().await;
        let mut poll = interval_at(
            Instant::now() + self.settings.poll_interval,
            self.settings.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut running: Option<RunningIntervals> = None;
        let mut queued: Option<Command> = None;
        self.sync_intervals(&mut running);
        self.publish();

        loop {
            let command = match queued.take() {
                Some(command) => Some(command),
                None => tokio::select! {
                    command = self.commands.recv() => match command {
                        Some(command) => Some(command),
                        None => break,
                    },
                    _ = poll.tick() => {
                        self.reconciler.reconcile().await;
                        None
                    }
                    event = next_running_event(&mut running) => {
                        match event {
                            RunningEvent::Tick => self.reconciler.tick(),
                            RunningEvent::Drift => {
                                if let DriftCorrection::Corrected { local, server } =
                                    self.reconciler.correct_drift().await
                                {
                                    debug!("Drift corrected from {}s to {}s", local, server);
                                }
                            }
                        }
                        None
                    }
                },
            };

            if let Some(command) = command {
                if command == Command::Shutdown {
                    break;
                }
                self.handle(command.clone()).await;
                queued = self.skip_duplicates(&command);
            }
            self.sync_intervals(&mut running);
            self.publish();
        }

        debug!("Timer driver stopped");
        self.reconciler
    }

    async fn handle(&mut self, command: Command) {
        let result = match command {
            Command::Start {
                project,
                hourly_rate,
                note,
            } => self
                .reconciler
                .start(project, hourly_rate, note)
                .await
                .map(|snapshot| format!("Timer started: {}", snapshot.project_name)),
            Command::Pause => self
                .reconciler
                .pause()
                .await
                .map(|_| "Timer paused".to_string()),
            Command::Resume => self
                .reconciler
                .resume()
                .await
                .map(|_| "Timer resumed".to_string()),
            Command::Save => self.reconciler.save().await.map(|entry| {
                format!(
                    "Time entry saved: {}",
                    format_duration(entry.duration_seconds.unwrap_or(0))
                )
            }),
            Command::Reset => self.reconciler.reset().await.map(|reset| {
                if reset {
                    "Timer reset".to_string()
                } else {
                    "Nothing to reset".to_string()
                }
            }),
            Command::SetNote(note) => {
                self.reconciler.set_note(note);
                return;
            }
            Command::SetHourlyRate(hourly_rate) => {
                self.reconciler.set_hourly_rate(hourly_rate);
                return;
            }
            Command::Shutdown => return,
        };

        let notice = match result {
            Ok(message) => Notice::Info(message),
            Err(err) => {
                warn!("{}", err);
                Notice::Error(err.to_string())
            }
        };
        let _ = self.notices.send(notice);
    }

    /// 処理中に重ねて送られた同じ操作を読み捨て、次に処理すべき操作を返す。
    fn skip_duplicates(&mut self, handled: &Command) -> Option<Command> {
        while let Ok(next) = self.commands.try_recv() {
            if next != *handled {
                return Some(next);
            }
            debug!("Dropping duplicate command: {:?}", next);
        }
        None
    }

    fn sync_intervals(&self, running: &mut Option<RunningIntervals>) {
        match (self.reconciler.phase(), running.is_some()) {
            (TimerPhase::Running, false) => {
                debug!("Acquiring timer intervals");
                *running = Some(RunningIntervals::start(&self.settings));
            }
            (TimerPhase::Idle | TimerPhase::Paused, true) => {
                debug!("Releasing timer intervals");
                *running = None;
            }
            _ => {}
        }
    }

    fn publish(&self) {
        let snapshot = self.reconciler.snapshot();
        self.snapshots.send_if_modified(|current| {
            if current == snapshot {
                return false;
            }
            *current = snapshot.clone();
            true
        });
    }
}
