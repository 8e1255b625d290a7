use reqwest::StatusCode;
use thiserror::Error;

/// 永続化層で発生するエラー。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to send request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode request body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Time entry not found: {0}")]
    NotFound(String),

    #[error("Profile not found for the current user")]
    MissingProfile,
}

/// ユーザー操作の入力に関するエラー。永続化層の呼び出し前に検出する。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select a project first")]
    NoProjectSelected,

    #[error("Unknown project: {0}")]
    UnknownProject(String),

    #[error("A timer is already active")]
    TimerAlreadyActive,

    #[error("No time to save")]
    NothingToSave,

    #[error("No timer is active")]
    NoActiveEntry,
}

/// タイマー操作のエラー。
///
/// `Validation`と`Persistence`はユーザーへ通知し、`Poll`はログ出力のみとする。
#[derive(Debug, Error)]
pub enum TimerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to {action} timer")]
    Persistence {
        action: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Failed to poll timer state")]
    Poll(#[source] StoreError),
}

impl TimerError {
    pub(crate) fn persistence(action: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Persistence { action, source }
    }
}
