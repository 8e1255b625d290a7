use std::{env, fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;

const ENV_API_URL: &str = "WORKTIMER_API_URL";
const ENV_API_KEY: &str = "WORKTIMER_API_KEY";
const ENV_ACCESS_TOKEN: &str = "WORKTIMER_ACCESS_TOKEN";
const ENV_USER_ID: &str = "WORKTIMER_USER_ID";
const ENV_ACCOUNT_ID: &str = "WORKTIMER_ACCOUNT_ID";
const ENV_POLL_SECS: &str = "WORKTIMER_POLL_SECS";
const ENV_DRIFT_SECS: &str = "WORKTIMER_DRIFT_SECS";
const ENV_DRIFT_TOLERANCE_SECS: &str = "WORKTIMER_DRIFT_TOLERANCE_SECS";

/// 設定ファイルの内容。全ての項目は環境変数で上書きできる。
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    api_url: Option<String>,
    api_key: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
    account_id: Option<String>,
}

/// リモートストアへの接続設定。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub api_key: String,
    pub access_token: String,
    pub user_id: String,
    /// 未設定の場合はプロフィールから取得する。
    pub account_id: Option<String>,
}

impl Config {
    /// 環境変数と設定ファイルから設定を読み込む。
    ///
    /// 環境変数が優先され、設定されていない項目は`<config_dir>/worktimer/config.json`の値を利用する。
    pub fn load() -> Result<Self> {
        let file = match config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            _ => FileConfig::default(),
        };

        Self::from_sources(|key| env::var(key).ok(), file)
    }

    fn from_sources(lookup: impl Fn(&str) -> Option<String>, file: FileConfig) -> Result<Self> {
        let api_url = lookup(ENV_API_URL)
            .or(file.api_url)
            .with_context(|| format!("{} must be set", ENV_API_URL))?;
        let api_key = lookup(ENV_API_KEY)
            .or(file.api_key)
            .with_context(|| format!("{} must be set", ENV_API_KEY))?;
        let access_token = lookup(ENV_ACCESS_TOKEN)
            .or(file.access_token)
            .unwrap_or_else(|| api_key.clone());
        let user_id = lookup(ENV_USER_ID)
            .or(file.user_id)
            .with_context(|| format!("{} must be set", ENV_USER_ID))?;
        let account_id = lookup(ENV_ACCOUNT_ID).or(file.account_id);

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            access_token,
            user_id,
            account_id,
        })
    }
}

/// 設定ファイルのパスを返す。
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("worktimer").join("config.json"))
}

/// タイマーの同期間隔に関する設定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerSettings {
    /// 表示上の経過時間を1秒進める間隔。
    pub tick_interval: Duration,
    /// リモートの状態を確認する間隔。
    pub poll_interval: Duration,
    /// ずれを補正する間隔。
    pub drift_interval: Duration,
    /// この秒数を超えてずれた場合に補正する。
    pub drift_tolerance_secs: i64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            drift_interval: Duration::from_secs(10),
            drift_tolerance_secs: 2,
        }
    }
}

impl TimerSettings {
    /// 環境変数から設定を読み込む。設定されていない項目は既定値を利用する。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let seconds = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid {} value: {}", key, value)),
                None => {
                    debug!("{} not set, using default: {}", key, default);
                    Ok(default)
                }
            }
        };

        let poll_secs = seconds(ENV_POLL_SECS, defaults.poll_interval.as_secs())?;
        let drift_secs = seconds(ENV_DRIFT_SECS, defaults.drift_interval.as_secs())?;
        let tolerance = seconds(
            ENV_DRIFT_TOLERANCE_SECS,
            defaults.drift_tolerance_secs.unsigned_abs(),
        )?;
        anyhow::ensure!(poll_secs > 0, "{} must be positive", ENV_POLL_SECS);
        anyhow::ensure!(drift_secs > 0, "{} must be positive", ENV_DRIFT_SECS);

        Ok(Self {
            poll_interval: Duration::from_secs(poll_secs),
            drift_interval: Duration::from_secs(drift_secs),
            drift_tolerance_secs: i64::try_from(tolerance)
                .with_context(|| format!("Invalid {} value: {}", ENV_DRIFT_TOLERANCE_SECS, tolerance))?,
            ..defaults
        })
    }
}
