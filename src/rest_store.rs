use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::datetime::now;
use crate::error::StoreError;
use crate::repository::TimeEntryRepository;
use crate::time_entry::{NewTimeEntry, Project, TimeEntry, TimeEntryUpdate};

const TIME_ENTRIES: &str = "time_entries";
const PROJECTS: &str = "projects";
const PROFILES: &str = "profiles";

/// プロフィールのうち、テナントの識別に必要な項目。
#[derive(Debug, Deserialize)]
struct ProfileRow {
    account_id: String,
}

/// PostgRESTのAPIでタイムエントリーを読み書きするクライアント。
///
/// 全ての問い合わせはログイン中のユーザー(`user_id`)のエントリーに限定する。
///
/// # Examples
///
/// ```
/// let store = RestTimeEntryStore::new(Config::load()?)?;
/// let running = store.get_running_timer().await?;
/// ```
pub struct RestTimeEntryStore {
    client: Client,
    api_url: String,
    api_key: String,
    access_token: String,
    user_id: String,
    account_id: OnceCell<String>,
}

impl RestTimeEntryStore {
    /// 新しい`RestTimeEntryStore`を返す。
    ///
    /// `account_id`が設定されていない場合は、最初の書き込み時にプロフィールから取得する。
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            api_url: config.api_url,
            api_key: config.api_key,
            access_token: config.access_token,
            user_id: config.user_id,
            account_id: OnceCell::new_with(config.account_id),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.api_url, table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, "application/json")
    }

    /// 書き込み後の行を返すよう指定したリクエストを作成する。
    fn write(&self, method: Method, entry_id: &str) -> RequestBuilder {
        self.request(method, TIME_ENTRIES)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", entry_id))])
    }

    /// エントリーを1件更新し、更新後の行を返す。
    async fn patch(&self, entry_id: &str, body: serde_json::Value) -> Result<TimeEntry, StoreError> {
        let rows: Vec<TimeEntry> = send(self.write(Method::PATCH, entry_id).json(&body)).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))
    }

    async fn read_entry(&self, entry_id: &str) -> Result<TimeEntry, StoreError> {
        let rows: Vec<TimeEntry> = send(
            self.request(Method::GET, TIME_ENTRIES)
                .query(&[("id", format!("eq.{}", entry_id))])
                .query(&[("limit", "1")]),
        )
        .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))
    }

    async fn account_id(&self) -> Result<&String, StoreError> {
        self.account_id
            .get_or_try_init(|| async {
                let profiles: Vec<ProfileRow> = send(
                    self.request(Method::GET, PROFILES)
                        .query(&[("select", "account_id")])
                        .query(&[("user_id", format!("eq.{}", self.user_id))]),
                )
                .await?;
                let profile = profiles
                    .into_iter()
                    .next()
                    .ok_or(StoreError::MissingProfile)?;
                debug!("Resolved account id {} from profile", profile.account_id);
                Ok::<_, StoreError>(profile.account_id)
            })
            .await
    }

    fn user_filter(&self) -> (&'static str, String) {
        ("user_id", format!("eq.{}", self.user_id))
    }
}

/// リクエストを送信し、レスポンスをデシリアライズする。
async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, StoreError> {
    let response = check_status(request.send().await?).await?;
    Ok(response.json::<T>().await?)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status { status, body })
}

#[async_trait]
impl TimeEntryRepository for RestTimeEntryStore {
    async fn start_timer(&self, entry: NewTimeEntry) -> Result<TimeEntry, StoreError> {
        let account_id = self.account_id().await?.clone();
        if let Some(running) = self.get_running_timer().await? {
            info!("Stopping running entry {} before starting a new one", running.id);
            self.stop_timer(&running.id).await?;
        }

        let body = json!({
            "account_id": account_id,
            "user_id": self.user_id,
            "project_id": entry.project_id,
            "project_name": entry.project_name,
            "hourly_rate": entry.hourly_rate,
            "note": entry.note,
            "start_time": now(),
            "is_running": true,
        });
        let rows: Vec<TimeEntry> = send(
            self.request(Method::POST, TIME_ENTRIES)
                .header("Prefer", "return=representation")
                .json(&body),
        )
        .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(entry.project_id))
    }

    async fn pause_timer(&self, entry_id: &str) -> Result<(), StoreError> {
        self.patch(
            entry_id,
            json!({ "is_running": false, "updated_at": now() }),
        )
        .await?;
        Ok(())
    }

    async fn resume_timer(&self, entry_id: &str, elapsed_seconds: i64) -> Result<(), StoreError> {
        let start_time = now() - chrono::Duration::seconds(elapsed_seconds);
        self.patch(
            entry_id,
            json!({ "is_running": true, "start_time": start_time }),
        )
        .await?;
        Ok(())
    }

    async fn stop_timer(&self, entry_id: &str) -> Result<TimeEntry, StoreError> {
        let entry = self.read_entry(entry_id).await?;
        let finalization = entry.finalize(now());

        self.patch(
            entry_id,
            json!({
                "end_time": finalization.end_time,
                "duration_seconds": finalization.duration_seconds,
                "billable_amount": finalization.billable_amount,
                "is_running": false,
            }),
        )
        .await
    }

    async fn delete_timer(&self, entry_id: &str) -> Result<(), StoreError> {
        check_status(
            self.request(Method::DELETE, TIME_ENTRIES)
                .query(&[("id", format!("eq.{}", entry_id))])
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn get_running_timer(&self) -> Result<Option<TimeEntry>, StoreError> {
        let rows: Vec<TimeEntry> = send(
            self.request(Method::GET, TIME_ENTRIES)
                .query(&[self.user_filter()])
                .query(&[
                    ("is_running", "eq.true"),
                    ("order", "start_time.desc"),
                    ("limit", "1"),
                ]),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn get_paused_timer(&self, entry_id: &str) -> Result<Option<TimeEntry>, StoreError> {
        let rows: Vec<TimeEntry> = send(
            self.request(Method::GET, TIME_ENTRIES)
                .query(&[self.user_filter(), ("id", format!("eq.{}", entry_id))])
                .query(&[
                    ("is_running", "eq.false"),
                    ("end_time", "is.null"),
                    ("limit", "1"),
                ]),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn get_latest_paused_timer(&self) -> Result<Option<TimeEntry>, StoreError> {
        let rows: Vec<TimeEntry> = send(
            self.request(Method::GET, TIME_ENTRIES)
                .query(&[self.user_filter()])
                .query(&[
                    ("is_running", "eq.false"),
                    ("end_time", "is.null"),
                    ("order", "start_time.desc"),
                    ("limit", "1"),
                ]),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_timer(
        &self,
        entry_id: &str,
        update: TimeEntryUpdate,
    ) -> Result<TimeEntry, StoreError> {
        let body = serde_json::to_value(&update)?;
        self.patch(entry_id, body).await
    }

    async fn read_projects(&self) -> Result<Vec<Project>, StoreError> {
        send(
            self.request(Method::GET, PROJECTS)
                .query(&[("select", "id,name"), ("order", "name.asc")]),
        )
        .await
    }

    async fn read_time_entries(
        &self,
        start_at: &DateTime<Utc>,
        end_at: &DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        let entries: Vec<TimeEntry> = send(
            self.request(Method::GET, TIME_ENTRIES)
                .query(&[
                    self.user_filter(),
                    ("start_time", format!("gte.{}", start_at.to_rfc3339())),
                    ("start_time", format!("lte.{}", end_at.to_rfc3339())),
                    ("order", "start_time.desc".to_string()),
                ]),
        )
        .await?;
        info!("length of time entries: {}", entries.len());
        Ok(entries)
    }
}
