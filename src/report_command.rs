use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use log::info;

use crate::datetime::now;
use crate::repository::TimeEntryRepository;
use crate::time_entry::{
    billable_amount, calculate_total_billable, calculate_total_duration, TimeEntry,
};

/// 日毎、週毎の作業記録を出力するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct ReportArgs {
    #[clap(
        short = 'd',
        long = "date",
        help = "Sets a custom date in the format YYYY-MM-DD",
        parse(try_from_str = parse_date),
    )]
    date: Option<NaiveDate>,

    #[clap(short = 'w', long = "week", help = "Report the week (Sunday to Saturday) containing the date")]
    week: bool,
}

/// 集計結果。
#[derive(Debug, PartialEq)]
pub struct Report {
    pub entries: Vec<TimeEntry>,
    pub total_seconds: i64,
    pub total_billable: f64,
}

pub struct ReportCommand<'a, T: TimeEntryRepository> {
    repository: &'a T,
}

impl<'a, T: TimeEntryRepository> ReportCommand<'a, T> {
    /// 新しい`ReportCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - タイムエントリーを取得するストア
    pub fn new(repository: &'a T) -> Self {
        Self { repository }
    }

    /// `report`サブコマンドの処理を行う。
    ///
    /// Localタイムゾーンで指定された日(または週)の00:00:00から始まる期間のタイムエントリーを取得し、集計する。
    /// 日付が指定されていない場合は、Localタイムゾーンで現在の日付を利用する。
    ///
    /// # Arguments
    ///
    /// * `args` - `report`サブコマンドの引数
    pub async fn run(&self, args: ReportArgs) -> Result<Report> {
        let date = args
            .date
            .unwrap_or_else(|| now().with_timezone(&Local).date_naive());
        let (start_at, end_at) = report_range(date, args.week)?;
        info!("Start at: {}, End at: {}", start_at, end_at);

        let entries = self
            .repository
            .read_time_entries(&start_at, &end_at)
            .await
            .context("Failed to retrieve time entries")?;
        info!("Time entries retrieved successfully.");

        let (total_seconds, total_billable) = report_totals(&entries, &now());
        Ok(Report {
            entries,
            total_seconds,
            total_billable,
        })
    }
}

/// 集計期間をUTCで返す。週の場合は日曜日から始まる7日間とする。
fn report_range(date: NaiveDate, week: bool) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let (start_date, days) = if week {
        let offset = i64::from(date.weekday().num_days_from_sunday());
        (date - Duration::days(offset), 7)
    } else {
        (date, 1)
    };
    let naive_datetime = start_date
        .and_hms_opt(0, 0, 0)
        .context("Failed to set hour, minute, and second")?;
    let start_at = Local
        .from_local_datetime(&naive_datetime)
        .earliest()
        .context("Failed to convert to DateTime<Local>")?
        .to_utc();

    Ok((start_at, start_at + Duration::days(days)))
}

/// 合計時間と合計請求金額を計算する。
///
/// 終了していないエントリーは現在までの経過時間を含める。
fn report_totals(entries: &[TimeEntry], now: &DateTime<Utc>) -> (i64, f64) {
    let (finished, live): (Vec<TimeEntry>, Vec<TimeEntry>) = entries
        .iter()
        .cloned()
        .partition(|entry| entry.end_time.is_some());

    let live_seconds: i64 = live.iter().map(|entry| entry.elapsed_at(now)).sum();
    let live_billable: f64 = live
        .iter()
        .map(|entry| billable_amount(entry.elapsed_at(now), entry.hourly_rate))
        .sum();

    (
        calculate_total_duration(&finished) + live_seconds,
        calculate_total_billable(&finished) + live_billable,
    )
}

/// 日付をパースする。
fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Failed to parse date: {}", s))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use rstest::rstest;

    use super::{parse_date, report_range, report_totals, ReportArgs, ReportCommand};
    use crate::datetime::mock_datetime;
    use crate::repository::MockTimeEntryRepository;
    use crate::time_entry::fixtures::{paused_entry, running_entry};

    #[tokio::test]
    async fn test_report_command_no_date() {
        let args = ReportArgs {
            date: None,
            week: false,
        };
        let mut repository = MockTimeEntryRepository::new();
        repository
            .expect_read_time_entries()
            .withf(|start_at, end_at| *end_at - *start_at == Duration::days(1))
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let command = ReportCommand::new(&repository);
        let report = command.run(args).await.unwrap();

        assert!(report.entries.is_empty());
        assert_eq!(report.total_seconds, 0);
    }

    #[tokio::test]
    async fn test_report_command_week() {
        let args = ReportArgs {
            date: Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            week: true,
        };
        let mut repository = MockTimeEntryRepository::new();
        repository
            .expect_read_time_entries()
            .withf(|start_at, end_at| *end_at - *start_at == Duration::days(7))
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let command = ReportCommand::new(&repository);
        let result = command.run(args).await;

        assert!(result.is_ok());
    }

    /// 週の集計は日曜日から始まる。2024-05-01は水曜日。
    #[rstest]
    #[case::wednesday(2024, 5, 1, 2024, 4, 28)]
    #[case::sunday(2024, 4, 28, 2024, 4, 28)]
    #[case::saturday(2024, 5, 4, 2024, 4, 28)]
    fn test_report_range_week_starts_on_sunday(
        #[case] y: i32,
        #[case] m: u32,
        #[case] d: u32,
        #[case] ey: i32,
        #[case] em: u32,
        #[case] ed: u32,
    ) {
        let (start_at, _) = report_range(NaiveDate::from_ymd_opt(y, m, d).unwrap(), true).unwrap();
        let (expected, _) =
            report_range(NaiveDate::from_ymd_opt(ey, em, ed).unwrap(), false).unwrap();

        assert_eq!(start_at, expected);
    }

    #[test]
    fn test_report_totals_include_live_entries() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        mock_datetime::set_mock_time(start + Duration::hours(3));
        let mut finished = running_entry("e1", start);
        finished.is_running = false;
        finished.end_time = Some(start + Duration::hours(1));
        finished.duration_seconds = Some(3600);
        finished.billable_amount = Some(100.0);
        let mut running = running_entry("e2", start + Duration::hours(2));
        running.hourly_rate = Some(60.0);
        let paused = paused_entry(
            "e3",
            start + Duration::minutes(90),
            start + Duration::minutes(100),
        );

        let (seconds, billable) =
            report_totals(&[finished, running, paused], &mock_datetime::now());

        assert_eq!(seconds, 3600 + 3600 + 600);
        assert_eq!(billable, 160.0);
    }

    #[rstest]
    #[case("2024-05-01", true)]
    #[case("2024/05/01", false)]
    #[case("yesterday", false)]
    fn test_parse_date(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(parse_date(input).is_ok(), ok);
    }
}
