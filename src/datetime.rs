use chrono::{DateTime, Utc};

#[cfg(not(test))]
/// 現在のUTC時間を取得する。
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `from`から`to`までの経過秒数を返す。
///
/// `to`が`from`より前の場合は0を返す。
pub fn elapsed_seconds(from: &DateTime<Utc>, to: &DateTime<Utc>) -> i64 {
    (*to - *from).num_seconds().max(0)
}


#[cfg(test)]
pub use mock_datetime::now;

#[cfg(test)]
mod tests {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use rstest::rstest;

    use super::{elapsed_seconds, mock_datetime};

    /// 何も設定しない場合は、現在時間が取得できることを確認する。
    ///
    ///  - 現在時刻での比較を行なっているため、ミリ秒単位まで比較するとテストが失敗する可能性があり、秒単位で比較している。
    #[test]
    fn test_now() {
        mock_datetime::clear_mock_time();
        assert_eq!(
            mock_datetime::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }

    /// モック時間を設定した時に、その時間が取得できることを確認する。
    #[test]
    fn test_now_specific_datetime() {
        let datetime = String::from("2024-01-01T00:00:00+00:00");
        mock_datetime::set_mock_time(
            DateTime::parse_from_rfc3339(datetime.as_str())
                .unwrap()
                .to_utc(),
        );

        assert_eq!(mock_datetime::now().to_rfc3339(), datetime);
    }

    /// モック時間を進めた時に、進めた分だけ時間が経過していることを確認する。
    #[test]
    fn test_advance_mock_time() {
        mock_datetime::set_mock_time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        mock_datetime::advance_mock_time(65);

        assert_eq!(
            mock_datetime::now(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 5).unwrap()
        );
    }

    /// モック時間をリセットした時に、現在時間が取得できることを確認する。
    #[test]
    fn test_now_after_clear_mock_time() {
        let datetime = String::from("2024-01-01T00:00:00+00:00");
        mock_datetime::set_mock_time(
            DateTime::parse_from_rfc3339(datetime.as_str())
                .unwrap()
                .to_utc(),
        );
        mock_datetime::clear_mock_time();

        assert_eq!(
            mock_datetime::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }

    #[rstest]
    #[case::forward(0, 90, 90)]
    #[case::same_instant(30, 30, 0)]
    #[case::backward_is_clamped(90, 0, 0)]
    fn test_elapsed_seconds(#[case] from: i64, #[case] to: i64, #[case] expected: i64) {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let from = base + chrono::Duration::seconds(from);
        let to = base + chrono::Duration::seconds(to);

        assert_eq!(elapsed_seconds(&from, &to), expected);
    }
}
