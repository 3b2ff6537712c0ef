//! Forecast runs and the remote files that hold them.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{IngestionError, Result};

/// Object key layout of the NOAA HRRR archive.
pub const DEFAULT_KEY_TEMPLATE: &str = "hrrr.{date}/conus/hrrr.t{cycle}z.{file_type}f{hour:02}.grib2";

/// One forecast snapshot: a run date, its cycle hour, and the forecast offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForecastRunKey {
    pub run_date: NaiveDate,
    /// UTC hour the model run started (0-23)
    pub cycle: u8,
    pub forecast_hour: u32,
}

impl ForecastRunKey {
    pub fn new(run_date: NaiveDate, cycle: u8, forecast_hour: u32) -> Self {
        Self {
            run_date,
            cycle,
            forecast_hour,
        }
    }

    /// Two-digit cycle, e.g. "06".
    pub fn cycle_str(&self) -> String {
        format!("{:02}", self.cycle)
    }

    /// Start of the model run.
    pub fn reference_time(&self) -> DateTime<Utc> {
        let midnight = self.run_date.and_time(NaiveTime::default());
        Utc.from_utc_datetime(&midnight) + Duration::hours(self.cycle as i64)
    }

    /// Time the forecast is valid for.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.reference_time() + Duration::hours(self.forecast_hour as i64)
    }

    /// Render an object key from a template with `{date}`, `{cycle}`,
    /// `{file_type}`, `{hour}` and `{hour:02}` placeholders.
    pub fn object_key(&self, template: &str, file_type: &str) -> String {
        template
            .replace("{date}", &self.run_date.format("%Y%m%d").to_string())
            .replace("{cycle}", &self.cycle_str())
            .replace("{file_type}", file_type)
            .replace("{hour:02}", &format!("{:02}", self.forecast_hour))
            .replace("{hour}", &self.forecast_hour.to_string())
    }
}

impl fmt::Display for ForecastRunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{:02}z/f{:02}",
            self.run_date.format("%Y%m%d"),
            self.cycle,
            self.forecast_hour
        )
    }
}

/// Parse a `YYYYMMDD` run date.
pub fn parse_run_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").map_err(|_| {
        IngestionError::InvalidConfig(format!("invalid run date {:?}, expected YYYYMMDD", s))
    })
}

/// The day before `now`, which is the newest run that is reliably complete.
pub fn default_run_date(now: DateTime<Utc>) -> NaiveDate {
    (now - Duration::days(1)).date_naive()
}

/// Parse a cycle hour, "6" or "06".
pub fn parse_cycle(s: &str) -> Result<u8> {
    match s.trim().parse::<u8>() {
        Ok(cycle) if cycle <= 23 => Ok(cycle),
        _ => Err(IngestionError::InvalidConfig(format!(
            "invalid cycle {:?}, expected 00-23",
            s
        ))),
    }
}

/// Parse `a-b` (inclusive) or a comma list into sorted, distinct hours.
pub fn parse_forecast_hours(s: &str) -> Result<Vec<u32>> {
    let invalid = || {
        IngestionError::InvalidConfig(format!(
            "invalid forecast hours {:?}, expected a range like 0-15 or a list like 0,3,6",
            s
        ))
    };

    let s = s.trim();
    let mut hours: Vec<u32> = if let Some((start, end)) = s.split_once('-') {
        let start: u32 = start.trim().parse().map_err(|_| invalid())?;
        let end: u32 = end.trim().parse().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        (start..=end).collect()
    } else {
        s.split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| h.parse().map_err(|_| invalid()))
            .collect::<Result<_>>()?
    };

    hours.sort_unstable();
    hours.dedup();
    if hours.is_empty() {
        return Err(invalid());
    }
    Ok(hours)
}

/// Every file to fetch: `1 + num_hours / 24` daily runs counting back from
/// `run_date`, newest first, each with every forecast hour in ascending order.
pub fn plan_runs(
    run_date: NaiveDate,
    num_hours: u32,
    cycle: u8,
    forecast_hours: &[u32],
) -> Vec<ForecastRunKey> {
    let num_runs = 1 + num_hours / 24;
    let mut hours = forecast_hours.to_vec();
    hours.sort_unstable();
    hours.dedup();

    (0..num_runs)
        .filter_map(|back| run_date.checked_sub_signed(Duration::days(back as i64)))
        .flat_map(|date| {
            hours
                .iter()
                .map(move |&hour| ForecastRunKey::new(date, cycle, hour))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_object_key() {
        let key = ForecastRunKey::new(date(2024, 1, 1), 6, 5);
        assert_eq!(
            key.object_key(DEFAULT_KEY_TEMPLATE, "wrfsfc"),
            "hrrr.20240101/conus/hrrr.t06z.wrfsfcf05.grib2"
        );
        assert_eq!(key.to_string(), "20240101/06z/f05");
    }

    #[test]
    fn test_reference_and_valid_time() {
        let key = ForecastRunKey::new(date(2024, 1, 1), 6, 20);
        assert_eq!(
            key.reference_time(),
            Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap()
        );
        assert_eq!(
            key.valid_time(),
            Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_plan_runs_counts_back_newest_first() {
        let plan = plan_runs(date(2024, 3, 1), 48, 6, &[2, 0, 1]);
        // 1 + 48 / 24 = 3 runs
        assert_eq!(plan.len(), 9);
        assert_eq!(plan[0], ForecastRunKey::new(date(2024, 3, 1), 6, 0));
        assert_eq!(plan[2], ForecastRunKey::new(date(2024, 3, 1), 6, 2));
        assert_eq!(plan[3].run_date, date(2024, 2, 29));
        assert_eq!(plan[8], ForecastRunKey::new(date(2024, 2, 28), 6, 2));
    }

    #[test]
    fn test_plan_runs_single_day() {
        assert_eq!(plan_runs(date(2024, 1, 1), 0, 6, &[5]).len(), 1);
        assert_eq!(plan_runs(date(2024, 1, 1), 23, 6, &[5]).len(), 1);
        assert_eq!(plan_runs(date(2024, 1, 1), 24, 6, &[5]).len(), 2);
    }

    #[test]
    fn test_parse_forecast_hours() {
        assert_eq!(parse_forecast_hours("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_forecast_hours("6, 0,3,3").unwrap(), vec![0, 3, 6]);
        assert_eq!(parse_forecast_hours("5").unwrap(), vec![5]);
        assert!(parse_forecast_hours("4-2").is_err());
        assert!(parse_forecast_hours("").is_err());
        assert!(parse_forecast_hours("a-b").is_err());
    }

    #[test]
    fn test_parse_run_date_and_cycle() {
        assert_eq!(parse_run_date("20240101").unwrap(), date(2024, 1, 1));
        assert!(parse_run_date("2024-01-01").is_err());
        assert_eq!(parse_cycle("06").unwrap(), 6);
        assert_eq!(parse_cycle("6").unwrap(), 6);
        assert!(parse_cycle("24").is_err());
    }

    #[test]
    fn test_default_run_date_is_yesterday() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        assert_eq!(default_run_date(now), date(2024, 2, 29));
    }
}
