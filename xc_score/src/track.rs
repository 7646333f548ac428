//! Recorded flight samples and the immutable [`Track`] built from them.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::XcError;

const SECONDS_PER_DAY: u32 = 86_400;

/// One timestamped position sample from the flight recorder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub gps_altitude_m: f64,
    pub baro_altitude_m: f64,
}

/// Ordered, validated sequence of fixes for one flight.
///
/// Timestamps are non-decreasing and every coordinate is finite and in range. There is no
/// mutating API once the track is built.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Track {
    fixes: Vec<Fix>,
}

impl Track {
    /// Validate `fixes` and wrap them into a track.
    pub fn new(fixes: Vec<Fix>) -> Result<Self, XcError> {
        for (idx, fix) in fixes.iter().enumerate() {
            if !fix.latitude.is_finite() || !(-90.0..=90.0).contains(&fix.latitude) {
                return Err(XcError::ContractViolation(format!(
                    "fix {idx}: latitude {} out of range",
                    fix.latitude
                )));
            }
            if !fix.longitude.is_finite() || !(-180.0..=180.0).contains(&fix.longitude) {
                return Err(XcError::ContractViolation(format!(
                    "fix {idx}: longitude {} out of range",
                    fix.longitude
                )));
            }
        }
        if let Some(idx) = fixes.windows(2).position(|w| w[1].time < w[0].time) {
            return Err(XcError::ContractViolation(format!(
                "fix {}: timestamp {} precedes {}",
                idx + 1,
                fixes[idx + 1].time,
                fixes[idx].time
            )));
        }
        Ok(Self { fixes })
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn fix(&self, idx: usize) -> Option<&Fix> {
        self.fixes.get(idx)
    }

    pub fn gps_altitudes(&self) -> Vec<f64> {
        self.fixes.iter().map(|f| f.gps_altitude_m).collect()
    }

    pub fn baro_altitudes(&self) -> Vec<f64> {
        self.fixes.iter().map(|f| f.baro_altitude_m).collect()
    }

    /// Seconds between the first and the last fix (0 for fewer than two fixes).
    pub fn duration_s(&self) -> f64 {
        match (self.fixes.first(), self.fixes.last()) {
            (Some(first), Some(last)) => {
                (last.time - first.time).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        }
    }
}

/// Accumulates fixes during ingestion.
///
/// Recorders that only store a time of day (IGC) go through
/// [`push_time_of_day`](TrackBuilder::push_time_of_day): whenever the time of day goes
/// backwards the builder assumes UTC midnight was crossed and advances its day counter.
#[derive(Clone, Debug)]
pub struct TrackBuilder {
    date: Option<NaiveDate>,
    day_offset: i64,
    last_second_of_day: Option<u32>,
    fixes: Vec<Fix>,
}

impl TrackBuilder {
    pub fn new() -> Self {
        Self {
            date: None,
            day_offset: 0,
            last_second_of_day: None,
            fixes: Vec::new(),
        }
    }

    pub fn with_date(date: NaiveDate) -> Self {
        let mut builder = Self::new();
        builder.date = Some(date);
        builder
    }

    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = Some(date);
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    /// Append a fix that already carries an absolute timestamp.
    pub fn push(&mut self, fix: Fix) {
        self.fixes.push(fix);
    }

    /// Append a fix recorded as seconds since midnight UTC of the flight date.
    pub fn push_time_of_day(
        &mut self,
        second_of_day: u32,
        latitude: f64,
        longitude: f64,
        gps_altitude_m: f64,
        baro_altitude_m: f64,
    ) -> Result<(), XcError> {
        let date = self.date.ok_or_else(|| {
            XcError::InvalidParameter("time-of-day fix pushed before the flight date".into())
        })?;
        if second_of_day >= SECONDS_PER_DAY {
            return Err(XcError::InvalidParameter(format!(
                "second of day {second_of_day} out of range"
            )));
        }
        if let Some(last) = self.last_second_of_day {
            if second_of_day < last {
                self.day_offset += 1;
            }
        }
        self.last_second_of_day = Some(second_of_day);

        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| XcError::InvalidParameter(format!("invalid flight date {date}")))?;
        let time = Utc.from_utc_datetime(&midnight)
            + Duration::days(self.day_offset)
            + Duration::seconds(i64::from(second_of_day));

        self.fixes.push(Fix {
            time,
            latitude,
            longitude,
            gps_altitude_m,
            baro_altitude_m,
        });
        Ok(())
    }

    pub fn build(self) -> Result<Track, XcError> {
        Track::new(self.fixes)
    }
}

impl Default for TrackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Header metadata of a recorded flight.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightInfo {
    pub pilot: Option<String>,
    pub glider: Option<String>,
    pub site: Option<String>,
    pub date: Option<NaiveDate>,
}

/// A parsed recording: display name, header metadata and the track itself.
#[derive(Clone, Debug, Serialize)]
pub struct Flight {
    pub name: String,
    pub info: FlightInfo,
    pub track: Track,
}

impl Flight {
    /// The name is the file name with a trailing `.igc` removed.
    pub fn new(name: &str, info: FlightInfo, track: Track) -> Self {
        let name = name
            .strip_suffix(".igc")
            .or_else(|| name.strip_suffix(".IGC"))
            .unwrap_or(name);
        Self {
            name: name.to_string(),
            info,
            track,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix_at(secs: i64, lat: f64, lon: f64) -> Fix {
        Fix {
            time: Utc.timestamp_opt(secs, 0).unwrap(),
            latitude: lat,
            longitude: lon,
            gps_altitude_m: 1000.0,
            baro_altitude_m: 990.0,
        }
    }

    #[test]
    fn midnight_rollover_keeps_time_monotonic() {
        let date = NaiveDate::from_ymd_opt(2014, 6, 1).unwrap();
        let mut builder = TrackBuilder::with_date(date);
        builder
            .push_time_of_day(86_398, 47.0, 11.0, 1500.0, 1490.0)
            .unwrap();
        builder
            .push_time_of_day(86_399, 47.0, 11.0, 1500.0, 1490.0)
            .unwrap();
        builder.push_time_of_day(1, 47.0, 11.0, 1500.0, 1490.0).unwrap();
        builder.push_time_of_day(5, 47.0, 11.0, 1500.0, 1490.0).unwrap();
        let track = builder.build().unwrap();

        let times: Vec<_> = track.fixes().iter().map(|f| f.time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(times[2].date_naive(), NaiveDate::from_ymd_opt(2014, 6, 2).unwrap());
        assert_eq!((times[2] - times[1]).num_seconds(), 2);
        assert!((track.duration_s() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn time_of_day_requires_date() {
        let mut builder = TrackBuilder::new();
        let err = builder.push_time_of_day(10, 0.0, 0.0, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, XcError::InvalidParameter(_)));
    }

    #[test]
    fn rejects_backwards_timestamps() {
        let fixes = vec![fix_at(100, 1.0, 1.0), fix_at(99, 1.0, 1.0)];
        assert!(matches!(
            Track::new(fixes),
            Err(XcError::ContractViolation(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            Track::new(vec![fix_at(0, 91.0, 0.0)]),
            Err(XcError::ContractViolation(_))
        ));
        assert!(matches!(
            Track::new(vec![fix_at(0, 0.0, -180.5)]),
            Err(XcError::ContractViolation(_))
        ));
        assert!(matches!(
            Track::new(vec![fix_at(0, f64::NAN, 0.0)]),
            Err(XcError::ContractViolation(_))
        ));
    }

    #[test]
    fn flight_name_strips_igc_suffix() {
        let flight = Flight::new("2014-06-01-XCT.igc", FlightInfo::default(), Track::default());
        assert_eq!(flight.name, "2014-06-01-XCT");
        let flight = Flight::new("morning", FlightInfo::default(), Track::default());
        assert_eq!(flight.name, "morning");
    }
}
