//! IGC flight recorder files: `B` fix records and the `H` header lines we care about.

use chrono::NaiveDate;
use ::igc::records::BRecord;
use tracing::{debug, trace};

use crate::track::{Flight, FlightInfo, TrackBuilder};
use crate::XcError;

/// Parse an IGC file. `name` becomes the flight name (a trailing `.igc` is dropped).
///
/// Fixes only carry a time of day; the date comes from the `HFDTE` header and midnight
/// crossings are folded into the timestamps by [`TrackBuilder`].
pub fn parse_igc(input: &[u8], name: &str) -> Result<Flight, XcError> {
    // IGC is nominally ASCII; older loggers write Latin-1 in free-text headers.
    let text: String = input.iter().map(|&b| b as char).collect();

    let mut info = FlightInfo::default();
    let mut builder = TrackBuilder::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.starts_with('B') {
            let record = match BRecord::parse(line) {
                Ok(record) => record,
                Err(e) => {
                    debug!(line = line_no + 1, error = ?e, "skipping malformed fix");
                    continue;
                }
            };
            if builder.date().is_none() {
                return Err(XcError::IgcParse(format!(
                    "line {}: fix recorded before the HFDTE date header",
                    line_no + 1
                )));
            }
            let time = record.timestamp;
            let second_of_day = u32::from(time.hours) * 3600
                + u32::from(time.minutes) * 60
                + u32::from(time.seconds);
            builder.push_time_of_day(
                second_of_day,
                record.pos.lat.into(),
                record.pos.lon.into(),
                f64::from(record.gps_alt),
                f64::from(record.pressure_alt),
            )?;
            continue;
        }

        if let Some(header) = line.strip_prefix('H') {
            // H + source letter + three-letter subject code.
            let subject = header.get(1..4).unwrap_or("");
            match subject {
                "DTE" => {
                    let date = parse_header_date(&header[4..]).ok_or_else(|| {
                        XcError::IgcParse(format!("line {}: invalid date header", line_no + 1))
                    })?;
                    info.date = Some(date);
                    builder.set_date(date);
                }
                "PLT" => info.pilot = header_value(header),
                "GTY" => info.glider = header_value(header),
                "SIT" => info.site = header_value(header),
                _ => trace!(line, "ignoring header"),
            }
            continue;
        }

        if !line.is_empty() {
            trace!(line, "ignoring record");
        }
    }

    let track = builder.build()?;
    Ok(Flight::new(name, info, track))
}

/// Free-text value after the first `:`, if non-empty.
fn header_value(header: &str) -> Option<String> {
    let (_, value) = header.split_once(':')?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// `ddmmyy` either directly after the subject code or after `DATE:`; years are 2000+yy.
fn parse_header_date(rest: &str) -> Option<NaiveDate> {
    let rest = rest.strip_prefix("DATE:").unwrap_or(rest);
    let digits = rest.get(0..6)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day: u32 = digits[0..2].parse().ok()?;
    let month: u32 = digits[2..4].parse().ok()?;
    let year: i32 = digits[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const SAMPLE: &str = "AXCT0000001
HFDTE010614
HFPLTPILOTINCHARGE:Jane Doe
HFGTYGLIDERTYPE:Advance Sigma 9
HPSITSITE:Kössen
LXCT some logger comment
B1101355206343N00006198WA0058700558
B1101365206400N00006100WA0059000561
B1101375206500S00006000EA0059500566
";

    #[test]
    fn parses_headers_and_fixes() {
        let flight = parse_igc(SAMPLE.as_bytes(), "sample.igc").unwrap();
        assert_eq!(flight.name, "sample");
        assert_eq!(flight.info.pilot.as_deref(), Some("Jane Doe"));
        assert_eq!(flight.info.glider.as_deref(), Some("Advance Sigma 9"));
        assert!(flight.info.site.is_some());
        assert_eq!(flight.info.date, NaiveDate::from_ymd_opt(2014, 6, 1));

        let fixes = flight.track.fixes();
        assert_eq!(fixes.len(), 3);
        let first = &fixes[0];
        assert!((first.latitude - (52.0 + 6.343 / 60.0)).abs() < 1e-6);
        assert!((first.longitude + 6.198 / 60.0).abs() < 1e-6);
        assert_eq!(first.baro_altitude_m, 587.0);
        assert_eq!(first.gps_altitude_m, 558.0);
        assert_eq!(first.time.hour(), 11);
        assert_eq!(first.time.minute(), 1);
        assert_eq!(first.time.second(), 35);
        assert_eq!(first.time.day(), 1);

        // Hemisphere letters flip the sign.
        assert!(fixes[2].latitude < 0.0);
        assert!(fixes[2].longitude > 0.0);
    }

    #[test]
    fn rolls_over_midnight() {
        let igc = "HFDTE311214
B2359585206343N00006198WA0058700558
B0000025206343N00006198WA0058700558
";
        let flight = parse_igc(igc.as_bytes(), "nye").unwrap();
        let fixes = flight.track.fixes();
        assert_eq!(fixes.len(), 2);
        assert!(fixes[0].time < fixes[1].time);
        assert_eq!(fixes[1].time.year(), 2015);
        assert_eq!((fixes[1].time - fixes[0].time).num_seconds(), 4);
    }

    #[test]
    fn fix_before_date_is_an_error() {
        let igc = "B1101355206343N00006198WA0058700558\nHFDTE010614\n";
        assert!(matches!(
            parse_igc(igc.as_bytes(), "x"),
            Err(XcError::IgcParse(_))
        ));
    }

    #[test]
    fn truncated_fix_is_skipped() {
        let igc = "HFDTE010614
B1101355206343N00006198WA0058700558
B110136
B1101375206500N00006000WA0059500566
";
        let flight = parse_igc(igc.as_bytes(), "cut").unwrap();
        let fixes = flight.track.fixes();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[1].time.second(), 37);
    }

    #[test]
    fn header_dates() {
        assert_eq!(parse_header_date("150723"), NaiveDate::from_ymd_opt(2023, 7, 15));
        assert_eq!(
            parse_header_date("DATE:150723,01"),
            NaiveDate::from_ymd_opt(2023, 7, 15)
        );
        assert_eq!(parse_header_date("320723"), None);
        assert_eq!(parse_header_date("15a723"), None);
        assert_eq!(parse_header_date("1507"), None);
    }

    #[test]
    fn header_values() {
        assert_eq!(header_value("FPLTPILOT:  Max "), Some("Max".to_string()));
        assert_eq!(header_value("FPLTPILOT:"), None);
        assert_eq!(header_value("FPLTPILOT"), None);
    }
}
