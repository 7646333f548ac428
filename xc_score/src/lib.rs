//! Free-flight cross-country scoring.
//!
//! Reads a recorded flight (IGC, GPX or FIT), measures it on the FAI sphere and searches for
//! the polygon through its fixes with the largest total leg length.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

pub mod distance;
pub mod igc;
pub mod smooth;
pub mod solver;
pub mod track;
pub mod vario;

pub use distance::{fai_distance, DistanceIndex, FAI_EARTH_RADIUS_M};
pub use smooth::{binomial, moving, smooth, Kernel};
pub use solver::{solve, Solution, SolveParams, Termination, TurningPointSolver};
pub use track::{Fix, Flight, FlightInfo, Track, TrackBuilder};
pub use vario::{climb_rates, ColorRamp, ColorStop, Rgb, VarioParams};

#[derive(Error, Debug)]
pub enum XcError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse IGC file: {0}")]
    IgcParse(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("track contract violated: {0}")]
    ContractViolation(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Degrees per FIT semicircle (2^31 semicircles = 180 degrees).
const SEMICIRCLE_TO_DEG: f64 = 180.0 / 2_147_483_648.0;

/// Parse an IGC, GPX or FIT recording using the provided format hint (extension).
pub fn parse_flight(input: &[u8], name: &str, format: &str) -> Result<Flight, XcError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".igc") || format_lc == "igc" {
        crate::igc::parse_igc(input, name)
    } else if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx_flight(input, name)
    } else if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_flight(input, name)
    } else {
        Err(XcError::UnsupportedFormat(format.to_string()))
    }
}

fn parse_fit_flight(input: &[u8], name: &str) -> Result<Flight, XcError> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;

    let records = from_bytes(input).map_err(|e| XcError::FitParse(e.to_string()))?;
    let mut builder = TrackBuilder::new();
    let mut altitude = 0.0;
    let mut skipped = 0usize;

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut timestamp: Option<DateTime<Utc>> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        timestamp = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => {
                    lat = fit_value_to_f64(field.value()).map(|v| v * SEMICIRCLE_TO_DEG);
                }
                "position_long" => {
                    lon = fit_value_to_f64(field.value()).map(|v| v * SEMICIRCLE_TO_DEG);
                }
                "altitude" | "enhanced_altitude" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        altitude = val;
                    }
                }
                _ => {}
            }
        }
        match (timestamp, lat, lon) {
            (Some(time), Some(latitude), Some(longitude)) => builder.push(Fix {
                time,
                latitude,
                longitude,
                gps_altitude_m: altitude,
                baro_altitude_m: altitude,
            }),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "FIT records without time or position");
    }

    let track = builder.build()?;
    let info = FlightInfo {
        date: track.fixes().first().map(|f| f.time.date_naive()),
        ..FlightInfo::default()
    };
    Ok(Flight::new(name, info, track))
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt16z(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::UInt64z(v) => Some(*v as f64),
        fitparser::Value::Byte(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        fitparser::Value::UInt8z(v) => Some(*v as f64),
        fitparser::Value::SInt8(v) => Some(*v as f64),
        fitparser::Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

fn parse_gpx_flight(input: &[u8], name: &str) -> Result<Flight, XcError> {
    use gpx::read;
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = read(&mut cursor).map_err(|e| XcError::GpxParse(e.to_string()))?;
    let mut builder = TrackBuilder::new();

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time.as_ref() else {
                    continue;
                };
                let iso = time
                    .format()
                    .map_err(|e| XcError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| XcError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let elevation = point.elevation.unwrap_or(0.0);
                let geo = point.point();
                builder.push(Fix {
                    time: utc,
                    latitude: geo.y(),
                    longitude: geo.x(),
                    gps_altitude_m: elevation,
                    baro_altitude_m: elevation,
                });
            }
        }
    }

    let track = builder.build()?;
    let info = FlightInfo {
        date: track.fixes().first().map(|f| f.time.date_naive()),
        ..FlightInfo::default()
    };
    Ok(Flight::new(name, info, track))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="xc_score tests" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>ridge run</name>
    <trkseg>
      <trkpt lat="46.5000" lon="8.0000"><ele>1500.0</ele><time>2021-07-04T10:00:00Z</time></trkpt>
      <trkpt lat="46.5100" lon="8.0200"><ele>1520.5</ele><time>2021-07-04T10:00:10Z</time></trkpt>
      <trkpt lat="46.5300" lon="8.0300"><time>2021-07-04T10:00:20Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>
"#;

    #[test]
    fn gpx_points_become_fixes() {
        let flight = parse_flight(GPX.as_bytes(), "ridge.gpx", "gpx").unwrap();
        let fixes = flight.track.fixes();
        assert_eq!(fixes.len(), 3);
        assert!((fixes[1].latitude - 46.51).abs() < 1e-9);
        assert!((fixes[1].longitude - 8.02).abs() < 1e-9);
        assert_eq!(fixes[1].gps_altitude_m, 1520.5);
        assert_eq!(fixes[1].baro_altitude_m, 1520.5);
        assert_eq!(fixes[2].gps_altitude_m, 0.0);
        assert!((flight.track.duration_s() - 20.0).abs() < 1e-9);
        assert_eq!(
            flight.info.date,
            chrono::NaiveDate::from_ymd_opt(2021, 7, 4)
        );
    }

    #[test]
    fn dispatch_on_extension() {
        let igc = "HFDTE010614\nB1101355206343N00006198WA0058700558\n";
        let flight = parse_flight(igc.as_bytes(), "a.igc", "flights/a.IGC").unwrap();
        assert_eq!(flight.track.len(), 1);
        assert!(matches!(
            parse_flight(b"", "x", "kml"),
            Err(XcError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            parse_flight(b"not xml", "x", "gpx"),
            Err(XcError::GpxParse(_))
        ));
        assert!(matches!(
            parse_flight(b"garbage", "x", "fit"),
            Err(XcError::FitParse(_))
        ));
    }

    #[test]
    fn semicircles_to_degrees() {
        assert!((1_073_741_824.0 * SEMICIRCLE_TO_DEG - 90.0).abs() < 1e-12);
        assert_eq!(
            fit_value_to_f64(&fitparser::Value::SInt32(-5)),
            Some(-5.0)
        );
        assert_eq!(fit_value_to_f64(&fitparser::Value::UInt16z(1234)), Some(1234.0));
        assert_eq!(fit_value_to_f64(&fitparser::Value::UInt32z(7)), Some(7.0));
        assert_eq!(fit_value_to_f64(&fitparser::Value::Byte(9)), Some(9.0));
        assert_eq!(fit_value_to_f64(&fitparser::Value::UInt8z(3)), Some(3.0));
        assert_eq!(fit_value_to_f64(&fitparser::Value::String("x".into())), None);
    }
}
