//! Line-oriented sensor-stream parser.
//!
//! Each line is one record: `IMU`, `ODOM`, or `GNSS`, space-separated, per the
//! external interface. Malformed lines are reported to the caller, which
//! logs and skips them rather than aborting the run.

use nalgebra::Vector3;

use crate::gnss::{GnssReading, GnssStatus};

/// One parsed sensor-stream record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Record {
    Imu {
        t: f64,
        gyro: Vector3<f64>,
        accel: Vector3<f64>,
    },
    Odom {
        t: f64,
        pulses: f64,
    },
    Gnss(GnssReading),
}

/// A line that didn't parse: kept around so the caller can log it verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    pub line: String,
    pub reason: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed sensor line ({}): {:?}", self.reason, self.line)
    }
}

/// Parses one line of the sensor stream. Blank lines and lines starting with
/// `#` are treated as comments and return `Ok(None)`.
///
/// The wire format carries no GNSS status column, so every parsed `GNSS`
/// record is reported as `status_override` when set, or [`GnssStatus::FixedRtk`]
/// otherwise — the line alone never asserts a fix quality the receiver didn't
/// put on the wire.
pub fn parse_line(line: &str, status_override: Option<GnssStatus>) -> Result<Option<Record>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let err = |reason: &str| ParseError {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let parse_f64 = |s: &str| -> Result<f64, ParseError> { s.parse::<f64>().map_err(|_| err("not a number")) };

    match fields.first().copied() {
        Some("IMU") => {
            if fields.len() != 8 {
                return Err(err("IMU needs 7 fields after the tag"));
            }
            let values = fields[1..]
                .iter()
                .map(|s| parse_f64(s))
                .collect::<Result<Vec<f64>, ParseError>>()?;
            Ok(Some(Record::Imu {
                t: values[0],
                gyro: Vector3::new(values[1], values[2], values[3]),
                accel: Vector3::new(values[4], values[5], values[6]),
            }))
        }
        Some("ODOM") => {
            if fields.len() != 3 {
                return Err(err("ODOM needs 2 fields after the tag"));
            }
            let t = parse_f64(fields[1])?;
            let pulses = parse_f64(fields[2])?;
            Ok(Some(Record::Odom { t, pulses }))
        }
        Some("GNSS") => {
            if fields.len() != 7 {
                return Err(err("GNSS needs 6 fields after the tag"));
            }
            let t = parse_f64(fields[1])?;
            let status = status_override.unwrap_or(GnssStatus::FixedRtk);
            let lat_deg = parse_f64(fields[2])?;
            let lon_deg = parse_f64(fields[3])?;
            let alt_m = parse_f64(fields[4])?;
            let heading_deg = parse_f64(fields[5])?;
            let heading_valid = match fields[6] {
                "1" => true,
                "0" => false,
                _ => return Err(err("heading-valid flag must be 0 or 1")),
            };
            Ok(Some(Record::Gnss(GnssReading {
                t,
                status,
                lat_deg,
                lon_deg,
                alt_m,
                heading_deg,
                heading_valid,
            })))
        }
        Some(other) => Err(err(&format!("unknown record tag {other:?}"))),
        None => Ok(None),
    }
}
