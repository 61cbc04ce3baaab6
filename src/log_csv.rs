use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::warn;

use crate::error::LogFormatError;
use crate::models::{Location, Measurement, OutsideSnapshot};

pub const COLUMNS: [&str; 13] = [
    "id",
    "datetime",
    "location",
    "temp_c",
    "rh",
    "lux",
    "uv",
    "co2",
    "outside_time",
    "outside_temp_c",
    "outside_rh",
    "outside_dew_point_c",
    "notes",
];

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One row of the log artifact.
///
/// Rows that do not describe a usable reading are carried verbatim so a
/// whole-log rewrite never drops them.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Reading(Measurement),
    Unreadable(Vec<String>),
}

impl LogEntry {
    pub fn reading(&self) -> Option<&Measurement> {
        match self {
            LogEntry::Reading(measurement) => Some(measurement),
            LogEntry::Unreadable(_) => None,
        }
    }
}

impl From<Measurement> for LogEntry {
    fn from(measurement: Measurement) -> Self {
        LogEntry::Reading(measurement)
    }
}

/// Usable readings in log order.
pub fn readings(entries: &[LogEntry]) -> Vec<Measurement> {
    entries.iter().filter_map(LogEntry::reading).cloned().collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogRow {
    id: Option<String>,
    datetime: Option<String>,
    location: Option<String>,
    temp_c: Option<String>,
    rh: Option<String>,
    lux: Option<String>,
    uv: Option<String>,
    co2: Option<String>,
    outside_time: Option<String>,
    outside_temp_c: Option<String>,
    outside_rh: Option<String>,
    outside_dew_point_c: Option<String>,
    notes: Option<String>,
}

impl LogRow {
    fn into_cells(self) -> Vec<String> {
        [
            self.id,
            self.datetime,
            self.location,
            self.temp_c,
            self.rh,
            self.lux,
            self.uv,
            self.co2,
            self.outside_time,
            self.outside_temp_c,
            self.outside_rh,
            self.outside_dew_point_c,
            self.notes,
        ]
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect()
    }
}

/// Decodes a log artifact. Empty and header-only input is an empty log.
///
/// Structural csv errors fail the whole artifact. Rows lacking a usable id,
/// timestamp, location, temperature or humidity are kept as unreadable
/// entries; any other unparseable cell is read as "no value".
pub fn decode(bytes: &[u8]) -> Result<Vec<LogEntry>, LogFormatError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(bytes);
    let mut entries = Vec::new();

    for (index, result) in reader.deserialize::<LogRow>().enumerate() {
        let row = result?;
        match row_to_measurement(&row) {
            Ok(measurement) => entries.push(LogEntry::Reading(measurement)),
            Err(reason) => {
                warn!(row = index + 1, %reason, "keeping unreadable measurement row as is");
                entries.push(LogEntry::Unreadable(row.into_cells()));
            }
        }
    }

    Ok(entries)
}

/// Encodes the full log, always including the header row.
pub fn encode(entries: &[LogEntry]) -> Result<Vec<u8>, LogFormatError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(COLUMNS)?;

    for entry in entries {
        match entry {
            LogEntry::Reading(m) => writer.write_record(reading_cells(m))?,
            LogEntry::Unreadable(cells) => writer.write_record(cells)?,
        }
    }

    writer
        .into_inner()
        .map_err(|err| LogFormatError::Writer(err.to_string()))
}

fn reading_cells(m: &Measurement) -> [String; 13] {
    let outside = m.outside.clone().unwrap_or_default();
    [
        m.id.clone(),
        m.timestamp.format(DATETIME_FORMAT).to_string(),
        m.location.name().to_string(),
        m.temperature_c.to_string(),
        m.relative_humidity_pct.to_string(),
        number_cell(m.lux),
        number_cell(m.uv),
        number_cell(m.co2_ppm),
        outside.time.unwrap_or_default(),
        number_cell(outside.temp_c),
        number_cell(outside.rh),
        number_cell(outside.dew_point_c),
        m.notes.clone().unwrap_or_default(),
    ]
}

fn number_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn row_to_measurement(row: &LogRow) -> Result<Measurement, String> {
    let id = text(&row.id).ok_or("missing id")?;
    let timestamp = text(&row.datetime)
        .as_deref()
        .and_then(parse_datetime)
        .ok_or("missing or unparseable datetime")?;
    let location = text(&row.location)
        .ok_or("missing location")?
        .parse::<Location>()?;
    let temperature_c = number(&row.temp_c).ok_or("missing temp_c")?;
    let relative_humidity_pct = number(&row.rh).ok_or("missing rh")?;

    let outside = OutsideSnapshot {
        time: text(&row.outside_time),
        temp_c: number(&row.outside_temp_c),
        rh: number(&row.outside_rh),
        dew_point_c: number(&row.outside_dew_point_c),
    };

    Ok(Measurement {
        id,
        timestamp,
        location,
        temperature_c,
        relative_humidity_pct,
        lux: number(&row.lux),
        uv: number(&row.uv),
        co2_ppm: number(&row.co2),
        outside: (!outside.is_empty()).then_some(outside),
        notes: text(&row.notes),
    })
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn number(value: &Option<String>) -> Option<f64> {
    text(value)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parses the ISO-8601 shapes found in logs: with or without a `T`
/// separator, seconds or fractional seconds, an offset, or a bare date.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "id,datetime,location,temp_c,rh,lux,uv,co2,outside_time,outside_temp_c,outside_rh,outside_dew_point_c,notes\n";

    #[test]
    fn empty_and_header_only_artifacts_are_empty_logs() {
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(HEADER.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn encoding_an_empty_log_keeps_the_header() {
        let bytes = encode(&[]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), HEADER);
    }

    #[test]
    fn decodes_rows_written_by_other_tools() {
        let body = format!(
            "{HEADER}a1,2026-02-01 10:30:00,Compactus,19.5,48.2,0.0,,abc,2026-02-01T10:30,24.1,61,15.9,\"dusty, check seals\"\n"
        );
        let log = readings(&decode(body.as_bytes()).unwrap());
        assert_eq!(log.len(), 1);
        let m = &log[0];
        assert_eq!(m.id, "a1");
        assert_eq!(m.location, Location::Compactus);
        assert_eq!(m.temperature_c, 19.5);
        assert_eq!(m.lux, Some(0.0));
        assert_eq!(m.uv, None);
        assert_eq!(m.co2_ppm, None);
        let outside = m.outside.as_ref().unwrap();
        assert_eq!(outside.time.as_deref(), Some("2026-02-01T10:30"));
        assert_eq!(outside.rh, Some(61.0));
        assert_eq!(m.notes.as_deref(), Some("dusty, check seals"));
    }

    #[test]
    fn missing_columns_read_as_no_value() {
        let body = "id,datetime,location,temp_c,rh\nb2,2026-02-01T08:00:00,Workroom,21,50\n";
        let log = readings(&decode(body.as_bytes()).unwrap());
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outside, None);
        assert_eq!(log[0].notes, None);
    }

    #[test]
    fn rows_without_required_values_are_kept_verbatim() {
        let body = format!(
            "{HEADER}c1,not a date,Compactus,19,50,,,,,,,,\nc2,2026-02-01 09:00:00,Compactus,,50,,,,,,,,sensor glitch\nc3,2026-02-01 09:00:00,Compactus,19,50,,,,,,,,\n"
        );
        let entries = decode(body.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(readings(&entries).len(), 1);
        assert_eq!(readings(&entries)[0].id, "c3");
        match &entries[1] {
            LogEntry::Unreadable(cells) => {
                assert_eq!(cells[0], "c2");
                assert_eq!(cells[3], "");
                assert_eq!(cells[12], "sensor glitch");
            }
            other => panic!("expected an unreadable row, got {other:?}"),
        }

        let rewritten = String::from_utf8(encode(&entries).unwrap()).unwrap();
        assert_eq!(rewritten, body);
    }

    #[test]
    fn ragged_rows_are_a_format_error() {
        let body = format!("{HEADER}d1,2026-02-01 09:00:00\n");
        assert!(decode(body.as_bytes()).is_err());
    }

    #[test]
    fn written_logs_read_back_unchanged() {
        let body = format!(
            "{HEADER}e1,2026-02-01 10:30:00,Workroom,19.5,48.2,120,0.4,650,2026-02-01T10:30,24.1,61,15.9,note\n"
        );
        let log = decode(body.as_bytes()).unwrap();
        let again = decode(&encode(&log).unwrap()).unwrap();
        assert_eq!(log, again);
    }

    #[test]
    fn fractional_seconds_survive_a_rewrite() {
        let body = format!("{HEADER}f1,2026-02-01 10:30:00.500,Workroom,19.5,48.2,,,,,,,,\n");
        let entries = decode(body.as_bytes()).unwrap();
        let rewritten = String::from_utf8(encode(&entries).unwrap()).unwrap();
        assert!(rewritten.contains("2026-02-01 10:30:00.500,"));
        assert_eq!(decode(rewritten.as_bytes()).unwrap(), entries);
    }

    #[test]
    fn datetime_shapes() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 5)
            .and_then(|d| d.and_hms_opt(14, 20, 0))
            .unwrap();
        for value in [
            "2026-01-05 14:20:00",
            "2026-01-05T14:20:00",
            "2026-01-05T14:20",
            "2026-01-05 14:20:00.000",
            "2026-01-05T14:20:00+11:00",
        ] {
            assert_eq!(parse_datetime(value), Some(expected), "{value}");
        }
        assert_eq!(
            parse_datetime("2026-01-05"),
            NaiveDate::from_ymd_opt(2026, 1, 5).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }
}
