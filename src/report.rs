use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDateTime;

use crate::evaluate;
use crate::guidelines::OUTSIDE_REFERENCE;
use crate::log_csv;
use crate::models::{EvaluatedMeasurement, Location, OutsideSnapshot, RangeStatus, Severity};

#[derive(Debug, Clone, PartialEq)]
pub struct FlagSummary {
    pub label: String,
    pub severity: Severity,
    pub count: usize,
}

/// Counts flags by kind. Drift and outside-delta labels carry values, so they
/// are grouped on the text before the number.
pub fn summarize_flags(evaluated: &[EvaluatedMeasurement]) -> Vec<FlagSummary> {
    let mut map: HashMap<String, (Severity, usize)> = HashMap::new();

    for record in evaluated {
        for flag in &record.flags {
            let entry = map
                .entry(flag_kind(&flag.label).to_string())
                .or_insert((flag.severity, 0));
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<FlagSummary> = map
        .into_iter()
        .map(|(label, (severity, count))| FlagSummary {
            label,
            severity,
            count,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    summaries
}

fn flag_kind(label: &str) -> &str {
    label
        .find(|c: char| c.is_ascii_digit() || c == '+' || c == '-')
        .map(|idx| label[..idx].trim_end())
        .unwrap_or(label)
}

/// Summary counters shown above the status table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogStats {
    pub total: usize,
    pub last_reading: Option<(NaiveDateTime, Location)>,
    pub locations_covered: usize,
}

pub fn log_stats(evaluated: &[EvaluatedMeasurement]) -> LogStats {
    let last_reading = evaluated
        .iter()
        .max_by_key(|e| e.measurement.timestamp)
        .map(|e| (e.measurement.timestamp, e.measurement.location));
    let locations_covered = Location::ALL
        .iter()
        .filter(|location| evaluated.iter().any(|e| e.measurement.location == **location))
        .count();
    LogStats {
        total: evaluated.len(),
        last_reading,
        locations_covered,
    }
}

/// Readings per range status at one location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compliance {
    pub core: usize,
    pub outer: usize,
    pub out: usize,
}

impl Compliance {
    pub fn total(&self) -> usize {
        self.core + self.outer + self.out
    }
}

pub fn compliance_for(evaluated: &[EvaluatedMeasurement], location: Location) -> Compliance {
    evaluated
        .iter()
        .filter(|e| e.measurement.location == location)
        .fold(Compliance::default(), |mut acc, e| {
            match e.range_status {
                RangeStatus::Core => acc.core += 1,
                RangeStatus::Outer => acc.outer += 1,
                RangeStatus::Out => acc.out += 1,
            }
            acc
        })
}

pub fn format_dt(value: &NaiveDateTime) -> String {
    value.format("%b %d, %Y %I:%M %p").to_string()
}

/// Outside timestamps are shown formatted when parseable, raw otherwise.
pub fn format_outside_time(value: Option<&str>) -> String {
    match value {
        None => "--".to_string(),
        Some(raw) => log_csv::parse_datetime(raw)
            .map(|at| format_dt(&at))
            .unwrap_or_else(|| raw.to_string()),
    }
}

pub fn format_value(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.1}"))
        .unwrap_or_else(|| "--".to_string())
}

pub fn build_report(
    generated_at: NaiveDateTime,
    evaluated: &[EvaluatedMeasurement],
    outside: Option<&OutsideSnapshot>,
) -> String {
    let stats = log_stats(evaluated);
    let summaries = summarize_flags(evaluated);

    let mut output = String::new();

    let _ = writeln!(output, "# Environmental Compliance Report");
    let _ = writeln!(output, "Generated {}", format_dt(&generated_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "- Total readings: {}", stats.total);
    match &stats.last_reading {
        Some((at, location)) => {
            let _ = writeln!(output, "- Last reading: {} ({})", format_dt(at), location);
        }
        None => {
            let _ = writeln!(output, "- Last reading: --");
        }
    }
    let _ = writeln!(
        output,
        "- Locations covered: {}/{}",
        stats.locations_covered,
        Location::ALL.len()
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Outside Conditions ({})", OUTSIDE_REFERENCE.label);
    match outside {
        Some(snapshot) => {
            let _ = writeln!(
                output,
                "{} C / {}% RH / dew point {} C (at {})",
                format_value(snapshot.temp_c),
                format_value(snapshot.rh),
                format_value(snapshot.dew_point_c),
                format_outside_time(snapshot.time.as_deref())
            );
        }
        None => {
            let _ = writeln!(output, "Outside data unavailable right now.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Current Status");
    for location in Location::ALL {
        match evaluate::latest_for(evaluated, location) {
            Some(latest) => {
                let m = &latest.measurement;
                let _ = writeln!(
                    output,
                    "- {}: {} ({:.1} C, {:.1}% RH at {}) {}",
                    location,
                    latest.range_status.title(),
                    m.temperature_c,
                    m.relative_humidity_pct,
                    format_dt(&m.timestamp),
                    latest.flags_text()
                );
            }
            None => {
                let _ = writeln!(output, "- {}: Awaiting first reading", location);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Compliance");
    for location in Location::ALL {
        let compliance = compliance_for(evaluated, location);
        if compliance.total() == 0 {
            let _ = writeln!(output, "- {}: no readings", location);
            continue;
        }
        let _ = writeln!(
            output,
            "- {}: {} core, {} outer band, {} out of range",
            location, compliance.core, compliance.outer, compliance.out
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Flag Mix");
    if summaries.is_empty() {
        let _ = writeln!(output, "No flags raised. All readings stable.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} readings",
                summary.label,
                summary.severity.as_str(),
                summary.count
            );
        }
    }

    let mut noted: Vec<&EvaluatedMeasurement> = evaluated
        .iter()
        .filter(|e| e.measurement.notes.is_some())
        .collect();
    noted.sort_by(|a, b| b.measurement.timestamp.cmp(&a.measurement.timestamp));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Notes");

    if noted.is_empty() {
        let _ = writeln!(output, "No notes recorded.");
    } else {
        for record in noted.iter().take(5) {
            let m = &record.measurement;
            let _ = writeln!(
                output,
                "- {} ({}): {}",
                m.location,
                format_dt(&m.timestamp),
                m.notes.as_deref().unwrap_or_default()
            );
        }
    }

    output
}
