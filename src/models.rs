use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

/// Storage locations under monitoring. Declaration order is the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum Location {
    SpecialCollectionsRoom,
    SpecialCollectionsStorage,
    Compactus,
    Workroom,
}

impl Location {
    pub const ALL: [Location; 4] = [
        Location::SpecialCollectionsRoom,
        Location::SpecialCollectionsStorage,
        Location::Compactus,
        Location::Workroom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Location::SpecialCollectionsRoom => "Special Collections Room",
            Location::SpecialCollectionsStorage => "Special Collections Storage",
            Location::Compactus => "Compactus",
            Location::Workroom => "Workroom",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Location::ALL
            .into_iter()
            .find(|location| location.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown location '{trimmed}'"))
    }
}

/// Ambient conditions captured from the weather source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutsideSnapshot {
    pub time: Option<String>,
    pub temp_c: Option<f64>,
    pub rh: Option<f64>,
    pub dew_point_c: Option<f64>,
}

impl OutsideSnapshot {
    pub fn is_empty(&self) -> bool {
        self.time.is_none() && self.temp_c.is_none() && self.rh.is_none() && self.dew_point_c.is_none()
    }
}

/// One recorded reading. `id` is assigned at creation and never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub id: String,
    pub timestamp: NaiveDateTime,
    pub location: Location,
    pub temperature_c: f64,
    pub relative_humidity_pct: f64,
    pub lux: Option<f64>,
    pub uv: Option<f64>,
    pub co2_ppm: Option<f64>,
    pub outside: Option<OutsideSnapshot>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RangeStatus {
    Core,
    Outer,
    Out,
}

impl RangeStatus {
    pub fn title(&self) -> &'static str {
        match self {
            RangeStatus::Core => "Core",
            RangeStatus::Outer => "Outer",
            RangeStatus::Out => "Out",
        }
    }

    /// Statuses only ever move towards `Out`.
    pub fn escalate(self, to: RangeStatus) -> RangeStatus {
        self.max(to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warn,
    Danger,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warn => "warn",
            Severity::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    pub label: String,
    pub severity: Severity,
}

impl Flag {
    pub fn warn(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            severity: Severity::Warn,
        }
    }

    pub fn danger(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            severity: Severity::Danger,
        }
    }
}

/// A measurement annotated by the evaluation engine. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedMeasurement {
    pub measurement: Measurement,
    pub range_status: RangeStatus,
    pub flags: Vec<Flag>,
    pub delta_hours_since_prior: Option<f64>,
    pub prior_temperature: Option<f64>,
    pub prior_humidity: Option<f64>,
}

impl EvaluatedMeasurement {
    pub fn is_stable(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flag labels joined for display, or "Stable" when nothing was raised.
    pub fn flags_text(&self) -> String {
        if self.is_stable() {
            return "Stable".to_string();
        }
        self.flags
            .iter()
            .map(|flag| flag.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn outside_temp_delta(&self) -> Option<f64> {
        let outside = self.measurement.outside.as_ref()?.temp_c?;
        Some(self.measurement.temperature_c - outside)
    }

    pub fn outside_rh_delta(&self) -> Option<f64> {
        let outside = self.measurement.outside.as_ref()?.rh?;
        Some(self.measurement.relative_humidity_pct - outside)
    }
}

/// Dew point in C using the Magnus approximation.
pub fn dew_point(temp_c: f64, rh: f64) -> Option<f64> {
    if !temp_c.is_finite() || !rh.is_finite() || rh <= 0.0 {
        return None;
    }
    let (a, b) = (17.27, 237.7);
    let alpha = (a * temp_c) / (b + temp_c) + (rh / 100.0).ln();
    Some((b * alpha) / (a - alpha))
}
