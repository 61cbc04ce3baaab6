use std::collections::BTreeMap;

use crate::guidelines::GuidelineConfig;
use crate::models::{EvaluatedMeasurement, Flag, Location, Measurement, RangeStatus};

/// Annotates every measurement with its range status and anomaly flags.
///
/// Output is grouped by location (declaration order) and sorted by timestamp
/// within each location; equal timestamps keep their input order.
pub fn evaluate(measurements: &[Measurement], guidelines: &GuidelineConfig) -> Vec<EvaluatedMeasurement> {
    let mut by_location: BTreeMap<Location, Vec<&Measurement>> = BTreeMap::new();
    for measurement in measurements {
        by_location
            .entry(measurement.location)
            .or_default()
            .push(measurement);
    }

    let mut evaluated = Vec::with_capacity(measurements.len());
    for (_, mut series) in by_location {
        series.sort_by_key(|m| m.timestamp);

        let mut prior: Option<&Measurement> = None;
        for current in series {
            let delta_hours = prior.map(|p| hours_between(p, current));
            let prior_temperature = prior.map(|p| p.temperature_c);
            let prior_humidity = prior.map(|p| p.relative_humidity_pct);

            let (range_status, flags) = classify(
                current,
                delta_hours,
                prior_temperature,
                prior_humidity,
                guidelines,
            );

            evaluated.push(EvaluatedMeasurement {
                measurement: current.clone(),
                range_status,
                flags,
                delta_hours_since_prior: delta_hours,
                prior_temperature,
                prior_humidity,
            });
            prior = Some(current);
        }
    }

    evaluated
}

/// Most recent evaluated reading for a location, if any.
pub fn latest_for(evaluated: &[EvaluatedMeasurement], location: Location) -> Option<&EvaluatedMeasurement> {
    evaluated
        .iter()
        .filter(|e| e.measurement.location == location)
        .max_by_key(|e| e.measurement.timestamp)
}

fn hours_between(prior: &Measurement, current: &Measurement) -> f64 {
    (current.timestamp - prior.timestamp).num_milliseconds() as f64 / 3_600_000.0
}

fn classify(
    m: &Measurement,
    delta_hours: Option<f64>,
    prior_temperature: Option<f64>,
    prior_humidity: Option<f64>,
    g: &GuidelineConfig,
) -> (RangeStatus, Vec<Flag>) {
    let mut status = RangeStatus::Core;
    let mut flags = Vec::new();
    let temp = m.temperature_c;
    let rh = m.relative_humidity_pct;

    if !g.temp_core.contains(temp) {
        status = status.escalate(RangeStatus::Out);
        flags.push(Flag::danger("Temp out of range"));
    }

    if !g.rh_core.contains(rh) {
        if g.rh_outer.contains(rh) {
            status = status.escalate(RangeStatus::Outer);
            flags.push(Flag::warn("RH in outer band"));
        } else {
            status = status.escalate(RangeStatus::Out);
            flags.push(Flag::danger("RH out of range"));
        }
    }

    if rh >= g.mould_risk_rh {
        flags.push(Flag::danger("Mould risk"));
    }

    if let Some(outside) = &m.outside {
        if let Some(outside_temp) = outside.temp_c {
            let delta = temp - outside_temp;
            if delta.abs() > g.outside_temp_delta_warn {
                flags.push(Flag::warn(format!("Temp delta vs outside {delta:+.1} C")));
            }
        }
        if let Some(outside_rh) = outside.rh {
            let delta = rh - outside_rh;
            if delta.abs() > g.outside_rh_delta_warn {
                flags.push(Flag::warn(format!("RH delta vs outside {delta:+.1}%")));
            }
        }
    }

    if let Some(hours) = delta_hours {
        if hours <= 24.0 {
            let temp_drift = prior_temperature.map(|p| (temp - p).abs()).unwrap_or(0.0);
            let rh_drift = prior_humidity.map(|p| (rh - p).abs()).unwrap_or(0.0);
            if temp_drift > g.temp_max_drift {
                flags.push(Flag::warn(format!("Temp drift {temp_drift:.1} C/24h")));
            }
            if rh_drift > g.rh_max_drift {
                flags.push(Flag::warn(format!("RH drift {rh_drift:.1}%/24h")));
            }
        }
    }

    (status, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutsideSnapshot, Severity};
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(9, 0, 0))
            .unwrap()
    }

    fn sample(location: Location, hours_after: i64, temp: f64, rh: f64) -> Measurement {
        Measurement {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: base_time() + Duration::hours(hours_after),
            location,
            temperature_c: temp,
            relative_humidity_pct: rh,
            lux: None,
            uv: None,
            co2_ppm: None,
            outside: None,
            notes: None,
        }
    }

    fn labels(e: &EvaluatedMeasurement) -> Vec<&str> {
        e.flags.iter().map(|f| f.label.as_str()).collect()
    }

    fn single(m: Measurement) -> EvaluatedMeasurement {
        evaluate(&[m], &GuidelineConfig::default()).remove(0)
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(evaluate(&[], &GuidelineConfig::default()).is_empty());
    }

    #[test]
    fn compliant_reading_is_core_and_stable() {
        for (temp, rh) in [(15.0, 45.0), (20.0, 50.0), (25.0, 55.0)] {
            let e = single(sample(Location::Compactus, 0, temp, rh));
            assert_eq!(e.range_status, RangeStatus::Core);
            assert!(e.is_stable());
            assert_eq!(e.flags_text(), "Stable");
            assert_eq!(e.delta_hours_since_prior, None);
        }
    }

    #[test]
    fn hot_reading_is_out_of_range() {
        let e = single(sample(Location::Workroom, 0, 26.0, 50.0));
        assert_eq!(e.range_status, RangeStatus::Out);
        assert_eq!(e.flags, vec![Flag::danger("Temp out of range")]);
    }

    #[test]
    fn humidity_in_outer_band_warns() {
        let e = single(sample(Location::Workroom, 0, 20.0, 42.0));
        assert_eq!(e.range_status, RangeStatus::Outer);
        assert_eq!(labels(&e), vec!["RH in outer band"]);
        assert_eq!(e.flags[0].severity, Severity::Warn);
    }

    #[test]
    fn outer_band_does_not_downgrade_out() {
        let e = single(sample(Location::Workroom, 0, 26.0, 58.0));
        assert_eq!(e.range_status, RangeStatus::Out);
        assert_eq!(labels(&e), vec!["Temp out of range", "RH in outer band"]);
    }

    #[test]
    fn humidity_outside_outer_band_is_out() {
        let e = single(sample(Location::Workroom, 0, 20.0, 35.0));
        assert_eq!(e.range_status, RangeStatus::Out);
        assert_eq!(labels(&e), vec!["RH out of range"]);
    }

    #[test]
    fn outer_band_edges_are_inclusive() {
        assert_eq!(single(sample(Location::Compactus, 0, 20.0, 40.0)).range_status, RangeStatus::Outer);
        assert_eq!(single(sample(Location::Compactus, 0, 20.0, 60.0)).range_status, RangeStatus::Outer);
        assert_eq!(single(sample(Location::Compactus, 0, 20.0, 60.5)).range_status, RangeStatus::Out);
    }

    #[test]
    fn mould_risk_is_flagged_independently() {
        let e = single(sample(Location::Compactus, 0, 20.0, 75.0));
        assert_eq!(e.range_status, RangeStatus::Out);
        assert!(labels(&e).contains(&"Mould risk"));

        let mut g = GuidelineConfig::default();
        g.mould_risk_rh = 50.0;
        let e = evaluate(&[sample(Location::Compactus, 0, 20.0, 52.0)], &g).remove(0);
        assert_eq!(e.range_status, RangeStatus::Core);
        assert_eq!(e.flags, vec![Flag::danger("Mould risk")]);
    }

    #[test]
    fn drift_within_a_day_is_flagged() {
        let readings = vec![
            sample(Location::Compactus, 0, 20.0, 50.0),
            sample(Location::Compactus, 1, 25.0, 50.0),
        ];
        let evaluated = evaluate(&readings, &GuidelineConfig::default());
        assert!(evaluated[0].is_stable());
        assert_eq!(evaluated[1].delta_hours_since_prior, Some(1.0));
        assert_eq!(evaluated[1].prior_temperature, Some(20.0));
        assert!(labels(&evaluated[1]).contains(&"Temp drift 5.0 C/24h"));
    }

    #[test]
    fn drift_outside_the_window_is_ignored() {
        let readings = vec![
            sample(Location::Compactus, 0, 20.0, 50.0),
            sample(Location::Compactus, 30, 25.0, 50.0),
        ];
        let evaluated = evaluate(&readings, &GuidelineConfig::default());
        assert!(evaluated[1].is_stable());
    }

    #[test]
    fn drift_window_includes_exactly_24_hours() {
        let readings = vec![
            sample(Location::Compactus, 0, 20.0, 45.0),
            sample(Location::Compactus, 24, 20.0, 52.0),
        ];
        let evaluated = evaluate(&readings, &GuidelineConfig::default());
        assert_eq!(labels(&evaluated[1]), vec!["RH drift 7.0%/24h"]);
    }

    #[test]
    fn drift_uses_prior_reading_from_same_location_only() {
        let readings = vec![
            sample(Location::Workroom, 1, 24.0, 50.0),
            sample(Location::Compactus, 0, 18.0, 50.0),
            sample(Location::Compactus, 2, 19.0, 50.0),
        ];
        let evaluated = evaluate(&readings, &GuidelineConfig::default());
        let workroom = evaluated
            .iter()
            .find(|e| e.measurement.location == Location::Workroom)
            .unwrap();
        assert_eq!(workroom.prior_temperature, None);
        assert!(workroom.is_stable());
        assert!(evaluated.iter().all(|e| e.is_stable()));
    }

    #[test]
    fn unsorted_input_is_ordered_by_time_within_location() {
        let readings = vec![
            sample(Location::Compactus, 5, 21.0, 50.0),
            sample(Location::Compactus, 0, 20.0, 50.0),
        ];
        let evaluated = evaluate(&readings, &GuidelineConfig::default());
        assert_eq!(evaluated[0].measurement.temperature_c, 20.0);
        assert_eq!(evaluated[1].delta_hours_since_prior, Some(5.0));
    }

    #[test]
    fn outside_deltas_are_signed() {
        let mut m = sample(Location::SpecialCollectionsRoom, 0, 20.0, 50.0);
        m.outside = Some(OutsideSnapshot {
            time: Some("2026-03-02T09:00".to_string()),
            temp_c: Some(30.5),
            rh: Some(30.0),
            dew_point_c: None,
        });
        let e = single(m);
        assert_eq!(e.range_status, RangeStatus::Core);
        assert_eq!(
            labels(&e),
            vec!["Temp delta vs outside -10.5 C", "RH delta vs outside +20.0%"]
        );
        assert!(e.flags.iter().all(|f| f.severity == Severity::Warn));
        assert_eq!(e.outside_temp_delta(), Some(-10.5));
    }

    #[test]
    fn small_outside_deltas_are_not_flagged() {
        let mut m = sample(Location::SpecialCollectionsRoom, 0, 20.0, 50.0);
        m.outside = Some(OutsideSnapshot {
            time: None,
            temp_c: Some(14.0),
            rh: None,
            dew_point_c: None,
        });
        assert!(single(m).is_stable());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let readings = vec![
            sample(Location::Compactus, 0, 20.0, 50.0),
            sample(Location::Compactus, 3, 26.0, 62.0),
            sample(Location::Workroom, 1, 19.0, 41.0),
        ];
        let g = GuidelineConfig::default();
        assert_eq!(evaluate(&readings, &g), evaluate(&readings, &g));
    }

    #[test]
    fn latest_for_picks_most_recent_reading() {
        let readings = vec![
            sample(Location::Compactus, 4, 21.0, 50.0),
            sample(Location::Compactus, 0, 20.0, 50.0),
        ];
        let evaluated = evaluate(&readings, &GuidelineConfig::default());
        let latest = latest_for(&evaluated, Location::Compactus).unwrap();
        assert_eq!(latest.measurement.temperature_c, 21.0);
        assert!(latest_for(&evaluated, Location::Workroom).is_none());
    }
}
