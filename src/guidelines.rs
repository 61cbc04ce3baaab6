/// Inclusive numeric band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Immutable guideline thresholds, passed into the engine at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidelineConfig {
    pub temp_core: Band,
    /// Largest acceptable temperature change between readings within 24h.
    pub temp_max_drift: f64,
    pub rh_core: Band,
    /// Seasonal allowance around the RH core band.
    pub rh_outer: Band,
    pub rh_max_drift: f64,
    pub mould_risk_rh: f64,
    pub outside_temp_delta_warn: f64,
    pub outside_rh_delta_warn: f64,
}

impl Default for GuidelineConfig {
    fn default() -> Self {
        Self {
            temp_core: Band::new(15.0, 25.0),
            temp_max_drift: 4.0,
            rh_core: Band::new(45.0, 55.0),
            rh_outer: Band::new(40.0, 60.0),
            rh_max_drift: 5.0,
            mould_risk_rh: 70.0,
            outside_temp_delta_warn: 6.0,
            outside_rh_delta_warn: 15.0,
        }
    }
}

/// Reference point used for outside conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct OutsideReference {
    pub label: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: &'static str,
}

pub const OUTSIDE_REFERENCE: OutsideReference = OutsideReference {
    label: "East Melbourne, VIC",
    latitude: -37.813,
    longitude: 144.985,
    timezone: "Australia/Melbourne",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_inclusive_at_both_ends() {
        let band = Band::new(45.0, 55.0);
        assert!(band.contains(45.0));
        assert!(band.contains(55.0));
        assert!(!band.contains(44.9));
        assert!(!band.contains(55.1));
    }
}
