use serde::Serialize;

use crate::entries::GlucoseReading;

/// Readings below this are sensor artifacts, not physiology (2.2 mmol/L).
pub const MIN_VALID_GLUCOSE_MGDL: i32 = 40;

/// Upper bound of the "very low" band (exclusive), 3.0 mmol/L.
pub const VERY_LOW_BELOW_MGDL: f64 = 54.0;
/// Upper bound of the "above target" band (inclusive), 10.0 mmol/L.
pub const ABOVE_TARGET_MAX_MGDL: f64 = 180.0;
/// Upper bound of the "high" band (inclusive), 13.9 mmol/L.
pub const HIGH_MAX_MGDL: f64 = 250.0;

/// Inclusive mg/dL bounds of the time-in-range band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetRange {
    pub low: f64,
    pub high: f64,
}

impl Default for TargetRange {
    fn default() -> Self {
        Self {
            low: 70.0,
            high: 140.0,
        }
    }
}

impl TargetRange {
    /// Accepts only bounds that keep the six bands a partition.
    pub fn new(low: f64, high: f64) -> Option<Self> {
        let valid = low.is_finite()
            && high.is_finite()
            && low >= VERY_LOW_BELOW_MGDL
            && low <= high
            && high <= ABOVE_TARGET_MAX_MGDL;
        valid.then_some(Self { low, high })
    }
}

/// Descriptive statistics over a non-empty set of mg/dL samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSummary {
    pub sample_count: usize,
    pub mean: f64,
    pub standard_deviation: f64,
    pub coefficient_of_variation: f64,
    pub min: i32,
    pub max: i32,
    pub percent_in_range: f64,
    pub percent_very_low: f64,
    pub percent_low: f64,
    pub percent_above_target: f64,
    pub percent_high: f64,
    pub percent_very_high: f64,
    pub estimated_a1c: f64,
}

impl StatisticsSummary {
    /// Sum of the six band percentages. 100 up to per-band rounding.
    pub fn band_total(&self) -> f64 {
        self.percent_very_low
            + self.percent_low
            + self.percent_in_range
            + self.percent_above_target
            + self.percent_high
            + self.percent_very_high
    }
}

/// Non-null glucose values at or above [`MIN_VALID_GLUCOSE_MGDL`].
pub fn valid_glucose_values(readings: &[GlucoseReading]) -> Vec<i32> {
    readings
        .iter()
        .filter_map(|r| r.sgv)
        .filter(|v| *v >= MIN_VALID_GLUCOSE_MGDL)
        .collect()
}

/// Statistics with the default 70-140 mg/dL target band.
///
/// Returns `None` for an empty sample set, which callers treat as "no data".
pub fn compute_statistics(values: &[i32]) -> Option<StatisticsSummary> {
    compute_statistics_in_range(values, &TargetRange::default())
}

pub fn compute_statistics_in_range(
    values: &[i32],
    target: &TargetRange,
) -> Option<StatisticsSummary> {
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    let n = values.len() as f64;

    let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| (f64::from(*v) - mean).powi(2))
        .sum::<f64>()
        / n;
    let standard_deviation = variance.sqrt();
    let coefficient_of_variation = if mean > 0.0 {
        standard_deviation / mean * 100.0
    } else {
        0.0
    };

    let mut bands = BandCounts::default();
    for value in values {
        bands.record(f64::from(*value), target);
    }
    let pct = |count: usize| round1(count as f64 / n * 100.0);

    Some(StatisticsSummary {
        sample_count: values.len(),
        mean: round1(mean),
        standard_deviation: round1(standard_deviation),
        coefficient_of_variation: round1(coefficient_of_variation),
        min,
        max,
        percent_in_range: pct(bands.in_range),
        percent_very_low: pct(bands.very_low),
        percent_low: pct(bands.low),
        percent_above_target: pct(bands.above_target),
        percent_high: pct(bands.high),
        percent_very_high: pct(bands.very_high),
        estimated_a1c: estimated_a1c(mean),
    })
}

#[derive(Debug, Default)]
struct BandCounts {
    very_low: usize,
    low: usize,
    in_range: usize,
    above_target: usize,
    high: usize,
    very_high: usize,
}

impl BandCounts {
    fn record(&mut self, value: f64, target: &TargetRange) {
        if value < VERY_LOW_BELOW_MGDL {
            self.very_low += 1;
        } else if value < target.low {
            self.low += 1;
        } else if value <= target.high {
            self.in_range += 1;
        } else if value <= ABOVE_TARGET_MAX_MGDL {
            self.above_target += 1;
        } else if value <= HIGH_MAX_MGDL {
            self.high += 1;
        } else {
            self.very_high += 1;
        }
    }
}

/// Linear mean-glucose to HbA1c approximation (ADAG), rounded to 0.1.
pub fn estimated_a1c(mean_mgdl: f64) -> f64 {
    round1((mean_mgdl + 46.7) / 28.7)
}

/// Round to one decimal place, ties to even (`6.25` -> `6.2`).
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sgv: Option<i32>) -> GlucoseReading {
        GlucoseReading {
            id: None,
            date: 0,
            sgv,
            direction: None,
            delta: None,
            device: None,
            kind: None,
        }
    }

    #[test]
    fn empty_input_is_no_data() {
        assert_eq!(compute_statistics(&[]), None);
    }

    #[test]
    fn constant_series_has_zero_spread_and_one_full_band() {
        let stats = compute_statistics(&[100; 12]).unwrap();
        assert_eq!(stats.sample_count, 12);
        assert_eq!(stats.mean, 100.0);
        assert_eq!(stats.standard_deviation, 0.0);
        assert_eq!(stats.coefficient_of_variation, 0.0);
        assert_eq!(stats.percent_in_range, 100.0);
        assert_eq!(stats.min, 100);
        assert_eq!(stats.max, 100);

        let high = compute_statistics(&[300; 4]).unwrap();
        assert_eq!(high.percent_very_high, 100.0);
        assert_eq!(high.percent_in_range, 0.0);
    }

    #[test]
    fn non_positive_mean_reports_zero_cv() {
        let stats = compute_statistics(&[0, 0, 0]).unwrap();
        assert_eq!(stats.coefficient_of_variation, 0.0);
        let negative = compute_statistics(&[-10, -20]).unwrap();
        assert_eq!(negative.coefficient_of_variation, 0.0);
        assert_eq!(negative.percent_very_low, 100.0);
    }

    #[test]
    fn band_boundaries_follow_the_partition() {
        let cases = [
            (53, "very_low"),
            (54, "low"),
            (69, "low"),
            (70, "in_range"),
            (140, "in_range"),
            (141, "above_target"),
            (180, "above_target"),
            (181, "high"),
            (250, "high"),
            (251, "very_high"),
        ];
        for (value, band) in cases {
            let stats = compute_statistics(&[value]).unwrap();
            let got = [
                ("very_low", stats.percent_very_low),
                ("low", stats.percent_low),
                ("in_range", stats.percent_in_range),
                ("above_target", stats.percent_above_target),
                ("high", stats.percent_high),
                ("very_high", stats.percent_very_high),
            ];
            for (name, pct) in got {
                let expected = if name == band { 100.0 } else { 0.0 };
                assert_eq!(pct, expected, "value {value} band {name}");
            }
        }
    }

    #[test]
    fn band_percentages_sum_to_one_hundred() {
        let values = [45, 60, 65, 72, 99, 120, 133, 150, 170, 190, 222, 260, 301];
        let stats = compute_statistics(&values).unwrap();
        assert!((stats.band_total() - 100.0).abs() <= 0.6);
    }

    #[test]
    fn population_standard_deviation_and_cv() {
        let stats = compute_statistics(&[100, 200]).unwrap();
        assert_eq!(stats.mean, 150.0);
        assert_eq!(stats.standard_deviation, 50.0);
        assert_eq!(stats.coefficient_of_variation, 33.3);
        assert_eq!(stats.percent_in_range, 50.0);
        assert_eq!(stats.percent_high, 50.0);
    }

    #[test]
    fn a1c_uses_linear_approximation() {
        assert_eq!(estimated_a1c(126.5), 6.0);
        assert_eq!(estimated_a1c(154.0), 7.0);
        let stats = compute_statistics(&[126, 127]).unwrap();
        assert_eq!(stats.estimated_a1c, 6.0);
    }

    #[test]
    fn custom_target_moves_low_and_in_range_bounds() {
        let target = TargetRange::new(80.0, 160.0).unwrap();
        let stats = compute_statistics_in_range(&[75, 80, 160, 161], &target).unwrap();
        assert_eq!(stats.percent_low, 25.0);
        assert_eq!(stats.percent_in_range, 50.0);
        assert_eq!(stats.percent_above_target, 25.0);
    }

    #[test]
    fn target_range_rejects_bounds_that_break_the_partition() {
        assert!(TargetRange::new(50.0, 140.0).is_none());
        assert!(TargetRange::new(120.0, 100.0).is_none());
        assert!(TargetRange::new(70.0, 200.0).is_none());
        assert!(TargetRange::new(f64::NAN, 140.0).is_none());
    }

    #[test]
    fn exact_ties_round_to_even() {
        let mut values = vec![100; 15];
        values.push(50);
        let stats = compute_statistics(&values).expect("sixteen samples must summarize");
        assert_eq!(stats.percent_very_low, 6.2);
        assert_eq!(stats.percent_in_range, 93.8);
        let bands = stats.percent_very_low
            + stats.percent_low
            + stats.percent_in_range
            + stats.percent_above_target
            + stats.percent_high
            + stats.percent_very_high;
        assert!((bands - 100.0).abs() < 1e-9);

        let mean = compute_statistics(&[126, 126, 126, 127]).expect("four samples must summarize");
        assert_eq!(mean.mean, 126.2);
    }

    #[test]
    fn valid_values_skip_nulls_and_sensor_artifacts() {
        let readings = vec![
            reading(Some(39)),
            reading(Some(40)),
            reading(None),
            reading(Some(180)),
        ];
        assert_eq!(valid_glucose_values(&readings), vec![40, 180]);
    }
}
