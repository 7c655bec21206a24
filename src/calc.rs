use serde::Serialize;
use std::collections::HashMap;

/// Grade bands checked top-down; the first band whose floor the total
/// reaches wins. A total below every floor falls through to 0.0.
const GRADE_BANDS: [(f64, f64); 8] = [
    (80.0, 4.0),
    (75.0, 3.5),
    (70.0, 3.0),
    (65.0, 2.5),
    (60.0, 2.0),
    (55.0, 1.5),
    (50.0, 1.0),
    (0.0, 0.0),
];

pub const HISTOGRAM_BUCKETS: usize = 20;
pub const HISTOGRAM_WIDTH: i64 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDef {
    pub id: i64,
    pub name: String,
    pub weight: f64,
    pub sort_order: i64,
}

/// Weighted total over the graded cells only. An ungraded component
/// contributes nothing; the sum is NOT rescaled to the graded weight, so a
/// half-graded ledger reads as a running total out of 100. No graded cell
/// at all means "no total yet", not zero.
pub fn weighted_total(components: &[ComponentDef], cells: &HashMap<i64, f64>) -> Option<f64> {
    let mut graded = false;
    let mut sum = 0.0;
    for c in components {
        if let Some(v) = cells.get(&c.id) {
            graded = true;
            sum += v * c.weight / 100.0;
        }
    }
    graded.then_some(sum)
}

pub fn score_to_grade(total: f64) -> f64 {
    for (min, grade) in GRADE_BANDS {
        if total >= min {
            return grade;
        }
    }
    0.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub n: i64,
    pub mean: f64,
    pub variance: f64,
    pub sd: f64,
    pub min: f64,
    pub max: f64,
}

/// Population statistics (divide by n, not n-1) over the students that have
/// a total. Nobody graded means no statistics, never a row of zeros.
pub fn class_statistics(totals: &[f64]) -> Option<ClassStatistics> {
    if totals.is_empty() {
        return None;
    }
    let n = totals.len() as f64;
    let mean = totals.iter().sum::<f64>() / n;
    let variance = totals.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &t in totals {
        min = min.min(t);
        max = max.max(t);
    }
    Some(ClassStatistics {
        n: totals.len() as i64,
        mean,
        variance,
        sd: variance.sqrt(),
        min,
        max,
    })
}

/// Percent of the population strictly below `value`, rounded to the nearest
/// integer. Equal totals do not count as "below", so tied students share a
/// percentile.
pub fn percentile(totals: &[f64], value: f64) -> Option<i64> {
    if totals.is_empty() {
        return None;
    }
    let below = totals.iter().filter(|&&t| t < value).count();
    Some((100.0 * below as f64 / totals.len() as f64).round() as i64)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    pub label: String,
    pub min: i64,
    pub max: i64,
    pub count: i64,
}

/// Fixed 20-bucket distribution of totals in steps of 5. The last bucket is
/// "95-100" so a perfect 100 lands inside the range instead of overflowing.
/// Empty buckets are kept so the shell can render the full axis.
pub fn histogram(totals: &[f64]) -> Vec<HistogramBucket> {
    let mut buckets: Vec<HistogramBucket> = (0..HISTOGRAM_BUCKETS as i64)
        .map(|i| {
            let min = i * HISTOGRAM_WIDTH;
            let max = if i == HISTOGRAM_BUCKETS as i64 - 1 {
                100
            } else {
                min + HISTOGRAM_WIDTH - 1
            };
            HistogramBucket {
                label: format!("{}-{}", min, max),
                min,
                max,
                count: 0,
            }
        })
        .collect();

    for &t in totals {
        let idx = if t >= 100.0 {
            HISTOGRAM_BUCKETS - 1
        } else {
            ((t / HISTOGRAM_WIDTH as f64).floor() as usize).min(HISTOGRAM_BUCKETS - 1)
        };
        buckets[idx].count += 1;
    }
    buckets
}
