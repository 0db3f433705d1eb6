//! Module for the single-pass statistics kept while a source streams through the engine:
//! running mean/variance per numeric column and a uniform reservoir sample of rows.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::{Cell, Table};


/// Welford accumulator for one column.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Combines two accumulators as if all values had been pushed into one (Chan et al.).
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        self.mean += delta * n_b / count as f64;
        self.m2 += other.m2 + delta * delta * n_a * n_b / count as f64;
        self.count = count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample variance, undefined for fewer than two values.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            count: self.count,
            mean: self.mean(),
            variance: self.variance(),
            std: self.std_dev(),
            min: self.min(),
            max: self.max(),
            iqr: None,
        }
    }
}

/// Serializable final state of a [`RunningStats`], folded into the run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: u64,
    pub mean: Option<f64>,
    pub variance: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iqr: Option<IqrSummary>,
}

/// Running statistics for every numeric column seen in a stream of batches.
#[derive(Debug, Clone, Default)]
pub struct ColumnStats {
    columns: BTreeMap<String, RunningStats>,
}

impl ColumnStats {
    /// Folds the numeric cells of `table` into the accumulators. Missing and non-numeric cells
    /// are skipped; a column gets an accumulator once it has produced a number.
    pub fn observe(&mut self, table: &Table) {
        for (index, name) in table.columns().iter().enumerate() {
            let mut numbers = table.column(index).filter_map(Cell::as_number).peekable();
            if numbers.peek().is_none() {
                continue;
            }
            let stats = self.columns.entry(name.clone()).or_default();
            numbers.for_each(|v| stats.push(v));
        }
    }

    pub fn get(&self, column: &str) -> Option<&RunningStats> {
        self.columns.get(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RunningStats)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn snapshots(&self) -> BTreeMap<String, StatsSnapshot> {
        self.columns
            .iter()
            .map(|(name, stats)| (name.clone(), stats.snapshot()))
            .collect()
    }
}

/// Fixed-capacity uniform sample of a stream of unknown length (algorithm R).
#[derive(Debug, Clone)]
pub struct Reservoir<T, R = StdRng> {
    capacity: usize,
    seen: u64,
    items: Vec<T>,
    rng: R,
}

impl<T> Reservoir<T, StdRng> {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    pub fn seeded(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }
}

impl<T, R: Rng> Reservoir<T, R> {
    pub fn with_rng(capacity: usize, rng: R) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity.min(4096)),
            rng,
        }
    }

    /// Offers the next stream element. The i-th element (1-based) past the capacity replaces a
    /// uniformly chosen slot with probability `capacity / i`.
    pub fn offer(&mut self, item: T) {
        self.seen += 1;
        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }
        let slot = self.rng.gen_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.items[slot as usize] = item;
        }
    }

    pub fn offer_all(&mut self, items: impl IntoIterator<Item = T>) {
        items.into_iter().for_each(|item| self.offer(item));
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Tukey fences of a numeric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqrSummary {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub low: f64,
    pub high: f64,
    pub n_outliers: u64,
}

impl IqrSummary {
    /// Computes quartiles with linear interpolation and counts values outside
    /// `[q1 - 1.5 iqr, q3 + 1.5 iqr]`. `None` for an empty sample.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        let low = q1 - 1.5 * iqr;
        let high = q3 + 1.5 * iqr;
        let n_outliers = sorted.iter().filter(|v| **v < low || **v > high).count() as u64;
        Some(Self {
            q1,
            q3,
            iqr,
            low,
            high,
            n_outliers,
        })
    }

    /// Computes the summary for every numeric column of `table`.
    pub fn per_column(table: &Table) -> BTreeMap<String, IqrSummary> {
        table
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(index, name)| {
                let values: Vec<f64> = table.column(index).filter_map(Cell::as_number).collect();
                Self::from_values(&values).map(|summary| (name.clone(), summary))
            })
            .collect()
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}
