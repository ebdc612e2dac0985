//! Summary statistics for numeric fields

use serde::Serialize;

use crate::column::Column;

/// Count, mean, standard deviation and range of a numeric field.
///
/// Missing values are counted in `null_count` and excluded from the moments.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FieldStats {
    pub count: usize,
    pub null_count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStats {
    /// Compute over all rows, or only rows whose membership flag is set
    pub fn compute(column: &Column, membership: Option<&[bool]>) -> Self {
        let mut acc = Accumulator::default();
        for row in 0..column.len() {
            if membership.map_or(true, |mask| mask[row]) {
                acc.push(column.number(row));
            }
        }
        acc.finish()
    }
}

/// Welford's online mean and variance
#[derive(Default)]
struct Accumulator {
    count: usize,
    null_count: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn push(&mut self, value: Option<f64>) {
        let Some(v) = value else {
            self.null_count += 1;
            return;
        };
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
    }

    fn finish(self) -> FieldStats {
        let std_dev = if self.count > 0 {
            (self.m2 / self.count as f64).sqrt()
        } else {
            0.0
        };
        FieldStats {
            count: self.count,
            null_count: self.null_count,
            mean: self.mean,
            std_dev,
            min: self.min,
            max: self.max,
        }
    }
}
