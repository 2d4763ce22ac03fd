//! Duty maps: duties as a function of fan coordinates.
//!
//! Replaces free-form scripting with a data-plane contract: either a
//! precomputed matrix or a pure function value evaluated per fan. Nothing
//! here ever evaluates source text.

use std::fmt;
use std::sync::Arc;

/// Everything a duty function may depend on for one fan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanContext {
    pub row: usize,
    pub col: usize,
    pub layer: usize,
    pub slave: usize,
    pub fan: usize,
    /// Last commanded duty for this fan, [0, 1].
    pub dc: f64,
    /// Last observed RPM for this fan.
    pub rpm: f64,
    pub rows: usize,
    pub cols: usize,
    pub layers: usize,
    pub n_slaves: usize,
    pub max_fans: usize,
    pub max_rpm: f64,
    /// Seconds since the map was activated.
    pub t: f64,
    /// Tick counter since the map was activated.
    pub step: u64,
}

/// A duty source: matrix of precomputed values or a function value.
#[derive(Clone)]
pub enum DutyMap {
    /// Row-major `rows x cols` duties in [0, 1].
    Matrix { rows: usize, cols: usize, duties: Vec<f64> },
    /// Pure function of fan coordinates.
    Func(Arc<dyn Fn(&FanContext) -> f64 + Send + Sync>),
}

impl DutyMap {
    /// Build a matrix map, rejecting shape mismatches.
    pub fn matrix(rows: usize, cols: usize, duties: Vec<f64>) -> Option<Self> {
        if duties.len() == rows * cols {
            Some(DutyMap::Matrix { rows, cols, duties })
        } else {
            None
        }
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&FanContext) -> f64 + Send + Sync + 'static,
    {
        DutyMap::Func(Arc::new(f))
    }

    /// Evaluate for one fan; results are clamped to [0, 1].
    pub fn duty(&self, ctx: &FanContext) -> f64 {
        let raw = match self {
            DutyMap::Matrix { rows: _, cols, duties } => {
                duties.get(ctx.row * cols + ctx.col).copied().unwrap_or(0.0)
            }
            DutyMap::Func(f) => f(ctx),
        };
        raw.clamp(0.0, 1.0)
    }

    /// One-line description for log headers.
    pub fn describe(&self) -> String {
        match self {
            DutyMap::Matrix { rows, cols, .. } => format!("matrix {}x{}", rows, cols),
            DutyMap::Func(_) => "function".to_string(),
        }
    }
}

impl fmt::Debug for DutyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(row: usize, col: usize) -> FanContext {
        FanContext {
            row,
            col,
            layer: 0,
            slave: 0,
            fan: 0,
            dc: 0.0,
            rpm: 0.0,
            rows: 2,
            cols: 2,
            layers: 1,
            n_slaves: 1,
            max_fans: 4,
            max_rpm: 25_000.0,
            t: 0.0,
            step: 0,
        }
    }

    #[test]
    fn matrix_lookup_is_row_major() {
        let map = DutyMap::matrix(2, 2, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        assert!((map.duty(&ctx(0, 1)) - 0.2).abs() < f64::EPSILON);
        assert!((map.duty(&ctx(1, 0)) - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn matrix_shape_mismatch_rejected() {
        assert!(DutyMap::matrix(2, 2, vec![0.1; 3]).is_none());
    }

    #[test]
    fn func_output_is_clamped() {
        let map = DutyMap::func(|c| c.row as f64 * 10.0);
        assert!((map.duty(&ctx(1, 0)) - 1.0).abs() < f64::EPSILON);
        let map = DutyMap::func(|_| -3.0);
        assert_eq!(map.duty(&ctx(0, 0)), 0.0);
    }
}
