//! surface::interpolator — piecewise-linear response curves with extrapolation.
//!
//! A [`LinearInterpolator`] maps an amount to a value using the sorted,
//! deduplicated `(amount, value)` nodes observed for one key. It reproduces
//! the observed values exactly at the nodes, interpolates linearly between
//! them, and extrapolates linearly beyond the first/last segment (no
//! clamping). A single node yields a constant function.

/// Piecewise-linear function fit from observed nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearInterpolator {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolator {
    /// Fit an interpolator from unsorted nodes.
    ///
    /// Nodes are sorted by amount; repeated amounts are collapsed into the
    /// mean of their values. `points` must be non-empty and finite, which the
    /// evaluator guarantees through [`SampleTable`](crate::surface::SampleTable)
    /// validation. An empty input produces the zero function.
    pub fn fit(points: &[(f64, f64)]) -> Self {
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut xs: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut ys: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut run_len = 0usize;
        for (x, y) in sorted {
            match xs.last() {
                Some(&last) if last == x => {
                    run_len += 1;
                    if let Some(acc) = ys.last_mut() {
                        *acc += (y - *acc) / run_len as f64;
                    }
                }
                _ => {
                    xs.push(x);
                    ys.push(y);
                    run_len = 1;
                }
            }
        }
        Self { xs, ys }
    }

    /// Evaluate at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        match self.xs.len() {
            0 => 0.0,
            1 => self.ys[0],
            n => {
                // Index of the segment's left node, clamped so that points
                // outside the domain reuse the first or last segment.
                let upper = self.xs.partition_point(|&node| node <= x);
                let i = upper.saturating_sub(1).min(n - 2);
                let (x0, x1) = (self.xs[i], self.xs[i + 1]);
                let (y0, y1) = (self.ys[i], self.ys[i + 1]);
                y0 + (y1 - y0) * (x - x0) / (x1 - x0)
            }
        }
    }

    /// Observed amounts, ascending and distinct.
    pub fn nodes(&self) -> &[f64] {
        &self.xs
    }

    /// Values at [`nodes`](Self::nodes).
    pub fn values(&self) -> &[f64] {
        &self.ys
    }
}
