//! optimization::lp — dense two-phase simplex for small linear programs.
//!
//! Purpose
//! -------
//! Solve the small linear programs that appear inside the allocation
//! strategies: the trust-region sub-problems of the local strategy and the
//! relaxations explored by the exact MILP branch and bound.
//!
//! Formulation
//! -----------
//! ```text
//! minimize    c · x
//! subject to  a_i · x  (≤ | ≥ | =)  b_i     for every row i
//!             0 ≤ x_j ≤ u_j                  (u_j optional)
//! ```
//!
//! Invariants & assumptions
//! ------------------------
//! - Problems are small (tens to a few hundred columns); the tableau is
//!   dense and reduced costs are recomputed from the basis every pivot.
//! - Bland's rule is used for both entering and leaving variables, so the
//!   method cannot cycle. An iteration cap still guards pathological input.
//! - Rows and the objective are normalized by their largest coefficient
//!   before solving; reported objectives are in the caller's units.

/// Constraint sense of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

/// Result of [`LinearProgram::solve`].
#[derive(Debug, Clone, PartialEq)]
pub enum LpOutcome {
    Optimal { x: Vec<f64>, objective: f64 },
    Infeasible,
    Unbounded,
    IterationLimit,
}

const PIVOT_EPS: f64 = 1e-11;
const FEAS_EPS: f64 = 1e-9;
const MAX_PIVOTS: usize = 50_000;

/// Linear program over non-negative variables.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearProgram {
    objective: Vec<f64>,
    rows: Vec<(Vec<f64>, Relation, f64)>,
}

impl LinearProgram {
    /// New program minimizing `objective · x` with `x ≥ 0`.
    pub fn minimize(objective: Vec<f64>) -> Self {
        Self { objective, rows: Vec::new() }
    }

    pub fn n_vars(&self) -> usize {
        self.objective.len()
    }

    /// Add a dense row. Short rows are padded with zeros.
    pub fn add_row(&mut self, mut coeffs: Vec<f64>, relation: Relation, rhs: f64) {
        coeffs.resize(self.objective.len(), 0.0);
        self.rows.push((coeffs, relation, rhs));
    }

    /// Add `x_j ≤ upper`.
    pub fn add_upper_bound(&mut self, j: usize, upper: f64) {
        let mut coeffs = vec![0.0; self.objective.len()];
        coeffs[j] = 1.0;
        self.rows.push((coeffs, Relation::Le, upper));
    }

    /// Add `x_j ≥ lower`.
    pub fn add_lower_bound(&mut self, j: usize, lower: f64) {
        let mut coeffs = vec![0.0; self.objective.len()];
        coeffs[j] = 1.0;
        self.rows.push((coeffs, Relation::Ge, lower));
    }

    /// Solve with the two-phase simplex method.
    pub fn solve(&self) -> LpOutcome {
        let n = self.objective.len();
        let m = self.rows.len();

        // Normalize rows so that b ≥ 0 and the largest coefficient is 1.
        let mut rows: Vec<(Vec<f64>, Relation, f64)> = Vec::with_capacity(m);
        for (coeffs, relation, rhs) in &self.rows {
            let norm = coeffs.iter().fold(rhs.abs(), |acc, a| acc.max(a.abs()));
            let norm = if norm > 0.0 { norm } else { 1.0 };
            let mut a: Vec<f64> = coeffs.iter().map(|v| v / norm).collect();
            let mut b = rhs / norm;
            let mut rel = *relation;
            if b < 0.0 {
                a.iter_mut().for_each(|v| *v = -*v);
                b = -b;
                rel = match rel {
                    Relation::Le => Relation::Ge,
                    Relation::Ge => Relation::Le,
                    Relation::Eq => Relation::Eq,
                };
            }
            rows.push((a, rel, b));
        }

        // Column layout: [original | slack/surplus | artificial | rhs].
        let n_slack = rows.iter().filter(|r| r.1 != Relation::Eq).count();
        let n_art = rows.iter().filter(|r| r.1 != Relation::Le).count();
        let width = n + n_slack + n_art;
        let mut tableau = vec![vec![0.0; width + 1]; m];
        let mut basis = vec![0usize; m];
        let mut is_artificial = vec![false; width];
        let (mut next_slack, mut next_art) = (n, n + n_slack);
        for (i, (a, rel, b)) in rows.iter().enumerate() {
            tableau[i][..n].copy_from_slice(a);
            tableau[i][width] = *b;
            match rel {
                Relation::Le => {
                    tableau[i][next_slack] = 1.0;
                    basis[i] = next_slack;
                    next_slack += 1;
                }
                Relation::Ge => {
                    tableau[i][next_slack] = -1.0;
                    next_slack += 1;
                    tableau[i][next_art] = 1.0;
                    is_artificial[next_art] = true;
                    basis[i] = next_art;
                    next_art += 1;
                }
                Relation::Eq => {
                    tableau[i][next_art] = 1.0;
                    is_artificial[next_art] = true;
                    basis[i] = next_art;
                    next_art += 1;
                }
            }
        }

        // Phase 1: minimize the sum of artificials.
        if n_art > 0 {
            let phase_one: Vec<f64> =
                is_artificial.iter().map(|&art| if art { 1.0 } else { 0.0 }).collect();
            match run_simplex(&mut tableau, &mut basis, &phase_one, &[]) {
                Pivoting::Optimal => {}
                Pivoting::Unbounded => return LpOutcome::Infeasible,
                Pivoting::IterationLimit => return LpOutcome::IterationLimit,
            }
            let infeasibility: f64 = basis
                .iter()
                .enumerate()
                .filter(|(_, &col)| is_artificial[col])
                .map(|(i, _)| tableau[i][width])
                .sum();
            if infeasibility > FEAS_EPS {
                return LpOutcome::Infeasible;
            }
            // Drive zero-valued artificials out of the basis where possible.
            for i in 0..m {
                if is_artificial[basis[i]] {
                    if let Some(j) = (0..width)
                        .find(|&j| !is_artificial[j] && tableau[i][j].abs() > PIVOT_EPS)
                    {
                        pivot(&mut tableau, &mut basis, i, j);
                    }
                }
            }
        }

        // Phase 2: original objective, artificials barred from entering.
        let scale = self.objective.iter().fold(0.0_f64, |acc, c| acc.max(c.abs()));
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let mut cost = vec![0.0; width];
        for (j, c) in self.objective.iter().enumerate() {
            cost[j] = c / scale;
        }
        let barred: Vec<usize> = (0..width).filter(|&j| is_artificial[j]).collect();
        match run_simplex(&mut tableau, &mut basis, &cost, &barred) {
            Pivoting::Optimal => {}
            Pivoting::Unbounded => return LpOutcome::Unbounded,
            Pivoting::IterationLimit => return LpOutcome::IterationLimit,
        }

        let mut x = vec![0.0; n];
        for (i, &col) in basis.iter().enumerate() {
            if col < n {
                x[col] = tableau[i][width].max(0.0);
            }
        }
        let objective = self.objective.iter().zip(&x).map(|(c, v)| c * v).sum();
        LpOutcome::Optimal { x, objective }
    }
}

enum Pivoting {
    Optimal,
    Unbounded,
    IterationLimit,
}

fn run_simplex(
    tableau: &mut [Vec<f64>], basis: &mut [usize], cost: &[f64], barred: &[usize],
) -> Pivoting {
    let m = tableau.len();
    let width = cost.len();
    for _ in 0..MAX_PIVOTS {
        // Bland: first improving column.
        let entering = (0..width).find(|&j| {
            if barred.contains(&j) || basis.contains(&j) {
                return false;
            }
            let reduced: f64 =
                cost[j] - (0..m).map(|i| cost[basis[i]] * tableau[i][j]).sum::<f64>();
            reduced < -PIVOT_EPS
        });
        let Some(j) = entering else {
            return Pivoting::Optimal;
        };

        // Ratio test; ties go to the smallest basic index.
        let mut leaving: Option<(usize, f64)> = None;
        for i in 0..m {
            let a = tableau[i][j];
            if a > PIVOT_EPS {
                let ratio = tableau[i][width] / a;
                leaving = match leaving {
                    None => Some((i, ratio)),
                    Some((r, best)) => {
                        if ratio < best - PIVOT_EPS
                            || ((ratio - best).abs() <= PIVOT_EPS && basis[i] < basis[r])
                        {
                            Some((i, ratio))
                        } else {
                            Some((r, best))
                        }
                    }
                };
            }
        }
        let Some((i, _)) = leaving else {
            return Pivoting::Unbounded;
        };
        pivot(tableau, basis, i, j);
    }
    Pivoting::IterationLimit
}

fn pivot(tableau: &mut [Vec<f64>], basis: &mut [usize], row: usize, col: usize) {
    let p = tableau[row][col];
    tableau[row].iter_mut().for_each(|v| *v /= p);
    let pivot_row = tableau[row].clone();
    for (i, r) in tableau.iter_mut().enumerate() {
        if i == row {
            continue;
        }
        let factor = r[col];
        if factor != 0.0 {
            r.iter_mut().zip(&pivot_row).for_each(|(v, pv)| *v -= factor * pv);
        }
    }
    basis[row] = col;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // Small hand-solvable programs exercising both phases, each row type,
    // and the infeasible / unbounded exits.
    // -------------------------------------------------------------------------

    fn optimal(outcome: LpOutcome) -> (Vec<f64>, f64) {
        match outcome {
            LpOutcome::Optimal { x, objective } => (x, objective),
            other => panic!("expected an optimal solution, got {other:?}"),
        }
    }

    #[test]
    // Purpose
    // -------
    // Classic textbook program with only ≤ rows (phase 2 only).
    //
    // Given
    // -----
    // max 3x + 5y  s.t. x ≤ 4, 2y ≤ 12, 3x + 2y ≤ 18.
    //
    // Expect
    // ------
    // x = 2, y = 6, objective 36.
    fn solves_textbook_maximization() {
        let mut lp = LinearProgram::minimize(vec![-3.0, -5.0]);
        lp.add_row(vec![1.0, 0.0], Relation::Le, 4.0);
        lp.add_row(vec![0.0, 2.0], Relation::Le, 12.0);
        lp.add_row(vec![3.0, 2.0], Relation::Le, 18.0);

        let (x, obj) = optimal(lp.solve());
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 6.0, epsilon = 1e-9);
        assert_relative_eq!(obj, -36.0, epsilon = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // Equality and ≥ rows need phase 1.
    //
    // Given
    // -----
    // min x + 2y  s.t. x + y = 10, x ≥ 3, x ≤ 6.
    //
    // Expect
    // ------
    // x = 6, y = 4, objective 14.
    fn solves_program_with_equality_and_lower_bound() {
        let mut lp = LinearProgram::minimize(vec![1.0, 2.0]);
        lp.add_row(vec![1.0, 1.0], Relation::Eq, 10.0);
        lp.add_lower_bound(0, 3.0);
        lp.add_upper_bound(0, 6.0);

        let (x, obj) = optimal(lp.solve());
        assert_relative_eq!(x[0], 6.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 4.0, epsilon = 1e-9);
        assert_relative_eq!(obj, 14.0, epsilon = 1e-9);
    }

    #[test]
    fn negative_right_hand_side_is_normalized() {
        // -x ≤ -2  ⇔  x ≥ 2 ; min x.
        let mut lp = LinearProgram::minimize(vec![1.0]);
        lp.add_row(vec![-1.0], Relation::Le, -2.0);
        let (x, _) = optimal(lp.solve());
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn detects_infeasibility() {
        let mut lp = LinearProgram::minimize(vec![1.0]);
        lp.add_upper_bound(0, 1.0);
        lp.add_lower_bound(0, 2.0);
        assert_eq!(lp.solve(), LpOutcome::Infeasible);
    }

    #[test]
    fn detects_unboundedness() {
        let mut lp = LinearProgram::minimize(vec![-1.0, 0.0]);
        lp.add_row(vec![0.0, 1.0], Relation::Le, 1.0);
        assert_eq!(lp.solve(), LpOutcome::Unbounded);
    }

    #[test]
    fn redundant_equalities_do_not_break_phase_two() {
        // x + y = 1 twice; max y.
        let mut lp = LinearProgram::minimize(vec![0.0, -1.0]);
        lp.add_row(vec![1.0, 1.0], Relation::Eq, 1.0);
        lp.add_row(vec![2.0, 2.0], Relation::Eq, 2.0);
        let (x, obj) = optimal(lp.solve());
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(obj, -1.0, epsilon = 1e-9);
    }
}
