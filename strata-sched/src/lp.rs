//! Thin abstraction over a linear-programming backend plus the bundled
//! dense simplex implementation. The scheduler only ever talks to
//! [`LpSolver`], so an external engine can be substituted without touching
//! the constraint builder.

use strata_utils::{Error, StrataResult};

/// Handle for a solver variable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VarId(usize);

/// Handle for a solver row (constraint).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RowId(usize);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
}

/// Minimal LP interface: continuous variables with bounds, ranged linear
/// rows, a linear minimization objective.
pub trait LpSolver {
    /// Add a variable with bounds `[lb, ub]` (either may be infinite).
    fn add_var(&mut self, lb: f64, ub: f64, name: &str) -> VarId;
    /// Add the constraint `lb <= sum(coeff * var) <= ub`.
    fn add_row(
        &mut self,
        lb: f64,
        ub: f64,
        terms: &[(VarId, f64)],
        name: &str,
    ) -> RowId;
    /// Set a variable's coefficient in the minimization objective.
    fn set_objective(&mut self, var: VarId, coefficient: f64);
    fn solve(&mut self) -> StrataResult<SolveStatus>;
    /// Value of `var` in the optimal solution. Only meaningful after a
    /// successful [`solve`](LpSolver::solve).
    fn value_of(&self, var: VarId) -> f64;
}

const EPS: f64 = 1e-7;
const FEAS_EPS: f64 = 1e-6;

struct VarInfo {
    lb: f64,
    ub: f64,
    obj: f64,
    #[allow(dead_code)]
    name: String,
}

struct RowInfo {
    lb: f64,
    ub: f64,
    terms: Vec<(usize, f64)>,
    #[allow(dead_code)]
    name: String,
}

/// A dense two-phase primal simplex with Bland's rule. Adequate for the
/// scheduling LPs this crate produces (hundreds of variables); pathological
/// cycling is ruled out by the pivot rule.
#[derive(Default)]
pub struct SimplexSolver {
    vars: Vec<VarInfo>,
    rows: Vec<RowInfo>,
    solution: Vec<f64>,
    solved: bool,
}

impl SimplexSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LpSolver for SimplexSolver {
    fn add_var(&mut self, lb: f64, ub: f64, name: &str) -> VarId {
        self.vars.push(VarInfo {
            lb,
            ub,
            obj: 0.0,
            name: name.to_string(),
        });
        VarId(self.vars.len() - 1)
    }

    fn add_row(
        &mut self,
        lb: f64,
        ub: f64,
        terms: &[(VarId, f64)],
        name: &str,
    ) -> RowId {
        self.rows.push(RowInfo {
            lb,
            ub,
            terms: terms.iter().map(|(v, c)| (v.0, *c)).collect(),
            name: name.to_string(),
        });
        RowId(self.rows.len() - 1)
    }

    fn set_objective(&mut self, var: VarId, coefficient: f64) {
        self.vars[var.0].obj = coefficient;
    }

    fn solve(&mut self) -> StrataResult<SolveStatus> {
        let status = Tableau::build(&self.vars, &self.rows)?.run()?;
        match status {
            TableauResult::Optimal(values) => {
                self.solution = values;
                self.solved = true;
                Ok(SolveStatus::Optimal)
            }
            TableauResult::Infeasible => Ok(SolveStatus::Infeasible),
            TableauResult::Unbounded => Ok(SolveStatus::Unbounded),
        }
    }

    fn value_of(&self, var: VarId) -> f64 {
        assert!(self.solved, "value_of called before a successful solve");
        self.solution[var.0]
    }
}

enum TableauResult {
    Optimal(Vec<f64>),
    Infeasible,
    Unbounded,
}

/// One nonnegative simplex column contributing `sign * y` to variable
/// `var` (on top of the variable's shift).
struct Column {
    var: usize,
    sign: f64,
    obj: f64,
}

struct Tableau {
    // Structural columns first, then slacks, then artificials.
    columns: Vec<Column>,
    shifts: Vec<f64>,
    n_structural: usize,
    n_slack: usize,
    n_artificial: usize,
    // m x (n_total + 1); the last entry of each row is the rhs.
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
}

impl Tableau {
    fn build(vars: &[VarInfo], rows: &[RowInfo]) -> StrataResult<Tableau> {
        // Shift every variable to the nonnegative orthant: a variable with
        // a finite lower bound becomes `lb + y`; a variable unbounded
        // below splits into `y+ - y-`.
        let mut columns: Vec<Column> = Vec::new();
        let mut var_columns: Vec<Vec<usize>> = Vec::with_capacity(vars.len());
        let mut shifts: Vec<f64> = Vec::with_capacity(vars.len());
        // (coeff per structural column, rhs) with sense <=.
        let mut inequalities: Vec<(Vec<(usize, f64)>, f64)> = Vec::new();

        for (v, info) in vars.iter().enumerate() {
            if info.lb.is_finite() {
                shifts.push(info.lb);
                let c = columns.len();
                columns.push(Column {
                    var: v,
                    sign: 1.0,
                    obj: info.obj,
                });
                var_columns.push(vec![c]);
                if info.ub.is_finite() {
                    inequalities
                        .push((vec![(c, 1.0)], info.ub - info.lb));
                }
            } else {
                shifts.push(0.0);
                let pos = columns.len();
                columns.push(Column {
                    var: v,
                    sign: 1.0,
                    obj: info.obj,
                });
                let neg = columns.len();
                columns.push(Column {
                    var: v,
                    sign: -1.0,
                    obj: -info.obj,
                });
                var_columns.push(vec![pos, neg]);
                if info.ub.is_finite() {
                    inequalities
                        .push((vec![(pos, 1.0), (neg, -1.0)], info.ub));
                }
            }
        }

        for row in rows {
            let mut constant = 0.0;
            let mut coeffs: Vec<(usize, f64)> = Vec::new();
            for &(v, a) in &row.terms {
                if v >= vars.len() {
                    return Err(Error::precondition(
                        "row references an unknown variable",
                    ));
                }
                constant += a * shifts[v];
                for &c in &var_columns[v] {
                    coeffs.push((c, a * columns[c].sign));
                }
            }
            if row.ub.is_finite() {
                inequalities.push((coeffs.clone(), row.ub - constant));
            }
            if row.lb.is_finite() {
                let negated =
                    coeffs.iter().map(|&(c, a)| (c, -a)).collect::<Vec<_>>();
                inequalities.push((negated, constant - row.lb));
            }
        }

        let n_structural = columns.len();
        let m = inequalities.len();
        let n_slack = m;
        // Lay out the tableau: structural | slack | artificial | rhs.
        // Artificials are appended below only for rows whose slack cannot
        // serve as the initial basic variable.
        let mut tableau_rows: Vec<Vec<f64>> = Vec::with_capacity(m);
        let mut basis: Vec<usize> = Vec::with_capacity(m);
        let mut artificial_rows: Vec<usize> = Vec::new();
        for (i, (coeffs, rhs)) in inequalities.iter().enumerate() {
            let mut row = vec![0.0; n_structural + n_slack + 1];
            for &(c, a) in coeffs {
                row[c] += a;
            }
            row[n_structural + i] = 1.0;
            *row.last_mut().unwrap() = *rhs;
            if *rhs < 0.0 {
                // Negate so the rhs is nonnegative; the slack coefficient
                // flips and an artificial variable becomes basic instead.
                for entry in row.iter_mut() {
                    *entry = -*entry;
                }
                artificial_rows.push(i);
                basis.push(usize::MAX); // patched below
            } else {
                basis.push(n_structural + i);
            }
            tableau_rows.push(row);
        }
        let n_artificial = artificial_rows.len();
        let n_total = n_structural + n_slack + n_artificial;
        for row in tableau_rows.iter_mut() {
            let rhs = row.pop().unwrap();
            row.resize(n_total, 0.0);
            row.push(rhs);
        }
        for (k, &i) in artificial_rows.iter().enumerate() {
            let col = n_structural + n_slack + k;
            tableau_rows[i][col] = 1.0;
            basis[i] = col;
        }

        Ok(Tableau {
            columns,
            shifts,
            n_structural,
            n_slack,
            n_artificial,
            rows: tableau_rows,
            basis,
        })
    }

    fn n_total(&self) -> usize {
        self.n_structural + self.n_slack + self.n_artificial
    }

    fn is_artificial(&self, col: usize) -> bool {
        col >= self.n_structural + self.n_slack
    }

    fn rhs(&self, i: usize) -> f64 {
        *self.rows[i].last().unwrap()
    }

    fn pivot(&mut self, leaving_row: usize, entering_col: usize) {
        let scale = self.rows[leaving_row][entering_col];
        for entry in self.rows[leaving_row].iter_mut() {
            *entry /= scale;
        }
        let pivot_row = self.rows[leaving_row].clone();
        for (i, row) in self.rows.iter_mut().enumerate() {
            if i == leaving_row {
                continue;
            }
            let factor = row[entering_col];
            if factor.abs() > 0.0 {
                for (entry, &p) in row.iter_mut().zip(pivot_row.iter()) {
                    *entry -= factor * p;
                }
            }
        }
        self.basis[leaving_row] = entering_col;
    }

    /// Minimize `cost` over the current basis with Bland's rule. Returns
    /// false when the problem is unbounded in the given costs.
    fn optimize(&mut self, cost: &[f64], allow_artificial: bool) -> bool {
        loop {
            // Reduced cost of column j: c_j - sum_i c_basis(i) * T[i][j].
            let mut entering = None;
            'cols: for j in 0..self.n_total() {
                if !allow_artificial && self.is_artificial(j) {
                    continue;
                }
                let mut reduced = cost[j];
                for (i, row) in self.rows.iter().enumerate() {
                    reduced -= cost[self.basis[i]] * row[j];
                }
                if reduced < -EPS {
                    entering = Some(j);
                    break 'cols; // Bland: smallest improving index.
                }
            }
            let Some(j) = entering else {
                return true;
            };
            // Ratio test; ties go to the smallest basis variable.
            let mut leaving: Option<(usize, f64)> = None;
            for i in 0..self.rows.len() {
                let a = self.rows[i][j];
                if a > EPS {
                    let ratio = self.rhs(i) / a;
                    let better = match leaving {
                        None => true,
                        Some((l, best)) => {
                            ratio < best - EPS
                                || (ratio < best + EPS
                                    && self.basis[i] < self.basis[l])
                        }
                    };
                    if better {
                        leaving = Some((i, ratio));
                    }
                }
            }
            let Some((i, _)) = leaving else {
                return false;
            };
            self.pivot(i, j);
        }
    }

    fn run(mut self) -> StrataResult<TableauResult> {
        // Phase 1: minimize the sum of artificials to find a feasible
        // basis.
        if self.n_artificial > 0 {
            let mut cost = vec![0.0; self.n_total()];
            for j in 0..self.n_total() {
                if self.is_artificial(j) {
                    cost[j] = 1.0;
                }
            }
            if !self.optimize(&cost, true) {
                // Phase 1 is bounded below by zero; this cannot happen.
                return Err(Error::misc(
                    "phase-1 simplex reported an unbounded problem",
                ));
            }
            let infeasibility: f64 = (0..self.rows.len())
                .filter(|&i| self.is_artificial(self.basis[i]))
                .map(|i| self.rhs(i))
                .sum();
            if infeasibility > FEAS_EPS {
                return Ok(TableauResult::Infeasible);
            }
            // Drive remaining (degenerate) artificials out of the basis.
            for i in 0..self.rows.len() {
                if !self.is_artificial(self.basis[i]) {
                    continue;
                }
                let pivot_col = (0..self.n_structural + self.n_slack)
                    .find(|&j| self.rows[i][j].abs() > EPS);
                match pivot_col {
                    Some(j) => self.pivot(i, j),
                    None => {
                        // Redundant row; blank it so later pivots ignore
                        // it.
                        for entry in self.rows[i].iter_mut() {
                            *entry = 0.0;
                        }
                    }
                }
            }
        }

        // Phase 2: the real objective.
        let mut cost = vec![0.0; self.n_total()];
        for (j, col) in self.columns.iter().enumerate() {
            cost[j] = col.obj;
        }
        if !self.optimize(&cost, false) {
            return Ok(TableauResult::Unbounded);
        }

        let mut y = vec![0.0; self.n_total()];
        for (i, &b) in self.basis.iter().enumerate() {
            y[b] = self.rhs(i);
        }
        let mut values = self.shifts.clone();
        for (j, col) in self.columns.iter().enumerate() {
            values[col.var] += col.sign * y[j];
        }
        Ok(TableauResult::Optimal(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: f64 = f64::INFINITY;

    #[test]
    fn minimizes_single_variable_to_lower_bound_of_row() {
        let mut solver = SimplexSolver::new();
        let x = solver.add_var(0.0, INF, "x");
        solver.add_row(3.0, INF, &[(x, 1.0)], "x_ge_3");
        solver.set_objective(x, 1.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Optimal);
        assert!((solver.value_of(x) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn detects_infeasible_rows() {
        let mut solver = SimplexSolver::new();
        let x = solver.add_var(0.0, INF, "x");
        solver.add_row(-INF, 1.0, &[(x, 1.0)], "x_le_1");
        solver.add_row(2.0, INF, &[(x, 1.0)], "x_ge_2");
        solver.set_objective(x, 1.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Infeasible);
    }

    #[test]
    fn detects_unbounded_objective() {
        let mut solver = SimplexSolver::new();
        let x = solver.add_var(0.0, INF, "x");
        solver.set_objective(x, -1.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Unbounded);
    }

    #[test]
    fn respects_variable_bounds() {
        let mut solver = SimplexSolver::new();
        let x = solver.add_var(1.0, 4.0, "x");
        let y = solver.add_var(0.0, INF, "y");
        // y >= x, minimize 2y - x: pushes x up to 4 and y down to x.
        solver.add_row(0.0, INF, &[(y, 1.0), (x, -1.0)], "y_ge_x");
        solver.set_objective(x, -1.0);
        solver.set_objective(y, 2.0);
        assert_eq!(solver.solve().unwrap(), SolveStatus::Optimal);
        assert!((solver.value_of(x) - 4.0).abs() < 1e-6);
        assert!((solver.value_of(y) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn free_variable_can_go_negative() {
        let mut solver = SimplexSolver::new();
        let x = solver.add_var(-INF, INF, "x");
        solver.add_row(-INF, -2.0, &[(x, 1.0)], "x_le_neg2");
        // No objective on x: any feasible point is optimal.
        assert_eq!(solver.solve().unwrap(), SolveStatus::Optimal);
        assert!(solver.value_of(x) <= -2.0 + 1e-6);
    }

    #[test]
    fn difference_constraints_have_integral_optimum() {
        // A tiny SDC system: c1 - c0 >= 1, c2 - c1 >= 1, c2 <= 2,
        // minimize c0 + c1 + c2.
        let mut solver = SimplexSolver::new();
        let c0 = solver.add_var(0.0, 2.0, "c0");
        let c1 = solver.add_var(0.0, 2.0, "c1");
        let c2 = solver.add_var(0.0, 2.0, "c2");
        solver.add_row(1.0, INF, &[(c1, 1.0), (c0, -1.0)], "edge01");
        solver.add_row(1.0, INF, &[(c2, 1.0), (c1, -1.0)], "edge12");
        for v in [c0, c1, c2] {
            solver.set_objective(v, 1.0);
        }
        assert_eq!(solver.solve().unwrap(), SolveStatus::Optimal);
        assert!((solver.value_of(c0) - 0.0).abs() < 1e-6);
        assert!((solver.value_of(c1) - 1.0).abs() < 1e-6);
        assert!((solver.value_of(c2) - 2.0).abs() < 1e-6);
    }
}
