//! # Simplex SQP
//!
//! $$
//! \mathbf{d}_k=\arg\min_{\mathbf{x}_k+\mathbf{d}\in\Delta}\ \nabla f_k^\top\mathbf{d}+\tfrac12\mathbf{d}^\top B_k\mathbf{d},
//! \qquad \mathbf{x}_{k+1}=\mathbf{x}_k+\alpha_k\mathbf{d}_k
//! $$
//!
//! Sequential quadratic programming over the long-only simplex
//! `{ 0 <= w_i <= 1, sum(w) = 1 }`. Each iterate solves the quadratic
//! subproblem exactly with a primal active-set method, backtracks along the
//! step with an Armijo rule and refreshes `B_k` with a damped BFGS update.
//! Iterates never leave the feasible set.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;

const ARMIJO_C1: f64 = 1e-4;
const MIN_STEP: f64 = 1e-10;
const STATIONARY_TOL: f64 = 1e-10;
const STEP_TOL: f64 = 1e-9;
const SLOPE_TOL: f64 = 1e-16;

/// Iteration budget and tolerances.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq)]
pub struct SolverConfig {
  /// Maximum number of outer iterations.
  pub max_iters: u64,
  /// Relative change in the objective treated as convergence.
  pub ftol: f64,
  /// Allowed `|sum(w) - 1|` at termination.
  pub constraint_tol: f64,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 100,
      ftol: 1e-10,
      constraint_tol: 1e-6,
    }
  }
}

/// Final state of a successful run.
#[derive(Clone, Debug)]
pub struct SqpReport {
  pub param: Vec<f64>,
  pub cost: f64,
  pub iterations: u64,
}

/// Gradient-based SQP solver restricted to the probability simplex.
#[derive(Clone, Debug, Default)]
pub struct SimplexSqp {
  config: SolverConfig,
}

fn solver_error(e: argmin::core::Error) -> PortfolioError {
  PortfolioError::Optimization(e.to_string())
}

impl SimplexSqp {
  pub fn new(config: SolverConfig) -> Self {
    Self { config }
  }

  /// Minimise `problem` from a feasible starting point.
  pub fn minimize<O>(&self, problem: &O, x0: Vec<f64>) -> Result<SqpReport>
  where
    O: CostFunction<Param = Vec<f64>, Output = f64>
      + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
  {
    let n = x0.len();
    if n == 0 {
      return Err(PortfolioError::InvalidInput("empty parameter vector".into()));
    }
    self.check_feasible(&x0)?;

    let mut x = DVector::from_vec(x0);
    let mut f = self.cost(problem, &x)?;
    let mut g = self.gradient(problem, &x)?;
    let mut b = DMatrix::<f64>::identity(n, n);

    for iter in 0..self.config.max_iters {
      let z = solve_simplex_qp(&b, &g, &x)?;
      let d = &z - &x;
      let slope = g.dot(&d);

      if d.amax() < STATIONARY_TOL || slope > -SLOPE_TOL {
        return self.finish(x, f, iter);
      }

      let Some((x_new, f_new)) = self.line_search(problem, &x, &d, f, slope)? else {
        if slope.abs() < self.config.ftol.sqrt() {
          return self.finish(x, f, iter);
        }
        // Stale curvature: restart from steepest descent.
        if b != DMatrix::identity(n, n) {
          b = DMatrix::identity(n, n);
          continue;
        }
        return Err(PortfolioError::Optimization(format!(
          "line search failed at iteration {iter} (slope {slope:e})"
        )));
      };

      let g_new = self.gradient(problem, &x_new)?;
      let step = &x_new - &x;
      damped_bfgs_update(&mut b, &step, &(&g_new - &g));

      let converged =
        (f - f_new).abs() < self.config.ftol * f.abs().max(1.0) && step.amax() < STEP_TOL;
      x = x_new;
      f = f_new;
      g = g_new;

      if converged {
        return self.finish(x, f, iter + 1);
      }
    }

    Err(PortfolioError::Optimization(format!(
      "no convergence within {} iterations",
      self.config.max_iters
    )))
  }

  fn cost<O>(&self, problem: &O, x: &DVector<f64>) -> Result<f64>
  where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
  {
    let f = problem
      .cost(&x.as_slice().to_vec())
      .map_err(solver_error)?;
    if !f.is_finite() {
      return Err(PortfolioError::Optimization(format!(
        "objective is not finite ({f})"
      )));
    }
    Ok(f)
  }

  fn gradient<O>(&self, problem: &O, x: &DVector<f64>) -> Result<DVector<f64>>
  where
    O: Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
  {
    let g = problem
      .gradient(&x.as_slice().to_vec())
      .map_err(solver_error)?;
    if g.len() != x.len() || g.iter().any(|v| !v.is_finite()) {
      return Err(PortfolioError::Optimization(
        "gradient is not finite".into(),
      ));
    }
    Ok(DVector::from_vec(g))
  }

  fn line_search<O>(
    &self,
    problem: &O,
    x: &DVector<f64>,
    d: &DVector<f64>,
    f: f64,
    slope: f64,
  ) -> Result<Option<(DVector<f64>, f64)>>
  where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
  {
    let mut alpha = 1.0;
    while alpha >= MIN_STEP {
      let candidate = x + d * alpha;
      let f_new = self.cost(problem, &candidate)?;
      if f_new <= f + ARMIJO_C1 * alpha * slope {
        return Ok(Some((candidate, f_new)));
      }
      alpha *= 0.5;
    }
    Ok(None)
  }

  fn check_feasible(&self, x: &[f64]) -> Result<()> {
    let sum: f64 = x.iter().sum();
    let violation = x
      .iter()
      .map(|v| (-v).max(v - 1.0).max(0.0))
      .fold((sum - 1.0).abs(), f64::max);
    if violation > self.config.constraint_tol {
      return Err(PortfolioError::Optimization(format!(
        "constraint violation {violation:e} exceeds {:e}",
        self.config.constraint_tol
      )));
    }
    Ok(())
  }

  fn finish(&self, x: DVector<f64>, cost: f64, iterations: u64) -> Result<SqpReport> {
    let param = x.as_slice().to_vec();
    self.check_feasible(&param)?;
    debug!(iterations, cost, "sqp converged");
    Ok(SqpReport {
      param,
      cost,
      iterations,
    })
  }
}

/// Powell-damped BFGS update keeping `b` positive definite.
fn damped_bfgs_update(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
  let bs = &*b * s;
  let s_bs = s.dot(&bs);
  if s_bs <= 1e-16 {
    return;
  }

  let sy = s.dot(y);
  let theta = if sy >= 0.2 * s_bs {
    1.0
  } else {
    0.8 * s_bs / (s_bs - sy)
  };
  let r = y * theta + &bs * (1.0 - theta);
  let sr = s.dot(&r);
  if sr <= 1e-16 {
    return;
  }

  *b -= &bs * bs.transpose() / s_bs;
  *b += &r * r.transpose() / sr;
}

/// Minimise `g'(z - x) + ½(z - x)'B(z - x)` over the simplex.
///
/// Primal active-set method started at the feasible point `x`; the working set
/// holds the indices pinned at zero.
pub(crate) fn solve_simplex_qp(
  b: &DMatrix<f64>,
  g: &DVector<f64>,
  x: &DVector<f64>,
) -> Result<DVector<f64>> {
  let n = x.len();
  let c = g - b * x;
  let mut z = x.map(|v| v.max(0.0));
  let mut pinned: Vec<bool> = z.iter().map(|v| *v <= 0.0).collect();

  for _ in 0..(10 * n + 10) {
    let free: Vec<usize> = (0..n).filter(|&i| !pinned[i]).collect();
    let m = free.len();
    if m == 0 {
      return Err(PortfolioError::Optimization(
        "active set pinned every weight".into(),
      ));
    }

    let mut kkt = DMatrix::<f64>::zeros(m + 1, m + 1);
    let mut rhs = DVector::<f64>::zeros(m + 1);
    for (a, &i) in free.iter().enumerate() {
      for (k, &j) in free.iter().enumerate() {
        kkt[(a, k)] = b[(i, j)];
      }
      kkt[(a, m)] = 1.0;
      kkt[(m, a)] = 1.0;
      rhs[a] = -c[i];
    }
    rhs[m] = 1.0;

    let sol = kkt
      .lu()
      .solve(&rhs)
      .ok_or_else(|| PortfolioError::Optimization("singular KKT system".into()))?;
    let nu = sol[m];

    let mut p = DVector::<f64>::zeros(n);
    for (a, &i) in free.iter().enumerate() {
      p[i] = sol[a] - z[i];
    }

    if p.amax() < 1e-13 {
      let grad = b * &z + &c;
      let release = (0..n)
        .filter(|&i| pinned[i])
        .map(|i| (i, grad[i] + nu))
        .min_by(|a, b| a.1.total_cmp(&b.1));
      match release {
        Some((i, mu)) if mu < -1e-12 => pinned[i] = false,
        _ => return Ok(z),
      }
      continue;
    }

    let mut alpha = 1.0;
    let mut blocking = None;
    for &i in &free {
      if p[i] < 0.0 {
        let t = -z[i] / p[i];
        if t < alpha {
          alpha = t;
          blocking = Some(i);
        }
      }
    }

    z += &p * alpha;
    if let Some(i) = blocking {
      z[i] = 0.0;
      pinned[i] = true;
    }
  }

  Err(PortfolioError::Optimization(
    "quadratic subproblem did not terminate".into(),
  ))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  struct Quadratic {
    target: Vec<f64>,
  }

  impl CostFunction for Quadratic {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
      Ok(
        x.iter()
          .zip(self.target.iter())
          .map(|(a, b)| (a - b).powi(2))
          .sum(),
      )
    }
  }

  impl Gradient for Quadratic {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
      &self,
      x: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
      Ok(
        x.iter()
          .zip(self.target.iter())
          .map(|(a, b)| 2.0 * (a - b))
          .collect(),
      )
    }
  }

  #[test]
  fn projects_interior_target() {
    let problem = Quadratic {
      target: vec![0.2, 0.3, 0.5],
    };
    let report = SimplexSqp::default()
      .minimize(&problem, vec![1.0 / 3.0; 3])
      .unwrap();
    assert_abs_diff_eq!(report.param[0], 0.2, epsilon = 1e-8);
    assert_abs_diff_eq!(report.param[1], 0.3, epsilon = 1e-8);
    assert_abs_diff_eq!(report.param[2], 0.5, epsilon = 1e-8);
  }

  #[test]
  fn respects_lower_bounds() {
    // Euclidean projection of (1.2, 0.4, -0.6) onto the simplex is (0.9, 0.1, 0).
    let problem = Quadratic {
      target: vec![1.2, 0.4, -0.6],
    };
    let report = SimplexSqp::default()
      .minimize(&problem, vec![1.0 / 3.0; 3])
      .unwrap();
    assert_abs_diff_eq!(report.param[0], 0.9, epsilon = 1e-8);
    assert_abs_diff_eq!(report.param[1], 0.1, epsilon = 1e-8);
    assert_abs_diff_eq!(report.param[2], 0.0, epsilon = 1e-10);
  }

  #[test]
  fn rejects_infeasible_start() {
    let problem = Quadratic {
      target: vec![0.5, 0.5],
    };
    let err = SimplexSqp::default()
      .minimize(&problem, vec![0.7, 0.7])
      .unwrap_err();
    assert!(matches!(err, PortfolioError::Optimization(_)));
  }

  #[test]
  fn exhausted_budget_is_an_error() {
    let problem = Quadratic {
      target: vec![0.9, 0.1, 0.0],
    };
    let solver = SimplexSqp::new(SolverConfig::new(0, 1e-10, 1e-6));
    let err = solver.minimize(&problem, vec![1.0 / 3.0; 3]).unwrap_err();
    assert!(matches!(err, PortfolioError::Optimization(_)));
  }

  #[test]
  fn qp_subproblem_with_identity_is_projection() {
    let b = DMatrix::<f64>::identity(2, 2);
    let x = DVector::from_vec(vec![0.5, 0.5]);
    // Unconstrained minimiser x - g = (1.5, -0.5) projects to (1, 0).
    let g = DVector::from_vec(vec![-1.0, 1.0]);
    let z = solve_simplex_qp(&b, &g, &x).unwrap();
    assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(z[1], 0.0, epsilon = 1e-12);
  }
}
