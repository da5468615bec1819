//! # Hierarchical Risk Parity
//!
//! $$
//! d_{ij}=\sqrt{\tfrac12(1-\rho_{ij})},\qquad
//! \alpha = 1-\frac{V_L}{V_L+V_R},\qquad
//! V_C=\mathbf{w}_C^\top\Sigma_C\mathbf{w}_C,\ \ \mathbf{w}_C\propto\operatorname{diag}(\Sigma_C)^{-1}
//! $$
//!
//! Lopez de Prado's allocator in three steps: correlation distance,
//! single-linkage clustering with quasi-diagonal leaf ordering, and recursive
//! bisection by inverse cluster variance. No solver is involved.

use ndarray::Array2;

use super::risk_model::RiskModel;
use super::risk_model::VARIANCE_EPS;
use super::types::WeightVector;
use crate::error::PortfolioError;
use crate::error::Result;

/// One agglomeration step of the dendrogram.
///
/// Leaves are `0..n`; the cluster created by step `k` has id `n + k`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Merge {
  /// Child holding the smaller original asset index.
  pub left: usize,
  pub right: usize,
  pub distance: f64,
  /// Number of leaves under the new cluster.
  pub size: usize,
}

/// Result of hierarchical clustering over `n_leaves` assets.
#[derive(Clone, Debug, PartialEq)]
pub struct Dendrogram {
  n_leaves: usize,
  merges: Vec<Merge>,
}

impl Dendrogram {
  pub fn n_leaves(&self) -> usize {
    self.n_leaves
  }

  pub fn merges(&self) -> &[Merge] {
    &self.merges
  }
}

/// `d_ij = sqrt(0.5 (1 - rho_ij))` with an exact zero diagonal.
pub fn correlation_distance(corr: &Array2<f64>) -> Array2<f64> {
  let n = corr.nrows();
  Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      0.0
    } else {
      (0.5 * (1.0 - corr[[i, j]])).max(0.0).sqrt()
    }
  })
}

/// Single-linkage agglomerative clustering.
///
/// Ties are broken by the lowest `(i, j)` pair of cluster positions, and a
/// merged cluster keeps the position of its lower member, so equal distances
/// resolve in original asset order.
pub fn single_linkage(dist: &Array2<f64>) -> Dendrogram {
  let n = dist.nrows();
  let mut merges = Vec::with_capacity(n.saturating_sub(1));
  if n < 2 {
    return Dendrogram {
      n_leaves: n,
      merges,
    };
  }

  let mut d = dist.clone();
  let mut active = vec![true; n];
  let mut node_id: Vec<usize> = (0..n).collect();
  let mut size = vec![1usize; n];

  for step in 0..(n - 1) {
    let mut min_d = f64::INFINITY;
    let mut mi = 0;
    let mut mj = 0;

    for i in 0..n {
      if !active[i] {
        continue;
      }
      for j in (i + 1)..n {
        if active[j] && d[[i, j]] < min_d {
          min_d = d[[i, j]];
          mi = i;
          mj = j;
        }
      }
    }

    merges.push(Merge {
      left: node_id[mi],
      right: node_id[mj],
      distance: min_d,
      size: size[mi] + size[mj],
    });
    node_id[mi] = n + step;
    size[mi] += size[mj];
    active[mj] = false;

    for k in 0..n {
      if active[k] && k != mi {
        let linked = d[[mi, k]].min(d[[mj, k]]);
        d[[mi, k]] = linked;
        d[[k, mi]] = linked;
      }
    }
  }

  Dendrogram {
    n_leaves: n,
    merges,
  }
}

/// Leaf order from a depth-first walk of the dendrogram, left child first.
///
/// Children are ordered by matrix position, not by cluster id: a leaf that
/// joins an existing cluster from a higher position is visited after that
/// cluster. Reordering the correlation matrix by this permutation puts
/// strongly correlated assets next to each other.
pub fn quasi_diagonal(dendrogram: &Dendrogram) -> Vec<usize> {
  let n = dendrogram.n_leaves;
  if dendrogram.merges.is_empty() {
    return (0..n).collect();
  }

  let mut order = Vec::with_capacity(n);
  let mut stack = vec![n + dendrogram.merges.len() - 1];
  while let Some(node) = stack.pop() {
    if node < n {
      order.push(node);
    } else {
      let merge = &dendrogram.merges[node - n];
      stack.push(merge.right);
      stack.push(merge.left);
    }
  }
  order
}

fn inverse_variance_cluster_var(indices: &[usize], cov: &Array2<f64>) -> Result<f64> {
  let mut inv = Vec::with_capacity(indices.len());
  for &i in indices {
    let v = cov[[i, i]];
    if v < VARIANCE_EPS {
      return Err(PortfolioError::DegenerateInput(format!(
        "asset index {i} has near-zero variance"
      )));
    }
    inv.push(1.0 / v);
  }

  let total: f64 = inv.iter().sum();
  let w: Vec<f64> = inv.iter().map(|x| x / total).collect();

  let mut var = 0.0;
  for (a, &i) in indices.iter().enumerate() {
    for (b, &j) in indices.iter().enumerate() {
      var += w[a] * w[b] * cov[[i, j]];
    }
  }
  Ok(var)
}

/// Split `order` into contiguous halves recursively, allocating between halves
/// inversely to their inverse-variance cluster variance.
///
/// Returns weights indexed by asset (not by position in `order`).
pub fn recursive_bisection(order: &[usize], cov: &Array2<f64>) -> Result<Vec<f64>> {
  let mut weights = vec![0.0; cov.nrows()];
  let mut pending: Vec<(&[usize], f64)> = vec![(order, 1.0)];

  while let Some((items, budget)) = pending.pop() {
    match items.len() {
      0 => {}
      1 => weights[items[0]] = budget,
      len => {
        let (left, right) = items.split_at(len / 2);
        let var_left = inverse_variance_cluster_var(left, cov)?;
        let var_right = inverse_variance_cluster_var(right, cov)?;
        let denom = var_left + var_right;
        if denom < VARIANCE_EPS {
          return Err(PortfolioError::DegenerateInput(
            "cluster variances vanish".into(),
          ));
        }

        let alpha = 1.0 - var_left / denom;
        pending.push((right, budget * (1.0 - alpha)));
        pending.push((left, budget * alpha));
      }
    }
  }

  Ok(weights)
}

/// Hierarchical Risk Parity weights for `risk`.
pub fn optimize_hrp(risk: &RiskModel) -> Result<WeightVector> {
  risk.ensure_non_degenerate()?;
  let dist = correlation_distance(risk.correlation());
  let dendrogram = single_linkage(&dist);
  let order = quasi_diagonal(&dendrogram);
  let weights = recursive_bisection(&order, risk.covariance())?;
  WeightVector::new(risk.assets().to_vec(), weights)
}
