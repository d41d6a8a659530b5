use ndarray::Array2;
use rayon::prelude::*;

use crate::error::JoinError;
use crate::joining::nj::NjMatrix;
use crate::joining::select_best;
use crate::matrix::reader::DistanceInput;
use crate::matrix::square::SquareMatrix;
use crate::tree::forest::ClusterForest;

/// BIONJ: neighbour joining with a parallel matrix of variance estimates.
/// The variance matrix starts as a copy of the distances and is reduced with
/// `Vnew = lambda*V[a,i] + mu*V[b,i] - lambda*mu*V[a,b]` at every join; the
/// reduction weight lambda is chosen to minimise the variance of the new row.
pub struct BionjMatrix {
    pub(crate) nj: NjMatrix,
    pub(crate) variance: SquareMatrix<f64>,
}

impl BionjMatrix {
    pub fn from_input(input: &DistanceInput) -> Result<Self, JoinError> {
        Self::from_parts(&input.matrix, &input.labels)
    }

    pub fn from_parts(matrix: &Array2<f64>, labels: &[String]) -> Result<Self, JoinError> {
        let nj = NjMatrix::from_parts(matrix, labels)?;
        let variance = nj.dist.clone();
        Ok(BionjMatrix { nj, variance })
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.nj.n()
    }

    /// `0.5 + sum_i(V[b,i] - V[a,i]) / (2 (n-2) V[a,b])`, clamped to [0,1].
    /// Degenerate `V[a,b] = 0` falls back to the plain NJ weight.
    pub(crate) fn choose_lambda(&self, a: usize, b: usize, v_ab: f64) -> f64 {
        if v_ab == 0.0 {
            return 0.5;
        }
        let n = self.n();
        let row_a = self.variance.row(a);
        let row_b = self.variance.row(b);
        let mut sum = 0.0;
        for i in 0..n {
            if i != a && i != b {
                sum += row_b[i] - row_a[i];
            }
        }
        let lambda = 0.5 + sum / (2.0 * (n as f64 - 2.0) * v_ab);
        lambda.clamp(0.0, 1.0)
    }

    /// BIONJ join: pick lambda, reduce the variance row, then run the shared
    /// distance-side join and mirror the row removal onto the variances.
    /// Returns the new cluster's id.
    pub(crate) fn join_pair(&mut self, a: usize, b: usize) -> usize {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let n = self.n();
        let v_ab = self.variance.get(b, a);
        let lambda = self.choose_lambda(a, b, v_ab);
        let mu = 1.0 - lambda;
        let v_correction = -lambda * mu * v_ab;

        let variance = &self.variance;
        let reduced: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| {
                if i == a || i == b {
                    0.0
                } else {
                    lambda * variance.get(a, i) + mu * variance.get(b, i) + v_correction
                }
            })
            .collect();
        for (i, &v_ci) in reduced.iter().enumerate() {
            if i != a && i != b {
                self.variance.set_symmetric(a, i, v_ci);
            }
        }

        let joined = self.nj.join_pair(a, b, lambda);
        self.variance.remove_row(b);
        joined
    }

    /// Runs BIONJ to completion and yields the forest.
    pub fn run(mut self) -> Result<ClusterForest, JoinError> {
        while self.n() > 3 {
            self.nj.compute_row_minima();
            let best = select_best(&self.nj.row_minima);
            self.join_pair(best.column, best.row);
        }
        self.nj.finish_star()?;
        Ok(self.nj.forest)
    }
}
