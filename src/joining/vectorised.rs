use ndarray::Array2;
use rayon::prelude::*;

use crate::error::JoinError;
use crate::joining::bionj::BionjMatrix;
use crate::joining::{select_best, Position, INFINITE_DISTANCE};
use crate::matrix::reader::DistanceInput;
use crate::tree::forest::ClusterForest;

/// Columns examined per block of the lane-blocked scan.
const LANES: usize = 4;

/// BIONJ with the naive minimum-Q row scan blocked into fixed-width lanes:
/// each lane tracks the minimum over its congruence class of columns, the
/// remainder runs scalar, and the lane reduction prefers the lowest column on
/// value ties so the result matches the scalar scan exactly.
pub struct VectorisedBionjMatrix {
    pub(crate) bionj: BionjMatrix,
}

impl VectorisedBionjMatrix {
    pub fn from_input(input: &DistanceInput) -> Result<Self, JoinError> {
        Self::from_parts(&input.matrix, &input.labels)
    }

    pub fn from_parts(matrix: &Array2<f64>, labels: &[String]) -> Result<Self, JoinError> {
        Ok(VectorisedBionjMatrix {
            bionj: BionjMatrix::from_parts(matrix, labels)?,
        })
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.bionj.n()
    }

    pub(crate) fn compute_row_minima(&mut self) {
        self.bionj.nj.calculate_scaled_totals();
        let n = self.n();
        let nj = &self.bionj.nj;
        let dist = &nj.dist;
        let tot = &nj.scaled_totals;
        let mut minima = Vec::with_capacity(n);
        minima.push(Position::infinite(0));
        minima.par_extend((1..n).into_par_iter().map(|row| {
            let row_data = &dist.row(row)[..row];
            let mut lane_min = [INFINITE_DISTANCE; LANES];
            let mut lane_col = [usize::MAX; LANES];
            let mut col = 0;
            while col + LANES < row {
                for lane in 0..LANES {
                    let v = row_data[col + lane] - tot[col + lane];
                    if v < lane_min[lane] {
                        lane_min[lane] = v;
                        lane_col[lane] = col + lane;
                    }
                }
                col += LANES;
            }
            let mut pos = Position::infinite(row);
            for lane in 0..LANES {
                if lane_min[lane] < pos.value
                    || (lane_min[lane] == pos.value && lane_col[lane] < pos.column)
                {
                    pos.value = lane_min[lane];
                    pos.column = lane_col[lane];
                }
            }
            for c in col..row {
                let v = row_data[c] - tot[c];
                if v < pos.value {
                    pos.column = c;
                    pos.value = v;
                }
            }
            pos.value -= tot[row];
            pos
        }));
        self.bionj.nj.row_minima = minima;
    }

    pub fn run(mut self) -> Result<ClusterForest, JoinError> {
        while self.n() > 3 {
            self.compute_row_minima();
            let best = select_best(&self.bionj.nj.row_minima);
            self.bionj.join_pair(best.column, best.row);
        }
        self.bionj.nj.finish_star()?;
        Ok(self.bionj.nj.forest)
    }
}
