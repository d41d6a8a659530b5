use ndarray::Array2;
use rayon::prelude::*;

use crate::error::JoinError;
use crate::joining::{select_best, Position};
use crate::matrix::reader::DistanceInput;
use crate::matrix::square::SquareMatrix;
use crate::tree::forest::ClusterForest;

/// Working state for classical neighbour joining, and the chassis the other
/// variants build on: the live distance matrix, its row totals, the row to
/// cluster mapping, and the growing forest.
pub struct NjMatrix {
    pub(crate) dist: SquareMatrix<f64>,
    pub(crate) row_totals: Vec<f64>,
    pub(crate) scaled_totals: Vec<f64>,
    pub(crate) row_to_cluster: Vec<usize>,
    pub(crate) forest: ClusterForest,
    pub(crate) row_minima: Vec<Position>,
}

impl NjMatrix {
    pub fn from_input(input: &DistanceInput) -> Result<Self, JoinError> {
        Self::from_parts(&input.matrix, &input.labels)
    }

    pub fn from_parts(matrix: &Array2<f64>, labels: &[String]) -> Result<Self, JoinError> {
        let rank = labels.len();
        if matrix.nrows() != rank || matrix.ncols() != rank {
            return Err(JoinError::MatrixParse(format!(
                "{} labels do not fit a {}x{} matrix",
                rank,
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if rank < 3 {
            return Err(JoinError::MatrixSize(rank));
        }
        let mut forest = ClusterForest::with_capacity(rank);
        for label in labels {
            forest.push_leaf(label.clone());
        }
        let mut nj = NjMatrix {
            dist: SquareMatrix::from_dense(matrix),
            row_totals: Vec::new(),
            scaled_totals: Vec::with_capacity(rank),
            row_to_cluster: (0..rank).collect(),
            forest,
            row_minima: Vec::new(),
        };
        nj.recompute_row_totals();
        Ok(nj)
    }

    /// Live row (and column) count.
    #[inline]
    pub fn n(&self) -> usize {
        self.dist.n()
    }

    #[inline]
    pub fn distance(&self, r: usize, c: usize) -> f64 {
        self.dist.get(r, c)
    }

    #[inline]
    pub fn row_total(&self, r: usize) -> f64 {
        self.row_totals[r]
    }

    /// O(n^2) rebuild of every row total. Used at construction and available
    /// for numerical hygiene; the join loop maintains totals incrementally.
    pub fn recompute_row_totals(&mut self) {
        let n = self.n();
        let dist = &self.dist;
        self.row_totals = (0..n)
            .into_par_iter()
            .map(|r| {
                let row = &dist.row(r)[..n];
                let mut total = 0.0;
                for value in &row[..r] {
                    total += value;
                }
                for value in &row[r + 1..] {
                    total += value;
                }
                total
            })
            .collect();
    }

    /// Row totals divided by (n - 2); zero when n <= 2.
    pub(crate) fn calculate_scaled_totals(&mut self) {
        let n = self.n();
        let t_multiplier = if n <= 2 { 0.0 } else { 1.0 / (n as f64 - 2.0) };
        self.scaled_totals.clear();
        self.scaled_totals
            .par_extend(self.row_totals.par_iter().map(|&total| total * t_multiplier));
    }

    /// Naive minimum-Q scan: each row r in 1..n takes the minimum of
    /// `D[r,c] - t[c]` over c < r, then subtracts `t[r]` once. Row 0 is
    /// pinned to infinity; its pairs are all found from the other end.
    pub(crate) fn compute_row_minima(&mut self) {
        self.calculate_scaled_totals();
        let n = self.n();
        let dist = &self.dist;
        let tot = &self.scaled_totals;
        let mut minima = Vec::with_capacity(n);
        minima.push(Position::infinite(0));
        minima.par_extend((1..n).into_par_iter().map(|row| {
            let row_data = &dist.row(row)[..row];
            let mut pos = Position::infinite(row);
            for (col, &d) in row_data.iter().enumerate() {
                let v = d - tot[col];
                if v < pos.value {
                    pos.column = col;
                    pos.value = v;
                }
            }
            pos.value -= tot[row];
            pos
        }));
        self.row_minima = minima;
    }

    /// Joins rows a and b (normalised a < b) under reduction weight `lambda`,
    /// appends the interior cluster, and removes row b. Returns the new
    /// cluster's id.
    pub(crate) fn join_pair(&mut self, a: usize, b: usize, lambda: f64) -> usize {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let n = self.n();
        let t_multiplier = if n < 3 { 0.0 } else { 0.5 / (n as f64 - 2.0) };
        let median = 0.5 * self.dist.get(a, b);
        let fudge = (self.row_totals[a] - self.row_totals[b]) * t_multiplier;
        let length_a = median + fudge;
        let length_b = median - fudge;
        let mu = 1.0 - lambda;
        let d_correction = -lambda * length_a - mu * length_b;

        let dist = &self.dist;
        let reduced: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| {
                if i == a || i == b {
                    0.0
                } else {
                    lambda * dist.get(a, i) + mu * dist.get(b, i) + d_correction
                }
            })
            .collect();
        for (i, &d_ci) in reduced.iter().enumerate() {
            if i != a && i != b {
                let d_ai = self.dist.get(a, i);
                let d_bi = self.dist.get(b, i);
                self.row_totals[i] += d_ci - d_ai - d_bi;
                self.dist.set_symmetric(a, i, d_ci);
            }
        }
        // Row a's total is rebuilt outright; incremental updates would let
        // rounding drift into every later Q-value through this row.
        let replacement: f64 = {
            let row_a = self.dist.row(a);
            (0..n).filter(|&i| i != a && i != b).map(|i| row_a[i]).sum()
        };
        self.row_totals[a] = replacement;

        let joined = self.forest.push_join(
            self.row_to_cluster[a],
            length_a,
            self.row_to_cluster[b],
            length_b,
        );
        self.row_to_cluster[a] = joined;
        self.row_to_cluster.swap_remove(b);
        self.row_totals.swap_remove(b);
        self.dist.remove_row(b);
        joined
    }

    /// The final 3-way star join over the last three live rows.
    pub(crate) fn finish_star(&mut self) -> Result<(), JoinError> {
        if self.n() != 3 {
            return Err(JoinError::InvariantViolation(format!(
                "expected 3 live rows at the final join, found {}",
                self.n()
            )));
        }
        let half_01 = 0.5 * self.dist.get(0, 1);
        let half_02 = 0.5 * self.dist.get(0, 2);
        let half_12 = 0.5 * self.dist.get(1, 2);
        self.forest.push_root(
            self.row_to_cluster[0],
            half_01 + half_02 - half_12,
            self.row_to_cluster[1],
            half_01 + half_12 - half_02,
            self.row_to_cluster[2],
            half_02 + half_12 - half_01,
        );
        self.row_to_cluster.clear();
        self.row_totals.clear();
        Ok(())
    }

    /// Runs classical NJ to completion and yields the forest.
    pub fn run(mut self) -> Result<ClusterForest, JoinError> {
        while self.n() > 3 {
            self.compute_row_minima();
            let best = select_best(&self.row_minima);
            self.join_pair(best.column, best.row, 0.5);
        }
        self.finish_star()?;
        Ok(self.forest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joining::testutil::{
        assert_forest_well_formed, numbered_labels, random_symmetric_matrix,
    };
    use crate::matrix::reader::parse_distance_matrix;
    use crate::tree::newick::to_newick_string;
    use crate::tree::parser::parse_newick;
    use ndarray::arr2;

    fn additive_four_taxon() -> (Array2<f64>, Vec<String>) {
        // Distances of the tree ((A:1,B:2):1,(C:3,D:4):1).
        let matrix = arr2(&[
            [0.0, 3.0, 5.0, 6.0],
            [3.0, 0.0, 6.0, 7.0],
            [5.0, 6.0, 0.0, 7.0],
            [6.0, 7.0, 7.0, 0.0],
        ]);
        let labels = ["A", "B", "C", "D"].map(String::from).to_vec();
        (matrix, labels)
    }

    #[test]
    fn three_taxa_is_a_single_star_join() {
        let input = parse_distance_matrix("3\nA 0 3 4\nB 3 0 5\nC 4 5 0\n").unwrap();
        let forest = NjMatrix::from_input(&input).unwrap().run().unwrap();
        assert_eq!(to_newick_string(&forest).unwrap(), "(A:1.0,B:2.0,C:3.0);\n");
    }

    #[test]
    fn four_taxon_additive_input_is_recovered() {
        let (matrix, labels) = additive_four_taxon();
        let forest = NjMatrix::from_parts(&matrix, &labels).unwrap().run().unwrap();
        let newick = to_newick_string(&forest).unwrap();
        assert_eq!(newick, "((A:1.0,B:2.0):1.0,D:4.0,C:3.0);\n");

        let (names, observed) = parse_newick(&newick).unwrap().leaf_distances();
        let ix = |n: &str| names.iter().position(|x| x == n).unwrap();
        for (r, from) in labels.iter().enumerate() {
            for (c, to) in labels.iter().enumerate() {
                let got = observed[[ix(from), ix(to)]];
                assert!(
                    (got - matrix[[r, c]]).abs() < 1e-9,
                    "patristic {from}-{to} was {got}, expected {}",
                    matrix[[r, c]]
                );
            }
        }
    }

    #[test]
    fn identical_distances_still_build_a_valid_tree() {
        let n = 5;
        let mut matrix = Array2::<f64>::from_elem((n, n), 1.0);
        for i in 0..n {
            matrix[[i, i]] = 0.0;
        }
        let labels = numbered_labels(n);
        let forest = NjMatrix::from_parts(&matrix, &labels).unwrap().run().unwrap();
        assert_forest_well_formed(&forest, n);

        let newick = to_newick_string(&forest).unwrap();
        let mut names = parse_newick(&newick).unwrap().leaf_names();
        names.sort();
        let mut expected = labels;
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn negative_branch_lengths_pass_through() {
        // One taxon far from everything except its partner: the row-total
        // correction exceeds the median and the partner's branch goes
        // negative. That is a property of the algorithm, not an error.
        let matrix = arr2(&[
            [0.0, 1.0, 10.0, 10.0, 10.0],
            [1.0, 0.0, 1.0, 1.0, 1.0],
            [10.0, 1.0, 0.0, 1.0, 1.0],
            [10.0, 1.0, 1.0, 0.0, 1.0],
            [10.0, 1.0, 1.0, 1.0, 0.0],
        ]);
        let labels = ["A", "B", "C", "D", "E"].map(String::from).to_vec();
        let forest = NjMatrix::from_parts(&matrix, &labels).unwrap().run().unwrap();
        let newick = to_newick_string(&forest).unwrap();
        assert!(newick.contains(":-"), "expected a negative branch in {newick}");
        let mut names = parse_newick(&newick).unwrap().leaf_names();
        names.sort();
        assert_eq!(names, vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn too_few_taxa_is_rejected() {
        let matrix = arr2(&[[0.0, 1.0], [1.0, 0.0]]);
        let labels = numbered_labels(2);
        assert!(matches!(
            NjMatrix::from_parts(&matrix, &labels),
            Err(JoinError::MatrixSize(2))
        ));
    }

    #[test]
    fn matrix_stays_symmetric_and_totals_stay_tight() {
        for (size, seed) in [(4usize, 7u64), (9, 11), (16, 13), (33, 17), (64, 19)] {
            let matrix = random_symmetric_matrix(size, seed);
            let labels = numbered_labels(size);
            let mut nj = NjMatrix::from_parts(&matrix, &labels).unwrap();
            while nj.n() > 3 {
                nj.compute_row_minima();
                let best = select_best(&nj.row_minima);
                nj.join_pair(best.column, best.row, 0.5);
                nj.assert_invariants();
            }
            nj.finish_star().unwrap();
            assert_forest_well_formed(&nj.forest, size);
        }
    }

    impl NjMatrix {
        pub(crate) fn assert_invariants(&self) {
            let n = self.n();
            for r in 0..n {
                for c in 0..n {
                    assert_eq!(
                        self.dist.get(r, c),
                        self.dist.get(c, r),
                        "asymmetry at ({r},{c}) with n={n}"
                    );
                }
            }
            for r in 0..n {
                let direct: f64 = (0..n)
                    .filter(|&c| c != r)
                    .map(|c| self.dist.get(r, c))
                    .sum();
                let tolerance = 1e-6 * direct.abs().max(1.0);
                assert!(
                    (self.row_totals[r] - direct).abs() <= tolerance,
                    "row total {r} drifted: kept {} vs direct {direct}",
                    self.row_totals[r]
                );
            }
            let clusters: std::collections::HashSet<_> =
                self.row_to_cluster.iter().copied().collect();
            assert_eq!(clusters.len(), n, "row-to-cluster map is not a bijection");
        }
    }
}
