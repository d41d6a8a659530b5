use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fixedbitset::FixedBitSet;
use ndarray::Array2;
use rayon::prelude::*;

use crate::error::JoinError;
use crate::joining::bionj::BionjMatrix;
use crate::joining::{select_best, Position, INFINITE_DISTANCE};
use crate::matrix::reader::DistanceInput;
use crate::matrix::square::SquareMatrix;
use crate::tree::forest::ClusterForest;

/// One slot of a sorted row: a distance and the cluster it leads to. Rows of
/// these stay sorted by distance, so the value/companion correspondence can
/// never drift apart.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SortedEntry {
    pub distance: f64,
    pub cluster: usize,
}

impl SortedEntry {
    /// Terminates every row; no live distance reaches it.
    pub(crate) const SENTINEL: SortedEntry = SortedEntry {
        distance: INFINITE_DISTANCE,
        cluster: 0,
    };
}

/// Bounding BIONJ: BIONJ plus per-row distance-sorted entries and an upper
/// bound that lets each row's minimum-Q scan stop early.
///
/// Entries are addressed by cluster id, not row index, so rows swapped by the
/// removal policy stay valid; absorbed clusters are unmapped and their totals
/// dropped to -inf. A row scan must always run to the first entry at or above
/// its bound: absorbed ids may linger in a row between purges.
pub struct BoundingBionjMatrix {
    pub(crate) bionj: BionjMatrix,
    entries: SquareMatrix<SortedEntry>,
    cluster_to_row: Vec<Option<usize>>,
    cluster_totals: Vec<f64>,
    scaled_cluster_totals: Vec<f64>,
    row_scan_order: Vec<usize>,
    row_order_chosen: FixedBitSet,
    entries_visited: AtomicU64,
}

impl BoundingBionjMatrix {
    pub fn from_input(input: &DistanceInput) -> Result<Self, JoinError> {
        Self::from_parts(&input.matrix, &input.labels)
    }

    pub fn from_parts(matrix: &Array2<f64>, labels: &[String]) -> Result<Self, JoinError> {
        let bionj = BionjMatrix::from_parts(matrix, labels)?;
        let rank = bionj.n();
        let mut bounding = BoundingBionjMatrix {
            entries: SquareMatrix::new(rank, SortedEntry::SENTINEL),
            cluster_to_row: (0..rank).map(Some).collect(),
            cluster_totals: bionj.nj.row_totals.clone(),
            scaled_cluster_totals: vec![0.0; rank],
            row_scan_order: (0..rank).collect(),
            row_order_chosen: FixedBitSet::with_capacity(rank),
            entries_visited: AtomicU64::new(0),
            bionj,
        };
        bounding.sort_all_rows();
        Ok(bounding)
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.bionj.n()
    }

    /// Count of sorted-row entries examined by every scan so far.
    pub fn entries_visited(&self) -> u64 {
        self.entries_visited.load(Ordering::Relaxed)
    }

    /// Runs the bounded join loop to completion. Yields the forest and the
    /// total count of sorted-row entries the scans examined.
    pub fn run(mut self) -> Result<(ClusterForest, u64), JoinError> {
        let mut next_purge = self.n() * 2 / 3;
        while self.n() > 3 {
            self.compute_row_minima();
            let best = select_best(&self.bionj.nj.row_minima);
            self.join_pair(best.column, best.row);
            if self.n() == next_purge {
                self.purge_all_rows();
                next_purge = self.n() * 2 / 3;
            }
        }
        self.bionj.nj.finish_star()?;
        let visited = self.entries_visited.into_inner();
        Ok((self.bionj.nj.forest, visited))
    }

    /// Initial build of every sorted row, in parallel. At construction the
    /// slot table is the identity, so physical and live rows coincide.
    fn sort_all_rows(&mut self) {
        let n = self.n();
        let nj = &self.bionj.nj;
        self.entries
            .par_physical_rows_mut()
            .enumerate()
            .for_each(|(r, entries_row)| {
                let source = nj.dist.row(r);
                let mut w = 0;
                for i in 0..n {
                    if i != r {
                        entries_row[w] = SortedEntry {
                            distance: source[i],
                            cluster: nj.row_to_cluster[i],
                        };
                        w += 1;
                    }
                }
                entries_row[w] = SortedEntry::SENTINEL;
                entries_row[..w].sort_unstable_by(|x, y| x.distance.total_cmp(&y.distance));
            });
    }

    /// Rebuilds the sorted row for `row` from the live distance row.
    fn sort_row(&mut self, row: usize) {
        let n = self.n();
        let nj = &self.bionj.nj;
        let source = nj.dist.row(row);
        let entries_row = self.entries.row_mut(row);
        let mut w = 0;
        for i in 0..n {
            if i != row {
                entries_row[w] = SortedEntry {
                    distance: source[i],
                    cluster: nj.row_to_cluster[i],
                };
                w += 1;
            }
        }
        entries_row[w] = SortedEntry::SENTINEL;
        entries_row[..w].sort_unstable_by(|x, y| x.distance.total_cmp(&y.distance));
    }

    /// Compacts absorbed clusters out of every row slot, keeping the +inf
    /// sentinel at the tail. Runs over dead slots too; they only hold stale
    /// entries this same compaction can digest.
    fn purge_all_rows(&mut self) {
        let cluster_to_row = &self.cluster_to_row;
        self.entries.par_physical_rows_mut().for_each(|entries_row| {
            let mut w = 0;
            for i in 0..entries_row.len() {
                let entry = entries_row[i];
                entries_row[w] = entry;
                if entry.distance.is_infinite() {
                    break;
                }
                if cluster_to_row[entry.cluster].is_some() {
                    w += 1;
                }
            }
        });
    }

    /// The join step plus all auxiliary bookkeeping of the bounding variant.
    fn join_pair(&mut self, a: usize, b: usize) {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let n = self.n();
        let cluster_a = self.bionj.nj.row_to_cluster[a];
        let cluster_b = self.bionj.nj.row_to_cluster[b];
        let cluster_moved = self.bionj.nj.row_to_cluster[n - 1];
        self.cluster_to_row[cluster_a] = None;
        self.cluster_to_row[cluster_b] = None;

        let joined = self.bionj.join_pair(a, b);

        let n = self.n();
        self.cluster_to_row.push(Some(a));
        self.cluster_totals.push(self.bionj.nj.row_totals[a]);
        self.scaled_cluster_totals
            .push(self.bionj.nj.row_totals[a] / (n as f64 - 1.0));
        if b < n {
            // The swapped-in last row still hosts a live cluster.
            self.cluster_to_row[cluster_moved] = Some(b);
        }
        // Mirror the swap onto the sorted rows; their columns are positions,
        // so only the slot moves.
        self.entries.remove_row_slot(b);

        // Absorbed totals can never win a comparison.
        for total in &mut self.cluster_totals[..joined] {
            *total = f64::NEG_INFINITY;
        }
        for r in 0..n {
            self.cluster_totals[self.bionj.nj.row_to_cluster[r]] = self.bionj.nj.row_totals[r];
        }
        self.sort_row(a);
    }

    /// Bounded minimum-Q pass over every live row, in the order chosen from
    /// the previous iteration's minima. `qBest` tightens under a mutex as
    /// rows finish; stale reads only cost pruning, never correctness.
    fn compute_row_minima(&mut self) {
        let n = self.n();
        let cluster_count = self.bionj.nj.forest.len();
        debug_assert_eq!(self.cluster_totals.len(), cluster_count);
        let t_multiplier = if n <= 2 { 0.0 } else { 1.0 / (n as f64 - 2.0) };
        let mut max_tot = 0.0;
        for i in 0..cluster_count {
            self.scaled_cluster_totals[i] = self.cluster_totals[i] * t_multiplier;
            if self.cluster_to_row[i].is_some() && self.scaled_cluster_totals[i] > max_tot {
                max_tot = self.scaled_cluster_totals[i];
            }
        }

        self.decide_row_scan_order();

        let scanned: Vec<(usize, Position)> = {
            let this = &*self;
            let q_best = Mutex::new(INFINITE_DISTANCE);
            this.row_scan_order[..n]
                .par_iter()
                .map(|&row| {
                    let snapshot = *q_best.lock().unwrap();
                    let pos = this.row_minimum(row, max_tot, snapshot);
                    let mut best = q_best.lock().unwrap();
                    if pos.value < *best {
                        *best = pos.value;
                    }
                    (row, pos)
                })
                .collect()
        };

        let minima = &mut self.bionj.nj.row_minima;
        minima.clear();
        minima.resize(n, Position::infinite(0));
        for (row, pos) in scanned {
            minima[row] = pos;
        }
    }

    /// One row's bounded scan. Entries arrive in ascending distance, so the
    /// first entry at or above `qBest + maxTot + t[row]` ends the row: every
    /// later candidate's Q is already no better than qBest.
    fn row_minimum(&self, row: usize, max_tot: f64, mut q_best: f64) -> Position {
        let n = self.n();
        let t_multiplier = if n <= 2 { 0.0 } else { 1.0 / (n as f64 - 2.0) };
        let row_total = self.bionj.nj.row_totals[row] * t_multiplier;
        let mut v_row_bound = q_best + max_tot + row_total;
        let mut pos = Position::infinite(row);
        let mut examined = 0u64;
        for entry in self.entries.row(row) {
            if entry.distance >= v_row_bound {
                break;
            }
            examined += 1;
            // Entries for absorbed clusters linger between purges.
            let Some(other_row) = self.cluster_to_row[entry.cluster] else {
                continue;
            };
            let q = entry.distance - self.scaled_cluster_totals[entry.cluster] - row_total;
            let candidate = if other_row < row {
                Position::new(row, other_row, q)
            } else {
                Position::new(other_row, row, q)
            };
            if candidate.improves(&pos) {
                pos = candidate;
                if q < q_best {
                    q_best = q;
                    v_row_bound = q_best + max_tot + row_total;
                }
            }
        }
        self.entries_visited.fetch_add(examined + 1, Ordering::Relaxed);
        pos
    }

    /// Scan rows most likely to hold the global minimum first: the previous
    /// iteration's minima, ascending by value, rows and columns both; any
    /// remaining rows follow in natural order.
    fn decide_row_scan_order(&mut self) {
        let n = self.n();
        self.bionj
            .nj
            .row_minima
            .sort_unstable_by(|x, y| x.value.total_cmp(&y.value));
        self.row_order_chosen.clear();
        let mut w = 0;
        for pos in &self.bionj.nj.row_minima {
            if pos.value >= INFINITE_DISTANCE {
                break;
            }
            for index in [pos.row, pos.column] {
                if index < n && !self.row_order_chosen.contains(index) {
                    self.row_scan_order[w] = index;
                    w += 1;
                }
                self.row_order_chosen.insert(index);
            }
        }
        for r in 0..n {
            if !self.row_order_chosen.contains(r) {
                self.row_scan_order[w] = r;
                w += 1;
            }
        }
        debug_assert_eq!(w, n);
    }
}
