use std::fs;
use std::path::Path;

use log::{debug, warn};
use ndarray::Array2;

use crate::error::JoinError;

/// A parsed distance-matrix file: the (symmetrised) matrix, the taxon labels
/// in file order, and how many asymmetric pairs were repaired along the way.
#[derive(Clone, Debug)]
pub struct DistanceInput {
    pub matrix: Array2<f64>,
    pub labels: Vec<String>,
    pub symmetry_pairs_fixed: usize,
}

/// Reads a distance matrix in the rank-prefixed format: an integer N, then N
/// records of one taxon name followed by N reals. Tokens are separated by any
/// whitespace; records may span lines.
pub fn read_distance_matrix(path: &Path) -> Result<DistanceInput, JoinError> {
    let text = fs::read_to_string(path)?;
    parse_distance_matrix(&text)
}

/// Same as [`read_distance_matrix`], from an in-memory string.
///
/// Asymmetric entries are tolerated: whenever `D[r,c]` disagrees with the
/// already-read `D[c,r]`, both are replaced with their mean and the repair is
/// counted. Negative, NaN and infinite values pass through unvalidated.
pub fn parse_distance_matrix(text: &str) -> Result<DistanceInput, JoinError> {
    let mut tokens = text.split_whitespace();

    let rank_token = tokens
        .next()
        .ok_or_else(|| JoinError::MatrixParse("empty input; expected a taxon count".into()))?;
    let rank: usize = rank_token.parse().map_err(|_| {
        JoinError::MatrixParse(format!("taxon count '{rank_token}' is not an integer"))
    })?;
    if rank < 3 {
        return Err(JoinError::MatrixSize(rank));
    }

    let mut matrix = Array2::<f64>::zeros((rank, rank));
    let mut labels = Vec::with_capacity(rank);
    let mut symmetry_pairs_fixed = 0usize;

    for r in 0..rank {
        let name = tokens.next().ok_or_else(|| {
            JoinError::MatrixParse(format!("missing taxon name for record {} of {rank}", r + 1))
        })?;
        for c in 0..rank {
            let token = tokens.next().ok_or_else(|| {
                JoinError::MatrixParse(format!(
                    "record for taxon '{name}' ended after {c} of {rank} distances"
                ))
            })?;
            let value: f64 = token.parse().map_err(|_| {
                JoinError::MatrixParse(format!(
                    "unreadable distance '{token}' for taxon '{name}' (column {})",
                    c + 1
                ))
            })?;
            matrix[[r, c]] = value;
            // Symmetrise as we read: both triangles get the mean whenever the
            // mirrored entry disagrees.
            if c < r && matrix[[r, c]] != matrix[[c, r]] {
                let mean = 0.5 * (matrix[[r, c]] + matrix[[c, r]]);
                matrix[[r, c]] = mean;
                matrix[[c, r]] = mean;
                symmetry_pairs_fixed += 1;
            }
        }
        labels.push(name.to_string());
    }

    if symmetry_pairs_fixed > 0 {
        warn!(
            "distance matrix was not symmetric; averaged {} off-diagonal pair(s)",
            symmetry_pairs_fixed
        );
    }
    debug!("parsed {rank}x{rank} distance matrix");

    Ok(DistanceInput {
        matrix,
        labels,
        symmetry_pairs_fixed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_taxa() {
        let input = parse_distance_matrix("3\nA 0 3 4\nB 3 0 5\nC 4 5 0\n").unwrap();
        assert_eq!(input.labels, vec!["A", "B", "C"]);
        assert_eq!(input.matrix[[0, 1]], 3.0);
        assert_eq!(input.matrix[[2, 1]], 5.0);
        assert_eq!(input.symmetry_pairs_fixed, 0);
    }

    #[test]
    fn values_may_span_lines() {
        let input =
            parse_distance_matrix("3 A 0 3\n4 B 3\n0 5 C\n4 5 0").unwrap();
        assert_eq!(input.labels, vec!["A", "B", "C"]);
        assert_eq!(input.matrix[[0, 2]], 4.0);
    }

    #[test]
    fn asymmetric_pairs_are_averaged() {
        let input = parse_distance_matrix("3\nA 0 3 4\nB 3.2 0 5\nC 4 5 0\n").unwrap();
        assert_eq!(input.symmetry_pairs_fixed, 1);
        assert!((input.matrix[[0, 1]] - 3.1).abs() < 1e-12);
        assert!((input.matrix[[1, 0]] - 3.1).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_header() {
        let err = parse_distance_matrix("lots\nA 0 1 2\n").unwrap_err();
        assert!(matches!(err, JoinError::MatrixParse(_)));
    }

    #[test]
    fn rejects_small_matrix() {
        let err = parse_distance_matrix("2\nA 0 1\nB 1 0\n").unwrap_err();
        assert!(matches!(err, JoinError::MatrixSize(2)));
    }

    #[test]
    fn rejects_truncated_record() {
        let err = parse_distance_matrix("3\nA 0 3 4\nB 3 0\n").unwrap_err();
        match err {
            JoinError::MatrixParse(msg) => assert!(msg.contains('B'), "message was: {msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_unreadable_number() {
        let err = parse_distance_matrix("3\nA 0 x 4\nB 3 0 5\nC 4 5 0\n").unwrap_err();
        match err {
            JoinError::MatrixParse(msg) => assert!(msg.contains("'x'"), "message was: {msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
