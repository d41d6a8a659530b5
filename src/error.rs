use std::io;

use thiserror::Error;

/// Fatal error kinds raised while constructing a tree.
///
/// Nothing here is retried; an asymmetric input matrix is repaired, not
/// reported. NaN or infinite distances are passed through unvalidated.
#[derive(Debug, Error)]
pub enum JoinError {
    /// Malformed header, missing taxon name, unreadable number, or a record
    /// with the wrong number of values.
    #[error("malformed distance matrix: {0}")]
    MatrixParse(String),

    /// Fewer than three taxa; the join loop and the final star join are
    /// undefined below that rank.
    #[error("distance matrix has {0} taxa but neighbour joining needs at least 3")]
    MatrixSize(usize),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// A logic bug surfaced at run time: a cycle during Newick emission, or a
    /// live-cluster count mismatch at termination.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
