use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tree::forest::ClusterForest;

pub(crate) fn numbered_labels(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("t{i}")).collect()
}

/// Random symmetric matrix with zero diagonal, seeded for repeatability.
pub(crate) fn random_symmetric_matrix(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut matrix = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let value = rng.gen_range(0.1..10.0);
            matrix[[i, j]] = value;
            matrix[[j, i]] = value;
        }
    }
    matrix
}

/// Patristic distances of a random binary tree over `n` leaves: leaves are
/// attached one at a time to a random existing edge, with random positive
/// branch lengths, and the matrix is read off the finished tree. The result
/// is exactly additive.
pub(crate) fn random_additive_matrix(n: usize, seed: u64) -> Array2<f64> {
    assert!(n >= 3);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut next_node = n;
    // Edges as (u, v, length); leaves are nodes 0..n.
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    let hub = next_node;
    next_node += 1;
    for leaf in 0..3 {
        edges.push((hub, leaf, rng.gen_range(0.5..3.0)));
    }
    for leaf in 3..n {
        let pick = rng.gen_range(0..edges.len());
        let (u, v, length) = edges.swap_remove(pick);
        let split = rng.gen_range(0.2..0.8);
        let middle = next_node;
        next_node += 1;
        edges.push((u, middle, length * split));
        edges.push((middle, v, length * (1.0 - split)));
        edges.push((middle, leaf, rng.gen_range(0.5..3.0)));
    }

    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); next_node];
    for &(u, v, length) in &edges {
        adjacency[u].push((v, length));
        adjacency[v].push((u, length));
    }

    let mut matrix = Array2::<f64>::zeros((n, n));
    for leaf in 0..n {
        let mut dist = vec![f64::NAN; next_node];
        let mut todo = vec![leaf];
        dist[leaf] = 0.0;
        while let Some(node) = todo.pop() {
            for &(next, length) in &adjacency[node] {
                if dist[next].is_nan() {
                    dist[next] = dist[node] + length;
                    todo.push(next);
                }
            }
        }
        for other in 0..n {
            matrix[[leaf, other]] = dist[other];
        }
    }
    matrix
}

/// Terminal forest shape: N leaves, N-3 binary joins, one ternary root, and
/// every non-root cluster referenced by exactly one link.
pub(crate) fn assert_forest_well_formed(forest: &ClusterForest, taxa: usize) {
    assert_eq!(forest.leaf_count(), taxa, "leaf count");
    assert_eq!(forest.len(), 2 * taxa - 2, "total cluster count");
    let root = forest.root().unwrap();
    assert_eq!(forest.get(root).links().len(), 3, "root must be ternary");

    let mut referenced = vec![0usize; forest.len()];
    for ix in 0..forest.len() {
        let links = forest.get(ix).links();
        if ix != root && ix >= taxa {
            assert_eq!(links.len(), 2, "interior cluster {ix} must be binary");
        }
        for link in links {
            assert!(link.cluster < ix, "link at {ix} points forward");
            referenced[link.cluster] += 1;
        }
    }
    for (ix, count) in referenced.iter().enumerate() {
        let expected = usize::from(ix != root);
        assert_eq!(*count, expected, "cluster {ix} referenced {count} times");
    }
}
