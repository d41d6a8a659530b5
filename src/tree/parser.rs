use anyhow::{bail, Result};
use ndarray::Array2;

/// A parsed Newick subtree. `length` is the branch leading into the node
/// (zero for an unannotated root).
#[derive(Clone, Debug)]
pub enum NewickNode {
    Leaf { name: String, length: f64 },
    Internal { children: Vec<NewickNode>, length: f64 },
}

/// Minimal Newick reader, independent of the emitter. Used to validate
/// emitted trees: leaf-set round trips and patristic distances.
///
/// Accepts unquoted names (any run of characters outside `(),:;` and
/// whitespace), optional `:length` annotations, and an optional label on
/// internal nodes (ignored).
pub fn parse_newick(text: &str) -> Result<NewickNode> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    let root = parser.subtree()?;
    parser.skip_whitespace();
    if !parser.eat(b';') {
        bail!("expected ';' at position {}", parser.pos);
    }
    Ok(root)
}

impl NewickNode {
    pub fn length(&self) -> f64 {
        match self {
            NewickNode::Leaf { length, .. } => *length,
            NewickNode::Internal { length, .. } => *length,
        }
    }

    /// Leaf names in tree order.
    pub fn leaf_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                NewickNode::Leaf { name, .. } => names.push(name.clone()),
                NewickNode::Internal { children, .. } => {
                    for child in children.iter().rev() {
                        stack.push(child);
                    }
                }
            }
        }
        names
    }

    /// Path lengths between every pair of leaves, with leaves in tree order.
    pub fn leaf_distances(&self) -> (Vec<String>, Array2<f64>) {
        // Flatten to an undirected adjacency over integer node ids.
        let mut adjacency: Vec<Vec<(usize, f64)>> = Vec::new();
        let mut leaves: Vec<(String, usize)> = Vec::new();
        let mut stack: Vec<(&NewickNode, Option<usize>)> = vec![(self, None)];
        while let Some((node, parent)) = stack.pop() {
            let id = adjacency.len();
            adjacency.push(Vec::new());
            if let Some(parent) = parent {
                let length = node.length();
                adjacency[parent].push((id, length));
                adjacency[id].push((parent, length));
            }
            match node {
                NewickNode::Leaf { name, .. } => leaves.push((name.clone(), id)),
                NewickNode::Internal { children, .. } => {
                    for child in children.iter().rev() {
                        stack.push((child, Some(id)));
                    }
                }
            }
        }

        let n = leaves.len();
        let mut distances = Array2::<f64>::zeros((n, n));
        for (i, (_, start)) in leaves.iter().enumerate() {
            // Distance from this leaf to every node; the graph is a tree, so
            // one pass with a visited mask suffices.
            let mut dist = vec![f64::NAN; adjacency.len()];
            let mut todo = vec![*start];
            dist[*start] = 0.0;
            while let Some(node) = todo.pop() {
                for &(next, length) in &adjacency[node] {
                    if dist[next].is_nan() {
                        dist[next] = dist[node] + length;
                        todo.push(next);
                    }
                }
            }
            for (j, (_, leaf)) in leaves.iter().enumerate() {
                distances[[i, j]] = dist[*leaf];
            }
        }
        (leaves.into_iter().map(|(name, _)| name).collect(), distances)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn subtree(&mut self) -> Result<NewickNode> {
        self.skip_whitespace();
        if self.eat(b'(') {
            let mut children = vec![self.subtree()?];
            while self.eat(b',') {
                children.push(self.subtree()?);
            }
            if !self.eat(b')') {
                bail!("expected ')' at position {}", self.pos);
            }
            let _label = self.name();
            let length = self.length()?;
            Ok(NewickNode::Internal { children, length })
        } else {
            let name = self.name();
            if name.is_empty() {
                bail!("expected a taxon name at position {}", self.pos);
            }
            let length = self.length()?;
            Ok(NewickNode::Leaf { name, length })
        }
    }

    fn length(&mut self) -> Result<f64> {
        self.skip_whitespace();
        if !self.eat(b':') {
            return Ok(0.0);
        }
        let token = self.name();
        token
            .parse()
            .map_err(|_| anyhow::anyhow!("unreadable branch length '{token}'"))
    }

    fn name(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.bytes.len()
            && !matches!(self.bytes[self.pos], b'(' | b')' | b',' | b':' | b';')
            && !self.bytes[self.pos].is_ascii_whitespace()
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_whitespace();
        if self.pos < self.bytes.len() && self.bytes[self.pos] == byte {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_leaf_names() {
        let tree = parse_newick("((A:1.0,B:2.0):1.0,D:4.0,C:3.0);\n").unwrap();
        assert_eq!(tree.leaf_names(), vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn patristic_distances() {
        let tree = parse_newick("((A:1,B:2):1,D:4,C:3);").unwrap();
        let (names, dist) = tree.leaf_distances();
        let ix = |n: &str| names.iter().position(|x| x == n).unwrap();
        let d = |a: &str, b: &str| dist[[ix(a), ix(b)]];
        assert!((d("A", "B") - 3.0).abs() < 1e-12);
        assert!((d("A", "C") - 5.0).abs() < 1e-12);
        assert!((d("A", "D") - 6.0).abs() < 1e-12);
        assert!((d("C", "D") - 7.0).abs() < 1e-12);
        assert!((d("B", "C") - 6.0).abs() < 1e-12);
    }

    #[test]
    fn negative_lengths_parse() {
        let tree = parse_newick("(A:-0.25,B:2.0,C:3.0);").unwrap();
        match &tree {
            NewickNode::Internal { children, .. } => {
                assert!((children[0].length() + 0.25).abs() < 1e-12)
            }
            _ => panic!("expected internal root"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_newick("((A:1,B:2;").is_err());
    }
}
