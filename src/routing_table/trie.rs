//! Binary trie over id bits, mapping every id to the bucket covering it.
use crate::common::{Id, ID_BITS};

#[derive(Debug, Clone, Copy)]
enum Node {
    /// Index of a bucket in the routing table's bucket list.
    Leaf(usize),
    /// Node indices of the `0` and `1` subtrees.
    Branch([usize; 2]),
}

#[derive(Debug, Clone)]
/// Arena allocated binary trie, its leaves partition the whole id space.
pub(crate) struct Trie {
    nodes: Vec<Node>,
}

impl Trie {
    /// A trie with a single leaf covering every id.
    pub fn new(root_bucket: usize) -> Self {
        Trie {
            nodes: vec![Node::Leaf(root_bucket)],
        }
    }

    /// Index of the bucket covering `id`.
    pub fn bucket_for(&self, id: &Id) -> usize {
        self.leaf_for(id).1
    }

    /// Replaces the leaf reached by `prefix` at `depth` with a branch whose
    /// children hold `left` (bit `0`) and `right` (bit `1`).
    pub fn split(&mut self, prefix: &Id, left: usize, right: usize) {
        let (node, _, depth) = self.leaf_for(prefix);
        debug_assert!(depth < ID_BITS);

        let left_node = self.nodes.len();
        self.nodes.push(Node::Leaf(left));
        self.nodes.push(Node::Leaf(right));

        self.nodes[node] = Node::Branch([left_node, left_node + 1]);
    }

    /// Bucket indices in ascending XOR distance of their ranges to `target`.
    ///
    /// Every id in a bucket listed earlier is closer to `target` than any id
    /// in a bucket listed later.
    pub fn closest_buckets(&self, target: &Id) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![(0_usize, 0_usize)];

        while let Some((node, depth)) = stack.pop() {
            match self.nodes[node] {
                Node::Leaf(bucket) => order.push(bucket),
                Node::Branch(children) => {
                    let near = target.bit(depth) as usize;
                    // Far side first, so the near side is popped next.
                    stack.push((children[1 - near], depth + 1));
                    stack.push((children[near], depth + 1));
                }
            }
        }

        order
    }

    /// Bucket indices from the left-most (all zeros) to the right-most range.
    pub fn buckets(&self) -> Vec<usize> {
        self.closest_buckets(&Id::MIN)
    }

    /// Returns `(node index, bucket index, depth)` of the leaf covering `id`.
    fn leaf_for(&self, id: &Id) -> (usize, usize, usize) {
        let mut node = 0;
        let mut depth = 0;

        loop {
            match self.nodes[node] {
                Node::Leaf(bucket) => return (node, bucket, depth),
                Node::Branch(children) => {
                    node = children[id.bit(depth) as usize];
                    depth += 1;
                }
            }
        }
    }
}
