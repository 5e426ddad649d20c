//! Static 2D k-d tree for nearest-neighbour queries.

use crate::core::types::Point2D;

/// A balanced, build-once k-d tree over 2D points.
///
/// Nodes store indices into the slice the tree was built from, so a query
/// result identifies the caller's own element. The splitting axis
/// alternates with depth: x on even levels, y on odd. There is no
/// insertion or removal after construction; ICP builds a fresh tree per
/// call and discards it.
#[derive(Debug, Clone)]
pub struct KdTree2D {
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

#[derive(Debug, Clone)]
struct KdNode {
    point: Point2D,
    index: usize,
    left: Option<usize>,
    right: Option<usize>,
}

impl KdTree2D {
    /// Build a tree over `points` in one pass.
    pub fn build(points: &[Point2D]) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let root = Self::build_recursive(points, &mut order, 0, &mut nodes);
        Self { nodes, root }
    }

    fn build_recursive(
        points: &[Point2D],
        order: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if order.is_empty() {
            return None;
        }
        order.sort_unstable_by(|&a, &b| {
            let (ka, kb) = if depth % 2 == 0 {
                (points[a].x, points[b].x)
            } else {
                (points[a].y, points[b].y)
            };
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mid = order.len() / 2;
        let index = order[mid];
        let slot = nodes.len();
        nodes.push(KdNode {
            point: points[index],
            index,
            left: None,
            right: None,
        });

        let (lower, upper) = order.split_at_mut(mid);
        let left = Self::build_recursive(points, lower, depth + 1, nodes);
        let right = Self::build_recursive(points, &mut upper[1..], depth + 1, nodes);
        nodes[slot].left = left;
        nodes[slot].right = right;
        Some(slot)
    }

    /// Index of a point at minimum Euclidean distance to `query`, or
    /// `None` if the tree is empty. Equidistant candidates resolve to
    /// the smallest index.
    pub fn nearest_index(&self, query: Point2D) -> Option<usize> {
        let root = self.root?;
        let mut best = (f64::INFINITY, 0usize);
        self.search(root, query, 0, &mut best);
        Some(best.1)
    }

    fn search(&self, slot: usize, query: Point2D, depth: usize, best: &mut (f64, usize)) {
        let node = &self.nodes[slot];
        let dist = node.point.distance_squared(&query);
        // Distance ties break to the smallest index, independent of
        // traversal order.
        if dist < best.0 || (dist == best.0 && node.index < best.1) {
            *best = (dist, node.index);
        }

        // Descend into the side containing the query first, then only
        // cross the splitting plane if it can still hold a closer point.
        let diff = if depth % 2 == 0 {
            query.x - node.point.x
        } else {
            query.y - node.point.y
        };
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(child) = near {
            self.search(child, query, depth + 1, best);
        }
        if let Some(child) = far {
            // Not strict: a subtree at exactly the best distance can still
            // hold an equidistant point with a smaller index.
            if diff * diff <= best.0 {
                self.search(child, query, depth + 1, best);
            }
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree indexes no points.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
