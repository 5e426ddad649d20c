//! Pose-graph adapter: sparse nodes plus anchor and relative factors.
//!
//! Node ids are assigned by the caller (the front-end uses the keyscan
//! insertion index) and are never reused: `remove` leaves a tombstone so
//! later ids keep their meaning. `optimize` hands the live nodes and
//! factors to the batch solver in [`optimizer`].

pub mod optimizer;

use crate::core::types::{Point2D, Pose2D};

use self::optimizer::{GraphOptimizer, OptimizationResult};

/// A pose-graph node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseNode {
    /// Current pose estimate for this node.
    pub pose: Pose2D,
}

/// A probabilistic constraint on one or two nodes.
///
/// The information matrix is `information · I₃`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Factor {
    /// Pins a node near a measured absolute pose.
    Anchor {
        id: usize,
        measurement: Pose2D,
        information: f64,
    },
    /// Relates two nodes through a measured relative pose
    /// (the pose of `id` expressed in the frame of `id_ref`).
    Relative {
        id_ref: usize,
        id: usize,
        measurement: Pose2D,
        information: f64,
    },
}

/// Sparse pose graph with batch optimisation.
#[derive(Debug, Default)]
pub struct GraphSlam {
    nodes: Vec<Option<PoseNode>>,
    factors: Vec<Factor>,
    optimizer: GraphOptimizer,
}

impl GraphSlam {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the slot vector and create a node if `id` is vacant.
    ///
    /// Returns true when a fresh node was created (including re-creation
    /// of a previously removed id).
    pub fn ensure_node(&mut self, id: usize) -> bool {
        if id >= self.nodes.len() {
            self.nodes.resize(id + 1, None);
        }
        if self.nodes[id].is_none() {
            self.nodes[id] = Some(PoseNode {
                pose: Pose2D::identity(),
            });
            true
        } else {
            false
        }
    }

    /// Add a unary anchor factor pinning `id` near `pose`.
    ///
    /// A non-positive covariance is silently replaced with 1.0. A node
    /// created by this call is seeded at the measured pose.
    pub fn add_pose_anchor(&mut self, id: usize, pose: Pose2D, cov: f64) {
        let information = sanitize_covariance(cov);
        if self.ensure_node(id) {
            self.nodes[id] = Some(PoseNode { pose });
        }
        self.factors.push(Factor::Anchor {
            id,
            measurement: pose,
            information,
        });
    }

    /// Add a binary factor constraining the pose of `id` relative to
    /// `id_ref`.
    ///
    /// A non-positive covariance is silently replaced with 1.0. A node
    /// created by this call is seeded by composing the reference node's
    /// pose with the measurement, so a single constraint already yields a
    /// meaningful estimate without a batch solve.
    pub fn add_relative_constraint(
        &mut self,
        id_ref: usize,
        id: usize,
        relative: Pose2D,
        cov: f64,
    ) {
        let information = sanitize_covariance(cov);
        self.ensure_node(id_ref);
        if self.ensure_node(id) {
            let seed = self.nodes[id_ref]
                .map(|node| node.pose + relative)
                .unwrap_or_default();
            self.nodes[id] = Some(PoseNode { pose: seed });
        }
        self.factors.push(Factor::Relative {
            id_ref,
            id,
            measurement: relative,
            information,
        });
    }

    /// Overwrite the pose estimate of a live node.
    pub fn set_node_pose(&mut self, id: usize, pose: Pose2D) {
        if let Some(Some(node)) = self.nodes.get_mut(id) {
            node.pose = pose;
        }
    }

    /// Null the slot for `id` and re-run batch optimisation.
    ///
    /// Factors touching the removed node stay recorded but are skipped by
    /// the solver and by `factors()`.
    pub fn remove(&mut self, id: usize) {
        if let Some(slot) = self.nodes.get_mut(id) {
            *slot = None;
        }
        self.optimize();
    }

    /// Reset the graph to empty.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.factors.clear();
    }

    /// Live nodes as `(id, pose)` in id order.
    pub fn nodes(&self) -> Vec<(usize, Pose2D)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.map(|node| (id, node.pose)))
            .collect()
    }

    /// Endpoint positions of every relative factor whose nodes are live.
    pub fn factors(&self) -> Vec<(Point2D, Point2D)> {
        self.factors
            .iter()
            .filter_map(|factor| match *factor {
                Factor::Relative { id_ref, id, .. } => {
                    let a = self.nodes.get(id_ref).copied().flatten()?;
                    let b = self.nodes.get(id).copied().flatten()?;
                    Some((a.pose.pos(), b.pose.pos()))
                }
                Factor::Anchor { .. } => None,
            })
            .collect()
    }

    /// Number of live nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Batch non-linear least squares over all live nodes and factors.
    pub fn optimize(&mut self) -> OptimizationResult {
        self.optimizer.optimize(&mut self.nodes, &self.factors)
    }
}

/// Non-positive covariances are silently replaced with 1.0.
fn sanitize_covariance(cov: f64) -> f64 {
    if cov <= 0.0 { 1.0 } else { cov }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ensure_node_grows_sparse_vector() {
        let mut graph = GraphSlam::new();
        assert!(graph.ensure_node(3));
        assert!(!graph.ensure_node(3));
        // Slots 0..3 exist but are vacant.
        assert_eq!(graph.num_nodes(), 1);
        assert_eq!(graph.nodes(), vec![(3, Pose2D::identity())]);
    }

    #[test]
    fn test_anchor_seeds_new_node() {
        let mut graph = GraphSlam::new();
        let pose = Pose2D::new(1.0, 2.0, 0.3);
        graph.add_pose_anchor(0, pose, 1.0);

        let nodes = graph.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].0, 0);
        assert_relative_eq!(nodes[0].1.x, 1.0);
        assert_relative_eq!(nodes[0].1.y, 2.0);
    }

    #[test]
    fn test_anchor_does_not_reseed_existing_node() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::new(1.0, 0.0, 0.0), 1.0);
        graph.add_pose_anchor(0, Pose2D::new(9.0, 9.0, 0.0), 1.0);
        // The pose stays at the first seed until a solve moves it.
        assert_relative_eq!(graph.nodes()[0].1.x, 1.0);
    }

    #[test]
    fn test_relative_constraint_seeds_from_reference() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::new(1.0, 0.0, 0.0), 1.0);
        graph.add_relative_constraint(0, 1, Pose2D::new(0.5, 0.0, 0.0), 0.8);

        let nodes = graph.nodes();
        assert_eq!(nodes.len(), 2);
        assert_relative_eq!(nodes[1].1.x, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_clamp() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::identity(), -2.0);
        graph.add_relative_constraint(0, 1, Pose2D::new(1.0, 0.0, 0.0), 0.0);

        for factor in &graph.factors {
            let information = match *factor {
                Factor::Anchor { information, .. } => information,
                Factor::Relative { information, .. } => information,
            };
            assert_relative_eq!(information, 1.0);
        }
    }

    #[test]
    fn test_set_node_pose_overwrites_live_nodes_only() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::identity(), 1.0);
        graph.set_node_pose(0, Pose2D::new(3.0, 0.0, 0.0));
        assert_relative_eq!(graph.nodes()[0].1.x, 3.0);

        // Vacant or out-of-range slots are ignored.
        graph.set_node_pose(7, Pose2D::new(1.0, 1.0, 0.0));
        assert_eq!(graph.num_nodes(), 1);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::identity(), 1.0);
        graph.add_relative_constraint(0, 1, Pose2D::new(1.0, 0.0, 0.0), 1.0);
        graph.add_relative_constraint(1, 2, Pose2D::new(1.0, 0.0, 0.0), 1.0);

        graph.remove(1);

        assert_eq!(graph.num_nodes(), 2);
        let ids: Vec<usize> = graph.nodes().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 2]);
        // Both relative factors touch the dead node: none are reported.
        assert!(graph.factors().is_empty());
    }

    #[test]
    fn test_removed_id_can_be_recreated() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::identity(), 1.0);
        graph.remove(0);
        assert_eq!(graph.num_nodes(), 0);
        assert!(graph.ensure_node(0));
    }

    #[test]
    fn test_factors_reports_endpoint_positions() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::new(1.0, 1.0, 0.0), 1.0);
        graph.add_relative_constraint(0, 1, Pose2D::new(2.0, 0.0, 0.0), 1.0);

        let factors = graph.factors();
        assert_eq!(factors.len(), 1);
        assert_relative_eq!(factors[0].0.x, 1.0);
        assert_relative_eq!(factors[0].1.x, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clear_resets() {
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::identity(), 1.0);
        graph.add_relative_constraint(0, 1, Pose2D::new(1.0, 0.0, 0.0), 1.0);
        graph.clear();
        assert_eq!(graph.num_nodes(), 0);
        assert!(graph.nodes().is_empty());
        assert!(graph.factors().is_empty());
    }

    #[test]
    fn test_loop_closure_redistributes_error() {
        // Chain 0→1→2 of 1 m steps, but a confident loop closure insists
        // node 2 sits only 1.6 m from node 0: optimisation shrinks the
        // chain and spreads the disagreement over both legs.
        let mut graph = GraphSlam::new();
        graph.add_pose_anchor(0, Pose2D::identity(), 100.0);
        graph.add_relative_constraint(0, 1, Pose2D::new(1.0, 0.0, 0.0), 1.0);
        graph.add_relative_constraint(1, 2, Pose2D::new(1.0, 0.0, 0.0), 1.0);
        graph.add_relative_constraint(0, 2, Pose2D::new(1.6, 0.0, 0.0), 1.0);

        let result = graph.optimize();
        assert!(result.final_error <= result.initial_error);

        let nodes = graph.nodes();
        let x2 = nodes[2].1.x;
        assert!(x2 < 2.0 && x2 > 1.6, "node 2 at {}", x2);
        // Node 0 is pinned hard by the anchor.
        assert!(nodes[0].1.pos().norm() < 0.05);
    }
}
