//! SLAM front-end: pose propagation, keyscan selection and graph upkeep.
//!
//! The front-end integrates odometry into a pose estimate and holds a list
//! of keyscans whose insertion index doubles as the pose-graph node id.
//! Each incoming scan either relocalises against the spatially closest
//! keyscan (ICP) or is admitted as a new keyscan; admissions feed relative
//! constraints into the optional pose-graph back-end and fold the
//! optimised node poses back into the keyscan list.

use std::f64::consts::FRAC_PI_4;

use log::debug;

use crate::core::math::angle_diff;
use crate::core::types::{LaserScan, Point2D, Pose2D};
use crate::engine::graph::GraphSlam;
use crate::sensors::odometry::encoder_to_pose;

/// Observer invoked with the refined pose after an update.
pub type PoseUpdateCallback = Box<dyn FnMut(Pose2D)>;
/// Observer invoked whenever the keyscan set changes.
pub type MapUpdateCallback = Box<dyn FnMut()>;

/// The SLAM front-end.
///
/// Single-threaded and synchronous: every update runs to completion,
/// including its callbacks, before returning. Thresholds are coupled so
/// that `factor_threshold ≥ 2 · keyscan_threshold` always holds; each
/// setter adjusts the other threshold when needed.
pub struct Slam {
    pose: Pose2D,
    keyscans: Vec<LaserScan>,
    keyscan_threshold: f64,
    factor_threshold: f64,
    graph: Option<GraphSlam>,
    pose_update_callback: Option<PoseUpdateCallback>,
    map_update_callback: Option<MapUpdateCallback>,
}

impl Default for Slam {
    fn default() -> Self {
        Self::new()
    }
}

impl Slam {
    /// A front-end without a back-end: keyscans are simply appended and
    /// never re-optimised.
    pub fn new() -> Self {
        Self {
            pose: Pose2D::identity(),
            keyscans: Vec::new(),
            keyscan_threshold: 0.4,
            factor_threshold: 0.9,
            graph: None,
            pose_update_callback: None,
            map_update_callback: None,
        }
    }

    /// A front-end backed by a pose graph: admissions insert loop-closure
    /// factors and read optimised poses back into the keyscan list.
    pub fn with_pose_graph() -> Self {
        Self {
            graph: Some(GraphSlam::new()),
            ..Self::new()
        }
    }

    /// Current pose estimate in the world frame.
    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    /// The keyscans admitted so far, in insertion (= node id) order.
    pub fn keyscans(&self) -> &[LaserScan] {
        &self.keyscans
    }

    /// Distance gate below which a scan relocalises instead of becoming a
    /// keyscan.
    pub fn keyscan_threshold(&self) -> f64 {
        self.keyscan_threshold
    }

    /// Radius within which existing keyscans are constrained against a
    /// newly admitted one.
    pub fn factor_threshold(&self) -> f64 {
        self.factor_threshold
    }

    /// Set the keyscan gate, widening the factor radius to keep
    /// `factor_threshold ≥ 2 · keyscan_threshold`.
    pub fn set_keyscan_threshold(&mut self, keyscan_threshold: f64) {
        self.keyscan_threshold = keyscan_threshold;
        if self.keyscan_threshold * 2.0 > self.factor_threshold {
            self.factor_threshold = self.keyscan_threshold * 2.0;
        }
    }

    /// Set the factor radius, tightening the keyscan gate to keep
    /// `factor_threshold ≥ 2 · keyscan_threshold`.
    pub fn set_factor_threshold(&mut self, factor_threshold: f64) {
        self.factor_threshold = factor_threshold;
        if self.keyscan_threshold * 2.0 > self.factor_threshold {
            self.keyscan_threshold = self.factor_threshold / 2.0;
        }
    }

    /// Endpoint positions of the graph's binary factors; empty without a
    /// back-end.
    pub fn factors(&self) -> Vec<(Point2D, Point2D)> {
        self.graph
            .as_ref()
            .map(GraphSlam::factors)
            .unwrap_or_default()
    }

    /// Register the pose observer, replacing any previous one.
    pub fn register_pose_update_callback(&mut self, callback: impl FnMut(Pose2D) + 'static) {
        self.pose_update_callback = Some(Box::new(callback));
    }

    /// Register the map observer, replacing any previous one.
    pub fn register_map_update_callback(&mut self, callback: impl FnMut() + 'static) {
        self.map_update_callback = Some(Box::new(callback));
    }

    /// Apply an externally computed pose delta.
    pub fn update_pose_with_pose(&mut self, delta: Pose2D) {
        self.pose = self.pose + delta;
    }

    /// Integrate a wheel-encoder increment (arc lengths in meters).
    pub fn update_pose_with_encoder(&mut self, left: f64, right: f64, tread: f64) {
        self.pose = self.pose + encoder_to_pose(left, right, tread);
        self.fire_pose_update();
    }

    /// Process one laser scan: relocalise against the closest keyscan, or
    /// admit the scan as a new keyscan when none is close enough.
    ///
    /// Errors inside ICP are absorbed (the pose falls back to the dead
    /// reckoning estimate); the pose-update callback fires exactly once
    /// per call, the map-update callback on every admission.
    pub fn update_pose_with_laser_scan(&mut self, mut scan: LaserScan) {
        scan.set_pose(self.pose);

        if self.keyscans.is_empty() {
            if let Some(graph) = self.graph.as_mut() {
                graph.add_pose_anchor(0, scan.pose(), 1.0);
            }
            self.keyscans.push(scan);
            debug!("add key scan 1: {}", self.pose);
            self.fire_map_update();
            self.fire_pose_update();
            return;
        }

        let (closest, min_dist) = self.closest_keyscan(&scan);
        if min_dist < self.keyscan_threshold {
            // Relocalise: refine the pose against the closest keyscan
            // instead of growing the map.
            let delta = self.keyscans[closest].icp(&scan, None);
            self.pose = self.keyscans[closest].pose() + delta;
        } else {
            self.admit_keyscan(scan);
        }
        self.fire_pose_update();
    }

    /// Keyscan minimising the composite distance
    /// `sqrt(dx² + (Δθ · keyscan_threshold / (3π/4))²)`: the angular term
    /// is collapsed into meters so a rotation of 3π/4 weighs as much as a
    /// full keyscan_threshold of translation.
    fn closest_keyscan(&self, scan: &LaserScan) -> (usize, f64) {
        let mut closest = 0;
        let mut min_dist = f64::MAX;
        for (i, keyscan) in self.keyscans.iter().enumerate() {
            let dist = keyscan.pose().pos().distance(&scan.pose().pos());
            let dtheta = angle_diff(keyscan.pose().theta, scan.pose().theta).abs()
                * self.keyscan_threshold
                / (FRAC_PI_4 * 3.0);
            let dist = (dist * dist + dtheta * dtheta).sqrt();
            if dist < min_dist {
                min_dist = dist;
                closest = i;
            }
        }
        (closest, min_dist)
    }

    fn admit_keyscan(&mut self, mut scan: LaserScan) {
        let new_id = self.keyscans.len();
        if let Some(graph) = self.graph.as_mut() {
            // Constrain the incoming scan against every keyscan within the
            // factor radius; the match ratio doubles as the covariance.
            let mut constraint_count = 0usize;
            for (i, keyscan) in self.keyscans.iter().enumerate() {
                let distance = self.pose.pos().distance(&keyscan.pose().pos());
                if distance >= self.factor_threshold {
                    continue;
                }
                // A keyscan admitted without constraints has no node yet;
                // seed it at the keyscan's pose on first reference.
                if graph.ensure_node(i) {
                    graph.set_node_pose(i, keyscan.pose());
                }
                let mut ratio = 0.0;
                let delta = keyscan.icp(&scan, Some(&mut ratio));
                graph.add_relative_constraint(i, new_id, delta, ratio);
                constraint_count += 1;
            }
            if constraint_count > 1 {
                graph.optimize();
            }

            // Fold the (possibly optimised) node poses back into the map;
            // the node matching the incoming scan becomes the new estimate.
            for (id, pose) in graph.nodes() {
                if id < self.keyscans.len() {
                    self.keyscans[id].set_pose(pose);
                } else if id == new_id {
                    self.pose = pose;
                    scan.set_pose(pose);
                }
            }
        }
        self.keyscans.push(scan);
        debug!("add key scan {}: {}", self.keyscans.len(), self.pose);
        self.fire_map_update();
    }

    fn fire_pose_update(&mut self) {
        if let Some(callback) = self.pose_update_callback.as_mut() {
            callback(self.pose);
        }
    }

    fn fire_map_update(&mut self) {
        if let Some(callback) = self.map_update_callback.as_mut() {
            callback();
        }
    }
}
