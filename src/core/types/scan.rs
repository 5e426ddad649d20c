//! Range-sensor scan types.

use serde::{Deserialize, Serialize};

use super::pose::{Point2D, Pose2D};

/// One range return from the sensor, in polar sensor-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    /// Measured range in meters, non-negative
    pub range: f64,
    /// Bearing in radians, sensor frame
    pub angle: f64,
    /// Return intensity, sensor-specific units
    pub intensity: f64,
    /// Monotonic acquisition time stamp in microseconds
    pub time_stamp: i64,
}

impl Echo {
    /// Create a new echo.
    #[inline]
    pub fn new(range: f64, angle: f64, intensity: f64, time_stamp: i64) -> Self {
        Self {
            range,
            angle,
            intensity,
            time_stamp,
        }
    }

    /// Cartesian projection into the sensor frame.
    #[inline]
    pub fn point(&self) -> Point2D {
        let (sin_a, cos_a) = self.angle.sin_cos();
        Point2D::new(self.range * cos_a, self.range * sin_a)
    }
}

/// Axis-aligned bounds of a scan's world-frame points.
///
/// Accumulated starting from zero, so the sensor origin is always inside
/// the box even when every return lies in one quadrant. Callers that need
/// a strict bounding box of the points must ignore this for empty scans.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds2D {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Lazily materialized world-frame view of a scan.
#[derive(Debug, Clone, Default)]
enum WorldCache {
    #[default]
    Stale,
    Fresh {
        points: Vec<Point2D>,
        bounds: Bounds2D,
    },
}

/// A laser scan: sensor-frame points plus the pose they were taken from.
///
/// The sensor-frame points are fixed at construction. The world-frame view
/// (points and bounding box) is cached and invalidated whenever the pose
/// changes; accessors re-materialize it on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserScan {
    points_self: Vec<Point2D>,
    pose: Pose2D,
    #[serde(skip)]
    world: WorldCache,
    /// Correspondence distance below which a point counts as matched
    /// when ICP reports its match ratio.
    pub match_threshold: f64,
    /// Correspondence distance above which ICP rejects a pairing.
    pub dist_threshold: f64,
}

impl LaserScan {
    /// Build a scan from echoes; the pose defaults to the identity.
    pub fn from_echoes(echoes: &[Echo]) -> Self {
        Self::with_pose(echoes, Pose2D::identity())
    }

    /// Build a scan from echoes taken at `pose`.
    pub fn with_pose(echoes: &[Echo], pose: Pose2D) -> Self {
        Self {
            points_self: echoes.iter().map(Echo::point).collect(),
            pose,
            world: WorldCache::Stale,
            match_threshold: 0.1,
            dist_threshold: 1.0,
        }
    }

    /// The pose the scan is stamped with.
    #[inline]
    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    /// Restamp the scan, invalidating the world-frame cache.
    pub fn set_pose(&mut self, pose: Pose2D) {
        self.pose = pose;
        self.world = WorldCache::Stale;
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points_self.len()
    }

    /// Check if the scan has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points_self.is_empty()
    }

    /// Points in the sensor frame.
    #[inline]
    pub fn points_self(&self) -> &[Point2D] {
        &self.points_self
    }

    /// Points transformed into the world frame.
    ///
    /// The returned slice stays valid (and untouched) for as long as it is
    /// borrowed; the cache is only invalidated through `set_pose`.
    pub fn points_world(&mut self) -> &[Point2D] {
        self.update_to_world();
        match &self.world {
            WorldCache::Fresh { points, .. } => points,
            WorldCache::Stale => &[],
        }
    }

    /// Bounding box of the world-frame points (origin included).
    pub fn world_bounds(&mut self) -> Bounds2D {
        self.update_to_world();
        match &self.world {
            WorldCache::Fresh { bounds, .. } => *bounds,
            WorldCache::Stale => Bounds2D::default(),
        }
    }

    fn update_to_world(&mut self) {
        if matches!(self.world, WorldCache::Fresh { .. }) {
            return;
        }
        let (sin_t, cos_t) = self.pose.theta.sin_cos();
        let mut points = Vec::with_capacity(self.points_self.len());
        let mut bounds = Bounds2D::default();
        for p in &self.points_self {
            let w = Point2D::new(
                self.pose.x + p.x * cos_t - p.y * sin_t,
                self.pose.y + p.x * sin_t + p.y * cos_t,
            );
            if w.x > bounds.max_x {
                bounds.max_x = w.x;
            }
            if w.x < bounds.min_x {
                bounds.min_x = w.x;
            }
            if w.y > bounds.max_y {
                bounds.max_y = w.y;
            }
            if w.y < bounds.min_y {
                bounds.min_y = w.y;
            }
            points.push(w);
        }
        self.world = WorldCache::Fresh { points, bounds };
    }

    /// Transform a point sequence by a pose: `R(θ)·p + t` for each point.
    pub fn transform(points: &[Point2D], pose: Pose2D) -> Vec<Point2D> {
        let (sin_t, cos_t) = pose.theta.sin_cos();
        points
            .iter()
            .map(|p| {
                Point2D::new(
                    pose.x + p.x * cos_t - p.y * sin_t,
                    pose.y + p.x * sin_t + p.y * cos_t,
                )
            })
            .collect()
    }
}
