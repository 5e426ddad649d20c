//! Point-to-point ICP between two laser scans.
//!
//! Aligns a moving scan against a reference scan by alternating
//! nearest-neighbour correspondence search with a damped rigid update:
//!
//! 1. Densify the reference by linear interpolation so correspondences
//!    see a piecewise-linear surface instead of isolated returns.
//! 2. Index the densified reference with a k-d tree.
//! 3. For a fixed number of iterations: transform the moving scan by the
//!    current estimate, pair every point with its nearest reference
//!    sample, reject outliers (distance gate, shared-target multiplicity,
//!    farthest-residual trim), and apply the averaged translational and
//!    rotational pull.

use log::error;

use super::kdtree::KdTree2D;
use super::MatchFailure;
use crate::core::types::{LaserScan, Point2D, Pose2D};

/// Interpolated samples per consecutive reference point pair.
const INSERT_NUM: usize = 7;
/// Fixed iteration count; there is no convergence test.
const MAX_ITERATIONS: usize = 20;
/// Correspondence vectors shorter than this are applied at full length;
/// longer ones are compressed to `sqrt(20·L)/20`.
const NEAR_SCALE_CUTOFF: f64 = 0.05;
/// More query points than this sharing one reference sample masks them
/// all out as a degenerate feature.
const MULTIPLICITY_CAP: usize = 3;
/// Empirical gain on the averaged translational update.
const TRANSLATION_GAIN: f64 = 2.0;
/// Gain on the averaged rotational update.
const ROTATION_GAIN: f64 = 1.0;

impl LaserScan {
    /// Align `other` against `self` and return the pose of `other`
    /// expressed in `self`'s frame.
    ///
    /// The scans' poses seed the estimate (`other.pose() - self.pose()`),
    /// so a caller propagating odometry gets a warm start for free. When
    /// `ratio` is given it receives the fraction of `other`'s points that
    /// ended up within `self.match_threshold` of the reference.
    ///
    /// Failure behaviour: a scan with fewer than two points returns the
    /// initial guess and leaves `ratio` untouched; an empty index returns
    /// the identity with `ratio = 0`; fully rejected correspondences
    /// return the initial guess with `ratio = 0`.
    pub fn icp(&self, other: &LaserScan, mut ratio: Option<&mut f64>) -> Pose2D {
        let scan_ref = self.points_self();
        let scan_origin = other.points_self();
        let reference_pose = other.pose() - self.pose();

        if scan_ref.len() < 2 || scan_origin.len() < 2 {
            error!("{}", MatchFailure::DegenerateScan);
            return reference_pose;
        }

        let dense = densify(scan_ref);
        let tree = KdTree2D::build(&dense);

        let mut pose = reference_pose;
        for _ in 0..MAX_ITERATIONS {
            let scan = LaserScan::transform(scan_origin, pose);

            // Nearest reference sample per point; rejected points keep
            // themselves as their own target so their residual reads zero.
            let mut near = scan.clone();
            let mut trace_back: Vec<Vec<usize>> = vec![Vec::new(); dense.len()];
            let mut mask = vec![false; scan.len()];

            let mut match_count = 0usize;
            for (i, point) in scan.iter().enumerate() {
                let index = match tree.nearest_index(*point) {
                    Some(index) => index,
                    None => {
                        error!("{}", MatchFailure::EmptyTree);
                        if let Some(r) = ratio.as_deref_mut() {
                            *r = 0.0;
                        }
                        return Pose2D::identity();
                    }
                };
                trace_back[index].push(i);

                let closest = dense[index];
                let distance = point.distance(&closest);
                if distance < self.match_threshold {
                    match_count += 1;
                }
                if distance < self.dist_threshold {
                    near[i] = closest;
                    mask[i] = true;
                }
            }
            if let Some(r) = ratio.as_deref_mut() {
                *r = match_count as f64 / scan.len() as f64;
            }

            // Degenerate features attract many points onto one sample;
            // drop every point in such a cluster.
            for hits in &trace_back {
                if hits.len() > MULTIPLICITY_CAP {
                    for &i in hits {
                        mask[i] = false;
                        near[i] = scan[i];
                    }
                }
            }

            trim_farthest(&scan, &near, &mut mask);

            let kept = mask.iter().filter(|&&m| m).count();
            if kept == 0 {
                error!("{}", MatchFailure::NoCorrespondences);
                if let Some(r) = ratio.as_deref_mut() {
                    *r = 0.0;
                }
                return reference_pose;
            }

            let mut center = Point2D::default();
            for (i, p) in scan.iter().enumerate() {
                if mask[i] {
                    center.x += p.x;
                    center.y += p.y;
                }
            }
            center.x /= kept as f64;
            center.y /= kept as f64;

            let mut move_x = 0.0;
            let mut move_y = 0.0;
            let mut rot = 0.0;
            for i in 0..scan.len() {
                if !mask[i] {
                    continue;
                }
                let mut dx = near[i].x - scan[i].x;
                let mut dy = near[i].y - scan[i].y;
                let length = (dx * dx + dy * dy).sqrt();
                if length > 0.0 {
                    // Square-root damping keeps far correspondences from
                    // commanding jumps the surface model cannot justify.
                    let scale = if length < NEAR_SCALE_CUTOFF {
                        length
                    } else {
                        (length * 20.0).sqrt() / 20.0
                    };
                    dx = dx / length * scale;
                    dy = dy / length * scale;
                }
                move_x += dx;
                move_y += dy;

                let p = Point2D::new(scan[i].x - center.x, scan[i].y - center.y);
                let q = Point2D::new(near[i].x - center.x, near[i].y - center.y);
                let p_norm = p.norm();
                if p_norm < f64::EPSILON * 2.0 {
                    continue;
                }
                rot += (p.x * q.y - p.y * q.x) / p_norm / p_norm.sqrt();
            }
            move_x = move_x / kept as f64 * TRANSLATION_GAIN;
            move_y = move_y / kept as f64 * TRANSLATION_GAIN;
            rot = rot / kept as f64 * ROTATION_GAIN;

            // The pull was computed in world coordinates; conjugate it into
            // the estimate's own frame before composing.
            let delta = Pose2D::new(move_x, move_y, rot);
            let delta = pose.inverse() + delta + pose;
            pose = pose + delta;
        }
        pose
    }
}

/// Linearly interpolate `INSERT_NUM` samples into each consecutive pair,
/// yielding `INSERT_NUM · (n − 1)` points. The originals are the `t = 0`
/// samples; the final original point is only approached, never included.
fn densify(points: &[Point2D]) -> Vec<Point2D> {
    let mut dense = Vec::with_capacity(INSERT_NUM * points.len().saturating_sub(1));
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for j in 0..INSERT_NUM {
            let t = j as f64 / INSERT_NUM as f64;
            dense.push(Point2D::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t));
        }
    }
    dense
}

/// Disable the correspondences with the largest residuals, keeping the
/// least-bad member of the farthest tenth enabled. Scans under 20 points
/// are left untouched.
fn trim_farthest(scan: &[Point2D], near: &[Point2D], mask: &mut [bool]) {
    let trim = scan.len() / 10;
    if trim < 2 {
        return;
    }
    let mut by_residual: Vec<usize> = (0..scan.len()).collect();
    by_residual.sort_unstable_by(|&a, &b| {
        scan[b]
            .distance_squared(&near[b])
            .partial_cmp(&scan[a].distance_squared(&near[a]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for &i in &by_residual[..trim - 1] {
        mask[i] = false;
    }
}
