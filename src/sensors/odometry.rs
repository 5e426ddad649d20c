//! Differential-drive encoder kinematics.
//!
//! Converts per-wheel travel distances to a pose delta in the robot's
//! local frame, where x is forward, y is left and theta is
//! counter-clockwise.

use crate::core::types::Pose2D;

/// Convert left/right wheel arc lengths to a local pose delta.
///
/// Models the motion as a circular arc: the heading change is
/// `θ = (right − left) / tread` and the robot is displaced along the
/// chord (secant) of the arc it travelled,
/// `secant = 2·sin(θ/2)·radius` with `radius = arc/θ`.
/// Straight-line motion is the θ = 0 limit, where the chord equals the
/// arc itself.
///
/// `tread` is the distance between the wheel centers in meters.
pub fn encoder_to_pose(left: f64, right: f64, tread: f64) -> Pose2D {
    let theta = (right - left) / tread;
    let half_theta = theta / 2.0;
    let arc = (right + left) / 2.0;
    let secant = if theta == 0.0 {
        arc
    } else {
        2.0 * half_theta.sin() * (arc / theta)
    };
    Pose2D::new(secant * half_theta.cos(), secant * half_theta.sin(), theta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_straight_forward() {
        for &travel in &[0.001, 0.1, 1.0, 10.0] {
            let delta = encoder_to_pose(travel, travel, 0.5);
            assert_abs_diff_eq!(delta.x, travel, epsilon = 1e-9);
            assert_abs_diff_eq!(delta.y, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(delta.theta, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_straight_backward() {
        let delta = encoder_to_pose(-0.5, -0.5, 0.3);
        assert_abs_diff_eq!(delta.x, -0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(delta.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(delta.theta, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_in_place() {
        // Opposite wheel travel spins the robot without displacing it.
        let tread = 0.2;
        let wheel_arc = tread / 2.0 * FRAC_PI_2;
        let delta = encoder_to_pose(-wheel_arc, wheel_arc, tread);

        assert_abs_diff_eq!(delta.theta, FRAC_PI_2, epsilon = 1e-9);
        assert_abs_diff_eq!(delta.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(delta.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quarter_arc() {
        // A quarter circle of radius 1: chord from (0,0) to (1,1).
        let tread = 0.2;
        let radius = 1.0;
        let left = (radius - tread / 2.0) * FRAC_PI_2;
        let right = (radius + tread / 2.0) * FRAC_PI_2;

        let delta = encoder_to_pose(left, right, tread);
        assert_relative_eq!(delta.theta, FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(delta.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(delta.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gentle_arc_turns_left() {
        let delta = encoder_to_pose(0.10, 0.12, 0.2);
        assert!(delta.x > 0.0);
        assert!(delta.y > 0.0);
        assert!(delta.theta > 0.0);
    }

    #[test]
    fn test_half_turn_heading_normalized() {
        let tread = 0.2;
        let wheel_arc = tread / 2.0 * (PI + 0.1);
        let delta = encoder_to_pose(-wheel_arc, wheel_arc, tread);
        assert!(delta.theta > -PI && delta.theta <= PI);
    }
}
