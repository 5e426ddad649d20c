//! End-to-end front-end scenarios: feeding scans and odometry through the
//! public API and checking poses, keyscan admission and callback traffic.

use std::cell::{Cell, RefCell};
use std::f64::consts::{FRAC_PI_2, PI};
use std::rc::Rc;

use approx::assert_relative_eq;
use disha_slam::{Echo, LaserScan, Pose2D, Slam};

/// Ten echoes at 1 m evenly distributed over bearings [-π, π).
fn unit_fan() -> LaserScan {
    let echoes: Vec<Echo> = (0..10)
        .map(|i| {
            let angle = -PI + i as f64 / 10.0 * 2.0 * PI;
            Echo::new(1.0, angle, 1.0, i as i64)
        })
        .collect();
    LaserScan::from_echoes(&echoes)
}

struct Counters {
    poses: Rc<Cell<usize>>,
    maps: Rc<Cell<usize>>,
    last_pose: Rc<RefCell<Pose2D>>,
}

fn instrument(slam: &mut Slam) -> Counters {
    let poses = Rc::new(Cell::new(0));
    let maps = Rc::new(Cell::new(0));
    let last_pose = Rc::new(RefCell::new(Pose2D::identity()));

    let pose_sink = Rc::clone(&poses);
    let pose_value = Rc::clone(&last_pose);
    slam.register_pose_update_callback(move |pose| {
        pose_sink.set(pose_sink.get() + 1);
        *pose_value.borrow_mut() = pose;
    });

    let map_sink = Rc::clone(&maps);
    slam.register_map_update_callback(move || map_sink.set(map_sink.get() + 1));

    Counters {
        poses,
        maps,
        last_pose,
    }
}

#[test]
fn first_scan_creates_one_keyscan_at_origin() {
    let mut slam = Slam::with_pose_graph();
    let counters = instrument(&mut slam);

    slam.update_pose_with_laser_scan(unit_fan());

    assert_eq!(slam.keyscans().len(), 1);
    let keyscan_pose = slam.keyscans()[0].pose();
    assert_relative_eq!(keyscan_pose.x, 0.0);
    assert_relative_eq!(keyscan_pose.y, 0.0);
    assert_relative_eq!(keyscan_pose.theta, 0.0);

    assert_eq!(counters.maps.get(), 1);
    assert_eq!(counters.poses.get(), 1);
    assert_relative_eq!(counters.last_pose.borrow().x, 0.0);
}

#[test]
fn repeated_scan_without_motion_keeps_pose_at_origin() {
    let mut slam = Slam::with_pose_graph();
    slam.update_pose_with_laser_scan(unit_fan());
    slam.update_pose_with_laser_scan(unit_fan());

    assert_eq!(slam.keyscans().len(), 1);
    assert!(slam.pose().pos().norm() < 1e-3);
    assert!(slam.pose().theta.abs() < 1e-3);
}

#[test]
fn scan_matching_pulls_back_an_overestimated_motion() {
    let mut slam = Slam::with_pose_graph();
    slam.update_pose_with_laser_scan(unit_fan());

    // The robot believes it drove half a meter but the world looks
    // exactly the same: matching must win over dead reckoning.
    slam.update_pose_with_pose(Pose2D::new(0.5, 0.0, 0.0));
    for _ in 0..3 {
        slam.update_pose_with_laser_scan(unit_fan());
    }

    assert!(slam.pose().x.abs() < 0.25, "pose.x = {}", slam.pose().x);
}

#[test]
fn straight_encoder_drive_lands_on_the_meter() {
    let mut slam = Slam::new();
    slam.update_pose_with_encoder(1.0, 1.0, 0.5);

    assert_relative_eq!(slam.pose().x, 1.0, epsilon = 1e-9);
    assert_relative_eq!(slam.pose().y, 0.0, epsilon = 1e-9);
    assert_relative_eq!(slam.pose().theta, 0.0, epsilon = 1e-9);
}

#[test]
fn pose_composition_turn_then_step() {
    let composed = Pose2D::new(1.0, 0.0, FRAC_PI_2) + Pose2D::new(1.0, 0.0, 0.0);
    assert_relative_eq!(composed.x, 1.0, epsilon = 1e-9);
    assert_relative_eq!(composed.y, 1.0, epsilon = 1e-9);
    assert_relative_eq!(composed.theta, FRAC_PI_2, epsilon = 1e-9);
}

#[test]
fn driving_a_hallway_accumulates_keyscans_in_order() {
    let mut slam = Slam::with_pose_graph();
    let counters = instrument(&mut slam);

    // Drive forward in half-meter hops past the admission gate.
    for _ in 0..5 {
        slam.update_pose_with_laser_scan(unit_fan());
        slam.update_pose_with_pose(Pose2D::new(0.5, 0.0, 0.0));
    }

    // Every admitted keyscan fired the map callback exactly once, every
    // scan fired the pose callback exactly once.
    assert_eq!(counters.maps.get(), slam.keyscans().len());
    assert_eq!(counters.poses.get(), 5);
    assert!(slam.keyscans().len() >= 2);

    // Admissions within the factor radius left binary factors behind.
    assert!(!slam.factors().is_empty());
}

#[test]
fn backendless_front_end_appends_without_optimising() {
    let mut slam = Slam::new();
    slam.update_pose_with_laser_scan(unit_fan());
    slam.update_pose_with_pose(Pose2D::new(0.6, 0.0, 0.0));
    slam.update_pose_with_laser_scan(unit_fan());

    assert_eq!(slam.keyscans().len(), 2);
    assert!(slam.factors().is_empty());
    assert_relative_eq!(slam.keyscans()[1].pose().x, 0.6, epsilon = 1e-9);
}

#[test]
fn threshold_setters_keep_the_invariant_both_ways() {
    let mut slam = Slam::new();

    slam.set_keyscan_threshold(0.8);
    assert!(slam.factor_threshold() >= 2.0 * slam.keyscan_threshold());

    slam.set_factor_threshold(0.6);
    assert!(slam.keyscan_threshold() <= slam.factor_threshold() / 2.0);
}
