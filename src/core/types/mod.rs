//! Core value types shared across the crate.

mod pose;
mod scan;

pub use pose::{Point2D, Pose2D};
pub use scan::{Bounds2D, Echo, LaserScan};
