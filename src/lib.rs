//! DishaSLAM - pose-graph SLAM core for differential-drive robots
//!
//! Maintains a pose estimate from wheel odometry and refines it against a
//! sparse map of "keyscans" using scan-to-scan ICP. Keyscan poses double as
//! pose-graph nodes; admissions insert loop-closure factors and a batch
//! solve folds the optimised poses back into the map.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (slam front-end, graph adapter/solver)       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │              (kd-tree, ICP matching)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Sensor processing
//! │               (encoder kinematics)                  │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The core is single-threaded and synchronous: each pose or scan event
//! drives one call chain to completion. Observer callbacks fire in the
//! caller's thread before the triggering call returns.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Sensor processing (depends on core)
// ============================================================================
pub mod sensors;

// ============================================================================
// Layer 3: Algorithms (depends on core)
// ============================================================================
pub mod algorithms;

// ============================================================================
// Layer 4: SLAM engine (depends on core, sensors, algorithms)
// ============================================================================
pub mod engine;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::math;
pub use crate::core::types::{Bounds2D, Echo, LaserScan, Point2D, Pose2D};

// Sensors
pub use crate::sensors::odometry::encoder_to_pose;

// Algorithms - Matching
pub use crate::algorithms::matching::{KdTree2D, MatchFailure};

// Engine
pub use crate::engine::graph::{Factor, GraphSlam, PoseNode};
pub use crate::engine::graph::optimizer::{
    GraphOptimizer, GraphOptimizerConfig, OptimizationResult, Termination,
};
pub use crate::engine::slam::Slam;
