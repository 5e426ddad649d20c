//! Batch pose-graph optimisation by damped Gauss-Newton.
//!
//! Minimises the weighted squared error of all factors:
//!
//! ```text
//! F(x) = Σ ωᵢ · ‖e(x, zᵢ)‖²
//! ```
//!
//! where each anchor contributes `e = xᵢ ⊖ z` and each relative factor
//! contributes `e = (xᵢ⁻¹ ∘ xⱼ) ⊖ z`, all with scalar information `ω`
//! (the matrix is `ω · I₃`). Each iteration solves `H·Δx = −b` with
//! Levenberg-Marquardt damping on the diagonal; steps that grow the error
//! are rejected and retried with more damping.

use crate::core::math::angle_diff;
use crate::core::types::Pose2D;

use super::{Factor, PoseNode};

/// Reason for optimisation termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Relative error change fell below the threshold.
    Converged,
    /// Maximum iterations reached.
    MaxIterations,
    /// Damping grew past its ceiling without finding a descent step.
    Diverged,
    /// The damped normal equations were not positive definite.
    SolveFailed,
    /// Nothing to optimise.
    NoFactors,
}

/// Result of a batch solve.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Iterations performed.
    pub iterations: u32,
    /// Chi-squared error before the first step.
    pub initial_error: f64,
    /// Chi-squared error at termination.
    pub final_error: f64,
    /// Whether the solve converged.
    pub converged: bool,
    /// Why the solve stopped.
    pub termination: Termination,
}

/// Configuration for the batch solver.
#[derive(Debug, Clone)]
pub struct GraphOptimizerConfig {
    /// Maximum number of Gauss-Newton iterations.
    pub max_iterations: u32,
    /// Convergence threshold on the relative chi-squared change.
    pub convergence_threshold: f64,
    /// Initial Levenberg-Marquardt damping factor.
    pub damping_factor: f64,
}

impl Default for GraphOptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-6,
            damping_factor: 1e-3,
        }
    }
}

/// Batch Gauss-Newton / Levenberg-Marquardt solver.
#[derive(Debug, Default)]
pub struct GraphOptimizer {
    config: GraphOptimizerConfig,
}

/// Factor with node ids resolved to dense pose indices.
enum Resolved {
    Anchor { i: usize, z: Pose2D, omega: f64 },
    Relative { i: usize, j: usize, z: Pose2D, omega: f64 },
}

impl GraphOptimizer {
    /// Create a solver with the given configuration.
    pub fn new(config: GraphOptimizerConfig) -> Self {
        Self { config }
    }

    /// Optimise the live nodes in `slots` against `factors`.
    ///
    /// Tombstoned slots are skipped; factors touching a dead node are
    /// ignored. Poses are written back into the slots on every exit path.
    pub fn optimize(
        &self,
        slots: &mut [Option<PoseNode>],
        factors: &[Factor],
    ) -> OptimizationResult {
        // Dense index over live slots.
        let live: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect();
        let mut dense = vec![usize::MAX; slots.len()];
        for (d, &id) in live.iter().enumerate() {
            dense[id] = d;
        }

        let resolved: Vec<Resolved> = factors
            .iter()
            .filter_map(|factor| match *factor {
                Factor::Anchor {
                    id,
                    measurement,
                    information,
                } => {
                    let i = *dense.get(id)?;
                    (i != usize::MAX).then_some(Resolved::Anchor {
                        i,
                        z: measurement,
                        omega: information,
                    })
                }
                Factor::Relative {
                    id_ref,
                    id,
                    measurement,
                    information,
                } => {
                    let i = *dense.get(id_ref)?;
                    let j = *dense.get(id)?;
                    (i != usize::MAX && j != usize::MAX).then_some(Resolved::Relative {
                        i,
                        j,
                        z: measurement,
                        omega: information,
                    })
                }
            })
            .collect();

        let mut poses: Vec<Pose2D> = live
            .iter()
            .filter_map(|&id| slots[id].map(|node| node.pose))
            .collect();
        let dim = poses.len() * 3;

        if resolved.is_empty() || dim == 0 {
            return OptimizationResult {
                iterations: 0,
                initial_error: 0.0,
                final_error: 0.0,
                converged: true,
                termination: Termination::NoFactors,
            };
        }

        let initial_error = chi_squared(&poses, &resolved);
        let mut current_error = initial_error;
        let mut lambda = self.config.damping_factor;
        let mut iterations = 0;
        let mut termination = Termination::MaxIterations;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;

            let (h, b) = build_linear_system(&poses, &resolved, dim);
            let h_damped = apply_damping(&h, lambda, dim);

            let dx = match solve_cholesky(&h_damped, &b, dim) {
                Some(dx) => dx,
                None => {
                    termination = Termination::SolveFailed;
                    break;
                }
            };

            let candidate = apply_update(&poses, &dx);
            let new_error = chi_squared(&candidate, &resolved);

            // Reject steps that grow the error and retry with more damping.
            if new_error > current_error * 1.1 {
                lambda *= 10.0;
                if lambda > 1e10 {
                    termination = Termination::Diverged;
                    break;
                }
                continue;
            }

            poses = candidate;
            lambda = (lambda * 0.1).max(1e-10);

            let relative_change =
                (current_error - new_error).abs() / current_error.max(1e-10);
            current_error = new_error;

            if relative_change < self.config.convergence_threshold {
                termination = Termination::Converged;
                break;
            }
        }

        for (d, &id) in live.iter().enumerate() {
            if let Some(slot) = slots[id].as_mut() {
                slot.pose = poses[d];
            }
        }

        OptimizationResult {
            iterations,
            initial_error,
            final_error: current_error,
            converged: termination == Termination::Converged,
            termination,
        }
    }
}

/// Error vector of an anchor factor: `x ⊖ z`.
fn anchor_error(pose: &Pose2D, z: &Pose2D) -> [f64; 3] {
    [
        pose.x - z.x,
        pose.y - z.y,
        angle_diff(z.theta, pose.theta),
    ]
}

/// Error vector of a relative factor: `(xi⁻¹ ∘ xj) ⊖ z`.
fn relative_error(xi: &Pose2D, xj: &Pose2D, z: &Pose2D) -> [f64; 3] {
    let predicted = xi.inverse() + *xj;
    [
        predicted.x - z.x,
        predicted.y - z.y,
        angle_diff(z.theta, predicted.theta),
    ]
}

fn chi_squared(poses: &[Pose2D], factors: &[Resolved]) -> f64 {
    let mut chi2 = 0.0;
    for factor in factors {
        let (e, omega) = match factor {
            Resolved::Anchor { i, z, omega } => (anchor_error(&poses[*i], z), *omega),
            Resolved::Relative { i, j, z, omega } => {
                (relative_error(&poses[*i], &poses[*j], z), *omega)
            }
        };
        chi2 += omega * (e[0] * e[0] + e[1] * e[1] + e[2] * e[2]);
    }
    chi2
}

/// Jacobians of the relative error w.r.t. both endpoint poses,
/// row-major 3x3.
fn relative_jacobians(xi: &Pose2D, xj: &Pose2D) -> ([f64; 9], [f64; 9]) {
    let (sin_i, cos_i) = xi.theta.sin_cos();
    let dx = xj.x - xi.x;
    let dy = xj.y - xi.y;

    let ji = [
        -cos_i,
        -sin_i,
        -sin_i * dx + cos_i * dy,
        sin_i,
        -cos_i,
        -cos_i * dx - sin_i * dy,
        0.0,
        0.0,
        -1.0,
    ];
    let jj = [
        cos_i, sin_i, 0.0, //
        -sin_i, cos_i, 0.0, //
        0.0, 0.0, 1.0,
    ];
    (ji, jj)
}

/// `ω · AᵀB` for row-major 3x3 matrices.
fn mat3_transpose_mul_scaled(a: &[f64; 9], b: &[f64; 9], omega: f64) -> [f64; 9] {
    let mut c = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                c[i * 3 + j] += a[k * 3 + i] * b[k * 3 + j];
            }
            c[i * 3 + j] *= omega;
        }
    }
    c
}

fn build_linear_system(
    poses: &[Pose2D],
    factors: &[Resolved],
    dim: usize,
) -> (Vec<f64>, Vec<f64>) {
    let mut h = vec![0.0; dim * dim];
    let mut b = vec![0.0; dim];

    for factor in factors {
        match factor {
            Resolved::Anchor { i, z, omega } => {
                let e = anchor_error(&poses[*i], z);
                let base = i * 3;
                for r in 0..3 {
                    h[(base + r) * dim + base + r] += omega;
                    b[base + r] += omega * e[r];
                }
            }
            Resolved::Relative { i, j, z, omega } => {
                let e = relative_error(&poses[*i], &poses[*j], z);
                let (ji, jj) = relative_jacobians(&poses[*i], &poses[*j]);

                let h_ii = mat3_transpose_mul_scaled(&ji, &ji, *omega);
                let h_ij = mat3_transpose_mul_scaled(&ji, &jj, *omega);
                let h_jj = mat3_transpose_mul_scaled(&jj, &jj, *omega);

                let base_i = i * 3;
                let base_j = j * 3;
                for r in 0..3 {
                    for c in 0..3 {
                        h[(base_i + r) * dim + base_i + c] += h_ii[r * 3 + c];
                        h[(base_i + r) * dim + base_j + c] += h_ij[r * 3 + c];
                        h[(base_j + r) * dim + base_i + c] += h_ij[c * 3 + r];
                        h[(base_j + r) * dim + base_j + c] += h_jj[r * 3 + c];
                    }
                    b[base_i + r] +=
                        omega * (ji[r] * e[0] + ji[3 + r] * e[1] + ji[6 + r] * e[2]);
                    b[base_j + r] +=
                        omega * (jj[r] * e[0] + jj[3 + r] * e[1] + jj[6 + r] * e[2]);
                }
            }
        }
    }

    (h, b)
}

/// Levenberg-Marquardt damping on the diagonal.
fn apply_damping(h: &[f64], lambda: f64, dim: usize) -> Vec<f64> {
    let mut damped = h.to_vec();
    for i in 0..dim {
        damped[i * dim + i] += lambda * damped[i * dim + i].max(1.0);
    }
    damped
}

/// Solve `H·x = −b` by dense Cholesky. Returns `None` when `H` is not
/// positive definite.
fn solve_cholesky(h: &[f64], b: &[f64], dim: usize) -> Option<Vec<f64>> {
    // Decompose H = L·Lᵀ.
    let mut l = vec![0.0; dim * dim];
    for i in 0..dim {
        for j in 0..=i {
            let mut sum = h[i * dim + j];
            for k in 0..j {
                sum -= l[i * dim + k] * l[j * dim + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i * dim + j] = sum.sqrt();
            } else {
                l[i * dim + j] = sum / l[j * dim + j];
            }
        }
    }

    // Forward substitution: L·y = b.
    let mut y = vec![0.0; dim];
    for i in 0..dim {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * dim + j] * y[j];
        }
        y[i] = sum / l[i * dim + i];
    }

    // Backward substitution: Lᵀ·x = y.
    let mut x = vec![0.0; dim];
    for i in (0..dim).rev() {
        let mut sum = y[i];
        for j in (i + 1)..dim {
            sum -= l[j * dim + i] * x[j];
        }
        x[i] = sum / l[i * dim + i];
    }

    // H·dx = −b.
    for value in &mut x {
        *value = -*value;
    }
    Some(x)
}

fn apply_update(poses: &[Pose2D], dx: &[f64]) -> Vec<Pose2D> {
    poses
        .iter()
        .enumerate()
        .map(|(k, pose)| {
            let base = k * 3;
            Pose2D::new(
                pose.x + dx[base],
                pose.y + dx[base + 1],
                pose.theta + dx[base + 2],
            )
        })
        .collect()
}
