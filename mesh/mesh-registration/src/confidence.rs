//! Confidence weighting of correspondences.
//!
//! Far matches are less trustworthy, so their residuals count less. The
//! falloff sigma is derived once per evaluation and travels in an
//! [`EvaluationContext`] instead of living inside the weighter.

use mesh_types::{CellLinks, Hinge};

use crate::correspondence::Correspondence;
use crate::ThinShellParams;

/// Per-evaluation quantities shared by the weighter and the energy.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvaluationContext {
    /// Gaussian falloff width, `None` when every weight is 1.
    pub sigma: Option<f64>,
    /// Largest correspondence distance.
    pub max_distance: f64,
    /// Mean correspondence distance.
    pub mean_distance: f64,
}

/// Maps correspondence distances to weights in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ConfidenceWeighter {
    enabled: bool,
    maximal_distance_sigma: bool,
    fixed_sigma: f64,
    boundary_confidence: f64,
    boundary: Vec<bool>,
}

impl ConfidenceWeighter {
    /// Create a weighter for a shell with the given boundary flags.
    #[must_use]
    pub fn new(params: &ThinShellParams, boundary: Vec<bool>) -> Self {
        Self {
            enabled: params.use_confidence_weighting,
            maximal_distance_sigma: params.use_maximal_distance_confidence_sigma,
            fixed_sigma: params.confidence_sigma,
            boundary_confidence: params.boundary_confidence.clamp(0.0, 1.0),
            boundary,
        }
    }

    /// Create a weighter from the shell's cell links.
    #[must_use]
    pub fn from_links(params: &ThinShellParams, links: &CellLinks) -> Self {
        let boundary = (0..links.vertex_count()).map(|v| links.is_boundary(v)).collect();
        Self::new(params, boundary)
    }

    /// Whether confidence weighting is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Summarise the distances of one evaluation.
    #[must_use]
    pub fn context(&self, correspondences: &[Correspondence]) -> EvaluationContext {
        let max_distance = correspondences
            .iter()
            .map(|c| c.distance)
            .fold(0.0_f64, f64::max);
        #[allow(clippy::cast_precision_loss)]
        let mean_distance = if correspondences.is_empty() {
            0.0
        } else {
            correspondences.iter().map(|c| c.distance).sum::<f64>() / correspondences.len() as f64
        };

        let sigma = if !self.enabled {
            None
        } else if self.maximal_distance_sigma {
            (max_distance > 0.0).then_some(max_distance)
        } else {
            Some(self.fixed_sigma)
        };

        EvaluationContext {
            sigma,
            max_distance,
            mean_distance,
        }
    }

    /// Weight for one vertex at match distance `distance`.
    #[must_use]
    pub fn weight(&self, vertex: usize, distance: f64, context: &EvaluationContext) -> f64 {
        let Some(sigma) = context.sigma else {
            return 1.0;
        };
        if distance <= 0.0 {
            return 1.0;
        }
        let base = if self.boundary.get(vertex).copied().unwrap_or(false) {
            self.boundary_confidence
        } else {
            1.0
        };
        let w = base * (-(distance * distance) / (2.0 * sigma * sigma)).exp();
        if w.is_finite() {
            w.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Weights for every correspondence, in vertex order.
    #[must_use]
    pub fn weights(
        &self,
        correspondences: &[Correspondence],
        context: &EvaluationContext,
    ) -> Vec<f64> {
        correspondences
            .iter()
            .map(|c| self.weight(c.vertex, c.distance, context))
            .collect()
    }
}

/// Mean weight of an edge's endpoints.
#[must_use]
pub fn edge_weight(weights: &[f64], edge: [u32; 2]) -> f64 {
    0.5 * (weights[edge[0] as usize] + weights[edge[1] as usize])
}

/// Mean weight of a hinge's four vertices.
#[must_use]
pub fn hinge_weight(weights: &[f64], hinge: &Hinge) -> f64 {
    0.25 * (weights[hinge.edge[0] as usize]
        + weights[hinge.edge[1] as usize]
        + weights[hinge.opposite[0] as usize]
        + weights[hinge.opposite[1] as usize])
}
