//! Configuration for the metric, the optimizer and the driver.
//!
//! Every struct has a `Default` matching the reference configuration and
//! chained `with_*` setters. `validate()` is called before any evaluation so
//! bad values surface as configuration errors up front.

use crate::{RegistrationError, RegistrationResult};

fn check_non_negative(name: &str, value: f64) -> RegistrationResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RegistrationError::invalid_parameter(format!(
            "{name} must be finite and non-negative, got {value}"
        )))
    }
}

fn check_positive(name: &str, value: f64) -> RegistrationResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RegistrationError::invalid_parameter(format!(
            "{name} must be finite and positive, got {value}"
        )))
    }
}

fn check_count(name: &str, value: usize) -> RegistrationResult<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(RegistrationError::invalid_parameter(format!(
            "{name} must be positive"
        )))
    }
}

/// Thin-shell metric parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct ThinShellParams {
    /// Weight of the stretch (membrane) term (default: 1.0).
    pub stretch_weight: f64,
    /// Weight of the bend term (default: 5.0).
    pub bend_weight: f64,
    /// Weight of the feature term (default: 10.0).
    pub feature_weight: f64,
    /// Down-weight far correspondences (default: true).
    pub use_confidence_weighting: bool,
    /// Derive the confidence sigma from the largest match distance
    /// (default: true). Otherwise `confidence_sigma` is used.
    pub use_maximal_distance_confidence_sigma: bool,
    /// Recompute feature matches on every evaluation (default: false).
    /// When false they are computed once at initialization.
    pub update_feature_matching_each_iteration: bool,
    /// Fixed confidence sigma (default: 1.0).
    pub confidence_sigma: f64,
    /// Confidence multiplier for shell boundary vertices (default: 0.5).
    pub boundary_confidence: f64,
    /// Target vertices considered per feature match (default: 8).
    pub feature_neighborhood_size: usize,
}

impl Default for ThinShellParams {
    fn default() -> Self {
        Self {
            stretch_weight: 1.0,
            bend_weight: 5.0,
            feature_weight: 10.0,
            use_confidence_weighting: true,
            use_maximal_distance_confidence_sigma: true,
            update_feature_matching_each_iteration: false,
            confidence_sigma: 1.0,
            boundary_confidence: 0.5,
            feature_neighborhood_size: 8,
        }
    }
}

impl ThinShellParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stretch weight.
    #[must_use]
    pub const fn with_stretch_weight(mut self, weight: f64) -> Self {
        self.stretch_weight = weight;
        self
    }

    /// Sets the bend weight.
    #[must_use]
    pub const fn with_bend_weight(mut self, weight: f64) -> Self {
        self.bend_weight = weight;
        self
    }

    /// Sets the feature weight.
    #[must_use]
    pub const fn with_feature_weight(mut self, weight: f64) -> Self {
        self.feature_weight = weight;
        self
    }

    /// Enables or disables confidence weighting.
    #[must_use]
    pub const fn with_confidence_weighting(mut self, enabled: bool) -> Self {
        self.use_confidence_weighting = enabled;
        self
    }

    /// Enables or disables the maximal-distance sigma.
    #[must_use]
    pub const fn with_maximal_distance_sigma(mut self, enabled: bool) -> Self {
        self.use_maximal_distance_confidence_sigma = enabled;
        self
    }

    /// Enables or disables per-evaluation feature matching.
    #[must_use]
    pub const fn with_feature_update_each_iteration(mut self, enabled: bool) -> Self {
        self.update_feature_matching_each_iteration = enabled;
        self
    }

    /// Sets the fixed confidence sigma.
    #[must_use]
    pub const fn with_confidence_sigma(mut self, sigma: f64) -> Self {
        self.confidence_sigma = sigma;
        self
    }

    /// Sets the boundary confidence multiplier.
    #[must_use]
    pub const fn with_boundary_confidence(mut self, confidence: f64) -> Self {
        self.boundary_confidence = confidence;
        self
    }

    /// Sets the feature neighborhood size.
    #[must_use]
    pub const fn with_feature_neighborhood_size(mut self, size: usize) -> Self {
        self.feature_neighborhood_size = size;
        self
    }

    /// Whether every term weight is zero.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_degenerate(&self) -> bool {
        self.stretch_weight == 0.0 && self.bend_weight == 0.0 && self.feature_weight == 0.0
    }

    /// Whether the feature term contributes.
    #[must_use]
    pub fn uses_features(&self) -> bool {
        self.feature_weight > 0.0
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> RegistrationResult<()> {
        check_non_negative("stretch_weight", self.stretch_weight)?;
        check_non_negative("bend_weight", self.bend_weight)?;
        check_non_negative("feature_weight", self.feature_weight)?;
        check_positive("confidence_sigma", self.confidence_sigma)?;
        if !(0.0..=1.0).contains(&self.boundary_confidence) {
            return Err(RegistrationError::invalid_parameter(format!(
                "boundary_confidence must be in [0, 1], got {}",
                self.boundary_confidence
            )));
        }
        if self.uses_features() {
            check_count("feature_neighborhood_size", self.feature_neighborhood_size)?;
        }
        Ok(())
    }
}

/// Line search along one conjugate direction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct LineSearchParams {
    /// Lower bracket, in learning-rate units (default: 0.0).
    pub lower_limit: f64,
    /// Upper bracket, in learning-rate units (default: 5.0).
    pub upper_limit: f64,
    /// Relative bracket width at which the search stops (default: 0.01).
    pub epsilon: f64,
    /// Maximum golden-section probes (default: 30).
    pub max_iterations: usize,
    /// Halvings tried when no probe improves (default: 8).
    pub max_backtracking_steps: usize,
}

impl Default for LineSearchParams {
    fn default() -> Self {
        Self {
            lower_limit: 0.0,
            upper_limit: 5.0,
            epsilon: 0.01,
            max_iterations: 30,
            max_backtracking_steps: 8,
        }
    }
}

impl LineSearchParams {
    /// Check every value.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> RegistrationResult<()> {
        check_non_negative("line_search.lower_limit", self.lower_limit)?;
        check_positive("line_search.upper_limit", self.upper_limit)?;
        if self.upper_limit <= self.lower_limit {
            return Err(RegistrationError::invalid_parameter(
                "line_search.upper_limit must exceed lower_limit",
            ));
        }
        check_positive("line_search.epsilon", self.epsilon)?;
        check_count("line_search.max_iterations", self.max_iterations)
    }
}

/// Conjugate-gradient optimizer parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct OptimizerParams {
    /// Iteration budget (default: 50).
    pub number_of_iterations: usize,
    /// Largest physical displacement of one unit step (default: 0.5).
    pub maximum_step_size_physical_units: f64,
    /// Stop when the windowed mean improvement falls to this (default: 0.0).
    pub minimum_convergence_value: f64,
    /// Improvements averaged by the convergence test (default: 10).
    pub convergence_window_size: usize,
    /// Re-estimate parameter scales every iteration (default: true).
    pub refresh_scales_each_iteration: bool,
    /// Line search settings.
    pub line_search: LineSearchParams,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            number_of_iterations: 50,
            maximum_step_size_physical_units: 0.5,
            minimum_convergence_value: 0.0,
            convergence_window_size: 10,
            refresh_scales_each_iteration: true,
            line_search: LineSearchParams::default(),
        }
    }
}

impl OptimizerParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the iteration budget.
    #[must_use]
    pub const fn with_number_of_iterations(mut self, iterations: usize) -> Self {
        self.number_of_iterations = iterations;
        self
    }

    /// Sets the maximum physical step size.
    #[must_use]
    pub const fn with_maximum_step_size(mut self, step: f64) -> Self {
        self.maximum_step_size_physical_units = step;
        self
    }

    /// Sets the minimum convergence value.
    #[must_use]
    pub const fn with_minimum_convergence_value(mut self, value: f64) -> Self {
        self.minimum_convergence_value = value;
        self
    }

    /// Sets the convergence window size.
    #[must_use]
    pub const fn with_convergence_window_size(mut self, size: usize) -> Self {
        self.convergence_window_size = size;
        self
    }

    /// Enables or disables per-iteration scale refresh.
    #[must_use]
    pub const fn with_refresh_scales(mut self, enabled: bool) -> Self {
        self.refresh_scales_each_iteration = enabled;
        self
    }

    /// Replaces the line search settings.
    #[must_use]
    pub const fn with_line_search(mut self, line_search: LineSearchParams) -> Self {
        self.line_search = line_search;
        self
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> RegistrationResult<()> {
        check_count("number_of_iterations", self.number_of_iterations)?;
        check_positive(
            "maximum_step_size_physical_units",
            self.maximum_step_size_physical_units,
        )?;
        check_non_negative("minimum_convergence_value", self.minimum_convergence_value)?;
        check_count("convergence_window_size", self.convergence_window_size)?;
        self.line_search.validate()
    }
}

/// Sample set used to estimate parameter scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalesSampling {
    /// The moving mesh vertices.
    #[default]
    ShellVertices,
    /// The virtual domain grid points.
    VirtualDomain,
}

/// Top-level registration parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RegistrationParams {
    /// Metric settings.
    pub metric: ThinShellParams,
    /// Optimizer settings.
    pub optimizer: OptimizerParams,
    /// Sample set for scale estimation (default: shell vertices).
    pub scales_sampling: ScalesSampling,
    /// Parameter perturbation used by the scales estimator (default: 0.01).
    pub small_parameter_variation: f64,
    /// Virtual domain samples along the bounding-box diagonal (default: 5).
    pub samples_along_diagonal: usize,
    /// Optimization levels run back to back (default: 1).
    pub number_of_levels: usize,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            metric: ThinShellParams::default(),
            optimizer: OptimizerParams::default(),
            scales_sampling: ScalesSampling::default(),
            small_parameter_variation: 0.01,
            samples_along_diagonal: 5,
            number_of_levels: 1,
        }
    }
}

impl RegistrationParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the metric settings.
    #[must_use]
    pub const fn with_metric(mut self, metric: ThinShellParams) -> Self {
        self.metric = metric;
        self
    }

    /// Replaces the optimizer settings.
    #[must_use]
    pub const fn with_optimizer(mut self, optimizer: OptimizerParams) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Sets the scale sampling strategy.
    #[must_use]
    pub const fn with_scales_sampling(mut self, sampling: ScalesSampling) -> Self {
        self.scales_sampling = sampling;
        self
    }

    /// Sets the virtual domain resolution.
    #[must_use]
    pub const fn with_samples_along_diagonal(mut self, samples: usize) -> Self {
        self.samples_along_diagonal = samples;
        self
    }

    /// Sets the number of levels.
    #[must_use]
    pub const fn with_number_of_levels(mut self, levels: usize) -> Self {
        self.number_of_levels = levels;
        self
    }

    /// Check every value, including nested settings.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] naming the first bad field.
    pub fn validate(&self) -> RegistrationResult<()> {
        self.metric.validate()?;
        self.optimizer.validate()?;
        check_positive("small_parameter_variation", self.small_parameter_variation)?;
        check_count("samples_along_diagonal", self.samples_along_diagonal)?;
        check_count("number_of_levels", self.number_of_levels)
    }
}
