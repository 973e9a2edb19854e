//! Conjugate-gradient line-search optimizer.
//!
//! Minimizes a [`ThinShellMetric`] over its transform parameters. The
//! search runs in scaled coordinates `z_k = s_k * theta_k`, where the scales
//! `s_k` come from a [`ScalesEstimator`], so one unit of `z` moves sample
//! points by roughly the same distance for every parameter.
//!
//! Each call to [`ConjugateGradientOptimizer::step`] performs one iteration
//! and hands back an [`IterationReport`], which is how callers observe
//! progress. [`ConjugateGradientOptimizer::run`] steps to completion.

use std::collections::VecDeque;

use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::{
    OptimizerParams, ParametricTransform, RegistrationError, RegistrationResult, ScalesEstimator,
    ThinShellMetric,
};

/// `(sqrt(5) - 1) / 2`.
const GOLDEN_SECTION: f64 = 0.618_033_988_749_894_8;

/// Why an optimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    /// The iteration budget was used up.
    MaximumIterations,
    /// The windowed improvement fell to the threshold, or the gradient
    /// vanished.
    Converged,
    /// No step along the search direction lowered the value.
    LineSearchStalled,
}

/// State after one accepted iteration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterationReport {
    /// Iteration number, starting at 1.
    pub iteration: usize,
    /// Metric value at the new parameters.
    pub value: f64,
    /// The new parameters.
    pub parameters: DVector<f64>,
    /// Accepted step along the search direction, in learning-rate units.
    pub step_length: f64,
    /// Step multiplier that moves samples by the maximum physical step.
    pub learning_rate: f64,
    /// Windowed mean relative improvement, once the window is full.
    pub convergence_value: Option<f64>,
}

/// Result of [`ConjugateGradientOptimizer::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// An iteration was performed.
    Iterated(IterationReport),
    /// The optimization is over.
    Finished(StopReason),
}

/// Everything a completed optimization produced.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimizationSummary {
    /// One report per iteration, in order.
    pub reports: Vec<IterationReport>,
    /// Why it stopped.
    pub stop_reason: StopReason,
    /// Value at the starting parameters.
    pub initial_value: f64,
    /// Value at the final parameters.
    pub final_value: f64,
    /// Final parameters.
    pub parameters: DVector<f64>,
}

impl OptimizationSummary {
    /// Number of iterations performed.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.reports.len()
    }
}

/// Sliding window of relative value improvements.
///
/// ```
/// use mesh_registration::ConvergenceMonitor;
///
/// let mut monitor = ConvergenceMonitor::new(2, 10.0);
/// assert_eq!(monitor.push(5.0), None);
/// // Improvements 0.5 and 0.2
/// let mean = monitor.push(4.0).unwrap();
/// assert!((mean - 0.35).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    window: usize,
    improvements: VecDeque<f64>,
    last_value: f64,
}

impl ConvergenceMonitor {
    /// Monitor with room for `window` improvements, starting from `initial`.
    #[must_use]
    pub fn new(window: usize, initial: f64) -> Self {
        Self {
            window: window.max(1),
            improvements: VecDeque::with_capacity(window.max(1)),
            last_value: initial,
        }
    }

    /// Record a new value; returns the mean improvement once the window is
    /// full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let improvement = if self.last_value == 0.0 {
            0.0
        } else {
            (self.last_value - value) / self.last_value.abs()
        };
        self.last_value = value;

        if self.improvements.len() == self.window {
            self.improvements.pop_front();
        }
        self.improvements.push_back(improvement);

        #[allow(clippy::cast_precision_loss)]
        (self.improvements.len() == self.window)
            .then(|| self.improvements.iter().sum::<f64>() / self.window as f64)
    }
}

/// Conjugate-gradient optimizer driving a [`ThinShellMetric`].
#[derive(Debug)]
pub struct ConjugateGradientOptimizer<'a, 'm, T: ParametricTransform> {
    metric: &'a mut ThinShellMetric<'m, T>,
    estimator: ScalesEstimator,
    params: OptimizerParams,
    scales: DVector<f64>,
    parameters: DVector<f64>,
    value: f64,
    gradient: DVector<f64>,
    initial_value: f64,
    previous: Option<(DVector<f64>, DVector<f64>)>,
    iteration: usize,
    monitor: ConvergenceMonitor,
    finished: Option<StopReason>,
}

struct Probe {
    alpha: f64,
    value: f64,
}

impl<'a, 'm, T: ParametricTransform> ConjugateGradientOptimizer<'a, 'm, T> {
    /// Prepare an optimization starting from the metric's current transform.
    ///
    /// # Errors
    ///
    /// Invalid parameters, a metric that is not initialized, a failed first
    /// evaluation, or [`RegistrationError::NoValidParameters`] if the first
    /// value is not finite.
    pub fn new(
        metric: &'a mut ThinShellMetric<'m, T>,
        estimator: ScalesEstimator,
        params: OptimizerParams,
    ) -> RegistrationResult<Self> {
        params.validate()?;
        let parameters = metric.transform().parameters();
        let (value, gradient) = metric.value_and_derivative(&parameters)?;
        if !value.is_finite() {
            return Err(RegistrationError::NoValidParameters(format!(
                "initial metric value is {value}"
            )));
        }
        let scales = estimator.estimate_scales(metric.transform())?;
        let monitor = ConvergenceMonitor::new(params.convergence_window_size, value);

        debug!(value, scales = ?scales.as_slice(), "Starting optimization");

        Ok(Self {
            metric,
            estimator,
            params,
            scales,
            parameters,
            value,
            gradient,
            initial_value: value,
            previous: None,
            iteration: 0,
            monitor,
            finished: None,
        })
    }

    /// Current (best) parameters.
    #[must_use]
    pub const fn parameters(&self) -> &DVector<f64> {
        &self.parameters
    }

    /// Metric value at the current parameters.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Scales in use.
    #[must_use]
    pub const fn scales(&self) -> &DVector<f64> {
        &self.scales
    }

    /// Iterations performed so far.
    #[must_use]
    pub const fn iteration(&self) -> usize {
        self.iteration
    }

    /// Perform one iteration.
    ///
    /// Once [`StepOutcome::Finished`] is returned, every further call returns
    /// it again.
    ///
    /// # Errors
    ///
    /// Metric evaluation failures. The metric's transform is left at the last
    /// accepted parameters where possible.
    pub fn step(&mut self) -> RegistrationResult<StepOutcome> {
        if let Some(reason) = self.finished {
            return Ok(StepOutcome::Finished(reason));
        }
        if self.iteration >= self.params.number_of_iterations {
            return Ok(self.finish(StopReason::MaximumIterations));
        }

        if self.params.refresh_scales_each_iteration && self.iteration > 0 {
            self.scales = self.estimator.estimate_scales(self.metric.transform())?;
        }

        let scaled_gradient = self.gradient.component_div(&self.scales);
        if scaled_gradient.norm_squared() == 0.0 {
            debug!("Gradient vanished");
            return Ok(self.finish(StopReason::Converged));
        }
        let direction = self.search_direction(&scaled_gradient);
        let step = direction.component_div(&self.scales);

        let shift = self.estimator.estimate_step_shift(self.metric.transform(), &step)?;
        let learning_rate = if shift.is_finite() && shift > 0.0 {
            self.params.maximum_step_size_physical_units / shift
        } else {
            warn!(shift, "Degenerate step shift; using unit learning rate");
            1.0
        };

        let Some(probe) = self.line_search(&step, learning_rate)? else {
            warn!(
                iteration = self.iteration + 1,
                value = self.value,
                "Line search found no improving step"
            );
            self.metric.set_parameters(&self.parameters)?;
            return Ok(self.finish(StopReason::LineSearchStalled));
        };

        let parameters = &self.parameters + &step * probe.alpha;
        let (value, gradient) = self.metric.value_and_derivative(&parameters)?;
        self.parameters = parameters;
        self.value = value;
        self.gradient = gradient;
        self.previous = Some((scaled_gradient, direction));
        self.iteration += 1;

        let convergence_value = self.monitor.push(value);
        info!(iteration = self.iteration, value, "Optimizer iteration");

        if convergence_value.is_some_and(|c| c <= self.params.minimum_convergence_value) {
            self.finished = Some(StopReason::Converged);
        }

        Ok(StepOutcome::Iterated(IterationReport {
            iteration: self.iteration,
            value,
            parameters: self.parameters.clone(),
            step_length: probe.alpha / learning_rate,
            learning_rate,
            convergence_value,
        }))
    }

    /// Step until finished.
    ///
    /// # Errors
    ///
    /// See [`Self::step`].
    pub fn run(mut self) -> RegistrationResult<OptimizationSummary> {
        let mut reports = Vec::new();
        let stop_reason = loop {
            match self.step()? {
                StepOutcome::Iterated(report) => reports.push(report),
                StepOutcome::Finished(reason) => break reason,
            }
        };
        Ok(OptimizationSummary {
            reports,
            stop_reason,
            initial_value: self.initial_value,
            final_value: self.value,
            parameters: self.parameters,
        })
    }

    fn finish(&mut self, reason: StopReason) -> StepOutcome {
        debug!(?reason, iterations = self.iteration, value = self.value, "Optimization finished");
        self.finished = Some(reason);
        StepOutcome::Finished(reason)
    }

    /// Polak-Ribiere+ direction in scaled space, restarted when it is not a
    /// descent direction.
    fn search_direction(&self, scaled_gradient: &DVector<f64>) -> DVector<f64> {
        let steepest = -scaled_gradient;
        let Some((prev_gradient, prev_direction)) = &self.previous else {
            return steepest;
        };
        let denom = prev_gradient.norm_squared();
        if denom == 0.0 {
            return steepest;
        }
        let beta = (scaled_gradient.dot(&(scaled_gradient - prev_gradient)) / denom).max(0.0);
        let direction = &steepest + prev_direction * beta;
        if direction.dot(scaled_gradient) < 0.0 && direction.iter().all(|c| c.is_finite()) {
            direction
        } else {
            steepest
        }
    }

    fn probe(&mut self, step: &DVector<f64>, alpha: f64) -> RegistrationResult<Probe> {
        let value = self.metric.value(&(&self.parameters + step * alpha))?;
        Ok(Probe {
            alpha,
            value: if value.is_finite() { value } else { f64::INFINITY },
        })
    }

    /// Golden-section search on `[lower, upper] * learning_rate`, stopping
    /// once the bracket is narrower than `epsilon` relative to the probes,
    /// then backtracking from the smallest probe if nothing improved.
    fn line_search(
        &mut self,
        step: &DVector<f64>,
        learning_rate: f64,
    ) -> RegistrationResult<Option<Probe>> {
        let settings = self.params.line_search.clone();
        let mut a = settings.lower_limit * learning_rate;
        let mut b = settings.upper_limit * learning_rate;

        let mut x1 = b - GOLDEN_SECTION * (b - a);
        let mut x2 = a + GOLDEN_SECTION * (b - a);
        let mut p1 = self.probe(step, x1)?;
        let mut p2 = self.probe(step, x2)?;
        let mut best = if p2.value < p1.value { (x2, p2.value) } else { (x1, p1.value) };
        let mut smallest = x1;
        let mut probes = 2;

        while probes < settings.max_iterations
            && b - a > settings.epsilon * (x1.abs() + x2.abs())
        {
            if p1.value <= p2.value {
                b = x2;
                x2 = x1;
                p2 = p1;
                x1 = b - GOLDEN_SECTION * (b - a);
                p1 = self.probe(step, x1)?;
                smallest = smallest.min(x1);
                if p1.value < best.1 || (p1.value == best.1 && x1 < best.0) {
                    best = (x1, p1.value);
                }
            } else {
                a = x1;
                x1 = x2;
                p1 = p2;
                x2 = a + GOLDEN_SECTION * (b - a);
                p2 = self.probe(step, x2)?;
                if p2.value < best.1 {
                    best = (x2, p2.value);
                }
            }
            probes += 1;
        }

        if best.1 < self.value {
            return Ok(Some(Probe {
                alpha: best.0,
                value: best.1,
            }));
        }

        let mut alpha = smallest;
        for _ in 0..settings.max_backtracking_steps {
            alpha *= 0.5;
            if alpha <= 0.0 {
                break;
            }
            let probe = self.probe(step, alpha)?;
            if probe.value < self.value {
                return Ok(Some(probe));
            }
        }
        Ok(None)
    }
}
