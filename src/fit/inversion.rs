//! Regularized Marquardt inversion of a single sounding.
//!
//! The solver works on the unconstrained vector `u` (see
//! [`crate::math::transform`]) so every trial model is inside the bounds by
//! construction. One outer iteration:
//!
//! 1. weighted residual `r = (d - f(x)) / err` and `chi2 = mean(r²)`
//! 2. Jacobian `J` of `f / err` w.r.t. `u`
//! 3. solve `(JᵀJ + μ (CᵀC + I)) Δu = Jᵀr − λ CᵀC u`, starting with `μ = λ`
//! 4. accept `u + Δu` if chi2 decreases, otherwise raise `μ` and retry
//!
//! After an accepted step `λ` is multiplied by `lambda_factor`, down to the
//! floor `lambda0 · lambda_min_ratio`. Raising `μ` only lasts for the current
//! iteration. The stop rules (chi2 target, small relative improvement) are
//! checked once a step has been taken at the floor, so the final strength is
//! proportional to `lambda0`.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::domain::{
    InversionConfig, InversionResult, InversionStatus, IterationRecord, KernelModel, LayeredModel, Sounding,
};
use crate::error::InversionError;
use crate::fit::jacobian::{weighted, weighted_jacobian};
use crate::fit::uncertainty::estimate;
use crate::fit::Regularization;
use crate::math::{ParameterTransform, normal_matrix, solve_symmetric};
use crate::models::ForwardOperator;

/// One configured inversion run over a kernel and a sounding.
///
/// All run state (current model, lambda, history) is local to [`run`], so a
/// single instance can be run repeatedly and instances share nothing.
///
/// [`run`]: RegularizedInversion::run
#[derive(Debug)]
pub struct RegularizedInversion<'a> {
    forward: ForwardOperator<'a>,
    sounding: &'a Sounding,
    config: InversionConfig,
    transform: ParameterTransform,
    regularization: Regularization,
    data: DVector<f64>,
}

/// Model state at one point of the iteration.
struct Point {
    u: DVector<f64>,
    x: Vec<f64>,
    f: DVector<f64>,
    chi_square: f64,
}

impl<'a> RegularizedInversion<'a> {
    /// Validate the configuration and the kernel/sounding shapes.
    pub fn new(
        kernel: &'a KernelModel,
        sounding: &'a Sounding,
        config: &InversionConfig,
    ) -> Result<Self, InversionError> {
        config.validate()?;
        let forward = ForwardOperator::for_sounding(kernel, sounding, config.n_layers)?;
        let transform = ParameterTransform::from_spec(&config.bounds, config.n_layers)?;
        let regularization = Regularization::new(config.n_layers);
        let data = weighted(sounding.amplitude(), sounding.error());

        Ok(Self {
            forward,
            sounding,
            config: config.clone(),
            transform,
            regularization,
            data,
        })
    }

    pub fn config(&self) -> &InversionConfig {
        &self.config
    }

    pub fn transform(&self) -> &ParameterTransform {
        &self.transform
    }

    pub fn regularization(&self) -> &Regularization {
        &self.regularization
    }

    pub fn run(&self) -> Result<InversionResult, InversionError> {
        let cfg = &self.config;
        let start = cfg.start.params(cfg.n_layers)?;
        let u0 = DVector::from_vec(self.transform.to_unconstrained(&start));
        let mut point = self.evaluate(u0)?;
        if !point.chi_square.is_finite() {
            return Err(InversionError::NumericalDivergence {
                iteration: 0,
                chi_square: point.chi_square,
                last_params: Some(point.x),
            });
        }
        debug!(chi_square = point.chi_square, "start model");

        let mut lambda = cfg.lambda0;
        let floor = cfg.lambda_floor();
        let mut iterations = 0;
        let mut history = Vec::new();
        let mut status = if point.chi_square < cfg.chi_square_target {
            InversionStatus::Converged
        } else {
            InversionStatus::MaxIterReached
        };

        if status == InversionStatus::MaxIterReached {
            for iteration in 1..=cfg.max_iter {
                let Some((next, retries)) = self.step(&point, lambda, iteration)? else {
                    warn!(iteration, chi_square = point.chi_square, "no damped step reduces chi-square; stopping");
                    status = InversionStatus::Converged;
                    break;
                };

                let improvement = (point.chi_square - next.chi_square) / point.chi_square;
                point = next;
                let decayed = (lambda * cfg.lambda_factor).max(floor);
                let settled = decayed >= lambda;
                lambda = decayed;
                iterations = iteration;
                history.push(IterationRecord {
                    iteration,
                    chi_square: point.chi_square,
                    lambda,
                    retries,
                    params: point.x.clone(),
                });
                debug!(iteration, chi_square = point.chi_square, lambda, retries, "accepted step");

                if settled
                    && (point.chi_square < cfg.chi_square_target || improvement < cfg.min_relative_improvement)
                {
                    status = InversionStatus::Converged;
                    break;
                }
            }
        }

        let model = LayeredModel::from_params(cfg.n_layers, &point.x)?;
        let response = self.forward.response(&model)?;
        let mut result = InversionResult {
            model,
            chi_square: point.chi_square,
            iterations,
            status,
            lambda,
            history,
            response,
            uncertainty: None,
        };

        if cfg.uncertainty {
            let jacobian = self.jacobian(&point)?;
            result.uncertainty = Some(estimate(&result, &jacobian, &self.regularization, &self.transform)?);
        }

        info!(
            status = ?result.status,
            iterations = result.iterations,
            chi_square = result.chi_square,
            lambda = result.lambda,
            "inversion finished"
        );
        Ok(result)
    }

    /// One outer iteration. `None` means no damping level improved chi2.
    fn step(
        &self,
        point: &Point,
        lambda: f64,
        iteration: usize,
    ) -> Result<Option<(Point, usize)>, InversionError> {
        let cfg = &self.config;
        let jacobian = self.jacobian(point)?;
        let residual = &self.data - &point.f;
        let jtj = normal_matrix(&jacobian);
        let rhs = jacobian.tr_mul(&residual) - self.regularization.gram() * &point.u * lambda;
        let n = point.u.len();
        let damping_base = self.regularization.gram() + DMatrix::<f64>::identity(n, n);

        let mut damping = lambda;
        let mut solved_any = false;
        for retry in 0..=cfg.max_damping_retries {
            let system = &jtj + &damping_base * damping;
            let Some(du) = solve_symmetric(&system, &rhs) else {
                warn!(iteration, retry, damping, "damped system is singular; raising damping");
                damping *= cfg.lambda_increase;
                continue;
            };
            solved_any = true;

            let trial = self.evaluate(&point.u + du)?;
            if !trial.chi_square.is_finite() {
                return Err(InversionError::NumericalDivergence {
                    iteration,
                    chi_square: trial.chi_square,
                    last_params: Some(point.x.clone()),
                });
            }
            if trial.chi_square < point.chi_square {
                return Ok(Some((trial, retry)));
            }
            damping *= cfg.lambda_increase;
        }

        if solved_any {
            Ok(None)
        } else {
            Err(InversionError::SingularSystem {
                iteration,
                message: format!(
                    "damped normal equations unsolvable after {} attempts",
                    cfg.max_damping_retries + 1
                ),
                last_params: Some(point.x.clone()),
            })
        }
    }

    fn evaluate(&self, u: DVector<f64>) -> Result<Point, InversionError> {
        let x = self.transform.to_physical(u.as_slice());
        let f = weighted(&self.forward.response_params(&x)?, self.sounding.error());
        let chi_square = (&self.data - &f).norm_squared() / f.len() as f64;
        Ok(Point { u, x, f, chi_square })
    }

    fn jacobian(&self, point: &Point) -> Result<DMatrix<f64>, InversionError> {
        weighted_jacobian(
            &self.forward,
            &self.transform,
            self.sounding.error(),
            &point.x,
            &point.f,
            self.config.jacobian_step,
        )
    }
}

/// Invert one sounding.
pub fn invert(
    kernel: &KernelModel,
    sounding: &Sounding,
    config: &InversionConfig,
) -> Result<InversionResult, InversionError> {
    RegularizedInversion::new(kernel, sounding, config)?.run()
}

/// Invert several soundings against one kernel in parallel.
///
/// Runs are independent; results keep the input order.
pub fn invert_batch(
    kernel: &KernelModel,
    soundings: &[Sounding],
    config: &InversionConfig,
) -> Vec<Result<InversionResult, InversionError>> {
    soundings
        .par_iter()
        .map(|sounding| invert(kernel, sounding, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NoiseModel, gaussian_kernel, linear_gates, simulate};
    use crate::domain::{DEFAULT_NOISE_FLOOR, ClassTriple, StartModel};

    fn scenario_times() -> Vec<f64> {
        linear_gates(20, 0.005, 0.01)
    }

    fn scenario_model() -> LayeredModel {
        LayeredModel::new(vec![5.0], vec![0.30, 0.10], vec![0.25, 0.05]).unwrap()
    }

    /// Noiseless sounding with a constant error of 1% of the peak amplitude.
    fn noiseless(kernel: &KernelModel, times: &[f64], model: &LayeredModel) -> Sounding {
        let forward = ForwardOperator::new(kernel, times, model.n_layers()).unwrap();
        let clean = forward.response(model).unwrap();
        let error = DMatrix::from_element(clean.nrows(), clean.ncols(), 0.01 * clean.max());
        Sounding::new(times.to_vec(), clean, error, DEFAULT_NOISE_FLOOR).unwrap()
    }

    /// 2-layer scenario with additive noise of 2% of the peak amplitude.
    fn noisy_scenario(kernel: &KernelModel, times: &[f64], seed: u64) -> Sounding {
        let model = scenario_model();
        let forward = ForwardOperator::new(kernel, times, 2).unwrap();
        let peak = forward.response(&model).unwrap().max();
        simulate(&forward, &model, NoiseModel::absolute(0.02 * peak), seed, DEFAULT_NOISE_FLOOR).unwrap()
    }

    fn exact_config(n_layers: usize) -> InversionConfig {
        InversionConfig {
            chi_square_target: 1e-6,
            max_iter: 50,
            ..InversionConfig::with_layers(n_layers)
        }
    }

    fn assert_recovers(result: &InversionResult, truth: &LayeredModel, tol: f64) {
        for (got, want) in result.params().iter().zip(truth.to_params()) {
            assert!(((got - want) / want).abs() < tol, "got {got}, want {want}");
        }
    }

    #[test]
    fn recovers_noiseless_single_layer() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let truth = LayeredModel::new(vec![], vec![0.25], vec![0.15]).unwrap();
        let sounding = noiseless(&kernel, &times, &truth);

        let result = invert(&kernel, &sounding, &exact_config(1)).unwrap();
        assert!(result.chi_square < 1e-3);
        assert_recovers(&result, &truth, 1e-2);
    }

    #[test]
    fn recovers_noiseless_two_layers() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let truth = scenario_model();
        let sounding = noiseless(&kernel, &times, &truth);

        let result = invert(&kernel, &sounding, &exact_config(2)).unwrap();
        assert!(result.converged());
        assert!(result.chi_square < 1e-3);
        assert_recovers(&result, &truth, 1e-2);
    }

    #[test]
    fn recovers_noiseless_three_layers() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let truth =
            LayeredModel::from_params(3, &[4.0, 8.0, 0.10, 0.35, 0.20, 0.10, 0.30, 0.15]).unwrap();
        let sounding = noiseless(&kernel, &times, &truth);

        let result = invert(&kernel, &sounding, &exact_config(3)).unwrap();
        assert!(result.chi_square < 1e-3);
        assert_recovers(&result, &truth, 1e-2);
        assert_eq!(result.history.len(), result.iterations);
    }

    #[test]
    fn two_layer_scenario_fits_to_noise_level() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let truth = scenario_model();

        for seed in [1, 2, 3] {
            let sounding = noisy_scenario(&kernel, &times, seed);
            let result = invert(&kernel, &sounding, &InversionConfig::with_layers(2)).unwrap();
            assert!(
                (0.5..=2.0).contains(&result.chi_square),
                "seed {seed}: chi2 {}",
                result.chi_square
            );
            for i in 0..2 {
                let wc = result.model.water_content[i];
                let t2 = result.model.relaxation_time[i];
                assert!((wc - truth.water_content[i]).abs() / truth.water_content[i] < 0.15);
                assert!((t2 - truth.relaxation_time[i]).abs() / truth.relaxation_time[i] < 0.15);
            }
        }
    }

    #[test]
    fn every_iterate_respects_bounds() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let sounding = noisy_scenario(&kernel, &times, 11);

        let mut config = InversionConfig::with_layers(2);
        // True top-layer water content (0.30) lies above the upper bound.
        config.bounds.upper = ClassTriple::new(20.0, 0.25, 0.5);
        config.start = StartModel::Homogeneous(ClassTriple::new(20.0, 0.25, 0.02));
        let run = RegularizedInversion::new(&kernel, &sounding, &config).unwrap();
        let result = run.run().unwrap();

        assert!(!result.history.is_empty());
        for record in &result.history {
            assert!(run.transform().contains(&record.params), "{:?}", record.params);
        }
        assert!(run.transform().contains(&result.params()));
    }

    #[test]
    fn stronger_regularization_is_smoother_and_fits_worse() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();

        for seed in [1, 2, 3] {
            let sounding = noisy_scenario(&kernel, &times, seed);
            let mut outcomes = Vec::new();
            for lambda0 in [1e2, 1e3, 1e4, 1e5] {
                let config = InversionConfig {
                    lambda0,
                    ..InversionConfig::with_layers(2)
                };
                let run = RegularizedInversion::new(&kernel, &sounding, &config).unwrap();
                let result = run.run().unwrap();
                let u = DVector::from_vec(run.transform().to_unconstrained(&result.params()));
                outcomes.push((result.chi_square, run.regularization().roughness(&u)));
            }

            for pair in outcomes.windows(2) {
                let ((chi_a, rough_a), (chi_b, rough_b)) = (pair[0], pair[1]);
                assert!(chi_b >= chi_a, "seed {seed}: {outcomes:?}");
                assert!(rough_b <= rough_a, "seed {seed}: {outcomes:?}");
            }
        }
    }

    #[test]
    fn lambda_decays_to_its_floor_before_stopping() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let sounding = noisy_scenario(&kernel, &times, 4);
        let config = InversionConfig::with_layers(2);

        let result = invert(&kernel, &sounding, &config).unwrap();
        assert!(result.converged());
        let floor = config.lambda_floor();
        assert!(result.history.iter().all(|r| r.lambda >= floor));
        for pair in result.history.windows(2) {
            assert!(pair[1].lambda <= pair[0].lambda);
        }
        assert!(result.lambda >= floor && result.lambda < config.lambda0);
    }

    #[test]
    fn overflowing_weighted_data_diverges_at_start() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let amplitude = DMatrix::from_element(10, 20, 1e200);
        let error = DMatrix::from_element(10, 20, 1e-200);
        let sounding = Sounding::new(scenario_times(), amplitude, error, DEFAULT_NOISE_FLOOR).unwrap();
        let config = InversionConfig::with_layers(2);

        match invert(&kernel, &sounding, &config) {
            Err(InversionError::NumericalDivergence {
                iteration,
                chi_square,
                last_params: Some(params),
            }) => {
                assert_eq!(iteration, 0);
                assert!(!chi_square.is_finite());
                let start = config.start.params(2).unwrap();
                assert_eq!(params.len(), start.len());
                for (a, b) in params.iter().zip(&start) {
                    assert!((a - b).abs() < 1e-6, "{params:?}");
                }
            }
            other => panic!("expected divergence at the start model, got {other:?}"),
        }
    }

    #[test]
    fn covariance_is_valid_at_final_model() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let sounding = noisy_scenario(&kernel, &times, 3);
        let config = InversionConfig {
            uncertainty: true,
            ..InversionConfig::with_layers(2)
        };

        let result = invert(&kernel, &sounding, &config).unwrap();
        let Some(u) = result.uncertainty.as_ref() else {
            panic!("uncertainty requested but missing");
        };
        let n = result.params().len();
        assert_eq!(u.covariance.matrix.shape(), (n, n));
        assert!(u.covariance.variances.iter().all(|v| *v >= 0.0));
        for i in 0..n {
            assert_eq!(u.covariance.scaled[(i, i)], 1.0);
            for j in 0..n {
                let c = u.covariance.scaled[(i, j)];
                assert!((-1.0..=1.0).contains(&c));
            }
        }
        for (i, x) in result.params().iter().enumerate() {
            assert!(u.bounds.lower[i] <= *x && *x <= u.bounds.upper[i]);
        }
        let rows = result.layer_rows();
        assert!(rows.iter().all(|r| r.bounds.is_some()));
    }

    #[test]
    fn pulse_moment_mismatch_fails_before_iterating() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let amplitude = DMatrix::from_element(12, 20, 1.0);
        let error = DMatrix::from_element(12, 20, 0.1);
        let sounding = Sounding::new(scenario_times(), amplitude, error, DEFAULT_NOISE_FLOOR).unwrap();

        let err = invert(&kernel, &sounding, &InversionConfig::default()).unwrap_err();
        assert!(matches!(err, InversionError::DimensionMismatch(_)));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let sounding = noisy_scenario(&kernel, &times, 1);

        let config = InversionConfig {
            start: StartModel::Explicit(vec![1.0, 0.2]),
            ..InversionConfig::with_layers(2)
        };
        let err = invert(&kernel, &sounding, &config).unwrap_err();
        assert!(matches!(err, InversionError::InvalidConfiguration(_)));

        let config = InversionConfig {
            lambda0: -1.0,
            ..InversionConfig::with_layers(2)
        };
        assert!(matches!(
            invert(&kernel, &sounding, &config),
            Err(InversionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_iterations_returns_start_model() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let sounding = noisy_scenario(&kernel, &times, 1);
        let config = InversionConfig {
            max_iter: 0,
            ..InversionConfig::with_layers(2)
        };

        let result = invert(&kernel, &sounding, &config).unwrap();
        assert_eq!(result.status, InversionStatus::MaxIterReached);
        assert_eq!(result.iterations, 0);
        let start = config.start.params(2).unwrap();
        for (a, b) in result.params().iter().zip(&start) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn batch_matches_individual_runs() {
        let kernel = gaussian_kernel(10, 50, 1.0).unwrap();
        let times = scenario_times();
        let soundings: Vec<Sounding> = (1..=3).map(|seed| noisy_scenario(&kernel, &times, seed)).collect();
        let config = InversionConfig::with_layers(2);

        let batch = invert_batch(&kernel, &soundings, &config);
        assert_eq!(batch.len(), 3);
        for (sounding, res) in soundings.iter().zip(batch) {
            let single = invert(&kernel, sounding, &config).unwrap();
            let res = res.unwrap();
            assert_eq!(res.params(), single.params());
            assert_eq!(res.chi_square, single.chi_square);
        }
    }
}
