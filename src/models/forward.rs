//! Forward operator: layered model -> predicted decay amplitudes.
//!
//! The kernel is sampled on depth cells; column `z` covers
//! `[depth[z], depth[z+1])` and the last cell repeats the previous spacing.
//! A layered model is mapped onto those cells by overlap fraction, which gives
//! one complex kernel value per (pulse moment, layer). The signal is then
//!
//! ```text
//! s(q, t) = Σ_i K_i(q) · wc_i · exp(-t / T2*_i)
//! ```
//!
//! and the observable amplitude is `|s(q, t)|`. The magnitude convention
//! matches amplitude-only soundings, where the phase of the measured signal is
//! not retained.

use nalgebra::DMatrix;

use crate::domain::{KernelModel, LayeredModel, Sounding, param_count};
use crate::error::InversionError;

/// Predicts the amplitude cube (Q x T) of a layered model.
#[derive(Debug, Clone)]
pub struct ForwardOperator<'a> {
    kernel: &'a KernelModel,
    times: &'a [f64],
    n_layers: usize,
    cell_edges: Vec<f64>,
}

impl<'a> ForwardOperator<'a> {
    pub fn new(kernel: &'a KernelModel, times: &'a [f64], n_layers: usize) -> Result<Self, InversionError> {
        if n_layers == 0 {
            return Err(InversionError::DimensionMismatch("model needs at least one layer".into()));
        }
        if times.is_empty() {
            return Err(InversionError::DimensionMismatch("no time gates to predict".into()));
        }
        Ok(Self {
            kernel,
            times,
            n_layers,
            cell_edges: cell_edges(kernel.depth()),
        })
    }

    /// Operator predicting on the time gates of `sounding`.
    ///
    /// Fails with `DimensionMismatch` if kernel and sounding disagree on the
    /// number of pulse moments.
    pub fn for_sounding(
        kernel: &'a KernelModel,
        sounding: &'a Sounding,
        n_layers: usize,
    ) -> Result<Self, InversionError> {
        if kernel.n_pulses() != sounding.n_pulses() {
            return Err(InversionError::DimensionMismatch(format!(
                "kernel has {} pulse moments but sounding has {}",
                kernel.n_pulses(),
                sounding.n_pulses()
            )));
        }
        Self::new(kernel, sounding.times(), n_layers)
    }

    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    pub fn times(&self) -> &[f64] {
        self.times
    }

    pub fn response(&self, model: &LayeredModel) -> Result<DMatrix<f64>, InversionError> {
        if model.n_layers() != self.n_layers {
            return Err(InversionError::DimensionMismatch(format!(
                "operator expects {} layers, model has {}",
                self.n_layers,
                model.n_layers()
            )));
        }
        Ok(self.evaluate(&model.thickness, &model.water_content, &model.relaxation_time))
    }

    /// Response of a flattened `(thickness, water content, T2*)` vector.
    pub fn response_params(&self, params: &[f64]) -> Result<DMatrix<f64>, InversionError> {
        let n = self.n_layers;
        if params.len() != param_count(n) {
            return Err(InversionError::DimensionMismatch(format!(
                "{n} layers need {} parameters, got {}",
                param_count(n),
                params.len()
            )));
        }
        let (thickness, rest) = params.split_at(n - 1);
        let (water_content, relaxation_time) = rest.split_at(n);
        Ok(self.evaluate(thickness, water_content, relaxation_time))
    }

    fn evaluate(&self, thickness: &[f64], water_content: &[f64], relaxation_time: &[f64]) -> DMatrix<f64> {
        let weights = overlap_weights(&self.cell_edges, thickness);
        let layer_re = self.kernel.real() * &weights;
        let layer_im = self.kernel.imag() * &weights;

        let decay = DMatrix::from_fn(self.n_layers, self.times.len(), |i, t| {
            water_content[i] * (-self.times[t] / relaxation_time[i]).exp()
        });

        let re = layer_re * &decay;
        let im = layer_im * &decay;
        re.zip_map(&im, |a, b| a.hypot(b))
    }
}

/// Cell boundaries for the kernel's depth samples (length `Z + 1`).
fn cell_edges(depth: &[f64]) -> Vec<f64> {
    let mut edges = depth.to_vec();
    let last = match depth {
        [.., a, b] => b + (b - a),
        [a] => a + 1.0,
        [] => return edges,
    };
    edges.push(last);
    edges
}

/// Fraction of each depth cell covered by each layer (Z x N).
///
/// The first layer extends upward without limit and the last one downward,
/// so every cell's weights sum to one.
pub fn overlap_weights(cell_edges: &[f64], thickness: &[f64]) -> DMatrix<f64> {
    let n_cells = cell_edges.len().saturating_sub(1);
    let n_layers = thickness.len() + 1;

    let mut interfaces = Vec::with_capacity(n_layers + 1);
    interfaces.push(f64::NEG_INFINITY);
    let mut z = 0.0;
    for &h in thickness {
        z += h.max(0.0);
        interfaces.push(z);
    }
    interfaces.push(f64::INFINITY);

    DMatrix::from_fn(n_cells, n_layers, |c, i| {
        let (a, b) = (cell_edges[c], cell_edges[c + 1]);
        let (top, bottom) = (interfaces[i], interfaces[i + 1]);
        let overlap = (b.min(bottom) - a.max(top)).max(0.0);
        overlap / (b - a)
    })
}

/// Convenience wrapper: forward-model `model` on the given time gates.
pub fn forward_response(
    model: &LayeredModel,
    kernel: &KernelModel,
    times: &[f64],
) -> Result<DMatrix<f64>, InversionError> {
    ForwardOperator::new(kernel, times, model.n_layers())?.response(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_kernel() -> KernelModel {
        let real = DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]);
        let imag = DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 0.0]);
        KernelModel::new(real, imag, vec![0.0, 1.0, 2.0]).unwrap()
    }

    #[test]
    fn single_layer_is_mono_exponential() {
        let kernel = flat_kernel();
        let times = [0.01, 0.1, 0.5];
        let model = LayeredModel::new(vec![], vec![0.25], vec![0.2]).unwrap();
        let d = forward_response(&model, &kernel, &times).unwrap();
        for (k, &t) in times.iter().enumerate() {
            let expected = 3.0 * 0.25 * (-t / 0.2_f64).exp();
            assert!((d[(0, k)] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn layer_boundary_splits_cells_by_overlap() {
        let edges = cell_edges(&[0.0, 1.0, 2.0]);
        assert_eq!(edges, vec![0.0, 1.0, 2.0, 3.0]);
        let w = overlap_weights(&edges, &[1.5]);
        assert_eq!(w.shape(), (3, 2));
        assert!((w[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((w[(1, 0)] - 0.5).abs() < 1e-12);
        assert!((w[(1, 1)] - 0.5).abs() < 1e-12);
        assert!((w[(2, 1)] - 1.0).abs() < 1e-12);
        for c in 0..3 {
            assert!((w.row(c).sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn amplitude_is_magnitude_of_complex_signal() {
        let real = DMatrix::from_row_slice(1, 1, &[3.0]);
        let imag = DMatrix::from_row_slice(1, 1, &[4.0]);
        let kernel = KernelModel::new(real, imag, vec![0.0]).unwrap();
        let model = LayeredModel::new(vec![], vec![1.0], vec![1.0]).unwrap();
        let d = forward_response(&model, &kernel, &[1e-9]).unwrap();
        assert!((d[(0, 0)] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn two_layers_sum_their_decays() {
        let kernel = flat_kernel();
        let times = [0.05];
        let model = LayeredModel::new(vec![1.0], vec![0.3, 0.1], vec![0.25, 0.05]).unwrap();
        let d = forward_response(&model, &kernel, &times).unwrap();
        let expected = 1.0 * 0.3 * (-0.05_f64 / 0.25).exp() + 2.0 * 0.1 * (-0.05_f64 / 0.05).exp();
        assert!((d[(0, 0)] - expected).abs() < 1e-12);
    }

    #[test]
    fn wrong_parameter_count_is_a_dimension_mismatch() {
        let kernel = flat_kernel();
        let times = [0.01];
        let op = ForwardOperator::new(&kernel, &times, 2).unwrap();
        let err = op.response_params(&[1.0, 0.2, 0.2]).unwrap_err();
        assert!(matches!(err, InversionError::DimensionMismatch(_)));

        let model = LayeredModel::new(vec![], vec![0.2], vec![0.1]).unwrap();
        assert!(matches!(op.response(&model), Err(InversionError::DimensionMismatch(_))));
    }

    #[test]
    fn response_is_deterministic() {
        let kernel = flat_kernel();
        let times = [0.01, 0.02];
        let op = ForwardOperator::new(&kernel, &times, 2).unwrap();
        let p = [1.2, 0.3, 0.1, 0.2, 0.05];
        assert_eq!(op.response_params(&p).unwrap(), op.response_params(&p).unwrap());
    }
}
