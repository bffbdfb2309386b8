use nalgebra::{DVector, Scalar};
use num_dual::DualNum;
use num_traits::Zero;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{FieldNet, TrainableFieldNet};

/// Fully connected tanh network with a linear output layer.
///
/// Parameters are stored flat, layer by layer, weights (row major, one row
/// per output unit) before biases, which is also the order `eval_params`
/// consumes them in.
#[derive(Debug, Clone)]
pub struct TanhMlp {
    sizes: Vec<usize>,
    params: DVector<f64>,
}

fn flat_len(sizes: &[usize]) -> usize {
    sizes
        .windows(2)
        .map(|w| w[0] * w[1] + w[1])
        .sum()
}

impl TanhMlp {
    /// Builds a seeded network with Xavier-uniform weights and zero biases.
    pub fn new(sizes: &[usize], seed: u64) -> Self {
        assert!(sizes.len() >= 2, "an MLP needs input and output layers");
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = Vec::with_capacity(flat_len(sizes));
        for w in sizes.windows(2) {
            let (n_in, n_out) = (w[0], w[1]);
            let bound = (6.0 / (n_in + n_out) as f64).sqrt();
            for _ in 0..n_in * n_out {
                params.push(rng.gen_range(-bound..bound));
            }
            params.extend(std::iter::repeat(0.0).take(n_out));
        }
        Self {
            sizes: sizes.to_vec(),
            params: DVector::from_vec(params),
        }
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn forward<T: DualNum<f64> + Scalar + Zero>(
        &self,
        param: &dyn Fn(usize) -> T,
        x: &DVector<T>,
    ) -> DVector<T> {
        let n_layers = self.sizes.len() - 1;
        let mut h: Vec<T> = x.iter().cloned().collect();
        let mut offset = 0;
        for layer in 0..n_layers {
            let (n_in, n_out) = (self.sizes[layer], self.sizes[layer + 1]);
            let bias_offset = offset + n_in * n_out;
            let mut next = Vec::with_capacity(n_out);
            for j in 0..n_out {
                let mut acc = param(bias_offset + j);
                let row = offset + j * n_in;
                for (i, h_i) in h.iter().enumerate() {
                    acc = acc + param(row + i) * h_i.clone();
                }
                next.push(if layer + 1 == n_layers { acc } else { acc.tanh() });
            }
            h = next;
            offset = bias_offset + n_out;
        }
        DVector::from_vec(h)
    }
}

impl FieldNet for TanhMlp {
    fn input_dim(&self) -> usize {
        self.sizes[0]
    }

    fn output_dim(&self) -> usize {
        *self.sizes.last().expect("layer list is non-empty")
    }

    fn eval<T: DualNum<f64> + Scalar + Zero>(&self, x: &DVector<T>) -> DVector<T> {
        self.forward(&|i| T::from(self.params[i]), x)
    }
}

impl TrainableFieldNet for TanhMlp {
    fn param_count(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn set_params(&mut self, params: &DVector<f64>) {
        assert_eq!(
            params.len(),
            self.params.len(),
            "parameter vector length changed"
        );
        self.params.copy_from(params);
    }

    fn eval_params<T: DualNum<f64> + Scalar + Zero>(
        &self,
        params: &DVector<T>,
        x: &DVector<T>,
    ) -> DVector<T> {
        self.forward(&|i| params[i].clone(), x)
    }
}

/// Independent displacement and modulus subnets over the same input,
/// with outputs concatenated (displacement channels first).
///
/// Keeping the parameter sets disjoint is what makes the modulus-only
/// gradient mode observable: freezing the displacement estimate zeroes the
/// PDE-loss gradient for exactly the first `disp.param_count()` parameters.
#[derive(Debug, Clone)]
pub struct SplitFieldNet {
    pub disp: TanhMlp,
    pub modulus: TanhMlp,
}

impl SplitFieldNet {
    pub fn new(disp: TanhMlp, modulus: TanhMlp) -> Self {
        assert_eq!(
            disp.input_dim(),
            modulus.input_dim(),
            "subnets must share the input layout"
        );
        Self { disp, modulus }
    }

    pub fn disp_param_count(&self) -> usize {
        self.disp.param_count()
    }
}

impl FieldNet for SplitFieldNet {
    fn input_dim(&self) -> usize {
        self.disp.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.disp.output_dim() + self.modulus.output_dim()
    }

    fn eval<T: DualNum<f64> + Scalar + Zero>(&self, x: &DVector<T>) -> DVector<T> {
        let u = self.disp.eval(x);
        let aux = self.modulus.eval(x);
        DVector::from_iterator(
            u.len() + aux.len(),
            u.iter().cloned().chain(aux.iter().cloned()),
        )
    }
}

impl TrainableFieldNet for SplitFieldNet {
    fn param_count(&self) -> usize {
        self.disp.param_count() + self.modulus.param_count()
    }

    fn params(&self) -> DVector<f64> {
        let mut out = self.disp.params().as_slice().to_vec();
        out.extend_from_slice(self.modulus.params().as_slice());
        DVector::from_vec(out)
    }

    fn set_params(&mut self, params: &DVector<f64>) {
        let split = self.disp.param_count();
        assert_eq!(params.len(), self.param_count());
        self.disp.set_params(&params.rows(0, split).into_owned());
        self.modulus
            .set_params(&params.rows(split, self.modulus.param_count()).into_owned());
    }

    fn eval_params<T: DualNum<f64> + Scalar + Zero>(
        &self,
        params: &DVector<T>,
        x: &DVector<T>,
    ) -> DVector<T> {
        let split = self.disp.param_count();
        let u = self
            .disp
            .eval_params(&params.rows(0, split).into_owned(), x);
        let aux = self.modulus.eval_params(
            &params.rows(split, self.modulus.param_count()).into_owned(),
            x,
        );
        DVector::from_iterator(
            u.len() + aux.len(),
            u.iter().cloned().chain(aux.iter().cloned()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_roundtrip_preserves_forward_pass() {
        let mut net = TanhMlp::new(&[3, 8, 2], 11);
        let x = DVector::from_vec(vec![0.2, -0.4, 1.1]);
        let before = net.eval(&x);
        let theta = net.params();
        net.set_params(&theta);
        let after = net.eval(&x);
        assert_eq!(before, after);
    }

    #[test]
    fn eval_params_matches_eval_on_stored_parameters() {
        let net = TanhMlp::new(&[2, 4, 4, 1], 3);
        let x = DVector::from_vec(vec![0.5, -0.25]);
        let via_stored = net.eval(&x);
        let via_params = net.eval_params(&net.params(), &x);
        assert_eq!(via_stored, via_params);
    }

    #[test]
    fn split_net_concatenates_displacement_then_modulus() {
        let net = SplitFieldNet::new(TanhMlp::new(&[3, 6, 1], 5), TanhMlp::new(&[3, 6, 1], 9));
        let x = DVector::from_vec(vec![1.0, 0.0, -1.0]);
        let out = net.eval(&x);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], net.disp.eval(&x)[0]);
        assert_eq!(out[1], net.modulus.eval(&x)[0]);
    }

    #[test]
    fn seeded_construction_is_deterministic() {
        let a = TanhMlp::new(&[4, 16, 2], 42);
        let b = TanhMlp::new(&[4, 16, 2], 42);
        assert_eq!(a.params(), b.params());
    }
}
