use nalgebra::Scalar;
use num_dual::DualNum;
use num_traits::Zero;

/// Attenuation weight for one mask value. Strength 0 ignores the mask,
/// strength 1 weights a zero-mask point down to nothing; in between,
/// low-confidence regions are damped rather than excluded.
#[inline]
pub fn mask_weight(mask: f64, strength: f64) -> f64 {
    1.0 + strength * (mask - 1.0)
}

/// Masked pointwise loss against a real-valued target. Generic over the AD
/// scalar so the same metric feeds both reporting and parameter gradients;
/// targets and masks are measured data and stay `f64`.
pub trait MaskedLoss {
    fn eval<T: DualNum<f64> + Scalar + Zero>(
        &self,
        pred: &[T],
        target: &[f64],
        mask: &[f64],
        strength: f64,
    ) -> T;
}

/// Mask-attenuated mean squared error.
pub struct Msae;

impl MaskedLoss for Msae {
    fn eval<T: DualNum<f64> + Scalar + Zero>(
        &self,
        pred: &[T],
        target: &[f64],
        mask: &[f64],
        strength: f64,
    ) -> T {
        debug_assert_eq!(pred.len(), target.len());
        debug_assert_eq!(pred.len(), mask.len());
        if pred.is_empty() {
            return T::zero();
        }
        let mut acc = T::zero();
        for ((p, t), m) in pred.iter().zip(target).zip(mask) {
            let err = p.clone() - *t;
            acc = acc + err.clone() * err * mask_weight(*m, strength);
        }
        acc * (1.0 / pred.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_strength_reduces_to_plain_mse() {
        let pred = [1.0, 2.0, 5.0];
        let target = [0.0, 0.0, 1.0];
        let mask = [0.0, 1.0, 0.3];
        let masked = Msae.eval(&pred, &target, &mask, 0.0);
        let plain = Msae.eval(&pred, &target, &[1.0; 3], 1.0);
        assert!((masked - plain).abs() < 1e-15);
        assert!((plain - (1.0 + 4.0 + 16.0) / 3.0).abs() < 1e-15);
    }

    #[test]
    fn full_strength_zero_mask_kills_the_contribution() {
        let pred = [100.0, -7.0];
        let target = [0.0, 0.0];
        let loss: f64 = Msae.eval(&pred, &target, &[0.0, 0.0], 1.0);
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn intermediate_strength_attenuates_monotonically() {
        let pred = [2.0];
        let target = [0.0];
        let mask = [0.0];
        let l0: f64 = Msae.eval(&pred, &target, &mask, 0.0);
        let l_half: f64 = Msae.eval(&pred, &target, &mask, 0.5);
        let l1: f64 = Msae.eval(&pred, &target, &mask, 1.0);
        assert!(l0 > l_half && l_half > l1);
        assert_eq!(l1, 0.0);
    }
}
