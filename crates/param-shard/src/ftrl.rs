//! FTRL-proximal update rule
//!
//! Closed-form per-key update: everything the rule needs lives in the
//! `Entry` and the tuning constants, so the handle itself is stateless.

use runtime_core::{FtrlConfig, Key};

use crate::Entry;

/// Applies gradients to entries and answers pulls
#[derive(Debug, Clone, Copy, Default)]
pub struct FtrlHandle {
    config: FtrlConfig,
}

impl FtrlHandle {
    pub fn new(config: FtrlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FtrlConfig {
        &self.config
    }

    /// Fold one gradient observation into `entry`
    ///
    /// Callers must not run two pushes (or a push and a pull) on the same
    /// entry concurrently.
    #[inline]
    pub fn push(&self, _key: Key, gradient: f32, entry: &mut Entry) {
        let FtrlConfig {
            alpha,
            beta,
            lambda1,
            lambda2,
        } = self.config;

        let g = gradient;
        let sqrt_n = entry.sq_cum_grad;
        let sqrt_n_new = (sqrt_n * sqrt_n + g * g).sqrt();

        entry.z += g - (sqrt_n_new - sqrt_n) / alpha * entry.w;
        entry.sq_cum_grad = sqrt_n_new;

        if entry.z.abs() <= lambda1 {
            entry.w = 0.0;
        } else {
            let numerator = if entry.z >= 0.0 {
                entry.z - lambda1
            } else {
                entry.z + lambda1
            };
            let denominator = -((beta + entry.sq_cum_grad) / alpha + lambda2);
            entry.w = numerator / denominator;
        }
    }

    /// Weight served for `key`
    #[inline]
    pub fn pull(&self, _key: Key, entry: &Entry) -> f32 {
        entry.w
    }
}
