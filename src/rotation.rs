//! Reference gate set: one qubit, one rotation per block.
//!
//! Each block is a rotation by `θ` about an equatorial axis at angle `φ`:
//!
//! ```text
//!   R(θ, φ) = cos(θ/2)·I − i·sin(θ/2)·(cos φ·X + sin φ·Y)
//!
//!           = ⎡ cos(θ/2)             −i·sin(θ/2)·e^{−iφ} ⎤
//!             ⎣ −i·sin(θ/2)·e^{iφ}    cos(θ/2)           ⎦
//! ```
//!
//! Options read from [`GateSetConfig::extra`]:
//!
//! | Key | Type | Default | Meaning |
//! |-----|------|---------|---------|
//! | `theta_scale` | number > 0 | `π/2` | Std-dev of the normal draw for `θ` |
//! | `seed` | integer | none | Seed for reproducible draws |
//! | `freeze_phases` | bool | `false` | Mask every `φ` entry |
//!
//! `φ` is drawn uniformly from `[−π, π)`.
//!
//! With `seed` set, the `k`-th call to `create_initial_parameters` on an
//! instance draws from a generator keyed on the pair `(seed, k)`, so no two
//! seeds share a draw. The call index lives in the instance and starts at
//! zero: `reconfigure` rebuilds the instance, so its next draw repeats the
//! first draw of the original.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{Array2, Array4, Zip};
use num_complex::Complex64;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::config::GateSetConfig;
use crate::error::{GateSetError, GateSetResult};
use crate::gate_set::GateSet;
use crate::operators::{BlockOperatorBatch, ParameterDerivatives};
use crate::params::{OptimizationMask, ParameterSet};

/// Name of the rotation-angle parameter.
pub const THETA: &str = "theta";
/// Name of the rotation-axis parameter.
pub const PHI: &str = "phi";

const THETA_SCALE_KEY: &str = "theta_scale";
const SEED_KEY: &str = "seed";
const FREEZE_PHASES_KEY: &str = "freeze_phases";

/// 2×2 operator in row-major order.
type Block = [Complex64; 4];

/// Single-qubit rotation gate set.
#[derive(Debug)]
pub struct RotationGateSet {
    config: GateSetConfig,
    theta_scale: f64,
    seed: Option<u64>,
    freeze_phases: bool,
    draws: AtomicU64,
}

impl RotationGateSet {
    /// Build with `n_blocks` blocks and default options.
    pub fn new(n_blocks: usize, name: impl Into<String>) -> GateSetResult<Self> {
        Self::from_config(GateSetConfig::new(n_blocks, name))
    }

    /// Standard deviation of the initial `θ` draw.
    pub fn theta_scale(&self) -> f64 {
        self.theta_scale
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => {
                let draw = self.draws.fetch_add(1, Ordering::Relaxed);
                StdRng::from_seed(draw_key(seed, draw))
            }
            None => StdRng::from_entropy(),
        }
    }

    fn angles<'a>(
        &self,
        params: &'a ParameterSet,
    ) -> GateSetResult<(&'a Array2<f64>, &'a Array2<f64>)> {
        params.expect_names(&[THETA, PHI])?;
        let theta = params.values(THETA)?;
        let phi = params.values(PHI)?;
        if theta.nrows() != self.config.n_blocks {
            return Err(GateSetError::shape_mismatch(
                THETA,
                (self.config.n_blocks, theta.ncols()),
                theta.dim(),
            ));
        }
        Ok((theta, phi))
    }
}

impl GateSet for RotationGateSet {
    fn from_config(config: GateSetConfig) -> GateSetResult<Self> {
        config.validate()?;
        let theta_scale = config.extra_f64(THETA_SCALE_KEY)?.unwrap_or(FRAC_PI_2);
        if !theta_scale.is_finite() || theta_scale <= 0.0 {
            return Err(GateSetError::InvalidConfiguration(format!(
                "{THETA_SCALE_KEY} must be a positive number, got {theta_scale}"
            )));
        }
        let seed = config.extra_u64(SEED_KEY)?;
        let freeze_phases = config.extra_bool(FREEZE_PHASES_KEY)?.unwrap_or(false);

        Ok(Self {
            config,
            theta_scale,
            seed,
            freeze_phases,
            draws: AtomicU64::new(0),
        })
    }

    fn config(&self) -> &GateSetConfig {
        &self.config
    }

    fn construct_block_operators(
        &self,
        params: &ParameterSet,
    ) -> GateSetResult<BlockOperatorBatch> {
        let (theta, phi) = self.angles(params)?;
        let blocks = Zip::from(theta).and(phi).map_collect(|&t, &p| rotation(t, p));
        BlockOperatorBatch::new(to_batch(&blocks))
    }

    fn create_initial_parameters(&self, parallel: usize) -> GateSetResult<ParameterSet> {
        let shape = self.batch_shape(parallel)?;
        let mut rng = self.rng();

        let theta_dist = Normal::new(0.0, self.theta_scale)
            .map_err(|e| GateSetError::InvalidConfiguration(e.to_string()))?;
        let phi_dist = Uniform::new(-PI, PI);

        let theta = Array2::from_shape_fn(shape.dim(), |_| theta_dist.sample(&mut rng));
        let phi = Array2::from_shape_fn(shape.dim(), |_| phi_dist.sample(&mut rng));

        ParameterSet::new()
            .with_trainable(THETA, theta)?
            .with_trainable(PHI, phi)
    }

    fn create_optimization_mask(&self, parallel: usize) -> GateSetResult<Option<OptimizationMask>> {
        let shape = self.batch_shape(parallel)?;
        if !self.freeze_phases {
            return Ok(None);
        }
        let mut mask = OptimizationMask::new();
        mask.insert(THETA, Array2::ones(shape.dim()))?;
        mask.insert(PHI, Array2::zeros(shape.dim()))?;
        Ok(Some(mask))
    }

    /// Wraps `φ` into `(−π, π]`. `θ` is kept as is, since it is 4π-periodic.
    fn preprocess_parameters_before_saving(
        &self,
        params: &ParameterSet,
    ) -> GateSetResult<ParameterSet> {
        let mut saved = params.clone();
        saved.values_mut(PHI)?.mapv_inplace(wrap_phase);
        Ok(saved)
    }

    fn block_operator_derivatives(
        &self,
        params: &ParameterSet,
    ) -> GateSetResult<ParameterDerivatives> {
        let (theta, phi) = self.angles(params)?;
        let d_theta = Zip::from(theta).and(phi).map_collect(|&t, &p| d_rotation_d_theta(t, p));
        let d_phi = Zip::from(theta).and(phi).map_collect(|&t, &p| d_rotation_d_phi(t, p));

        let mut derivatives = ParameterDerivatives::new();
        derivatives.insert(THETA, to_batch(&d_theta));
        derivatives.insert(PHI, to_batch(&d_phi));
        Ok(derivatives)
    }
}

/// Lay `(N_blocks, N_multistart)` 2×2 blocks out as `(N_multistart, N_blocks, 2, 2)`.
fn to_batch(blocks: &Array2<Block>) -> Array4<Complex64> {
    let (n_blocks, starts) = blocks.dim();
    Array4::from_shape_fn((starts, n_blocks, 2, 2), |(m, b, i, j)| {
        blocks[[b, m]][2 * i + j]
    })
}

fn rotation(theta: f64, phi: f64) -> Block {
    let (s, c) = (theta / 2.0).sin_cos();
    let minus_i = Complex64::new(0.0, -1.0);
    [
        Complex64::new(c, 0.0),
        minus_i * s * Complex64::from_polar(1.0, -phi),
        minus_i * s * Complex64::from_polar(1.0, phi),
        Complex64::new(c, 0.0),
    ]
}

fn d_rotation_d_theta(theta: f64, phi: f64) -> Block {
    let (s, c) = (theta / 2.0).sin_cos();
    let minus_i = Complex64::new(0.0, -1.0);
    [
        Complex64::new(-s / 2.0, 0.0),
        minus_i * (c / 2.0) * Complex64::from_polar(1.0, -phi),
        minus_i * (c / 2.0) * Complex64::from_polar(1.0, phi),
        Complex64::new(-s / 2.0, 0.0),
    ]
}

fn d_rotation_d_phi(theta: f64, phi: f64) -> Block {
    let s = (theta / 2.0).sin();
    [
        Complex64::new(0.0, 0.0),
        -s * Complex64::from_polar(1.0, -phi),
        s * Complex64::from_polar(1.0, phi),
        Complex64::new(0.0, 0.0),
    ]
}

/// ChaCha key for draw `draw` of `seed`. Distinct pairs give distinct keys.
fn draw_key(seed: u64, draw: u64) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&draw.to_le_bytes());
    key
}

fn wrap_phase(phi: f64) -> f64 {
    PI - (PI - phi).rem_euclid(2.0 * PI)
}
