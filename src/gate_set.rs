//! The gate-set trait.
//!
//! A gate set is a parameterization of a pulse sequence: it says which
//! named parameters exist, how to randomize them, and how to turn them into
//! one operator per block. A generic batch optimizer drives it:
//!
//! ```text
//!   initialize() ──→ create_initial_parameters() ──→ create_optimization_mask()
//!                                 │
//!                                 ▼
//!              ┌──→ construct_block_operators() ──→ gradient step ──┐
//!              └────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//!                  preprocess_parameters_before_saving()
//! ```
//!
//! ## Method table
//!
//! | Method | Required | Returns |
//! |--------|----------|---------|
//! | `from_config()` | yes | `GateSetResult<Self>` |
//! | `config()` | yes | `&GateSetConfig` |
//! | `construct_block_operators()` | yes | `GateSetResult<BlockOperatorBatch>` |
//! | `create_initial_parameters()` | yes | `GateSetResult<ParameterSet>` |
//! | `create_optimization_mask()` | provided (no mask) | `GateSetResult<Option<OptimizationMask>>` |
//! | `preprocess_parameters_before_saving()` | provided (identity) | `GateSetResult<ParameterSet>` |
//! | `block_operator_derivatives()` | provided (`Unimplemented`) | `GateSetResult<ParameterDerivatives>` |
//! | `initialize()` | provided | `GateSetResult<Self>` |
//! | `reconfigure()` | provided | `GateSetResult<()>` |
//! | `batch_shape()` | provided | `GateSetResult<BatchShape>` |

use num_complex::Complex64;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{ConfigOverrides, GateSetConfig, merge_config};
use crate::error::{GateSetError, GateSetResult};
use crate::operators::{BlockOperatorBatch, ParameterDerivatives};
use crate::params::{BatchShape, OptimizationMask, ParameterSet};

/// Trait for pluggable gate-set parameterizations.
///
/// # Contract
///
/// - `construct_block_operators()` MUST be a pure function of its input:
///   no I/O, no interior state, same parameters in, same batch out.
///   It is called every optimization step, so implementations SHOULD
///   work on whole `(N_blocks, N_multistart)` arrays at once rather than
///   looping over blocks.
/// - The map from parameters to operators MUST be smooth in every
///   trainable entry. Branching on parameter values is not allowed.
/// - `create_initial_parameters(parallel)` MUST return arrays of shape
///   `(N_blocks, parallel)` and MUST randomize independently on every call.
/// - A returned mask MUST have exactly the key set and shapes of
///   `create_initial_parameters(parallel)`. `None` means "optimize
///   everything".
/// - Shape or key-set violations are reported as
///   [`GateSetError::ShapeMismatch`].
pub trait GateSet: Sized {
    /// Build an instance from a complete configuration.
    fn from_config(config: GateSetConfig) -> GateSetResult<Self>;

    /// Effective configuration of this instance.
    fn config(&self) -> &GateSetConfig;

    /// Turn parameters into one operator per block per candidate.
    ///
    /// `params` must have the key set and shapes produced by
    /// [`create_initial_parameters`](Self::create_initial_parameters), with
    /// any width. The batch's multistart axis equals that width.
    fn construct_block_operators(&self, params: &ParameterSet)
    -> GateSetResult<BlockOperatorBatch>;

    /// Randomized initial parameters of shape `(N_blocks, parallel)`.
    fn create_initial_parameters(&self, parallel: usize) -> GateSetResult<ParameterSet>;

    /// Mask excluding entries from gradient updates.
    ///
    /// The default excludes nothing.
    fn create_optimization_mask(&self, parallel: usize) -> GateSetResult<Option<OptimizationMask>> {
        self.batch_shape(parallel)?;
        Ok(None)
    }

    /// Convert parameters into the form that gets persisted.
    ///
    /// The result may rename, convert, or drop keys. Must not perform I/O.
    /// The default returns the input unchanged.
    fn preprocess_parameters_before_saving(
        &self,
        params: &ParameterSet,
    ) -> GateSetResult<ParameterSet> {
        Ok(params.clone())
    }

    /// Analytic ∂U/∂p for every trainable parameter.
    fn block_operator_derivatives(
        &self,
        _params: &ParameterSet,
    ) -> GateSetResult<ParameterDerivatives> {
        Err(GateSetError::Unimplemented("block_operator_derivatives"))
    }

    /// Build an instance from raw options merged onto the defaults.
    ///
    /// Unknown keys are stored verbatim in [`GateSetConfig::extra`].
    fn initialize(options: Map<String, Value>) -> GateSetResult<Self> {
        Self::from_config(GateSetConfig::from_options(options)?)
    }

    /// Replace this instance with one built from the merged configuration.
    ///
    /// On error the instance is left untouched.
    fn reconfigure(&mut self, overrides: ConfigOverrides) -> GateSetResult<()> {
        let merged = merge_config(self.config(), &overrides)?;
        debug!(
            name = %merged.name,
            n_blocks = merged.n_blocks,
            keys = ?overrides.keys().collect::<Vec<_>>(),
            "reconfiguring gate set"
        );
        *self = Self::from_config(merged)?;
        Ok(())
    }

    /// `(N_blocks, parallel)` for this instance.
    fn batch_shape(&self, parallel: usize) -> GateSetResult<BatchShape> {
        if parallel == 0 {
            return Err(GateSetError::InvalidArgument(
                "parallel must be at least 1".into(),
            ));
        }
        Ok(BatchShape::new(self.config().n_blocks, parallel))
    }
}

/// Central-difference ∂U/∂p through `construct_block_operators`.
///
/// Every entry of a parameter is shifted at once, so block `b` of candidate
/// `m` receives the sum of the derivatives with respect to every entry of
/// that parameter. The result is the per-entry derivative only when the gate
/// set is block-local, i.e. entry `[b, m]` moves nothing but block `b` of
/// candidate `m`. Use it to check analytic derivatives of such gate sets.
/// Fixed parameters are skipped.
pub fn finite_difference_derivatives<G: GateSet>(
    gate_set: &G,
    params: &ParameterSet,
    step: f64,
) -> GateSetResult<ParameterDerivatives> {
    if step.is_nan() || step <= 0.0 {
        return Err(GateSetError::InvalidArgument(format!(
            "finite-difference step must be positive, got {step}"
        )));
    }
    let mut derivatives = ParameterDerivatives::new();
    for name in params.trainable_names() {
        let mut plus = params.clone();
        plus.values_mut(name)?.mapv_inplace(|v| v + step);
        let mut minus = params.clone();
        minus.values_mut(name)?.mapv_inplace(|v| v - step);

        let upper = gate_set.construct_block_operators(&plus)?.into_array();
        let lower = gate_set.construct_block_operators(&minus)?.into_array();
        derivatives.insert(name, (upper - lower) / Complex64::new(2.0 * step, 0.0));
    }
    Ok(derivatives)
}
