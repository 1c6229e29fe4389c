//! Gate-Set Contract: pluggable pulse parameterizations for batched quantum optimal control
//!
//! This crate defines what a **gate set** must provide so that a generic,
//! gradient-based batch optimizer can tune control pulses toward a target
//! unitary or state transfer. Any parameterization implements the
//! [`GateSet`] trait; the optimizer only ever sees the shapes fixed here.
//!
//! # Overview
//!
//! The contract defines:
//! - A [`GateSet`] trait covering initialization, reconfiguration,
//!   operator construction, parameter randomization, masking, and the
//!   pre-save hook
//! - [`GateSetConfig`] / [`ConfigOverrides`] / [`merge_config`] for the
//!   configuration lifecycle, with [`OptimizationKind`] fixed per instance
//! - [`ParameterSet`], [`OptimizationMask`] and [`MaskPolicy`] for the
//!   `(N_blocks, parallel)` arrays exchanged with the optimizer
//! - [`BlockOperatorBatch`] / [`ParameterDerivatives`] for the operators
//!   and their derivatives
//! - [`RotationGateSet`], a single-qubit reference implementation
//! - [`MultistartRun`] and [`SaveRecord`] for run bookkeeping and persistence
//! - [`GateSetError`] with categorized error variants
//!
//! # Implementing a gate set
//!
//! ```ignore
//! use gateset_contract::{BlockOperatorBatch, GateSet, GateSetConfig, GateSetResult, ParameterSet};
//!
//! struct MyGateSet { config: GateSetConfig }
//!
//! impl GateSet for MyGateSet {
//!     fn from_config(config: GateSetConfig) -> GateSetResult<Self> { /* ... */ }
//!     fn config(&self) -> &GateSetConfig { &self.config }
//!     fn construct_block_operators(&self, params: &ParameterSet) -> GateSetResult<BlockOperatorBatch> { /* ... */ }
//!     fn create_initial_parameters(&self, parallel: usize) -> GateSetResult<ParameterSet> { /* ... */ }
//! }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//!   initialize() ──→ create_initial_parameters() ──→ create_optimization_mask()
//!        │                                                     │
//!   reconfigure()            construct_block_operators() ◀──┬──┘
//!   (same kind only)                    │                   │
//!                                       └── gradient step ──┘
//!                                                 │
//!                               preprocess_parameters_before_saving()
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod gate_set;
pub mod kind;
pub mod operators;
pub mod params;
pub mod rotation;
pub mod run;

pub use archive::{END_OPT_STRING, SaveRecord, TIMESTAMP_FORMAT};
pub use config::{ConfigOverrides, GateSetConfig, merge_config};
pub use error::{GateSetError, GateSetResult};
pub use gate_set::{GateSet, finite_difference_derivatives};
pub use kind::OptimizationKind;
pub use operators::{BlockOperatorBatch, ParameterDerivatives};
pub use params::{BatchShape, MaskPolicy, OptimizationMask, Parameter, ParameterSet};
pub use rotation::RotationGateSet;
pub use run::MultistartRun;
