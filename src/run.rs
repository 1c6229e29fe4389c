//! Bookkeeping for one multistart optimization run.
//!
//! [`MultistartRun`] owns a gate set together with the parameters an
//! external optimizer is tuning. It does not compute gradients or decide
//! step sizes. It keeps the lifecycle honest:
//!
//! ```text
//!   new() ──→ operators() ──→ apply_update() ──→ … ──→ save_record()
//!    │
//!    ├── create_initial_parameters(parallel)   (shape checked)
//!    └── create_optimization_mask(parallel)    (checked against parameters, kept as state)
//! ```
//!
//! Excluded mask entries are handled by the configured [`MaskPolicy`].

use tracing::{debug, info};

use crate::archive::SaveRecord;
use crate::error::{GateSetError, GateSetResult};
use crate::gate_set::GateSet;
use crate::operators::BlockOperatorBatch;
use crate::params::{MaskPolicy, OptimizationMask, ParameterSet};

/// One gate set, its current parameters, and its mask.
#[derive(Debug)]
pub struct MultistartRun<G> {
    gate_set: G,
    parameters: ParameterSet,
    initial: ParameterSet,
    mask: Option<OptimizationMask>,
    policy: MaskPolicy,
    steps: usize,
}

impl<G: GateSet> MultistartRun<G> {
    /// Start a run with `parallel` freshly randomized candidates.
    pub fn new(gate_set: G, parallel: usize) -> GateSetResult<Self> {
        let parameters = gate_set.create_initial_parameters(parallel)?;
        Self::from_parameters(gate_set, parameters)
    }

    /// Start a run from existing parameters, e.g. a previous run's result.
    pub fn from_parameters(gate_set: G, parameters: ParameterSet) -> GateSetResult<Self> {
        let width = parameters.shape().map_or(0, |s| s.width);
        parameters.expect_shape(gate_set.batch_shape(width)?)?;

        let mask = gate_set.create_optimization_mask(width)?;
        if let Some(mask) = &mask {
            mask.check_against(&parameters)?;
        }
        let policy = MaskPolicy::from_config(gate_set.config())?;

        info!(
            name = %gate_set.config().name,
            n_blocks = gate_set.config().n_blocks,
            parallel = width,
            masked = mask.is_some(),
            ?policy,
            "starting multistart run"
        );

        Ok(Self {
            gate_set,
            initial: parameters.clone(),
            parameters,
            mask,
            policy,
            steps: 0,
        })
    }

    /// The gate set driving this run.
    pub fn gate_set(&self) -> &G {
        &self.gate_set
    }

    /// Current parameters.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Parameters at the start of the run.
    pub fn initial_parameters(&self) -> &ParameterSet {
        &self.initial
    }

    /// Mask in effect, if the gate set produced one.
    pub fn mask(&self) -> Option<&OptimizationMask> {
        self.mask.as_ref()
    }

    /// How excluded entries are treated.
    pub fn policy(&self) -> MaskPolicy {
        self.policy
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Multistart batch width.
    pub fn width(&self) -> usize {
        self.parameters.shape().map_or(0, |s| s.width)
    }

    /// Block operators for the current parameters.
    pub fn operators(&self) -> GateSetResult<BlockOperatorBatch> {
        self.gate_set.construct_block_operators(&self.parameters)
    }

    /// Add `step` to the current parameters.
    ///
    /// `step` may cover any subset of the trainable parameters and must have
    /// the run's shape. Stepping a fixed parameter is rejected.
    pub fn apply_update(&mut self, step: &ParameterSet) -> GateSetResult<()> {
        if step.shape() != self.parameters.shape() {
            return Err(GateSetError::shape_mismatch(
                "update step",
                self.parameters.shape().map(|s| s.dim()),
                step.shape().map(|s| s.dim()),
            ));
        }
        for name in step.names() {
            match self.parameters.get(name) {
                None => return Err(GateSetError::UnknownParameter(name.to_string())),
                Some(p) if !p.trainable => {
                    return Err(GateSetError::InvalidArgument(format!(
                        "parameter `{name}` is not trainable"
                    )));
                }
                Some(_) => {}
            }
        }

        let mut step = step.clone();
        if let (Some(mask), MaskPolicy::ZeroGradient) = (&self.mask, self.policy) {
            mask.zero_excluded(&mut step)?;
        }
        for (name, delta) in step.iter() {
            let mut values = self.parameters.values_mut(name)?;
            values += &delta.values;
        }
        if let (Some(mask), MaskPolicy::FreezeAtInitial) = (&self.mask, self.policy) {
            mask.restore_excluded(&mut self.parameters, &self.initial)?;
        }

        self.steps += 1;
        debug!(step = self.steps, parameters = step.len(), "applied update");
        Ok(())
    }

    /// Snapshot the current parameters for persistence.
    pub fn save_record(&self) -> GateSetResult<SaveRecord> {
        SaveRecord::capture(&self.gate_set, &self.parameters)
    }

    /// Give back the gate set and the final parameters.
    pub fn into_parts(self) -> (G, ParameterSet) {
        (self.gate_set, self.parameters)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::config::GateSetConfig;
    use crate::params::{BatchShape, MASK_POLICY_KEY, Parameter};
    use crate::rotation::{PHI, RotationGateSet, THETA};

    /// Rotation gate set whose mask names a parameter it never creates.
    #[derive(Debug)]
    struct StrayMask {
        inner: RotationGateSet,
    }

    impl GateSet for StrayMask {
        fn from_config(config: GateSetConfig) -> GateSetResult<Self> {
            Ok(Self {
                inner: RotationGateSet::from_config(config)?,
            })
        }

        fn config(&self) -> &GateSetConfig {
            self.inner.config()
        }

        fn construct_block_operators(
            &self,
            params: &ParameterSet,
        ) -> GateSetResult<BlockOperatorBatch> {
            self.inner.construct_block_operators(params)
        }

        fn create_initial_parameters(&self, parallel: usize) -> GateSetResult<ParameterSet> {
            self.inner.create_initial_parameters(parallel)
        }

        fn create_optimization_mask(
            &self,
            parallel: usize,
        ) -> GateSetResult<Option<OptimizationMask>> {
            let shape = self.batch_shape(parallel)?;
            let mut mask = OptimizationMask::new();
            mask.insert(THETA, Array2::ones(shape.dim()))?;
            mask.insert("beta", Array2::zeros(shape.dim()))?;
            Ok(Some(mask))
        }
    }

    fn frozen_phases(policy: &str) -> RotationGateSet {
        RotationGateSet::from_config(
            GateSetConfig::new(3, "run")
                .with_option("freeze_phases", true)
                .with_option(MASK_POLICY_KEY, policy),
        )
        .unwrap()
    }

    fn constant_step(value: f64) -> ParameterSet {
        ParameterSet::new()
            .with_trainable(THETA, Array2::from_elem((3, 2), value))
            .unwrap()
            .with_trainable(PHI, Array2::from_elem((3, 2), value))
            .unwrap()
    }

    #[test]
    fn test_new_run_shapes() {
        let run = MultistartRun::new(RotationGateSet::new(5, "test").unwrap(), 3).unwrap();
        assert_eq!(run.width(), 3);
        assert_eq!(run.parameters().shape(), Some(BatchShape::new(5, 3)));
        assert!(run.mask().is_none());
        assert_eq!(run.policy(), MaskPolicy::ZeroGradient);
        assert_eq!(run.operators().unwrap().multistart(), 3);
    }

    #[test]
    fn test_zero_width_rejected() {
        let err = MultistartRun::new(RotationGateSet::new(5, "test").unwrap(), 0).unwrap_err();
        assert!(matches!(err, GateSetError::InvalidArgument(_)));
    }

    #[test]
    fn test_from_parameters_checks_blocks() {
        let gs = RotationGateSet::new(4, "test").unwrap();
        let err = MultistartRun::from_parameters(gs, constant_step(0.0)).unwrap_err();
        assert!(matches!(err, GateSetError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_mismatched_mask_rejected() {
        let gs = StrayMask::from_config(GateSetConfig::new(3, "stray")).unwrap();
        let err = MultistartRun::new(gs, 2).unwrap_err();
        assert!(matches!(err, GateSetError::ShapeMismatch { .. }));

        let gs = StrayMask::from_config(GateSetConfig::new(3, "stray")).unwrap();
        let params = gs.create_initial_parameters(2).unwrap();
        let err = MultistartRun::from_parameters(gs, params).unwrap_err();
        assert!(err.is_programming_error());
    }

    #[test]
    fn test_update_without_mask() {
        let mut run = MultistartRun::new(RotationGateSet::new(3, "test").unwrap(), 2).unwrap();
        run.apply_update(&constant_step(0.5)).unwrap();
        let expected = run.initial_parameters().values(THETA).unwrap() + 0.5;
        assert_eq!(run.parameters().values(THETA).unwrap(), &expected);
        assert_eq!(run.steps(), 1);
    }

    #[test]
    fn test_zero_gradient_policy() {
        let mut run = MultistartRun::new(frozen_phases("zero_gradient"), 2).unwrap();
        run.apply_update(&constant_step(0.25)).unwrap();
        assert_eq!(
            run.parameters().values(PHI).unwrap(),
            run.initial_parameters().values(PHI).unwrap()
        );
        let expected = run.initial_parameters().values(THETA).unwrap() + 0.25;
        assert_eq!(run.parameters().values(THETA).unwrap(), &expected);
    }

    #[test]
    fn test_freeze_policy_restores_excluded() {
        let mut run = MultistartRun::new(frozen_phases("freeze_at_initial"), 2).unwrap();
        assert_eq!(run.policy(), MaskPolicy::FreezeAtInitial);
        run.apply_update(&constant_step(1.0)).unwrap();
        run.apply_update(&constant_step(1.0)).unwrap();
        assert_eq!(
            run.parameters().values(PHI).unwrap(),
            run.initial_parameters().values(PHI).unwrap()
        );
        assert_eq!(run.steps(), 2);
    }

    #[test]
    fn test_update_rejects_bad_steps() {
        let mut run = MultistartRun::new(RotationGateSet::new(3, "test").unwrap(), 2).unwrap();

        let wrong_shape = ParameterSet::new()
            .with_trainable(THETA, Array2::zeros((3, 5)))
            .unwrap();
        assert!(matches!(
            run.apply_update(&wrong_shape),
            Err(GateSetError::ShapeMismatch { .. })
        ));

        let unknown = ParameterSet::new()
            .with_trainable("beta", Array2::zeros((3, 2)))
            .unwrap();
        assert!(matches!(
            run.apply_update(&unknown),
            Err(GateSetError::UnknownParameter(_))
        ));
        assert_eq!(run.steps(), 0);
    }

    #[test]
    fn test_update_rejects_fixed_parameter() {
        let gs = RotationGateSet::new(3, "test").unwrap();
        let mut params = gs.create_initial_parameters(2).unwrap();
        let theta = params.values(THETA).unwrap().clone();
        params.insert(THETA, Parameter::fixed(theta)).unwrap();
        let mut run = MultistartRun::from_parameters(gs, params).unwrap();

        let err = run.apply_update(&constant_step(0.1)).unwrap_err();
        assert!(matches!(err, GateSetError::InvalidArgument(_)));
    }

    #[test]
    fn test_save_record_and_parts() {
        let run = MultistartRun::new(RotationGateSet::new(3, "saved").unwrap(), 2).unwrap();
        let record = run.save_record().unwrap();
        assert_eq!(record.name, "saved");
        assert_eq!(record.parameters[THETA].len(), 3);
        assert!(record.captured_at().is_some());

        let (gs, params) = run.into_parts();
        assert_eq!(gs.config().name, "saved");
        assert_eq!(params.len(), 2);
    }
}
