//! Parameter containers exchanged between a gate set and the optimizer.
//!
//! Every array in a [`ParameterSet`] has the same [`BatchShape`]
//! `(N_blocks, width)`, where `width` is the multistart batch width
//! (`parallel` at initialization, `N_multistart` afterwards). Entry
//! `[b, m]` is the value for block `b` of candidate `m`.
//!
//! Names keep insertion order so the optimizer can iterate them in a
//! fixed order for the whole run.
//!
//! An [`OptimizationMask`] has exactly the key set and shapes of the
//! parameter set it was built for. A `1` marks an entry the optimizer
//! may update; a `0` excludes it. What "excluded" means is a
//! [`MaskPolicy`].

use std::collections::BTreeMap;
use std::str::FromStr;

use ndarray::{Array2, ArrayViewMut2, Zip};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::GateSetConfig;
use crate::error::{GateSetError, GateSetResult};

/// Option key selecting the [`MaskPolicy`].
pub const MASK_POLICY_KEY: &str = "mask_policy";

/// Shape `(N_blocks, width)` shared by every parameter and mask array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchShape {
    /// Number of control blocks.
    pub n_blocks: usize,
    /// Multistart batch width.
    pub width: usize,
}

impl BatchShape {
    /// Create a batch shape.
    pub fn new(n_blocks: usize, width: usize) -> Self {
        Self { n_blocks, width }
    }

    /// Shape of an array, read as `(N_blocks, width)`.
    pub fn of<T>(array: &Array2<T>) -> Self {
        let (n_blocks, width) = array.dim();
        Self { n_blocks, width }
    }

    /// `(N_blocks, width)` tuple, as accepted by `ndarray` constructors.
    pub fn dim(&self) -> (usize, usize) {
        (self.n_blocks, self.width)
    }
}

impl std::fmt::Display for BatchShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.n_blocks, self.width)
    }
}

/// Insertion-ordered name → array storage with a shared shape.
#[derive(Debug, Clone, PartialEq)]
struct NamedArrays<T> {
    entries: Vec<(String, T)>,
    index: FxHashMap<String, usize>,
}

impl<T> Default for NamedArrays<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T> NamedArrays<T> {
    fn insert(&mut self, name: String, value: T) {
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.index.get(name).map(|&i| &mut self.entries[i].1)
    }

    fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Shape shared by the entries other than `name`.
    fn shape_excluding(
        &self,
        name: &str,
        shape_of: impl Fn(&T) -> BatchShape,
    ) -> Option<BatchShape> {
        self.entries
            .iter()
            .find(|(k, _)| k != name)
            .map(|(_, v)| shape_of(v))
    }
}

/// One named optimization variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Values of shape `(N_blocks, width)`.
    pub values: Array2<f64>,
    /// Whether the optimizer may update this variable.
    pub trainable: bool,
}

impl Parameter {
    /// A variable the optimizer updates.
    pub fn trainable(values: Array2<f64>) -> Self {
        Self {
            values,
            trainable: true,
        }
    }

    /// A variable held constant for the whole run.
    pub fn fixed(values: Array2<f64>) -> Self {
        Self {
            values,
            trainable: false,
        }
    }

    /// Shape of the values.
    pub fn shape(&self) -> BatchShape {
        BatchShape::of(&self.values)
    }
}

/// Named optimization variables sharing one [`BatchShape`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    inner: NamedArrays<Parameter>,
}

impl ParameterSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter.
    ///
    /// Fails with [`GateSetError::ShapeMismatch`] if the shape differs from
    /// the other entries.
    pub fn insert(&mut self, name: impl Into<String>, parameter: Parameter) -> GateSetResult<()> {
        let name = name.into();
        if let Some(shape) = self.inner.shape_excluding(&name, Parameter::shape) {
            if parameter.shape() != shape {
                return Err(GateSetError::shape_mismatch(
                    name,
                    shape.dim(),
                    parameter.shape().dim(),
                ));
            }
        }
        self.inner.insert(name, parameter);
        Ok(())
    }

    /// Insert a trainable parameter.
    pub fn insert_trainable(
        &mut self,
        name: impl Into<String>,
        values: Array2<f64>,
    ) -> GateSetResult<()> {
        self.insert(name, Parameter::trainable(values))
    }

    /// Builder-style [`insert_trainable`](Self::insert_trainable).
    pub fn with_trainable(
        mut self,
        name: impl Into<String>,
        values: Array2<f64>,
    ) -> GateSetResult<Self> {
        self.insert_trainable(name, values)?;
        Ok(self)
    }

    /// Get a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.inner.get(name)
    }

    /// Get the values of a parameter, failing on unknown names.
    pub fn values(&self, name: &str) -> GateSetResult<&Array2<f64>> {
        self.inner
            .get(name)
            .map(|p| &p.values)
            .ok_or_else(|| GateSetError::UnknownParameter(name.to_string()))
    }

    /// Mutable view of a parameter's values. The shape cannot change.
    pub fn values_mut(&mut self, name: &str) -> GateSetResult<ArrayViewMut2<'_, f64>> {
        self.inner
            .get_mut(name)
            .map(|p| p.values.view_mut())
            .ok_or_else(|| GateSetError::UnknownParameter(name.to_string()))
    }

    /// Check if a parameter exists.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    /// Iterate over `(name, parameter)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.inner.iter()
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.names()
    }

    /// Names of trainable parameters in insertion order.
    pub fn trainable_names(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, p)| p.trainable)
            .map(|(name, _)| name)
            .collect()
    }

    /// Shared shape, or `None` for an empty set.
    pub fn shape(&self) -> Option<BatchShape> {
        self.iter().next().map(|(_, p)| p.shape())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Check that the set is non-empty and every entry has `expected` shape.
    pub fn expect_shape(&self, expected: BatchShape) -> GateSetResult<()> {
        match self.shape() {
            Some(shape) if shape == expected => Ok(()),
            Some(shape) => Err(GateSetError::shape_mismatch(
                "parameter set",
                expected.dim(),
                shape.dim(),
            )),
            None => Err(GateSetError::shape_mismatch(
                "parameter set",
                expected.dim(),
                "no parameters",
            )),
        }
    }

    /// Check that `required` names are all present, with nothing extra.
    pub fn expect_names(&self, required: &[&str]) -> GateSetResult<()> {
        let mut found: Vec<&str> = self.names().collect();
        let mut expected = required.to_vec();
        found.sort_unstable();
        expected.sort_unstable();
        if found != expected {
            return Err(GateSetError::shape_mismatch(
                "parameter names",
                expected,
                found,
            ));
        }
        Ok(())
    }

    /// Check that `other` has the same key set and shape.
    pub fn check_compatible(&self, other: &ParameterSet) -> GateSetResult<()> {
        let names: Vec<&str> = self.names().collect();
        other.expect_names(&names)?;
        if self.shape() != other.shape() {
            return Err(GateSetError::shape_mismatch(
                "parameter set",
                self.shape().map(|s| s.dim()),
                other.shape().map(|s| s.dim()),
            ));
        }
        Ok(())
    }

    /// Convert to plain nested numbers, one inner vector per block.
    pub fn to_nested_vecs(&self) -> BTreeMap<String, Vec<Vec<f64>>> {
        self.iter()
            .map(|(name, p)| {
                let rows = p.values.rows().into_iter().map(|row| row.to_vec()).collect();
                (name.to_string(), rows)
            })
            .collect()
    }
}

/// Per-entry inclusion flags for gradient updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationMask {
    inner: NamedArrays<Array2<i32>>,
}

impl OptimizationMask {
    /// Create an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mask with the key set and shape of `params`: `1` for trainable
    /// parameters, `0` for fixed ones.
    pub fn all_trainable(params: &ParameterSet) -> Self {
        let mut mask = Self::new();
        for (name, p) in params.iter() {
            let flag = i32::from(p.trainable);
            mask.inner
                .insert(name.to_string(), Array2::from_elem(p.values.dim(), flag));
        }
        mask
    }

    /// Insert or replace a mask array.
    pub fn insert(&mut self, name: impl Into<String>, flags: Array2<i32>) -> GateSetResult<()> {
        let name = name.into();
        if let Some(shape) = self.inner.shape_excluding(&name, BatchShape::of) {
            if BatchShape::of(&flags) != shape {
                return Err(GateSetError::shape_mismatch(
                    name,
                    shape.dim(),
                    flags.dim(),
                ));
            }
        }
        self.inner.insert(name, flags);
        Ok(())
    }

    /// Exclude every entry of a parameter.
    pub fn exclude(&mut self, name: &str) -> GateSetResult<()> {
        self.flags_mut(name)?.fill(0);
        Ok(())
    }

    /// Exclude one block of a parameter for every candidate.
    pub fn exclude_block(&mut self, name: &str, block: usize) -> GateSetResult<()> {
        let flags = self.flags_mut(name)?;
        if block >= flags.nrows() {
            return Err(GateSetError::InvalidArgument(format!(
                "block {block} out of range for {} blocks",
                flags.nrows()
            )));
        }
        flags.row_mut(block).fill(0);
        Ok(())
    }

    fn flags_mut(&mut self, name: &str) -> GateSetResult<&mut Array2<i32>> {
        self.inner
            .get_mut(name)
            .ok_or_else(|| GateSetError::UnknownParameter(name.to_string()))
    }

    /// Get the flags of a parameter.
    pub fn get(&self, name: &str) -> Option<&Array2<i32>> {
        self.inner.get(name)
    }

    /// Iterate over `(name, flags)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<i32>)> {
        self.inner.iter()
    }

    /// Number of masked parameters.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the mask is empty. An empty mask excludes nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Whether entry `[block, start]` of `name` is excluded.
    ///
    /// Names absent from the mask are never excluded.
    pub fn is_excluded(&self, name: &str, block: usize, start: usize) -> bool {
        self.get(name)
            .and_then(|flags| flags.get((block, start)))
            .is_some_and(|&flag| flag == 0)
    }

    /// Check that the mask has exactly the key set and shapes of `params`.
    pub fn check_against(&self, params: &ParameterSet) -> GateSetResult<()> {
        let names: Vec<&str> = self.inner.names().collect();
        params.expect_names(&names)?;
        for (name, flags) in self.iter() {
            let expected = params.values(name)?.dim();
            if flags.dim() != expected {
                return Err(GateSetError::shape_mismatch(name, expected, flags.dim()));
            }
        }
        Ok(())
    }

    /// Zero every excluded entry of `step` in place.
    ///
    /// Names absent from `step` are skipped.
    pub fn zero_excluded(&self, step: &mut ParameterSet) -> GateSetResult<()> {
        for (name, flags) in self.iter() {
            if !step.contains(name) {
                continue;
            }
            let mut values = step.values_mut(name)?;
            if values.dim() != flags.dim() {
                return Err(GateSetError::shape_mismatch(name, flags.dim(), values.dim()));
            }
            Zip::from(&mut values).and(flags).for_each(|v, &flag| {
                if flag == 0 {
                    *v = 0.0;
                }
            });
        }
        Ok(())
    }

    /// Reset every excluded entry of `current` to its value in `initial`.
    pub fn restore_excluded(
        &self,
        current: &mut ParameterSet,
        initial: &ParameterSet,
    ) -> GateSetResult<()> {
        for (name, flags) in self.iter() {
            let reference = initial.values(name)?;
            if reference.dim() != flags.dim() {
                return Err(GateSetError::shape_mismatch(
                    format!("initial {name}"),
                    flags.dim(),
                    reference.dim(),
                ));
            }
            let mut values = current.values_mut(name)?;
            if values.dim() != flags.dim() {
                return Err(GateSetError::shape_mismatch(name, flags.dim(), values.dim()));
            }
            Zip::from(&mut values)
                .and(reference)
                .and(flags)
                .for_each(|v, &r, &flag| {
                    if flag == 0 {
                        *v = r;
                    }
                });
        }
        Ok(())
    }
}

/// What an excluded mask entry means during an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    /// The entry receives a zero gradient contribution.
    #[default]
    ZeroGradient,
    /// The entry is reset to its initial value after every update.
    FreezeAtInitial,
}

impl MaskPolicy {
    /// Read the policy from the `mask_policy` option, defaulting to
    /// [`MaskPolicy::ZeroGradient`].
    pub fn from_config(config: &GateSetConfig) -> GateSetResult<Self> {
        config
            .extra_str(MASK_POLICY_KEY)?
            .map_or(Ok(Self::default()), str::parse)
    }
}

impl FromStr for MaskPolicy {
    type Err = GateSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero_gradient" => Ok(MaskPolicy::ZeroGradient),
            "freeze_at_initial" => Ok(MaskPolicy::FreezeAtInitial),
            other => Err(GateSetError::InvalidConfiguration(format!(
                "unknown mask policy: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn sample() -> ParameterSet {
        ParameterSet::new()
            .with_trainable("theta", array![[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]])
            .unwrap()
            .with_trainable("phi", Array2::zeros((3, 2)))
            .unwrap()
    }

    #[test]
    fn test_insert_enforces_shape() {
        let mut params = sample();
        let err = params
            .insert_trainable("beta", Array2::zeros((3, 3)))
            .unwrap_err();
        assert!(matches!(err, GateSetError::ShapeMismatch { .. }));
        assert_eq!(params.len(), 2);
        assert_eq!(params.shape(), Some(BatchShape::new(3, 2)));
    }

    #[test]
    fn test_replacing_single_entry_may_change_shape() {
        let mut params = ParameterSet::new();
        params.insert_trainable("theta", Array2::zeros((2, 2))).unwrap();
        params.insert_trainable("theta", Array2::zeros((4, 1))).unwrap();
        assert_eq!(params.shape(), Some(BatchShape::new(4, 1)));
    }

    #[test]
    fn test_insertion_order_is_stable() {
        let params = sample();
        let names: Vec<_> = params.names().collect();
        assert_eq!(names, vec!["theta", "phi"]);
    }

    #[test]
    fn test_unknown_parameter() {
        let params = sample();
        assert!(matches!(
            params.values("beta"),
            Err(GateSetError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_check_compatible() {
        let a = sample();
        let b = sample();
        assert!(a.check_compatible(&b).is_ok());

        let c = ParameterSet::new()
            .with_trainable("theta", Array2::zeros((3, 2)))
            .unwrap();
        assert!(a.check_compatible(&c).is_err());

        let d = ParameterSet::new()
            .with_trainable("theta", Array2::zeros((3, 4)))
            .unwrap()
            .with_trainable("phi", Array2::zeros((3, 4)))
            .unwrap();
        assert!(a.check_compatible(&d).is_err());
    }

    #[test]
    fn test_to_nested_vecs() {
        let nested = sample().to_nested_vecs();
        assert_eq!(nested["theta"], vec![vec![0.1, 0.2], vec![0.3, 0.4], vec![0.5, 0.6]]);
        assert_eq!(nested["phi"].len(), 3);
    }

    #[test]
    fn test_mask_all_trainable() {
        let mut params = sample();
        params.insert("offset", Parameter::fixed(Array2::ones((3, 2)))).unwrap();
        let mask = OptimizationMask::all_trainable(&params);
        assert!(mask.check_against(&params).is_ok());
        assert!(!mask.is_excluded("theta", 0, 0));
        assert!(mask.is_excluded("offset", 2, 1));
    }

    #[test]
    fn test_mask_exclude_block() {
        let params = sample();
        let mut mask = OptimizationMask::all_trainable(&params);
        mask.exclude_block("phi", 1).unwrap();
        assert!(mask.is_excluded("phi", 1, 0));
        assert!(mask.is_excluded("phi", 1, 1));
        assert!(!mask.is_excluded("phi", 0, 0));
        assert!(mask.exclude_block("phi", 3).is_err());
        assert!(mask.exclude("beta").is_err());
    }

    #[test]
    fn test_mask_check_against_rejects_mismatch() {
        let params = sample();
        let mut mask = OptimizationMask::new();
        mask.insert("theta", Array2::ones((3, 2))).unwrap();
        assert!(mask.check_against(&params).is_err());

        mask.insert("phi", Array2::ones((3, 2))).unwrap();
        assert!(mask.check_against(&params).is_ok());
        assert!(mask.insert("phi", Array2::ones((2, 2))).is_err());
    }

    #[test]
    fn test_zero_and_restore_excluded() {
        let initial = sample();
        let mut mask = OptimizationMask::all_trainable(&initial);
        mask.exclude("theta").unwrap();

        let mut step = sample();
        mask.zero_excluded(&mut step).unwrap();
        assert!(step.values("theta").unwrap().iter().all(|&v| v == 0.0));

        let mut current = sample();
        current.values_mut("theta").unwrap().fill(9.0);
        current.values_mut("phi").unwrap().fill(9.0);
        mask.restore_excluded(&mut current, &initial).unwrap();
        assert_eq!(current.values("theta").unwrap(), initial.values("theta").unwrap());
        assert!(current.values("phi").unwrap().iter().all(|&v| v == 9.0));
    }

    #[test]
    fn test_restore_excluded_reports_mismatching_array() {
        let initial = sample();
        let mask = OptimizationMask::all_trainable(&initial);

        let narrow = ParameterSet::new()
            .with_trainable("theta", Array2::zeros((3, 1)))
            .unwrap()
            .with_trainable("phi", Array2::zeros((3, 1)))
            .unwrap();

        let mut current = sample();
        match mask.restore_excluded(&mut current, &narrow).unwrap_err() {
            GateSetError::ShapeMismatch { context, found, .. } => {
                assert_eq!(context, "initial theta");
                assert_eq!(found, "(3, 1)");
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut current = narrow.clone();
        match mask.restore_excluded(&mut current, &initial).unwrap_err() {
            GateSetError::ShapeMismatch { context, found, .. } => {
                assert_eq!(context, "theta");
                assert_eq!(found, "(3, 1)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mask_policy_from_config() {
        let config = GateSetConfig::default();
        assert_eq!(MaskPolicy::from_config(&config).unwrap(), MaskPolicy::ZeroGradient);

        let config = config.with_option(MASK_POLICY_KEY, "freeze_at_initial");
        assert_eq!(
            MaskPolicy::from_config(&config).unwrap(),
            MaskPolicy::FreezeAtInitial
        );

        let config = GateSetConfig::default().with_option(MASK_POLICY_KEY, "zero");
        assert!(MaskPolicy::from_config(&config).is_err());
    }
}
