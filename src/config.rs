//! Gate-set configuration.
//!
//! A configuration is a free-form option map with a few recognized keys:
//!
//! | Key | Type | Default | Meaning |
//! |-----|------|---------|---------|
//! | `N_blocks` | integer ≥ 1 | `20` | Control blocks in one pulse sequence |
//! | `name` | string | `"gate_set"` | Identifier used for logging and saving |
//! | `optimization_type` | string | `"unitary"` | See [`OptimizationKind`] |
//!
//! Every other key is accepted and kept verbatim in [`GateSetConfig::extra`]
//! for the concrete gate set to interpret.
//!
//! Reconfiguration is a pure merge followed by a rebuild:
//!
//! ```text
//!   merge_config(old, overrides) ──→ new ──→ G::from_config(new)
//! ```
//!
//! Overrides win on key collisions and untouched keys persist.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GateSetError, GateSetResult};
use crate::kind::OptimizationKind;

/// Serialized key of [`GateSetConfig::n_blocks`].
pub const N_BLOCKS_KEY: &str = "N_blocks";
/// Serialized key of [`GateSetConfig::name`].
pub const NAME_KEY: &str = "name";
/// Serialized key of [`GateSetConfig::optimization_kind`].
pub const OPTIMIZATION_TYPE_KEY: &str = "optimization_type";

const DEFAULT_N_BLOCKS: usize = 20;
const DEFAULT_NAME: &str = "gate_set";

fn default_n_blocks() -> usize {
    DEFAULT_N_BLOCKS
}

fn default_name() -> String {
    DEFAULT_NAME.into()
}

/// Effective configuration of a gate-set instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSetConfig {
    /// Number of control blocks in the pulse sequence.
    #[serde(rename = "N_blocks", default = "default_n_blocks")]
    pub n_blocks: usize,
    /// Identifier for logging and saving.
    #[serde(default = "default_name")]
    pub name: String,
    /// Fundamental optimization kind. Fixed for the lifetime of an instance.
    #[serde(rename = "optimization_type", default)]
    pub optimization_kind: OptimizationKind,
    /// Options not recognized here, stored verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for GateSetConfig {
    fn default() -> Self {
        Self {
            n_blocks: DEFAULT_N_BLOCKS,
            name: DEFAULT_NAME.into(),
            optimization_kind: OptimizationKind::default(),
            extra: Map::new(),
        }
    }
}

impl GateSetConfig {
    /// Create a configuration with the given block count and name.
    pub fn new(n_blocks: usize, name: impl Into<String>) -> Self {
        Self {
            n_blocks,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the optimization kind.
    pub fn with_kind(mut self, kind: OptimizationKind) -> Self {
        self.optimization_kind = kind;
        self
    }

    /// Store an extra option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Build a configuration by merging `options` onto the built-in defaults.
    ///
    /// Unknown keys are kept. Recognized keys with an unusable value are
    /// rejected with [`GateSetError::InvalidConfiguration`].
    pub fn from_options(options: Map<String, Value>) -> GateSetResult<Self> {
        let config: Self = serde_json::from_value(Value::Object(options))
            .map_err(|e| GateSetError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON object of options and merge it onto the defaults.
    pub fn from_json_str(json: &str) -> GateSetResult<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(options) => Self::from_options(options),
            other => Err(GateSetError::InvalidConfiguration(format!(
                "expected a JSON object of options, got {other}"
            ))),
        }
    }

    /// Flatten back into an option map (recognized and extra keys together).
    pub fn to_options(&self) -> GateSetResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(GateSetError::InvalidConfiguration(format!(
                "configuration did not serialize to an object: {other}"
            ))),
        }
    }

    /// Validate option values.
    pub fn validate(&self) -> GateSetResult<()> {
        if self.n_blocks == 0 {
            return Err(GateSetError::InvalidConfiguration(
                "N_blocks must be > 0".into(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(GateSetError::InvalidConfiguration(
                "name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Read an extra option as `f64`.
    pub fn extra_f64(&self, key: &str) -> GateSetResult<Option<f64>> {
        self.extra_typed(key, "a number", Value::as_f64)
    }

    /// Read an extra option as `u64`.
    pub fn extra_u64(&self, key: &str) -> GateSetResult<Option<u64>> {
        self.extra_typed(key, "a non-negative integer", Value::as_u64)
    }

    /// Read an extra option as `bool`.
    pub fn extra_bool(&self, key: &str) -> GateSetResult<Option<bool>> {
        self.extra_typed(key, "a boolean", Value::as_bool)
    }

    /// Read an extra option as a string.
    pub fn extra_str(&self, key: &str) -> GateSetResult<Option<&str>> {
        self.extra_typed(key, "a string", Value::as_str)
    }

    fn extra_typed<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        get: impl FnOnce(&'a Value) -> Option<T>,
    ) -> GateSetResult<Option<T>> {
        match self.extra.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => get(value).map(Some).ok_or_else(|| {
                GateSetError::InvalidConfiguration(format!(
                    "option `{key}` must be {expected}, got {value}"
                ))
            }),
        }
    }
}

/// A partial set of option overrides for `reconfigure`.
///
/// Built either from a JSON option map or with the typed setters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    options: Map<String, Value>,
}

impl ConfigOverrides {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a raw option map.
    pub fn from_options(options: Map<String, Value>) -> Self {
        Self { options }
    }

    /// Override `N_blocks`.
    pub fn n_blocks(self, n_blocks: usize) -> Self {
        self.option(N_BLOCKS_KEY, n_blocks)
    }

    /// Override `name`.
    pub fn name(self, name: impl Into<String>) -> Self {
        self.option(NAME_KEY, name.into())
    }

    /// Override `optimization_type`. Only accepted if it equals the current kind.
    pub fn optimization_kind(self, kind: OptimizationKind) -> Self {
        self.option(OPTIMIZATION_TYPE_KEY, kind.as_str())
    }

    /// Override any option by key.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Iterate over the overridden keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.options.keys()
    }

    /// Check if there is nothing to override.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Merge `overrides` on top of `old` and validate the result.
///
/// Overrides win on key collisions; every key of `old` that is not
/// overridden persists. Changing the optimization kind is rejected with
/// [`GateSetError::InvalidReconfiguration`].
pub fn merge_config(
    old: &GateSetConfig,
    overrides: &ConfigOverrides,
) -> GateSetResult<GateSetConfig> {
    if let Some(value) = overrides.options.get(OPTIMIZATION_TYPE_KEY) {
        let requested: OptimizationKind = serde_json::from_value(value.clone())
            .map_err(|e| GateSetError::InvalidConfiguration(e.to_string()))?;
        if requested != old.optimization_kind {
            return Err(GateSetError::InvalidReconfiguration(format!(
                "cannot change optimization type from {} to {requested}",
                old.optimization_kind
            )));
        }
    }

    let mut merged = old.to_options()?;
    for (key, value) in &overrides.options {
        merged.insert(key.clone(), value.clone());
    }
    GateSetConfig::from_options(merged)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = GateSetConfig::from_options(Map::new()).unwrap();
        assert_eq!(config, GateSetConfig::default());
        assert_eq!(config.n_blocks, 20);
        assert_eq!(config.name, "gate_set");
        assert_eq!(config.optimization_kind, OptimizationKind::Unitary);
    }

    #[test]
    fn test_unknown_options_are_kept() {
        let config = GateSetConfig::from_options(options(json!({
            "N_blocks": 5,
            "name": "test",
            "beta_scale": 1.5,
            "comment": "cavity"
        })))
        .unwrap();
        assert_eq!(config.n_blocks, 5);
        assert_eq!(config.name, "test");
        assert_eq!(config.extra_f64("beta_scale").unwrap(), Some(1.5));
        assert_eq!(config.extra_str("comment").unwrap(), Some("cavity"));
        assert!(!config.extra.contains_key("N_blocks"));
    }

    #[test]
    fn test_invalid_options() {
        let err = GateSetConfig::from_options(options(json!({ "N_blocks": 0 }))).unwrap_err();
        assert!(matches!(err, GateSetError::InvalidConfiguration(_)));

        let err =
            GateSetConfig::from_options(options(json!({ "N_blocks": "five" }))).unwrap_err();
        assert!(matches!(err, GateSetError::InvalidConfiguration(_)));

        let err = GateSetConfig::from_json_str("[1, 2]").unwrap_err();
        assert!(matches!(err, GateSetError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_extra_typed_access() {
        let config = GateSetConfig::default()
            .with_option("seed", 7)
            .with_option("freeze_phases", "yes");
        assert_eq!(config.extra_u64("seed").unwrap(), Some(7));
        assert_eq!(config.extra_u64("missing").unwrap(), None);
        assert!(config.extra_bool("freeze_phases").is_err());
    }

    #[test]
    fn test_json_roundtrip_keeps_keys() {
        let config = GateSetConfig::from_json_str(
            r#"{"N_blocks": 3, "optimization_type": "state transfer", "alpha": 2}"#,
        );
        // "state transfer" is only accepted by FromStr, not by serde.
        assert!(config.is_err());

        let config = GateSetConfig::from_json_str(
            r#"{"N_blocks": 3, "optimization_type": "state_transfer", "alpha": 2}"#,
        )
        .unwrap();
        let options = config.to_options().unwrap();
        assert_eq!(options["N_blocks"], json!(3));
        assert_eq!(options["optimization_type"], json!("state_transfer"));
        assert_eq!(options["alpha"], json!(2));
    }

    #[test]
    fn test_merge_overrides_win() {
        let old = GateSetConfig::new(5, "test").with_option("alpha", 1.0);
        let merged = merge_config(
            &old,
            &ConfigOverrides::new().n_blocks(10).option("alpha", 2.0),
        )
        .unwrap();
        assert_eq!(merged.n_blocks, 10);
        assert_eq!(merged.name, "test");
        assert_eq!(merged.extra_f64("alpha").unwrap(), Some(2.0));
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let old = GateSetConfig::new(5, "test").with_option("seed", 3);
        let merged = merge_config(&old, &ConfigOverrides::new().name("renamed")).unwrap();
        assert_eq!(merged.n_blocks, 5);
        assert_eq!(merged.name, "renamed");
        assert_eq!(merged.extra_u64("seed").unwrap(), Some(3));
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let old = GateSetConfig::new(4, "same").with_option("x", true);
        assert_eq!(merge_config(&old, &ConfigOverrides::new()).unwrap(), old);
    }

    #[test]
    fn test_merge_rejects_kind_change() {
        let old = GateSetConfig::default();
        let err = merge_config(
            &old,
            &ConfigOverrides::new().optimization_kind(OptimizationKind::StateTransfer),
        )
        .unwrap_err();
        assert!(matches!(err, GateSetError::InvalidReconfiguration(_)));

        // Restating the current kind is fine.
        let same = merge_config(
            &old,
            &ConfigOverrides::new().optimization_kind(OptimizationKind::Unitary),
        )
        .unwrap();
        assert_eq!(same, old);
    }

    #[test]
    fn test_merge_validates() {
        let err = merge_config(&GateSetConfig::default(), &ConfigOverrides::new().n_blocks(0))
            .unwrap_err();
        assert!(matches!(err, GateSetError::InvalidConfiguration(_)));
    }
}
