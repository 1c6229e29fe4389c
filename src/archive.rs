//! Save records for optimized parameters.
//!
//! A [`SaveRecord`] is what the persistence layer stores at the end of a
//! run: the gate set's name and configuration, a timestamp in
//! [`TIMESTAMP_FORMAT`], and the parameters after the gate set's
//! pre-save hook, converted to plain numbers (one row per block).
//!
//! Gate sets never write anything themselves. Building a record is pure;
//! only [`SaveRecord::write_json`] touches a writer.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GateSetConfig;
use crate::error::GateSetResult;
use crate::gate_set::GateSet;
use crate::params::ParameterSet;

/// `strftime` format of [`SaveRecord::timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Separator closing a run's section in human-readable logs.
pub const END_OPT_STRING: &str =
    "\n============================================================\n";

/// Persistable snapshot of one run's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveRecord {
    /// Gate-set name.
    pub name: String,
    /// Local time the record was captured, in [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
    /// Effective configuration at capture time.
    pub config: GateSetConfig,
    /// Preprocessed parameters, `name → [block][candidate]`.
    pub parameters: BTreeMap<String, Vec<Vec<f64>>>,
}

impl SaveRecord {
    /// Capture `params` now.
    pub fn capture<G: GateSet>(gate_set: &G, params: &ParameterSet) -> GateSetResult<Self> {
        Self::capture_at(gate_set, params, Local::now().naive_local())
    }

    /// Capture `params` with an explicit timestamp.
    pub fn capture_at<G: GateSet>(
        gate_set: &G,
        params: &ParameterSet,
        at: NaiveDateTime,
    ) -> GateSetResult<Self> {
        let saved = gate_set.preprocess_parameters_before_saving(params)?;
        let config = gate_set.config().clone();
        debug!(name = %config.name, parameters = saved.len(), "captured save record");
        Ok(Self {
            name: config.name.clone(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            config,
            parameters: saved.to_nested_vecs(),
        })
    }

    /// Parse the timestamp back.
    pub fn captured_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> GateSetResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a record from JSON.
    pub fn from_json_str(json: &str) -> GateSetResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write pretty-printed JSON followed by a newline.
    pub fn write_json<W: Write>(&self, mut writer: W) -> GateSetResult<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Human-readable summary, closed by [`END_OPT_STRING`].
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{}  {}\nN_blocks: {}  optimization_type: {}\n",
            self.timestamp, self.name, self.config.n_blocks, self.config.optimization_kind
        );
        for (name, rows) in &self.parameters {
            let width = rows.first().map_or(0, Vec::len);
            out.push_str(&format!("  {name}: ({}, {width})\n", rows.len()));
        }
        out.push_str(END_OPT_STRING);
        out
    }
}
