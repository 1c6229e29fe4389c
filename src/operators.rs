//! Block operator batches.
//!
//! A [`BlockOperatorBatch`] is what a gate set turns a [`ParameterSet`]
//! into: one `dim × dim` operator per block per multistart candidate,
//! stored as an array of shape `(N_multistart, N_blocks, dim, dim)`.
//!
//! Block `0` acts first, so a candidate's full sequence is
//!
//! ```text
//!   U = U[N_blocks - 1] · … · U[1] · U[0]
//! ```
//!
//! [`ParameterDerivatives`] holds ∂U/∂p for every parameter, laid out like
//! the batch. Gate sets in this crate are block-local: entry `[b, m]` of a
//! parameter only moves block `b` of candidate `m`.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView2, Axis, Zip};
use num_complex::Complex64;

use crate::error::{GateSetError, GateSetResult};
use crate::params::{BatchShape, ParameterSet};

/// Operators for every block of every multistart candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOperatorBatch {
    operators: Array4<Complex64>,
}

impl BlockOperatorBatch {
    /// Wrap an array of shape `(N_multistart, N_blocks, dim, dim)`.
    pub fn new(operators: Array4<Complex64>) -> GateSetResult<Self> {
        let (_, _, rows, cols) = operators.dim();
        if rows != cols {
            return Err(GateSetError::shape_mismatch(
                "block operator",
                (rows, rows),
                (rows, cols),
            ));
        }
        Ok(Self { operators })
    }

    /// Number of multistart candidates.
    pub fn multistart(&self) -> usize {
        self.operators.len_of(Axis(0))
    }

    /// Number of blocks per candidate.
    pub fn n_blocks(&self) -> usize {
        self.operators.len_of(Axis(1))
    }

    /// Dimension of each operator.
    pub fn dim(&self) -> usize {
        self.operators.len_of(Axis(2))
    }

    /// `(N_blocks, N_multistart)`, matching the parameter layout.
    pub fn batch_shape(&self) -> BatchShape {
        BatchShape::new(self.n_blocks(), self.multistart())
    }

    /// Operator of block `block` of candidate `start`.
    pub fn block(&self, start: usize, block: usize) -> ArrayView2<'_, Complex64> {
        self.operators.slice(ndarray::s![start, block, .., ..])
    }

    /// Underlying array.
    pub fn as_array(&self) -> &Array4<Complex64> {
        &self.operators
    }

    /// Consume into the underlying array.
    pub fn into_array(self) -> Array4<Complex64> {
        self.operators
    }

    /// Full sequence operator of every candidate, shape `(N_multistart, dim, dim)`.
    pub fn compose(&self) -> Array3<Complex64> {
        let d = self.dim();
        let mut composed = Array3::zeros((self.multistart(), d, d));
        Zip::from(composed.outer_iter_mut())
            .and(self.operators.outer_iter())
            .for_each(|mut total, blocks| {
                let mut acc = identity(d);
                for u in blocks.outer_iter() {
                    acc = u.dot(&acc);
                }
                total.assign(&acc);
            });
        composed
    }

    /// Average gate fidelity of every composed candidate against `target`.
    ///
    /// F = (|Tr(target† · U)|² + d) / (d² + d)
    pub fn gate_fidelities(&self, target: &Array2<Complex64>) -> GateSetResult<Array1<f64>> {
        let d = self.dim();
        if target.dim() != (d, d) {
            return Err(GateSetError::shape_mismatch("target unitary", (d, d), target.dim()));
        }
        let target_dag = dagger(target.view());
        let composed = self.compose();
        Ok(composed
            .outer_iter()
            .map(|u| gate_fidelity(&target_dag, u))
            .collect())
    }

    /// `|⟨target|U|initial⟩|²` for every composed candidate.
    pub fn state_transfer_fidelities(
        &self,
        initial: &Array1<Complex64>,
        target: &Array1<Complex64>,
    ) -> GateSetResult<Array1<f64>> {
        let d = self.dim();
        if initial.len() != d || target.len() != d {
            return Err(GateSetError::shape_mismatch(
                "state vectors",
                (d, d),
                (initial.len(), target.len()),
            ));
        }
        let target_conj = target.mapv(|x| x.conj());
        let composed = self.compose();
        Ok(composed
            .outer_iter()
            .map(|u| target_conj.dot(&u.dot(initial)).norm_sqr())
            .collect())
    }

    /// Largest entry of `|U†U − I|` over every block in the batch.
    pub fn max_unitarity_error(&self) -> f64 {
        let d = self.dim();
        let eye = identity(d);
        let mut worst = 0.0_f64;
        for candidate in self.operators.outer_iter() {
            for u in candidate.outer_iter() {
                let product = dagger(u).dot(&u);
                let err = (&product - &eye)
                    .iter()
                    .fold(0.0_f64, |acc, x| acc.max(x.norm()));
                worst = worst.max(err);
            }
        }
        worst
    }
}

fn identity(d: usize) -> Array2<Complex64> {
    Array2::from_diag_elem(d, Complex64::new(1.0, 0.0))
}

fn dagger(a: ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    a.t().mapv(|x| x.conj())
}

fn gate_fidelity(target_dag: &Array2<Complex64>, achieved: ArrayView2<'_, Complex64>) -> f64 {
    let d = achieved.nrows() as f64;
    let trace: Complex64 = target_dag.dot(&achieved).diag().sum();
    ((trace.norm_sqr() + d) / (d * d + d)).clamp(0.0, 1.0)
}

/// ∂U/∂p for every parameter, each shaped like the operator batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterDerivatives {
    entries: Vec<(String, Array4<Complex64>)>,
}

impl ParameterDerivatives {
    /// Create an empty set of derivatives.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the derivative array of a parameter.
    pub fn insert(&mut self, name: impl Into<String>, derivative: Array4<Complex64>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = derivative,
            None => self.entries.push((name, derivative)),
        }
    }

    /// Derivative array of a parameter.
    pub fn get(&self, name: &str) -> Option<&Array4<Complex64>> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of parameters with derivatives.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Chain rule for a real loss.
    ///
    /// `operator_gradient[m, b, i, j]` is `∂L/∂Re U + i·∂L/∂Im U` for block
    /// `b` of candidate `m`. Returns `∂L/∂p[b, m] = Σᵢⱼ Re(conj(G) · ∂U/∂p)`
    /// for every parameter, in the `(N_blocks, N_multistart)` layout.
    pub fn contract(&self, operator_gradient: &Array4<Complex64>) -> GateSetResult<ParameterSet> {
        let mut grads = ParameterSet::new();
        for (name, derivative) in &self.entries {
            if derivative.dim() != operator_gradient.dim() {
                return Err(GateSetError::shape_mismatch(
                    name.as_str(),
                    derivative.dim(),
                    operator_gradient.dim(),
                ));
            }
            let (starts, blocks, _, _) = derivative.dim();
            let mut grad = Array2::zeros((blocks, starts));
            Zip::indexed(&mut grad).for_each(|(b, m), g| {
                let du = derivative.slice(ndarray::s![m, b, .., ..]);
                let dl = operator_gradient.slice(ndarray::s![m, b, .., ..]);
                *g = Zip::from(&du)
                    .and(&dl)
                    .fold(0.0, |acc, du, dl| acc + (dl.conj() * du).re);
            });
            grads.insert_trainable(name.as_str(), grad)?;
        }
        Ok(grads)
    }
}
