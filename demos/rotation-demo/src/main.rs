//! Batch gradient ascent toward an X gate using the gate-set contract.
//!
//! This demo plays the external optimizer: it owns the step loop and the
//! loss, and talks to gate sets only through the `GateSet` trait. It also
//! shows a minimal custom gate set that relies on every provided default.

use std::error::Error;
use std::f64::consts::PI;

use gateset_contract::rotation::{PHI, THETA};
use gateset_contract::{
    BlockOperatorBatch, GateSet, GateSetConfig, GateSetError, GateSetResult, MultistartRun,
    ParameterSet, RotationGateSet,
};
use ndarray::{Array2, Array4, array, s};
use num_complex::Complex64;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const PARALLEL: usize = 8;
const LEARNING_RATE: f64 = 0.5;
const MAX_STEPS: usize = 300;
const TARGET_FIDELITY: f64 = 0.9999;

/// One virtual-Z rotation per block: `diag(e^{-iθ/2}, e^{iθ/2})`.
struct VirtualZGateSet {
    config: GateSetConfig,
}

impl GateSet for VirtualZGateSet {
    fn from_config(config: GateSetConfig) -> GateSetResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn config(&self) -> &GateSetConfig {
        &self.config
    }

    fn construct_block_operators(
        &self,
        params: &ParameterSet,
    ) -> GateSetResult<BlockOperatorBatch> {
        let angles = params.values("angle")?;
        let (n_blocks, starts) = angles.dim();
        if n_blocks != self.config.n_blocks {
            return Err(GateSetError::shape_mismatch(
                "angle",
                (self.config.n_blocks, starts),
                angles.dim(),
            ));
        }
        BlockOperatorBatch::new(Array4::from_shape_fn(
            (starts, n_blocks, 2, 2),
            |(m, b, i, j)| match (i, j) {
                (0, 0) => Complex64::from_polar(1.0, -angles[[b, m]] / 2.0),
                (1, 1) => Complex64::from_polar(1.0, angles[[b, m]] / 2.0),
                _ => Complex64::new(0.0, 0.0),
            },
        ))
    }

    fn create_initial_parameters(&self, parallel: usize) -> GateSetResult<ParameterSet> {
        let shape = self.batch_shape(parallel)?;
        let mut rng = rand::thread_rng();
        ParameterSet::new().with_trainable(
            "angle",
            Array2::from_shape_fn(shape.dim(), |_| rng.gen_range(-PI..PI)),
        )
    }
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn pauli_x() -> Array2<Complex64> {
    let zero = Complex64::new(0.0, 0.0);
    let one = Complex64::new(1.0, 0.0);
    array![[zero, one], [one, zero]]
}

fn identity(d: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((d, d), |(i, j)| {
        Complex64::new(if i == j { 1.0 } else { 0.0 }, 0.0)
    })
}

/// `∂F/∂Re U + i·∂F/∂Im U` of the average gate fidelity for every block.
///
/// With `z = Tr(T† U)` and `A = (blocks before b) · T† · (blocks after b)`,
/// the block gradient is `2 z conj(Aᵀ) / (d² + d)`.
fn fidelity_gradient(batch: &BlockOperatorBatch, target: &Array2<Complex64>) -> Array4<Complex64> {
    let (starts, n_blocks, d) = (batch.multistart(), batch.n_blocks(), batch.dim());
    let target_dag = target.t().mapv(|x| x.conj());
    let norm = 2.0 / (d * d + d) as f64;
    let mut grad = Array4::zeros(batch.as_array().dim());

    for m in 0..starts {
        // before[b] = U_{b-1}…U_0
        let mut before = vec![identity(d)];
        for b in 0..n_blocks {
            let next = batch.block(m, b).dot(&before[b]);
            before.push(next);
        }
        // after[b] = U_{N-1}…U_{b+1}
        let mut after = vec![identity(d); n_blocks];
        for b in (0..n_blocks.saturating_sub(1)).rev() {
            after[b] = after[b + 1].dot(&batch.block(m, b + 1));
        }

        let z = target_dag.dot(&before[n_blocks]).diag().sum();
        for b in 0..n_blocks {
            let a = before[b].dot(&target_dag).dot(&after[b]);
            let g = a.t().mapv(|x| x.conj() * z * norm);
            grad.slice_mut(s![m, b, .., ..]).assign(&g);
        }
    }
    grad
}

fn best_candidate(fidelities: &ndarray::Array1<f64>) -> (usize, f64) {
    fidelities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (m, f)| if f > best.1 { (m, f) } else { best })
}

fn optimize_x_gate() -> Result<(), Box<dyn Error>> {
    let target = pauli_x();
    let config = GateSetConfig::from_json_str(
        r#"{"N_blocks": 3, "name": "x_gate", "seed": 2024, "theta_scale": 1.0}"#,
    )?;
    let mut run = MultistartRun::new(RotationGateSet::from_config(config)?, PARALLEL)?;

    let mut best = (0, 0.0);
    for step in 0..MAX_STEPS {
        let batch = run.operators()?;
        best = best_candidate(&batch.gate_fidelities(&target)?);
        if best.1 >= TARGET_FIDELITY {
            info!(step, candidate = best.0, fidelity = best.1, "converged");
            break;
        }
        if step % 25 == 0 {
            info!(step, candidate = best.0, fidelity = best.1, "progress");
        }

        let derivatives = run.gate_set().block_operator_derivatives(run.parameters())?;
        let mut update = derivatives.contract(&fidelity_gradient(&batch, &target))?;
        for name in [THETA, PHI] {
            update.values_mut(name)?.mapv_inplace(|g| LEARNING_RATE * g);
        }
        run.apply_update(&update)?;
    }
    if best.1 < TARGET_FIDELITY {
        warn!(steps = run.steps(), fidelity = best.1, "stopped before reaching target");
    }

    println!("best candidate {} with fidelity {:.6}", best.0, best.1);
    let record = run.save_record()?;
    print!("{}", record.summary());
    Ok(())
}

fn custom_gate_set() -> Result<(), Box<dyn Error>> {
    let gate_set = VirtualZGateSet::from_config(GateSetConfig::new(2, "virtual_z"))?;
    let params = gate_set.create_initial_parameters(3)?;
    let batch = gate_set.construct_block_operators(&params)?;

    println!(
        "{}: {} candidates, {} blocks, mask: {}",
        gate_set.config().name,
        batch.multistart(),
        batch.n_blocks(),
        gate_set.create_optimization_mask(3)?.is_some()
    );
    match gate_set.block_operator_derivatives(&params) {
        Err(err) => println!("derivatives: {err}"),
        Ok(derivatives) => println!("derivatives for {} parameters", derivatives.len()),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging("info");
    optimize_x_gate()?;
    custom_gate_set()?;
    Ok(())
}
