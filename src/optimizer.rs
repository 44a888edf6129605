use std::{cell::RefCell, io::Write};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        CostFunction, Error, Executor, State, KV,
    },
    solver::neldermead::NelderMead,
};
use argmin_observer_slog::SlogLogger;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

use crate::{
    adapter::{Adapter, EvalPoint},
    config::RunConfig,
    datatypes::{float_repr, FitnessValue, ParameterVector, DIM},
    error::WaterbombError,
};

/// Outcome of an optimization run
#[derive(Debug, Clone)]
pub struct OptimizationSummary {
    pub best_params: Option<ParameterVector>,
    pub best_fitness: FitnessValue,
    pub evaluations: usize,
}

/// Point proposed by the optimizer, as seen by the adapter callback
struct Candidate {
    coords: Vec<f64>,
    output: Option<f64>,
}

impl EvalPoint for Candidate {
    fn size(&self) -> usize {
        self.coords.len()
    }

    fn coord(&self, index: usize) -> f64 {
        self.coords[index]
    }

    fn set_output(&mut self, value: f64) {
        self.output = Some(value);
    }
}

/// Every black-box evaluation of the run, mirrored into the stats file
struct EvaluationLog {
    count: usize,
    best: Option<(ParameterVector, FitnessValue)>,
    stats: Option<std::fs::File>,
}

impl EvaluationLog {
    fn new(stats: Option<std::fs::File>) -> EvaluationLog {
        EvaluationLog {
            count: 0,
            best: None,
            stats,
        }
    }

    /// Writes `BBE ( x0 x1 x2 x3 ) OBJ`
    fn record(
        &mut self,
        params: &ParameterVector,
        fitness: FitnessValue,
    ) -> Result<(), WaterbombError> {
        let coords: Vec<String> = params.to_array().iter().map(|c| float_repr(*c)).collect();
        info!("eval {}: ( {} ) {}", self.count, coords.join(" "), fitness);

        if let Some(stats) = self.stats.as_mut() {
            writeln!(stats, "{} ( {} ) {}", self.count, coords.join(" "), fitness)?;
        }

        let improved = match self.best {
            Some((_, best)) => fitness < best,
            None => true,
        };
        if improved {
            self.best = Some((*params, fitness));
        }

        Ok(())
    }
}

/// Bounded black-box objective seen by argmin
struct BlackBoxProblem<'a> {
    adapter: &'a Adapter,
    lower_bounds: [f64; DIM],
    upper_bounds: [f64; DIM],
    budget: usize,
    log: &'a RefCell<EvaluationLog>,
    bar: ProgressBar,
}

impl CostFunction for BlackBoxProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let params = ParameterVector::from_slice(param)?;

        // extreme barrier: infeasible points are never sent to the solver
        if !params.within_bounds(&self.lower_bounds, &self.upper_bounds) {
            debug!("{params} is outside the bounds");
            return Ok(f64::INFINITY);
        }

        if self.log.borrow().count >= self.budget {
            return Err(Error::new(WaterbombError::BudgetExhausted(self.budget)));
        }
        self.log.borrow_mut().count += 1;

        let mut candidate = Candidate {
            coords: param.clone(),
            output: None,
        };
        let fitness = if self.adapter.callback(&mut candidate) {
            candidate
                .output
                .and_then(FitnessValue::new)
                .unwrap_or(FitnessValue::PENALTY)
        } else {
            FitnessValue::PENALTY
        };

        self.log.borrow_mut().record(&params, fitness)?;
        self.bar.inc(1);

        Ok(fitness.value())
    }
}

/// Shows the best objective so far next to the evaluation count
struct BestCostObserver {
    bar: ProgressBar,
}

impl<I> Observe<I> for BestCostObserver
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        self.bar.set_message("best: none");
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        self.bar
            .set_message(format!("best: {}", float_repr(state.get_best_cost())));
        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Starting simplex: the initial point plus one step along each parameter,
/// sized as a fraction of the bound range and kept inside the bounds
pub fn initial_simplex(config: &RunConfig) -> Vec<Vec<f64>> {
    let x0 = config.initial_point.to_vec();
    let mut simplex = vec![x0.clone()];

    for i in 0..DIM {
        let range = config.upper_bounds[i] - config.lower_bounds[i];
        let step = if range > 0.0 {
            config.simplex_step * range
        } else {
            config.simplex_step
        };

        let mut vertex = x0.clone();
        vertex[i] = if x0[i] + step <= config.upper_bounds[i] {
            x0[i] + step
        } else {
            x0[i] - step
        };
        simplex.push(vertex);
    }

    simplex
}

/// Runs the derivative-free search with the adapter as objective
///
/// # Arguments
/// * `config` - Bounds, initial point and evaluation budget
/// * `adapter` - The black-box objective
/// * `verbose` - Log every optimizer iteration
pub fn run(
    config: &RunConfig,
    adapter: &Adapter,
    verbose: bool,
) -> Result<OptimizationSummary, WaterbombError> {
    config.validate()?;

    let stats = match std::fs::File::create(config.stats_path()) {
        Ok(f) => Some(f),
        Err(err) => {
            warn!(
                "unable to create stats file {}: {err}",
                config.stats_path().display()
            );
            None
        }
    };
    let log = RefCell::new(EvaluationLog::new(stats));

    let bar = if verbose {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(config.max_evaluations as u64)
    };
    if let Ok(style) = ProgressStyle::with_template("{wide_bar} {pos}/{len} evaluations, {msg}") {
        bar.set_style(style);
    }

    let problem = BlackBoxProblem {
        adapter,
        lower_bounds: config.lower_bounds,
        upper_bounds: config.upper_bounds,
        budget: config.max_evaluations,
        log: &log,
        bar: bar.clone(),
    };

    let solver: NelderMead<Vec<f64>, f64> = match NelderMead::new(initial_simplex(config))
        .with_sd_tolerance(config.sd_tolerance)
    {
        Ok(s) => s,
        Err(err) => {
            return Err(WaterbombError::Optimizer(format!(
                "Nelder-Mead setup failed: {err}"
            )))
        }
    };

    info!(
        "optimizing {} from {} with a budget of {} evaluations",
        config.project,
        ParameterVector::from_slice(&config.initial_point)?,
        config.max_evaluations
    );

    // Out-of-bounds proposals cost no evaluation, so iterations can outnumber them
    let max_iters = (config.max_evaluations as u64).saturating_mul(DIM as u64 + 1);
    let mut executor = Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iters))
        .add_observer(BestCostObserver { bar: bar.clone() }, ObserverMode::NewBest);
    if verbose {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }

    match executor.run() {
        Ok(res) => info!(
            "optimizer stopped after {} iterations",
            res.state.get_iter()
        ),
        Err(err) => match err.downcast_ref::<WaterbombError>() {
            Some(WaterbombError::BudgetExhausted(n)) => {
                info!("evaluation budget of {n} reached")
            }
            _ => return Err(WaterbombError::Optimizer(err.to_string())),
        },
    }
    bar.finish();

    let log = log.into_inner();
    let summary = match log.best {
        Some((params, fitness)) => OptimizationSummary {
            best_params: Some(params),
            best_fitness: fitness,
            evaluations: log.count,
        },
        None => OptimizationSummary {
            best_params: None,
            best_fitness: FitnessValue::PENALTY,
            evaluations: log.count,
        },
    };

    Ok(summary)
}
