use std::time::Duration;

use log::{debug, error, info};

use crate::{
    config::RunConfig,
    datatypes::{FitnessValue, ParameterVector},
    error::WaterbombError,
    launcher, report,
    workdir::WorkingDirectory,
};

/// Evaluation point handed to an objective callback by the optimizer
pub trait EvalPoint {
    /// Number of coordinates
    fn size(&self) -> usize;

    fn coord(&self, index: usize) -> f64;

    /// Records the objective value of this point
    fn set_output(&mut self, value: f64);
}

/// Black-box objective: one FE run per candidate design
pub struct Adapter {
    workdir: WorkingDirectory,
    command: Vec<String>,
    launch_template: String,
    timeout: Option<Duration>,
}

impl Adapter {
    pub fn new(config: &RunConfig) -> Result<Adapter, WaterbombError> {
        config.validate()?;

        Ok(Adapter {
            workdir: WorkingDirectory::new(config)?,
            command: config.command.clone(),
            launch_template: config.launch_template.clone(),
            timeout: config.timeout,
        })
    }

    /// Builds, solves and post-processes one design
    ///
    /// Transient files of the run are removed on every exit path.
    ///
    /// # Arguments
    /// * `params` - The candidate design
    ///
    /// # Returns
    /// The fitness read back from the report
    pub fn evaluate(&self, params: &ParameterVector) -> Result<FitnessValue, WaterbombError> {
        let scope = self.workdir.begin_run();
        let report_file = scope.workdir().report_file();

        let records_before = report::count_records(report_file)?;
        launcher::write_launch_script(scope.workdir().launch_script(), &self.launch_template, params)?;

        let output = launcher::run_solver(&self.command, scope.workdir().root(), self.timeout)?;
        if !output.stderr.is_empty() {
            debug!("solver stderr: {}", output.stderr.trim_end());
        }
        if !output.status.success() {
            let detail = output
                .stderr
                .lines()
                .chain(output.stdout.lines())
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output");
            return Err(WaterbombError::SolverInvocation(format!(
                "{} exited with {}: {detail}",
                self.command[0], output.status
            )));
        }

        // an orphaned run may append a record for some other design
        if report::count_records(report_file)? <= records_before
            || !report::last_record_is_for(report_file, params)?
        {
            return Err(WaterbombError::StaleReport(
                report_file.display().to_string(),
            ));
        }

        let fitness = report::parse_last_record(report_file, &output.stdout)?;
        info!("{params} -> fitness {fitness}");

        Ok(fitness)
    }

    /// Objective callback in the optimizer's calling convention
    ///
    /// # Returns
    /// `true` with the output set, or `false` with the output untouched when
    /// the evaluation failed
    pub fn callback<P: EvalPoint>(&self, point: &mut P) -> bool {
        let coords: Vec<f64> = (0..point.size()).map(|i| point.coord(i)).collect();

        let result = ParameterVector::from_slice(&coords).and_then(|x| self.evaluate(&x));
        match result {
            Ok(fitness) => {
                point.set_output(fitness.value());
                true
            }
            Err(err) => {
                error!("evaluation of {coords:?} failed: {err}");
                false
            }
        }
    }
}
