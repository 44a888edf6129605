use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

mod adapter;
mod config;
mod datatypes;
mod error;
mod launcher;
mod optimizer;
mod post_processor;
mod report;
mod workdir;

#[cfg(test)]
mod test_support;

use crate::{
    adapter::Adapter, datatypes::ParameterVector, error::WaterbombError,
    post_processor::detect,
};

/// Black-box optimization of a waterbomb shell's snap-through energy drop
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// log every optimizer iteration and solver detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: SubCmd,
}

#[derive(Subcommand)]
enum SubCmd {
    /// Run the optimization until the evaluation budget is spent
    Optimize(ConfigArgs),
    /// Evaluate a single design and print its fitness
    Evaluate(EvaluateArgs),
    /// Compute the energy drop of a solved design and append it to the report
    PostProcess(PostProcessArgs),
    /// Print the snap-through found in a history curve
    Detect(DetectArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON run configuration; defaults reproduce the reference experiment
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct EvaluateArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// rel_depth t1 t2 t3
    #[arg(num_args = 4, required = true, allow_negative_numbers = true)]
    params: Vec<f64>,
}

#[derive(Args)]
struct PostProcessArgs {
    /// two-column displacement,energy history export
    #[arg(long)]
    curve: PathBuf,

    /// report file to append to
    #[arg(long, default_value = "Report.txt")]
    report: PathBuf,

    /// rel_depth t1 t2 t3
    #[arg(num_args = 4, required = true, allow_negative_numbers = true)]
    params: Vec<f64>,
}

#[derive(Args)]
struct DetectArgs {
    /// two-column displacement,energy history export
    #[arg(long)]
    curve: PathBuf,
}

fn run(cli: Cli) -> Result<(), WaterbombError> {
    match cli.cmd {
        SubCmd::Optimize(args) => {
            let config = config::load_config(args.config.as_deref())?;
            let adapter = Adapter::new(&config)?;

            let summary = optimizer::run(&config, &adapter, cli.verbose)?;
            match summary.best_params {
                Some(best) => info!(
                    "best design {best} with fitness {} after {} evaluations",
                    summary.best_fitness, summary.evaluations
                ),
                None => info!("no design evaluated"),
            }
            info!(
                "evaluations written to {}",
                config.stats_path().display()
            );
        }
        SubCmd::Evaluate(args) => {
            let config = config::load_config(args.config.config.as_deref())?;
            let adapter = Adapter::new(&config)?;
            let params = ParameterVector::from_slice(&args.params)?;

            let fitness = adapter.evaluate(&params)?;
            println!("{fitness}");
        }
        SubCmd::PostProcess(args) => {
            let params = ParameterVector::from_slice(&args.params)?;
            post_processor::post_process(&args.curve, &params, &args.report)?;
        }
        SubCmd::Detect(args) => {
            let curve = post_processor::load_curve(&args.curve)?;
            match detect(&curve.displacement, &curve.energy) {
                Ok(snap) => println!(
                    "start {}\tend {}\tdelta {}",
                    snap.start, snap.end, snap.delta
                ),
                Err(err) => println!("{err}"),
            }
        }
    }

    Ok(())
}

/// post-process runs inside the FE tool, whose stdout must stay clean apart
/// from errors, so it ignores `--verbose`
fn log_level(cmd: &SubCmd, verbose: bool) -> log::Level {
    match (cmd, verbose) {
        (SubCmd::PostProcess(_), _) => log::Level::Error,
        (_, true) => log::Level::Debug,
        (_, false) => log::Level::Info,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = log_level(&cli.cmd, cli.verbose);
    if let Err(err) = simple_logger::init_with_level(level) {
        eprintln!("warning: logger unavailable: {err}");
    }

    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn post_process_stays_quiet_when_verbose() {
        let cli = parse(&[
            "waterbomb", "--verbose", "post-process", "--curve", "h.csv", "1.0", "0.1", "0.5", "0.9",
        ]);
        assert_eq!(log_level(&cli.cmd, cli.verbose), log::Level::Error);
    }

    #[test]
    fn verbose_raises_other_commands_to_debug() {
        let cli = parse(&["waterbomb", "-v", "detect", "--curve", "h.csv"]);
        assert_eq!(log_level(&cli.cmd, cli.verbose), log::Level::Debug);

        let cli = parse(&["waterbomb", "optimize"]);
        assert_eq!(log_level(&cli.cmd, cli.verbose), log::Level::Info);
    }
}
