use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use std::process::ExitCode;
use tracing::error;

use queuestation::{
    analyzer::{
        compare,
        estimator::{chi_square_test, correlation, MarginalEstimate},
        pool_reports, run_replications, QueueMetrics,
    },
    error::{Result, StationError},
    logging::init_logging,
    parser::yaml_parser::{parse_config, Config, JointConfig},
    utils::joint::JointSampler,
};

const MATRIX_SIZES: [usize; 4] = [100, 1_000, 10_000, 100_000];
const MEAN_CONFIDENCES: [f64; 4] = [0.9, 0.95, 0.98, 0.99];
const VARIANCE_QUANTILES: [(f64, f64); 3] = [(0.025, 0.975), (0.01, 0.99), (0.005, 0.995)];

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Command,

    /// Log level for this crate, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Simulate the station and compare it with the steady-state formulas
    Simulate {
        /// Path to the Yaml configuration file
        #[arg(short, long)]
        config: String,

        #[arg(short, long)]
        seed: Option<u64>,

        /// Simulated time per replication
        #[arg(long)]
        horizon: Option<f64>,

        #[arg(short, long)]
        replications: Option<usize>,
    },
    /// Run the two-dimensional sampling experiment of the `joint` section
    Sample {
        /// Path to the Yaml configuration file
        #[arg(short, long)]
        config: String,

        #[arg(short, long)]
        seed: Option<u64>,
    },
}

fn print_metrics(label: &str, metrics: &QueueMetrics) {
    println!("{label}:");
    for (k, p) in metrics.probabilities.iter().enumerate() {
        println!("  p{k} = {p:.5}");
    }
    println!("  rejection probability = {:.5}", metrics.rejection_probability);
    println!("  relative throughput = {:.5}", metrics.relative_throughput);
    println!("  throughput = {:.5}", metrics.throughput);
    println!("  abandonment probability = {:.5}", metrics.abandonment_probability);
    println!("  effective throughput = {:.5}", metrics.effective_throughput);
    println!("  mean requests in system = {:.5}", metrics.mean_occupancy);
    println!("  mean queue length = {:.5}", metrics.mean_queue_length);
    println!("  mean busy channels = {:.5}", metrics.mean_busy_channels);
    println!("  mean time in system = {:.5}", metrics.mean_time_in_system);
    println!("  mean time in queue = {:.5}", metrics.mean_time_in_queue);
}

fn simulate(
    mut config: Config,
    seed: Option<u64>,
    horizon: Option<f64>,
    replications: Option<usize>,
) -> Result<()> {
    let simulation = &mut config.simulation;
    simulation.seed = seed.unwrap_or(simulation.seed);
    simulation.horizon = horizon.unwrap_or(simulation.horizon);
    simulation.replications = replications.unwrap_or(simulation.replications);

    let station = &config.station;
    println!(
        "channels = {}, queue capacity = {}, lambda = {}, mu = {}, nu = {}",
        station.channels,
        station.queue_capacity,
        station.arrival_rate,
        station.service_rate,
        station.abandonment_rate
    );

    let bar = ProgressBar::new(config.simulation.replications as u64);
    let reports = run_replications(station, &config.simulation, &bar)?;
    let pooled = pool_reports(&reports);
    println!(
        "#arrivals: {}, #completed: {}, #rejected: {}, #abandoned: {}",
        pooled.arrivals(),
        pooled.completed_count(),
        pooled.rejected_count(),
        pooled.abandoned_count()
    );

    let comparison = compare(station, &pooled)?;
    print_metrics("empirical", &comparison.empirical);
    print_metrics("theoretical", &comparison.theoretical);
    println!(
        "max probability deviation = {:.5}",
        comparison.max_probability_deviation()
    );
    Ok(())
}

fn print_matrix(matrix: &Array2<f64>) {
    for row in matrix.rows() {
        let cells: Vec<String> = row.iter().map(|p| format!("{p:.4}")).collect();
        println!("  [{}]", cells.join(", "));
    }
}

fn print_intervals(name: &str, estimate: &MarginalEstimate) -> Result<()> {
    println!(
        "{name}: n = {}, mean = {:.5}, variance = {:.5}",
        estimate.n, estimate.mean, estimate.variance
    );
    for confidence in MEAN_CONFIDENCES {
        let (margin, interval) = estimate.mean_interval(confidence)?;
        println!(
            "  mean at {confidence}: [{:.5}, {:.5}] (margin {margin:.5})",
            interval.lower, interval.upper
        );
    }
    for quantiles in VARIANCE_QUANTILES {
        let interval = estimate.variance_interval(quantiles)?;
        println!(
            "  variance at {:.3}: [{:.5}, {:.5}]",
            quantiles.1 - quantiles.0,
            interval.lower,
            interval.upper
        );
    }
    Ok(())
}

fn sample(joint: JointConfig, seed: u64) -> Result<()> {
    let sampler = JointSampler::new(joint.probabilities, joint.rows, joint.columns)?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    println!("theoretical matrix:");
    print_matrix(sampler.probabilities());
    for n in MATRIX_SIZES {
        println!("empirical matrix (n = {n}):");
        print_matrix(&sampler.empirical_matrix(n, &mut rng)?);
    }

    let draws = sampler.sample_n(joint.draws, &mut rng);
    let xs: Vec<f64> = draws.iter().map(|(x, _)| *x as f64).collect();
    let ys: Vec<f64> = draws.iter().map(|(_, y)| *y as f64).collect();
    let x = MarginalEstimate::from_sample(&xs)?;
    let y = MarginalEstimate::from_sample(&ys)?;
    print_intervals("x", &x)?;
    print_intervals("y", &y)?;

    let empirical = sampler.frequencies(&draws)?;
    let r = correlation(
        &empirical,
        &sampler.rows(),
        &sampler.columns(),
        x.mean,
        y.mean,
        x.variance,
        y.variance,
    )?;
    println!("correlation = {r:.5}");

    let test = chi_square_test(sampler.probabilities(), &empirical, draws.len())?;
    println!(
        "chi-square statistic = {:.5}, critical value = {:.5}: {}",
        test.statistic,
        test.critical_value,
        if test.not_rejected {
            "the sample agrees with the table"
        } else {
            "the sample contradicts the table"
        }
    );
    Ok(())
}

fn execute(args: Arguments) -> Result<()> {
    match args.command {
        Command::Simulate {
            config,
            seed,
            horizon,
            replications,
        } => simulate(parse_config(Path::new(&config))?, seed, horizon, replications),
        Command::Sample { config, seed } => {
            let config = parse_config(Path::new(&config))?;
            let seed = seed.unwrap_or(config.simulation.seed);
            let joint = config.joint.ok_or_else(|| {
                StationError::InvalidConfiguration("configuration has no `joint` section".into())
            })?;
            sample(joint, seed)
        }
    }
}

pub fn main() -> ExitCode {
    let args = Arguments::parse();
    init_logging(&args.log_level);
    match execute(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
