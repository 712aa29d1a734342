//! `dccm`: writes windowed DCCM artifacts for one trajectory.
//!
//! ```text
//! dccm --dcd traj_CA.dcd --gro protein_CA_only.gro --out data/Rep_1
//! dccm --xtc traj_CA.xtc --gro protein_CA_only.gro --out data/Rep_1 --window-sizes 50,100
//! ```

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;
use traj_dccm::{
    Backend, DccmConfig, DccmError, SizeOutcome, TrailingWindow, Trajectory, dcd::DcdTrajectory,
    gro::Gro, process_trajectory,
};

#[derive(Clone, Copy, ValueEnum)]
enum TrailingArg {
    Extend,
    Separate,
    Discard,
}

impl From<TrailingArg> for TrailingWindow {
    fn from(t: TrailingArg) -> Self {
        match t {
            TrailingArg::Extend => Self::Extend,
            TrailingArg::Separate => Self::Separate,
            TrailingArg::Discard => Self::Discard,
        }
    }
}

#[derive(Parser)]
#[command(name = "dccm")]
#[command(version)]
#[command(about = "Windowed dynamic cross-correlation matrices from an MD trajectory", long_about = None)]
struct Cli {
    /// DCD trajectory
    #[arg(long, conflicts_with = "xtc", required_unless_present = "xtc")]
    dcd: Option<PathBuf>,

    /// GROMACS XTC trajectory; converted with MDTraj's `mdconvert`
    #[arg(long)]
    xtc: Option<PathBuf>,

    /// GRO topology providing one residue name per atom
    #[arg(long)]
    gro: Option<PathBuf>,

    /// Directory for the `dccm_data_{W}.bin` artifacts
    #[arg(long, short)]
    out: PathBuf,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated window sizes, in frames
    #[arg(long, value_delimiter = ',')]
    window_sizes: Option<Vec<usize>>,

    /// Handling of frames left over after the last full window
    #[arg(long, value_enum)]
    trailing: Option<TrailingArg>,

    /// Compute windows on a single thread
    #[arg(long)]
    serial: bool,

    /// Omit the residue label block
    #[arg(long)]
    no_labels: bool,
}

fn build_config(cli: &Cli) -> Result<DccmConfig, DccmError> {
    let mut config = match &cli.config {
        Some(path) => DccmConfig::load(path)?,
        None => DccmConfig::default(),
    };

    if let Some(sizes) = &cli.window_sizes {
        config.window_sizes = sizes.clone();
    }
    if let Some(t) = cli.trailing {
        config.trailing = t.into();
    }
    if cli.serial {
        config.backend = Backend::Serial;
    }
    if cli.no_labels {
        config.write_labels = false;
    }

    config.validate()?;
    Ok(config)
}

fn load_trajectory(cli: &Cli) -> Result<Trajectory, DccmError> {
    let dcd = match (&cli.dcd, &cli.xtc) {
        (Some(path), _) => DcdTrajectory::load(path)?,
        (None, Some(path)) => DcdTrajectory::load_xtc(path)?,
        (None, None) => return Err(DccmError::Config("no trajectory given".to_owned())),
    };

    Ok(match &cli.gro {
        Some(path) => Trajectory::from_dcd_and_gro(dcd, &Gro::load(path)?),
        None => dcd.into(),
    })
}

fn run(cli: &Cli) -> Result<bool, DccmError> {
    let config = build_config(cli)?;
    let traj = load_trajectory(cli)?;

    std::fs::create_dir_all(&cli.out)?;

    let reports = process_trajectory(&traj, &cli.out, &config)?;

    let mut all_ok = true;
    for report in &reports {
        match &report.outcome {
            Ok(SizeOutcome::Written { path, windows, .. }) => {
                println!("W={:<5} {windows} windows -> {}", report.window_size, path.display());
            }
            Ok(SizeOutcome::Empty { frame_count }) => {
                println!(
                    "W={:<5} no windows ({frame_count} frames available)",
                    report.window_size
                );
            }
            Err(e) => {
                println!("W={:<5} failed: {e}", report.window_size);
                all_ok = false;
            }
        }
    }

    Ok(all_ok)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
