//! Runs a trajectory through windowing, correlation, and serialization, once per configured
//! window size. Each size is an independent unit: one failing doesn't stop the others.

use std::{
    collections::HashSet,
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    TrajectorySource,
    artifact::{DccmArtifact, artifact_filename, encode_labels},
    correlation::{Backend, dccm_for_windows},
    error::{DccmError, Result},
    validate_source,
    window::{TrailingWindow, Windows},
};

pub const DEFAULT_WINDOW_SIZES: [usize; 7] = [25, 50, 100, 200, 400, 800, 1600];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DccmConfig {
    /// Processed in this order; each produces its own artifact.
    pub window_sizes: Vec<usize>,
    pub trailing: TrailingWindow,
    pub backend: Backend,
    /// Write the residue label block when the source has names.
    pub write_labels: bool,
}

impl Default for DccmConfig {
    fn default() -> Self {
        Self {
            window_sizes: DEFAULT_WINDOW_SIZES.to_vec(),
            trailing: TrailingWindow::default(),
            backend: Backend::default(),
            write_labels: true,
        }
    }
}

impl DccmConfig {
    /// Loads from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_sizes.is_empty() {
            return Err(DccmError::Config("no window sizes".to_owned()));
        }
        if self.window_sizes.contains(&0) {
            return Err(DccmError::InvalidWindowSize);
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.window_sizes.iter().find(|w| !seen.insert(**w)) {
            return Err(DccmError::Config(format!("window size {dup} listed twice")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeOutcome {
    Written {
        path: PathBuf,
        windows: usize,
        bytes: u64,
    },
    /// The window size exceeds the frame count, so there's nothing to write.
    Empty { frame_count: usize },
}

#[derive(Debug)]
pub struct SizeReport {
    pub window_size: usize,
    pub outcome: Result<SizeOutcome>,
}

/// Builds the artifact for one window size in memory. `Ok(None)` means zero windows.
/// Ragged or empty sources fail with [`DccmError::InputShape`].
pub fn compute_artifact<T: TrajectorySource + ?Sized>(
    src: &T,
    window_size: usize,
    config: &DccmConfig,
) -> Result<Option<DccmArtifact>> {
    validate_source(src)?;

    let windows: Vec<Range<usize>> =
        Windows::new(src.frame_count(), window_size, config.trailing)?.collect();

    if windows.is_empty() {
        return Ok(None);
    }

    let labels = match src.residue_names() {
        Some(names) if config.write_labels => Some(encode_labels(names)?),
        _ => None,
    };

    let matrices = dccm_for_windows(src, &windows, config.backend)?;

    DccmArtifact::new(src.atom_count(), labels, &matrices).map(Some)
}

fn process_window_size<T: TrajectorySource + ?Sized>(
    src: &T,
    out_dir: &Path,
    window_size: usize,
    config: &DccmConfig,
) -> Result<SizeOutcome> {
    let Some(artifact) = compute_artifact(src, window_size, config)? else {
        return Ok(SizeOutcome::Empty {
            frame_count: src.frame_count(),
        });
    };

    let path = out_dir.join(artifact_filename(window_size));
    let bytes = artifact.save(&path)?;

    let n = artifact.atom_count;
    let dense = artifact.window_count() * n * n * 4;
    info!(
        "Saved {}: {} windows of {n}×{n}; {:.2} KB compacted vs {:.2} KB dense",
        path.display(),
        artifact.window_count(),
        bytes as f64 / 1024.,
        dense as f64 / 1024.,
    );

    Ok(SizeOutcome::Written {
        path,
        windows: artifact.window_count(),
        bytes,
    })
}

/// Writes one artifact per configured window size into `out_dir`.
///
/// Returns `Err` only for problems with the input or the config, before any file is written.
/// Per-size failures (write errors, non-finite windows) land in that size's [`SizeReport`].
pub fn process_trajectory<T: TrajectorySource + ?Sized>(
    src: &T,
    out_dir: &Path,
    config: &DccmConfig,
) -> Result<Vec<SizeReport>> {
    config.validate()?;
    validate_source(src)?;

    // Labels are checked up front too, so a bad name fails the run instead of every size.
    if config.write_labels {
        if let Some(names) = src.residue_names() {
            encode_labels(names)?;
        }
    }

    info!(
        "Processing {} frames of {} atoms; window sizes {:?}",
        src.frame_count(),
        src.atom_count(),
        config.window_sizes
    );

    let reports = config
        .window_sizes
        .iter()
        .map(|&window_size| {
            let outcome = process_window_size(src, out_dir, window_size, config);

            match &outcome {
                Ok(SizeOutcome::Empty { frame_count }) => warn!(
                    "Window size {window_size} exceeds the {frame_count} frames available; skipped"
                ),
                Err(e) => warn!("Window size {window_size} failed: {e}"),
                _ => (),
            }

            SizeReport {
                window_size,
                outcome,
            }
        })
        .collect();

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_fill_in() {
        let cfg: DccmConfig = serde_json::from_str(r#"{"window_sizes": [10, 20]}"#).unwrap();

        assert_eq!(cfg.window_sizes, vec![10, 20]);
        assert_eq!(cfg.trailing, TrailingWindow::Extend);
        assert_eq!(cfg.backend, Backend::Parallel);
        assert!(cfg.write_labels);
    }

    #[test]
    fn config_enums_lowercase() {
        let cfg: DccmConfig =
            serde_json::from_str(r#"{"trailing": "discard", "backend": "serial"}"#).unwrap();

        assert_eq!(cfg.trailing, TrailingWindow::Discard);
        assert_eq!(cfg.backend, Backend::Serial);
        assert_eq!(cfg.window_sizes, DEFAULT_WINDOW_SIZES.to_vec());
    }

    #[test]
    fn config_validation() {
        let mut cfg = DccmConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.window_sizes = vec![25, 0];
        assert!(matches!(cfg.validate(), Err(DccmError::InvalidWindowSize)));

        cfg.window_sizes = vec![25, 50, 25];
        assert!(matches!(cfg.validate(), Err(DccmError::Config(_))));

        cfg.window_sizes.clear();
        assert!(matches!(cfg.validate(), Err(DccmError::Config(_))));
    }
}
