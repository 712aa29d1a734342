//! Windowed dynamic cross-correlation matrices (DCCM) from molecular dynamics trajectories,
//! stored as a dense binary artifact of upper-triangular matrices.
//!
//! The pipeline is: frames → [`Windows`] → [`CorrMatrix`] per window → [`CompactMatrix`] →
//! [`DccmArtifact`] on disk. See [`process_trajectory`] for the full run over several window sizes.

pub mod artifact;
pub mod compact;
pub mod correlation;
pub mod dcd;
mod error;
pub mod gro;
pub mod pipeline;
pub mod window;

use lin_alg::f32::Vec3;

pub use artifact::*;
pub use compact::*;
pub use correlation::*;
pub use error::{DccmError, Result};
pub use pipeline::*;
pub use window::*;

use crate::{dcd::DcdTrajectory, gro::Gro};

/// The narrow view of a trajectory the pipeline needs. Implement this over any reader.
/// Every frame must hold exactly `atom_count()` positions, in the same atom order.
pub trait TrajectorySource: Sync {
    fn frame_count(&self) -> usize;

    fn atom_count(&self) -> usize;

    /// Positions for one frame. Å, or whatever unit the reader uses; DCCM is scale-invariant.
    fn coordinates(&self, frame: usize) -> &[Vec3];

    /// One residue name per atom, if the source has topology data.
    fn residue_names(&self) -> Option<&[String]> {
        None
    }
}

/// Checks the invariants from [`TrajectorySource`], plus that there is something to process.
pub fn validate_source<T: TrajectorySource + ?Sized>(src: &T) -> Result<()> {
    let n_frames = src.frame_count();
    let n_atoms = src.atom_count();

    if n_frames == 0 {
        return Err(DccmError::input_shape("trajectory has no frames"));
    }
    if n_atoms == 0 {
        return Err(DccmError::input_shape("trajectory has no atoms"));
    }

    for i in 0..n_frames {
        let len = src.coordinates(i).len();
        if len != n_atoms {
            return Err(DccmError::input_shape(format!(
                "frame {i} has {len} atoms; expected {n_atoms}"
            )));
        }
    }

    if let Some(names) = src.residue_names() {
        if names.len() != n_atoms {
            return Err(DccmError::input_shape(format!(
                "{} residue names for {n_atoms} atoms",
                names.len()
            )));
        }
    }

    Ok(())
}

/// An in-memory trajectory: frames of positions, and optionally a residue name per atom.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    pub frames: Vec<Vec<Vec3>>,
    pub residue_names: Option<Vec<String>>,
}

impl Trajectory {
    pub fn new(frames: Vec<Vec<Vec3>>) -> Self {
        Self {
            frames,
            residue_names: None,
        }
    }

    pub fn with_residue_names(mut self, names: Vec<String>) -> Self {
        self.residue_names = Some(names);
        self
    }

    /// Pairs DCD coordinates with residue names from a GRO topology. Atom counts are checked
    /// by [`validate_source`] when the trajectory is processed.
    pub fn from_dcd_and_gro(dcd: DcdTrajectory, gro: &Gro) -> Self {
        Self::from(dcd).with_residue_names(gro.residue_names())
    }
}

impl From<DcdTrajectory> for Trajectory {
    fn from(dcd: DcdTrajectory) -> Self {
        Self::new(dcd.frames.into_iter().map(|f| f.atom_posits).collect())
    }
}

impl TrajectorySource for Trajectory {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn atom_count(&self) -> usize {
        self.frames.first().map_or(0, |f| f.len())
    }

    fn coordinates(&self, frame: usize) -> &[Vec3] {
        &self.frames[frame]
    }

    fn residue_names(&self) -> Option<&[String]> {
        self.residue_names.as_deref()
    }
}
