//! For reading and writing the DCD trajectory format (CHARMM/NAMD, also written by OpenMM
//! and VMD). Only the coordinate sets are kept; no unit cell, velocities, or energies.
//!
//! Each record is a Fortran unformatted block: a u32 length, the payload, then the same
//! length again. All values are little-endian.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{self, Command},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use lin_alg::f32::Vec3;

use crate::TrajectorySource;

const MAX_PREALLOC_FRAMES: usize = 4_096;

pub struct DcdFrame {
    /// fs
    pub time: f64,
    pub atom_posits: Vec<Vec3>,
}

pub struct DcdTrajectory {
    pub frames: Vec<DcdFrame>,
}

impl DcdTrajectory {
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let n_atoms = self.frames.first().map_or(0, |f| f.atom_posits.len());

        if self.frames.iter().any(|f| f.atom_posits.len() != n_atoms) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "inconsistent atom counts",
            ));
        }

        let mut w = BufWriter::new(File::create(path)?);

        let delta = if self.frames.len() >= 2 {
            (self.frames[1].time - self.frames[0].time) as f32
        } else {
            0.
        };

        // "CORD", then 20 control words. Word 9 (0-based) is the timestep, as f32.
        let mut header = Vec::with_capacity(84);
        header.extend_from_slice(b"CORD");
        let mut icntrl = [0i32; 20];
        icntrl[0] = self.frames.len() as i32; // NSET
        icntrl[2] = 1; // NSAVC
        icntrl[19] = 24; // CHARMM version
        for v in icntrl {
            header.write_i32::<LittleEndian>(v)?;
        }
        header[4 + 36..4 + 40].copy_from_slice(&delta.to_le_bytes());
        write_record(&mut w, &header)?;

        let title = format!("Created by traj_dccm  NATOMS={n_atoms}");
        let mut title_block = Vec::with_capacity(4 + 80);
        title_block.write_i32::<LittleEndian>(1)?;
        let mut line = [b' '; 80];
        let n = title.len().min(80);
        line[..n].copy_from_slice(&title.as_bytes()[..n]);
        title_block.extend_from_slice(&line);
        write_record(&mut w, &title_block)?;

        write_record(&mut w, &(n_atoms as i32).to_le_bytes())?;

        let mut block = Vec::with_capacity(4 * n_atoms);
        for frame in &self.frames {
            for axis in 0..3 {
                block.clear();
                for p in &frame.atom_posits {
                    let v = match axis {
                        0 => p.x,
                        1 => p.y,
                        _ => p.z,
                    };
                    block.write_f32::<LittleEndian>(v)?;
                }
                write_record(&mut w, &block)?;
            }
        }

        w.flush()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let mut r = BufReader::new(File::open(path)?);

        let hdr = read_record(&mut r)?;
        if hdr.len() < 84 || &hdr[0..4] != b"CORD" {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Not a CORD/DCD file",
            ));
        }

        let mut icntrl = [0i32; 20];
        (&hdr[4..84]).read_i32_into::<LittleEndian>(&mut icntrl)?;
        let n_sets = icntrl[0].max(0) as usize;
        // Word 1 (ISTART) is ignored; times are relative to the first frame.
        let has_unit_cell = icntrl[10] != 0;
        let delta = (&hdr[4 + 36..4 + 40]).read_f32::<LittleEndian>()? as f64;

        // Title (ignored)
        let _ = read_record(&mut r)?;

        let natom_block = read_record(&mut r)?;
        if natom_block.len() != 4 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Unexpected NATOM block size",
            ));
        }
        let n_atoms = (&natom_block[..]).read_i32::<LittleEndian>()?.max(0) as usize;

        // NSET comes from the file; don't reserve more than a plausible amount up front.
        let mut frames = Vec::with_capacity(n_sets.min(MAX_PREALLOC_FRAMES));

        for i in 0..n_sets {
            if has_unit_cell {
                let _ = read_record(&mut r)?;
            }

            let xs = read_f32_record(&mut r, n_atoms)?;
            let ys = read_f32_record(&mut r, n_atoms)?;
            let zs = read_f32_record(&mut r, n_atoms)?;

            let atom_posits = (0..n_atoms)
                .map(|k| Vec3::new(xs[k], ys[k], zs[k]))
                .collect();

            frames.push(DcdFrame {
                time: i as f64 * delta,
                atom_posits,
            });
        }

        Ok(Self { frames })
    }

    /// Loads a GROMACS XTC file by converting it to DCD with `mdconvert`, from
    /// [MDTraj](https://www.mdtraj.org). It must be on the system path: `pip install mdtraj`.
    pub fn load_xtc(path: &Path) -> io::Result<Self> {
        let temp = temp_dcd_path();

        run_mdconvert(path, &temp)?;
        let traj = Self::load(&temp);
        let _ = fs::remove_file(&temp);

        traj
    }

    /// Saves as GROMACS XTC, via an intermediate DCD and `mdconvert`.
    pub fn save_xtc(&self, path: &Path) -> io::Result<()> {
        let temp = temp_dcd_path();

        self.save(&temp)?;
        let res = run_mdconvert(&temp, path);
        let _ = fs::remove_file(&temp);

        res
    }
}

impl TrajectorySource for DcdTrajectory {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn atom_count(&self) -> usize {
        self.frames.first().map_or(0, |f| f.atom_posits.len())
    }

    fn coordinates(&self, frame: usize) -> &[Vec3] {
        &self.frames[frame].atom_posits
    }
}

fn temp_dcd_path() -> PathBuf {
    std::env::temp_dir().join(format!("traj_dccm_{}.dcd", process::id()))
}

fn run_mdconvert(input: &Path, output: &Path) -> io::Result<()> {
    // mdconvert refuses to overwrite without -f.
    let out = Command::new("mdconvert")
        .arg("-f")
        .arg(input)
        .arg("-o")
        .arg(output)
        .output()?;

    if !out.status.success() {
        let stderr_str = String::from_utf8_lossy(&out.stderr);
        return Err(io::Error::other(format!(
            "Problem running mdconvert: {stderr_str}"
        )));
    }
    Ok(())
}

/// Payload sandwiched by its length.
fn write_record<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() as u32;

    w.write_u32::<LittleEndian>(len)?;
    w.write_all(payload)?;
    w.write_u32::<LittleEndian>(len)
}

fn read_record<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;

    // Grows with the data actually present, so a corrupt length can't force a huge allocation.
    let mut payload = Vec::new();
    r.by_ref().take(len as u64).read_to_end(&mut payload)?;
    if payload.len() != len {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("record holds {} of {len} bytes", payload.len()),
        ));
    }

    let len_end = r.read_u32::<LittleEndian>()? as usize;
    if len_end != len {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "record length mismatch",
        ));
    }
    Ok(payload)
}

fn read_f32_record<R: Read>(r: &mut R, n: usize) -> io::Result<Vec<f32>> {
    let block = read_record(r)?;
    if block.len() != 4 * n {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "Coordinate block size mismatch",
        ));
    }

    let mut out = vec![0f32; n];
    (&block[..]).read_f32_into::<LittleEndian>(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("traj.dcd");

        let frames = (0..5)
            .map(|i| DcdFrame {
                time: i as f64 * 2.,
                atom_posits: vec![
                    Vec3::new(i as f32, 0.5, -1.),
                    Vec3::new(3., i as f32 * 0.25, 7.5),
                ],
            })
            .collect();
        let traj = DcdTrajectory { frames };
        traj.save(&path).unwrap();

        let loaded = DcdTrajectory::load(&path).unwrap();
        assert_eq!(loaded.frame_count(), 5);
        assert_eq!(loaded.atom_count(), 2);
        assert_eq!(loaded.frames[3].time, 6.);

        let p = loaded.coordinates(4)[1];
        assert_eq!((p.x, p.y, p.z), (3., 1., 7.5));
    }

    #[test]
    fn corrupt_lengths_fail_without_allocating() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.dcd");

        // First record claims ~4 GB but only a few bytes follow.
        let mut bytes = (u32::MAX - 3).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"CORD");
        fs::write(&path, &bytes).unwrap();
        let err = DcdTrajectory::load(&path).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        // Valid header claiming i32::MAX frames, with no frames present.
        let traj = DcdTrajectory {
            frames: vec![DcdFrame {
                time: 0.,
                atom_posits: vec![Vec3::new(1., 2., 3.)],
            }],
        };
        traj.save(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        // Record marker (4) + "CORD" (4), then NSET.
        bytes[8..12].copy_from_slice(&i32::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(DcdTrajectory::load(&path).is_err());
    }

    #[test]
    fn rejects_non_dcd() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.dcd");
        fs::write(&path, b"not a trajectory at all").unwrap();

        assert!(DcdTrajectory::load(&path).is_err());
    }
}
