//! Minimal reader for GROMACS `.gro` coordinate/topology files. The pipeline only needs residue
//! names, but positions are parsed too so a single-frame GRO can stand in for a trajectory.
//!
//! Layout: a title line, the atom count, one fixed-column line per atom, then the box vectors.
//! Atom lines are `%5d%-5s%5s%5d%8.3f%8.3f%8.3f`, optionally followed by velocities.

use std::{
    fs,
    io::{self, ErrorKind},
    path::Path,
};

use lin_alg::f32::Vec3;

#[derive(Clone, Debug)]
pub struct GroAtom {
    pub residue_number: u32,
    /// e.g. "ALA"
    pub residue_name: String,
    /// e.g. "CA"
    pub atom_name: String,
    /// nm
    pub posit: Vec3,
}

#[derive(Clone, Debug)]
pub struct Gro {
    pub title: String,
    pub atoms: Vec<GroAtom>,
}

fn field<'a>(line: &'a str, start: usize, end: usize, name: &str, i: usize) -> io::Result<&'a str> {
    line.get(start..end.min(line.len()))
        .filter(|s| !s.trim().is_empty())
        .map(str::trim)
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("Missing {name} on GRO atom line {i}"),
            )
        })
}

fn parse_f32(s: &str, name: &str, i: usize) -> io::Result<f32> {
    s.parse().map_err(|_| {
        io::Error::new(
            ErrorKind::InvalidData,
            format!("Invalid {name} on GRO atom line {i}"),
        )
    })
}

impl Gro {
    pub fn new(text: &str) -> io::Result<Self> {
        let mut lines = text.lines();

        let title = lines.next().unwrap_or_default().trim().to_string();
        let n_atoms: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "Missing GRO atom count"))?;

        let mut atoms = Vec::with_capacity(n_atoms);
        for i in 0..n_atoms {
            let line = lines.next().ok_or_else(|| {
                io::Error::new(
                    ErrorKind::InvalidData,
                    format!("GRO file ends after {i} of {n_atoms} atoms"),
                )
            })?;

            // Residue numbers wrap at 99999 in large systems, but are always digits.
            let residue_number: u32 = field(line, 0, 5, "residue number", i)?
                .parse()
                .map_err(|_| {
                    io::Error::new(
                        ErrorKind::InvalidData,
                        format!("Invalid residue number on GRO atom line {i}"),
                    )
                })?;
            let residue_name = field(line, 5, 10, "residue name", i)?.to_string();
            let atom_name = field(line, 10, 15, "atom name", i)?.to_string();

            let x = parse_f32(field(line, 20, 28, "x coordinate", i)?, "x coordinate", i)?;
            let y = parse_f32(field(line, 28, 36, "y coordinate", i)?, "y coordinate", i)?;
            let z = parse_f32(field(line, 36, 44, "z coordinate", i)?, "z coordinate", i)?;

            atoms.push(GroAtom {
                residue_number,
                residue_name,
                atom_name,
                posit: Vec3::new(x, y, z),
            });
        }

        Ok(Self { title, atoms })
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let data_str = fs::read_to_string(path)?;
        Self::new(&data_str)
    }

    /// One per atom, in file order.
    pub fn residue_names(&self) -> Vec<String> {
        self.atoms.iter().map(|a| a.residue_name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CA_ONLY: &str = "\
Protein C-alpha in water t=   0.00000
    3
    1MET     CA    1   3.012   2.451   1.930
    2LYS     CA    2   3.245   2.702   2.201  0.1234 -0.2345  0.3456
    3HSD     CA    3   3.501   2.989   2.455
   7.12000   7.12000   7.12000
";

    #[test]
    fn parses_residues() {
        let gro = Gro::new(CA_ONLY).unwrap();

        assert_eq!(gro.atoms.len(), 3);
        assert_eq!(gro.residue_names(), vec!["MET", "LYS", "HSD"]);
        assert_eq!(gro.atoms[1].residue_number, 2);
        assert_eq!(gro.atoms[2].atom_name, "CA");
        assert!((gro.atoms[1].posit.y - 2.702).abs() < 1e-6);
    }

    #[test]
    fn malformed_residue_number() {
        let text = "title\n    1\n    xMET     CA    1   3.012   2.451   1.930\n   1.0   1.0   1.0\n";
        let err = Gro::new(text).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("residue number"));
    }

    #[test]
    fn truncated_file() {
        let text = "title\n    2\n    1MET     CA    1   3.012   2.451   1.930\n";
        assert!(Gro::new(text).is_err());
    }
}
