//! The DCCM binary artifact: one per (trajectory, window size). All values little-endian,
//! no padding or alignment.
//!
//! | offset     | size              | field                                  |
//! |------------|-------------------|----------------------------------------|
//! | 0          | 4                 | `N` windows, u32                       |
//! | 4          | 4                 | `A` atoms, u32                         |
//! | 8          | 4                 | format tag, u32 (1: f32 upper triangle) |
//! | 12         | 4·A (optional)    | residue labels, UTF-8, NUL-padded      |
//! | 12 (+4·A)  | 4·N·A(A+1)/2      | compacted matrices, f32, window order  |
//!
//! The header doesn't flag the label block; readers tell from the file length.

use std::{
    fmt,
    fs::{self, File},
    io::{self, BufWriter, Cursor, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    compact::{CompactMatrix, triu_len},
    correlation::CorrMatrix,
    error::{DccmError, Result},
};

pub const HEADER_SIZE: usize = 12;
pub const LABEL_WIDTH: usize = 4;
/// Single-precision, upper-triangular (with diagonal) DCCM.
pub const FORMAT_TAG_F32_TRIU: u32 = 1;

/// Output file name used for a given window size.
pub fn artifact_filename(window_size: usize) -> String {
    format!("dccm_data_{window_size}.bin")
}

/// A residue name, stored as exactly 4 bytes of UTF-8 padded with NULs.
#[cfg_attr(feature = "encode", derive(bincode::Encode, bincode::Decode))]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResidueLabel([u8; LABEL_WIDTH]);

impl ResidueLabel {
    /// Names over 4 bytes are rejected rather than truncated, since a cut could land inside
    /// a multi-byte character.
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > LABEL_WIDTH {
            return Err(DccmError::LabelTooLong {
                name: name.to_owned(),
                len: bytes.len(),
            });
        }
        if bytes.contains(&0) {
            return Err(DccmError::InvalidLabel(name.to_owned()));
        }

        let mut buf = [0; LABEL_WIDTH];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn from_bytes(bytes: [u8; LABEL_WIDTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LABEL_WIDTH] {
        &self.0
    }

    /// The name without padding. Bytes that aren't valid UTF-8 are replaced.
    pub fn name(&self) -> String {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(LABEL_WIDTH);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for ResidueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResidueLabel({:?})", self.name())
    }
}

impl fmt::Display for ResidueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Encodes a full set of residue names. Fails on the first name that doesn't fit.
pub fn encode_labels<S: AsRef<str>>(names: &[S]) -> Result<Vec<ResidueLabel>> {
    names.iter().map(|n| ResidueLabel::new(n.as_ref())).collect()
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArtifactHeader {
    pub window_count: u32,
    pub atom_count: u32,
    pub format_tag: u32,
}

impl ArtifactHeader {
    pub fn read<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            window_count: r.read_u32::<LittleEndian>()?,
            atom_count: r.read_u32::<LittleEndian>()?,
            format_tag: r.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.window_count)?;
        w.write_u32::<LittleEndian>(self.atom_count)?;
        w.write_u32::<LittleEndian>(self.format_tag)
    }
}

fn to_u32(what: &'static str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| DccmError::HeaderOverflow { what, value })
}

/// Header, optional residue labels, and one compacted DCCM per window, in window order.
#[cfg_attr(feature = "encode", derive(bincode::Encode, bincode::Decode))]
#[derive(Clone, Debug, PartialEq)]
pub struct DccmArtifact {
    pub atom_count: usize,
    pub residue_labels: Option<Vec<ResidueLabel>>,
    pub windows: Vec<CompactMatrix>,
}

impl DccmArtifact {
    /// Compacts each matrix. All must be `atom_count × atom_count`, and labels, if present,
    /// must number `atom_count`.
    pub fn new(
        atom_count: usize,
        residue_labels: Option<Vec<ResidueLabel>>,
        matrices: &[CorrMatrix],
    ) -> Result<Self> {
        if let Some(labels) = &residue_labels {
            if labels.len() != atom_count {
                return Err(DccmError::input_shape(format!(
                    "{} residue labels for {atom_count} atoms",
                    labels.len()
                )));
            }
        }
        if let Some(m) = matrices.iter().find(|m| m.n != atom_count) {
            return Err(DccmError::input_shape(format!(
                "{0}×{0} matrix in an artifact of {atom_count} atoms",
                m.n
            )));
        }

        Ok(Self {
            atom_count,
            residue_labels,
            windows: matrices.iter().map(CompactMatrix::from).collect(),
        })
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn header(&self) -> Result<ArtifactHeader> {
        Ok(ArtifactHeader {
            window_count: to_u32("window count", self.windows.len())?,
            atom_count: to_u32("atom count", self.atom_count)?,
            format_tag: FORMAT_TAG_F32_TRIU,
        })
    }

    /// Exact size of the encoded artifact, in bytes.
    pub fn encoded_len(&self) -> usize {
        let labels = if self.residue_labels.is_some() {
            LABEL_WIDTH * self.atom_count
        } else {
            0
        };
        HEADER_SIZE + labels + 4 * self.windows.len() * triu_len(self.atom_count)
    }

    /// The full symmetric matrix for window `index`.
    pub fn matrix(&self, index: usize) -> Result<CorrMatrix> {
        self.windows
            .get(index)
            .map(CompactMatrix::expand)
            .ok_or(DccmError::WindowOutOfRange {
                index,
                count: self.windows.len(),
            })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let header = self.header()?;
        let per_window = triu_len(self.atom_count);

        header.write(w)?;

        if let Some(labels) = &self.residue_labels {
            for label in labels {
                w.write_all(label.as_bytes())?;
            }
        }

        for (i, win) in self.windows.iter().enumerate() {
            if win.values.len() != per_window {
                return Err(DccmError::input_shape(format!(
                    "window {i} has {} values; expected {per_window}",
                    win.values.len()
                )));
            }
            for v in &win.values {
                w.write_f32::<LittleEndian>(*v)?;
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(DccmError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut r = Cursor::new(bytes);
        let header = ArtifactHeader::read(&mut r)?;

        if header.format_tag != FORMAT_TAG_F32_TRIU {
            return Err(DccmError::UnsupportedFormat(header.format_tag));
        }

        let n_windows = header.window_count as usize;
        let n_atoms = header.atom_count as usize;

        if n_atoms == 0 && n_windows > 0 {
            return Err(DccmError::Corrupt(format!(
                "{n_windows} windows of zero atoms"
            )));
        }

        // Header values are untrusted; every size is checked before anything is allocated.
        let sizes = (|| {
            let per_window = n_atoms.checked_mul(n_atoms.checked_add(1)?)? / 2;
            let payload = n_windows.checked_mul(per_window)?.checked_mul(4)?;
            let bare = payload.checked_add(HEADER_SIZE)?;
            let labeled = bare.checked_add(n_atoms.checked_mul(LABEL_WIDTH)?)?;
            Some((per_window, bare, labeled))
        })();
        let Some((per_window, bare, labeled)) = sizes else {
            return Err(DccmError::Corrupt(format!(
                "{n_windows} windows of {n_atoms} atoms overflow the addressable size"
            )));
        };

        let has_labels = match bytes.len() {
            // With zero atoms the two layouts coincide; treat as unlabeled.
            l if l == bare => false,
            l if l == labeled => true,
            l => {
                return Err(DccmError::Truncated {
                    expected: labeled,
                    actual: l,
                });
            }
        };

        let residue_labels = if has_labels {
            let mut labels = Vec::with_capacity(n_atoms);
            for _ in 0..n_atoms {
                let mut buf = [0; LABEL_WIDTH];
                r.read_exact(&mut buf)?;
                labels.push(ResidueLabel::from_bytes(buf));
            }
            Some(labels)
        } else {
            None
        };

        let mut windows = Vec::with_capacity(n_windows);
        for _ in 0..n_windows {
            let mut values = vec![0f32; per_window];
            r.read_f32_into::<LittleEndian>(&mut values)?;
            windows.push(CompactMatrix { n: n_atoms, values });
        }

        Ok(Self {
            atom_count: n_atoms,
            residue_labels,
            windows,
        })
    }

    /// Writes to a sibling `.tmp` file, syncs it, then renames it over `path`, so readers
    /// never see a partial artifact. On Unix the parent directory is synced after the rename,
    /// so the new name survives a crash. Returns the number of bytes written.
    pub fn save(&self, path: &Path) -> Result<u64> {
        let tmp = tmp_path(path);

        let res = (|| -> Result<u64> {
            let file = File::create(&tmp)?;
            let mut w = BufWriter::new(file);
            self.write(&mut w)?;

            let file = w.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            let len = file.metadata()?.len();
            drop(file);

            fs::rename(&tmp, path)?;
            sync_parent_dir(path)?;
            Ok(len)
        })();

        if res.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        res
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

// Directories can't be opened as files on Windows; the rename itself is the commit point.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_like(n: usize, off: f32) -> CorrMatrix {
        let mut m = CorrMatrix::zeros(n);
        for i in 0..n {
            for k in 0..n {
                m.set(i, k, if i == k { 1. } else { off });
            }
        }
        m
    }

    #[test]
    fn header_bytes() {
        let mats: Vec<_> = (0..4).map(|i| identity_like(10, i as f32 * 0.1)).collect();
        let art = DccmArtifact::new(10, None, &mats).unwrap();
        let bytes = art.to_bytes().unwrap();

        let words: Vec<u32> = bytes[..12]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(words, vec![4, 10, 1]);
        assert_eq!(bytes.len(), 12 + 4 * 4 * 55);
        assert_eq!(bytes.len(), art.encoded_len());
    }

    #[test]
    fn labels_are_padded() {
        let labels = encode_labels(&["ALA", "GLY", "HSD", "K"]).unwrap();
        let mats = vec![identity_like(4, 0.5)];
        let art = DccmArtifact::new(4, Some(labels), &mats).unwrap();
        let bytes = art.to_bytes().unwrap();

        assert_eq!(bytes.len(), 12 + 16 + 4 * 10);
        assert_eq!(&bytes[12..16], b"ALA\0");
        assert_eq!(&bytes[24..28], b"K\0\0\0");
        // First payload value is (0, 0).
        assert_eq!(&bytes[28..32], &1f32.to_le_bytes());
    }

    #[test]
    fn decode_detects_labels() {
        let mats = vec![identity_like(3, -0.25), identity_like(3, 0.75)];
        let labels = encode_labels(&["MET", "LYS", "PRO"]).unwrap();

        let labeled = DccmArtifact::new(3, Some(labels), &mats).unwrap();
        let bare = DccmArtifact::new(3, None, &mats).unwrap();

        let a = DccmArtifact::from_bytes(&labeled.to_bytes().unwrap()).unwrap();
        let b = DccmArtifact::from_bytes(&bare.to_bytes().unwrap()).unwrap();

        assert_eq!(a, labeled);
        assert_eq!(b, bare);
        assert_eq!(a.residue_labels.unwrap()[1].name(), "LYS");
        assert_eq!(b.matrix(1).unwrap(), mats[1]);
    }

    #[test]
    fn decode_rejects_bad_input() {
        let art = DccmArtifact::new(3, None, &[identity_like(3, 0.)]).unwrap();
        let mut bytes = art.to_bytes().unwrap();

        assert!(matches!(
            DccmArtifact::from_bytes(&bytes[..bytes.len() - 1]),
            Err(DccmError::Truncated { .. })
        ));
        assert!(matches!(
            DccmArtifact::from_bytes(&bytes[..5]),
            Err(DccmError::Truncated { .. })
        ));

        bytes[8] = 2;
        assert!(matches!(
            DccmArtifact::from_bytes(&bytes),
            Err(DccmError::UnsupportedFormat(2))
        ));
    }

    fn raw_header(window_count: u32, atom_count: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        ArtifactHeader {
            window_count,
            atom_count,
            format_tag: FORMAT_TAG_F32_TRIU,
        }
        .write(&mut bytes)
        .unwrap();
        bytes
    }

    #[test]
    fn decode_rejects_oversized_header() {
        let bytes = raw_header(u32::MAX, u32::MAX);
        assert!(matches!(
            DccmArtifact::from_bytes(&bytes),
            Err(DccmError::Corrupt(_) | DccmError::Truncated { .. })
        ));

        // Sizes that fit but don't match the buffer are caught before allocating.
        let bytes = raw_header(u32::MAX, 1);
        assert!(matches!(
            DccmArtifact::from_bytes(&bytes),
            Err(DccmError::Truncated { .. })
        ));

        let bytes = raw_header(u32::MAX, 0);
        assert!(matches!(
            DccmArtifact::from_bytes(&bytes),
            Err(DccmError::Corrupt(_))
        ));
    }

    #[test]
    fn save_replaces_file_without_leftovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(artifact_filename(10));
        fs::write(&path, b"stale").unwrap();

        let art = DccmArtifact::new(3, None, &[identity_like(3, 0.5)]).unwrap();
        let len = art.save(&path).unwrap();

        assert_eq!(len as usize, art.encoded_len());
        assert_eq!(DccmArtifact::load(&path).unwrap(), art);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn label_limits() {
        assert!(ResidueLabel::new("ALA").is_ok());
        assert!(ResidueLabel::new("HSIE").is_ok());
        assert!(ResidueLabel::new("").is_ok());
        assert!(matches!(
            ResidueLabel::new("ALAXX"),
            Err(DccmError::LabelTooLong { len: 5, .. })
        ));
        // 3 chars, 6 bytes.
        assert!(matches!(
            ResidueLabel::new("äöü"),
            Err(DccmError::LabelTooLong { len: 6, .. })
        ));
        assert!(matches!(
            ResidueLabel::new("A\0B"),
            Err(DccmError::InvalidLabel(_))
        ));
        assert_eq!(ResidueLabel::new("Å").unwrap().name(), "Å");
    }

    #[test]
    fn mismatched_shapes_rejected() {
        let labels = encode_labels(&["ALA"]).unwrap();
        assert!(DccmArtifact::new(2, Some(labels), &[identity_like(2, 0.)]).is_err());
        assert!(DccmArtifact::new(3, None, &[identity_like(2, 0.)]).is_err());
    }

    #[test]
    fn out_of_range_window() {
        let art = DccmArtifact::new(2, None, &[identity_like(2, 0.)]).unwrap();
        assert!(matches!(
            art.matrix(1),
            Err(DccmError::WindowOutOfRange { index: 1, count: 1 })
        ));
    }
}
