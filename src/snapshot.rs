//! Screen snapshots and golden-set comparison.
//!
//! A [`Snapshot`] is the raw capture of one screen. Test cases keep two
//! directories per case: a committed golden reference set and a scratch
//! candidate set written by the current run, both holding zero-padded
//! `00000.png`-style files compared index by index.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Snapshot
// ============================================================================

/// A captured screen image: dimensions plus the raw byte buffer as served
/// by the screen-capture endpoint.
#[derive(Debug, Clone, Eq)]
pub struct Snapshot {
    /// Screen width in pixels.
    pub width: u32,
    /// Screen height in pixels.
    pub height: u32,
    /// Raw capture bytes.
    pub data: Vec<u8>,
}

impl Snapshot {
    /// Creates a snapshot value.
    #[must_use]
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

/// Two snapshots are equal iff their byte buffers are identical; the
/// dimensions are derived from the device model and not compared.
impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

// ============================================================================
// Path convention
// ============================================================================

/// Formats a snapshot index as its zero-padded file stem.
#[must_use]
pub fn format_index(index: usize) -> String {
    format!("{index:05}")
}

/// Returns the path of the image at `index` inside `dir`.
#[must_use]
pub fn indexed_png(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.png", format_index(index)))
}

/// Writes capture bytes to a file.
///
/// # Errors
///
/// Returns [`Error::Io`] on write failure; snapshot directories must exist.
pub fn save_snapshot(data: &[u8], path: &Path) -> Result<()> {
    fs::write(path, data)?;
    Ok(())
}

// ============================================================================
// Comparison
// ============================================================================

/// Decodes an image file to its pixel buffer.
fn decode_pixels(path: &Path, index: usize) -> Result<Vec<u8>> {
    let image = image::open(path)
        .map_err(|e| Error::snapshot_mismatch(index, format!("{}: {e}", path.display())))?;
    Ok(image.as_bytes().to_vec())
}

/// Compares the images `0..=last_index` of a golden and a candidate
/// directory.
///
/// Every pair must decode to byte-identical pixel buffers. The first
/// mismatch (including a missing or unreadable file on either side) fails
/// with the offending index; there is no partial-match tolerance.
///
/// # Errors
///
/// Returns [`Error::SnapshotMismatch`] naming the first diverging index.
pub fn compare_snapshot_dirs(
    golden_dir: &Path,
    candidate_dir: &Path,
    last_index: usize,
) -> Result<bool> {
    debug!(golden = %golden_dir.display(), candidate = %candidate_dir.display(), "Comparing snapshots");

    for index in 0..=last_index {
        let candidate = decode_pixels(&indexed_png(candidate_dir, index), index)?;
        let golden = decode_pixels(&indexed_png(golden_dir, index), index)?;
        if candidate != golden {
            return Err(Error::snapshot_mismatch(index, "images do not match"));
        }
    }
    Ok(true)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use image::{Rgba, RgbaImage};

    fn write_png(dir: &Path, index: usize, seed: u8) {
        let image = RgbaImage::from_fn(4, 4, |x, y| {
            Rgba([seed, x as u8, y as u8, 255])
        });
        image.save(indexed_png(dir, index)).unwrap();
    }

    #[test]
    fn test_format_index_pads_to_five() {
        assert_eq!(format_index(0), "00000");
        assert_eq!(format_index(42), "00042");
        assert_eq!(format_index(123_456), "123456");
    }

    #[test]
    fn test_indexed_png_path() {
        let path = indexed_png(Path::new("/tmp/case"), 7);
        assert_eq!(path, Path::new("/tmp/case/00007.png"));
    }

    #[test]
    fn test_snapshot_equality_ignores_dimensions() {
        let a = Snapshot::new(128, 32, vec![1, 2, 3]);
        let b = Snapshot::new(128, 64, vec![1, 2, 3]);
        let c = Snapshot::new(128, 32, vec![9, 9, 9]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_compare_identical_sets() {
        let golden = tempfile::tempdir().unwrap();
        let candidate = tempfile::tempdir().unwrap();
        for index in 0..=2 {
            write_png(golden.path(), index, 7);
            write_png(candidate.path(), index, 7);
        }
        assert!(compare_snapshot_dirs(golden.path(), candidate.path(), 2).unwrap());
    }

    #[test]
    fn test_compare_names_first_diverging_index() {
        let golden = tempfile::tempdir().unwrap();
        let candidate = tempfile::tempdir().unwrap();
        for index in 0..=2 {
            write_png(golden.path(), index, 7);
            // Index 1 gets different pixel content.
            write_png(candidate.path(), index, if index == 1 { 8 } else { 7 });
        }
        let err = compare_snapshot_dirs(golden.path(), candidate.path(), 2).unwrap_err();
        match err {
            Error::SnapshotMismatch { index, .. } => assert_eq!(index, 1),
            other => panic!("expected mismatch, got {other}"),
        }
    }

    #[test]
    fn test_compare_missing_candidate_fails_with_index() {
        let golden = tempfile::tempdir().unwrap();
        let candidate = tempfile::tempdir().unwrap();
        write_png(golden.path(), 0, 7);
        write_png(candidate.path(), 0, 7);
        write_png(golden.path(), 1, 7);
        // Candidate set is one image short.
        let err = compare_snapshot_dirs(golden.path(), candidate.path(), 1).unwrap_err();
        match err {
            Error::SnapshotMismatch { index, .. } => assert_eq!(index, 1),
            other => panic!("expected mismatch, got {other}"),
        }
    }

    #[test]
    fn test_save_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = indexed_png(dir.path(), 0);
        save_snapshot(&[1, 2, 3, 4], &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }
}
