//! Application bundle: the binary under test plus auxiliary libraries.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::device::DeviceModel;
use crate::error::{Error, Result};

// ============================================================================
// AppBundle
// ============================================================================

/// The application binary loaded into an emulator instance, with any
/// auxiliary library binaries it links against (each under a logical name).
#[derive(Debug, Clone)]
pub struct AppBundle {
    /// Path to the application binary.
    pub path: PathBuf,
    /// Logical name to path of each auxiliary library binary.
    pub libraries: FxHashMap<String, PathBuf>,
}

impl AppBundle {
    /// Creates a bundle for the given application binary.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            libraries: FxHashMap::default(),
        }
    }

    /// Adds an auxiliary library binary under a logical name.
    #[must_use]
    pub fn with_library(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.libraries.insert(name.into(), path.into());
        self
    }

    /// Checks that every binary in the bundle exists on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AppNotFound`] for the first missing file.
    pub fn validate(&self) -> Result<()> {
        if !self.path.exists() {
            return Err(Error::app_not_found(&self.path));
        }
        for lib_path in self.libraries.values() {
            if !lib_path.exists() {
                return Err(Error::app_not_found(lib_path));
            }
        }
        Ok(())
    }

    /// Checks that the application binary was built for `model` by reading
    /// the ELF entry-point word.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the file is not an ELF image or its
    /// entry point does not match the model's expected word.
    pub fn verify_model(&self, model: DeviceModel) -> Result<()> {
        let entry = read_elf_entry(&self.path)?;
        if entry != u64::from(model.elf_entry()) {
            return Err(Error::config(format!(
                "are you sure {} is a {model} app binary? (entry {entry:#x})",
                self.path.display()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ELF header
// ============================================================================

/// Reads the entry-point word from an ELF header.
fn read_elf_entry(path: &Path) -> Result<u64> {
    let bytes = fs::read(path)?;

    if bytes.len() < 0x20 || bytes[0..4] != [0x7f, b'E', b'L', b'F'] {
        return Err(Error::config(format!(
            "{} is not an ELF image",
            path.display()
        )));
    }

    // e_ident[EI_CLASS]: 1 = 32-bit (e_entry is a u32 at 0x18), 2 = 64-bit.
    match bytes[4] {
        1 => Ok(u64::from(u32::from_le_bytes([
            bytes[0x18],
            bytes[0x19],
            bytes[0x1a],
            bytes[0x1b],
        ]))),
        2 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[0x18..0x20]);
            Ok(u64::from_le_bytes(raw))
        }
        other => Err(Error::config(format!(
            "{} has an unknown ELF class {other}",
            path.display()
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    /// Builds a minimal 32-bit ELF header with the given entry word.
    fn fake_elf(entry: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x34];
        bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        bytes[4] = 1; // 32-bit
        bytes[0x18..0x1c].copy_from_slice(&entry.to_le_bytes());
        bytes
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_validate_missing_app() {
        let bundle = AppBundle::new("/nonexistent/app.elf");
        assert!(matches!(
            bundle.validate(),
            Err(Error::AppNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_missing_library() {
        let app = write_temp(&fake_elf(0xc0d0_0001));
        let bundle =
            AppBundle::new(app.path()).with_library("missing", "/nonexistent/lib.elf");
        assert!(matches!(
            bundle.validate(),
            Err(Error::AppNotFound { .. })
        ));
    }

    #[test]
    fn test_verify_model_accepts_matching_entry() {
        let app = write_temp(&fake_elf(0xc0d0_0001));
        let bundle = AppBundle::new(app.path());
        bundle.verify_model(DeviceModel::Nanos).unwrap();
    }

    #[test]
    fn test_verify_model_rejects_wrong_entry() {
        let app = write_temp(&fake_elf(0xc0d0_0001));
        let bundle = AppBundle::new(app.path());
        assert!(bundle.verify_model(DeviceModel::Stax).is_err());
    }

    #[test]
    fn test_verify_model_rejects_non_elf() {
        let app = write_temp(b"definitely not an elf image");
        let bundle = AppBundle::new(app.path());
        assert!(bundle.verify_model(DeviceModel::Nanos).is_err());
    }
}
