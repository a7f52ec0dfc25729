use std::path::{Path, PathBuf};

use crate::emu::LoadError;

/// File extensions picked up when listing a ROM directory.
pub const ROM_EXTENSIONS: [&str; 2] = ["ch8", "rom"];

/// The program images found in one directory, sorted by file name.
#[derive(Debug, Clone)]
pub struct RomLibrary {
    dir: PathBuf,
    roms: Vec<PathBuf>,
}

impl RomLibrary {
    /// Lists the `.ch8` and `.rom` files directly inside `dir`.
    ///
    /// Subdirectories are not searched. An unreadable directory is reported
    /// the same way as an unreadable ROM file.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let dir = dir.as_ref();
        let unavailable = |source| LoadError::SourceUnavailable {
            path: dir.to_path_buf(),
            source,
        };

        let mut roms = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(unavailable)? {
            let path = entry.map_err(unavailable)?.path();
            if path.is_file() && is_rom(&path) {
                roms.push(path);
            }
        }
        roms.sort();

        log::debug!("Found {} ROMs in {}", roms.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            roms,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.roms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.roms.get(index).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.roms.iter().map(PathBuf::as_path)
    }

    /// Index of the entry after `index`, wrapping to the first one.
    pub fn next_index(&self, index: usize) -> usize {
        if self.roms.is_empty() {
            0
        } else {
            (index + 1) % self.roms.len()
        }
    }
}

fn is_rom(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ROM_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("chip8_vm_{name}_{stamp}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lists_only_rom_files_sorted() {
        let dir = scratch_dir("roms");
        for name in ["pong.ch8", "README.txt", "brix.rom", "tetris.ch8", "notes"] {
            std::fs::write(dir.join(name), [0x00u8, 0xE0]).unwrap();
        }
        std::fs::create_dir(dir.join("nested.ch8")).unwrap();

        let library = RomLibrary::open(&dir).unwrap();
        let names: Vec<_> = library
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();

        assert_eq!(names, vec!["brix.rom", "pong.ch8", "tetris.ch8"]);
        assert_eq!(library.dir(), dir.as_path());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn next_index_wraps() {
        let dir = scratch_dir("wrap");
        for name in ["a.ch8", "b.ch8"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let library = RomLibrary::open(&dir).unwrap();
        assert_eq!(library.next_index(0), 1);
        assert_eq!(library.next_index(1), 0);
        assert!(library.get(2).is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_directory_has_no_roms() {
        let dir = scratch_dir("empty");

        let library = RomLibrary::open(&dir).unwrap();
        assert!(library.is_empty());
        assert_eq!(library.next_index(0), 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let dir = std::env::temp_dir().join("chip8_vm_no_such_dir");

        let err = RomLibrary::open(&dir).unwrap_err();
        assert!(matches!(err, LoadError::SourceUnavailable { path, .. } if path == dir));
    }
}
