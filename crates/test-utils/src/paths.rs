//! Temporary directory and modification-time helpers.

use std::fs::File;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Creates a temporary directory with a specific prefix.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir_with_prefix(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// Set a file's modification time.
pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = File::options()
        .write(true)
        .open(path)
        .expect("Failed to open file for touching");
    file.set_modified(time).expect("Failed to set modification time");
}

/// Move a file's modification time `secs` into the past.
pub fn age_file(path: &Path, secs: u64) {
    set_mtime(path, SystemTime::now() - Duration::from_secs(secs));
}

/// Move a file's modification time `secs` into the future.
pub fn touch_future(path: &Path, secs: u64) {
    set_mtime(path, SystemTime::now() + Duration::from_secs(secs));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_test_dir_with_prefix() {
        let dir = temp_test_dir_with_prefix("grib_test_");
        let path_str = dir.path().to_string_lossy();
        assert!(path_str.contains("grib_test_"));
    }

    #[test]
    fn test_age_file() {
        let dir = temp_test_dir_with_prefix("mtime_");
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();
        age_file(&path, 3600);

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified < SystemTime::now() - Duration::from_secs(3000));
    }
}
