#![allow(dead_code)]

use std::path::PathBuf;

use cycledag::fs::mock::MockFileSystem;
use cycledag_test_utils::builders::{TEMPLATE_PATH, TEMPLATE_SOURCE};
use tempfile::TempDir;

pub use cycledag_test_utils::builders;
pub use cycledag_test_utils::init_tracing;

/// Mock filesystem holding the default job template of the builders.
pub fn mock_fs() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file(TEMPLATE_PATH, TEMPLATE_SOURCE);
    fs
}

/// Write `yaml` as `<dir>/<name>` and return its path.
pub fn write_config(dir: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, yaml).unwrap();
    path
}

/// A small valid zstd frame.
pub fn zst_payload() -> Vec<u8> {
    zstd::encode_all(&b"I3 frames"[..], 3).unwrap()
}

/// A zstd frame cut off before its last block ends.
pub fn truncated_zst_payload() -> Vec<u8> {
    let mut bytes = zst_payload();
    bytes.truncate(bytes.len() - 3);
    bytes
}
