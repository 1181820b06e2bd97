#![cfg(test)]

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Creates a temporary cgroup directory that contains an empty `cgroup_file`.
pub fn setup(cgroup_file: &str) -> (TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("create temp directory for test");
    let cgroup_file = set_fixture(tmp.path(), cgroup_file, "")
        .unwrap_or_else(|_| panic!("set test fixture for {cgroup_file}"));

    (tmp, cgroup_file)
}

pub fn set_fixture(temp_dir: &Path, filename: &str, val: &str) -> Result<PathBuf> {
    let full_path = temp_dir.join(filename);

    fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&full_path)
        .with_context(|| format!("failed to open {full_path:?}"))?
        .write_all(val.as_bytes())
        .with_context(|| format!("failed to write to {full_path:?}"))?;

    Ok(full_path)
}

/// Creates every file in `files` with empty content.
pub fn set_fixtures(temp_dir: &Path, files: &[&str]) -> Result<()> {
    for file in files {
        set_fixture(temp_dir, file, "")?;
    }

    Ok(())
}
