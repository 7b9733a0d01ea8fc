use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

/// `aog.pid` in the data directory, removed again on drop.
pub(crate) struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir).with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

        let path = data_dir.join("aog.pid");

        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("cannot write PID file {}", path.display()))?;

        log::debug!("wrote PID file {}", path.display());

        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("cannot remove PID file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");

        let pid_file = PidFile::create(&data_dir).unwrap();
        let pid = fs::read_to_string(data_dir.join("aog.pid")).unwrap();

        assert_eq!(pid, std::process::id().to_string());

        drop(pid_file);
        assert!(!data_dir.join("aog.pid").exists());
    }
}
