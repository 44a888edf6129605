use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::{config::RunConfig, error::WaterbombError};

/// Directory the FE tool runs in, with the files it shares across evaluations
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    root: PathBuf,
    report_file: PathBuf,
    launch_script: PathBuf,
    keep_launch_script: bool,
    cleanup_prefixes: Vec<String>,
}

impl WorkingDirectory {
    pub fn new(config: &RunConfig) -> Result<WorkingDirectory, WaterbombError> {
        if !config.working_dir.is_dir() {
            return Err(WaterbombError::Input(format!(
                "Working directory {} does not exist",
                config.working_dir.display()
            )));
        }

        Ok(WorkingDirectory {
            root: config.working_dir.clone(),
            report_file: config.report_path(),
            launch_script: config.working_dir.join(&config.launch_script),
            keep_launch_script: config.keep_launch_script,
            cleanup_prefixes: config.cleanup_prefixes.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_file(&self) -> &Path {
        &self.report_file
    }

    pub fn launch_script(&self) -> &Path {
        &self.launch_script
    }

    /// Starts one evaluation. Transient files are removed when the scope drops.
    pub fn begin_run(&self) -> RunScope<'_> {
        RunScope { workdir: self }
    }

    /// Deletes every file whose name starts with a cleanup prefix
    ///
    /// # Returns
    /// The number of files removed
    pub fn cleanup(&self) -> Result<usize, WaterbombError> {
        let mut removed: usize = 0;

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if !self
                .cleanup_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
            {
                continue;
            }
            if !entry.file_type()?.is_file() {
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                // lock files may already be gone
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        if !self.keep_launch_script && self.launch_script.exists() {
            std::fs::remove_file(&self.launch_script)?;
            removed += 1;
        }

        Ok(removed)
    }
}

/// Guard for the transient files of a single evaluation
pub struct RunScope<'a> {
    workdir: &'a WorkingDirectory,
}

impl RunScope<'_> {
    pub fn workdir(&self) -> &WorkingDirectory {
        self.workdir
    }
}

impl Drop for RunScope<'_> {
    fn drop(&mut self) {
        match self.workdir.cleanup() {
            Ok(n) => debug!("removed {n} transient files from {}", self.workdir.root.display()),
            Err(err) => warn!("cleanup of {} failed: {err}", self.workdir.root.display()),
        }
    }
}
