//! An in-memory [`Runner`] double used only by this crate's own tests, so
//! the scheduler and engine can be exercised without `bwrap`/`docker`.
#![cfg(test)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::str::FromStr;

use cubicle_core::{DirSummary, HostPath};

use crate::error::{Error, Result};
use crate::names::EnvironmentName;
use crate::runner::{EnvFilesSummary, EnvironmentExists, Runner, RunnerCommand};

/// `run`'s `Init` command "builds" an environment by writing a
/// `provides.tar` file into its home directory rather than invoking a real
/// sandbox; that's enough for [`crate::scheduler::BuildScheduler`]'s
/// `SeedCache` calls, which only care that the file exists.
pub(crate) struct FakeRunner {
    home_dirs: HostPath,
    work_dirs: HostPath,
    /// Environment names whose next `run` call should fail, simulating a
    /// package's `update.sh`/`test.sh` exiting non-zero.
    fail_next: RefCell<BTreeSet<String>>,
    /// Every environment name `run` was called for, in call order.
    run_log: RefCell<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new(home_dirs: HostPath, work_dirs: HostPath) -> Self {
        Self {
            home_dirs,
            work_dirs,
            fail_next: RefCell::new(BTreeSet::new()),
            run_log: RefCell::new(Vec::new()),
        }
    }

    /// Makes the next `run` call for `name` fail, once.
    pub(crate) fn fail_next(&self, name: &str) {
        self.fail_next.borrow_mut().insert(name.to_owned());
    }

    /// The environment names `run` was invoked for, in call order.
    pub(crate) fn run_log(&self) -> Vec<String> {
        self.run_log.borrow().clone()
    }
}

fn failed_status() -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(1 << 8)
}

impl Runner for FakeRunner {
    fn create(&self, name: &EnvironmentName) -> Result<()> {
        std::fs::create_dir_all(self.home_dirs.join(name).as_path())?;
        std::fs::create_dir_all(self.work_dirs.join(name).as_path())?;
        Ok(())
    }

    fn exists(&self, name: &EnvironmentName) -> Result<EnvironmentExists> {
        let has_home = self.home_dirs.join(name).as_path().exists();
        let has_work = self.work_dirs.join(name).as_path().exists();
        Ok(if has_home && has_work {
            EnvironmentExists::FullyExists
        } else if has_home || has_work {
            EnvironmentExists::PartiallyExists
        } else {
            EnvironmentExists::NoEnvironment
        })
    }

    fn stop(&self, _name: &EnvironmentName) -> Result<()> {
        Ok(())
    }

    fn list(&self) -> Result<Vec<EnvironmentName>> {
        let mut names = BTreeSet::new();
        for dir in [&self.home_dirs, &self.work_dirs] {
            if let Ok(entries) = std::fs::read_dir(dir.as_path()) {
                for entry in entries.flatten() {
                    if let Some(name) = entry.file_name().to_str() {
                        if let Ok(name) = EnvironmentName::from_str(name) {
                            names.insert(name);
                        }
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn files_summary(&self, name: &EnvironmentName) -> Result<EnvFilesSummary> {
        let home_dir = self.home_dirs.join(name);
        let work_dir = self.work_dirs.join(name);
        Ok(EnvFilesSummary {
            home_dir_path: home_dir.as_path().exists().then_some(home_dir),
            home_dir: DirSummary::new_with_errors(),
            work_dir_path: work_dir.as_path().exists().then_some(work_dir),
            work_dir: DirSummary::new_with_errors(),
        })
    }

    fn reset(&self, name: &EnvironmentName) -> Result<()> {
        let home_dir = self.home_dirs.join(name);
        let _ = std::fs::remove_dir_all(home_dir.as_path());
        std::fs::create_dir_all(home_dir.as_path())?;
        std::fs::create_dir_all(self.work_dirs.join(name).as_path())?;
        Ok(())
    }

    fn purge(&self, name: &EnvironmentName) -> Result<()> {
        let _ = std::fs::remove_dir_all(self.home_dirs.join(name).as_path());
        let _ = std::fs::remove_dir_all(self.work_dirs.join(name).as_path());
        Ok(())
    }

    fn run(&self, name: &EnvironmentName, command: &RunnerCommand) -> Result<()> {
        self.run_log.borrow_mut().push(name.as_str().to_owned());
        if self.fail_next.borrow_mut().remove(name.as_str()) {
            return Err(Error::ChildFailed("fake-runner", failed_status()));
        }
        if let RunnerCommand::Init { .. } = command {
            let home_dir = self.home_dirs.join(name);
            std::fs::create_dir_all(home_dir.as_path())?;
            std::fs::write(home_dir.join("provides.tar").as_path(), b"fake-seed")?;
        }
        Ok(())
    }
}
