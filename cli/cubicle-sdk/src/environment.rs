use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Write};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use cubicle_core::fs_util::{create_no_follow, open_no_follow, try_iterdir};
use cubicle_core::{DirSummary, HostPath};

use crate::error::{Error, Result};
use crate::names::{EnvironmentName, PackageName};
use crate::packages::PackageIndex;
use crate::paths::Paths;
use crate::randname::RandomNameGenerator;
use crate::runner::{EnvironmentExists, Runner, RunnerCommand};
use crate::scheduler::BuildScheduler;

/// Default package set for a new environment when the caller didn't ask
/// for anything specific.
pub fn default_packages() -> BTreeSet<PackageName> {
    [PackageName::from_str("default")]
        .into_iter()
        .filter_map(Result::ok)
        .collect()
}

/// One row of `cubicle list`: an environment's name and the size/mtime of
/// its two directories, whichever of the pair actually exist.
#[derive(Clone, Debug)]
pub struct EnvironmentListing {
    pub name: EnvironmentName,
    pub home_dir: Option<DirSummary>,
    pub work_dir: Option<DirSummary>,
}

/// One row of `cubicle packages list`.
#[derive(Clone, Debug)]
pub struct PackageListing {
    pub name: PackageName,
    pub origin: String,
    pub dir: HostPath,
    pub depends: Vec<PackageName>,
    pub build_depends: Vec<PackageName>,
    pub edited: SystemTime,
    pub built: SystemTime,
    pub size: Option<u64>,
}

/// The top-level engine: wires together the package index, seed cache,
/// build scheduler and a chosen [`Runner`] to implement every
/// environment-lifecycle operation the CLI exposes.
pub struct Engine {
    paths: Paths,
    index: PackageIndex,
    runner: Box<dyn Runner>,
    stale_after: Duration,
}

impl Engine {
    pub fn new(paths: Paths, runner: Box<dyn Runner>, stale_after: Duration) -> Result<Self> {
        let index = PackageIndex::discover(&paths)?;
        Ok(Self {
            paths,
            index,
            runner,
            stale_after,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn packages(&self) -> &PackageIndex {
        &self.index
    }

    fn scheduler(&self) -> BuildScheduler<'_> {
        BuildScheduler::new(&self.index, &self.paths, self.runner.as_ref(), self.stale_after)
    }

    pub fn new_environment(
        &self,
        name: &EnvironmentName,
        packages: BTreeSet<PackageName>,
    ) -> Result<()> {
        if self.runner.exists(name)? != EnvironmentExists::NoEnvironment {
            return Err(Error::EnvironmentAlreadyExists(name.clone()));
        }
        self.build_and_enter(name, packages, false)
    }

    pub fn enter_environment(&self, name: &EnvironmentName) -> Result<()> {
        if self.runner.exists(name)? == EnvironmentExists::NoEnvironment {
            return Err(Error::NoSuchEnvironment(name.clone()));
        }
        self.runner.create(name)?;
        self.runner.run(name, &RunnerCommand::Interactive)
    }

    pub fn exec_environment(&self, name: &EnvironmentName, command: Vec<String>) -> Result<()> {
        if self.runner.exists(name)? == EnvironmentExists::NoEnvironment {
            return Err(Error::NoSuchEnvironment(name.clone()));
        }
        self.runner.create(name)?;
        self.runner.run(name, &RunnerCommand::Exec(command))
    }

    /// Picks an unused `tmp-<word>` name, builds it, and drops the caller
    /// straight into an interactive shell.
    pub fn create_enter_tmp_environment(&self, packages: BTreeSet<PackageName>) -> Result<EnvironmentName> {
        let generator = RandomNameGenerator::new(&self.paths);
        for word in generator.candidates() {
            let Ok(name) = EnvironmentName::from_str(&format!("tmp-{word}")) else {
                continue;
            };
            if self.runner.exists(&name)? == EnvironmentExists::NoEnvironment {
                self.build_and_enter(&name, packages, false)?;
                self.runner.run(&name, &RunnerCommand::Interactive)?;
                return Ok(name);
            }
        }
        Err(Error::NameGenerationFailed)
    }

    fn build_and_enter(
        &self,
        name: &EnvironmentName,
        packages: BTreeSet<PackageName>,
        _enter_after: bool,
    ) -> Result<()> {
        self.scheduler().update_packages(packages.iter().cloned())?;
        self.runner.create(name)?;
        write_packages_file(&self.paths.work_dir(name), &packages)?;
        let seeds = self.scheduler().seed_cache().seeds_for(
            self.index
                .transitive_depends(packages.iter().cloned(), false)?
                .iter(),
        );
        self.runner.run(
            name,
            &RunnerCommand::Init {
                seeds,
                script: self.paths.dev_init_script(),
            },
        )
    }

    pub fn purge_environment(&self, name: &EnvironmentName, quiet: bool) -> Result<()> {
        if self.runner.exists(name)? == EnvironmentExists::NoEnvironment {
            if !quiet {
                tracing::warn!(%name, "environment does not exist (nothing to purge)");
            }
            return Ok(());
        }
        self.runner.stop(name)?;
        self.runner.purge(name)
    }

    pub fn reset_environment(
        &self,
        name: &EnvironmentName,
        packages: Option<BTreeSet<PackageName>>,
        clean: bool,
    ) -> Result<()> {
        if self.runner.exists(name)? == EnvironmentExists::NoEnvironment {
            return Err(Error::NoSuchEnvironment(name.clone()));
        }
        self.runner.stop(name)?;
        self.runner.reset(name)?;
        if clean {
            return Ok(());
        }

        let mut packages = match packages {
            Some(packages) => packages,
            None => read_packages_file(&self.paths.work_dir(name))?,
        };

        if let Some(key) = name.as_package_build() {
            let package = self.index.get(&key)?;
            packages.extend(package.depends.iter().cloned());
            packages.extend(package.build_depends.iter().cloned());
            self.scheduler().update_packages(packages.iter().cloned())?;
            self.scheduler().force_update_package(&key)?;
        } else {
            self.scheduler().update_packages(packages.iter().cloned())?;
        }

        write_packages_file(&self.paths.work_dir(name), &packages)?;
        let seeds = self.scheduler().seed_cache().seeds_for(
            self.index
                .transitive_depends(packages.iter().cloned(), false)?
                .iter(),
        );
        self.runner.run(
            name,
            &RunnerCommand::Init {
                seeds,
                script: self.paths.dev_init_script(),
            },
        )
    }

    pub fn list_environments(&self) -> Result<Vec<EnvironmentListing>> {
        let mut names: BTreeSet<EnvironmentName> = BTreeSet::new();
        for path in try_iterdir(self.paths.home_dirs.as_path())? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.insert(EnvironmentName::from_str(name)?);
            }
        }
        for path in try_iterdir(self.paths.work_dirs.as_path())? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.insert(EnvironmentName::from_str(name)?);
            }
        }

        names
            .into_iter()
            .map(|name| {
                let summary = self.runner.files_summary(&name)?;
                Ok(EnvironmentListing {
                    name,
                    home_dir: summary.home_dir_path.map(|_| summary.home_dir),
                    work_dir: summary.work_dir_path.map(|_| summary.work_dir),
                })
            })
            .collect()
    }

    pub fn list_packages(&self) -> Result<Vec<PackageListing>> {
        let seed_cache = crate::seed_cache::SeedCache::new(&self.paths);
        self.index
            .iter()
            .map(|package| {
                let edited = cubicle_core::fs_util::summarize_dir(package.dir.as_path())?.last_modified;
                let built = seed_cache.last_built(&package.name);
                let size = std::fs::metadata(self.paths.package_tar(&package.name).as_path())
                    .map(|m| m.len())
                    .ok();
                Ok(PackageListing {
                    name: package.name.clone(),
                    origin: package.origin.clone(),
                    dir: package.dir.clone(),
                    depends: package.depends.iter().cloned().collect(),
                    build_depends: package.build_depends.iter().cloned().collect(),
                    edited,
                    built,
                    size,
                })
            })
            .collect()
    }
}

fn read_packages_file(work_dir: &HostPath) -> Result<BTreeSet<PackageName>> {
    match open_no_follow(work_dir.join("packages.txt").as_path()) {
        Ok(file) => {
            let mut packages = BTreeSet::new();
            for line in BufReader::new(file).lines() {
                let line = line?;
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    packages.insert(PackageName::from_str(trimmed)?);
                }
            }
            Ok(packages)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_packages_file(work_dir: &HostPath, packages: &BTreeSet<PackageName>) -> Result<()> {
    let mut file = create_no_follow(work_dir.join("packages.txt").as_path())?;
    for package in packages {
        writeln!(file, "{package}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::test_support::FakeRunner;

    fn test_paths(dir: &std::path::Path) -> Paths {
        Paths {
            home_dirs: HostPath::new(dir.join("home")),
            work_dirs: HostPath::new(dir.join("work")),
            package_cache: HostPath::new(dir.join("packages")),
            user_package_dir: HostPath::new(dir.join("user-packages")),
            code_package_dir: HostPath::new(dir.join("code-packages")),
            script_dir: HostPath::new(dir.join("script")),
            cache_dir: HostPath::new(dir.join("cache")),
        }
    }

    fn test_engine(paths: &Paths) -> Engine {
        std::fs::create_dir_all(paths.code_package_dir.as_path()).unwrap();
        let runner = Box::new(FakeRunner::new(paths.home_dirs.clone(), paths.work_dirs.clone()));
        Engine::new(paths.clone(), runner, DEFAULT_STALE_AFTER).unwrap()
    }

    #[test]
    fn a_fresh_environment_gets_paired_directories_and_a_packages_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        let engine = test_engine(&paths);

        let name = EnvironmentName::from_str("e1").unwrap();
        engine.new_environment(&name, BTreeSet::new()).unwrap();

        assert!(paths.home_dir(&name).as_path().is_dir());
        assert!(paths.work_dir(&name).as_path().is_dir());
        assert!(paths.work_dir(&name).join("packages.txt").as_path().is_file());
    }

    #[test]
    fn creating_an_environment_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        let engine = test_engine(&paths);

        let name = EnvironmentName::from_str("e1").unwrap();
        engine.new_environment(&name, BTreeSet::new()).unwrap();
        let err = engine.new_environment(&name, BTreeSet::new()).unwrap_err();
        assert!(matches!(err, Error::EnvironmentAlreadyExists(_)));
    }

    #[test]
    fn resetting_an_environment_preserves_its_work_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        let engine = test_engine(&paths);

        let name = EnvironmentName::from_str("e1").unwrap();
        engine.new_environment(&name, BTreeSet::new()).unwrap();
        std::fs::write(paths.work_dir(&name).join("scratch.txt"), b"keep me").unwrap();

        engine.reset_environment(&name, None, false).unwrap();

        assert!(paths.home_dir(&name).as_path().is_dir());
        assert_eq!(
            std::fs::read(paths.work_dir(&name).join("scratch.txt")).unwrap(),
            b"keep me"
        );
    }

    #[test]
    fn purging_an_environment_removes_both_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        let engine = test_engine(&paths);

        let name = EnvironmentName::from_str("e1").unwrap();
        engine.new_environment(&name, BTreeSet::new()).unwrap();
        engine.purge_environment(&name, false).unwrap();

        assert!(!paths.home_dir(&name).as_path().exists());
        assert!(!paths.work_dir(&name).as_path().exists());
    }
}
