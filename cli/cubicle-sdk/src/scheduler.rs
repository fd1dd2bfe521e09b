use std::collections::BTreeSet;
use std::fs::File;
use std::time::{Duration, SystemTime};

use cubicle_core::HostPath;
use cubicle_core::fs_util::summarize_dir;

use crate::error::{Error, Result};
use crate::names::{EnvironmentName, PackageName};
use crate::packages::{Package, PackageIndex};
use crate::paths::Paths;
use crate::runner::{EnvironmentExists, Runner, RunnerCommand};
use crate::seed_cache::SeedCache;

/// Default staleness window, used unless a shorter one is configured.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60 * 12);

/// Rebuilds package seeds on demand: given a requested set of packages,
/// walks their transitive build closure in dependency order and rebuilds
/// whichever ones are stale.
pub struct BuildScheduler<'a> {
    index: &'a PackageIndex,
    seed_cache: SeedCache<'a>,
    runner: &'a dyn Runner,
    paths: &'a Paths,
    stale_after: Duration,
}

impl<'a> BuildScheduler<'a> {
    pub fn new(
        index: &'a PackageIndex,
        paths: &'a Paths,
        runner: &'a dyn Runner,
        stale_after: Duration,
    ) -> Self {
        Self {
            index,
            seed_cache: SeedCache::new(paths),
            runner,
            paths,
            stale_after,
        }
    }

    pub fn seed_cache(&self) -> &SeedCache<'a> {
        &self.seed_cache
    }

    /// Brings every package in the transitive build closure of `packages`
    /// up to date, in an order that respects `depends`/`build-depends`.
    pub fn update_packages(&self, packages: impl IntoIterator<Item = PackageName>) -> Result<()> {
        let now = SystemTime::now();
        let mut todo: Vec<PackageName> = self
            .index
            .transitive_depends(packages, true)?
            .into_iter()
            .collect();
        let mut done: BTreeSet<PackageName> = BTreeSet::new();

        while !todo.is_empty() {
            let mut later = Vec::new();
            for key in &todo {
                let package = self.index.get(key)?;
                let ready = package.depends.is_subset(&done) && package.build_depends.is_subset(&done);
                if ready {
                    self.update_stale_package(key, now)?;
                    done.insert(key.clone());
                } else {
                    later.push(key.clone());
                }
            }
            if later.len() == todo.len() {
                return Err(Error::UnsatisfiableDependencies(todo));
            }
            todo = later;
        }
        Ok(())
    }

    fn update_stale_package(&self, key: &PackageName, now: SystemTime) -> Result<()> {
        let package = self.index.get(key)?;

        let env_name = EnvironmentName::for_package_build(key);
        let work_dir = self.paths.work_dir(&env_name);
        if !work_dir.as_path().exists() {
            std::fs::create_dir_all(work_dir.as_path())?;
        }

        let Some(_) = &package.update_script else {
            return Ok(());
        };

        let edited = summarize_dir(package.dir.as_path())?.last_modified;
        let built = self.seed_cache.last_built(key);
        let deps_older_than_built = package
            .depends
            .union(&package.build_depends)
            .all(|p| self.seed_cache.last_built(p) < built);
        let age = now.duration_since(built).unwrap_or(Duration::ZERO);
        if edited < built && age < self.stale_after && deps_older_than_built {
            return Ok(());
        }

        self.update_package(key)
    }

    /// Rebuilds `key` unconditionally, bypassing the staleness check.
    /// Used by `reset <package-name>`, which always wants a fresh build.
    pub fn force_update_package(&self, key: &PackageName) -> Result<()> {
        self.update_package(key)
    }

    fn update_package(&self, key: &PackageName) -> Result<()> {
        let package = self.index.get(key)?.clone();
        tracing::info!(package = %key, "updating package");

        let env_name = EnvironmentName::for_package_build(key);
        let tar_path = self.paths.staged_seed_tar(&env_name);
        write_package_tar(&tar_path, env_name.as_str(), package.dir.as_path(), None)?;

        let build_deps: BTreeSet<PackageName> =
            package.depends.union(&package.build_depends).cloned().collect();
        let mut seeds = self.seeds_for(build_deps)?;
        seeds.push(tar_path.clone());

        self.runner.create(&env_name)?;
        let run_result = self.runner.run(
            &env_name,
            &RunnerCommand::Init {
                seeds,
                script: self.paths.dev_init_script(),
            },
        );
        if let Err(e) = run_result {
            let _ = std::fs::remove_file(tar_path.as_path());
            return self.keep_stale_or_fail(key, e);
        }
        let _ = std::fs::remove_file(tar_path.as_path());

        let home_provides = self.paths.home_dir(&env_name).join("provides.tar");
        if package.test_script.is_none() {
            self.seed_cache.commit_untested(key, &home_provides)?;
            return Ok(());
        }

        tracing::info!(package = %key, "testing package");
        let test_name = EnvironmentName::for_package_test(key);
        let test_tar_path = self.paths.staged_seed_tar(&test_name);
        write_package_tar(
            &test_tar_path,
            test_name.as_str(),
            package.dir.as_path(),
            Some(std::path::Path::new("update.sh")),
        )?;
        self.seed_cache.stage_testing(key, &home_provides)?;

        let outcome = self.run_package_test(&package, &test_name, &test_tar_path, key);
        let _ = std::fs::remove_file(test_tar_path.as_path());

        match outcome {
            Ok(()) => {
                self.seed_cache.promote(key)?;
                Ok(())
            }
            Err(e) => {
                self.seed_cache.discard_testing(key)?;
                self.keep_stale_or_fail(key, e)
            }
        }
    }

    fn run_package_test(
        &self,
        package: &Package,
        test_name: &EnvironmentName,
        test_tar_path: &HostPath,
        key: &PackageName,
    ) -> Result<()> {
        self.purge_quiet(test_name)?;
        std::fs::create_dir_all(self.paths.work_dir(test_name).as_path())?;

        let mut seeds = self.seeds_for(package.depends.clone())?;
        seeds.push(test_tar_path.clone());
        seeds.push(self.paths.package_testing_tar(key));
        self.runner.create(test_name)?;
        self.runner.run(
            test_name,
            &RunnerCommand::Init {
                seeds,
                script: self.paths.dev_init_script(),
            },
        )?;
        self.runner.run(
            test_name,
            &RunnerCommand::Exec(vec![String::from("./test.sh")]),
        )?;
        self.runner.purge(test_name)
    }

    fn keep_stale_or_fail(&self, key: &PackageName, err: Error) -> Result<()> {
        if self.seed_cache.has_final(key)? {
            tracing::warn!(package = %key, error = %err, "keeping stale seed after build/test failure");
            Ok(())
        } else {
            Err(err)
        }
    }

    fn purge_quiet(&self, name: &EnvironmentName) -> Result<()> {
        if self.runner.exists(name)? == EnvironmentExists::NoEnvironment {
            return Ok(());
        }
        self.runner.stop(name)?;
        self.runner.purge(name)
    }

    fn seeds_for(&self, packages: impl IntoIterator<Item = PackageName>) -> Result<Vec<HostPath>> {
        let closure = self.index.transitive_depends(packages, false)?;
        Ok(self.seed_cache.seeds_for(closure.iter()))
    }
}

/// Packs `src_dir`'s contents into a tar archive at `dest`, with every
/// entry's path prefixed by `archive_prefix` (matching the upstream
/// `--transform 's/^\./<name>/'` rename), optionally skipping one
/// top-level file (used to keep `update.sh` out of a package's test seed).
fn write_package_tar(
    dest: &HostPath,
    archive_prefix: &str,
    src_dir: &std::path::Path,
    exclude: Option<&std::path::Path>,
) -> Result<()> {
    let file = File::create(dest.as_path())?;
    let mut builder = tar::Builder::new(file);
    for entry in walkdir::WalkDir::new(src_dir).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry.path().strip_prefix(src_dir).expect("walk root prefix");
        if exclude == Some(relative) {
            continue;
        }
        let archive_path = std::path::Path::new(archive_prefix).join(relative);
        if entry.file_type().is_dir() {
            builder.append_dir(&archive_path, entry.path())?;
        } else if entry.file_type().is_file() {
            let mut f = File::open(entry.path())?;
            builder.append_file(&archive_path, &mut f)?;
        }
    }
    builder.finish()?;
    Ok(())
}
