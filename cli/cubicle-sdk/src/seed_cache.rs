use std::time::SystemTime;

use cubicle_core::HostPath;
use cubicle_core::fs_util::{copy_no_follow, try_exists};

use crate::error::Result;
use crate::names::PackageName;
use crate::paths::Paths;

/// The content-addressed cache of built package seed archives:
/// `<cache>/packages/<name>.tar`, with `<name>.testing.tar` as the staging
/// name while a package's tests run before atomic promotion.
#[derive(Clone, Copy)]
pub struct SeedCache<'a> {
    paths: &'a Paths,
}

impl<'a> SeedCache<'a> {
    pub fn new(paths: &'a Paths) -> Self {
        Self { paths }
    }

    /// The last time `package`'s seed was (re)built, or the Unix epoch if
    /// it has never been built.
    pub fn last_built(&self, package: &PackageName) -> SystemTime {
        std::fs::metadata(self.paths.package_tar(package).as_path())
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    pub fn has_final(&self, package: &PackageName) -> Result<bool> {
        Ok(try_exists(self.paths.package_tar(package).as_path())?)
    }

    /// Copies a package's sandbox-produced `provides.tar` straight into
    /// the cache as the final seed, for packages without a `test.sh`.
    pub fn commit_untested(&self, package: &PackageName, home_provides: &HostPath) -> Result<()> {
        std::fs::create_dir_all(self.paths.package_cache.as_path())?;
        copy_no_follow(home_provides.as_path(), self.paths.package_tar(package).as_path())?;
        Ok(())
    }

    /// Copies a package's `provides.tar` into the `.testing` staging slot,
    /// pending its `test.sh` passing.
    pub fn stage_testing(&self, package: &PackageName, home_provides: &HostPath) -> Result<()> {
        std::fs::create_dir_all(self.paths.package_cache.as_path())?;
        copy_no_follow(
            home_provides.as_path(),
            self.paths.package_testing_tar(package).as_path(),
        )?;
        Ok(())
    }

    /// Atomically replaces the final seed with the staged one once tests pass.
    pub fn promote(&self, package: &PackageName) -> Result<()> {
        std::fs::rename(
            self.paths.package_testing_tar(package).as_path(),
            self.paths.package_tar(package).as_path(),
        )?;
        Ok(())
    }

    /// Drops a staged seed whose tests failed, keeping the prior final seed
    /// (if any) untouched.
    pub fn discard_testing(&self, package: &PackageName) -> Result<()> {
        match std::fs::remove_file(self.paths.package_testing_tar(package).as_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The seed archives to bind into a new environment for this set of
    /// packages: every final seed tar that exists for the package and its
    /// transitive (non-build) dependencies, in name order.
    pub fn seeds_for<'p>(&self, packages: impl IntoIterator<Item = &'p PackageName>) -> Vec<HostPath> {
        let mut seeds = Vec::new();
        for package in packages {
            let tar = self.paths.package_tar(package);
            if tar.as_path().is_file() {
                seeds.push(tar);
            }
        }
        seeds
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn paths_in(dir: &std::path::Path) -> Paths {
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

    #[test]
    fn commit_then_promote_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let cache = SeedCache::new(&paths);
        let rust = PackageName::from_str("rust").unwrap();

        let provides = HostPath::new(dir.path().join("provides.tar"));
        std::fs::write(provides.as_path(), b"tar-bytes").unwrap();

        assert!(!cache.has_final(&rust).unwrap());
        cache.stage_testing(&rust, &provides).unwrap();
        assert!(!cache.has_final(&rust).unwrap());

        cache.promote(&rust).unwrap();
        assert!(cache.has_final(&rust).unwrap());
        assert_eq!(cache.seeds_for([&rust]), vec![paths.package_tar(&rust)]);
    }

    #[test]
    fn discard_testing_is_a_noop_when_nothing_was_staged() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let cache = SeedCache::new(&paths);
        let rust = PackageName::from_str("rust").unwrap();
        cache.discard_testing(&rust).unwrap();
    }

    #[test]
    fn staging_a_symlinked_provides_tar_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let cache = SeedCache::new(&paths);
        let rust = PackageName::from_str("rust").unwrap();

        let real_target = HostPath::new(dir.path().join("outside-home.tar"));
        std::fs::write(real_target.as_path(), b"not from the sandbox").unwrap();
        let provides = HostPath::new(dir.path().join("provides.tar"));
        std::os::unix::fs::symlink(real_target.as_path(), provides.as_path()).unwrap();

        let err = cache.stage_testing(&rust, &provides).unwrap_err();
        let crate::error::Error::Io(io_err) = err else {
            panic!("expected an I/O error, got {err:?}");
        };
        assert_eq!(io_err.kind(), std::io::ErrorKind::FilesystemLoop);
        assert!(!cache.has_final(&rust).unwrap());
    }
}
