use cubicle_core::HostPath;
use xdg::BaseDirectories;

use crate::error::{Error, Result};
use crate::names::{EnvironmentName, PackageName};

/// Every on-disk location the engine reads or writes, resolved once at
/// startup from XDG base directories plus the directory the `cubicle`
/// binary (or its packaged assets) was run from.
///
/// Mirrors the flat module-level constants of the shell-script original:
/// `HOME_DIRS`, `WORK_DIRS`, `PACKAGE_CACHE`, `USER_PACKAGE_DIR`.
#[derive(Clone, Debug)]
pub struct Paths {
    /// `$XDG_CACHE_HOME/cubicle/home`: per-environment sandbox home directories.
    pub home_dirs: HostPath,
    /// `$XDG_DATA_HOME/cubicle/work`: per-environment persistent work directories.
    pub work_dirs: HostPath,
    /// `$XDG_CACHE_HOME/cubicle/packages`: built seed archives, one `<package>.tar` each.
    pub package_cache: HostPath,
    /// `$XDG_DATA_HOME/cubicle/packages`: user-authored package definitions.
    pub user_package_dir: HostPath,
    /// Built-in package definitions bundled alongside the binary.
    pub code_package_dir: HostPath,
    /// Directory holding `dev-init.sh`, `seccomp.bpf`, `Dockerfile.in`, `.RUNNER`.
    pub script_dir: HostPath,
    /// `$XDG_CACHE_HOME/cubicle`: scratch space for staged tarballs and the
    /// cached EFF word list.
    pub cache_dir: HostPath,
}

impl Paths {
    pub fn discover(script_dir: HostPath, code_package_dir: HostPath) -> Result<Self> {
        let dirs = BaseDirectories::with_prefix("cubicle")
            .map_err(|e| Error::Paths(e.to_string()))?;
        let cache_home = HostPath::new(dirs.get_cache_home());
        let data_home = HostPath::new(dirs.get_data_home());
        Ok(Self {
            home_dirs: cache_home.join("home"),
            work_dirs: data_home.join("work"),
            package_cache: cache_home.join("packages"),
            user_package_dir: data_home.join("packages"),
            code_package_dir,
            script_dir,
            cache_dir: cache_home,
        })
    }

    pub fn home_dir(&self, name: &EnvironmentName) -> HostPath {
        self.home_dirs.join(name)
    }

    pub fn work_dir(&self, name: &EnvironmentName) -> HostPath {
        self.work_dirs.join(name)
    }

    pub fn package_tar(&self, package: &PackageName) -> HostPath {
        self.package_cache.join(format!("{package}.tar"))
    }

    pub fn package_testing_tar(&self, package: &PackageName) -> HostPath {
        self.package_cache.join(format!("{package}.testing.tar"))
    }

    pub fn staged_seed_tar(&self, env: &EnvironmentName) -> HostPath {
        self.cache_dir.join(format!("{env}.tar"))
    }

    pub fn eff_wordlist_cache(&self) -> HostPath {
        self.cache_dir.join("eff_short_wordlist_1.txt")
    }

    pub fn runner_marker(&self) -> HostPath {
        self.script_dir.join(".RUNNER")
    }

    pub fn dev_init_script(&self) -> HostPath {
        self.script_dir.join("dev-init.sh")
    }

    pub fn seccomp_filter(&self) -> HostPath {
        self.script_dir.join("seccomp.bpf")
    }

    pub fn dockerfile_template(&self) -> HostPath {
        self.script_dir.join("Dockerfile.in")
    }
}
