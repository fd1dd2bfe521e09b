use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use std::str::FromStr;

use cubicle_core::HostPath;
use cubicle_core::fs_util::{open_no_follow, try_iterdir};

use crate::error::{Error, Result};
use crate::names::PackageName;
use crate::paths::Paths;

/// A discovered package definition: a directory under the built-in or
/// user package trees containing (at minimum) a `provides` output once
/// built, and optionally `depends.txt`, `build-depends.txt`, `update.sh`,
/// `test.sh`.
#[derive(Clone, Debug)]
pub struct Package {
    pub name: PackageName,
    pub dir: HostPath,
    /// `"built-in"` or the name of the user-package subdirectory it came from.
    pub origin: String,
    pub depends: BTreeSet<PackageName>,
    pub build_depends: BTreeSet<PackageName>,
    /// Legacy `provides.txt`: relative paths under HOME this package drops
    /// files at directly, without going through `update.sh`.
    pub provides: Vec<String>,
    pub update_script: Option<HostPath>,
    pub test_script: Option<HostPath>,
}

/// The full set of known packages, keyed by name, with dependency edges
/// resolved and the synthetic `auto` cycle broken.
#[derive(Clone, Debug, Default)]
pub struct PackageIndex {
    packages: BTreeMap<PackageName, Package>,
}

impl PackageIndex {
    /// Walks the user package directory (one origin per immediate
    /// subdirectory) followed by the built-in package directory, then
    /// breaks the `auto` dependency cycle every package implicitly has.
    pub fn discover(paths: &Paths) -> Result<Self> {
        let mut index = Self::default();

        let mut origins = try_iterdir(paths.user_package_dir.as_path())?;
        origins.sort();
        for origin_dir in origins {
            if !origin_dir.is_dir() {
                continue;
            }
            let origin = origin_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            index.add_packages(&HostPath::new(origin_dir), &origin)?;
        }
        index.add_packages(&paths.code_package_dir, "built-in")?;

        index.break_auto_cycle();
        Ok(index)
    }

    fn add_packages(&mut self, dir: &HostPath, origin: &str) -> Result<()> {
        let mut entries = try_iterdir(dir.as_path())?;
        entries.sort();
        for package_dir in entries {
            if !package_dir.is_dir() {
                continue;
            }
            let Some(name) = package_dir.file_name() else {
                continue;
            };
            let name = PackageName::from_str(&name.to_string_lossy())?;
            if self.packages.contains_key(&name) {
                continue;
            }

            let package_dir = HostPath::new(package_dir);
            let mut depends = read_name_list(&package_dir.join("depends.txt"))?;
            let build_depends = read_name_list(&package_dir.join("build-depends.txt"))?;
            depends.insert(PackageName::auto());
            let provides = read_provides_list(&name, &package_dir.join("provides.txt"))?;

            let update_script = package_dir.join("update.sh");
            let test_script = package_dir.join("test.sh");

            self.packages.insert(
                name.clone(),
                Package {
                    name,
                    dir: package_dir.clone(),
                    origin: origin.to_owned(),
                    depends,
                    build_depends,
                    provides,
                    update_script: update_script.as_path().is_file().then_some(update_script),
                    test_script: test_script.as_path().is_file().then_some(test_script),
                },
            );
        }
        Ok(())
    }

    /// `auto` is an implicit dependency of every package, but its own
    /// transitive closure can't depend on itself. Strip `auto` back out
    /// of the depends sets of exactly the packages reachable from `auto`.
    fn break_auto_cycle(&mut self) {
        let auto = PackageName::auto();
        if !self.packages.contains_key(&auto) {
            return;
        }
        let closure = self.transitive_depends_unchecked([auto.clone()], true);
        for name in closure {
            if let Some(package) = self.packages.get_mut(&name) {
                package.depends.remove(&auto);
            }
        }
    }

    pub fn get(&self, name: &PackageName) -> Result<&Package> {
        self.packages
            .get(name)
            .ok_or_else(|| Error::NoSuchPackage(name.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.packages.keys()
    }

    /// Every package reachable from `packages` by `depends` edges, and
    /// also by `build-depends` edges when `build_depends` is set.
    pub fn transitive_depends(
        &self,
        packages: impl IntoIterator<Item = PackageName>,
        build_depends: bool,
    ) -> Result<BTreeSet<PackageName>> {
        let packages: Vec<PackageName> = packages.into_iter().collect();
        for p in &packages {
            self.get(p)?;
        }
        Ok(self.transitive_depends_unchecked(packages, build_depends))
    }

    fn transitive_depends_unchecked(
        &self,
        packages: impl IntoIterator<Item = PackageName>,
        build_depends: bool,
    ) -> BTreeSet<PackageName> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<PackageName> = packages.into_iter().collect();
        while let Some(p) = stack.pop() {
            if !visited.insert(p.clone()) {
                continue;
            }
            let Some(package) = self.packages.get(&p) else {
                continue;
            };
            stack.extend(package.depends.iter().cloned());
            if build_depends {
                stack.extend(package.build_depends.iter().cloned());
            }
        }
        visited
    }
}

fn read_name_list(path: &HostPath) -> Result<BTreeSet<PackageName>> {
    use std::io::{BufRead, BufReader};

    match open_no_follow(path.as_path()) {
        Ok(file) => {
            let mut names = BTreeSet::new();
            for line in BufReader::new(file).lines() {
                let line = line?;
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    names.insert(PackageName::from_str(trimmed)?);
                }
            }
            Ok(names)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(e.into()),
    }
}

/// Parses a package's `provides.txt`: one relative path per line, naming a
/// file the package drops directly under HOME. Unlike `depends.txt`,
/// entries here are paths rather than package names, so they get their own
/// validation: no absolute paths, no `~/` prefix, no `..` segment.
fn read_provides_list(name: &PackageName, path: &HostPath) -> Result<Vec<String>> {
    use std::io::{BufRead, BufReader};

    match open_no_follow(path.as_path()) {
        Ok(file) => {
            let mut entries = Vec::new();
            for line in BufReader::new(file).lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                validate_provides_entry(trimmed)
                    .ok_or_else(|| Error::InvalidProvidesEntry(name.clone(), trimmed.to_owned()))?;
                entries.push(trimmed.to_owned());
            }
            Ok(entries)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// A `provides.txt` entry is rejected if it's absolute, `~`-prefixed, or
/// contains a `..` segment, mirroring the path-component checks
/// `names.rs::validate` already does for package/environment names.
fn validate_provides_entry(entry: &str) -> Option<()> {
    if entry.starts_with('~') {
        return None;
    }
    let path = Path::new(entry);
    if path.is_absolute() {
        return None;
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::paths::Paths;

    fn write_package(dir: &std::path::Path, name: &str, depends: &[&str]) {
        let package_dir = dir.join(name);
        fs::create_dir_all(&package_dir).unwrap();
        if !depends.is_empty() {
            fs::write(package_dir.join("depends.txt"), depends.join("\n")).unwrap();
        }
    }

    #[test]
    fn discovers_built_in_packages_and_strips_the_auto_cycle() {
        let user_dir = tempfile::tempdir().unwrap();
        let code_dir = tempfile::tempdir().unwrap();
        write_package(code_dir.path(), "auto", &[]);
        write_package(code_dir.path(), "rust", &["auto"]);

        let paths = Paths {
            home_dirs: HostPath::new("/tmp/unused-home"),
            work_dirs: HostPath::new("/tmp/unused-work"),
            package_cache: HostPath::new("/tmp/unused-cache"),
            user_package_dir: HostPath::new(user_dir.path()),
            code_package_dir: HostPath::new(code_dir.path()),
            script_dir: HostPath::new("/tmp/unused-script"),
            cache_dir: HostPath::new("/tmp/unused-cache-dir"),
        };

        let index = PackageIndex::discover(&paths).unwrap();
        let auto = index.get(&PackageName::auto()).unwrap();
        assert!(!auto.depends.contains(&PackageName::auto()));

        let rust = index.get(&PackageName::from_str("rust").unwrap()).unwrap();
        assert!(rust.depends.contains(&PackageName::auto()));
    }

    #[test]
    fn transitive_depends_follows_build_depends_only_when_asked() {
        let user_dir = tempfile::tempdir().unwrap();
        let code_dir = tempfile::tempdir().unwrap();
        write_package(code_dir.path(), "auto", &[]);
        write_package(code_dir.path(), "base", &["auto"]);
        write_package(code_dir.path(), "rust", &["auto", "base"]);
        fs::write(
            code_dir.path().join("rust").join("build-depends.txt"),
            "base\n",
        )
        .unwrap();

        let paths = Paths {
            home_dirs: HostPath::new("/tmp/unused-home"),
            work_dirs: HostPath::new("/tmp/unused-work"),
            package_cache: HostPath::new("/tmp/unused-cache"),
            user_package_dir: HostPath::new(user_dir.path()),
            code_package_dir: HostPath::new(code_dir.path()),
            script_dir: HostPath::new("/tmp/unused-script"),
            cache_dir: HostPath::new("/tmp/unused-cache-dir"),
        };
        let index = PackageIndex::discover(&paths).unwrap();
        let rust = PackageName::from_str("rust").unwrap();

        let depends_only = index.transitive_depends([rust.clone()], false).unwrap();
        assert!(depends_only.contains(&PackageName::from_str("base").unwrap()));

        let with_build = index.transitive_depends([rust], true).unwrap();
        assert!(with_build.contains(&PackageName::from_str("base").unwrap()));
    }

    #[test]
    fn provides_txt_entries_are_validated_and_recorded() {
        let user_dir = tempfile::tempdir().unwrap();
        let code_dir = tempfile::tempdir().unwrap();
        write_package(code_dir.path(), "auto", &[]);
        write_package(code_dir.path(), "dotfiles", &["auto"]);
        fs::write(
            code_dir.path().join("dotfiles").join("provides.txt"),
            ".bashrc\nbin/helper\n",
        )
        .unwrap();

        let paths = Paths {
            home_dirs: HostPath::new("/tmp/unused-home"),
            work_dirs: HostPath::new("/tmp/unused-work"),
            package_cache: HostPath::new("/tmp/unused-cache"),
            user_package_dir: HostPath::new(user_dir.path()),
            code_package_dir: HostPath::new(code_dir.path()),
            script_dir: HostPath::new("/tmp/unused-script"),
            cache_dir: HostPath::new("/tmp/unused-cache-dir"),
        };

        let index = PackageIndex::discover(&paths).unwrap();
        let dotfiles = index.get(&PackageName::from_str("dotfiles").unwrap()).unwrap();
        assert_eq!(dotfiles.provides, vec![String::from(".bashrc"), String::from("bin/helper")]);
    }

    #[test]
    fn provides_txt_rejects_paths_that_escape_home() {
        assert!(validate_provides_entry("bin/helper").is_some());
        assert!(validate_provides_entry("/etc/passwd").is_none());
        assert!(validate_provides_entry("~/bin/helper").is_none());
        assert!(validate_provides_entry("../outside").is_none());
        assert!(validate_provides_entry("bin/../../outside").is_none());
    }

    #[test]
    fn discover_fails_when_a_package_has_an_invalid_provides_entry() {
        let user_dir = tempfile::tempdir().unwrap();
        let code_dir = tempfile::tempdir().unwrap();
        write_package(code_dir.path(), "auto", &[]);
        write_package(code_dir.path(), "bad", &["auto"]);
        fs::write(code_dir.path().join("bad").join("provides.txt"), "../escape\n").unwrap();

        let paths = Paths {
            home_dirs: HostPath::new("/tmp/unused-home"),
            work_dirs: HostPath::new("/tmp/unused-work"),
            package_cache: HostPath::new("/tmp/unused-cache"),
            user_package_dir: HostPath::new(user_dir.path()),
            code_package_dir: HostPath::new(code_dir.path()),
            script_dir: HostPath::new("/tmp/unused-script"),
            cache_dir: HostPath::new("/tmp/unused-cache-dir"),
        };

        let err = PackageIndex::discover(&paths).unwrap_err();
        assert!(matches!(err, Error::InvalidProvidesEntry(_, _)));
    }
}
