use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// An absolute path on the host filesystem.
///
/// Cubicle juggles two notions of "path" throughout the Runner: where a
/// thing lives on the host, and where it is bind-mounted inside a sandbox.
/// Keeping them as distinct types avoids accidentally handing a host path to
/// a process that only understands the sandbox's view of the world.
#[derive(Clone, Debug, Eq, PartialEq, Hash, derive_more::Display)]
pub struct HostPath(PathBuf);

impl HostPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        Self(self.0.join(name))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl From<PathBuf> for HostPath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl AsRef<Path> for HostPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<OsStr> for HostPath {
    fn as_ref(&self) -> &OsStr {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_appends_a_component() {
        let home = HostPath::new("/home/user/.cache/cubicle");
        assert_eq!(
            home.join("packages").as_path(),
            Path::new("/home/user/.cache/cubicle/packages")
        );
    }
}
