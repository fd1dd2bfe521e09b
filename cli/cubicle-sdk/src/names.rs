use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct NameError(String);

fn validate(kind: &str, s: &str) -> Result<(), NameError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NameError(format!("{kind} cannot be empty")));
    }
    if s.contains(|c: char| {
        (c.is_ascii() && !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_'))
            || c.is_control()
            || c.is_whitespace()
    }) {
        return Err(NameError(format!(
            "{kind} cannot contain special characters"
        )));
    }
    let path = Path::new(s);
    let mut components = path.components();
    let first = components.next();
    if components.next().is_some() {
        return Err(NameError(format!("{kind} cannot have slashes")));
    }
    if !matches!(first, Some(Component::Normal(_))) {
        return Err(NameError(format!("{kind} cannot manipulate a path")));
    }
    Ok(())
}

/// The basename of a package's directory, e.g. `rust` or `auto`.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash, derive_more::Display)]
pub struct PackageName(String);

impl FromStr for PackageName {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate("package name", s)?;
        Ok(Self(s.trim().to_owned()))
    }
}

impl PackageName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The synthetic dependency every package implicitly has, see the
    /// package index's `auto` expansion.
    pub fn auto() -> Self {
        Self(String::from("auto"))
    }

    pub fn is_auto(&self) -> bool {
        self.0 == "auto"
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The name of an environment: a user-chosen identifier, or one of the
/// reserved forms `package-<name>`, `test-package-<name>`, `tmp-<name>`.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash, derive_more::Display)]
pub struct EnvironmentName(String);

impl FromStr for EnvironmentName {
    type Err = NameError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate("environment name", s)?;
        Ok(Self(s.trim().to_owned()))
    }
}

impl AsRef<str> for EnvironmentName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for EnvironmentName {
    fn as_ref(&self) -> &Path {
        self.0.as_ref()
    }
}

impl EnvironmentName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name of the environment that backs a package's build, e.g.
    /// `package-rust`.
    pub fn for_package_build(package: &PackageName) -> Self {
        Self(format!("package-{package}"))
    }

    /// The name of the transient environment a package's `test.sh` runs in.
    pub fn for_package_test(package: &PackageName) -> Self {
        Self(format!("test-package-{package}"))
    }

    /// If this is a `package-<name>` environment, the package name it
    /// builds.
    pub fn as_package_build(&self) -> Option<PackageName> {
        self.0
            .strip_prefix("package-")
            .and_then(|rest| PackageName::from_str(rest).ok())
    }
}

impl fmt::Debug for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvironmentName({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_path_like_names() {
        assert!(EnvironmentName::from_str("").is_err());
        assert!(EnvironmentName::from_str("  ").is_err());
        assert!(EnvironmentName::from_str("../etc").is_err());
        assert!(EnvironmentName::from_str("a/b").is_err());
        assert!(EnvironmentName::from_str("foo bar").is_err());
    }

    #[test]
    fn accepts_ordinary_names() {
        assert!(EnvironmentName::from_str("e1").is_ok());
        assert!(EnvironmentName::from_str("package-rust").is_ok());
        assert!(EnvironmentName::from_str("tmp-antelope").is_ok());
    }

    #[test]
    fn recovers_the_package_name_from_a_builder_environment() {
        let rust = PackageName::from_str("rust").unwrap();
        let env = EnvironmentName::for_package_build(&rust);
        assert_eq!(env.as_str(), "package-rust");
        assert_eq!(env.as_package_build(), Some(rust));

        let plain = EnvironmentName::from_str("e1").unwrap();
        assert_eq!(plain.as_package_build(), None);
    }
}
