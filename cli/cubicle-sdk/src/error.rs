use std::process::ExitStatus;

use thiserror::Error;

use crate::names::{EnvironmentName, NameError, PackageName};

#[derive(Debug, Error)]
pub enum Error {
    #[error("environment {0} does not exist")]
    NoSuchEnvironment(EnvironmentName),

    #[error("environment {0} already exists (did you mean to `reset` it?)")]
    EnvironmentAlreadyExists(EnvironmentName),

    #[error("unknown package {0:?}")]
    NoSuchPackage(PackageName),

    #[error("package dependencies are unsatisfiable for: {0:?}")]
    UnsatisfiableDependencies(Vec<PackageName>),

    #[error("package {0} provides.txt: entry {1:?} is not a plain relative path under HOME")]
    InvalidProvidesEntry(PackageName, String),

    #[error("failed to generate a random environment name")]
    NameGenerationFailed,

    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("could not resolve XDG base directories: {0}")]
    Paths(String),

    #[error("{0} exited with {1}")]
    ChildFailed(&'static str, ExitStatus),

    #[error("unexpected output from {0}")]
    UnexpectedOutput(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
