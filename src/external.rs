//! Resolution of external command names to executable paths.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::env::Environment;

/// Why a command name could not be turned into something executable.
///
/// The variants carry the name as typed so `Display` can produce the full
/// shell diagnostic, and each maps to the conventional exit status.
#[derive(Debug, PartialEq, Eq)]
pub enum ResolveError {
    NotFound(String),
    NoSuchFile(String),
    IsDirectory(String),
    NotExecutable(String),
}

impl ResolveError {
    /// Conventional exit status: 127 for missing, 126 for unrunnable.
    pub fn status(&self) -> i32 {
        match self {
            ResolveError::NotFound(_) | ResolveError::NoSuchFile(_) => 127,
            ResolveError::IsDirectory(_) | ResolveError::NotExecutable(_) => 126,
        }
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NotFound(name) => write!(f, "{}: command not found", name),
            ResolveError::NoSuchFile(name) => {
                write!(f, "{}: No such file or directory", name)
            }
            ResolveError::IsDirectory(name) => write!(f, "{}: Is a directory", name),
            ResolveError::NotExecutable(name) => write!(f, "{}: Permission denied", name),
        }
    }
}

/// Resolve a command name the way the shell will exec it.
///
/// A name containing `/` is taken as a path and only checked for
/// executability. Anything else is searched through the `PATH` directories
/// in order; the first entry that exists and is executable wins.
pub fn resolve(env: &Environment, name: &str) -> Result<PathBuf, ResolveError> {
    if name.contains('/') {
        return check_path(Path::new(name))
            .map(|_| PathBuf::from(name))
            .map_err(|kind| kind.with_name(name));
    }
    if name.is_empty() {
        return Err(ResolveError::NotFound(name.to_string()));
    }

    let search_paths = match env.get("PATH") {
        Some(p) => p.to_string(),
        None => return Err(ResolveError::NotFound(name.to_string())),
    };
    for dir in std::env::split_paths(&search_paths) {
        let candidate = dir.join(name);
        if check_path(&candidate).is_ok() {
            return Ok(candidate);
        }
    }
    Err(ResolveError::NotFound(name.to_string()))
}

enum PathProblem {
    Missing,
    Directory,
    NoExecBit,
}

impl PathProblem {
    fn with_name(self, name: &str) -> ResolveError {
        match self {
            PathProblem::Missing => ResolveError::NoSuchFile(name.to_string()),
            PathProblem::Directory => ResolveError::IsDirectory(name.to_string()),
            PathProblem::NoExecBit => ResolveError::NotExecutable(name.to_string()),
        }
    }
}

fn check_path(path: &Path) -> Result<(), PathProblem> {
    let metadata = std::fs::metadata(path).map_err(|_| PathProblem::Missing)?;
    if metadata.is_dir() {
        return Err(PathProblem::Directory);
    }
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(PathProblem::NoExecBit);
    }
    Ok(())
}

/// Human-readable reason for an I/O failure, without the `(os error N)`
/// suffix `std::io::Error` appends.
pub fn describe_io_error(err: &std::io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => nix::errno::Errno::from_raw(code).desc().to_string(),
        None => err.to_string(),
    }
}
