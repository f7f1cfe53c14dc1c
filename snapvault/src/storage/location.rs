//! Local or ssh-reachable directory paths.

use crate::utils::errors::SnapError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A directory, either local (`/srv/backup`) or on a remote host reached over
/// ssh (`backup@nas:/volume1/backup`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    host: Option<String>,
    path: PathBuf,
}

impl Location {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            host: None,
            path: path.into(),
        }
    }

    pub fn remote(host: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            host: Some(host.into()),
            path: path.into(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_local(&self) -> bool {
        self.host.is_none()
    }

    /// Another path on the same host.
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            host: self.host.clone(),
            path: path.into(),
        }
    }

    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        self.with_path(self.path.join(name))
    }

    pub fn parent(&self) -> Option<Self> {
        self.path.parent().map(|p| self.with_path(p))
    }

    /// Sibling path with `suffix` appended to the last component.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        let mut raw = self.path.clone().into_os_string();
        raw.push(suffix);
        self.with_path(raw)
    }

    pub fn same_host(&self, other: &Location) -> bool {
        self.host == other.host
    }

    /// Whether `self` is `other` or lies somewhere below it.
    pub fn is_within(&self, other: &Location) -> bool {
        self.same_host(other) && self.path.starts_with(&other.path)
    }

    /// Argument form for rsync. Paths are passed unescaped; the driver runs
    /// rsync with `-s` so the remote side does not re-split them.
    pub fn rsync_arg(&self, trailing_slash: bool) -> String {
        let mut path = self.path.to_string_lossy().trim_end_matches('/').to_string();
        if trailing_slash || path.is_empty() {
            path.push('/');
        }
        match &self.host {
            Some(host) => format!("{host}:{path}"),
            None => path,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}:{}", host, self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// `host:path` is remote when the host part is non-empty and has no `/`.
impl FromStr for Location {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SnapError::Config("empty location".to_string()));
        }
        match s.split_once(':') {
            Some((host, path)) if !host.is_empty() && !host.contains('/') => {
                if path.is_empty() {
                    return Err(SnapError::Config(format!("location `{s}` has no path")));
                }
                Ok(Self::remote(host, trim_trailing_slash(path)))
            }
            _ => Ok(Self::local(trim_trailing_slash(s))),
        }
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
