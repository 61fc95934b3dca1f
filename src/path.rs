//! Immutable, root-anchored path values used to address nodes in the naming
//! tree and files on the storage servers.
//!
//! A [`Path`] is a value object: it is never mutated after construction, and
//! two paths are equal iff their component sequences are equal.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::path::{Path as FsPath, PathBuf};
use std::str::FromStr;

/// Error returned by operations that are undefined for the root path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RootPathError;

impl fmt::Display for RootPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation is undefined for the root path")
    }
}

impl std::error::Error for RootPathError {}

/// Immutable ordered sequence of non-empty path components, none of which
/// contain the separator `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// The root path: the empty component sequence.
    pub fn root() -> Self {
        Path { components: Vec::new() }
    }

    /// Builds a path from an iterator of non-empty, separator-free
    /// components. Panics if a component is empty or contains `/`, since
    /// every call site in this crate constructs components from a `/`-split
    /// string or a parent-relative join and never from unchecked input.
    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components
            .into_iter()
            .map(|c| {
                let c = c.into();
                assert!(!c.is_empty() && !c.contains('/'), "invalid path component {c:?}");
                c
            })
            .collect();
        Path { components }
    }

    /// Parses the textual form (`/`-separated, leading `/` optional, root is
    /// `"/"` or `""`).
    pub fn parse(text: &str) -> Self {
        let components =
            text.split('/').filter(|segment| !segment.is_empty()).map(str::to_owned).collect();
        Path { components }
    }

    /// The path's components, in root-to-leaf order.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// True iff this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The parent of this path. Undefined for the root.
    pub fn parent(&self) -> Result<Path, RootPathError> {
        if self.is_root() {
            return Err(RootPathError);
        }
        Ok(Path { components: self.components[..self.components.len() - 1].to_vec() })
    }

    /// The final component of this path. Undefined for the root.
    pub fn last(&self) -> Result<&str, RootPathError> {
        self.components.last().map(String::as_str).ok_or(RootPathError)
    }

    /// True iff `self` and `other` share the same leading components.
    pub fn starts_with(&self, other: &Path) -> bool {
        other.components.len() <= self.components.len()
            && self.components[..other.components.len()] == other.components[..]
    }

    /// Builds the child path `self/name`.
    pub fn join(&self, name: &str) -> Self {
        assert!(!name.is_empty() && !name.contains('/'), "invalid path component {name:?}");
        let mut components = self.components.clone();
        components.push(name.to_owned());
        Path { components }
    }

    /// Lists every descendant file's path, relative to `root`, found by
    /// walking the local directory tree rooted at `root`. Directories
    /// themselves are not yielded; only regular files are.
    pub fn list_files_under(root: &FsPath) -> io::Result<Vec<Path>> {
        let mut files = Vec::new();
        walk(root, &Path::root(), &mut files)?;
        Ok(files)
    }
}

fn walk(fs_root: &FsPath, prefix: &Path, out: &mut Vec<Path>) -> io::Result<()> {
    let absolute = relative_to(fs_root, prefix);
    let mut entries: Vec<_> = std::fs::read_dir(absolute)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy().into_owned();
        let child = prefix.join(&name);
        if entry.file_type()?.is_dir() {
            walk(fs_root, &child, out)?;
        } else {
            out.push(child);
        }
    }
    Ok(())
}

/// Maps a [`Path`] onto a filesystem path rooted at `root`.
pub fn relative_to(root: &FsPath, path: &Path) -> PathBuf {
    let mut buf = root.to_path_buf();
    for component in &path.components {
        buf.push(component);
    }
    buf
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(text: &str) -> Self {
        Path::parse(text)
    }
}

impl FromStr for Path {
    type Err = Infallible;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(Path::parse(text))
    }
}
