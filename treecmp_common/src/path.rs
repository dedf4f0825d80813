use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};

// A backslash is an ordinary file name character outside Windows
#[cfg(windows)]
const SEPARATORS: &[char] = &['/', '\\'];
#[cfg(not(windows))]
const SEPARATORS: &[char] = &['/'];

/// A path relative to a tree root, stored as a list of components.
///
/// The empty path denotes the root itself. Ordering is the tree order used
/// by the comparison list: components are compared left to right, and at
/// each position a directory component (one that is followed by more
/// components) sorts before a file component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RelPath {
    components: Vec<String>,
}

impl RelPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a `/`-separated relative path (`\` is accepted too on
    /// Windows). Empty, `.` and `..` segments are dropped.
    pub fn parse(s: &str) -> Self {
        let components = s
            .split(SEPARATORS)
            .filter(|c| !c.is_empty() && *c != "." && *c != "..")
            .map(str::to_string)
            .collect();
        Self { components }
    }

    /// Build from a filesystem path relative to a root. Returns `None` for
    /// paths that are absolute, climb above the root, or are not valid UTF-8.
    pub fn from_path(path: &Path) -> Option<Self> {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => components.push(name.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(Self { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of directories between the root and this path's parent.
    pub fn depth(&self) -> usize {
        self.components.len().saturating_sub(1)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<RelPath> {
        if self.components.is_empty() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, name: &str) -> RelPath {
        let mut components = self.components.clone();
        components.extend(Self::parse(name).components);
        Self { components }
    }

    /// Prefix every component of `other` with this path.
    pub fn concat(&self, other: &RelPath) -> RelPath {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Self { components }
    }

    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        self.components.starts_with(&prefix.components)
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.components.iter().collect()
    }

    /// Resolve against a tree root.
    pub fn under(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in &self.components {
            path.push(component);
        }
        path
    }
}

impl Ord for RelPath {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = &self.components;
        let b = &other.components;
        for i in 0..a.len().min(b.len()) {
            let a_is_dir = i + 1 < a.len();
            let b_is_dir = i + 1 < b.len();
            if a_is_dir != b_is_dir {
                return if a_is_dir { Ordering::Less } else { Ordering::Greater };
            }
            match a[i].cmp(&b[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        a.len().cmp(&b.len())
    }
}

impl PartialOrd for RelPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

impl From<&str> for RelPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for RelPath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.to_string()
    }
}
