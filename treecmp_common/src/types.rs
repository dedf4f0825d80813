use crate::TreeCmpError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Size and modification time of a file, captured when it was scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub size: u64,
    pub modified: SystemTime,
}

/// Outcome of a content comparison for one matched pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareStatus {
    /// No comparison has happened yet
    NotCompared,
    /// Files are byte-for-byte identical
    Same,
    /// Files differ in content
    Different,
    /// One of the files could not be opened
    ErrorOpen,
    /// One of the files exceeds the configured size limit
    ErrorTooBig,
    /// Reading or decompressing failed part way through
    ErrorRead,
}

impl CompareStatus {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            CompareStatus::ErrorOpen | CompareStatus::ErrorTooBig | CompareStatus::ErrorRead
        )
    }
}

/// Which tree an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Side-specific commands attached by a fuzzy match rule, run to
/// decompress a file before its contents are compared
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchCommands {
    pub left: Option<String>,
    pub right: Option<String>,
}

impl MatchCommands {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn for_side(&self, side: Side) -> Option<&str> {
        match side {
            Side::Left => self.left.as_deref(),
            Side::Right => self.right.as_deref(),
        }
    }
}

/// A pattern-substitution rule pairing names that differ between the trees.
///
/// A name matching `pattern`, after substituting `replacement`, is treated as
/// the same item as the literal result on the other side. `first_command`
/// applies to the name the pattern matched, `second_command` to the other.
/// Lower weights are better matches; weight 0 is reserved for equal names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub first_command: Option<String>,
    #[serde(default)]
    pub second_command: Option<String>,
    #[serde(default = "default_rule_weight")]
    pub weight: u32,
}

fn default_rule_weight() -> u32 {
    1
}

impl MatchRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>, weight: u32) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            first_command: None,
            second_command: None,
            weight,
        }
    }

    pub fn with_commands(mut self, first: Option<String>, second: Option<String>) -> Self {
        self.first_command = first;
        self.second_command = second;
        self
    }

    /// Checks that do not need the pattern compiled
    pub fn validate(&self) -> Result<(), TreeCmpError> {
        let reason = if self.pattern.is_empty() {
            "pattern is empty"
        } else if self.weight == 0 {
            "weight 0 is reserved for identical names"
        } else {
            return Ok(());
        };
        Err(TreeCmpError::InvalidRule {
            pattern: self.pattern.clone(),
            reason: reason.to_string(),
        })
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ignore patterns (gitignore syntax, e.g. "*.o", "node_modules/")
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Semicolon-separated glob patterns selecting which file names are
    /// listed; empty lists every file
    #[serde(default)]
    pub name_filters: String,

    /// Include entries whose name starts with a dot
    #[serde(default)]
    pub show_hidden: bool,

    /// Whether to follow symbolic links
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Deepest directory level scanned; 0 lists only the roots' own entries
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Files larger than this many megabytes are not content-compared
    #[serde(default = "default_size_limit_mb")]
    pub size_limit_mb: u64,

    /// Decompress files ending in `.gz` before comparing them
    #[serde(default)]
    pub decompress_gz: bool,

    /// Fuzzy name matching rules
    #[serde(default)]
    pub match_rules: Vec<MatchRule>,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,
}

fn default_max_depth() -> usize {
    32
}

fn default_size_limit_mb() -> u64 {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            name_filters: String::new(),
            show_hidden: false,
            follow_symlinks: false,
            max_depth: default_max_depth(),
            size_limit_mb: default_size_limit_mb(),
            decompress_gz: false,
            match_rules: Vec::new(),
            portable_mode: false,
        }
    }
}

impl AppConfig {
    /// The size limit in bytes, `None` when set to zero (unlimited)
    pub fn size_limit_bytes(&self) -> Option<u64> {
        if self.size_limit_mb == 0 {
            None
        } else {
            Some(self.size_limit_mb.saturating_mul(1024 * 1024))
        }
    }

    /// Individual glob patterns from `name_filters`
    pub fn name_filter_patterns(&self) -> Vec<String> {
        self.name_filters
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}
