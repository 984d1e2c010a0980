//! Exclude rules.
//!
//! Patterns are gitignore-flavoured globs, one per line:
//!
//! - `#` starts a comment line, blank lines are skipped
//! - a pattern without `/` matches a name at any depth
//! - a pattern containing `/` (or starting with one) is anchored at the
//!   replica root
//! - a trailing `/` restricts the pattern to directories
//! - an excluded directory excludes everything below it
//!
//! `*` never crosses a `/`; use `**` for that.

use crate::config::CONFIG_DIR_NAME;
use crate::error::{CoreError, CoreResult};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::Path;

/// Name pattern of partially written files left by a crashed copy.
pub const TEMP_FILE_PATTERN: &str = ".*.csync-tmp";

/// A compiled set of exclude patterns.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    any_globs: Vec<Glob>,
    dir_globs: Vec<Glob>,
    any: GlobSet,
    dirs: GlobSet,
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcludeSet {
    /// Creates a set holding only the built-in patterns: the configuration
    /// directory name and csync's temporary files.
    #[must_use]
    pub fn new() -> Self {
        let mut set = Self::empty();
        for pattern in [CONFIG_DIR_NAME, TEMP_FILE_PATTERN] {
            // Built-in patterns are valid globs.
            if let Err(err) = set.add_pattern(pattern) {
                tracing::error!(error = %err, "built-in exclude pattern rejected");
            }
        }
        set
    }

    /// Creates a set with no patterns at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            any_globs: Vec::new(),
            dir_globs: Vec::new(),
            any: GlobSet::empty(),
            dirs: GlobSet::empty(),
        }
    }

    /// Adds one pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Exclude`] if the pattern is not a valid glob.
    pub fn add_pattern(&mut self, pattern: &str) -> CoreResult<()> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        let (body, dir_only) = match trimmed.strip_suffix('/') {
            Some(body) => (body, true),
            None => (trimmed, false),
        };
        let anchored = body.starts_with('/') || body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return Err(CoreError::Exclude {
                pattern: pattern.to_string(),
                message: "pattern matches nothing".into(),
            });
        }

        let base = if anchored {
            body.to_string()
        } else {
            format!("**/{body}")
        };
        let self_glob = compile(&base, pattern)?;
        let below_glob = compile(&format!("{base}/**"), pattern)?;

        if dir_only {
            self.dir_globs.push(self_glob);
        } else {
            self.any_globs.push(self_glob);
        }
        self.any_globs.push(below_glob);
        self.patterns.push(trimmed.to_string());

        self.any = build(&self.any_globs)?;
        self.dirs = build(&self.dir_globs)?;
        Ok(())
    }

    /// Adds every pattern in `text`, one per line.
    ///
    /// # Errors
    ///
    /// Returns the first invalid pattern.
    pub fn add_patterns(&mut self, text: &str) -> CoreResult<()> {
        for line in text.lines() {
            self.add_pattern(line)?;
        }
        Ok(())
    }

    /// Adds the patterns of an exclude list file. A missing file is an
    /// error; callers decide whether the file is optional.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or the first invalid pattern.
    pub fn load_file(&mut self, path: &Path) -> CoreResult<()> {
        let text = fs::read_to_string(path)?;
        self.add_patterns(&text)?;
        tracing::debug!(path = %path.display(), patterns = self.patterns.len(), "exclude list loaded");
        Ok(())
    }

    /// Returns the source patterns in insertion order.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns true if `path` is excluded regardless of its type.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        self.any.is_match(path)
    }

    /// Returns true if `path` is excluded, taking directory-only patterns
    /// into account.
    #[must_use]
    pub fn is_excluded_entry(&self, path: &str, is_dir: bool) -> bool {
        self.is_excluded(path) || (is_dir && self.dirs.is_match(path))
    }
}

fn compile(glob: &str, pattern: &str) -> CoreResult<Glob> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .build()
        .map_err(|e| CoreError::Exclude {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn build(globs: &[Glob]) -> CoreResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(glob.clone());
    }
    builder.build().map_err(|e| CoreError::Exclude {
        pattern: String::new(),
        message: e.to_string(),
    })
}
