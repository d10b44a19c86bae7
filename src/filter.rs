//! Path eligibility: which files under the watch root are tracked.
//!
//! Globs are matched against the path relative to the root. A file is
//! eligible when it matches an include glob, matches no exclude glob
//! (configured or built in), and has a supported extension.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{WatchConfig, DEFAULT_EXCLUDES};
use crate::extract;

#[derive(Debug, Clone)]
pub struct EventFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl EventFilter {
    /// Build a filter for `root`, which should already be canonical.
    pub fn new(root: &Path, config: &WatchConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;
        Ok(Self {
            root: root.to_path_buf(),
            include,
            exclude,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is an eligible file path. Does not touch the file system.
    pub fn accepts(&self, path: &Path) -> bool {
        match self.relative(path) {
            Some(rel) => {
                self.include.is_match(rel)
                    && !self.exclude.is_match(rel)
                    && extract::is_supported(path)
            }
            None => false,
        }
    }

    /// Whether `path` lies under the root and is not excluded. Used for
    /// removals, where the path may have been a directory.
    pub fn covers(&self, path: &Path) -> bool {
        self.relative(path)
            .is_some_and(|rel| !self.exclude.is_match(rel))
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        let rel = path.strip_prefix(&self.root).ok()?;
        if rel.as_os_str().is_empty() {
            None
        } else {
            Some(rel)
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
