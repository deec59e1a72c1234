use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::logger;

use super::{ResourceMap, ResourceOrigin, ResourceStorage};

pub const DEFAULT_FILE_INCLUDES: &[&str] = &["*.yaml", "*.yml"];

pub const DEFAULT_SCAN_EXCLUDES: &[&str] = &["node_modules", "**/.git", "**/pkg/mod/**", "**/.kube"];

fn build_glob_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        builder.add(Glob::new(pattern.as_ref())?);
    }

    Ok(builder.build()?)
}

/// Include/exclude rules for a project scan. Patterns match against the
/// path relative to the project root and against the bare file name.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    includes: GlobSet,
    excludes: GlobSet,
}

impl ScanFilter {
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self> {
        let includes = if includes.is_empty() {
            build_glob_set(DEFAULT_FILE_INCLUDES)?
        } else {
            build_glob_set(includes)?
        };

        Ok(Self {
            includes,
            excludes: build_glob_set(excludes)?,
        })
    }

    fn matches(set: &GlobSet, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);

        set.is_match(relative)
            || path
                .file_name()
                .is_some_and(|name| set.is_match(Path::new(name)))
    }

    pub fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        Self::matches(&self.excludes, root, path)
    }

    pub fn is_included(&self, root: &Path, path: &Path) -> bool {
        Self::matches(&self.includes, root, path) && !self.is_excluded(root, path)
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            includes: build_glob_set(DEFAULT_FILE_INCLUDES).unwrap_or_else(|_| GlobSet::empty()),
            excludes: build_glob_set(DEFAULT_SCAN_EXCLUDES).unwrap_or_else(|_| GlobSet::empty()),
        }
    }
}

pub fn load_local_file(path: &Path) -> Result<ResourceMap> {
    let text = fs::read_to_string(path)?;

    ResourceMap::from_documents(
        &text,
        ResourceStorage::Local,
        ResourceOrigin::File {
            path: path.to_path_buf(),
        },
    )
}

/// Collects every manifest below `root`. Files that fail to parse are
/// logged and skipped.
pub fn load_local_resources(root: &Path, filter: &ScanFilter) -> Result<ResourceMap> {
    let mut map = ResourceMap::default();

    let root_entry = |entry: &DirEntry| entry.depth() == 0;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| root_entry(entry) || !filter.is_excluded(root, entry.path()));

    let mut files: Vec<PathBuf> = Vec::new();

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_file() && filter.is_included(root, entry.path()) {
            files.push(entry.into_path());
        }
    }

    for path in files {
        match load_local_file(&path) {
            Ok(resources) => {
                logger!(debug, "Loaded {} resources from {:?}", resources.len(), path);
                map.merge(resources);
            }
            Err(e) => {
                logger!(warn, "Failed to parse {:?}: {}", path, e);
            }
        }
    }

    logger!(info, "Loaded {} local resources from {:?}", map.len(), root);

    Ok(map)
}
