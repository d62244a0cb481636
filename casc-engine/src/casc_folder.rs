//! A browsable folder tree over the names a storage knows.

use crate::jenkins96::hash_path;
use std::collections::BTreeMap;

/// A file leaf of a [`CascFolder`] tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascFile {
    pub name: String,
    /// Full path as listed by the root.
    pub full_name: String,
    pub hash: u64,
}

/// A folder whose children are ordered by lower-cased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascFolder {
    pub name: String,
    folders: BTreeMap<String, CascFolder>,
    files: BTreeMap<String, CascFile>,
}

impl CascFolder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builds a tree from `/` or `\` separated paths. Paths differing only
    /// by case land on the same node; the first spelling is kept.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = CascFolder::new("");
        for path in paths {
            root.add_path(path.as_ref());
        }
        root
    }

    pub fn add_path(&mut self, path: &str) {
        let mut parts: Vec<&str> = path.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
        let Some(file_name) = parts.pop() else {
            return;
        };

        let mut folder = self;
        for part in parts {
            folder = folder
                .folders
                .entry(part.to_lowercase())
                .or_insert_with(|| CascFolder::new(part));
        }
        folder
            .files
            .entry(file_name.to_lowercase())
            .or_insert_with(|| CascFile {
                name: file_name.to_string(),
                full_name: path.to_string(),
                hash: hash_path(path),
            });
    }

    pub fn folders(&self) -> impl Iterator<Item = &CascFolder> {
        self.folders.values()
    }

    pub fn files(&self) -> impl Iterator<Item = &CascFile> {
        self.files.values()
    }

    pub fn folder(&self, name: &str) -> Option<&CascFolder> {
        self.folders.get(&name.to_lowercase())
    }

    pub fn file(&self, name: &str) -> Option<&CascFile> {
        self.files.get(&name.to_lowercase())
    }

    /// Looks up a file by its path below this folder.
    pub fn find_file(&self, path: &str) -> Option<&CascFile> {
        let mut parts: Vec<&str> = path.split(['/', '\\']).filter(|p| !p.is_empty()).collect();
        let file_name = parts.pop()?;
        let mut folder = self;
        for part in parts {
            folder = folder.folder(part)?;
        }
        folder.file(file_name)
    }

    /// Number of files in this folder and every folder below it.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.values().map(CascFolder::file_count).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }
}
