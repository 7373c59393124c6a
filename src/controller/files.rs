use crate::protocol::FileMap;

/// Controller-side copy of the project files.
///
/// The currently open file belongs to the editor: scan results never
/// overwrite it.
#[derive(Debug, Clone, Default)]
pub struct FileMirror {
    files: FileMap,
    current: Option<String>,
}

impl FileMirror {
    pub fn new(files: FileMap) -> Self {
        Self {
            files,
            current: None,
        }
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn set_current(&mut self, path: Option<String>) {
        self.current = path;
    }

    /// Editor-side write
    pub fn upsert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Apply a FILES_UPDATE. Returns whether anything changed.
    pub fn merge_update(&mut self, update: &FileMap) -> bool {
        let mut changed = false;
        for (path, content) in update {
            if self.current.as_deref() == Some(path.as_str()) {
                continue;
            }
            if self.files.get(path) != Some(content) {
                self.files.insert(path.clone(), content.clone());
                changed = true;
            }
        }
        changed
    }
}
