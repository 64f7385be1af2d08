//! Script source resolution.
//!
//! The bridge never performs blocking I/O on its own; resolving a location
//! into script text is the caller's concern, abstracted behind
//! [`SourceLoader`]. The bundled [`FileLoader`] reads from the filesystem,
//! optionally rooted at a directory.

use std::io;
use std::path::PathBuf;

/// Resolves a location identifier into script text.
///
/// Implementations are read-only: a loader returns the text or a read
/// error, nothing else.
pub trait SourceLoader {
    fn load(&self, location: &str) -> io::Result<String>;
}

/// Filesystem-backed [`SourceLoader`].
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    root: Option<PathBuf>,
}

impl FileLoader {
    pub fn new() -> Self {
        FileLoader::default()
    }

    /// Resolve locations relative to `root` instead of the process cwd.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        FileLoader {
            root: Some(root.into()),
        }
    }
}

impl SourceLoader for FileLoader {
    fn load(&self, location: &str) -> io::Result<String> {
        let path = match &self.root {
            Some(root) => root.join(location),
            None => PathBuf::from(location),
        };
        std::fs::read_to_string(path)
    }
}
