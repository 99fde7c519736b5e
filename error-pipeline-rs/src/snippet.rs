//! Source snippets around an error site.
//!
//! Files are read through a [`SourceReader`] at most once per provider; the
//! result (or the fact that the file could not be read) stays cached for the
//! provider's lifetime.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

/// Text returned in place of a snippet when the file cannot be read
pub const FILE_UNAVAILABLE: &str = "File unavailable.";

/// Backing storage for source files
pub trait SourceReader: Send + Sync {
    /// Reads the file and splits it into lines
    fn read_lines(&self, path: &str) -> std::io::Result<Vec<String>>;
}

/// Reads sources from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read_lines(&self, path: &str) -> std::io::Result<Vec<String>> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_owned)
            .collect())
    }
}

// `None` marks a file that could not be read.
type FileCache = HashMap<String, Option<Arc<Vec<String>>>>;

/// Renders line-numbered windows of source text
pub struct SourceSnippetProvider {
    reader: Box<dyn SourceReader>,
    cache: Mutex<FileCache>,
}

impl std::fmt::Debug for SourceSnippetProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.lock().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("SourceSnippetProvider")
            .field("cached_files", &cached)
            .finish()
    }
}

impl Default for SourceSnippetProvider {
    fn default() -> Self {
        Self::new(Box::new(FsSourceReader))
    }
}

impl SourceSnippetProvider {
    pub fn new(reader: Box<dyn SourceReader>) -> Self {
        Self {
            reader,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `"{n}: {line}\n"` for each line in `[line - padding, line + padding]`,
    /// clipped to the file. Never fails.
    pub fn snippet(&self, file: &str, line: u32, padding: u32) -> String {
        let lines = match self.lines(file) {
            Some(lines) => lines,
            None => return FILE_UNAVAILABLE.to_string(),
        };

        let start = line.saturating_sub(padding).saturating_sub(1) as usize;
        let end = (line.saturating_add(padding) as usize).min(lines.len());

        let mut snippet = String::new();
        for (idx, text) in lines.iter().enumerate().take(end).skip(start) {
            let _ = writeln!(snippet, "{}: {}", idx + 1, text.trim());
        }
        snippet
    }

    /// Number of files held in the cache, unreadable ones included
    pub fn cached_files(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lines(&self, file: &str) -> Option<Arc<Vec<String>>> {
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(entry) = cache.get(file) {
            return entry.clone();
        }

        let entry = match self.reader.read_lines(file) {
            Ok(lines) => Some(Arc::new(lines)),
            Err(err) => {
                tracing::debug!(file = %file, error = %err, "Source file unavailable for snippet");
                None
            }
        };
        cache.insert(file.to_string(), entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReader {
        reads: Arc<AtomicUsize>,
        lines: Option<Vec<&'static str>>,
    }

    impl SourceReader for CountingReader {
        fn read_lines(&self, _path: &str) -> std::io::Result<Vec<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match &self.lines {
                Some(lines) => Ok(lines.iter().map(|l| l.to_string()).collect()),
                None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
            }
        }
    }

    fn provider(lines: Option<Vec<&'static str>>) -> (SourceSnippetProvider, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader { reads: reads.clone(), lines };
        (SourceSnippetProvider::new(Box::new(reader)), reads)
    }

    #[test]
    fn test_window_with_padding() {
        let (provider, _) = provider(Some(vec!["a", "b", "c"]));
        let snippet = provider.snippet("src/x.rs", 2, 1);
        assert_eq!(snippet, "1: a\n2: b\n3: c\n");
    }

    #[test]
    fn test_single_line_trimmed() {
        let (provider, _) = provider(Some(vec!["fn main() {", "    let x = 1;  ", "}"]));
        assert_eq!(provider.snippet("main.rs", 2, 0), "2: let x = 1;\n");
    }

    #[test]
    fn test_window_clipped_to_bounds() {
        let (provider, _) = provider(Some(vec!["a", "b", "c"]));
        assert_eq!(provider.snippet("x", 1, 5), "1: a\n2: b\n3: c\n");
        assert_eq!(provider.snippet("x", 10, 0), "");
        assert_eq!(provider.snippet("x", 0, 0), "");
    }

    #[test]
    fn test_storage_read_once() {
        let (provider, reads) = provider(Some(vec!["a", "b"]));
        provider.snippet("same.rs", 1, 0);
        provider.snippet("same.rs", 2, 0);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(provider.cached_files(), 1);
    }

    #[test]
    fn test_unreadable_file_cached_as_unavailable() {
        let (provider, reads) = provider(None);
        assert_eq!(provider.snippet("missing.rs", 3, 0), FILE_UNAVAILABLE);
        assert_eq!(provider.snippet("missing.rs", 4, 0), FILE_UNAVAILABLE);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fs_reader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        writeln!(file, "  second").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let provider = SourceSnippetProvider::default();
        assert_eq!(provider.snippet(&path, 2, 0), "2: second\n");
        assert_eq!(provider.snippet("/definitely/not/here.rs", 1, 0), FILE_UNAVAILABLE);
    }
}
