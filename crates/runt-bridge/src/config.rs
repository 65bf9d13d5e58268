//! Bridge configuration and artifact directory resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache root used when the editor does not name a directory next to the document.
pub const DEFAULT_CACHE_ROOT: &str = ".jovian_cache";

/// Directory name for executions that do not belong to a saved document.
pub const SCRATCHPAD: &str = "scratchpad";

/// Configuration for a bridge session.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Kernelspec to launch when no connection file is given.
    pub kernel_name: String,
    /// Attach to an already running kernel instead of launching one.
    pub connection_file: Option<PathBuf>,
    /// Root for per-document artifact directories.
    pub cache_root: PathBuf,
    /// How long to wait for the kernel to answer `kernel_info_request`.
    pub startup_timeout: Duration,
    /// Working directory for a launched kernel process.
    pub kernel_cwd: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            kernel_name: "python3".to_string(),
            connection_file: None,
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            startup_timeout: Duration::from_secs(30),
            kernel_cwd: None,
        }
    }
}

impl BridgeConfig {
    /// Resolve where an execution's artifacts live.
    ///
    /// An explicit `file_dir` wins. Otherwise the document's base name picks a
    /// directory under the cache root, and executions without a document land
    /// in the scratchpad directory.
    pub fn artifact_dir(&self, file_dir: Option<&Path>, filename: Option<&str>) -> PathBuf {
        self.cache_dir(file_dir, filename)
            .unwrap_or_else(|| self.cache_root.join(SCRATCHPAD))
    }

    /// Resolve the directory a cache command operates on, if the command names one.
    pub fn cache_dir(&self, file_dir: Option<&Path>, filename: Option<&str>) -> Option<PathBuf> {
        if let Some(dir) = file_dir.filter(|d| !d.as_os_str().is_empty()) {
            return Some(dir.to_path_buf());
        }
        filename
            .filter(|f| !f.is_empty())
            .map(|f| document_dir(&self.cache_root, f))
    }
}

/// Directory under `cache_root` holding artifacts for `document`.
pub fn document_dir(cache_root: &Path, document: &str) -> PathBuf {
    let base = Path::new(document)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(SCRATCHPAD);
    cache_root.join(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_file_dir_wins() {
        let config = BridgeConfig::default();
        let dir = config.artifact_dir(Some(Path::new("/tmp/out")), Some("analysis.py"));
        assert_eq!(dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_document_basename_under_cache_root() {
        let config = BridgeConfig::default();
        let dir = config.artifact_dir(None, Some("/home/me/project/analysis.py"));
        assert_eq!(dir, PathBuf::from(".jovian_cache/analysis.py"));
    }

    #[test]
    fn test_scratchpad_fallback() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.artifact_dir(None, None),
            PathBuf::from(".jovian_cache/scratchpad")
        );
        assert_eq!(
            config.artifact_dir(Some(Path::new("")), Some("")),
            PathBuf::from(".jovian_cache/scratchpad")
        );
    }

    #[test]
    fn test_cache_dir_requires_a_target() {
        let config = BridgeConfig::default();
        assert!(config.cache_dir(None, None).is_none());
        assert_eq!(
            config.cache_dir(None, Some("notes.py")),
            Some(PathBuf::from(".jovian_cache/notes.py"))
        );
    }
}
