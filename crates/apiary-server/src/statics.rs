//! In-memory static file table.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, error};

/// Load every file under `root` keyed by `/relative/path`.
///
/// Missing directories or files are skipped silently; other I/O failures
/// are logged and the affected entry is left out.
pub async fn load_static(root: &Path) -> HashMap<String, Bytes> {
    let mut files = HashMap::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Static directory not found");
                continue;
            }
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Failed to read static directory");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!(dir = %dir.display(), error = %e, "Failed to list static directory");
                    break;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to stat static entry");
                    continue;
                }
            };
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    let key = static_key(root, &path);
                    files.insert(key, Bytes::from(data));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to read static file");
                }
            }
        }
    }

    debug!(count = files.len(), root = %root.display(), "Static files loaded");
    files
}

fn static_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<_> = rel
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect();
    format!("/{}", parts.join("/"))
}
