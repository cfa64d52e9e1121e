//! Artifact listing for selection mode.
//!
//! Snapshots regular files from a directory, filtered by extension and
//! sorted newest first. A descriptor is not refreshed after listing; if the
//! file changes before it is selected the operator simply gets the new bytes.

use crate::error::BridgeResult;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Most artifacts offered at once.
pub const DEFAULT_MAX_ARTIFACTS: usize = 20;

/// Read-only snapshot of one file taken at listing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub path: PathBuf,
}

impl ArtifactDescriptor {
    /// `N B` below one KiB, otherwise whole `N KB`.
    pub fn size_label(&self) -> String {
        if self.size < 1024 {
            format!("{} B", self.size)
        } else {
            format!("{} KB", self.size / 1024)
        }
    }

    /// Local modification time as `dd.mm.yyyy HH:MM`.
    pub fn modified_label(&self) -> String {
        let local: DateTime<Local> = self.modified.into();
        local.format("%d.%m.%Y %H:%M").to_string()
    }

    /// Caption attached to the file when it is sent.
    pub fn caption(&self) -> String {
        format!(
            "📁 {}\n📅 {}\n💾 {}",
            self.name,
            self.modified_label(),
            self.size_label()
        )
    }
}

/// Supplies the artifact list shown in selection mode.
pub trait ArtifactSource: Send + Sync {
    /// Ordered newest first, already capped.
    fn list(&self) -> BridgeResult<Vec<ArtifactDescriptor>>;

    /// Where artifacts are looked for, for operator messages.
    fn location(&self) -> String;
}

/// Lists files in one directory whose extension is on an allow list.
#[derive(Debug, Clone)]
pub struct DirectoryArtifacts {
    dir: PathBuf,
    extensions: Vec<String>,
    max_items: usize,
}

impl DirectoryArtifacts {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>, max_items: usize) -> Self {
        Self {
            dir: dir.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_items,
        }
    }

    fn wanted(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

impl ArtifactSource for DirectoryArtifacts {
    fn list(&self) -> BridgeResult<Vec<ArtifactDescriptor>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !self.wanted(&path) {
                continue;
            }
            // metadata() follows symlinks, so a link to a regular file counts.
            let meta = match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            found.push(ArtifactDescriptor {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            });
        }

        found.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        debug!(dir = %self.dir.display(), count = found.len(), "artifacts listed");
        found.truncate(self.max_items);
        Ok(found)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Numbered listing sent when selection mode opens.
pub fn render_listing(items: &[ArtifactDescriptor]) -> String {
    let mut msg = format!("📦 Found {} file(s):\n\n", items.len());
    for (i, item) in items.iter().enumerate() {
        msg.push_str(&format!(
            "{}. {}\n   📅 {} | 💾 {}\n\n",
            i + 1,
            item.name,
            item.modified_label(),
            item.size_label()
        ));
    }
    msg.push_str("📥 Enter a file number to download\nor 0 to exit");
    msg
}
