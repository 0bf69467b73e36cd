//! Fire-and-forget payload archive.
//!
//! Every archived payload lands in `<folder>/<category>/` as one encoded
//! slot. Writes run on spawned tasks so a slow disk never stalls a trade.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trade_common::Payload;

/// Sub-folder for generated specification text.
pub const SPECS_FOLDER: &str = "sets";

#[derive(Debug, Clone, Default)]
pub struct PayloadArchive {
    root: Option<PathBuf>,
}

impl PayloadArchive {
    /// Archive rooted at `root`; `None` disables archiving.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Save `payload` under `category`.
    ///
    /// Returns a handle to the write task if archiving is enabled.
    pub fn save(&self, category: &str, payload: &Payload) -> Option<JoinHandle<()>> {
        let root = self.root.as_ref()?;
        let dir = root.join(category);
        let name = format!(
            "{}-{:04}-{:08X}.bin",
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            payload.species,
            payload.encryption_constant
        );
        let bytes = payload.encode();
        Some(tokio::spawn(async move {
            if let Err(e) = write_file(&dir, &name, &bytes).await {
                warn!("Failed to archive payload {}: {}", name, e);
            }
        }))
    }

    /// Save specification text as set number `number`.
    pub fn save_spec(&self, number: u64, text: &str) -> Option<JoinHandle<()>> {
        let root = self.root.as_ref()?;
        let dir = root.join(SPECS_FOLDER);
        let name = format!("spec-{number}.txt");
        let bytes = text.as_bytes().to_vec();
        Some(tokio::spawn(async move {
            if let Err(e) = write_file(&dir, &name, &bytes).await {
                warn!("Failed to archive specification {}: {}", name, e);
            }
        }))
    }
}

async fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    fs::write(&path, bytes).await?;
    debug!("Archived {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn saves_payload_under_category() {
        let dir = TempDir::new().unwrap();
        let archive = PayloadArchive::new(Some(dir.path().to_path_buf()));
        let payload = Payload {
            species: 25,
            encryption_constant: 0xDEAD_BEEF,
            ..Payload::default()
        };

        archive.save("hacked", &payload).unwrap().await.unwrap();

        let mut entries = std::fs::read_dir(dir.path().join("hacked")).unwrap();
        let entry = entries.next().unwrap().unwrap();
        let name = entry.file_name().into_string().unwrap();
        assert!(name.ends_with("-0025-DEADBEEF.bin"), "unexpected name {name}");
        let bytes = std::fs::read(entry.path()).unwrap();
        assert_eq!(Payload::decode(&bytes).species, 25);
    }

    #[tokio::test]
    async fn saves_numbered_specs() {
        let dir = TempDir::new().unwrap();
        let archive = PayloadArchive::new(Some(dir.path().to_path_buf()));
        archive.save_spec(3, "Ralts\nBall: Dusk").unwrap().await.unwrap();
        let text = std::fs::read_to_string(dir.path().join("sets/spec-3.txt")).unwrap();
        assert_eq!(text, "Ralts\nBall: Dusk");
    }

    #[test]
    fn disabled_archive_spawns_nothing() {
        let archive = PayloadArchive::disabled();
        assert!(!archive.is_enabled());
        assert!(archive.save("traded", &Payload::default()).is_none());
    }
}
