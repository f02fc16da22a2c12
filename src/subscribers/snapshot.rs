use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

use super::{Error, Subscriber};

#[derive(Serialize, Deserialize)]
struct SnapshotFile<T> {
    #[serde(rename = "Users")]
    users: T,
}

/// The on-disk copy of the registry, rewritten in full on every change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// A missing file is an empty registry.
    pub async fn load(&self) -> Result<Vec<Subscriber>, Error> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No subscriber file at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let file: SnapshotFile<Vec<Subscriber>> = serde_json::from_slice(&content)?;

        let mut subscribers: Vec<Subscriber> = Vec::with_capacity(file.users.len());
        for sub in file.users {
            if subscribers.iter().any(|s| s.chat_id == sub.chat_id) {
                log::warn!("Duplicate chat id {} in subscriber file, skipping", sub.chat_id);
                continue;
            }
            subscribers.push(sub);
        }

        Ok(subscribers)
    }

    /// Writes a sibling temp file and renames it over the snapshot.
    pub async fn save(&self, subscribers: &[Subscriber]) -> Result<(), Error> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"      ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        SnapshotFile { users: subscribers }.serialize(&mut ser)?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &buf).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        log::debug!(
            "Saved {} subscribers to {}",
            subscribers.len(),
            self.path.display()
        );
        Ok(())
    }
}
