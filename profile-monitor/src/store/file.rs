//! JSON file store.
//!
//! Layout under the data directory, per monitored user:
//! - `<user>_<kind>.json`: `[count, [{"id": .., "name": ..}, ..]]`
//! - `<user>_profile_pic.jpeg`: raw picture bytes
//! - `<user>_profile_pic.json`: sidecar with presence, modification time and digest

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::BaselineStore;
use crate::Result;
use crate::api::ImageBlob;
use crate::monitor::{EntityKind, PictureBaseline, SetBaseline};
use crate::utils::fs::{read_optional, remove_if_exists, write_atomic};

#[derive(Debug, Serialize, Deserialize)]
struct PictureSidecar {
    present: bool,
    #[serde(default)]
    last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Clone)]
pub struct FileBaselineStore {
    dir: PathBuf,
    user_id: String,
}

impl FileBaselineStore {
    pub fn new(dir: impl Into<PathBuf>, user_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            user_id: sanitize(&user_id.into()),
        }
    }

    pub fn set_path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}_{}.json", self.user_id, kind.as_str()))
    }

    pub fn picture_path(&self) -> PathBuf {
        self.dir.join(format!("{}_profile_pic.jpeg", self.user_id))
    }

    pub fn picture_sidecar_path(&self) -> PathBuf {
        self.dir.join(format!("{}_profile_pic.json", self.user_id))
    }
}

/// User ids end up in file names.
fn sanitize(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    match read_optional(path).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl BaselineStore for FileBaselineStore {
    async fn load_set(&self, kind: EntityKind) -> Result<Option<SetBaseline>> {
        let path = self.set_path(kind);
        let baseline: Option<SetBaseline> = read_json(&path).await?;
        if let Some(b) = &baseline {
            debug!(kind = %kind, count = b.count, path = %path.display(), "Loaded baseline");
        }
        Ok(baseline)
    }

    async fn save_set(&self, kind: EntityKind, baseline: &SetBaseline) -> Result<()> {
        let json = serde_json::to_vec(baseline)?;
        write_atomic(&self.set_path(kind), &json).await
    }

    async fn load_picture(&self) -> Result<Option<PictureBaseline>> {
        let Some(sidecar) = read_json::<PictureSidecar>(&self.picture_sidecar_path()).await? else {
            return Ok(None);
        };
        if !sidecar.present {
            return Ok(Some(PictureBaseline::new(None)));
        }

        let path = self.picture_path();
        let Some(bytes) = read_optional(&path).await? else {
            warn!(path = %path.display(), "Picture sidecar present but image file missing");
            return Ok(None);
        };
        if let Some(expected) = &sidecar.sha256
            && *expected != digest(&bytes)
        {
            warn!(path = %path.display(), "Stored picture does not match its recorded digest");
        }
        Ok(Some(PictureBaseline::new(Some(ImageBlob {
            bytes,
            last_modified: sidecar.last_modified,
        }))))
    }

    async fn save_picture(&self, baseline: &PictureBaseline) -> Result<()> {
        let sidecar = match &baseline.image {
            Some(image) => {
                write_atomic(&self.picture_path(), &image.bytes).await?;
                PictureSidecar {
                    present: true,
                    last_modified: image.last_modified,
                    sha256: Some(digest(&image.bytes)),
                    size: image.bytes.len() as u64,
                }
            }
            None => {
                remove_if_exists(&self.picture_path()).await?;
                PictureSidecar {
                    present: false,
                    last_modified: None,
                    sha256: None,
                    size: 0,
                }
            }
        };
        let json = serde_json::to_vec_pretty(&sidecar)?;
        write_atomic(&self.picture_sidecar_path(), &json).await
    }
}
