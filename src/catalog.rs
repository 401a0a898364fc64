use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Resource category carried by tokens and catalog records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Photo,
    Asset,
}

/// The concrete file rendition a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "thumbnail")]
    Thumbnail,
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "full")]
    Full,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::Hd1080 => "1080p",
            Variant::Hd720 => "720p",
            Variant::Thumbnail => "thumbnail",
            Variant::Social => "social",
            Variant::Full => "full",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Variant::Original),
            "1080p" => Ok(Variant::Hd1080),
            "720p" => Ok(Variant::Hd720),
            "thumbnail" => Ok(Variant::Thumbnail),
            "social" => Ok(Variant::Social),
            "full" => Ok(Variant::Full),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Ready,
    Processing,
}

impl Default for MediaStatus {
    fn default() -> Self {
        MediaStatus::Ready
    }
}

/// A video or photo row as supplied by the lookup collaborator. The
/// transcoding/watermark pipeline deposits files at these paths upstream;
/// a `None` path means the rendition has not been produced yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    pub project_id: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub status: MediaStatus,
    #[serde(default)]
    pub original_path: Option<PathBuf>,
    #[serde(default)]
    pub preview_1080_path: Option<PathBuf>,
    #[serde(default)]
    pub preview_720_path: Option<PathBuf>,
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(default)]
    pub social_path: Option<PathBuf>,
    #[serde(default)]
    pub full_path: Option<PathBuf>,
}

/// A non-media downloadable file attached to a project (raw footage,
/// project archives, deliverable bundles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    #[serde(default)]
    pub allow_asset_download: bool,
}

/// Lookup interface the delivery core depends on. Persistence, caching and
/// query mechanics behind it are someone else's concern.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn project(&self, id: &str) -> Option<ProjectRecord>;
    async fn media(&self, id: &str) -> Option<MediaRecord>;
    async fn asset(&self, id: &str) -> Option<AssetRecord>;
}

/// In-process catalog populated through the internal control API. Stands in
/// for the ORM-backed collaborator in single-node deployments and tests.
#[derive(Default)]
pub struct MemoryCatalog {
    projects: RwLock<HashMap<String, ProjectRecord>>,
    media: RwLock<HashMap<String, MediaRecord>>,
    assets: RwLock<HashMap<String, AssetRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_project(&self, record: ProjectRecord) {
        self.projects.write().insert(record.id.clone(), record);
    }

    pub fn upsert_media(&self, record: MediaRecord) {
        self.media.write().insert(record.id.clone(), record);
    }

    pub fn upsert_asset(&self, record: AssetRecord) {
        self.assets.write().insert(record.id.clone(), record);
    }
}

#[async_trait]
impl MediaCatalog for MemoryCatalog {
    async fn project(&self, id: &str) -> Option<ProjectRecord> {
        self.projects.read().get(id).cloned()
    }

    async fn media(&self, id: &str) -> Option<MediaRecord> {
        self.media.read().get(id).cloned()
    }

    async fn asset(&self, id: &str) -> Option<AssetRecord> {
        self.assets.read().get(id).cloned()
    }
}
