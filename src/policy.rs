use crate::catalog::{AssetRecord, MediaRecord, ProjectRecord, ResourceKind, Variant};
use crate::error::DeliveryError;
use crate::session::Principal;
use mime_guess::from_path;
use std::path::{Path, PathBuf};

/// Response shaping category; selects chunk cap and cache headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCategory {
    Stream,
    Download,
    Thumbnail,
}

/// A fully resolved request: which file to serve and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub path: PathBuf,
    pub content_type: String,
    pub category: StreamCategory,
    pub file_name: String,
}

fn guess_type(path: &Path) -> String {
    from_path(path).first_or_octet_stream().to_string()
}

fn resolved(path: &Path, category: StreamCategory) -> ResolvedMedia {
    ResolvedMedia {
        path: path.to_path_buf(),
        content_type: guess_type(path),
        category,
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string()),
    }
}

// `None` means the upstream pipeline has not deposited the file yet.
fn require(path: &Option<PathBuf>, category: StreamCategory) -> Result<ResolvedMedia, DeliveryError> {
    path.as_deref()
        .map(|p| resolved(p, category))
        .ok_or(DeliveryError::ResourceNotReady)
}

/// Decides which concrete file variant a request may receive.
///
/// Approval is the pivot: an approved video always resolves to its original
/// file for streaming, an unapproved one only ever to a watermarked
/// preview. Guests carry a reduced capability set enforced here, not in the
/// token layer.
#[derive(Clone, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve_variant(
        &self,
        record: &MediaRecord,
        requested: Variant,
        principal: &Principal,
        download: bool,
    ) -> Result<ResolvedMedia, DeliveryError> {
        // Thumbnails resolve to the dedicated thumbnail file independent of
        // approval state.
        if requested == Variant::Thumbnail {
            return require(&record.thumbnail_path, StreamCategory::Thumbnail);
        }

        match record.kind {
            ResourceKind::Video => self.resolve_video(record, principal, download),
            ResourceKind::Photo => self.resolve_photo(record, requested, principal, download),
            ResourceKind::Asset => Err(DeliveryError::ResourceNotFound),
        }
    }

    fn resolve_video(
        &self,
        record: &MediaRecord,
        principal: &Principal,
        download: bool,
    ) -> Result<ResolvedMedia, DeliveryError> {
        if download {
            // Original downloads of unapproved cuts are the editorial
            // review path, admin only. Guests never download.
            return match principal {
                Principal::Admin => require(&record.original_path, StreamCategory::Download),
                Principal::Guest { .. } => {
                    Err(DeliveryError::Forbidden("guest downloads disabled"))
                }
                Principal::Share { .. } if record.approved => {
                    require(&record.original_path, StreamCategory::Download)
                }
                Principal::Share { .. } => {
                    Err(DeliveryError::Forbidden("original not released"))
                }
            };
        }

        if record.approved {
            // Approved videos are never watermarked, regardless of the
            // requested streaming quality.
            return require(&record.original_path, StreamCategory::Stream);
        }

        // Best available watermarked preview: 1080p, falling back to 720p.
        if record.preview_1080_path.is_some() {
            return require(&record.preview_1080_path, StreamCategory::Stream);
        }
        require(&record.preview_720_path, StreamCategory::Stream)
    }

    fn resolve_photo(
        &self,
        record: &MediaRecord,
        requested: Variant,
        principal: &Principal,
        download: bool,
    ) -> Result<ResolvedMedia, DeliveryError> {
        let category = if download {
            StreamCategory::Download
        } else {
            StreamCategory::Stream
        };

        match requested {
            Variant::Social => require(&record.social_path, category),
            Variant::Full | Variant::Original | Variant::Hd1080 | Variant::Hd720 => {
                // Full-resolution exports follow the same release gate as
                // video originals.
                match principal {
                    Principal::Admin => {}
                    Principal::Guest { .. } if download => {
                        return Err(DeliveryError::Forbidden("guest downloads disabled"));
                    }
                    _ if record.approved => {}
                    _ => return Err(DeliveryError::Forbidden("full resolution not released")),
                }
                if record.full_path.is_some() {
                    require(&record.full_path, category)
                } else {
                    require(&record.original_path, category)
                }
            }
            Variant::Thumbnail => require(&record.thumbnail_path, StreamCategory::Thumbnail),
        }
    }

    /// Asset (non-media-file) downloads: the project must allow them and
    /// the owning video must be approved. Admins bypass both gates.
    pub fn resolve_asset(
        &self,
        asset: &AssetRecord,
        owning_video: Option<&MediaRecord>,
        project: &ProjectRecord,
        principal: &Principal,
    ) -> Result<ResolvedMedia, DeliveryError> {
        match principal {
            Principal::Admin => {}
            Principal::Guest { .. } => {
                return Err(DeliveryError::Forbidden("guest downloads disabled"));
            }
            Principal::Share { .. } => {
                if !project.allow_asset_download {
                    return Err(DeliveryError::Forbidden("asset downloads disabled"));
                }
                if let Some(video) = owning_video
                    && !video.approved
                {
                    return Err(DeliveryError::Forbidden("video not approved"));
                }
            }
        }

        let path = asset
            .path
            .as_deref()
            .ok_or(DeliveryError::ResourceNotReady)?;
        Ok(ResolvedMedia {
            path: path.to_path_buf(),
            // Assets carry their own recorded content type.
            content_type: asset.content_type.clone(),
            category: StreamCategory::Download,
            file_name: asset.file_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MediaStatus;

    fn video(approved: bool) -> MediaRecord {
        MediaRecord {
            id: "v1".into(),
            project_id: "p1".into(),
            kind: ResourceKind::Video,
            approved,
            status: MediaStatus::Ready,
            original_path: Some(PathBuf::from("/media/v1/original.mp4")),
            preview_1080_path: Some(PathBuf::from("/media/v1/preview-1080.mp4")),
            preview_720_path: Some(PathBuf::from("/media/v1/preview-720.mp4")),
            thumbnail_path: Some(PathBuf::from("/media/v1/thumb.jpg")),
            social_path: None,
            full_path: None,
        }
    }

    fn share() -> Principal {
        Principal::Share {
            session_id: "s.1".into(),
        }
    }

    fn guest() -> Principal {
        Principal::Guest {
            session_id: "g.1".into(),
        }
    }

    #[test]
    fn approved_video_streams_original_for_every_quality() {
        let policy = AccessPolicy::new();
        let record = video(true);
        for requested in [Variant::Original, Variant::Hd1080, Variant::Hd720] {
            let resolved = policy
                .resolve_variant(&record, requested, &share(), false)
                .unwrap();
            assert_eq!(resolved.path, PathBuf::from("/media/v1/original.mp4"));
            assert_eq!(resolved.category, StreamCategory::Stream);
            assert_eq!(resolved.content_type, "video/mp4");
        }
    }

    #[test]
    fn unapproved_video_never_streams_the_original() {
        let policy = AccessPolicy::new();
        let record = video(false);
        for requested in [Variant::Original, Variant::Hd1080, Variant::Hd720] {
            let resolved = policy
                .resolve_variant(&record, requested, &share(), false)
                .unwrap();
            assert_eq!(resolved.path, PathBuf::from("/media/v1/preview-1080.mp4"));
        }
    }

    #[test]
    fn preview_falls_back_to_720() {
        let policy = AccessPolicy::new();
        let mut record = video(false);
        record.preview_1080_path = None;
        let resolved = policy
            .resolve_variant(&record, Variant::Hd1080, &share(), false)
            .unwrap();
        assert_eq!(resolved.path, PathBuf::from("/media/v1/preview-720.mp4"));
    }

    #[test]
    fn missing_preview_is_not_ready() {
        let policy = AccessPolicy::new();
        let mut record = video(false);
        record.preview_1080_path = None;
        record.preview_720_path = None;
        let err = policy
            .resolve_variant(&record, Variant::Hd720, &share(), false)
            .unwrap_err();
        assert!(matches!(err, DeliveryError::ResourceNotReady));
    }

    #[test]
    fn thumbnail_ignores_approval() {
        let policy = AccessPolicy::new();
        for approved in [true, false] {
            let resolved = policy
                .resolve_variant(&video(approved), Variant::Thumbnail, &share(), false)
                .unwrap();
            assert_eq!(resolved.path, PathBuf::from("/media/v1/thumb.jpg"));
            assert_eq!(resolved.category, StreamCategory::Thumbnail);
            assert_eq!(resolved.content_type, "image/jpeg");
        }
    }

    #[test]
    fn unapproved_original_download_is_admin_only() {
        let policy = AccessPolicy::new();
        let record = video(false);

        let admin = policy
            .resolve_variant(&record, Variant::Original, &Principal::Admin, true)
            .unwrap();
        assert_eq!(admin.path, PathBuf::from("/media/v1/original.mp4"));
        assert_eq!(admin.category, StreamCategory::Download);

        assert!(matches!(
            policy
                .resolve_variant(&record, Variant::Original, &share(), true)
                .unwrap_err(),
            DeliveryError::Forbidden(_)
        ));
    }

    #[test]
    fn approved_original_download_allowed_for_share_but_not_guest() {
        let policy = AccessPolicy::new();
        let record = video(true);

        assert!(
            policy
                .resolve_variant(&record, Variant::Original, &share(), true)
                .is_ok()
        );
        assert!(matches!(
            policy
                .resolve_variant(&record, Variant::Original, &guest(), true)
                .unwrap_err(),
            DeliveryError::Forbidden(_)
        ));
    }

    fn asset(path: Option<&str>) -> AssetRecord {
        AssetRecord {
            id: "a1".into(),
            project_id: "p1".into(),
            video_id: Some("v1".into()),
            path: path.map(PathBuf::from),
            content_type: "application/zip".into(),
            file_name: "footage.zip".into(),
        }
    }

    fn project(allow: bool) -> ProjectRecord {
        ProjectRecord {
            id: "p1".into(),
            allow_asset_download: allow,
        }
    }

    #[test]
    fn asset_download_gates() {
        let policy = AccessPolicy::new();
        let record = video(true);

        let ok = policy
            .resolve_asset(&asset(Some("/media/a1.zip")), Some(&record), &project(true), &share())
            .unwrap();
        assert_eq!(ok.content_type, "application/zip");
        assert_eq!(ok.file_name, "footage.zip");

        // Project flag off.
        assert!(matches!(
            policy
                .resolve_asset(&asset(Some("/media/a1.zip")), Some(&record), &project(false), &share())
                .unwrap_err(),
            DeliveryError::Forbidden(_)
        ));

        // Owning video unapproved.
        let unapproved = video(false);
        assert!(matches!(
            policy
                .resolve_asset(
                    &asset(Some("/media/a1.zip")),
                    Some(&unapproved),
                    &project(true),
                    &share()
                )
                .unwrap_err(),
            DeliveryError::Forbidden(_)
        ));

        // Admin bypasses both gates.
        assert!(
            policy
                .resolve_asset(
                    &asset(Some("/media/a1.zip")),
                    Some(&unapproved),
                    &project(false),
                    &Principal::Admin
                )
                .is_ok()
        );

        // Guests never download assets.
        assert!(matches!(
            policy
                .resolve_asset(&asset(Some("/media/a1.zip")), Some(&record), &project(true), &guest())
                .unwrap_err(),
            DeliveryError::Forbidden(_)
        ));

        // Archive not built yet.
        assert!(matches!(
            policy
                .resolve_asset(&asset(None), Some(&record), &project(true), &share())
                .unwrap_err(),
            DeliveryError::ResourceNotReady
        ));
    }

    #[test]
    fn photo_social_streams_freely_but_full_is_gated() {
        let policy = AccessPolicy::new();
        let record = MediaRecord {
            id: "ph1".into(),
            project_id: "p1".into(),
            kind: ResourceKind::Photo,
            approved: false,
            status: MediaStatus::Ready,
            original_path: Some(PathBuf::from("/media/ph1/original.jpg")),
            preview_1080_path: None,
            preview_720_path: None,
            thumbnail_path: Some(PathBuf::from("/media/ph1/thumb.jpg")),
            social_path: Some(PathBuf::from("/media/ph1/social.jpg")),
            full_path: Some(PathBuf::from("/media/ph1/full.jpg")),
        };

        let social = policy
            .resolve_variant(&record, Variant::Social, &share(), false)
            .unwrap();
        assert_eq!(social.path, PathBuf::from("/media/ph1/social.jpg"));

        assert!(matches!(
            policy
                .resolve_variant(&record, Variant::Full, &share(), false)
                .unwrap_err(),
            DeliveryError::Forbidden(_)
        ));
        assert!(
            policy
                .resolve_variant(&record, Variant::Full, &Principal::Admin, false)
                .is_ok()
        );
    }
}
