use crate::error::DeliveryError;
use crate::events::{EventType, SecurityEvent, SecurityEventLog, Severity};
use crate::policy::{ResolvedMedia, StreamCategory};
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use futures::TryStreamExt;
use std::io::Error as IoError;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

/// Per-category chunk caps. Interactive scrubbing wants small responses;
/// sequential downloads can take much larger ones. Both exist to stay under
/// upstream response-size ceilings and bound per-request transfer size, and
/// are an intentional policy surface, not constants to unify.
#[derive(Debug, Clone, Copy)]
pub struct ChunkCaps {
    pub stream: u64,
    pub download: u64,
}

impl Default for ChunkCaps {
    fn default() -> Self {
        Self {
            stream: 4 * 1024 * 1024,
            download: 50 * 1024 * 1024,
        }
    }
}

impl ChunkCaps {
    fn for_category(&self, category: StreamCategory) -> u64 {
        match category {
            StreamCategory::Stream | StreamCategory::Thumbnail => self.stream,
            StreamCategory::Download => self.download,
        }
    }
}

/// Parse a `Range: bytes=<start>-<end?>` header against a known file size.
///
/// An omitted end defaults to `start + cap - 1`; both forms clamp to the
/// last byte. Malformed, inverted or unsatisfiable ranges fall back to a
/// full 200 rather than erroring.
fn parse_range(range: Option<&str>, file_size: u64, cap: u64) -> (StatusCode, u64, u64) {
    if let Some(s) = range
        && let Some(stripped) = s.strip_prefix("bytes=")
        && let parts = stripped.split('-').collect::<Vec<_>>()
        && let Ok(start) = parts[0].parse::<u64>()
        && start < file_size
    {
        let end = parts
            .get(1)
            .and_then(|e| e.parse::<u64>().ok())
            .unwrap_or_else(|| start.saturating_add(cap - 1));
        // An end before the start (`bytes=100-50`) is as malformed as a
        // non-numeric one.
        if end >= start {
            return (StatusCode::PARTIAL_CONTENT, start, end.min(file_size - 1));
        }
    }

    (StatusCode::OK, 0, file_size.saturating_sub(1))
}

/// Streams file bytes with HTTP Range semantics under bounded memory.
///
/// The file handle lives inside the response body stream, so a client
/// abort drops the stream and closes the descriptor immediately. Whole
/// files are never read into memory regardless of size: the disk reader is
/// connected to the network through the body's backpressure-aware pipe.
#[derive(Clone)]
pub struct StreamEngine {
    caps: ChunkCaps,
    events: SecurityEventLog,
}

impl StreamEngine {
    pub fn new(caps: ChunkCaps, events: SecurityEventLog) -> Self {
        Self { caps, events }
    }

    pub async fn serve(
        &self,
        media: &ResolvedMedia,
        range: Option<&str>,
    ) -> Result<Response<Body>, DeliveryError> {
        let mut fh = tokio::fs::File::open(&media.path).await?;
        let size = fh.metadata().await?.len();

        let download = media.category == StreamCategory::Download;
        let cap = self.caps.for_category(media.category);

        let (status, start, end) = if size == 0 {
            (StatusCode::OK, 0, 0)
        } else {
            parse_range(range, size, cap)
        };

        let len = if size == 0 { 0 } else { end - start + 1 };
        debug!(path = ?media.path, size, status = %status, start, end, "Serving file");

        if start > 0 {
            fh.seek(std::io::SeekFrom::Start(start)).await?;
        }

        use tokio::io::AsyncReadExt as _;
        let path_for_log = media.path.clone();
        let events = self.events.clone();
        let stream = ReaderStream::new(fh.take(len)).map_err(move |e| {
            // A failure here aborts the response mid-body; the connection
            // drops instead of silently truncating the transfer. The
            // response headers are long gone, so the event sink is the
            // only place this failure can surface.
            error!(path = ?path_for_log, error = %e, "Stream read failed mid-transfer");
            events.record(SecurityEvent::new(
                EventType::StreamError,
                Severity::Critical,
                format!("{}: {e}", path_for_log.display()),
            ));
            IoError::new(e.kind(), e.to_string())
        });

        let mut res = Response::new(Body::from_stream(stream));
        *res.status_mut() = status;

        let headers = res.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            media.content_type.parse().unwrap_or_else(|_| {
                "application/octet-stream".parse().expect("static mime")
            }),
        );
        headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, len.to_string().parse().unwrap());
        headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());

        if status == StatusCode::PARTIAL_CONTENT {
            headers.insert(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}").parse().unwrap(),
            );
        }

        if download {
            headers.insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
            headers.insert(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", sanitize_filename(&media.file_name))
                    .parse()
                    .unwrap(),
            );
        } else {
            headers.insert(
                header::CACHE_CONTROL,
                "private, max-age=3600".parse().unwrap(),
            );
            headers.insert("X-Frame-Options", "SAMEORIGIN".parse().unwrap());
            headers.insert(
                "Referrer-Policy",
                "strict-origin-when-cross-origin".parse().unwrap(),
            );
        }

        Ok(res)
    }
}

/// Keep download filenames header-safe.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' | '\r' | '\n' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
