//! Upload intake: byte ceilings, multipart field extraction and declared
//! media type checks.
//!
//! Nothing in here touches disk except through [`ScratchDir::materialize`],
//! and that only happens after the declared type has been accepted.

use super::{
    scratch::{ScratchArtifact, ScratchDir},
    upload_service::UploadError,
};
use axum::{
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
};
use bytes::Bytes;
use futures::{Stream, TryStreamExt, ready};
use mime::Mime;
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// Media types accepted for the `video` field.
pub const VIDEO_MEDIA_TYPES: &[&str] = &["video/mp4"];

/// Media types accepted for the `thumbnail` field.
pub const THUMBNAIL_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg"];

/// Allowance for multipart boundaries and part headers on top of the field
/// ceilings when bounding the whole request body.
pub const MULTIPART_FRAMING_SLACK: u64 = 64 << 10;

/// What to pull out of a multipart body.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Form field carrying the file.
    pub name: &'static str,
    /// Accepted media type essences.
    pub accepted: &'static [&'static str],
    /// Ceiling for the file's bytes.
    pub max_bytes: u64,
    /// Ceiling for all other fields combined; those are read into memory.
    pub max_form_bytes: u64,
}

impl FieldSpec {
    /// Largest request body that can carry a conforming upload.
    pub fn body_ceiling(&self) -> u64 {
        self.max_bytes
            .saturating_add(self.max_form_bytes)
            .saturating_add(MULTIPART_FRAMING_SLACK)
    }
}

/// Stream adapter failing with `PayloadTooLarge` once more than `limit`
/// bytes have gone through it.
pub struct BoundedStream<S> {
    inner: S,
    limit: u64,
    read: u64,
    exceeded: bool,
}

impl<S> BoundedStream<S> {
    pub fn new(inner: S, limit: u64) -> Self {
        Self {
            inner,
            limit,
            read: 0,
            exceeded: false,
        }
    }

    /// Bytes passed through so far.
    #[cfg(test)]
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<S> Stream for BoundedStream<S>
where
    S: Stream<Item = Result<Bytes, UploadError>> + Unpin,
{
    type Item = Result<Bytes, UploadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.exceeded {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.read = this.read.saturating_add(chunk.len() as u64);
                if this.read > this.limit {
                    this.exceeded = true;
                    return Poll::Ready(Some(Err(UploadError::PayloadTooLarge {
                        limit: this.limit,
                    })));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => Poll::Ready(other),
        }
    }
}

/// Check a declared media type against `accepted`, ignoring parameters and
/// case.
pub fn validate_content_type(
    declared: Option<&str>,
    accepted: &[&str],
) -> Result<Mime, UploadError> {
    let raw = declared
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| UploadError::UnsupportedMediaType("missing content type".into()))?;

    let parsed: Mime = raw
        .parse()
        .map_err(|_| UploadError::UnsupportedMediaType(raw.to_string()))?;

    if accepted
        .iter()
        .any(|candidate| parsed.essence_str().eq_ignore_ascii_case(candidate))
    {
        Ok(parsed)
    } else {
        Err(UploadError::UnsupportedMediaType(
            parsed.essence_str().to_string(),
        ))
    }
}

/// File extension used for artifacts of an accepted media type.
pub fn extension_for(media_type: &Mime) -> &'static str {
    match media_type.essence_str().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Turn a request into a multipart reader without consuming any body bytes.
///
/// A declared `Content-Length` above the field's body ceiling is rejected
/// here, before the first byte is read.
pub async fn open_multipart(request: Request, target: &FieldSpec) -> Result<Multipart, UploadError> {
    if let Some(length) = declared_length(request.headers()) {
        if length > target.body_ceiling() {
            return Err(UploadError::PayloadTooLarge {
                limit: target.max_bytes,
            });
        }
    }

    Multipart::from_request(request, &())
        .await
        .map_err(|rejection| UploadError::MalformedUpload(rejection.body_text()))
}

fn multipart_failure(err: MultipartError, limit: u64) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::PayloadTooLarge { limit }
    } else {
        UploadError::MalformedUpload(err.body_text())
    }
}

/// Find the file field described by `target`, validate its declared type and
/// copy it into scratch.
///
/// Fields preceding the file are drained into nothing, bounded by
/// `target.max_form_bytes`. Fields after it are never read.
pub async fn ingest_file_field(
    multipart: &mut Multipart,
    target: &FieldSpec,
    scratch: &ScratchDir,
) -> Result<(ScratchArtifact, Mime), UploadError> {
    let mut form_bytes: u64 = 0;

    loop {
        let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(|err| multipart_failure(err, target.max_form_bytes))?
        else {
            return Err(UploadError::MissingFile(target.name));
        };

        if field.name() != Some(target.name) {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| multipart_failure(err, target.max_form_bytes))?
            {
                form_bytes = form_bytes.saturating_add(chunk.len() as u64);
                if form_bytes > target.max_form_bytes {
                    return Err(UploadError::PayloadTooLarge {
                        limit: target.max_form_bytes,
                    });
                }
            }
            continue;
        }

        let media_type = validate_content_type(field.content_type(), target.accepted)?;
        let limit = target.max_bytes;
        let body = BoundedStream::new(
            Box::pin(field.map_err(move |err| multipart_failure(err, limit))),
            limit,
        );
        let artifact = scratch.materialize(body, extension_for(&media_type)).await?;
        return Ok((artifact, media_type));
    }
}
