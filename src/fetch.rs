use crate::ScentKitError;
use bytes::BytesMut;
use futures::StreamExt;
use image::GenericImageView;
use mime::Mime;
use reqwest::Client;

/// Downloads a provider-hosted image so it can be kept as a blob.
///
/// Provider CDN links tend to expire or sit behind signed URLs, so when
/// inlining is enabled the service pulls the bytes once and stores them.
///
/// Checks, in order:
/// 1. HTTP status
/// 2. Content-Type is `image/*` when it parses
/// 3. Content-Length against `max_size`
/// 4. Streamed size against `max_size` (headers can lie)
/// 5. The bytes decode as an image with non-zero dimensions
///
/// # Returns
/// Tuple of (image_bytes, content_type) on success. The content type is the
/// sniffed one when the header is missing.
pub async fn fetch_remote_image(
    client: &Client,
    url: &str,
    max_size: usize,
) -> Result<(Vec<u8>, String), ScentKitError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ScentKitError::GenerationFailed(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ScentKitError::GenerationFailed(format!(
            "Upstream status: {}",
            resp.status()
        )));
    }

    let ct = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if let Ok(m) = ct.parse::<Mime>() {
        if m.type_().as_str() != "image" {
            return Err(ScentKitError::GenerationFailed(
                "Remote resource is not an image".into(),
            ));
        }
    }

    if let Some(len) = resp.content_length() {
        if len as usize > max_size {
            return Err(ScentKitError::GenerationFailed(
                "Remote image exceeds size limit".into(),
            ));
        }
    }

    let mut buf = BytesMut::with_capacity(8192);
    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream
        .next()
        .await
        .transpose()
        .map_err(|e| ScentKitError::GenerationFailed(e.to_string()))?
    {
        if buf.len() + chunk.len() > max_size {
            return Err(ScentKitError::GenerationFailed(
                "Remote image exceeds size limit".into(),
            ));
        }
        buf.extend_from_slice(&chunk);
    }

    let bytes = buf.to_vec();

    let format = image::guess_format(&bytes)
        .map_err(|_| ScentKitError::GenerationFailed("Unrecognized image format".into()))?;
    let img = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| ScentKitError::GenerationFailed(format!("Unable to decode image: {}", e)))?;
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(ScentKitError::GenerationFailed(
            "Invalid image dimensions".into(),
        ));
    }

    let content_type = if ct.starts_with("image/") {
        ct
    } else {
        format.to_mime_type().to_string()
    };
    Ok((bytes, content_type))
}
