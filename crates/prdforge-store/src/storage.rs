//! Screenshot and image uploads.

use std::io::Cursor;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use prdforge_core::UploadSettings;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::StoreError;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// URL granting read access to an object for `expires_in_secs`.
    async fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub path: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Validate an uploaded image and re-encode it as JPEG.
///
/// The format is sniffed from the bytes; only JPEG, PNG, GIF and WebP pass.
pub fn prepare_image(raw: &[u8], limits: &UploadSettings) -> Result<PreparedImage, StoreError> {
    if raw.len() > limits.max_bytes {
        return Err(StoreError::ImageTooLarge {
            size: raw.len(),
            max: limits.max_bytes,
        });
    }
    let format = image::guess_format(raw).map_err(|_| StoreError::UnsupportedImage)?;
    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
    ) {
        return Err(StoreError::UnsupportedImage);
    }

    // Dimensions come from the header so oversized images are never decoded.
    let (width, height) = ImageReader::with_format(Cursor::new(raw), format).into_dimensions()?;
    if width == 0 || height == 0 || width > limits.max_dimension || height > limits.max_dimension {
        return Err(StoreError::ImageDimensions {
            width,
            height,
            max: limits.max_dimension,
        });
    }

    let img: DynamicImage = ImageReader::with_format(Cursor::new(raw), format).decode()?;
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, limits.jpeg_quality.clamp(1, 100)).encode_image(&rgb)?;
    Ok(PreparedImage {
        bytes: out.into_inner(),
        width,
        height,
    })
}

/// Validate, re-encode and store an image for a product, returning a signed URL.
pub async fn upload_image<S>(
    storage: &S,
    product_id: &str,
    raw: &[u8],
    limits: &UploadSettings,
) -> Result<UploadedImage, StoreError>
where
    S: ObjectStorage + ?Sized,
{
    let prepared = prepare_image(raw, limits)?;
    let path = format!("{}/{}.jpg", product_id, Uuid::new_v4());
    let size = prepared.bytes.len();
    storage
        .put(&limits.bucket, &path, prepared.bytes, "image/jpeg")
        .await?;
    let url = storage
        .signed_url(&limits.bucket, &path, limits.signed_url_ttl_secs)
        .await?;
    info!(product_id, path = %path, size, "uploaded image");
    Ok(UploadedImage {
        path,
        url,
        width: prepared.width,
        height: prepared.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use image::{Rgb, RgbImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn png_is_reencoded_as_jpeg() {
        let prepared = prepare_image(&encoded(8, 6, ImageFormat::Png), &UploadSettings::default()).unwrap();
        assert_eq!((prepared.width, prepared.height), (8, 6));
        assert_eq!(image::guess_format(&prepared.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn rejects_non_images() {
        let err = prepare_image(b"%PDF-1.7 not an image", &UploadSettings::default()).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedImage));
    }

    #[test]
    fn rejects_oversized_payload_and_dimensions() {
        let limits = UploadSettings {
            max_bytes: 10,
            ..Default::default()
        };
        assert!(matches!(
            prepare_image(&encoded(4, 4, ImageFormat::Png), &limits),
            Err(StoreError::ImageTooLarge { .. })
        ));

        let limits = UploadSettings {
            max_dimension: 16,
            ..Default::default()
        };
        assert!(matches!(
            prepare_image(&encoded(32, 4, ImageFormat::Png), &limits),
            Err(StoreError::ImageDimensions { width: 32, .. })
        ));
    }

    fn crc32(bytes: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &b in bytes {
            crc ^= u32::from(b);
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
            }
        }
        !crc
    }

    /// A PNG whose header claims `width` x `height` over a tiny body.
    fn png_claiming(width: u32, height: u32) -> Vec<u8> {
        let mut png = encoded(2, 2, ImageFormat::Png);
        png[16..20].copy_from_slice(&width.to_be_bytes());
        png[20..24].copy_from_slice(&height.to_be_bytes());
        let crc = crc32(&png[12..29]);
        png[29..33].copy_from_slice(&crc.to_be_bytes());
        png
    }

    #[test]
    fn dimensions_are_checked_before_decoding() {
        let err = prepare_image(&png_claiming(50_000, 50_000), &UploadSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ImageDimensions { width: 50_000, height: 50_000, max: 4096 }
        ));
    }

    #[tokio::test]
    async fn upload_stores_jpeg_and_signs_url() {
        let store = MemoryStore::new();
        let limits = UploadSettings::default();
        let uploaded = upload_image(&store, "prod-1", &encoded(3, 3, ImageFormat::Png), &limits)
            .await
            .unwrap();
        assert!(uploaded.path.starts_with("prod-1/"));
        assert!(uploaded.url.contains(&uploaded.path));
        let (bytes, content_type) = store
            .object(&format!("{}/{}", limits.bucket, uploaded.path))
            .unwrap();
        assert_eq!(content_type, "image/jpeg");
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn failed_put_surfaces_error() {
        let store = MemoryStore::new();
        store.fail_next_upload();
        let result = upload_image(&store, "p", &encoded(2, 2, ImageFormat::Png), &UploadSettings::default()).await;
        assert!(matches!(result, Err(StoreError::Network(_))));
    }
}
