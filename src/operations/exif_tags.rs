use async_trait::async_trait;
use exif::{In, Reader, Tag};
use log::debug;
use std::io::Cursor;

use crate::models::TagSet;
use crate::workflow::processors::analysis::{AnalysisInput, ProviderError, VisionProvider};

pub const PROVIDER: &str = "exif";

/// Capture time and camera model from the photo's EXIF block.
///
/// A photo without EXIF is not an error; it simply yields no tags.
pub struct ExifReader;

impl ExifReader {
    fn read(bytes: &[u8]) -> TagSet {
        let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
            Ok(exif) => exif,
            Err(err) => {
                debug!("No EXIF data: {}", err);
                return TagSet::new();
            }
        };

        let mut tags = TagSet::new();
        for (tag, name) in [(Tag::DateTime, "datetime"), (Tag::Model, "camera")] {
            if let Some(field) = exif.get_field(tag, In::PRIMARY) {
                let value = field.display_value().to_string();
                let value = value.trim_matches('"').trim();
                if !value.is_empty() {
                    tags = tags.with_value(name, value, 1.0, PROVIDER);
                }
            }
        }
        tags
    }
}

#[async_trait]
impl VisionProvider for ExifReader {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze_photo(&self, input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
        Ok(Self::read(input.bytes))
    }

    async fn analyze_video(&self, _input: AnalysisInput<'_>) -> Result<TagSet, ProviderError> {
        Ok(TagSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn photos_without_exif_yield_no_tags() {
        let mut jpeg = Vec::new();
        image::RgbImage::new(8, 8)
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let tags = ExifReader
            .analyze_photo(AnalysisInput {
                name: "photo1.jpg",
                bytes: &jpeg,
            })
            .await
            .unwrap();

        assert!(tags.is_empty());
        assert!(!tags.degraded);
    }

    #[tokio::test]
    async fn garbage_is_not_an_error() {
        let tags = ExifReader
            .analyze_photo(AnalysisInput {
                name: "photo1.jpg",
                bytes: b"not an image",
            })
            .await
            .unwrap();

        assert!(tags.is_empty());
    }
}
