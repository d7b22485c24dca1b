use anyhow::Context;
use exif::{In, Reader, Tag};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::fs::read;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::common::errors::CapabilityError;
use crate::models::MediaType;
use crate::operations::ffmpeg;
use crate::utils::small_width_height;
use crate::workflow::processors::artifacts::ImageProcessor;

/// Local thumbnailing and watermarking: the `image` crate for photos, ffmpeg for videos.
pub struct LocalImageProcessor {
    thumbnail_size: u32,
    logo_path: Option<PathBuf>,
    logo: Option<RgbaImage>,
}

impl LocalImageProcessor {
    pub fn new(thumbnail_size: u32, logo_path: Option<&Path>) -> anyhow::Result<Self> {
        let logo = match logo_path {
            Some(path) => Some(
                image::open(path)
                    .with_context(|| format!("failed to load watermark logo {:?}", path))?
                    .to_rgba8(),
            ),
            None => None,
        };
        Ok(Self {
            thumbnail_size,
            logo_path: logo_path.map(Path::to_path_buf),
            logo,
        })
    }

    fn stamp(&self, image: DynamicImage) -> RgbaImage {
        let mut canvas = image.to_rgba8();
        let (width, height) = canvas.dimensions();
        match &self.logo {
            Some(logo) => {
                let target_width = (width / 4).max(1);
                let target_height = (logo.height() * target_width / logo.width().max(1)).max(1);
                let scaled = imageops::resize(logo, target_width, target_height, FilterType::Triangle);
                let margin = (width / 50).max(1) as i64;
                let x = width as i64 - target_width as i64 - margin;
                let y = height as i64 - target_height as i64 - margin;
                imageops::overlay(&mut canvas, &scaled, x.max(0), y.max(0));
            }
            None => {
                let band = (height * 8 / 100).max(1);
                let shade = RgbaImage::from_pixel(width, band, Rgba([0, 0, 0, 102]));
                imageops::overlay(&mut canvas, &shade, 0, (height - band) as i64);
            }
        }
        canvas
    }
}

// ────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────

fn decode(src: &Path) -> Result<(DynamicImage, ImageFormat), CapabilityError> {
    let file_in_memory = read(src).map_err(CapabilityError::from_io)?;
    let format = image::guess_format(&file_in_memory)
        .or_else(|_| ImageFormat::from_path(src))
        .unwrap_or(ImageFormat::Jpeg);
    let mut dynamic_image = image::load_from_memory(&file_in_memory)
        .with_context(|| format!("failed to decode image {:?}", src))
        .map_err(CapabilityError::Permanent)?;
    fix_image_orientation(&file_in_memory, &mut dynamic_image);
    Ok((dynamic_image, format))
}

/// Rotate according to the EXIF orientation so derived images stand upright.
fn fix_image_orientation(file_in_memory: &[u8], dynamic_image: &mut DynamicImage) {
    let orientation = Reader::new()
        .read_from_container(&mut Cursor::new(file_in_memory))
        .ok()
        .and_then(|exif| {
            exif.get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        });
    match orientation {
        Some(3) => *dynamic_image = dynamic_image.rotate180(),
        Some(6) => *dynamic_image = dynamic_image.rotate90(),
        Some(8) => *dynamic_image = dynamic_image.rotate270(),
        _ => {}
    }
}

fn encode(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>, CapabilityError> {
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .with_context(|| format!("failed to encode {:?}", format))
        .map_err(CapabilityError::Permanent)?;
    Ok(bytes)
}

impl ImageProcessor for LocalImageProcessor {
    fn make_thumbnail(&self, src: &Path, media_type: MediaType) -> Result<Vec<u8>, CapabilityError> {
        match media_type {
            MediaType::Photo => {
                let (image, format) = decode(src)?;
                let (width, height) =
                    small_width_height(image.width(), image.height(), self.thumbnail_size);
                encode(image.thumbnail_exact(width, height), format)
            }
            MediaType::Video => ffmpeg::first_frame_jpeg(src, self.thumbnail_size),
        }
    }

    fn apply_watermark(&self, src: &Path, media_type: MediaType) -> Result<Vec<u8>, CapabilityError> {
        match media_type {
            MediaType::Photo => {
                let (image, format) = decode(src)?;
                encode(DynamicImage::ImageRgba8(self.stamp(image)), format)
            }
            MediaType::Video => ffmpeg::watermark_video(src, self.logo_path.as_deref()),
        }
    }

    fn capture_from_device(&self, channel: u32) -> Result<Vec<u8>, CapabilityError> {
        ffmpeg::capture_frame(channel)
    }
}

impl std::fmt::Debug for LocalImageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalImageProcessor")
            .field("thumbnail_size", &self.thumbnail_size)
            .field("logo_path", &self.logo_path)
            .finish()
    }
}
