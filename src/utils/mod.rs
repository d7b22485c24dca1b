use std::path::{Path, PathBuf};

use crate::common::THUMBNAIL_PREFIX;
use crate::models::watched_file::MediaType;

pub trait PathExt {
    fn ext_lower(&self) -> String;
    fn file_name_string(&self) -> String;
}

impl PathExt for Path {
    fn ext_lower(&self) -> String {
        self.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn file_name_string(&self) -> String {
        self.file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Full source name with `extension` appended unless it already ends in it,
/// so `x.jpg`, `x.mp4` and `x.mov` never share a derived name.
fn derived_name(source: &Path, extension: &str) -> String {
    let name = source.file_name_string();
    if source.ext_lower() == extension {
        name
    } else {
        format!("{name}.{extension}")
    }
}

/// `thumb_<name>` for photos. Video thumbnails are single JPEG frames, so they get a `.jpg` suffix.
pub fn thumbnail_path(thumbs_dir: &Path, source: &Path, media_type: MediaType) -> PathBuf {
    let file_name = match media_type {
        MediaType::Photo => source.file_name_string(),
        MediaType::Video => derived_name(source, "jpg"),
    };
    thumbs_dir.join(format!("{THUMBNAIL_PREFIX}{file_name}"))
}

/// Photos keep their name. Watermarked videos are re-muxed to mp4, and a photo
/// stamped from a video's thumbnail is a `.jpg`.
pub fn watermarked_path(
    output_dir: &Path,
    source: &Path,
    source_media: MediaType,
    output_media: MediaType,
) -> PathBuf {
    match (source_media, output_media) {
        (MediaType::Photo, MediaType::Photo) => output_dir.join(source.file_name_string()),
        (MediaType::Video, MediaType::Photo) => output_dir.join(derived_name(source, "jpg")),
        (_, MediaType::Video) => output_dir.join(derived_name(source, "mp4")),
    }
}

/// Resize dimensions so that the larger side equals `small_height`, preserving aspect ratio
pub fn small_width_height(width: u32, height: u32, small_height: u32) -> (u32, u32) {
    let (nwidth, nheight) = if width >= std::cmp::max(height, small_height) {
        (small_height, height * small_height / width)
    } else if height >= std::cmp::max(width, small_height) {
        (width * small_height / height, small_height)
    } else {
        (width, height)
    };

    (nwidth.max(1), nheight.max(1))
}
