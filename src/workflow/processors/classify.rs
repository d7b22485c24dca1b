use std::path::Path;

use crate::common::errors::PipelineError;
use crate::common::{VALID_IMAGE_EXTENSIONS, VALID_VIDEO_EXTENSIONS};
use crate::models::MediaType;
use crate::utils::PathExt;

/// Map a file to its media type by extension.
pub fn media_type_of(path: &Path) -> Option<MediaType> {
    let ext = path.ext_lower();
    if VALID_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Photo)
    } else if VALID_VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}

/// Endpoint for a media type under `base_url`, without doubling a trailing slash.
pub fn target_url(base_url: &str, media_type: MediaType) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), media_type.endpoint())
}

/// Decide where a file goes. Pure: the same path and base always give the same answer.
pub fn classify(path: &Path, base_url: &str) -> Result<(String, MediaType), PipelineError> {
    match media_type_of(path) {
        Some(media_type) => Ok((target_url(base_url, media_type), media_type)),
        None => Err(PipelineError::Unsupported(format!(
            "{} has no supported photo or video extension",
            path.file_name_string()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ErrorKind;

    #[test]
    fn photos_and_videos_get_their_endpoints() {
        let base = "http://192.168.1.3:8080";
        assert_eq!(
            classify(Path::new("/in/photo1.jpg"), base).unwrap(),
            ("http://192.168.1.3:8080/photo".to_string(), MediaType::Photo)
        );
        assert_eq!(
            classify(Path::new("/in/Finish_8168.JPG"), base).unwrap().1,
            MediaType::Photo
        );
        assert_eq!(
            classify(Path::new("/in/J15test1.mp4"), "http://host/api/").unwrap(),
            ("http://host/api/video".to_string(), MediaType::Video)
        );
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let err = classify(Path::new("/in/notes.xyz"), "http://host").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(classify(Path::new("/in/Makefile"), "http://host").is_err());
    }
}
