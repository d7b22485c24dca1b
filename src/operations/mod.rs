pub mod exif_tags;
pub mod ffmpeg;
pub mod filename_tags;
pub mod http;
pub mod imaging;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::workflow::processors::analysis::VisionProvider;

/// Built-in providers in priority order: file name first, then EXIF.
pub fn default_providers(config: &AppConfig) -> Vec<Arc<dyn VisionProvider>> {
    vec![
        Arc::new(filename_tags::FilenameTagger::new(&config.location_tags)),
        Arc::new(exif_tags::ExifReader),
    ]
}
