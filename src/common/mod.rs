pub mod errors;
pub mod shutdown;

pub const MAX_BUILD_RETRIES: u32 = 3;

pub const BUILD_RETRY_DELAY_MS: u64 = 100;

pub const DEFAULT_UPLOAD_ATTEMPTS: u32 = 3;

pub const DEFAULT_WORKERS: usize = 2;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 180;

pub const VALID_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jfif", "jpe", "png", "tif", "tiff", "webp", "bmp",
];

pub const VALID_VIDEO_EXTENSIONS: &[&str] = &[
    "gif", "mp4", "webm", "mkv", "mov", "avi", "flv", "wmv", "mpeg",
];

/// Keywords in a capture's file name that tell where on the course it was taken.
pub const DEFAULT_LOCATION_TAGS: &[&str] = &["start", "race", "finish", "prize", "press"];

pub const THUMBNAIL_PREFIX: &str = "thumb_";
