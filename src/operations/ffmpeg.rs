//! Video and capture-device operations backed by the ffmpeg/ffprobe binaries.
//!
//! Everything is piped through stdout so no intermediate files are written.

use anyhow::{Context, anyhow};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::common::errors::CapabilityError;
use crate::utils::small_width_height;

pub fn create_silent_ffmpeg_command() -> Command {
    let mut cmd = Command::new("ffmpeg");
    // These global options must come before the input/output options.
    cmd.args(["-v", "quiet", "-hide_banner", "-nostats", "-nostdin"]);
    cmd
}

fn run_to_bytes(mut cmd: Command, what: &str) -> Result<Vec<u8>, CapabilityError> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => CapabilityError::Permanent(anyhow!(
                "`{}` is not installed or not available in PATH",
                cmd.get_program().to_string_lossy()
            )),
            _ => CapabilityError::from_io(err),
        })?;

    if !output.status.success() {
        return Err(CapabilityError::Permanent(anyhow!(
            "{} failed with exit code {}: {}",
            what,
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    if output.stdout.is_empty() {
        return Err(CapabilityError::Permanent(anyhow!("{} produced no output", what)));
    }
    Ok(output.stdout)
}

/// Probe a video file using ffprobe to obtain `(width, height)` of its first video stream.
pub fn video_width_height(path: &Path) -> Result<(u32, u32), CapabilityError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height"])
        .args(["-of", "csv=p=0:s=x"])
        .arg(path);
    let stdout = run_to_bytes(cmd, "ffprobe")?;

    parse_dimensions(&String::from_utf8_lossy(&stdout))
        .with_context(|| format!("unexpected ffprobe output for {:?}", path))
        .map_err(CapabilityError::Permanent)
}

fn parse_dimensions(text: &str) -> anyhow::Result<(u32, u32)> {
    let line = text.lines().next().unwrap_or_default().trim();
    let (width, height) = line
        .split_once('x')
        .ok_or_else(|| anyhow!("no dimensions in {:?}", line))?;
    Ok((width.trim().parse()?, height.trim().parse()?))
}

/// First frame of a video as a JPEG whose larger side is `size`.
pub fn first_frame_jpeg(path: &Path, size: u32) -> Result<Vec<u8>, CapabilityError> {
    let (width, height) = video_width_height(path)?;
    let (thumb_width, thumb_height) = small_width_height(width, height, size);

    let mut cmd = create_silent_ffmpeg_command();
    cmd.arg("-i")
        .arg(path)
        .args(["-ss", "0", "-vframes", "1"])
        .args(["-vf", &format!("scale={}:{}", thumb_width, thumb_height)])
        .args(["-f", "image2pipe", "-vcodec", "mjpeg", "pipe:1"]);
    run_to_bytes(cmd, "ffmpeg thumbnail")
}

/// Re-encode a video with the watermark burned in, as fragmented mp4.
///
/// With a logo it is overlaid in the bottom-right corner; without one a
/// translucent band is drawn along the bottom edge.
pub fn watermark_video(path: &Path, logo: Option<&Path>) -> Result<Vec<u8>, CapabilityError> {
    let mut cmd = create_silent_ffmpeg_command();
    cmd.arg("-i").arg(path);
    match logo {
        Some(logo) => {
            cmd.arg("-i")
                .arg(logo)
                .args(["-filter_complex", "[1:v]scale=iw/4:-1[wm];[0:v][wm]overlay=W-w-16:H-h-16"]);
        }
        None => {
            cmd.args(["-vf", "drawbox=x=0:y=ih*0.92:w=iw:h=ih*0.08:color=black@0.4:t=fill"]);
        }
    }
    cmd.args(["-c:a", "copy"])
        .args(["-movflags", "frag_keyframe+empty_moov"])
        .args(["-f", "mp4", "pipe:1"]);
    run_to_bytes(cmd, "ffmpeg watermark")
}

/// One JPEG frame from a V4L2 capture device.
pub fn capture_frame(channel: u32) -> Result<Vec<u8>, CapabilityError> {
    let device = format!("/dev/video{}", channel);
    if !Path::new(&device).exists() {
        return Err(CapabilityError::Permanent(anyhow!("capture device {} not found", device)));
    }

    let mut cmd = create_silent_ffmpeg_command();
    cmd.args(["-f", "v4l2", "-i", &device])
        .args(["-frames:v", "1"])
        .args(["-f", "image2pipe", "-vcodec", "mjpeg", "pipe:1"]);
    run_to_bytes(cmd, "ffmpeg capture")
}
