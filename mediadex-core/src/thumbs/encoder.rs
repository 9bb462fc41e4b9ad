//! Derivative generation: still images are resized, videos contribute one
//! frame near the start.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
#[cfg(not(feature = "ffmpeg"))]
use std::process::Stdio;
use tracing::debug;

use crate::error::{MediaError, Result};

/// The external encode step. Both calls may be slow and may fail; callers
/// treat a failure as "no thumbnail for this file this time".
#[async_trait]
pub trait ThumbnailEncoder: Send + Sync {
    async fn encode_image(&self, src: &Path, dst: &Path) -> Result<()>;

    async fn extract_video_frame(&self, src: &Path, dst: &Path) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Longest edge of the bounding box the derivative must fit inside.
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub ffmpeg_path: PathBuf,
    /// Where in the clip to grab the frame. Short clips fall back to the
    /// first frame.
    pub frame_offset_secs: f64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            max_dimension: 320,
            jpeg_quality: 80,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            frame_offset_secs: 1.0,
        }
    }
}

/// `image` for stills, ffmpeg for video frames.
#[derive(Clone, Debug, Default)]
pub struct StandardEncoder {
    settings: EncoderSettings,
}

impl StandardEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    async fn run_blocking<F>(src: &Path, work: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let subject = src.display().to_string();
        tokio::task::spawn_blocking(move || {
            // Decoders panic on some corrupt inputs.
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(_) => Err(MediaError::encode(
                    subject,
                    "decoder panicked, file is likely corrupt",
                )),
            }
        })
        .await
        .map_err(|e| MediaError::Internal(format!("encode task failed: {e}")))?
    }

    #[cfg(not(feature = "ffmpeg"))]
    async fn grab_frame(&self, src: &Path) -> Result<DynamicImage> {
        match self.ffmpeg_frame(src, Some(self.settings.frame_offset_secs)).await {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) => debug!(src = %src.display(), "no frame at offset, using the first frame"),
            Err(err) => {
                debug!(src = %src.display(), "seeked grab failed, using the first frame: {err}")
            }
        }
        self.ffmpeg_frame(src, None).await?.ok_or_else(|| {
            MediaError::encode(src.display().to_string(), "no decodable video frame")
        })
    }

    /// Runs the ffmpeg binary, reading one PNG frame from its stdout. `None`
    /// when ffmpeg produced no frame (seek past the end).
    #[cfg(not(feature = "ffmpeg"))]
    async fn ffmpeg_frame(
        &self,
        src: &Path,
        seek_secs: Option<f64>,
    ) -> Result<Option<DynamicImage>> {
        let mut command = tokio::process::Command::new(&self.settings.ffmpeg_path);
        command.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if let Some(seek) = seek_secs {
            command.arg("-ss").arg(format!("{seek:.3}"));
        }
        command
            .arg("-i")
            .arg(src)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = command
            .output()
            .await
            .map_err(|e| {
                MediaError::encode(src.display().to_string(), format!("failed to run ffmpeg: {e}"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::encode(
                src.display().to_string(),
                format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        if output.stdout.is_empty() {
            return Ok(None);
        }

        let frame = image::load_from_memory(&output.stdout)
            .map_err(|e| MediaError::encode(src.display().to_string(), e))?;
        Ok(Some(frame))
    }

    #[cfg(feature = "ffmpeg")]
    async fn grab_frame(&self, src: &Path) -> Result<DynamicImage> {
        let path = src.to_path_buf();
        let offset = self.settings.frame_offset_secs;
        let subject = src.display().to_string();
        tokio::task::spawn_blocking(move || {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                native::decode_frame(&path, offset)
            })) {
                Ok(result) => result,
                Err(_) => Err(MediaError::encode(
                    subject,
                    "decoder panicked, file is likely corrupt",
                )),
            }
        })
        .await
        .map_err(|e| MediaError::Internal(format!("frame task failed: {e}")))?
    }
}

#[async_trait]
impl ThumbnailEncoder for StandardEncoder {
    async fn encode_image(&self, src: &Path, dst: &Path) -> Result<()> {
        let (src_owned, dst_owned) = (src.to_path_buf(), dst.to_path_buf());
        let settings = self.settings.clone();
        Self::run_blocking(src, move || {
            let image = image::open(&src_owned)
                .map_err(|e| MediaError::encode(src_owned.display().to_string(), e))?;
            write_jpeg_thumbnail(&image, &dst_owned, &settings)
        })
        .await
    }

    async fn extract_video_frame(&self, src: &Path, dst: &Path) -> Result<()> {
        let frame = self.grab_frame(src).await?;
        let dst_owned = dst.to_path_buf();
        let settings = self.settings.clone();
        Self::run_blocking(src, move || write_jpeg_thumbnail(&frame, &dst_owned, &settings)).await
    }
}

/// Dimensions fitting `(width, height)` inside a `max`-sided box with the
/// aspect ratio kept. Never upscales.
pub fn fit_inside(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width.max(1), height.max(1));
    }
    let scale = f64::from(max) / f64::from(width.max(height));
    let w = (f64::from(width) * scale).round() as u32;
    let h = (f64::from(height) * scale).round() as u32;
    (w.clamp(1, max), h.clamp(1, max))
}

/// Resizes, encodes and atomically moves the result to `dst`.
pub fn write_jpeg_thumbnail(
    image: &DynamicImage,
    dst: &Path,
    settings: &EncoderSettings,
) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(MediaError::encode(dst.display().to_string(), "image has no pixels"));
    }

    let (target_w, target_h) = fit_inside(width, height, settings.max_dimension.max(1));
    let resized = if (target_w, target_h) == (width, height) {
        image.to_rgb8()
    } else {
        image
            .resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
            .to_rgb8()
    };

    let parent = dst
        .parent()
        .ok_or_else(|| MediaError::encode(dst.display().to_string(), "destination has no parent"))?;
    std::fs::create_dir_all(parent)?;

    // Readers never observe a half-written thumbnail.
    let staged = tempfile::NamedTempFile::new_in(parent)?;
    let mut writer = BufWriter::new(staged.as_file());
    JpegEncoder::new_with_quality(&mut writer, settings.jpeg_quality.clamp(1, 100))
        .encode_image(&resized)
        .map_err(|e| MediaError::encode(dst.display().to_string(), e))?;
    writer.flush()?;
    drop(writer);
    staged
        .persist(dst)
        .map_err(|e| MediaError::Io(e.error))?;
    Ok(())
}

#[cfg(feature = "ffmpeg")]
mod native {
    use super::*;
    use ffmpeg_next as ffmpeg;
    use image::RgbImage;

    const MAX_PACKETS: usize = 500;

    /// In-process frame grab: seek, decode the first frame after the seek
    /// point, convert to RGB at source size.
    pub(super) fn decode_frame(path: &Path, offset_secs: f64) -> Result<DynamicImage> {
        let subject = path.display().to_string();
        let fail = |reason: String| MediaError::encode(subject.clone(), reason);

        ffmpeg::init().map_err(|e| fail(format!("ffmpeg init failed: {e}")))?;
        let mut input =
            ffmpeg::format::input(&path).map_err(|e| fail(format!("cannot open: {e}")))?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| fail("no video stream".into()))?;
        let stream_index = stream.index();
        let parameters = stream.parameters();

        let duration_us = input.duration();
        let offset_us = (offset_secs * 1_000_000.0) as i64;
        if duration_us > offset_us && offset_us > 0 && input.seek(offset_us, ..).is_err() {
            debug!(src = %subject, "seek failed, decoding from the start");
        }

        let mut decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| fail(format!("no decoder: {e}")))?;
        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(fail(format!("invalid dimensions {width}x{height}")));
        }

        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| fail(format!("no scaler: {e}")))?;

        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        let mut rgb = ffmpeg::util::frame::video::Video::empty();
        for (packets, (stream, packet)) in input.packets().enumerate() {
            if packets > MAX_PACKETS {
                break;
            }
            if stream.index() != stream_index || decoder.send_packet(&packet).is_err() {
                continue;
            }
            if decoder.receive_frame(&mut decoded).is_ok() {
                scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| fail(format!("scale failed: {e}")))?;
                return frame_to_image(&rgb, width, height)
                    .ok_or_else(|| fail("bad frame buffer".into()));
            }
        }
        Err(fail("no decodable video frame".into()))
    }

    fn frame_to_image(
        frame: &ffmpeg::util::frame::video::Video,
        width: u32,
        height: u32,
    ) -> Option<DynamicImage> {
        let stride = frame.stride(0);
        let row_bytes = width as usize * 3;
        let data = frame.data(0);
        let mut packed = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            packed.extend_from_slice(data.get(start..start + row_bytes)?);
        }
        RgbImage::from_raw(width, height, packed).map(DynamicImage::ImageRgb8)
    }
}
