use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use candle_core::Tensor;
use image::RgbImage;
use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{RecordError, RecordResult};

pub const DEFAULT_VCODEC: &str = "libx265";

/// Pattern the frame writer uses inside each episode's image directory.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

pub fn frame_file_name(frame_index: usize) -> String {
    format!("frame_{frame_index:06}.png")
}

/// Turns a directory of numbered PNG frames into a video file.
pub trait VideoEncoder {
    fn encode(&self, imgs_dir: &Path, video_path: &Path, fps: f64) -> RecordResult<()>;
}

/// Encodes by spawning the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    vcodec: String,
}

impl FfmpegEncoder {
    pub fn new(vcodec: impl Into<String>) -> Self {
        Self {
            program: "ffmpeg".to_string(),
            vcodec: vcodec.into(),
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_VCODEC)
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&self, imgs_dir: &Path, video_path: &Path, fps: f64) -> RecordResult<()> {
        if let Some(parent) = video_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let output = Command::new(&self.program)
            .arg("-f")
            .arg("image2")
            .arg("-r")
            .arg(format!("{fps}"))
            .arg("-i")
            .arg(imgs_dir.join(FRAME_PATTERN))
            .arg("-vcodec")
            .arg(&self.vcodec)
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-g")
            .arg("2")
            .arg("-crf")
            .arg("30")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg(video_path)
            .output()
            .map_err(|e| RecordError::Encoder(format!("could not run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(RecordError::Encoder(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!("encoded {} at {fps:.2} fps", video_path.display());
        Ok(())
    }
}

/// Writes camera frames to PNG files on a fixed-size worker pool.
pub struct ImageWriter {
    pool: ThreadPool,
}

impl ImageWriter {
    pub fn new(num_workers: usize) -> RecordResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("image-writer-{i}"))
            .build()
            .map_err(|e| RecordError::Io(io::Error::other(e)))?;
        Ok(Self { pool })
    }

    /// Save `frames[i]` as `dir/frame_<i>.png`.
    pub fn save_images_concurrently(&self, frames: &[Tensor], dir: &Path) -> RecordResult<()> {
        fs::create_dir_all(dir)?;
        self.pool.install(|| {
            frames
                .par_iter()
                .enumerate()
                .try_for_each(|(i, frame)| save_frame(frame, &dir.join(frame_file_name(i))))
        })
    }
}

/// Write one HWC u8 RGB tensor as PNG.
pub fn save_frame(frame: &Tensor, path: &Path) -> RecordResult<()> {
    let (height, width, channels) = frame.dims3()?;
    if channels != 3 {
        return Err(RecordError::UnrecognisedShape {
            key: path.display().to_string(),
            shape: frame.dims().to_vec(),
        });
    }
    let data = frame.flatten_all()?.to_vec1::<u8>()?;
    let image = RgbImage::from_raw(width as u32, height as u32, data).ok_or_else(|| {
        RecordError::MalformedDataset(format!("frame buffer does not fit {width}x{height}"))
    })?;
    image.save(path)?;
    Ok(())
}
