use candle_core::{DType, Result as CandleResult, Tensor};

const IMAGE_KEY_PREFIX: &str = "image_";

/// `<key>_episode_000042`, shared by frame directories and video files.
pub fn episode_file_stem(key: &str, episode_index: usize) -> String {
    format!("{key}_episode_{episode_index:06}")
}

/// Dataset column name for a camera observation key (`image_front` -> `observation.images.front`).
pub fn image_feature_key(key: &str) -> String {
    let name = key.strip_prefix(IMAGE_KEY_PREFIX).unwrap_or(key);
    format!("observation.images.{name}")
}

/// View a column as `(rows, channels)` f32, scalars become a single channel.
pub fn as_f32_rows(t: &Tensor) -> CandleResult<Tensor> {
    let t = t.to_dtype(DType::F32)?;
    match t.rank() {
        1 => t.reshape((t.dim(0)?, 1)),
        2 => Ok(t),
        _ => t.flatten_from(1),
    }
}

/// One HWC u8 frame to per-pixel rows `(h*w, c)` scaled to [0, 1].
pub fn frame_pixels_as_rows(frame: &Tensor) -> CandleResult<Tensor> {
    let (h, w, c) = frame.dims3()?;
    frame
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .reshape((h * w, c))
}
