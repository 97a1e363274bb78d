use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(
        "teleoperation method '{0}' is not supported (currently only 'keyboard' teleop is supported)"
    )]
    UnsupportedTeleopMethod(String),

    #[error("no simulation environment registered under '{0}'")]
    UnknownEnvironment(String),

    #[error("{key} has unrecognised shape {shape:?}")]
    UnrecognisedShape { key: String, shape: Vec<usize> },

    #[error("action {action:?} is outside the action space")]
    ActionOutOfSpace { action: Vec<f32> },

    #[error("teleop action requested before one was initialised")]
    NoTeleopAction,

    #[error("observation is missing key '{0}'")]
    MissingObservationKey(String),

    #[error("dataset contains no frames")]
    EmptyDataset,

    #[error("malformed dataset: {0}")]
    MalformedDataset(String),

    #[error("video encoding failed: {0}")]
    Encoder(String),

    #[error("hub upload failed: {0}")]
    Hub(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

// Type alias for concise return signatures
pub type RecordResult<T> = Result<T, RecordError>;
