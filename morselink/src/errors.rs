use std::{io, path::PathBuf, time::Duration};

/// Failures on a TCP link, either when it is established or while a
/// session is running over it.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Bind, listen, accept or connect failed.
    #[error("failed to establish connection with {addr}: {source}")]
    ConnectFailed {
        /// Address that was being bound or connected to.
        addr: String,
        /// Underlying socket error.
        source: io::Error,
    },

    /// A zero length read, the peer closed its end.
    #[error("connection closed by peer")]
    PeerClosed,

    /// A read did not complete within the configured bound.
    #[error("no data received within {0:?}")]
    Timeout(Duration),

    /// Mid session read or write error.
    #[error("communication failure: {0}")]
    Io(#[from] io::Error),

    /// A frame length prefix exceeded what the receiver accepts.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Accepted maximum.
        max: usize,
    },

    /// The session transport was already released.
    #[error("session transport is closed")]
    Closed,
}

impl LinkError {
    /// Connect time failures are terminal for the attempt, anything else
    /// happened mid session.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, LinkError::ConnectFailed { .. })
    }
}

/// Sensor, actuator or camera failures. These are fatal to the owning
/// process when they occur during initialisation.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A device file could not be opened, read or written.
    #[error("device file {path:?} is not accessible: {source}")]
    Access {
        /// The sysfs (or other) path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// A device file held a value that could not be parsed.
    #[error("device file {path:?} returned an unreadable value {value:?}")]
    Parse {
        /// The device path.
        path: PathBuf,
        /// Raw contents.
        value: String,
    },

    /// The image source failed to produce a frame.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Encoding or decoding of image data failed.
    #[error("image codec failure: {0}")]
    Image(#[from] image::ImageError),

    /// The device configuration could not be loaded.
    #[error("device configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Pattern decoding outcomes that prevent a payload from being forwarded.
/// None of these are fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame did not contain any decodable pattern.
    #[error("no pattern found in frame")]
    NoPattern,

    /// The decoder itself could not run.
    #[error("decoder failure: {0}")]
    Decoder(String),
}

/// Malformed resolution descriptors. Logged and ignored, the previous
/// resolution is kept.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Missing the `x` separator.
    #[error("resolution {0:?} is not of the form <width>x<height>")]
    Malformed(String),

    /// Width or height is not an integer between 1 and the supported maximum.
    #[error("resolution {0:?} has an invalid dimension")]
    InvalidDimension(String),
}

/// Failure to read or write a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("could not locate the config file {0:?}")]
    NotFound(PathBuf),

    /// The file could not be parsed into the requested struct.
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    /// The file could not be written.
    #[error("failed to write config {path:?}: {source}")]
    Write {
        /// Destination.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Serialisation to yaml failed.
    #[error("failed to serialise config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
