use crate::{
    devices::traits::ImageSource,
    errors::{ConfigError, DeviceError},
    messages::control::resolution::Resolution,
    utils::yaml::read_config,
};
use image::{imageops::FilterType, DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, io::Cursor, path::PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Camera configuration. Raw video capture is handled outside this crate;
/// the capture pipeline keeps refreshing a still on disk and the camera
/// device picks up the latest one, scales it and encodes it.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StillCameraConfig {
    /// Path of the still image kept fresh by the capture pipeline.
    still_path: PathBuf,
    /// Resolution frames are scaled to until the station asks otherwise.
    resolution: Resolution,
    /// JPEG quality, 1 to 100.
    jpeg_quality: u8,
}

impl StillCameraConfig {
    /// Create a new camera config at the default resolution.
    ///
    /// * `still_path`: still image refreshed by the capture pipeline.
    pub fn new(still_path: impl Into<PathBuf>) -> Self {
        Self {
            still_path: still_path.into(),
            resolution: Resolution::default(),
            jpeg_quality: 90,
        }
    }

    /// Generates a new camera config from a file.
    ///
    /// * `filepath`: path to config file.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        read_config(filepath)
    }
}

/// Image source handing out jpeg encoded frames at the requested resolution.
pub struct StillCamera {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    config: StillCameraConfig,
}

impl StillCamera {
    /// Create a new camera by consuming a camera config.
    ///
    /// * `config`: still location and initial resolution.
    pub fn new(config: StillCameraConfig) -> Self {
        let camera = Self {
            uuid: Uuid::new_v4(),
            config,
        };
        info!(uuid = %camera.uuid, resolution = %camera.config.resolution, "Camera initialised");
        camera
    }

    /// Create a new camera by reading a config file.
    ///
    /// * `filepath`: path to the parameter file.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, DeviceError> {
        Ok(Self::new(StillCameraConfig::from_file(filepath)?))
    }

    /// Return the unique identifier of the camera.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Resolution applied to captured frames.
    pub fn resolution(&self) -> Resolution {
        self.config.resolution
    }
}

/// Scale a frame to the resolution and encode it as jpeg.
pub fn encode_frame(
    image: &DynamicImage,
    resolution: Resolution,
    quality: u8,
) -> Result<Vec<u8>, DeviceError> {
    let scaled = image
        .resize_exact(resolution.width, resolution.height, FilterType::Triangle)
        .to_rgb8();
    let mut encoded = Vec::new();
    DynamicImage::ImageRgb8(scaled).write_to(
        &mut Cursor::new(&mut encoded),
        ImageOutputFormat::Jpeg(quality),
    )?;
    Ok(encoded)
}

impl ImageSource for StillCamera {
    fn capture_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        let still = image::open(&self.config.still_path).map_err(|e| {
            DeviceError::Capture(format!("{:?}: {e}", self.config.still_path))
        })?;
        let frame = encode_frame(&still, self.config.resolution, self.config.jpeg_quality)?;
        debug!(uuid = %self.uuid, bytes = frame.len(), "Captured frame");
        Ok(frame)
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), DeviceError> {
        if !resolution.is_supported() {
            return Err(DeviceError::Capture(format!(
                "resolution {resolution} is outside what the camera can scale to"
            )));
        }
        info!(uuid = %self.uuid, from = %self.config.resolution, to = %resolution, "Changing resolution");
        self.config.resolution = resolution;
        Ok(())
    }
}
