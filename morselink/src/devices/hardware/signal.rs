use crate::{
    devices::{hardware::sensor::write_device, traits::SignalDevice},
    errors::{ConfigError, DeviceError},
    utils::yaml::read_config,
};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::PathBuf};
use tracing::info;
use uuid::Uuid;

/// Buzzer driven by a sysfs PWM controller. The tone frequency is fixed per
/// playback and the enable attribute switches the tone on and off.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SysfsPwmConfig {
    /// Frequency attribute of the PWM channel.
    freq_path: PathBuf,
    /// Enable attribute of the PWM channel.
    enable_path: PathBuf,
    /// Tone frequency in Hz.
    frequency_hz: u32,
}

impl Default for SysfsPwmConfig {
    fn default() -> Self {
        Self {
            freq_path: PathBuf::from("/sys/devices/pwm-ctrl.42/freq0"),
            enable_path: PathBuf::from("/sys/devices/pwm-ctrl.42/enable0"),
            frequency_hz: 660,
        }
    }
}

impl SysfsPwmConfig {
    /// PWM configuration with explicit attribute paths.
    ///
    /// * `freq_path`: frequency attribute.
    /// * `enable_path`: enable attribute.
    /// * `frequency_hz`: tone frequency.
    pub fn new(freq_path: impl Into<PathBuf>, enable_path: impl Into<PathBuf>, frequency_hz: u32) -> Self {
        Self {
            freq_path: freq_path.into(),
            enable_path: enable_path.into(),
            frequency_hz,
        }
    }

    /// Create a PWM config from a file.
    ///
    /// * `filepath`: path to the yaml config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        read_config(filepath)
    }
}

/// Signal device writing to the PWM enable attribute.
pub struct SysfsPwm {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    config: SysfsPwmConfig,
}

impl SysfsPwm {
    /// Create the device and make sure the output starts low. An
    /// inaccessible enable attribute is a device failure.
    ///
    /// * `config`: PWM attribute locations.
    pub fn new(config: SysfsPwmConfig) -> Result<Self, DeviceError> {
        let mut pwm = Self {
            uuid: Uuid::new_v4(),
            config,
        };
        pwm.set_low()?;
        info!(uuid = %pwm.uuid, "PWM signal initialised");
        Ok(pwm)
    }

    /// Create the device by reading its configuration file.
    ///
    /// * `filepath`: path to the yaml config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, DeviceError> {
        Self::new(SysfsPwmConfig::from_file(filepath)?)
    }

    /// Return the unique identifier of the device.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl SignalDevice for SysfsPwm {
    fn prepare(&mut self) -> Result<(), DeviceError> {
        write_device(&self.config.freq_path, &self.config.frequency_hz.to_string())
    }

    fn set_high(&mut self) -> Result<(), DeviceError> {
        write_device(&self.config.enable_path, "1")
    }

    fn set_low(&mut self) -> Result<(), DeviceError> {
        write_device(&self.config.enable_path, "0")
    }
}
