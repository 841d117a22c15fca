use crate::{
    devices::traits::SensorDevice,
    errors::{ConfigError, DeviceError},
    utils::yaml::read_config,
};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use uuid::Uuid;

/// Sysfs locations of the light sensor ADC channel and the push button GPIO.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SysfsSensorConfig {
    /// ADC channel the light dependent resistor is wired to.
    adc_path: PathBuf,
    /// Root of the gpio class, `/sys/class/gpio` on the target board.
    gpio_root: PathBuf,
    /// GPIO number of the push button.
    button_gpio: u32,
    /// The button pulls the line low when pressed.
    active_low: bool,
}

impl Default for SysfsSensorConfig {
    fn default() -> Self {
        Self {
            adc_path: PathBuf::from("/sys/class/saradc/ch0"),
            gpio_root: PathBuf::from("/sys/class/gpio"),
            button_gpio: 228,
            active_low: true,
        }
    }
}

impl SysfsSensorConfig {
    /// Sensor configuration with explicit paths.
    ///
    /// * `adc_path`: file holding the raw luminosity reading.
    /// * `gpio_root`: directory holding `export` and `gpio<n>/`.
    /// * `button_gpio`: button pin number.
    pub fn new(adc_path: impl Into<PathBuf>, gpio_root: impl Into<PathBuf>, button_gpio: u32) -> Self {
        Self {
            adc_path: adc_path.into(),
            gpio_root: gpio_root.into(),
            button_gpio,
            ..Default::default()
        }
    }

    /// Create a sensor config from a file.
    ///
    /// * `filepath`: path to the yaml config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        read_config(filepath)
    }

    fn button_dir(&self) -> PathBuf {
        self.gpio_root.join(format!("gpio{}", self.button_gpio))
    }
}

/// Turns raw button levels into press edges. Only a released to pressed
/// transition fires; holding the button down does not fire again.
#[derive(Debug, Clone, Copy)]
pub struct ButtonEdge {
    pressed: bool,
}

impl Default for ButtonEdge {
    fn default() -> Self {
        Self::new()
    }
}

impl ButtonEdge {
    /// Detector starting from the released state.
    pub fn new() -> Self {
        Self { pressed: false }
    }

    /// Feed one sampled level, returns true on a press edge.
    pub fn update(&mut self, pressed: bool) -> bool {
        let edge = pressed && !self.pressed;
        self.pressed = pressed;
        edge
    }
}

/// Light sensor and button read through sysfs.
pub struct SysfsSensor {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    config: SysfsSensorConfig,
    edge: ButtonEdge,
}

impl SysfsSensor {
    /// Export the button GPIO and configure it as an input. Any failure is
    /// a device failure and fatal at process start.
    ///
    /// * `config`: sysfs locations.
    pub fn new(config: SysfsSensorConfig) -> Result<Self, DeviceError> {
        let button_dir = config.button_dir();
        if !button_dir.exists() {
            write_device(
                &config.gpio_root.join("export"),
                &config.button_gpio.to_string(),
            )?;
        }
        write_device(&button_dir.join("direction"), "in")?;

        let sensor = Self {
            uuid: Uuid::new_v4(),
            config,
            edge: ButtonEdge::new(),
        };
        info!(uuid = %sensor.uuid, gpio = sensor.config.button_gpio, "Sensor initialised");
        Ok(sensor)
    }

    /// Create a sensor by reading its configuration file.
    ///
    /// * `filepath`: path to the yaml config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, DeviceError> {
        Self::new(SysfsSensorConfig::from_file(filepath)?)
    }

    /// Return the unique identifier of the sensor.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl SensorDevice for SysfsSensor {
    fn read_luminosity(&mut self) -> Result<f64, DeviceError> {
        read_parsed(&self.config.adc_path)
    }

    fn read_button_edge(&mut self) -> Result<bool, DeviceError> {
        let level: u8 = read_parsed(&self.config.button_dir().join("value"))?;
        let pressed = (level == 0) == self.config.active_low;
        let edge = self.edge.update(pressed);
        if edge {
            debug!(uuid = %self.uuid, "Button pressed");
        }
        Ok(edge)
    }
}

/// Write a value to a sysfs attribute.
pub(crate) fn write_device(path: &Path, value: &str) -> Result<(), DeviceError> {
    fs::write(path, format!("{value}\n")).map_err(|source| DeviceError::Access {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a sysfs attribute and parse its trimmed contents.
fn read_parsed<T: std::str::FromStr>(path: &Path) -> Result<T, DeviceError> {
    let raw = fs::read_to_string(path).map_err(|source| DeviceError::Access {
        path: path.to_path_buf(),
        source,
    })?;
    raw.trim().parse::<T>().map_err(|_| DeviceError::Parse {
        path: path.to_path_buf(),
        value: raw,
    })
}
