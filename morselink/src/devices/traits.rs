use crate::{
    errors::{DecodeError, DeviceError},
    messages::control::resolution::Resolution,
};

/// Light and button inputs of the field unit.
pub trait SensorDevice {
    /// Raw luminosity reading. High values mean low light.
    fn read_luminosity(&mut self) -> Result<f64, DeviceError>;

    /// True exactly once per physical press (released to pressed edge).
    fn read_button_edge(&mut self) -> Result<bool, DeviceError>;
}

/// Binary output pin with caller controlled timing.
pub trait SignalDevice {
    /// Called once when the device is acquired for a playback, before any
    /// level change. Devices that need set up (tone frequency) do it here.
    fn prepare(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Drive the output high.
    fn set_high(&mut self) -> Result<(), DeviceError>;

    /// Drive the output low.
    fn set_low(&mut self) -> Result<(), DeviceError>;
}

/// Produces encoded still frames on demand.
pub trait ImageSource {
    /// Capture one frame, encoded (jpeg). An empty vector means nothing
    /// was captured.
    fn capture_frame(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// Change the capture resolution for subsequent frames.
    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), DeviceError>;
}

/// One decoded pattern within a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedRegion {
    /// Raw text carried by the pattern.
    pub text: String,
    /// Corner points of the pattern in pixel coordinates, when known.
    pub points: Vec<(i32, i32)>,
}

/// Finds optical patterns in an encoded frame.
pub trait PatternDecoder {
    /// Decode every pattern in the frame, in scan order. No pattern is an
    /// empty vector, not an error.
    fn decode(&self, frame: &[u8]) -> Result<Vec<DecodedRegion>, DecodeError>;
}
