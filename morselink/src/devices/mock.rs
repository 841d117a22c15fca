use crate::{
    devices::traits::{DecodedRegion, ImageSource, PatternDecoder, SensorDevice, SignalDevice},
    errors::{DecodeError, DeviceError},
    messages::control::resolution::Resolution,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::time::Instant;

/// Scripted sensor. Each read pops the next value, the last value repeats
/// once the script runs out.
#[derive(Debug, Default)]
pub struct MockSensor {
    luminosity: VecDeque<f64>,
    edges: VecDeque<bool>,
    last_luminosity: f64,
}

impl MockSensor {
    /// Sensor reporting the given luminosity readings and no button press.
    pub fn new(luminosity: impl IntoIterator<Item = f64>) -> Self {
        Self {
            luminosity: luminosity.into_iter().collect(),
            edges: VecDeque::new(),
            last_luminosity: 500.0,
        }
    }

    /// Script the button edges returned by successive reads.
    pub fn with_edges(mut self, edges: impl IntoIterator<Item = bool>) -> Self {
        self.edges = edges.into_iter().collect();
        self
    }
}

impl SensorDevice for MockSensor {
    fn read_luminosity(&mut self) -> Result<f64, DeviceError> {
        if let Some(value) = self.luminosity.pop_front() {
            self.last_luminosity = value;
        }
        Ok(self.last_luminosity)
    }

    fn read_button_edge(&mut self) -> Result<bool, DeviceError> {
        Ok(self.edges.pop_front().unwrap_or(false))
    }
}

/// Camera returning a fixed frame and recording resolution changes.
#[derive(Debug, Clone)]
pub struct MockCamera {
    frame: Vec<u8>,
    /// Frames handed out so far.
    pub captures: Arc<Mutex<usize>>,
    /// Resolutions applied, in order.
    pub resolutions: Arc<Mutex<Vec<Resolution>>>,
}

impl MockCamera {
    /// Camera that always returns `frame`.
    pub fn new(frame: Vec<u8>) -> Self {
        Self {
            frame,
            captures: Arc::new(Mutex::new(0)),
            resolutions: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ImageSource for MockCamera {
    fn capture_frame(&mut self) -> Result<Vec<u8>, DeviceError> {
        *self.captures.lock().unwrap() += 1;
        Ok(self.frame.clone())
    }

    fn set_resolution(&mut self, resolution: Resolution) -> Result<(), DeviceError> {
        self.resolutions.lock().unwrap().push(resolution);
        Ok(())
    }
}

/// Output level written to a signal device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Output asserted.
    High,
    /// Output released.
    Low,
}

/// Signal device recording every level change with the (tokio) time it
/// happened, so timing can be checked under a paused clock.
#[derive(Debug, Default)]
pub struct MockSignal {
    /// Level changes in order.
    pub transitions: Vec<(Level, Instant)>,
    /// Number of times the device was prepared for playback.
    pub prepared: usize,
}

impl MockSignal {
    /// Durations each level was held for, paired with the level.
    pub fn held(&self) -> Vec<(Level, u128)> {
        self.transitions
            .windows(2)
            .map(|w| (w[0].0, (w[1].1 - w[0].1).as_millis()))
            .collect()
    }

    /// Level left on the output.
    pub fn last_level(&self) -> Option<Level> {
        self.transitions.last().map(|(level, _)| *level)
    }
}

impl SignalDevice for MockSignal {
    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.prepared += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), DeviceError> {
        self.transitions.push((Level::High, Instant::now()));
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), DeviceError> {
        self.transitions.push((Level::Low, Instant::now()));
        Ok(())
    }
}

/// Decoder returning the same regions for every frame.
#[derive(Debug, Default, Clone)]
pub struct MockDecoder {
    regions: Vec<DecodedRegion>,
}

impl MockDecoder {
    /// Decoder finding one region per text, in the given scan order.
    pub fn new<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            regions: texts
                .into_iter()
                .map(|text| DecodedRegion {
                    text: text.to_string(),
                    points: vec![(0, 0), (10, 0), (10, 10), (0, 10)],
                })
                .collect(),
        }
    }
}

impl PatternDecoder for MockDecoder {
    fn decode(&self, _frame: &[u8]) -> Result<Vec<DecodedRegion>, DecodeError> {
        Ok(self.regions.clone())
    }
}
