use crate::{
    devices::traits::SignalDevice, errors::DeviceError, messages::control::text::TextPayload,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// International Morse code for the characters a payload can hold.
const MORSE_CODE: [(char, &str); 36] = [
    ('a', ".-"),
    ('b', "-..."),
    ('c', "-.-."),
    ('d', "-.."),
    ('e', "."),
    ('f', "..-."),
    ('g', "--."),
    ('h', "...."),
    ('i', ".."),
    ('j', ".---"),
    ('k', "-.-"),
    ('l', ".-.."),
    ('m', "--"),
    ('n', "-."),
    ('o', "---"),
    ('p', ".--."),
    ('q', "--.-"),
    ('r', ".-."),
    ('s', "..."),
    ('t', "-"),
    ('u', "..-"),
    ('v', "...-"),
    ('w', ".--"),
    ('x', "-..-"),
    ('y', "-.--"),
    ('z', "--.."),
    ('0', "-----"),
    ('1', ".----"),
    ('2', "..---"),
    ('3', "...--"),
    ('4', "....-"),
    ('5', "....."),
    ('6', "-...."),
    ('7', "--..."),
    ('8', "---.."),
    ('9', "----."),
];

/// Units the output is held high for a dot.
pub const DOT_UNITS: u32 = 1;
/// Units the output is held high for a dash.
pub const DASH_UNITS: u32 = 3;
/// Units of silence after every dot or dash, the last of a character included.
pub const SYMBOL_GAP_UNITS: u32 = 2;
/// Units of silence for a space in the text.
pub const WORD_GAP_UNITS: u32 = 6;

/// Timing of the Morse playback.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MorseConfig {
    /// Base unit U in milliseconds.
    pub unit_ms: u64,
    /// How long the output is held high after the sequence to mark the end
    /// of transmission, in milliseconds.
    pub end_of_transmission_ms: u64,
}

impl Default for MorseConfig {
    fn default() -> Self {
        Self {
            unit_ms: 60,
            end_of_transmission_ms: 1000,
        }
    }
}

/// One element of an encoded payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pulse {
    /// Short mark.
    Dot,
    /// Long mark.
    Dash,
    /// Boundary between two characters of a word. Adds no time of its own,
    /// the trailing symbol gap already separates them.
    LetterGap,
    /// A space in the text.
    WordGap,
}

/// Pulses derived from one payload. Consumed by a single playback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PulseSequence(Vec<Pulse>);

impl PulseSequence {
    /// Borrow the pulses in order.
    pub fn pulses(&self) -> &[Pulse] {
        &self.0
    }

    /// True when nothing in the payload was encodable.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total duration of the sequence in units, end of transmission excluded.
    pub fn units(&self) -> u32 {
        self.0
            .iter()
            .map(|pulse| match pulse {
                Pulse::Dot => DOT_UNITS + SYMBOL_GAP_UNITS,
                Pulse::Dash => DASH_UNITS + SYMBOL_GAP_UNITS,
                Pulse::LetterGap => 0,
                Pulse::WordGap => WORD_GAP_UNITS,
            })
            .sum()
    }
}

/// Maps text payloads to pulse sequences and plays them on a signal device.
/// The code table is built once and never mutated, so one encoder can be
/// shared between secondary flows.
#[derive(Debug, Clone)]
pub struct MorseEncoder {
    table: HashMap<char, &'static str>,
    config: MorseConfig,
}

impl MorseEncoder {
    /// Build the encoder and its code table.
    pub fn new(config: MorseConfig) -> Self {
        Self {
            table: MORSE_CODE.into_iter().collect(),
            config,
        }
    }

    /// Length of one unit.
    pub fn unit(&self) -> Duration {
        Duration::from_millis(self.config.unit_ms)
    }

    /// Encode a payload. Characters without a code are skipped silently.
    pub fn encode(&self, payload: &TextPayload) -> PulseSequence {
        let mut pulses = Vec::new();
        let mut in_word = false;
        for c in payload.as_str().chars() {
            if c == ' ' {
                pulses.push(Pulse::WordGap);
                in_word = false;
            } else if let Some(code) = self.table.get(&c) {
                if in_word {
                    pulses.push(Pulse::LetterGap);
                }
                pulses.extend(code.chars().map(|mark| match mark {
                    '.' => Pulse::Dot,
                    _ => Pulse::Dash,
                }));
                in_word = true;
            }
        }
        PulseSequence(pulses)
    }

    /// Play a sequence on the device. The device is held for the whole
    /// playback and is left low on every exit path, cancellation included.
    ///
    /// * `sequence`: pulses to play, consumed.
    /// * `device`: shared signal device, locked for the duration.
    pub async fn play<G>(
        &self,
        sequence: PulseSequence,
        device: Arc<Mutex<G>>,
    ) -> Result<(), DeviceError>
    where
        G: SignalDevice,
    {
        let mut output = Acquired::new(device.lock_owned().await)?;
        let unit = self.unit();
        debug!(units = sequence.units(), "Playing morse sequence");

        for pulse in sequence.0 {
            match pulse {
                Pulse::Dot => output.mark(unit * DOT_UNITS, unit * SYMBOL_GAP_UNITS).await?,
                Pulse::Dash => output.mark(unit * DASH_UNITS, unit * SYMBOL_GAP_UNITS).await?,
                Pulse::LetterGap => {}
                Pulse::WordGap => tokio::time::sleep(unit * WORD_GAP_UNITS).await,
            }
        }

        output.mark(
            Duration::from_millis(self.config.end_of_transmission_ms),
            Duration::ZERO,
        )
        .await
    }

    /// Encode and play a payload.
    pub async fn transmit<G>(
        &self,
        payload: &TextPayload,
        device: Arc<Mutex<G>>,
    ) -> Result<(), DeviceError>
    where
        G: SignalDevice,
    {
        self.play(self.encode(payload), device).await
    }
}

/// Exclusive hold on a signal device for one playback. Dropping it drives
/// the output low if it was left high.
struct Acquired<G: SignalDevice> {
    device: OwnedMutexGuard<G>,
    high: bool,
}

impl<G: SignalDevice> Acquired<G> {
    fn new(mut device: OwnedMutexGuard<G>) -> Result<Self, DeviceError> {
        device.prepare()?;
        Ok(Self {
            device,
            high: false,
        })
    }

    /// Hold the output high for `on`, then low for `off`.
    async fn mark(&mut self, on: Duration, off: Duration) -> Result<(), DeviceError> {
        self.high = true;
        self.device.set_high()?;
        tokio::time::sleep(on).await;
        self.device.set_low()?;
        self.high = false;
        tokio::time::sleep(off).await;
        Ok(())
    }
}

impl<G: SignalDevice> Drop for Acquired<G> {
    fn drop(&mut self) {
        if self.high {
            let _ = self.device.set_low();
        }
    }
}
