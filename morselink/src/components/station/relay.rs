use crate::{
    components::station::operator::frame_file_name,
    devices::traits::{DecodedRegion, PatternDecoder},
    errors::{DecodeError, LinkError},
    messages::{
        control::text::TextPayload,
        link::{
            session::{SecondaryFlow, Session},
            wire::Link,
        },
    },
};
use chrono::Utc;
use image::{ImageResult, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use strum_macros::{EnumString, IntoStaticStr};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Which region to relay when a frame holds more than one pattern.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, EnumString, IntoStaticStr,
)]
pub enum RegionSelection {
    /// First region in decoder scan order.
    First,
    /// Last region in decoder scan order.
    #[default]
    Last,
}

impl RegionSelection {
    /// Pick one region according to the policy.
    pub fn select<'a>(&self, regions: &'a [DecodedRegion]) -> Option<&'a DecodedRegion> {
        match self {
            RegionSelection::First => regions.first(),
            RegionSelection::Last => regions.last(),
        }
    }
}

/// Result of a relay that reached the field unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No pattern was found; the connection was opened and closed empty.
    NoPattern,
    /// The decoded text was sent.
    Sent(TextPayload),
}

/// Failures of the decode and relay pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The decoder itself failed.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// The secondary connection failed.
    #[error("relay link: {0}")]
    Link(#[from] LinkError),
}

/// Everything the relay task needs, cloned into each spawned task.
pub struct RelayContext<D> {
    /// Shared pattern decoder.
    pub decoder: Arc<D>,
    /// Region selection policy.
    pub selection: RegionSelection,
    /// Field unit secondary listener.
    pub target: SocketAddr,
    /// Bound on the secondary connection.
    pub timeout: Option<Duration>,
    /// Directory annotated frames are saved to, `None` skips annotation.
    pub annotate_dir: Option<PathBuf>,
    /// Annotated frames saved so far, shared by every relay of a station.
    pub annotated: Arc<AtomicUsize>,
}

impl<D> Clone for RelayContext<D> {
    fn clone(&self) -> Self {
        Self {
            decoder: self.decoder.clone(),
            selection: self.selection,
            target: self.target,
            timeout: self.timeout,
            annotate_dir: self.annotate_dir.clone(),
            annotated: self.annotated.clone(),
        }
    }
}

/// Decode a frame and reduce the chosen region to a payload.
///
/// * `decoder`: pattern decoder.
/// * `frame`: encoded frame as received.
/// * `selection`: which region wins.
pub fn extract_payload<D: PatternDecoder>(
    decoder: &D,
    frame: &[u8],
    selection: RegionSelection,
) -> Result<TextPayload, DecodeError> {
    select_payload(&decoder.decode(frame)?, selection)
}

fn select_payload(
    regions: &[DecodedRegion],
    selection: RegionSelection,
) -> Result<TextPayload, DecodeError> {
    let region = selection.select(regions).ok_or(DecodeError::NoPattern)?;
    debug!(found = regions.len(), text = %region.text, "Pattern decoded");
    Ok(TextPayload::new(&region.text))
}

const BOX_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);

/// Decode the frame and outline every region that carries corner points
/// with its axis aligned bounding box.
///
/// * `frame`: encoded frame as received.
/// * `regions`: regions found in that frame.
pub fn annotate(frame: &[u8], regions: &[DecodedRegion]) -> ImageResult<RgbImage> {
    let mut image = image::load_from_memory(frame)?.to_rgb8();
    for region in regions {
        if let Some(bounds) = bounding_box(&region.points, image.width(), image.height()) {
            draw_box(&mut image, bounds);
        }
    }
    Ok(image)
}

/// Corner points reduced to `(left, top, right, bottom)`, clamped to the image.
fn bounding_box(points: &[(i32, i32)], width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let clamp = |v: i32, size: u32| v.clamp(0, size.saturating_sub(1).min(i32::MAX as u32) as i32) as u32;
    let left = points.iter().map(|p| p.0).min()?;
    let right = points.iter().map(|p| p.0).max()?;
    let top = points.iter().map(|p| p.1).min()?;
    let bottom = points.iter().map(|p| p.1).max()?;
    Some((
        clamp(left, width),
        clamp(top, height),
        clamp(right, width),
        clamp(bottom, height),
    ))
}

fn draw_box(image: &mut RgbImage, (left, top, right, bottom): (u32, u32, u32, u32)) {
    for x in left..=right {
        image.put_pixel(x, top, BOX_COLOUR);
        image.put_pixel(x, bottom, BOX_COLOUR);
    }
    for y in top..=bottom {
        image.put_pixel(left, y, BOX_COLOUR);
        image.put_pixel(right, y, BOX_COLOUR);
    }
}

fn save_annotated(frame: &[u8], regions: &[DecodedRegion], path: &Path) {
    match annotate(frame, regions).and_then(|image| image.save(path)) {
        Ok(()) => info!(?path, "Saved annotated frame"),
        Err(e) => warn!(?path, "Failed to save annotated frame {e}"),
    }
}

/// Connect to the field unit, send the payload if any, and close.
///
/// * `target`: secondary listener of the field unit.
/// * `payload`: text to send, `None` to release the listener empty.
/// * `timeout`: bound on reads over the connection.
pub async fn send_payload(
    target: SocketAddr,
    payload: Option<&TextPayload>,
    timeout: Option<Duration>,
) -> Result<(), LinkError> {
    let stream = TcpStream::connect(target)
        .await
        .map_err(|source| LinkError::ConnectFailed {
            addr: target.to_string(),
            source,
        })?;
    let mut session = Session::new(target, Link::new(stream, timeout));
    let sent = match payload {
        Some(payload) => session.primary()?.send_bytes(payload.as_bytes()).await,
        None => Ok(()),
    };
    session.close().await;
    sent
}

impl<D> RelayContext<D>
where
    D: PatternDecoder + Send + Sync + 'static,
{
    /// Decode off the async runtime, then relay. Whatever happens during
    /// decoding the field listener is released, with an empty connection
    /// when there is nothing to send. Frames holding patterns are saved
    /// annotated when an annotation directory is set.
    ///
    /// * `frame`: the frame received in the triggering iteration.
    pub async fn run(&self, frame: Vec<u8>) -> Result<RelayOutcome, RelayError> {
        let decoder = self.decoder.clone();
        let selection = self.selection;
        let annotate_dir = self.annotate_dir.clone();
        let annotated = self.annotated.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            let regions = decoder.decode(&frame)?;
            if let Some(dir) = annotate_dir.filter(|_| !regions.is_empty()) {
                let index = annotated.fetch_add(1, Ordering::Relaxed) + 1;
                let path = dir.join(format!("qr-{}", frame_file_name(Utc::now(), index)));
                save_annotated(&frame, &regions, &path);
            }
            select_payload(&regions, selection)
        })
        .await
        .unwrap_or_else(|e| Err(DecodeError::Decoder(e.to_string())));

        match decoded {
            Ok(payload) => {
                send_payload(self.target, Some(&payload), self.timeout).await?;
                Ok(RelayOutcome::Sent(payload))
            }
            Err(DecodeError::NoPattern) => {
                send_payload(self.target, None, self.timeout).await?;
                Ok(RelayOutcome::NoPattern)
            }
            Err(e) => {
                if let Err(release) = send_payload(self.target, None, self.timeout).await {
                    debug!("Could not release the field listener {release}");
                }
                Err(e.into())
            }
        }
    }

    /// Release the field listener without decoding anything.
    pub fn spawn_release(&self) -> SecondaryFlow {
        let (target, timeout) = (self.target, self.timeout);
        SecondaryFlow::new(tokio::spawn(async move {
            match send_payload(target, None, timeout).await {
                Ok(()) => info!("Released the field listener without a payload"),
                Err(e) => warn!("Relay failed {e}"),
            }
        }))
    }

    /// Run the relay as an independent task. Its outcome is only logged.
    pub fn spawn(&self, frame: Vec<u8>) -> SecondaryFlow {
        let context = self.clone();
        SecondaryFlow::new(tokio::spawn(async move {
            match context.run(frame).await {
                Ok(RelayOutcome::Sent(payload)) => info!(text = %payload, "Relayed decoded text"),
                Ok(RelayOutcome::NoPattern) => info!("No pattern in the frame, nothing relayed"),
                Err(e) => warn!("Relay failed {e}"),
            }
        }))
    }
}
