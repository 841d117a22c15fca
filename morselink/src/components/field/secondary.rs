use crate::{
    devices::{software::morse::MorseEncoder, traits::SignalDevice},
    errors::{DeviceError, LinkError},
    messages::{
        control::text::TextPayload,
        link::{
            session::{SecondaryFlow, Session},
            wire::{Link, MAX_TEXT_LEN},
        },
    },
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

/// How a secondary flow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryOutcome {
    /// The station sent no text; nothing was played.
    Empty,
    /// The text was played on the signal device.
    Played(TextPayload),
}

/// Failures of a secondary flow. They are logged and never reach the
/// primary loop.
#[derive(Debug, thiserror::Error)]
pub enum SecondaryError {
    /// Accepting or reading the side channel failed.
    #[error("secondary link: {0}")]
    Link(#[from] LinkError),

    /// Playback on the signal device failed.
    #[error("playback: {0}")]
    Device(#[from] DeviceError),
}

/// Open the listening endpoint for one secondary flow. Done before the
/// trigger is announced so the station can never connect too early.
///
/// * `addr`: bind address and fixed secondary port.
pub async fn bind_secondary(addr: SocketAddr) -> Result<TcpListener, LinkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| LinkError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })
}

/// Everything a secondary flow needs, cloned into each spawned task.
pub struct SecondaryContext<G> {
    /// Shared encoder with its immutable code table.
    pub encoder: Arc<MorseEncoder>,
    /// Signal device, locked for the length of a playback.
    pub signal: Arc<Mutex<G>>,
    /// Bound on accepting and on reading the text.
    pub timeout: Option<Duration>,
}

impl<G> Clone for SecondaryContext<G> {
    fn clone(&self) -> Self {
        Self {
            encoder: self.encoder.clone(),
            signal: self.signal.clone(),
            timeout: self.timeout,
        }
    }
}

impl<G> SecondaryContext<G>
where
    G: SignalDevice + Send + 'static,
{
    /// Accept exactly one connection, read one text payload and play it.
    /// An empty payload ends the flow without touching the signal device.
    ///
    /// * `listener`: endpoint bound by [`bind_secondary`], dropped after accept.
    pub async fn run(&self, listener: TcpListener) -> Result<SecondaryOutcome, SecondaryError> {
        let accepted = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, listener.accept())
                .await
                .map_err(|_| LinkError::Timeout(limit))?,
            None => listener.accept().await,
        };
        let (stream, peer) = accepted.map_err(LinkError::Io)?;
        drop(listener);

        let mut session = Session::new(peer, Link::new(stream, self.timeout));
        let raw = match session.primary()?.recv_to_end(MAX_TEXT_LEN).await {
            Ok(raw) => raw,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };
        let payload = TextPayload::new(&String::from_utf8_lossy(&raw));
        if payload.is_empty() {
            session.close().await;
            return Ok(SecondaryOutcome::Empty);
        }

        info!(%peer, text = %payload, "Playing relayed text");
        let played = self.encoder.transmit(&payload, self.signal.clone()).await;
        session.close().await;
        played?;
        Ok(SecondaryOutcome::Played(payload))
    }

    /// Run the flow as an independent task. Its outcome is only logged.
    pub fn spawn(&self, listener: TcpListener) -> SecondaryFlow {
        let context = self.clone();
        SecondaryFlow::new(tokio::spawn(async move {
            match context.run(listener).await {
                Ok(SecondaryOutcome::Empty) => info!("Secondary flow received an empty payload"),
                Ok(SecondaryOutcome::Played(payload)) => {
                    info!(text = %payload, "Secondary flow finished playback")
                }
                Err(e) => warn!("Secondary flow failed {e}"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{
        mock::{Level, MockSignal},
        software::morse::MorseConfig,
    };
    use serial_test::serial;
    use tokio::{io::AsyncWriteExt, net::TcpStream};

    fn context(timeout: Option<Duration>) -> SecondaryContext<MockSignal> {
        SecondaryContext {
            encoder: Arc::new(MorseEncoder::new(MorseConfig {
                unit_ms: 1,
                end_of_transmission_ms: 5,
            })),
            signal: Arc::new(Mutex::new(MockSignal::default())),
            timeout,
        }
    }

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = bind_secondary("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    #[serial]
    async fn test_text_is_played() {
        let context = context(Some(Duration::from_secs(5)));
        let (listener, addr) = listener().await;

        let sender = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"Hi!").await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let outcome = context.run(listener).await.expect("Flow failed");
        sender.await.unwrap();
        assert_eq!(outcome, SecondaryOutcome::Played(TextPayload::new("hi")));

        let signal = context.signal.lock().await;
        assert_eq!(signal.prepared, 1);
        assert_eq!(signal.last_level(), Some(Level::Low));
        // h (4 dots) + i (2 dots) + end of transmission, each high then low.
        assert_eq!(signal.transitions.len(), 2 * 7);
    }

    #[tokio::test]
    #[serial]
    async fn test_empty_payload_skips_playback() {
        let context = context(Some(Duration::from_secs(5)));
        let (listener, addr) = listener().await;

        let sender = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            drop(stream);
        });

        let outcome = context.run(listener).await.expect("Flow failed");
        sender.await.unwrap();
        assert_eq!(outcome, SecondaryOutcome::Empty);

        let signal = context.signal.lock().await;
        assert_eq!(signal.prepared, 0);
        assert!(signal.transitions.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_accept_timeout() {
        let context = context(Some(Duration::from_millis(50)));
        let (listener, _addr) = listener().await;
        assert!(matches!(
            context.run(listener).await,
            Err(SecondaryError::Link(LinkError::Timeout(_)))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_port_in_use_is_connect_failure() {
        let (_listener, addr) = listener().await;
        let result = bind_secondary(addr).await;
        assert!(matches!(result, Err(e) if e.is_connect_failure()));
    }

    #[tokio::test]
    #[serial]
    async fn test_cancelled_flow_releases_port() {
        let context = context(None);
        let (listener, addr) = listener().await;
        let flow = context.spawn(listener);
        tokio::task::yield_now().await;
        assert!(!flow.is_finished());

        flow.cancel();
        // Give the runtime a moment to drop the task.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bind_secondary(addr).await.is_ok());
    }
}
