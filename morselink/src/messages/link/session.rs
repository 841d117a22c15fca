use crate::{errors::LinkError, messages::link::wire::Link};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle on a secondary flow spawned from a session. The flow task owns
/// its own connection exclusively; the session only keeps the handle so it
/// can tell whether a flow is in flight and cancel it on teardown.
pub struct SecondaryFlow {
    /// Spawned task running the flow to completion.
    handle: JoinHandle<()>,
}

impl SecondaryFlow {
    /// Wrap a spawned flow task.
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// True once the flow has run to completion (or was cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the flow. Dropping the task drops its connection, so a read
    /// blocked on it ends immediately.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Wait for the flow to end on its own.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("Secondary flow panicked {e}");
            }
        }
    }
}

/// One active connection to the peer. The primary transport is owned
/// exclusively by the orchestrator driving it; at most one secondary flow
/// hangs off the session at a time.
///
/// Closing the session releases the transports in the order they were
/// opened (primary, then secondary). A partial close releases the most
/// recent one first.
pub struct Session<S> {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Address of the peer.
    peer: SocketAddr,
    /// Control protocol transport.
    primary: Option<Link<S>>,
    /// Side channel flow, if one was started.
    secondary: Option<SecondaryFlow>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Open a session over an established primary link.
    pub fn new(peer: SocketAddr, primary: Link<S>) -> Self {
        let uuid = Uuid::new_v4();
        debug!(%uuid, %peer, "Session opened");
        Self {
            uuid,
            peer,
            primary: Some(primary),
            secondary: None,
        }
    }

    /// Return the unique identifier of the session.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Address of the peer on the other end.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// True while the primary transport has not been released.
    pub fn is_open(&self) -> bool {
        self.primary.is_some()
    }

    /// Access the primary transport.
    pub fn primary(&mut self) -> Result<&mut Link<S>, LinkError> {
        self.primary.as_mut().ok_or(LinkError::Closed)
    }

    /// True while a secondary flow is still running.
    pub fn secondary_busy(&self) -> bool {
        self.secondary
            .as_ref()
            .is_some_and(|flow| !flow.is_finished())
    }

    /// Attach a newly spawned secondary flow. A finished previous flow is
    /// released; a running one is refused and handed back to the caller.
    pub fn attach_secondary(&mut self, flow: SecondaryFlow) -> Result<(), SecondaryFlow> {
        if self.secondary_busy() {
            return Err(flow);
        }
        self.secondary = Some(flow);
        Ok(())
    }

    /// Wait for an in-flight secondary flow to end on its own.
    pub async fn drain_secondary(&mut self) {
        if let Some(flow) = self.secondary.take() {
            flow.wait().await;
        }
    }

    /// Release the most recently opened transport only: the secondary flow
    /// when there is one, otherwise the primary link.
    pub async fn close_last(&mut self) {
        if let Some(flow) = self.secondary.take() {
            flow.cancel();
        } else if let Some(mut primary) = self.primary.take() {
            if let Err(e) = primary.shutdown().await {
                debug!(uuid = %self.uuid, "Primary shutdown failed {e}");
            }
        }
    }

    /// Release every transport in the order they were opened.
    pub async fn close(mut self) {
        if let Some(mut primary) = self.primary.take() {
            if let Err(e) = primary.shutdown().await {
                debug!(uuid = %self.uuid, "Primary shutdown failed {e}");
            }
        }
        if let Some(flow) = self.secondary.take() {
            flow.cancel();
        }
        debug!(uuid = %self.uuid, peer = %self.peer, "Session closed");
    }
}
