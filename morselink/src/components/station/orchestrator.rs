use crate::{
    components::station::{
        operator::{ConsoleOperator, Directive, Operator},
        relay::{RegionSelection, RelayContext},
    },
    devices::{hardware::decoder::CommandDecoder, traits::PatternDecoder},
    errors::{ConfigError, DeviceError, LinkError},
    messages::{
        control::token::{is_button_pushed, ControlState, CHANGE_RESOLUTION, IDLE, QUIT, REQUEST},
        link::{session::Session, wire::Link},
    },
    utils::yaml::read_config,
};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::{atomic::AtomicUsize, Arc},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Configuration of the station.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StationConfig {
    /// Address of the field unit.
    field_address: IpAddr,
    /// Port of the field unit primary listener.
    primary_port: u16,
    /// Port of the field unit secondary listener.
    secondary_port: u16,
    /// Bound on every read, none blocks forever.
    read_timeout_ms: Option<u64>,
    /// Largest frame accepted from the field unit.
    max_frame_bytes: usize,
    /// Directory received frames are saved to.
    frame_dir: Option<PathBuf>,
    /// Region relayed when a frame holds several patterns.
    region_selection: RegionSelection,
    /// Config file of the pattern decoder.
    decoder_config_file: PathBuf,
}

impl StationConfig {
    /// Station configuration for the default field unit address and ports.
    ///
    /// * `decoder_config_file`: pattern decoder config.
    pub fn new<F: AsRef<OsStr>>(decoder_config_file: F) -> Self {
        Self {
            field_address: IpAddr::V4(Ipv4Addr::new(192, 168, 7, 2)),
            primary_port: 4099,
            secondary_port: 4098,
            read_timeout_ms: None,
            max_frame_bytes: 16 * 1024 * 1024,
            frame_dir: None,
            region_selection: RegionSelection::default(),
            decoder_config_file: (&decoder_config_file).into(),
        }
    }

    /// Point the station at another field unit.
    pub fn with_field(mut self, field_address: IpAddr, primary_port: u16, secondary_port: u16) -> Self {
        self.field_address = field_address;
        self.primary_port = primary_port;
        self.secondary_port = secondary_port;
        self
    }

    /// Save received frames to a directory.
    pub fn with_frame_dir<F: AsRef<OsStr>>(mut self, frame_dir: F) -> Self {
        self.frame_dir = Some((&frame_dir).into());
        self
    }

    /// Change the region selection policy.
    pub fn with_region_selection(mut self, region_selection: RegionSelection) -> Self {
        self.region_selection = region_selection;
        self
    }

    /// Build the config by reading a file.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        read_config(filepath)
    }

    /// Address of the field unit primary listener.
    pub fn primary_addr(&self) -> SocketAddr {
        SocketAddr::new(self.field_address, self.primary_port)
    }

    /// Address of the field unit secondary listener.
    pub fn secondary_addr(&self) -> SocketAddr {
        SocketAddr::new(self.field_address, self.secondary_port)
    }

    /// Directory received frames are saved to.
    pub fn frame_dir(&self) -> Option<&PathBuf> {
        self.frame_dir.as_ref()
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

/// Why the station stopped.
#[derive(Debug, thiserror::Error)]
pub enum StationError {
    /// The field unit could not be reached.
    #[error("failed to connect to the field unit: {0}")]
    ConnectFailed(LinkError),

    /// The primary connection failed mid session.
    #[error("connection lost: {0}")]
    ConnectionLost(LinkError),

    /// The decoder or operator console could not be set up.
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    /// The station could not be configured.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<LinkError> for StationError {
    fn from(e: LinkError) -> Self {
        if e.is_connect_failure() {
            StationError::ConnectFailed(e)
        } else {
            StationError::ConnectionLost(e)
        }
    }
}

/// Counters reported when the operator ends the session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StationSummary {
    /// Loop iterations completed.
    pub iterations: usize,
    /// Frames received.
    pub frames: usize,
    /// Relays started.
    pub relays: usize,
}

enum Step {
    Continue,
    Quit,
}

/// The station: receives frames from the field unit, hands them to the
/// operator and relays decoded patterns back on a button press.
pub struct Station<D, O> {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    config: StationConfig,
    decoder: Arc<D>,
    operator: O,
    annotated: Arc<AtomicUsize>,
}

impl<D, O> Station<D, O>
where
    D: PatternDecoder + Send + Sync + 'static,
    O: Operator,
{
    /// Assemble a station.
    ///
    /// * `config`: field unit address and limits.
    /// * `decoder`: pattern decoder used for relays.
    /// * `operator`: presentation and directives.
    pub fn new(config: StationConfig, decoder: D, operator: O) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            config,
            decoder: Arc::new(decoder),
            operator,
            annotated: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return the unique identifier of the station.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// The operator attached to the station.
    pub fn operator(&self) -> &O {
        &self.operator
    }

    fn relay_context(&self) -> RelayContext<D> {
        RelayContext {
            decoder: self.decoder.clone(),
            selection: self.config.region_selection,
            target: self.config.secondary_addr(),
            timeout: self.config.read_timeout(),
            annotate_dir: self.config.frame_dir.clone(),
            annotated: self.annotated.clone(),
        }
    }
}

impl Station<CommandDecoder, ConsoleOperator> {
    /// Create the station with its decoder and console from a config file.
    ///
    /// * `filepath`: path to the station config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, StationError> {
        let config = StationConfig::from_file(filepath)?;
        let decoder = CommandDecoder::from_config_file(&config.decoder_config_file)?;
        let operator = ConsoleOperator::new(config.frame_dir.clone())?;
        Ok(Self::new(config, decoder, operator))
    }
}

/// Unit struct for running the station.
pub struct StationController;

impl StationController {
    /// Connect to the field unit and run one session.
    ///
    /// * `station`: the station to drive.
    pub async fn start<D, O>(station: &mut Station<D, O>) -> Result<StationSummary, StationError>
    where
        D: PatternDecoder + Send + Sync + 'static,
        O: Operator,
    {
        let addr = station.config.primary_addr();
        info!(uuid = %station.uuid, %addr, "Connecting to the field unit");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| LinkError::ConnectFailed {
                addr: addr.to_string(),
                source,
            })?;
        Self::run_session(station, addr, stream).await
    }

    /// Drive the station side of the control loop over a connected stream
    /// until the operator quits or the connection fails.
    ///
    /// * `peer`: field unit address, used for logging.
    /// * `stream`: the primary connection.
    pub async fn run_session<D, O, T>(
        station: &mut Station<D, O>,
        peer: SocketAddr,
        stream: T,
    ) -> Result<StationSummary, StationError>
    where
        D: PatternDecoder + Send + Sync + 'static,
        O: Operator,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session::new(peer, Link::new(stream, station.config.read_timeout()));
        info!(uuid = %station.uuid, session = %session.get_uuid(), %peer, "Connected to the field unit");

        let mut summary = StationSummary::default();
        loop {
            match Self::iterate(station, &mut session, &mut summary).await {
                Ok(Step::Continue) => summary.iterations += 1,
                Ok(Step::Quit) => {
                    summary.iterations += 1;
                    session.drain_secondary().await;
                    session.close().await;
                    info!(uuid = %station.uuid, ?summary, "Session ended by the operator");
                    return Ok(summary);
                }
                Err(e) => {
                    session.close().await;
                    error!(uuid = %station.uuid, ?summary, "Session terminated {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn iterate<D, O, T>(
        station: &mut Station<D, O>,
        session: &mut Session<T>,
        summary: &mut StationSummary,
    ) -> Result<Step, StationError>
    where
        D: PatternDecoder + Send + Sync + 'static,
        O: Operator,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let link = session.primary()?;
        let state = ControlState::from_token(link.recv_token().await?);
        link.send_token(IDLE).await?;
        if state == ControlState::NoLight {
            return Ok(Step::Continue);
        }

        link.send_token(REQUEST).await?;
        let button = link.recv_token().await?;
        link.send_token(IDLE).await?;
        let frame = link.recv_frame(station.config.max_frame_bytes).await?;
        summary.frames += 1;
        debug!(uuid = %station.uuid, bytes = frame.len(), "Frame received");

        if is_button_pushed(button) {
            if session.secondary_busy() {
                info!(uuid = %station.uuid, "Button pressed while a relay is in flight, ignoring");
            } else {
                let relay = station.relay_context();
                // An empty frame has nothing to decode, release the field listener.
                let flow = if frame.is_empty() {
                    relay.spawn_release()
                } else {
                    relay.spawn(frame.clone())
                };
                match session.attach_secondary(flow) {
                    Ok(()) => summary.relays += 1,
                    Err(flow) => flow.cancel(),
                }
            }
        }

        station.operator.present(&frame);
        let link = session.primary()?;
        match station.operator.directive() {
            Directive::Quit => {
                link.send_token(QUIT).await?;
                return Ok(Step::Quit);
            }
            Directive::ChangeResolution(resolution) => {
                let mut request = vec![CHANGE_RESOLUTION];
                request.extend_from_slice(resolution.to_string().as_bytes());
                link.send_bytes(&request).await?;
            }
            Directive::Continue => link.send_token(IDLE).await?,
        }
        Ok(Step::Continue)
    }
}
