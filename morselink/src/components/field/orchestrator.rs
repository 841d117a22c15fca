use crate::{
    components::field::secondary::{bind_secondary, SecondaryContext},
    devices::{
        hardware::{camera::StillCamera, sensor::SysfsSensor, signal::SysfsPwm},
        software::morse::{MorseConfig, MorseEncoder},
        traits::{ImageSource, SensorDevice, SignalDevice},
    },
    errors::{ConfigError, DeviceError, LinkError},
    messages::{
        control::{
            resolution::Resolution,
            token::{Command, ControlState, BUTTON_PUSHED, IDLE},
        },
        link::{
            session::Session,
            wire::{Link, DESCRIPTOR_IDLE, MAX_DESCRIPTOR_LEN},
        },
    },
    utils::yaml::read_config,
};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::Mutex,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration of the field unit.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldConfig {
    /// Address both listeners bind to.
    bind_address: IpAddr,
    /// Port of the primary control connection.
    primary_port: u16,
    /// Port of the per trigger secondary connection.
    secondary_port: u16,
    /// Bound on every primary read, none blocks forever.
    read_timeout_ms: Option<u64>,
    /// Bound on accepting and reading a secondary connection.
    secondary_timeout_ms: Option<u64>,
    /// Pause between iterations while there is no light.
    no_light_interval_ms: u64,
    /// Morse playback timing.
    morse: MorseConfig,
    /// Config file of the light sensor and button.
    sensor_config_file: PathBuf,
    /// Config file of the buzzer.
    signal_config_file: PathBuf,
    /// Config file of the camera.
    camera_config_file: PathBuf,
}

impl FieldConfig {
    /// Field configuration on the default ports.
    ///
    /// * `sensor_config_file`: sensor device config.
    /// * `signal_config_file`: signal device config.
    /// * `camera_config_file`: camera device config.
    pub fn new<F: AsRef<OsStr>>(
        sensor_config_file: F,
        signal_config_file: F,
        camera_config_file: F,
    ) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            primary_port: 4099,
            secondary_port: 4098,
            read_timeout_ms: None,
            secondary_timeout_ms: Some(30_000),
            no_light_interval_ms: 100,
            morse: MorseConfig::default(),
            sensor_config_file: (&sensor_config_file).into(),
            signal_config_file: (&signal_config_file).into(),
            camera_config_file: (&camera_config_file).into(),
        }
    }

    /// Move both listeners to other ports.
    pub fn with_ports(mut self, primary_port: u16, secondary_port: u16) -> Self {
        self.primary_port = primary_port;
        self.secondary_port = secondary_port;
        self
    }

    /// Bind to a specific address rather than every interface.
    pub fn with_bind_address(mut self, bind_address: IpAddr) -> Self {
        self.bind_address = bind_address;
        self
    }

    /// Replace the morse timing.
    pub fn with_morse(mut self, morse: MorseConfig) -> Self {
        self.morse = morse;
        self
    }

    /// Build the config by reading a file.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        read_config(filepath)
    }

    /// Address of the primary listener.
    pub fn primary_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.primary_port)
    }

    /// Address of the secondary listener.
    pub fn secondary_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.secondary_port)
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    fn secondary_timeout(&self) -> Option<Duration> {
        self.secondary_timeout_ms.map(Duration::from_millis)
    }
}

/// Why the field unit stopped serving.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// The primary listener could not be bound or accept failed.
    #[error("failed to start serving: {0}")]
    ConnectFailed(LinkError),

    /// The primary connection failed mid session.
    #[error("session closed: {0}")]
    SessionClosed(LinkError),

    /// A sensor or actuator became inaccessible.
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    /// The unit could not be configured.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<LinkError> for FieldError {
    fn from(e: LinkError) -> Self {
        if e.is_connect_failure() {
            FieldError::ConnectFailed(e)
        } else {
            FieldError::SessionClosed(e)
        }
    }
}

/// Counters reported when a session ends gracefully.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Loop iterations completed.
    pub iterations: usize,
    /// Frames sent to the station.
    pub frames: usize,
    /// Secondary flows started.
    pub triggers: usize,
}

/// Outcome of one loop iteration.
enum Step {
    Continue,
    Quit,
}

/// The field unit: light sensor and button, camera and buzzer, driven by
/// the station over the primary connection.
pub struct FieldUnit<S, I, G> {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    config: FieldConfig,
    sensor: S,
    camera: I,
    /// Shared with secondary flows for playback.
    signal: Arc<Mutex<G>>,
    encoder: Arc<MorseEncoder>,
    state: ControlState,
}

impl<S, I, G> FieldUnit<S, I, G>
where
    S: SensorDevice,
    I: ImageSource,
    G: SignalDevice + Send + 'static,
{
    /// Assemble a unit from its devices.
    ///
    /// * `config`: network and timing settings.
    /// * `sensor`: light sensor and button.
    /// * `camera`: frame source.
    /// * `signal`: buzzer used for morse playback.
    pub fn new(config: FieldConfig, sensor: S, camera: I, signal: G) -> Self {
        let encoder = Arc::new(MorseEncoder::new(config.morse));
        Self {
            uuid: Uuid::new_v4(),
            config,
            sensor,
            camera,
            signal: Arc::new(Mutex::new(signal)),
            encoder,
            state: ControlState::default(),
        }
    }

    /// Return the unique identifier of the unit.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Current control state.
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Shared handle on the signal device.
    pub fn signal(&self) -> Arc<Mutex<G>> {
        self.signal.clone()
    }

    fn secondary_context(&self) -> SecondaryContext<G> {
        SecondaryContext {
            encoder: self.encoder.clone(),
            signal: self.signal.clone(),
            timeout: self.config.secondary_timeout(),
        }
    }
}

impl FieldUnit<SysfsSensor, StillCamera, SysfsPwm> {
    /// Create the unit and its hardware from a config file. Device failures
    /// here are fatal.
    ///
    /// * `filepath`: path to the field config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, FieldError> {
        let config = FieldConfig::from_file(filepath)?;
        let sensor = SysfsSensor::from_config_file(&config.sensor_config_file)?;
        let signal = SysfsPwm::from_config_file(&config.signal_config_file)?;
        let camera = StillCamera::from_config_file(&config.camera_config_file)?;
        Ok(Self::new(config, sensor, camera, signal))
    }
}

/// Unit struct for running the field unit.
pub struct FieldUnitController;

impl FieldUnitController {
    /// Bind the primary port and serve exactly one station session.
    ///
    /// * `unit`: the field unit to drive.
    pub async fn start<S, I, G>(unit: &mut FieldUnit<S, I, G>) -> Result<SessionSummary, FieldError>
    where
        S: SensorDevice,
        I: ImageSource,
        G: SignalDevice + Send + 'static,
    {
        let addr = unit.config.primary_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LinkError::ConnectFailed {
                addr: addr.to_string(),
                source,
            })?;
        info!(uuid = %unit.uuid, %addr, "Waiting for the station");
        Self::serve(unit, listener).await
    }

    /// Accept one connection on an already bound listener and run the
    /// session over it.
    pub async fn serve<S, I, G>(
        unit: &mut FieldUnit<S, I, G>,
        listener: TcpListener,
    ) -> Result<SessionSummary, FieldError>
    where
        S: SensorDevice,
        I: ImageSource,
        G: SignalDevice + Send + 'static,
    {
        let (stream, peer) = listener.accept().await.map_err(|source| {
            FieldError::ConnectFailed(LinkError::ConnectFailed {
                addr: listener
                    .local_addr()
                    .map_or_else(|_| String::from("primary listener"), |a| a.to_string()),
                source,
            })
        })?;
        drop(listener);
        Self::run_session(unit, peer, stream).await
    }

    /// Drive the control loop over a connected stream until the station
    /// quits or the connection fails. Either way every transport of the
    /// session is released before returning.
    ///
    /// * `peer`: station address, used for logging.
    /// * `stream`: the primary connection.
    pub async fn run_session<S, I, G, T>(
        unit: &mut FieldUnit<S, I, G>,
        peer: SocketAddr,
        stream: T,
    ) -> Result<SessionSummary, FieldError>
    where
        S: SensorDevice,
        I: ImageSource,
        G: SignalDevice + Send + 'static,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session::new(peer, Link::new(stream, unit.config.read_timeout()));
        info!(uuid = %unit.uuid, session = %session.get_uuid(), %peer, "Station connected");

        let mut summary = SessionSummary::default();
        loop {
            match Self::iterate(unit, &mut session, &mut summary).await {
                Ok(Step::Continue) => summary.iterations += 1,
                Ok(Step::Quit) => {
                    summary.iterations += 1;
                    session.drain_secondary().await;
                    session.close().await;
                    info!(uuid = %unit.uuid, ?summary, "Station ended the session");
                    return Ok(summary);
                }
                Err(e) => {
                    session.close().await;
                    error!(uuid = %unit.uuid, ?summary, "Session terminated {e}");
                    return Err(e);
                }
            }
        }
    }

    /// One pass of the control loop.
    async fn iterate<S, I, G, T>(
        unit: &mut FieldUnit<S, I, G>,
        session: &mut Session<T>,
        summary: &mut SessionSummary,
    ) -> Result<Step, FieldError>
    where
        S: SensorDevice,
        I: ImageSource,
        G: SignalDevice + Send + 'static,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let reading = unit.sensor.read_luminosity()?;
        let next = unit.state.next(reading);
        if next != unit.state {
            let name: &'static str = next.into();
            info!(uuid = %unit.uuid, reading, state = name, "Control state changed");
        }
        unit.state = next;

        let link = session.primary()?;
        link.send_token(unit.state.token()).await?;
        link.recv_token().await?;

        if unit.state == ControlState::NoLight {
            tokio::time::sleep(Duration::from_millis(unit.config.no_light_interval_ms)).await;
            return Ok(Step::Continue);
        }

        // The station paces the button report.
        session.primary()?.recv_token().await?;
        let button = if unit.sensor.read_button_edge()? {
            Self::trigger_secondary(unit, session, summary).await
        } else {
            IDLE
        };

        let link = session.primary()?;
        link.send_token(button).await?;
        link.recv_token().await?;

        let frame = match unit.camera.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(uuid = %unit.uuid, "Capture failed, sending an empty frame {e}");
                Vec::new()
            }
        };
        link.send_frame(&frame).await?;
        summary.frames += 1;
        debug!(uuid = %unit.uuid, bytes = frame.len(), "Frame sent");

        match Command::from_token(link.recv_token().await?) {
            Command::Quit => return Ok(Step::Quit),
            Command::ChangeResolution => {
                let raw = link.recv_descriptor(DESCRIPTOR_IDLE, MAX_DESCRIPTOR_LEN).await?;
                Self::change_resolution(unit, &String::from_utf8_lossy(&raw));
            }
            Command::Continue => {}
        }
        Ok(Step::Continue)
    }

    /// Start a secondary flow for a button edge and return the token to
    /// report. The listener is bound before the token goes out; when that
    /// fails, or a flow is still in flight, the edge is reported as idle.
    async fn trigger_secondary<S, I, G, T>(
        unit: &mut FieldUnit<S, I, G>,
        session: &mut Session<T>,
        summary: &mut SessionSummary,
    ) -> u8
    where
        S: SensorDevice,
        I: ImageSource,
        G: SignalDevice + Send + 'static,
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if session.secondary_busy() {
            info!(uuid = %unit.uuid, "Button pressed while a relay is in flight, ignoring");
            return IDLE;
        }

        let listener = match bind_secondary(unit.config.secondary_addr()).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(uuid = %unit.uuid, "Cannot open the secondary listener {e}");
                return IDLE;
            }
        };

        let flow = unit.secondary_context().spawn(listener);
        match session.attach_secondary(flow) {
            Ok(()) => {
                summary.triggers += 1;
                info!(uuid = %unit.uuid, "Button pressed, waiting for relayed text");
                BUTTON_PUSHED
            }
            Err(flow) => {
                flow.cancel();
                IDLE
            }
        }
    }

    /// Apply a resolution descriptor. Malformed input is logged and the
    /// camera keeps its current resolution.
    fn change_resolution<S, I, G>(unit: &mut FieldUnit<S, I, G>, descriptor: &str)
    where
        I: ImageSource,
    {
        match descriptor.parse::<Resolution>() {
            Ok(resolution) => {
                if let Err(e) = unit.camera.set_resolution(resolution) {
                    warn!(uuid = %unit.uuid, %resolution, "Camera refused the resolution {e}");
                }
            }
            Err(e) => warn!(uuid = %unit.uuid, "Ignoring resolution request {e}"),
        }
    }
}
