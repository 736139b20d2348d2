//! Core application runner (business logic) for `lywsd03mmc-listener`.
//!
//! The poll loop connects to the current sensor, collects notifications,
//! rotates across the configured sensors, and retries forever on link
//! failures. A watchdog task runs next to it and kills the BLE helper when
//! the loop stays disconnected for too long.
//!
//! This module is decoupled from process exit codes and real Bluetooth so it
//! can be tested deterministically with injected transports.

use crate::alias::{Alias, AliasMap};
use crate::config::{ConfigError, DEFAULT_DELAY, parse_device, parse_duration};
use crate::decoder::{DecodeError, decode_notification};
use crate::mac_address::MacAddress;
use crate::measurement::{Measurement, epoch_secs};
use crate::output::{Format, OutputFormatter};
use crate::process::{ProcFs, ProcessTable, kill_helper};
use crate::rotator::DeviceRotator;
use crate::session::{
    Backend, NOTIFICATION_TIMEOUT, Notification, Session, SessionError, Transport,
};
use crate::state::ConnectionState;
use crate::watchdog::Watchdog;
use clap::Parser;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

/// Pause after a failed connect or a dropped link.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pause between a planned disconnect and the helper cleanup, giving the
/// stack time to tear the link down.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Sensor MAC address(es), comma separated.
    /// Format: AA:BB:CC:DD:EE:FF or AABBCCDDEEFF
    #[arg(
        short = 'd',
        long = "device",
        value_delimiter = ',',
        value_parser = parse_device,
        required = true,
        value_name = "AA:BB:CC:DD:EE:FF"
    )]
    pub devices: Vec<MacAddress>,

    /// Estimate battery level from the reported voltage
    #[arg(short = 'b', long)]
    pub battery: bool,

    /// Measurements to collect from a device before moving to the next one
    #[arg(short = 'c', long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub count: Option<u32>,

    /// Delay between reading each device.
    /// Accepts duration with suffix: 30s, 1m, 500ms. Without suffix, seconds.
    #[arg(long, default_value = "30", value_parser = parse_duration)]
    pub delay: Duration,

    /// Bluetooth transport to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Name of the helper process the watchdog kills when the connection
    /// hangs. Defaults to the backend's helper.
    #[arg(long, value_name = "NAME")]
    pub helper_name: Option<String>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "lywsd03mmc_measurement")]
    pub influxdb_measurement: String,

    /// Specify human-readable alias for a sensor.
    /// Format: --alias A4:C1:38:AA:BB:CC=Kitchen
    #[arg(long = "alias", value_parser = crate::alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Do not print a measurement identical to the previous one from the same sensor
    #[arg(long)]
    pub skip_unchanged: bool,

    /// Keep polling instead of stopping once every sensor has reported
    #[arg(long)]
    pub continuous: bool,

    /// Verbose output, log connection and watchdog activity
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub estimate_battery: bool,
    /// Rotate after this many measurements from one device
    pub count: Option<u32>,
    pub delay: Duration,
    /// Helper process to clean up after a planned disconnect
    pub helper_name: Option<String>,
    pub continuous: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            estimate_battery: false,
            count: None,
            delay: DEFAULT_DELAY,
            helper_name: None,
            continuous: false,
        }
    }
}

impl PollerConfig {
    pub fn from_options(options: &Options) -> Self {
        Self {
            estimate_battery: options.battery,
            count: options.count,
            delay: options.delay,
            helper_name: options
                .helper_name
                .clone()
                .or_else(|| options.backend.helper_name().map(String::from)),
            continuous: options.continuous,
        }
    }
}

/// What one iteration of the poll loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A session to this device was opened
    Connected(MacAddress),
    /// Opening a session failed; the loop slept before returning
    ConnectFailed(SessionError),
    /// A measurement was recorded. `rotation_due` is set when the count
    /// limit was reached; the next step switches devices.
    Measured {
        measurement: Measurement,
        rotation_due: bool,
    },
    /// The session was closed after reaching the count limit and the loop
    /// moved on to this device
    Rotated(MacAddress),
    /// A notification arrived but could not be decoded
    DecodeFailed(DecodeError),
    /// No notification within the wait window
    Waiting,
    /// The open session dropped; the loop slept before returning
    ConnectionLost(SessionError),
}

/// Connection state machine over the rotating device list.
pub struct Poller<'a> {
    transport: &'a dyn Transport,
    processes: Arc<dyn ProcessTable>,
    state: Arc<ConnectionState>,
    rotator: DeviceRotator,
    config: PollerConfig,
    root_pid: u32,
    session: Option<Session>,
    /// Measurements from the current device since the last rotation
    count: u32,
    rotation_due: bool,
    history: Vec<Measurement>,
}

impl<'a> Poller<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        processes: Arc<dyn ProcessTable>,
        state: Arc<ConnectionState>,
        rotator: DeviceRotator,
        config: PollerConfig,
    ) -> Self {
        Self {
            transport,
            processes,
            state,
            rotator,
            config,
            root_pid: std::process::id(),
            session: None,
            count: 0,
            rotation_due: false,
            history: Vec::new(),
        }
    }

    /// All measurements so far, in receipt order.
    pub fn history(&self) -> &[Measurement] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Measurement> {
        self.history
    }

    pub fn current_device(&self) -> MacAddress {
        self.rotator.current()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// True once every configured device could have reported, unless
    /// running continuously.
    pub fn is_done(&self) -> bool {
        !self.config.continuous && self.history.len() >= self.rotator.len()
    }

    /// Run one iteration of the state machine.
    pub async fn step(&mut self) -> Step {
        if self.rotation_due {
            self.rotation_due = false;
            return Step::Rotated(self.rotate().await);
        }

        let Some(session) = self.session.as_mut() else {
            return self.connect().await;
        };

        match session.wait_for_notification(NOTIFICATION_TIMEOUT).await {
            Ok(Some(notification)) => self.on_notification(notification).await,
            Ok(None) => {
                info!("Waiting...");
                Step::Waiting
            }
            Err(e) => {
                if let Some(mut session) = self.session.take() {
                    session.close().await;
                }
                self.on_failure(&e).await;
                Step::ConnectionLost(e)
            }
        }
    }

    /// Drive [`step`](Self::step) until [`is_done`](Self::is_done), writing
    /// each measurement through `emitter`.
    pub async fn run(&mut self, emitter: &mut Emitter, out: &mut dyn Write) -> io::Result<()> {
        while !self.is_done() {
            if let Step::Measured { measurement, .. } = self.step().await {
                emitter.emit(&measurement, out)?;
            }
        }
        self.close().await;
        Ok(())
    }

    /// Close the open session, if any.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    async fn connect(&mut self) -> Step {
        let address = self.rotator.current();
        info!("Trying to connect to {address}");

        match Session::open(self.transport, address).await {
            Ok(session) => {
                self.session = Some(session);
                self.state.mark_connected();
                Step::Connected(address)
            }
            Err(e) => {
                self.on_failure(&e).await;
                Step::ConnectFailed(e)
            }
        }
    }

    async fn on_failure(&mut self, err: &SessionError) {
        warn!("Connection lost: {err}");
        if self.state.mark_disconnected(epoch_secs()) {
            debug!("disconnection interval started");
        }
        sleep(RETRY_DELAY).await;
    }

    async fn on_notification(&mut self, notification: Notification) -> Step {
        let address = self.rotator.current();
        let measurement = match decode_notification(
            address,
            &notification.value,
            self.config.estimate_battery,
            epoch_secs(),
        ) {
            Ok(m) => m,
            Err(e) => {
                warn!("{address}: {e}");
                return Step::DecodeFailed(e);
            }
        };

        debug!(
            "{address}: temperature {} humidity {} voltage {} battery {:?}",
            measurement.temperature, measurement.humidity, measurement.voltage, measurement.battery
        );
        self.history.push(measurement.clone());
        self.count += 1;

        if let Some(limit) = self.config.count.filter(|&limit| self.count >= limit) {
            info!("{limit} measurements collected from {address}");
            self.rotation_due = true;
        }

        Step::Measured {
            measurement,
            rotation_due: self.rotation_due,
        }
    }

    /// Planned switch to the next device.
    async fn rotate(&mut self) -> MacAddress {
        self.close().await;
        sleep(SETTLE_DELAY).await;

        // The helper sometimes survives a planned disconnect and blocks the
        // next connect.
        if let Some(helper) = self.config.helper_name.as_deref() {
            match kill_helper(self.processes.as_ref(), self.root_pid, helper) {
                Ok(pid) => info!("Killed {helper} with pid {pid}"),
                Err(e) => debug!("{e}"),
            }
        }

        self.count = 0;
        self.rotator.advance();
        let next = self.rotator.current();
        info!("Next device {next} in {:?}", self.config.delay);
        sleep(self.config.delay).await;

        self.state.mark_disconnected(epoch_secs());
        next
    }
}

/// Writes measurements to the output sink.
pub struct Emitter {
    formatter: Box<dyn OutputFormatter>,
    aliases: AliasMap,
    skip_unchanged: bool,
    last: HashMap<MacAddress, Measurement>,
}

impl Emitter {
    pub fn new(formatter: Box<dyn OutputFormatter>, aliases: AliasMap, skip_unchanged: bool) -> Self {
        Self {
            formatter,
            aliases,
            skip_unchanged,
            last: HashMap::new(),
        }
    }

    pub fn from_options(options: &Options) -> Self {
        Self::new(
            crate::output::formatter(options.format, &options.influxdb_measurement),
            crate::alias::to_map(&options.aliases),
            options.skip_unchanged,
        )
    }

    /// Write `measurement` to `out`. Returns `false` when it was suppressed
    /// as unchanged.
    pub fn emit(&mut self, measurement: &Measurement, out: &mut dyn Write) -> io::Result<bool> {
        if self.skip_unchanged && self.last.get(&measurement.mac) == Some(measurement) {
            return Ok(false);
        }
        self.last.insert(measurement.mac, measurement.clone());

        let name = crate::alias::resolve_name(&measurement.mac, &self.aliases);
        writeln!(out, "{}", self.formatter.format(measurement, &name))?;
        Ok(true)
    }
}

/// Run the poll loop against `transport`, writing formatted measurements
/// to `out`. Returns the collected history.
///
/// The watchdog task is started before polling and stopped afterwards.
pub async fn run_with_io(
    options: &Options,
    transport: &dyn Transport,
    processes: Arc<dyn ProcessTable>,
    out: &mut dyn Write,
) -> Result<Vec<Measurement>, RunError> {
    let rotator = DeviceRotator::new(options.devices.clone()).ok_or(ConfigError::NoDevices)?;
    let config = PollerConfig::from_options(options);
    let state = Arc::new(ConnectionState::new());

    let (shutdown, shutdown_rx) = watch::channel(false);
    let watchdog = Watchdog::new(
        state.clone(),
        processes.clone(),
        std::process::id(),
        config.helper_name.clone(),
    )
    .spawn(shutdown_rx);

    let mut emitter = Emitter::from_options(options);
    let mut poller = Poller::new(transport, processes, state, rotator, config);
    let result = poller.run(&mut emitter, out).await;

    let _ = shutdown.send(true);
    if let Err(e) = watchdog.await {
        warn!("watchdog task failed: {e}");
    }

    result?;
    Ok(poller.into_history())
}

/// Run against real Bluetooth and the real process table, printing to stdout.
pub async fn run(options: Options) -> Result<(), RunError> {
    if let Some(limit) = options.count {
        info!("Rotating after {limit} measurements per device");
    }
    info!("Delay between devices: {:?}", options.delay);

    let transport = crate::session::create_transport(options.backend).await?;
    let processes: Arc<dyn ProcessTable> = Arc::new(ProcFs);
    let mut stdout = io::stdout();
    run_with_io(&options, transport.as_ref(), processes, &mut stdout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::human::HumanFormatter;
    use crate::process::fake::FakeProcessTable;
    use crate::session::fake::{ConnectScript, Event, FakeTransport};
    use crate::state::ConnectionStatus;
    use crate::test_utils::{OTHER_MAC, TEST_MAC, encode_payload};
    use tokio::time::Instant;

    fn payload(temperature: f64) -> Event {
        Event::Data(encode_payload(temperature, 50, 2.9))
    }

    fn options(devices: Vec<MacAddress>) -> Options {
        Options {
            devices,
            battery: false,
            count: None,
            delay: Duration::from_secs(5),
            backend: Backend::Gatttool,
            helper_name: None,
            format: Format::Human,
            influxdb_measurement: "lywsd03mmc_measurement".to_string(),
            aliases: vec![],
            skip_unchanged: false,
            continuous: false,
            verbose: false,
        }
    }

    fn own_tree() -> Arc<FakeProcessTable> {
        let me = std::process::id();
        Arc::new(FakeProcessTable::new(vec![
            (me, 1, "lywsd03mmc-list"),
            (me + 1, me, "gatttool"),
        ]))
    }

    fn poller<'a>(
        transport: &'a FakeTransport,
        processes: Arc<FakeProcessTable>,
        devices: Vec<MacAddress>,
        config: PollerConfig,
    ) -> (Poller<'a>, Arc<ConnectionState>) {
        let state = Arc::new(ConnectionState::new());
        let poller = Poller::new(
            transport,
            processes,
            state.clone(),
            DeviceRotator::new(devices).unwrap(),
            config,
        );
        (poller, state)
    }

    #[test]
    fn test_options_parse() {
        let options = Options::try_parse_from([
            "lywsd03mmc-listener",
            "-d",
            "A4:C1:38:AA:BB:CC,a4c138112233",
            "-b",
            "-c",
            "3",
            "--delay",
            "1m",
        ])
        .unwrap();
        assert_eq!(options.devices, vec![TEST_MAC, OTHER_MAC]);
        assert!(options.battery);
        assert_eq!(options.count, Some(3));
        assert_eq!(options.delay, Duration::from_secs(60));
        assert_eq!(options.backend, Backend::Gatttool);
        assert_eq!(options.format, Format::Human);
    }

    #[test]
    fn test_options_defaults_and_validation() {
        let options = Options::try_parse_from(["x", "--device", "A4C138AABBCC"]).unwrap();
        assert_eq!(options.delay, DEFAULT_DELAY);
        assert_eq!(options.count, None);

        assert!(Options::try_parse_from(["x"]).is_err());
        assert!(Options::try_parse_from(["x", "-d", "A4:C1:38"]).is_err());
        assert!(Options::try_parse_from(["x", "-d", "A4C138AABBCC", "-c", "0"]).is_err());
    }

    #[test]
    #[cfg(feature = "bluer")]
    fn test_helper_name_defaults_to_backend() {
        let mut opts = options(vec![TEST_MAC]);
        assert_eq!(
            PollerConfig::from_options(&opts).helper_name.as_deref(),
            Some("gatttool")
        );
        opts.backend = Backend::Bluer;
        assert_eq!(PollerConfig::from_options(&opts).helper_name, None);
        opts.helper_name = Some("bluepy-helper".to_string());
        assert_eq!(
            PollerConfig::from_options(&opts).helper_name.as_deref(),
            Some("bluepy-helper")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminates_after_one_measurement_per_device() {
        let transport = FakeTransport::new(vec![
            ConnectScript::Accept(vec![payload(20.0)]),
            ConnectScript::Accept(vec![payload(22.0)]),
        ]);
        let mut opts = options(vec![TEST_MAC, OTHER_MAC]);
        opts.count = Some(1);

        let mut out = Vec::<u8>::new();
        let history = run_with_io(&opts, &transport, own_tree(), &mut out)
            .await
            .unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].mac, TEST_MAC);
        assert_eq!(history[0].temperature, 20.0);
        assert_eq!(history[1].mac, OTHER_MAC);
        assert_eq!(history[1].temperature, 22.0);
        assert_eq!(transport.connects(), vec![TEST_MAC, OTHER_MAC]);

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.starts_with("A4:C1:38:AA:BB:CC temperature=20.00°C"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_on_single_device_wraps_to_same_address() {
        let transport = FakeTransport::new(vec![
            ConnectScript::Accept(vec![payload(20.0), payload(20.5)]),
            ConnectScript::Accept(vec![]),
        ]);
        let processes = own_tree();
        let config = PollerConfig {
            count: Some(2),
            delay: Duration::from_secs(5),
            helper_name: Some("gatttool".to_string()),
            ..Default::default()
        };
        let (mut poller, state) = poller(&transport, processes.clone(), vec![TEST_MAC], config);

        assert_eq!(poller.step().await, Step::Connected(TEST_MAC));
        assert!(matches!(
            poller.step().await,
            Step::Measured {
                rotation_due: false,
                ..
            }
        ));
        assert_eq!(poller.count(), 1);
        assert!(matches!(
            poller.step().await,
            Step::Measured {
                rotation_due: true,
                ..
            }
        ));
        assert!(poller.is_connected());

        let started = Instant::now();
        assert_eq!(poller.step().await, Step::Rotated(TEST_MAC));
        assert!(started.elapsed() >= SETTLE_DELAY + Duration::from_secs(5));
        assert_eq!(poller.count(), 0);
        assert!(!poller.is_connected());
        assert_eq!(transport.disconnects(), 1);
        assert_eq!(processes.terminated(), vec![std::process::id() + 1]);
        assert!(state.snapshot().disconnected_since().is_some());

        assert_eq!(poller.step().await, Step::Connected(TEST_MAC));
        assert_eq!(transport.connects(), vec![TEST_MAC, TEST_MAC]);
        assert_eq!(poller.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_advances_to_next_address() {
        let transport = FakeTransport::new(vec![
            ConnectScript::Accept(vec![payload(20.0)]),
            ConnectScript::Accept(vec![]),
        ]);
        let config = PollerConfig {
            count: Some(1),
            delay: Duration::ZERO,
            ..Default::default()
        };
        let (mut poller, _) = poller(&transport, own_tree(), vec![TEST_MAC, OTHER_MAC], config);

        poller.step().await;
        assert!(matches!(
            poller.step().await,
            Step::Measured {
                rotation_due: true,
                ..
            }
        ));
        assert_eq!(poller.current_device(), TEST_MAC);
        assert_eq!(poller.step().await, Step::Rotated(OTHER_MAC));
        assert_eq!(poller.current_device(), OTHER_MAC);
        assert_eq!(poller.step().await, Step::Connected(OTHER_MAC));
    }

    /// Records when each output line is completed.
    struct LineTimes {
        start: Instant,
        lines: Vec<Duration>,
    }

    impl Write for LineTimes {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for _ in buf.iter().filter(|&&b| b == b'\n') {
                self.lines.push(self.start.elapsed());
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_measurement_is_written_before_rotation_delay() {
        let transport = FakeTransport::new(vec![
            ConnectScript::Accept(vec![payload(20.0)]),
            ConnectScript::Accept(vec![payload(22.0)]),
        ]);
        let delay = Duration::from_secs(30);
        let config = PollerConfig {
            count: Some(1),
            delay,
            ..Default::default()
        };
        let (mut poller, _) = poller(&transport, own_tree(), vec![TEST_MAC, OTHER_MAC], config);
        let mut emitter = Emitter::new(Box::new(HumanFormatter), AliasMap::new(), false);
        let mut out = LineTimes {
            start: Instant::now(),
            lines: vec![],
        };

        poller.run(&mut emitter, &mut out).await.unwrap();

        assert_eq!(out.lines.len(), 2);
        assert_eq!(out.lines[0], Duration::ZERO);
        assert_eq!(out.lines[1], SETTLE_DELAY + delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_connection_loss() {
        let transport = FakeTransport::new(vec![
            ConnectScript::Accept(vec![Event::Lost]),
            ConnectScript::Refuse,
            ConnectScript::FailWrite,
            ConnectScript::Accept(vec![payload(19.0)]),
        ]);
        let config = PollerConfig::default();
        let (mut poller, state) = poller(&transport, own_tree(), vec![TEST_MAC], config);

        assert_eq!(poller.step().await, Step::Connected(TEST_MAC));
        assert!(state.snapshot().is_connected());

        let started = Instant::now();
        assert!(matches!(poller.step().await, Step::ConnectionLost(_)));
        assert!(started.elapsed() >= RETRY_DELAY);
        let since = state.snapshot().disconnected_since();
        assert!(since.is_some());

        assert!(matches!(
            poller.step().await,
            Step::ConnectFailed(SessionError::Connect(_))
        ));
        assert!(matches!(
            poller.step().await,
            Step::ConnectFailed(SessionError::Connect(_))
        ));
        // Repeated failures keep the first interval start
        assert_eq!(state.snapshot().disconnected_since(), since);

        assert_eq!(poller.step().await, Step::Connected(TEST_MAC));
        assert_eq!(state.snapshot(), ConnectionStatus::Connected);
        assert!(matches!(poller.step().await, Step::Measured { .. }));
        assert!(poller.is_done());
        assert_eq!(transport.disconnects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_before_first_connect_start_no_interval() {
        let transport = FakeTransport::new(vec![ConnectScript::Refuse, ConnectScript::Refuse]);
        let (mut poller, state) =
            poller(&transport, own_tree(), vec![TEST_MAC], PollerConfig::default());

        poller.step().await;
        poller.step().await;
        assert_eq!(
            state.snapshot(),
            ConnectionStatus::Disconnected { since: None }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_waiting_while_connected() {
        let transport = FakeTransport::new(vec![ConnectScript::Accept(vec![
            Event::Timeout,
            Event::Timeout,
            payload(21.0),
        ])]);
        let (mut poller, state) =
            poller(&transport, own_tree(), vec![TEST_MAC], PollerConfig::default());

        poller.step().await;
        assert_eq!(poller.step().await, Step::Waiting);
        assert_eq!(poller.step().await, Step::Waiting);
        assert!(state.snapshot().is_connected());
        assert!(matches!(poller.step().await, Step::Measured { .. }));
        assert_eq!(transport.connects().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_payload_is_skipped() {
        let transport = FakeTransport::new(vec![ConnectScript::Accept(vec![
            Event::Data(vec![0x01, 0x02]),
            payload(18.5),
        ])]);
        let (mut poller, _) =
            poller(&transport, own_tree(), vec![TEST_MAC], PollerConfig::default());

        poller.step().await;
        assert_eq!(
            poller.step().await,
            Step::DecodeFailed(DecodeError::TooShort {
                expected: 5,
                actual: 2
            })
        );
        assert!(poller.history().is_empty());
        assert!(poller.is_connected());
        assert!(matches!(poller.step().await, Step::Measured { .. }));
        assert_eq!(poller.history().len(), 1);
        assert_eq!(poller.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_is_never_done() {
        let transport = FakeTransport::new(vec![ConnectScript::Accept(vec![payload(20.0)])]);
        let config = PollerConfig {
            continuous: true,
            ..Default::default()
        };
        let (mut poller, _) = poller(&transport, own_tree(), vec![TEST_MAC], config);
        poller.step().await;
        poller.step().await;
        assert_eq!(poller.history().len(), 1);
        assert!(!poller.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_battery_estimate_flows_into_history() {
        let transport = FakeTransport::new(vec![ConnectScript::Accept(vec![Event::Data(
            encode_payload(20.0, 40, 2.6),
        )])]);
        let mut opts = options(vec![TEST_MAC]);
        opts.battery = true;
        opts.format = Format::Influxdb;

        let mut out = Vec::<u8>::new();
        let history = run_with_io(&opts, &transport, own_tree(), &mut out)
            .await
            .unwrap();
        assert_eq!(history[0].battery, Some(50));
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("lywsd03mmc_measurement,"));
        assert!(out.contains("battery_level=50i"));
    }

    #[test]
    fn test_emitter_skips_unchanged_per_device() {
        let mut emitter = Emitter::new(Box::new(HumanFormatter), AliasMap::new(), true);
        let a = crate::test_utils::base_measurement(TEST_MAC, 1);
        let a_later = crate::test_utils::base_measurement(TEST_MAC, 2);
        let b = crate::test_utils::base_measurement(OTHER_MAC, 3);

        let mut out = Vec::<u8>::new();
        assert!(emitter.emit(&a, &mut out).unwrap());
        assert!(!emitter.emit(&a_later, &mut out).unwrap());
        assert!(emitter.emit(&b, &mut out).unwrap());
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_emitter_uses_alias() {
        let aliases = crate::alias::to_map(&[Alias {
            address: TEST_MAC,
            name: "Kitchen".to_string(),
        }]);
        let mut emitter = Emitter::new(Box::new(HumanFormatter), aliases, false);
        let m = crate::test_utils::base_measurement(TEST_MAC, 1);

        let mut out = Vec::<u8>::new();
        emitter.emit(&m, &mut out).unwrap();
        emitter.emit(&m, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.starts_with("Kitchen "));
    }
}
