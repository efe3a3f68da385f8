pub mod channel;
pub mod clock;
pub mod data;

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::devices::{
    Command, Connector, DeviceError, DeviceIdentity, LoadSession, READ_TIMEOUT, SerialConnector,
};
use channel::{SampleReceiver, SampleSender, StopToken, sample_channel};
use clock::{Clock, SystemClock};
use data::{DischargeParameters, Mode, Sample};

/// Consecutive unusable `MEAS:ALL?` replies tolerated before a run is aborted.
pub const MAX_MISSED_MEASUREMENTS: usize = 5;

#[derive(Error, Debug)]
pub enum DischargeError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Invalid discharge parameters: {0}")]
    InvalidParameters(String),

    #[error("No valid measurement from {port} in {attempts} consecutive attempts")]
    MeasurementLost { port: String, attempts: usize },

    #[error("Failed to start discharge worker: {0}")]
    Worker(#[source] io::Error),

    #[error("Discharge worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, DischargeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    RunningCc,
    RunningCv,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop token was set.
    Requested,
    /// Current fell below the CV stop threshold.
    CurrentThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub samples: usize,
    pub run_start: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Measurement {
    timestamp: f64,
    voltage: f64,
    current: f64,
}

/// Bookkeeping for a single run.
struct RunState {
    mode: Mode,
    initializing: bool,
    run_start: Option<f64>,
    current: Option<Measurement>,
    missed: usize,
    emitted: usize,
}

impl RunState {
    fn new() -> Self {
        Self {
            mode: Mode::Cc,
            initializing: true,
            run_start: None,
            current: None,
            missed: 0,
            emitted: 0,
        }
    }
}

/// Runs the two phase CC then CV discharge on one load.
pub struct DischargeController<C, K> {
    connector: C,
    clock: K,
    timeout: Duration,
    state: ControllerState,
}

impl DischargeController<SerialConnector, SystemClock> {
    pub fn new() -> Self {
        Self::with(SerialConnector, SystemClock)
    }
}

impl Default for DischargeController<SerialConnector, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector, K: Clock> DischargeController<C, K> {
    pub fn with(connector: C, clock: K) -> Self {
        Self {
            connector,
            clock,
            timeout: READ_TIMEOUT,
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Runs a discharge to completion on the calling thread.
    ///
    /// Samples go to `sink` once per second. The loop ends when `stop` is set
    /// (checked once per iteration), when the CV current threshold is crossed,
    /// or on error. The load output is switched off, the buzzer sounded and the
    /// panel handed back in every case once the port is open.
    pub fn run(
        &mut self,
        identity: &DeviceIdentity,
        params: &DischargeParameters,
        sink: &SampleSender,
        stop: &StopToken,
    ) -> Result<RunOutcome> {
        params.validate().map_err(DischargeError::InvalidParameters)?;
        info!("Starting discharge on {} with {:?}", identity, params);

        let mut session = LoadSession::open(&self.connector, &identity.port, self.timeout)?;
        let mut run = RunState::new();

        let result = self.sample_loop(&mut session, &mut run, params, sink, stop);
        self.shutdown(&mut session);
        session.close();
        self.state = ControllerState::Stopped;

        match result {
            Ok(reason) => {
                info!("Discharge finished ({:?}) after {} samples", reason, run.emitted);
                Ok(RunOutcome {
                    reason,
                    samples: run.emitted,
                    run_start: run.run_start,
                })
            }
            Err(e) => {
                error!("Discharge aborted after {} samples: {}", run.emitted, e);
                Err(e)
            }
        }
    }

    fn sample_loop(
        &mut self,
        session: &mut LoadSession<C::Io>,
        run: &mut RunState,
        params: &DischargeParameters,
        sink: &SampleSender,
        stop: &StopToken,
    ) -> Result<StopReason> {
        self.state = ControllerState::RunningCc;

        while !stop.is_stop_requested() {
            if run.initializing {
                self.enter_phase(session, run.mode, params)?;
                run.initializing = false;
                run.current = self.measure(session, run)?;
            }

            if let Some(m) = run.current {
                let sample = Sample {
                    timestamp: m.timestamp,
                    voltage: m.voltage,
                    current: m.current,
                    mode: run.mode,
                    run_start: run.run_start.unwrap_or(m.timestamp),
                };
                if !sink.push(sample) {
                    debug!("Sample receiver is gone, sample dropped");
                }
                run.emitted += 1;
            }

            self.clock.sleep_to_next_second();
            run.current = self.measure(session, run)?;
            let Some(m) = run.current else {
                continue;
            };

            match run.mode {
                Mode::Cc if m.voltage < params.cc_end_voltage => {
                    info!(
                        "Voltage {:.3} V below {:.3} V, switching to constant voltage",
                        m.voltage, params.cc_end_voltage
                    );
                    run.mode = Mode::Cv;
                    run.initializing = true;
                    self.state = ControllerState::RunningCv;
                }
                Mode::Cv if m.current < params.cv_stop_current => {
                    info!(
                        "Current {:.3} A below {:.3} A, discharge complete",
                        m.current, params.cv_stop_current
                    );
                    return Ok(StopReason::CurrentThreshold);
                }
                _ => {}
            }
        }

        info!("Stop requested");
        Ok(StopReason::Requested)
    }

    /// Programs the load for `mode`, waits for a second boundary and enables the input.
    fn enter_phase(
        &self,
        session: &mut LoadSession<C::Io>,
        mode: Mode,
        params: &DischargeParameters,
    ) -> Result<()> {
        info!("Fixed {} mode discharge", mode);
        let setpoint = match mode {
            Mode::Cc => Command::SetCurrent(params.cc_current),
            Mode::Cv => Command::SetVoltage(params.cc_end_voltage),
        };
        session.send_logged(&Command::SetMode(mode))?;
        session.send_logged(&setpoint)?;
        self.clock.sleep_to_next_second();
        session.send_logged(&Command::Output(true))?;
        Ok(())
    }

    /// Takes one reading. An unusable reply skips the tick until too many in a row.
    fn measure(
        &self,
        session: &mut LoadSession<C::Io>,
        run: &mut RunState,
    ) -> Result<Option<Measurement>> {
        let reading = session.measure()?;
        let timestamp = self.clock.now();

        let Some(reading) = reading else {
            run.missed += 1;
            warn!(
                "No valid measurement this tick ({}/{})",
                run.missed, MAX_MISSED_MEASUREMENTS
            );
            if run.missed >= MAX_MISSED_MEASUREMENTS {
                return Err(DischargeError::MeasurementLost {
                    port: session.port().to_string(),
                    attempts: run.missed,
                });
            }
            return Ok(None);
        };

        run.missed = 0;
        if run.run_start.is_none() {
            run.run_start = Some(timestamp);
        }
        Ok(Some(Measurement {
            timestamp,
            voltage: reading.voltage,
            current: reading.current,
        }))
    }

    /// Output off, beep, back to local control. Every command is attempted.
    fn shutdown(&self, session: &mut LoadSession<C::Io>) {
        for cmd in [Command::Output(false), Command::Beep, Command::Local] {
            match session.send_command(&cmd) {
                Ok(true) => {}
                Ok(false) => warn!("[{}] Command not acknowledged: {}", session.port(), cmd),
                Err(e) => error!("Shutdown command {} failed: {}", cmd, e),
            }
        }
    }
}

/// Switches the load input off and hands the panel back, outside of any run.
pub fn release_device<C: Connector>(connector: &C, identity: &DeviceIdentity) -> Result<()> {
    info!("Releasing {}", identity);
    let mut session = LoadSession::open(connector, &identity.port, READ_TIMEOUT)?;
    let result = session
        .send_logged(&Command::Output(false))
        .and_then(|_| session.send_logged(&Command::Local));
    session.close();
    result?;
    Ok(())
}

/// A discharge running on its own thread.
pub struct DischargeHandle {
    samples: SampleReceiver,
    stop: StopToken,
    worker: JoinHandle<Result<RunOutcome>>,
}

/// Starts `controller` on a dedicated worker thread.
pub fn spawn<C, K>(
    mut controller: DischargeController<C, K>,
    identity: DeviceIdentity,
    params: DischargeParameters,
) -> Result<DischargeHandle>
where
    C: Connector + Send + 'static,
    K: Clock + Send + 'static,
{
    let (tx, samples) = sample_channel();
    let stop = StopToken::new();
    let worker_stop = stop.clone();

    let worker = thread::Builder::new()
        .name("discharge".to_string())
        .spawn(move || controller.run(&identity, &params, &tx, &worker_stop))
        .map_err(DischargeError::Worker)?;

    Ok(DischargeHandle {
        samples,
        stop,
        worker,
    })
}

impl DischargeHandle {
    pub fn try_next_sample(&self) -> Option<Sample> {
        self.samples.try_pop()
    }

    pub fn drain_samples(&self) -> Vec<Sample> {
        self.samples.drain()
    }

    /// Asks the worker to stop; it notices within about one second.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the worker and returns how the run ended.
    pub fn join(self) -> Result<RunOutcome> {
        self.worker
            .join()
            .map_err(|_| DischargeError::WorkerPanicked)?
    }
}
