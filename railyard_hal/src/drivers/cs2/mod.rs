//! Märklin CS2/CS3 driver: CAN frames over TCP.
//!
//! One sender thread drains the outbound queue, one receiver thread
//! reads 13-byte frames with a one second timeout so both observe the
//! run flag promptly on shutdown.

pub mod frame;

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use railyard_common::datatypes::{
    Address, BoosterState, LocoFunctionNr, LocoFunctionState, Orientation, Protocol, Speed,
};
use railyard_common::ids::ControlId;

use crate::driver::{ControlEventSink, DriverCapabilities, HalError, RailDriver};
use crate::params::HardwareParams;
use frame::{CanFrame, FRAME_LEN};

/// CS2 CAN-over-TCP port.
const CS2_PORT: u16 = 15731;
const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Factory registered for [`crate::params::HardwareType::Cs2Tcp`].
/// `arg1` carries the station IP address.
pub fn create(
    params: &HardwareParams,
    sink: Arc<dyn ControlEventSink>,
) -> Result<Box<dyn RailDriver>, HalError> {
    let driver = Cs2TcpDriver::connect(params, sink)?;
    Ok(Box::new(driver))
}

pub struct Cs2TcpDriver {
    name: String,
    control: ControlId,
    run: Arc<AtomicBool>,
    tx: mpsc::Sender<CanFrame>,
    sender: Mutex<Option<JoinHandle<()>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Cs2TcpDriver {
    pub fn connect(
        params: &HardwareParams,
        sink: Arc<dyn ControlEventSink>,
    ) -> Result<Self, HalError> {
        if params.arg1.is_empty() {
            return Err(HalError::InitFailed(
                "cs2tcp requires the station address in arg1".to_string(),
            ));
        }
        let address = format!("{}:{CS2_PORT}", params.arg1);
        info!(name = %params.name, %address, "connecting to CS2");
        let stream = TcpStream::connect(&address)
            .map_err(|e| HalError::InitFailed(format!("connect to {address}: {e}")))?;
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .map_err(|e| HalError::InitFailed(e.to_string()))?;
        let read_stream = stream
            .try_clone()
            .map_err(|e| HalError::InitFailed(e.to_string()))?;

        let run = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<CanFrame>();

        let sender = {
            let run = Arc::clone(&run);
            let name = params.name.clone();
            thread::Builder::new()
                .name(format!("cs2-send-{}", params.control.0))
                .spawn(move || sender_loop(name, stream, rx, run))
                .map_err(|e| HalError::InitFailed(e.to_string()))?
        };
        let receiver = {
            let run = Arc::clone(&run);
            let name = params.name.clone();
            let control = params.control;
            thread::Builder::new()
                .name(format!("cs2-recv-{}", params.control.0))
                .spawn(move || receiver_loop(name, control, read_stream, sink, run))
                .map_err(|e| HalError::InitFailed(e.to_string()))?
        };

        Ok(Self {
            name: params.name.clone(),
            control: params.control,
            run,
            tx,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        })
    }

    fn send(&self, frame: CanFrame) -> Result<(), HalError> {
        self.tx
            .send(frame)
            .map_err(|_| HalError::SendFailed(format!("{}: sender thread gone", self.name)))
    }
}

fn sender_loop(
    name: String,
    mut stream: TcpStream,
    rx: mpsc::Receiver<CanFrame>,
    run: Arc<AtomicBool>,
) {
    debug!(%name, "sender thread started");
    while run.load(Ordering::SeqCst) {
        match rx.recv_timeout(IO_TIMEOUT) {
            Ok(frame) => {
                if let Err(err) = stream.write_all(&frame.encode()) {
                    error!(%name, %err, "unable to send to CS2");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(%name, "sender thread terminating");
}

fn receiver_loop(
    name: String,
    control: ControlId,
    mut stream: TcpStream,
    sink: Arc<dyn ControlEventSink>,
    run: Arc<AtomicBool>,
) {
    debug!(%name, "receiver thread started");
    let mut buffer = [0u8; FRAME_LEN];
    while run.load(Ordering::SeqCst) {
        match stream.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                if run.load(Ordering::SeqCst) {
                    error!(%name, %err, "unable to receive from CS2");
                }
                break;
            }
        }
        let Some(frame) = CanFrame::decode(&buffer) else {
            warn!(%name, "invalid datagram received");
            continue;
        };
        if let Some(state) = frame::as_system_event(&frame) {
            sink.booster_event(control, state);
            continue;
        }
        if let Some((contact, state)) = frame::as_feedback_event(&frame) {
            sink.feedback_event(control, contact, state);
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
    debug!(%name, "receiver thread terminating");
}

impl RailDriver for Cs2TcpDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn control_id(&self) -> ControlId {
        self.control
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::LOCO | DriverCapabilities::ACCESSORY | DriverCapabilities::FEEDBACK
    }

    fn booster(&self, state: BoosterState) -> Result<(), HalError> {
        self.send(frame::system_frame(state))
    }

    fn loco_speed(
        &self,
        protocol: Protocol,
        address: Address,
        speed: Speed,
    ) -> Result<(), HalError> {
        self.send(frame::loco_speed_frame(protocol, address, speed))
    }

    fn loco_orientation(
        &self,
        protocol: Protocol,
        address: Address,
        orientation: Orientation,
    ) -> Result<(), HalError> {
        let forward = orientation == Orientation::Right;
        self.send(frame::loco_direction_frame(protocol, address, forward))
    }

    fn loco_function(
        &self,
        protocol: Protocol,
        address: Address,
        nr: LocoFunctionNr,
        state: LocoFunctionState,
    ) -> Result<(), HalError> {
        let on = state == LocoFunctionState::On;
        self.send(frame::loco_function_frame(protocol, address, nr, on))
    }

    fn accessory(
        &self,
        protocol: Protocol,
        address: Address,
        state: u8,
        on: bool,
    ) -> Result<(), HalError> {
        self.send(frame::accessory_frame(protocol, address, state, on))
    }

    fn shutdown(&self) -> Result<(), HalError> {
        self.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.sender.lock().expect("cs2 poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.receiver.lock().expect("cs2 poisoned").take() {
            let _ = handle.join();
        }
        info!(name = %self.name, "CS2 driver stopped");
        Ok(())
    }
}

impl Drop for Cs2TcpDriver {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
