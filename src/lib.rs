#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod error;
pub mod frame;
pub mod instruction;
pub(crate) mod machine;
pub mod netif;
pub mod regs;
pub mod stat;
pub mod timing;
pub mod transaction;
pub mod transport;

use core::cell::RefCell;

use embedded_hal::can::Frame;

pub use crate::{
    error::{Error, Result},
    frame::CanFrame,
    machine::{Fault, Step},
    netif::{Dropped, InterruptLine, NetInterface},
    stat::Stats,
    timing::{BitTiming, CanSpeed, McpSpeed},
    transaction::Transaction,
    transport::{BlockingSpi, SpiError, Transport},
};

use crate::{
    buffer::RxBuf,
    machine::{Delivery, DeviceState, Next},
    regs::{CanInte, OpMode, RecvBufOpMode, Register, Rxb0Ctrl, Rxb1Ctrl},
};

/// Board description the device is probed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformData {
    /// Frequency of the oscillator attached to the MCP2515.
    pub oscillator_hz: u32,
}

/// How the bitrate is specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitrate {
    /// One of the preset register values for 8 MHz and 16 MHz oscillators.
    Preset(CanSpeed),
    /// Bit timing derived from the oscillator frequency.
    BitsPerSecond(u32),
    /// Bit timing given directly.
    Timing(BitTiming),
}

/// Settings used to open the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Device operation mode. Only normal, loopback and listen-only modes are
    /// accepted.
    pub mode: OpMode,
    pub bitrate: Bitrate,
    /// Samples each bit three times, on top of whatever the bitrate selects.
    pub triple_sample: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: OpMode::Normal,
            bitrate: Bitrate::BitsPerSecond(125_000),
            triple_sample: false,
        }
    }
}

/// MCP2515 driver.
///
/// All operations take `&self`: the interrupt handler, the transmit path and
/// the transport's completion context each call into the same device, which
/// serializes them onto one bus transaction at a time. Device state lives in
/// a critical section that is never held across bus or interface calls.
///
/// A typical setup calls [`interrupt`](Self::interrupt) from the controller's
/// interrupt handler, [`transmit`](Self::transmit) from the network stack and
/// [`complete`](Self::complete) from the transport's completion handler.
pub struct MCP2515<T, N> {
    bus: T,
    iface: N,
    oscillator_hz: u32,
    state: critical_section::Mutex<RefCell<DeviceState>>,
}

impl<T, N> MCP2515<T, N>
where
    T: Transport,
    N: NetInterface,
{
    /// Attaches to a controller and resets it.
    ///
    /// # Parameters
    ///
    /// * `bus` - Transport to the controller.
    /// * `iface` - Network interface frames are delivered to.
    /// * `pdata` - Board description. Required.
    pub fn probe(bus: T, iface: N, pdata: Option<PlatformData>) -> Result<Self, T::Error> {
        let pdata = pdata.ok_or(Error::MissingPlatformData)?;
        if pdata.oscillator_hz == 0 {
            return Err(Error::InvalidOscillator(pdata.oscillator_hz));
        }

        let this = Self {
            bus,
            iface,
            oscillator_hz: pdata.oscillator_hz,
            state: critical_section::Mutex::new(RefCell::new(DeviceState::new())),
        };
        this.reset()?;
        log::info!("mcp2515 probed, oscillator {} Hz", this.oscillator_hz);
        Ok(this)
    }

    /// Brings the interface up.
    ///
    /// The bit timing is resolved before anything touches the controller, so
    /// an invalid bitrate leaves everything as it was. If configuring the
    /// controller fails, it is reset and the interrupt line is freed again.
    ///
    /// Fails with [`Error::Busy`] until a transaction left in flight by
    /// [`stop`](Self::stop) has been completed.
    pub fn open(&self, settings: &Settings, irq: &mut impl InterruptLine) -> Result<(), T::Error> {
        if !self.with_state(|state| state.is_quiescent()) {
            return Err(Error::Busy);
        }
        if !settings.mode.is_operational() {
            return Err(Error::InvalidMode(settings.mode));
        }
        let timing = self.bit_timing(settings)?;

        self.reset()?;
        if let Err(e) = irq.request() {
            log::error!("failed to request interrupt: {:?}", e);
            return Err(Error::Irq);
        }
        if let Err(e) = self.configure(&timing, settings.mode) {
            log::error!("failed to configure controller: {:?}", e);
            if self.reset().is_err() {
                log::warn!("reset after failed configuration failed too");
            }
            irq.free();
            return Err(e);
        }

        if let Some(frame) = self.with_state(DeviceState::start) {
            log::debug!("discarding frame {:?} left from before open", frame.id());
        }
        self.iface.wake_queue();
        Ok(())
    }

    /// Writes bit timing, interrupt enables, receive buffer modes and the
    /// operation mode.
    ///
    /// Both receive buffers accept every frame and buffer 0 rolls over into
    /// buffer 1 when full.
    pub fn configure(&self, timing: &BitTiming, mode: OpMode) -> Result<(), T::Error> {
        timing.validate().map_err(Error::InvalidBitTiming)?;
        let (cnf1, cnf2, cnf3) = timing.registers();
        let [cnf1, cnf2, cnf3] = [cnf1.into_bytes()[0], cnf2.into_bytes()[0], cnf3.into_bytes()[0]];
        log::info!(
            "CNF1 0x{:02X} CNF2 0x{:02X} CNF3 0x{:02X}, {} bit/s",
            cnf1,
            cnf2,
            cnf3,
            timing.bitrate(self.oscillator_hz / 2)
        );

        // CNF3, CNF2, CNF1 and CANINTE are consecutive.
        self.write_registers(Register::CNF3, &[cnf3, cnf2, cnf1, CanInte::all().bits()])?;

        let rxb0 = Rxb0Ctrl::new()
            .with_rxm(RecvBufOpMode::FilterOff)
            .with_bukt(true);
        self.write_registers(RxBuf::B0.ctrl(), &rxb0.into_bytes())?;
        let rxb1 = Rxb1Ctrl::new().with_rxm(RecvBufOpMode::FilterOff);
        self.write_registers(RxBuf::B1.ctrl(), &rxb1.into_bytes())?;

        let canctrl = regs::CanCtrl::new().with_reqop(mode);
        self.write_registers(Register::CANCTRL, &canctrl.into_bytes())
    }

    /// Takes the interface down: frees the interrupt line and resets the
    /// controller. A frame waiting to be sent is discarded.
    ///
    /// A transaction still in flight has to be passed to
    /// [`complete`](Self::complete) as usual. It ends the activation there
    /// without delivering anything, since the controller it read from has
    /// been reset.
    pub fn stop(&self, irq: &mut impl InterruptLine) -> Result<(), T::Error> {
        self.iface.stop_queue();
        irq.free();
        if let Some(frame) = self.with_state(DeviceState::stop) {
            log::debug!("discarding unsent frame {:?}", frame.id());
        }
        self.reset()
    }

    /// The controller raised its interrupt line.
    ///
    /// Starts reading the controller's flags if the device is idle. Otherwise
    /// the running activation picks the interrupt up before it finishes.
    pub fn interrupt(&self) -> Result<(), T::Error> {
        match self.with_state(DeviceState::interrupt) {
            Some(step) => self.issue(step),
            None => Ok(()),
        }
    }

    /// Queues `frame` for transmission.
    ///
    /// The queue is stopped before anything else and woken once the
    /// controller reports the frame sent. Returns `WouldBlock` if a frame is
    /// already waiting. A bus error means the frame is kept and goes out with
    /// the next activation.
    pub fn transmit(&self, frame: CanFrame) -> nb::Result<(), Error<T::Error>> {
        self.iface.stop_queue();
        match self.with_state(|state| state.transmit(frame)) {
            Ok(Some(step)) => self.issue(step).map_err(nb::Error::Other),
            Ok(None) => Ok(()),
            Err(_) => Err(nb::Error::WouldBlock),
        }
    }

    /// Resumes the pipeline with a transaction the transport finished.
    ///
    /// `xfer` must be the transaction this device last submitted.
    pub fn complete(&self, xfer: Transaction) -> Result<(), T::Error> {
        let rx_buffer = match xfer.step().rx_buffer() {
            Some(buf) if !self.with_state(|state| state.is_down()) => Some(buf),
            _ => None,
        };
        let delivery = rx_buffer.map(|_| {
            let frame = xfer.received_frame();
            let len = frame.dlc();
            match self.iface.deliver(frame) {
                Ok(()) => Delivery::Delivered(len),
                Err(Dropped) => {
                    log::warn!("dropped received frame {:?}", frame.id());
                    Delivery::Dropped
                }
            }
        });

        let outcome = self.with_state(|state| state.complete(xfer, delivery));

        if let Some(sent) = outcome.transmitted {
            if let Some(frame) = &sent {
                self.iface.echo(frame);
            }
            self.iface.wake_queue();
        }
        if outcome.overflow {
            log::warn!("receive buffer overflow");
        }

        match outcome.next {
            Next::Issue(step) => self.issue(step),
            Next::Release => Ok(()),
        }
    }

    /// Snapshot of the interface counters.
    pub fn stats(&self) -> Stats {
        self.with_state(|state| state.stats)
    }

    /// The last transaction the transport refused to start, if not taken yet.
    pub fn take_fault(&self) -> Option<Fault> {
        self.with_state(DeviceState::take_fault)
    }

    /// Whether an activation is running.
    pub fn is_busy(&self) -> bool {
        self.with_state(|state| state.is_busy())
    }

    #[inline]
    pub fn bus(&self) -> &T {
        &self.bus
    }

    #[inline]
    pub fn interface(&self) -> &N {
        &self.iface
    }

    /// Gives back the transport and the interface. Fails while a transaction
    /// is outstanding.
    pub fn release(self) -> core::result::Result<(T, N), Self> {
        if self.with_state(|state| state.is_quiescent()) {
            Ok((self.bus, self.iface))
        } else {
            Err(self)
        }
    }

    /// Resets the controller, which also puts it into configuration mode.
    pub fn reset(&self) -> Result<(), T::Error> {
        let mut buf = [0u8; 1];
        let len = instruction::reset(&mut buf);
        self.bus.write(&buf[..len]).map_err(Error::Bus)
    }

    fn write_registers(&self, reg: Register, data: &[u8]) -> Result<(), T::Error> {
        let mut buf = [0u8; transaction::TRANSACTION_LEN];
        let len = instruction::write(&mut buf, reg, data);
        self.bus.write(&buf[..len]).map_err(Error::Bus)
    }

    fn bit_timing(&self, settings: &Settings) -> Result<BitTiming, T::Error> {
        let mut timing = match settings.bitrate {
            Bitrate::Preset(can_speed) => {
                let mcp_speed = McpSpeed::from_hz(self.oscillator_hz)
                    .ok_or(Error::InvalidOscillator(self.oscillator_hz))?;
                BitTiming::preset(mcp_speed, can_speed)
                    .ok_or(Error::InvalidConfiguration(can_speed, mcp_speed))?
            }
            Bitrate::BitsPerSecond(bitrate) => BitTiming::calculate(self.oscillator_hz / 2, bitrate)
                .ok_or(Error::UnreachableBitrate(bitrate))?,
            Bitrate::Timing(timing) => {
                timing.validate().map_err(Error::InvalidBitTiming)?;
                timing
            }
        };
        timing.triple_sample |= settings.triple_sample;
        Ok(timing)
    }

    /// Submits `step`. On failure the activation ends and the fault is
    /// recorded.
    fn issue(&self, step: Step) -> Result<(), T::Error> {
        let xfer = match self.with_state(|state| state.begin(step)) {
            Some(xfer) => xfer,
            None => return Ok(()),
        };
        log::trace!("{:?}", xfer.step());
        self.bus.submit(xfer).map_err(|(e, xfer)| {
            let fault = self.with_state(|state| state.abandon(xfer));
            log::error!("failed to submit {:?}: {:?}", fault.step, e);
            Error::Bus(e)
        })
    }

    #[inline]
    fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }
}

impl<SPI, CS, N> MCP2515<BlockingSpi<SPI, CS>, N>
where
    BlockingSpi<SPI, CS>: Transport,
    N: NetInterface,
{
    /// Feeds exchanges finished by the blocking transport back into the
    /// pipeline until it goes idle. Returns the number of steps completed.
    pub fn poll(&self) -> Result<usize, <BlockingSpi<SPI, CS> as Transport>::Error> {
        let mut steps = 0;
        while let Some(xfer) = self.bus.take_completed() {
            self.complete(xfer)?;
            steps += 1;
        }
        Ok(steps)
    }
}
