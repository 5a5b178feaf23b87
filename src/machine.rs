//! Transaction pipeline state machine.
//!
//! Each device runs at most one activation at a time. An activation starts
//! when an entry point finds the device idle and claims it, then chains one
//! bus exchange after another, each chosen from the flags read so far and
//! the requests queued while the device was busy:
//!
//! ```text
//! ReadFlags ──RX0IF──> ReadRxBuffer0 ──RX1IF──> ReadRxBuffer1 ──┐
//!     │ ──RX1IF──────────────────────────────> ReadRxBuffer1   │
//!     │ ──other flags──> ClearInterruptFlags ──EFLG──> ClearErrorFlags ──> ReadFlags
//!     │                        └──────────────────────────────────────────> ReadFlags
//!     └──no flags──> dispatch: LoadTxBuffer0 | ReadFlags | release
//!
//! after a receive buffer: LoadTxBuffer0 if a transmit is queued, else ReadFlags
//! LoadTxBuffer0 ──> RequestToSendTxBuffer0 ──> ReadFlags
//! ```
//!
//! Flags are re-read after every action because the controller raises new
//! ones independently; a burst of interrupts folds into a single activation.
//!
//! [`DeviceState`] is only touched inside the device's critical section and
//! never performs I/O, so the whole table can be driven without a bus.

use bitflags::bitflags;
use embedded_hal::can::Frame;

use crate::{
    buffer::RxBuf,
    frame::CanFrame,
    instruction,
    regs::{CanIntf, Eflg, Register},
    stat::Stats,
    transaction::Transaction,
};

/// A pipeline step, named after the bus exchange it performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Read `CANINTF` and `EFLG` in one exchange.
    ReadFlags,
    ReadRxBuffer0,
    ReadRxBuffer1,
    /// Clear every latched `CANINTF` bit except the receive flags.
    ClearInterruptFlags,
    /// Clear the latched `EFLG` bits.
    ClearErrorFlags,
    LoadTxBuffer0,
    RequestToSendTxBuffer0,
}

impl Step {
    /// Receive buffer read by this step.
    pub fn rx_buffer(self) -> Option<RxBuf> {
        match self {
            Step::ReadRxBuffer0 => Some(RxBuf::B0),
            Step::ReadRxBuffer1 => Some(RxBuf::B1),
            _ => None,
        }
    }

    fn build(self, buf: &mut [u8], canintf: CanIntf, eflg: Eflg, frame: Option<&CanFrame>) -> usize {
        match self {
            Step::ReadFlags => instruction::read(buf, Register::CANINTF, 2),
            Step::ReadRxBuffer0 => instruction::read_rx_buffer(buf, RxBuf::B0),
            Step::ReadRxBuffer1 => instruction::read_rx_buffer(buf, RxBuf::B1),
            Step::ClearInterruptFlags => {
                instruction::bit_modify(buf, Register::CANINTF, (canintf & !CanIntf::RX).bits(), 0)
            }
            Step::ClearErrorFlags => instruction::bit_modify(buf, Register::EFLG, eflg.bits(), 0),
            Step::LoadTxBuffer0 => frame.map_or(0, |frame| instruction::load_tx0(buf, frame)),
            Step::RequestToSendTxBuffer0 => instruction::rts_tx0(buf),
        }
    }
}

bitflags! {
    /// Work requested while the device was busy.
    #[derive(Default)]
    pub(crate) struct Pending: u8 {
        const INTERRUPT = 0b01;
        const TRANSMIT = 0b10;
    }
}

/// What to do after a step completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    Issue(Step),
    /// The activation is over and the device is idle again.
    Release,
}

/// Outcome of handing a received frame to the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered(usize),
    Dropped,
}

/// A bus exchange the transport refused to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub step: Step,
}

/// Side effects of a completed step for the caller to carry out once the
/// critical section is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub next: Next,
    /// `TX0IF` was cleared. Holds the frame that was in flight, if any.
    pub transmitted: Option<Option<CanFrame>>,
    /// The controller reported a receive overflow.
    pub overflow: bool,
}

pub(crate) struct DeviceState {
    busy: bool,
    pending: Pending,
    canintf: CanIntf,
    eflg: Eflg,
    outbound: Option<CanFrame>,
    slot: Option<Transaction>,
    fault: Option<Fault>,
    /// The interface was stopped. Completions still return the transaction
    /// but nothing further is issued or accounted.
    down: bool,
    pub stats: Stats,
}

impl DeviceState {
    pub const fn new() -> Self {
        Self {
            busy: false,
            pending: Pending::empty(),
            canintf: CanIntf::empty(),
            eflg: Eflg::empty(),
            outbound: None,
            slot: Some(Transaction::new()),
            fault: None,
            down: false,
            stats: Stats {
                rx_packets: 0,
                rx_bytes: 0,
                rx_dropped: 0,
                rx_over_errors: 0,
                tx_packets: 0,
                tx_bytes: 0,
                bus_errors: 0,
            },
        }
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Whether the transaction is back in the slot.
    #[inline]
    pub fn is_quiescent(&self) -> bool {
        self.slot.is_some()
    }

    #[inline]
    pub fn is_down(&self) -> bool {
        self.down
    }

    /// The interrupt line fired. Returns the first step if the caller now owns
    /// the device.
    pub fn interrupt(&mut self) -> Option<Step> {
        if self.down {
            None
        } else if self.busy {
            self.pending.insert(Pending::INTERRUPT);
            None
        } else {
            self.busy = true;
            Some(Step::ReadFlags)
        }
    }

    /// Queues `frame` for transmission. Hands the frame back if one is
    /// already held. On success, returns the first step if the caller now
    /// owns the device: the frame is known, so the flags read is skipped.
    pub fn transmit(&mut self, frame: CanFrame) -> Result<Option<Step>, CanFrame> {
        if self.down || self.outbound.is_some() {
            return Err(frame);
        }
        self.outbound = Some(frame);
        if self.busy {
            self.pending.insert(Pending::TRANSMIT);
            Ok(None)
        } else {
            self.busy = true;
            Ok(Some(Step::LoadTxBuffer0))
        }
    }

    /// Takes the transaction out of the slot with the request for `step`
    /// written into it. A load without a frame to load becomes a flags read.
    ///
    /// Returns `None` if the transaction is not in the slot, which means the
    /// caller does not own the device.
    pub fn begin(&mut self, step: Step) -> Option<Transaction> {
        let mut xfer = self.slot.take()?;
        let step = if step == Step::LoadTxBuffer0 && self.outbound.is_none() {
            Step::ReadFlags
        } else {
            step
        };
        let (canintf, eflg, frame) = (self.canintf, self.eflg, self.outbound);
        xfer.prepare(step, |buf| step.build(buf, canintf, eflg, frame.as_ref()));
        Some(xfer)
    }

    /// Absorbs a finished exchange and picks the next step.
    pub fn complete(&mut self, xfer: Transaction, delivery: Option<Delivery>) -> Outcome {
        let step = xfer.step();
        let mut transmitted = None;
        let mut overflow = false;

        if self.down {
            self.slot = Some(xfer);
            self.busy = false;
            return Outcome {
                next: Next::Release,
                transmitted,
                overflow,
            };
        }

        match step {
            Step::ReadFlags => {
                let response = xfer.response();
                self.canintf = CanIntf::from_bits_truncate(response[2]);
                self.eflg = Eflg::from_bits_truncate(response[3]);
            }
            Step::ReadRxBuffer0 | Step::ReadRxBuffer1 => match delivery {
                Some(Delivery::Delivered(len)) => self.stats.record_rx(len),
                Some(Delivery::Dropped) => {
                    self.stats.rx_dropped = self.stats.rx_dropped.wrapping_add(1)
                }
                None => {}
            },
            Step::ClearInterruptFlags => {
                if self.canintf.contains(CanIntf::TX0IF) {
                    let frame = self.outbound.take();
                    if let Some(frame) = &frame {
                        self.stats.record_tx(frame.dlc());
                    }
                    transmitted = Some(frame);
                }
            }
            Step::ClearErrorFlags => {
                if self.eflg.intersects(Eflg::RXOVR) {
                    self.stats.rx_over_errors = self.stats.rx_over_errors.wrapping_add(1);
                    overflow = true;
                }
            }
            Step::LoadTxBuffer0 | Step::RequestToSendTxBuffer0 => {}
        }

        self.slot = Some(xfer);
        Outcome {
            next: self.advance(step),
            transmitted,
            overflow,
        }
    }

    /// The transport refused to start `xfer`. The activation ends here; a
    /// refused load or send re-queues the held frame for the next activation.
    pub fn abandon(&mut self, xfer: Transaction) -> Fault {
        let fault = Fault { step: xfer.step() };
        if matches!(fault.step, Step::LoadTxBuffer0 | Step::RequestToSendTxBuffer0)
            && self.outbound.is_some()
        {
            self.pending.insert(Pending::TRANSMIT);
        }
        self.slot = Some(xfer);
        self.busy = false;
        self.stats.bus_errors = self.stats.bus_errors.wrapping_add(1);
        self.fault = Some(fault);
        fault
    }

    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }

    /// Marks the interface up with nothing queued or latched. Returns a frame
    /// left over from before, which will not be sent.
    pub fn start(&mut self) -> Option<CanFrame> {
        self.down = false;
        self.clear()
    }

    /// Marks the interface down. An exchange still in flight ends the
    /// activation when it completes. Returns the outbound frame, which will
    /// not be sent.
    pub fn stop(&mut self) -> Option<CanFrame> {
        self.down = true;
        self.clear()
    }

    fn clear(&mut self) -> Option<CanFrame> {
        self.pending = Pending::empty();
        self.canintf = CanIntf::empty();
        self.eflg = Eflg::empty();
        self.fault = None;
        self.outbound.take()
    }

    fn advance(&mut self, step: Step) -> Next {
        match step {
            Step::ReadFlags => {
                if self.canintf.contains(RxBuf::B0.flag()) {
                    Next::Issue(Step::ReadRxBuffer0)
                } else if self.canintf.contains(RxBuf::B1.flag()) {
                    Next::Issue(Step::ReadRxBuffer1)
                } else if !self.canintf.is_empty() {
                    Next::Issue(Step::ClearInterruptFlags)
                } else {
                    self.dispatch()
                }
            }
            Step::ReadRxBuffer0 => {
                if self.canintf.contains(RxBuf::B1.flag()) {
                    Next::Issue(Step::ReadRxBuffer1)
                } else {
                    self.transmit_or_read_flags()
                }
            }
            Step::ReadRxBuffer1 => self.transmit_or_read_flags(),
            Step::ClearInterruptFlags => {
                if self.eflg.is_empty() {
                    Next::Issue(Step::ReadFlags)
                } else {
                    Next::Issue(Step::ClearErrorFlags)
                }
            }
            Step::ClearErrorFlags => Next::Issue(Step::ReadFlags),
            Step::LoadTxBuffer0 => Next::Issue(Step::RequestToSendTxBuffer0),
            Step::RequestToSendTxBuffer0 => Next::Issue(Step::ReadFlags),
        }
    }

    fn transmit_or_read_flags(&mut self) -> Next {
        if self.pending.contains(Pending::TRANSMIT) {
            self.pending.remove(Pending::TRANSMIT);
            Next::Issue(Step::LoadTxBuffer0)
        } else {
            Next::Issue(Step::ReadFlags)
        }
    }

    /// Nothing latched in the controller: serve queued work or go idle.
    fn dispatch(&mut self) -> Next {
        if self.pending.contains(Pending::TRANSMIT) {
            self.pending.remove(Pending::TRANSMIT);
            Next::Issue(Step::LoadTxBuffer0)
        } else if self.pending.contains(Pending::INTERRUPT) {
            self.pending.remove(Pending::INTERRUPT);
            Next::Issue(Step::ReadFlags)
        } else {
            self.busy = false;
            Next::Release
        }
    }
}
