#![allow(dead_code)]

use std::sync::Mutex;

use embedded_hal::can::{ExtendedId, Frame, Id, StandardId};
use mcp2515_netdev::{
    buffer::{self, RX_READ_LEN},
    regs::{CanIntf, Eflg},
    Bitrate, CanFrame, Dropped, InterruptLine, MCP2515, NetInterface, PlatformData, Settings,
    Step, Transaction, Transport,
};

pub const OSCILLATOR_HZ: u32 = 16_000_000;

const CANCTRL: usize = 0x0F;
const CANINTF: usize = 0x2C;
const EFLG: usize = 0x2D;
const TXB0SIDH: usize = 0x31;
const RXB0SIDH: usize = 0x61;
const RXB1SIDH: usize = 0x71;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn std_frame(id: u16, data: &[u8]) -> CanFrame {
    CanFrame::new(StandardId::new(id).unwrap(), data).unwrap()
}

pub fn ext_frame(id: u32, data: &[u8]) -> CanFrame {
    CanFrame::new(ExtendedId::new(id).unwrap(), data).unwrap()
}

/// Register-level model of the controller, with receive buffer 0 rolling
/// over into buffer 1.
pub struct Chip {
    pub regs: [u8; 0x80],
    /// Frames requested to send, in order.
    pub sent: Vec<CanFrame>,
    /// Frames lost because both receive buffers were full.
    pub lost: usize,
    pub resets: usize,
}

impl Chip {
    pub fn new() -> Self {
        let mut chip = Chip {
            regs: [0; 0x80],
            sent: Vec::new(),
            lost: 0,
            resets: 0,
        };
        chip.reset();
        chip
    }

    fn reset(&mut self) {
        self.regs = [0; 0x80];
        self.regs[CANCTRL] = 0x87;
        self.resets += 1;
    }

    pub fn canintf(&self) -> CanIntf {
        CanIntf::from_bits_truncate(self.regs[CANINTF])
    }

    pub fn eflg(&self) -> Eflg {
        Eflg::from_bits_truncate(self.regs[EFLG])
    }

    /// A frame arrives from the bus.
    pub fn receive(&mut self, frame: &CanFrame) {
        let mut block = [0u8; RX_READ_LEN];
        buffer::encode_receive(frame, &mut block);
        let intf = self.canintf();
        let (base, flag) = if !intf.contains(CanIntf::RX0IF) {
            (RXB0SIDH, CanIntf::RX0IF)
        } else if !intf.contains(CanIntf::RX1IF) {
            (RXB1SIDH, CanIntf::RX1IF)
        } else {
            self.raise_overflow(Eflg::RX1OVR);
            self.lost += 1;
            return;
        };
        self.regs[base..base + RX_READ_LEN - 1].copy_from_slice(&block[1..]);
        self.regs[CANINTF] |= flag.bits();
    }

    pub fn raise_overflow(&mut self, bits: Eflg) {
        self.regs[EFLG] |= bits.bits();
        self.regs[CANINTF] |= CanIntf::ERRIF.bits();
    }

    /// Clocks one request through the controller.
    pub fn exchange(&mut self, request: &[u8], response: &mut [u8]) {
        response.fill(0);
        match request[0] {
            0xC0 => self.reset(),
            0x02 => {
                let addr = request[1] as usize;
                let data = &request[2..];
                self.regs[addr..addr + data.len()].copy_from_slice(data);
            }
            0x03 => {
                let addr = request[1] as usize;
                for (i, slot) in response[2..].iter_mut().enumerate() {
                    *slot = self.regs[addr + i];
                }
            }
            0x05 => {
                let addr = request[1] as usize;
                let (mask, value) = (request[2], request[3]);
                self.regs[addr] = (self.regs[addr] & !mask) | (value & mask);
            }
            0x90 | 0x94 => {
                let (base, flag) = if request[0] == 0x90 {
                    (RXB0SIDH, CanIntf::RX0IF)
                } else {
                    (RXB1SIDH, CanIntf::RX1IF)
                };
                let n = response.len().min(RX_READ_LEN) - 1;
                response[1..1 + n].copy_from_slice(&self.regs[base..base + n]);
                self.regs[CANINTF] &= !flag.bits();
            }
            0x40 => {
                let data = &request[1..];
                self.regs[TXB0SIDH..TXB0SIDH + 13].fill(0);
                self.regs[TXB0SIDH..TXB0SIDH + data.len()].copy_from_slice(data);
            }
            0x81 => {
                let frame = decode_transmit(&self.regs[TXB0SIDH..TXB0SIDH + 13]);
                self.sent.push(frame);
                self.regs[CANINTF] |= CanIntf::TX0IF.bits();
            }
            other => panic!("unknown instruction 0x{other:02X}"),
        }
    }
}

/// Reads back the transmit buffer layout: RTR lives in the length register
/// for both identifier kinds.
fn decode_transmit(regs: &[u8]) -> CanFrame {
    let (sidh, sidl, eid8, eid0, dlc) = (regs[0], regs[1], regs[2], regs[3], regs[4]);
    let rtr = dlc & 0x40 != 0;
    let len = (dlc & 0x0F) as usize;
    let id: Id = if sidl & 0x08 != 0 {
        let raw = (sidh as u32) << 21
            | ((sidl >> 5) as u32) << 18
            | ((sidl & 0x03) as u32) << 16
            | (eid8 as u32) << 8
            | eid0 as u32;
        ExtendedId::new(raw).unwrap().into()
    } else {
        StandardId::new((sidh as u16) << 3 | (sidl >> 5) as u16)
            .unwrap()
            .into()
    };
    if rtr {
        CanFrame::new_remote(id, len).unwrap()
    } else {
        CanFrame::new(id, &regs[5..5 + len]).unwrap()
    }
}

#[derive(Default)]
struct BusState {
    in_flight: Option<Transaction>,
    steps: Vec<Step>,
    writes: Vec<Vec<u8>>,
    fail_submits: usize,
    fail_write_opcode: Option<u8>,
}

/// Transport that runs every exchange against a [`Chip`] at submission and
/// holds the transaction until the test completes it.
pub struct MockBus {
    pub chip: Mutex<Chip>,
    state: Mutex<BusState>,
}

impl MockBus {
    pub fn new() -> Self {
        MockBus {
            chip: Mutex::new(Chip::new()),
            state: Mutex::new(BusState::default()),
        }
    }

    /// The outstanding transaction, if any.
    pub fn take(&self) -> Option<Transaction> {
        self.state.lock().unwrap().in_flight.take()
    }

    pub fn in_flight(&self) -> Option<Step> {
        self.state.lock().unwrap().in_flight.as_ref().map(Transaction::step)
    }

    /// Steps submitted so far.
    pub fn steps(&self) -> Vec<Step> {
        self.state.lock().unwrap().steps.clone()
    }

    /// Steps submitted so far, forgetting them.
    pub fn take_steps(&self) -> Vec<Step> {
        std::mem::take(&mut self.state.lock().unwrap().steps)
    }

    /// Blocking writes so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Refuses the next `n` submissions.
    pub fn fail_submits(&self, n: usize) {
        self.state.lock().unwrap().fail_submits = n;
    }

    /// Refuses blocking writes of instruction `opcode`.
    pub fn fail_writes(&self, opcode: Option<u8>) {
        self.state.lock().unwrap().fail_write_opcode = opcode;
    }

    pub fn with_chip<R>(&self, f: impl FnOnce(&mut Chip) -> R) -> R {
        f(&mut self.chip.lock().unwrap())
    }
}

impl Transport for MockBus {
    type Error = ();

    fn submit(&self, mut xfer: Transaction) -> Result<(), ((), Transaction)> {
        let mut state = self.state.lock().unwrap();
        assert!(
            state.in_flight.is_none(),
            "submitted {:?} while {:?} is outstanding",
            xfer.step(),
            state.in_flight.as_ref().map(Transaction::step)
        );
        if state.fail_submits > 0 {
            state.fail_submits -= 1;
            return Err(((), xfer));
        }
        let (request, response) = xfer.buffers();
        self.chip.lock().unwrap().exchange(request, response);
        state.steps.push(xfer.step());
        state.in_flight = Some(xfer);
        Ok(())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), ()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_write_opcode == Some(bytes[0]) {
            return Err(());
        }
        state.writes.push(bytes.to_vec());
        let mut response = vec![0u8; bytes.len()];
        self.chip.lock().unwrap().exchange(bytes, &mut response);
        Ok(())
    }
}

#[derive(Default)]
pub struct NetLog {
    pub delivered: Vec<CanFrame>,
    pub echoed: Vec<CanFrame>,
    pub stops: usize,
    pub wakes: usize,
}

/// Network interface that records every call.
#[derive(Default)]
pub struct MockNet {
    log: Mutex<NetLog>,
    refuse: Mutex<bool>,
}

impl MockNet {
    pub fn refuse(&self, refuse: bool) {
        *self.refuse.lock().unwrap() = refuse;
    }

    pub fn with_log<R>(&self, f: impl FnOnce(&NetLog) -> R) -> R {
        f(&self.log.lock().unwrap())
    }

    pub fn delivered(&self) -> Vec<CanFrame> {
        self.with_log(|log| log.delivered.clone())
    }

    pub fn echoed(&self) -> Vec<CanFrame> {
        self.with_log(|log| log.echoed.clone())
    }

    pub fn wakes(&self) -> usize {
        self.with_log(|log| log.wakes)
    }

    pub fn stops(&self) -> usize {
        self.with_log(|log| log.stops)
    }
}

impl NetInterface for MockNet {
    fn deliver(&self, frame: CanFrame) -> Result<(), Dropped> {
        if *self.refuse.lock().unwrap() {
            return Err(Dropped);
        }
        self.log.lock().unwrap().delivered.push(frame);
        Ok(())
    }

    fn echo(&self, frame: &CanFrame) {
        self.log.lock().unwrap().echoed.push(*frame);
    }

    fn stop_queue(&self) {
        self.log.lock().unwrap().stops += 1;
    }

    fn wake_queue(&self) {
        self.log.lock().unwrap().wakes += 1;
    }
}

#[derive(Default)]
pub struct MockIrq {
    pub requested: bool,
    pub requests: usize,
    pub frees: usize,
    pub fail: bool,
}

impl InterruptLine for MockIrq {
    type Error = &'static str;

    fn request(&mut self) -> Result<(), Self::Error> {
        if self.fail {
            return Err("line in use");
        }
        self.requested = true;
        self.requests += 1;
        Ok(())
    }

    fn free(&mut self) {
        self.requested = false;
        self.frees += 1;
    }
}

pub type Device = MCP2515<MockBus, MockNet>;

/// An opened device on a simulated controller.
pub struct Rig {
    pub dev: Device,
    pub irq: MockIrq,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_settings(Settings {
            bitrate: Bitrate::BitsPerSecond(500_000),
            ..Default::default()
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        init_logger();
        let pdata = PlatformData {
            oscillator_hz: OSCILLATOR_HZ,
        };
        let dev = MCP2515::probe(MockBus::new(), MockNet::default(), Some(pdata)).unwrap();
        let mut irq = MockIrq::default();
        dev.open(&settings, &mut irq).unwrap();
        Rig { dev, irq }
    }

    pub fn bus(&self) -> &MockBus {
        self.dev.bus()
    }

    pub fn net(&self) -> &MockNet {
        self.dev.interface()
    }

    /// Completes outstanding transactions until the device goes idle and
    /// returns the steps submitted since the last run.
    pub fn run(&self) -> Vec<Step> {
        for _ in 0..1000 {
            match self.bus().take() {
                Some(xfer) => {
                    let _ = self.dev.complete(xfer);
                }
                None => return self.bus().take_steps(),
            }
        }
        panic!("infinite loop detected");
    }

    /// Completes the outstanding transaction only.
    pub fn step(&self) -> Option<Step> {
        let xfer = self.bus().take()?;
        let step = xfer.step();
        let _ = self.dev.complete(xfer);
        Some(step)
    }

    /// A frame arrives and the controller raises its interrupt line.
    pub fn receive(&self, frame: &CanFrame) {
        self.bus().with_chip(|chip| chip.receive(frame));
        self.dev.interrupt().unwrap();
    }
}
