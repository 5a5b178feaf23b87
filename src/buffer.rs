//! Transmit and receive buffer layouts.
//!
//! A buffer read or load starts with the instruction byte, followed by the
//! five identifier/length registers (`SIDH`, `SIDL`, `EID8`, `EID0`, `DLC`)
//! and up to eight data registers.

use embedded_hal::can::{ExtendedId, Frame, Id, StandardId};
use modular_bitfield::prelude::*;

use crate::{
    frame::{CanFrame, MAX_DLC},
    instruction::Instruction,
    regs::{CanIntf, Register},
};

/// Bytes of a full receive buffer read: instruction, identifier block, data.
pub const RX_READ_LEN: usize = 1 + IDENT_LEN + MAX_DLC;

/// Identifier and length registers.
const IDENT_LEN: usize = 5;

/// Receive buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxBuf {
    B0,
    B1,
}

impl RxBuf {
    /// READ RX BUFFER instruction starting at this buffer's `SIDH`.
    #[inline]
    pub fn read_instruction(self) -> Instruction {
        match self {
            RxBuf::B0 => Instruction::ReadRX0,
            RxBuf::B1 => Instruction::ReadRX1,
        }
    }

    /// Interrupt flag raised when this buffer holds a frame.
    #[inline]
    pub fn flag(self) -> CanIntf {
        match self {
            RxBuf::B0 => CanIntf::RX0IF,
            RxBuf::B1 => CanIntf::RX1IF,
        }
    }

    /// Control register selecting the buffer's receive mode.
    #[inline]
    pub fn ctrl(self) -> Register {
        match self {
            RxBuf::B0 => Register::RXB0CTRL,
            RxBuf::B1 => Register::RXB1CTRL,
        }
    }
}

/// `SIDH`, `SIDL`, `EID8`, `EID0` and `DLC` of a transmit or receive buffer.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufIdent {
    /// Standard identifier bits 10..3.
    pub sid_high: B8,
    /// Extended identifier bits 17..16.
    pub eid_17_16: B2,
    #[skip]
    __: B1,
    /// Extended identifier enable.
    pub ide: bool,
    /// Standard frame remote transmit request (receive buffers only).
    pub srr: bool,
    /// Standard identifier bits 2..0.
    pub sid_low: B3,
    /// Extended identifier bits 15..8.
    pub eid_15_8: B8,
    /// Extended identifier bits 7..0.
    pub eid_7_0: B8,
    /// Data length code.
    pub dlc: B4,
    #[skip]
    __: B2,
    /// Remote transmit request. Extended frames only when receiving.
    pub rtr: bool,
    #[skip]
    __: B1,
}

impl BufIdent {
    fn with_id(self, id: Id) -> Self {
        match id {
            Id::Standard(id) => {
                let raw = id.as_raw();
                self.with_sid_high((raw >> 3) as u8)
                    .with_sid_low((raw & 0x7) as u8)
            }
            Id::Extended(id) => {
                let raw = id.as_raw();
                self.with_sid_high((raw >> 21) as u8)
                    .with_sid_low(((raw >> 18) & 0x7) as u8)
                    .with_ide(true)
                    .with_eid_17_16(((raw >> 16) & 0x3) as u8)
                    .with_eid_15_8((raw >> 8) as u8)
                    .with_eid_7_0(raw as u8)
            }
        }
    }

    /// Identifier registers as the transmit buffer expects them: the remote
    /// flag lives in `DLC` for both identifier kinds.
    pub fn for_transmit(frame: &CanFrame) -> Self {
        Self::new()
            .with_id(frame.id())
            .with_dlc(frame.dlc() as u8)
            .with_rtr(frame.is_remote_frame())
    }

    /// Identifier registers as the controller fills a receive buffer: the
    /// remote flag of a standard frame is reported in `SIDL.SRR`, that of an
    /// extended frame in `DLC.RTR`.
    pub fn for_receive(frame: &CanFrame) -> Self {
        let ident = Self::new()
            .with_id(frame.id())
            .with_dlc(frame.dlc() as u8);
        if frame.is_extended() {
            ident.with_rtr(frame.is_remote_frame())
        } else {
            ident.with_srr(frame.is_remote_frame())
        }
    }

    /// Identifier carried by the registers.
    pub fn id(&self) -> Id {
        if self.ide() {
            let raw = (self.sid_high() as u32) << 21
                | (self.sid_low() as u32) << 18
                | (self.eid_17_16() as u32) << 16
                | (self.eid_15_8() as u32) << 8
                | self.eid_7_0() as u32;
            Id::Extended(ExtendedId::new(raw).unwrap_or(ExtendedId::ZERO))
        } else {
            let raw = (self.sid_high() as u16) << 3 | self.sid_low() as u16;
            Id::Standard(StandardId::new(raw).unwrap_or(StandardId::ZERO))
        }
    }

    /// Builds the received frame. The data length is clamped to eight.
    pub fn into_frame(self, data: &[u8]) -> CanFrame {
        let rtr = if self.ide() { self.rtr() } else { self.srr() };
        CanFrame::from_raw(self.id(), rtr, self.dlc() as usize, data)
    }
}

/// Writes a LOAD TX BUFFER 0 request for `frame` and returns its length.
///
/// Remote frames load no data bytes.
pub fn encode_transmit(frame: &CanFrame, buf: &mut [u8]) -> usize {
    let data = frame.data();
    buf[0] = Instruction::LoadTX0 as u8;
    buf[1..1 + IDENT_LEN].copy_from_slice(&BufIdent::for_transmit(frame).into_bytes());
    buf[1 + IDENT_LEN..1 + IDENT_LEN + data.len()].copy_from_slice(data);
    1 + IDENT_LEN + data.len()
}

/// Decodes the response to a READ RX BUFFER request. The first byte is the
/// slot clocked out while the instruction was sent and is ignored.
pub fn decode_receive(buf: &[u8; RX_READ_LEN]) -> CanFrame {
    let mut ident = [0u8; IDENT_LEN];
    ident.copy_from_slice(&buf[1..1 + IDENT_LEN]);
    BufIdent::from_bytes(ident).into_frame(&buf[1 + IDENT_LEN..])
}

/// Lays `frame` out the way a receive buffer read returns it. This is what a
/// simulated controller answers to READ RX BUFFER.
pub fn encode_receive(frame: &CanFrame, buf: &mut [u8; RX_READ_LEN]) {
    buf.fill(0);
    buf[1..1 + IDENT_LEN].copy_from_slice(&BufIdent::for_receive(frame).into_bytes());
    let data = frame.data();
    buf[1 + IDENT_LEN..1 + IDENT_LEN + data.len()].copy_from_slice(data);
}
