//! MCP2515 registers.

use bitflags::bitflags;
use modular_bitfield::prelude::*;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    CANSTAT = 0x0E,
    CANCTRL = 0x0F,
    CNF3 = 0x28,
    CNF2 = 0x29,
    CNF1 = 0x2A,
    CANINTE = 0x2B,
    CANINTF = 0x2C,
    EFLG = 0x2D,
    TXB0CTRL = 0x30,
    TXB0SIDH = 0x31,
    RXB0CTRL = 0x60,
    RXB0SIDH = 0x61,
    RXB1CTRL = 0x70,
    RXB1SIDH = 0x71,
}

bitflags! {
    /// `CANINTF`, the interrupt flag register.
    #[derive(Default)]
    pub struct CanIntf: u8 {
        const RX0IF = 0b0000_0001;
        const RX1IF = 0b0000_0010;
        const TX0IF = 0b0000_0100;
        const TX1IF = 0b0000_1000;
        const TX2IF = 0b0001_0000;
        const ERRIF = 0b0010_0000;
        const WAKIF = 0b0100_0000;
        const MERRF = 0b1000_0000;
        /// Receive flags, cleared by the controller when the buffer is read
        /// with a READ RX BUFFER instruction.
        const RX = Self::RX0IF.bits | Self::RX1IF.bits;
    }
}

bitflags! {
    /// `CANINTE`, the interrupt enable register.
    pub struct CanInte: u8 {
        const RX0IE = 0b0000_0001;
        const RX1IE = 0b0000_0010;
        const TX0IE = 0b0000_0100;
        const TX1IE = 0b0000_1000;
        const TX2IE = 0b0001_0000;
        const ERRIE = 0b0010_0000;
        const WAKIE = 0b0100_0000;
        const MERRE = 0b1000_0000;
    }
}

bitflags! {
    /// `EFLG`, the error flag register.
    #[derive(Default)]
    pub struct Eflg: u8 {
        const EWARN = 0b0000_0001;
        const RXWAR = 0b0000_0010;
        const TXWAR = 0b0000_0100;
        const RXEP = 0b0000_1000;
        const TXEP = 0b0001_0000;
        const TXBO = 0b0010_0000;
        const RX0OVR = 0b0100_0000;
        const RX1OVR = 0b1000_0000;
        /// Either receive overflow bit. With roll-over enabled the controller
        /// does not set the bit the data sheet says it sets, so both count as
        /// the same event.
        const RXOVR = Self::RX0OVR.bits | Self::RX1OVR.bits;
    }
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanCtrl {
    /// CLKOUT Presacalar
    pub clkpre: B2,
    /// CLKOUT Enable
    pub clken: bool,
    /// One-shot Mode
    pub osm: bool,
    /// Abort All Pending Transmisison
    pub abat: bool,
    /// Request Operation Mode
    pub reqop: OpMode,
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cnf1 {
    /// Baud rate prescaler, minus one.
    pub brp: B6,
    /// Synchronization jump width, minus one.
    pub sjw: B2,
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cnf2 {
    /// Propagation segment length, minus one.
    pub prseg: B3,
    /// Phase segment 1 length, minus one.
    pub phseg1: B3,
    /// Sample three times at the sample point.
    pub sam: bool,
    /// Phase segment 2 length is taken from `CNF3`.
    pub btlmode: bool,
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cnf3 {
    /// Phase segment 2 length, minus one.
    pub phseg2: B3,
    #[skip]
    __: B3,
    pub wakfil: bool,
    pub sof: bool,
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rxb0Ctrl {
    /// Filter hit.
    #[skip(setters)]
    pub filhit0: bool,
    /// Read-Only copy of BUKT bit (used internally by MCP2515).
    #[skip(setters)]
    pub bukt1: bool,
    /// Rollover enable.
    pub bukt: bool,
    /// Received remote transfer request.
    #[skip(setters)]
    pub rxrtr: bool,
    #[skip]
    __: B1,
    /// Receive buffer operating mode.
    pub rxm: RecvBufOpMode,
    #[skip]
    __: B1,
}

#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rxb1Ctrl {
    /// Filter hit.
    #[skip(setters)]
    pub filhit: B3,
    /// Received remote transfer request.
    #[skip(setters)]
    pub rxrtr: bool,
    #[skip]
    __: B1,
    /// Received buffer operating mode.
    pub rxm: RecvBufOpMode,
    #[skip]
    __: B1,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum RecvBufOpMode {
    /// Receives all valid messages using either Standard or Extended
    /// Identifiers that meet filter criteria.
    FilterOn = 0x0,
    /// Turns masks/filters off; receives any message.
    FilterOff = 0x3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 3]
pub enum OpMode {
    Normal,
    Sleep,
    Loopback,
    ListenOnly,
    Configuration,
}

impl OpMode {
    /// Whether the receive/transmit pipeline can run in this mode.
    pub fn is_operational(self) -> bool {
        matches!(self, OpMode::Normal | OpMode::Loopback | OpMode::ListenOnly)
    }
}
