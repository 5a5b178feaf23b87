//! SPI instruction set and request builders.
//!
//! Every builder writes one complete request into the start of `buf` and
//! returns the number of bytes the transaction must clock. Response slots are
//! zeroed. The builders panic if `buf` is too short for the request.

use crate::{
    buffer::{self, RxBuf, RX_READ_LEN},
    frame::CanFrame,
    regs::Register,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Write = 0x2,
    Read = 0x3,
    Bitmod = 0x5,
    LoadTX0 = 0x40,
    RTSTX0 = 0x81,
    ReadRX0 = 0x90,
    ReadRX1 = 0x94,
    Reset = 0xC0,
}

/// RESET: puts every register back to its default and enters configuration
/// mode.
pub fn reset(buf: &mut [u8]) -> usize {
    buf[0] = Instruction::Reset as u8;
    1
}

/// WRITE `data` to sequential registers starting at `reg`.
pub fn write(buf: &mut [u8], reg: Register, data: &[u8]) -> usize {
    buf[0] = Instruction::Write as u8;
    buf[1] = reg as u8;
    buf[2..2 + data.len()].copy_from_slice(data);
    2 + data.len()
}

/// READ `count` sequential registers starting at `reg`. The values arrive in
/// the response from offset 2.
pub fn read(buf: &mut [u8], reg: Register, count: usize) -> usize {
    buf[0] = Instruction::Read as u8;
    buf[1] = reg as u8;
    buf[2..2 + count].fill(0);
    2 + count
}

/// BIT MODIFY `reg`: bits set in `mask` take their value from `value`.
pub fn bit_modify(buf: &mut [u8], reg: Register, mask: u8, value: u8) -> usize {
    buf[0] = Instruction::Bitmod as u8;
    buf[1] = reg as u8;
    buf[2] = mask;
    buf[3] = value;
    4
}

/// READ RX BUFFER: identifier block, length and all eight data registers.
/// Reading clears the buffer's receive interrupt flag.
pub fn read_rx_buffer(buf: &mut [u8], rx: RxBuf) -> usize {
    buf[..RX_READ_LEN].fill(0);
    buf[0] = rx.read_instruction() as u8;
    RX_READ_LEN
}

/// LOAD TX BUFFER 0 with `frame`.
#[inline]
pub fn load_tx0(buf: &mut [u8], frame: &CanFrame) -> usize {
    buffer::encode_transmit(frame, buf)
}

/// REQUEST TO SEND for transmit buffer 0.
pub fn rts_tx0(buf: &mut [u8]) -> usize {
    buf[0] = Instruction::RTSTX0 as u8;
    1
}
