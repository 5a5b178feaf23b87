//! The per-device transaction slot.

use core::fmt;

use crate::{
    buffer::{self, RX_READ_LEN},
    frame::CanFrame,
    machine::Step,
};

/// Largest request: instruction, identifier block, length and eight data
/// bytes.
pub const TRANSACTION_LEN: usize = RX_READ_LEN;

/// Transfer buffer, aligned and padded for DMA-capable transports.
#[repr(C, align(8))]
#[derive(Clone, Copy)]
struct DmaBuf([u8; 16]);

/// One request/response exchange with the controller.
///
/// A device owns exactly one `Transaction`. It is moved into the
/// [`Transport`](crate::transport::Transport) on submission and comes back
/// through [`MCP2515::complete`](crate::MCP2515::complete), so a second
/// outstanding exchange for the same device cannot be expressed. The buffers
/// are reused for the device's whole lifetime.
pub struct Transaction {
    tx: DmaBuf,
    rx: DmaBuf,
    len: usize,
    step: Step,
}

impl Transaction {
    pub(crate) const fn new() -> Self {
        Self {
            tx: DmaBuf([0; 16]),
            rx: DmaBuf([0; 16]),
            len: 0,
            step: Step::ReadFlags,
        }
    }

    /// The pipeline step this exchange performs. Its completion resumes the
    /// state machine from here.
    #[inline]
    pub fn step(&self) -> Step {
        self.step
    }

    /// Bytes to clock in each direction.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes to send.
    #[inline]
    pub fn request(&self) -> &[u8] {
        &self.tx.0[..self.len]
    }

    /// Bytes received so far.
    #[inline]
    pub fn response(&self) -> &[u8] {
        &self.rx.0[..self.len]
    }

    /// Buffer the transport fills with the controller's response.
    #[inline]
    pub fn response_mut(&mut self) -> &mut [u8] {
        &mut self.rx.0[..self.len]
    }

    /// Request and response buffers for full-duplex transfers.
    #[inline]
    pub fn buffers(&mut self) -> (&[u8], &mut [u8]) {
        (&self.tx.0[..self.len], &mut self.rx.0[..self.len])
    }

    /// Copies the request into the response buffer and returns it, for
    /// transports that exchange bytes in place.
    pub fn in_place(&mut self) -> &mut [u8] {
        self.rx.0[..self.len].copy_from_slice(&self.tx.0[..self.len]);
        &mut self.rx.0[..self.len]
    }

    /// Writes a new request for `step` through `build`, which returns the
    /// request length.
    pub(crate) fn prepare(&mut self, step: Step, build: impl FnOnce(&mut [u8]) -> usize) {
        self.rx.0 = [0; 16];
        self.len = build(&mut self.tx.0[..TRANSACTION_LEN]).min(TRANSACTION_LEN);
        self.step = step;
    }

    /// Decodes a READ RX BUFFER response.
    pub(crate) fn received_frame(&self) -> CanFrame {
        let mut block = [0u8; RX_READ_LEN];
        block.copy_from_slice(&self.rx.0[..RX_READ_LEN]);
        buffer::decode_receive(&block)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("step", &self.step)
            .field("request", &self.request())
            .field("response", &self.response())
            .finish()
    }
}
