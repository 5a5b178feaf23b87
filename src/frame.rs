//! Classic CAN frame.

use embedded_hal::can::{Frame, Id};

/// Largest payload of a classic CAN frame.
pub const MAX_DLC: usize = 8;

/// A CAN 2.0 frame, either a data frame or a remote transmission request.
///
/// Unused payload bytes are kept zeroed so frames compare by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: Id,
    rtr: bool,
    dlc: u8,
    data: [u8; MAX_DLC],
}

impl CanFrame {
    /// Builds a data frame. Returns `None` when `data` is longer than eight
    /// bytes.
    pub fn data_frame(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }
        let mut buf = [0u8; MAX_DLC];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            rtr: false,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    /// Builds a remote frame requesting `dlc` bytes.
    pub fn remote_frame(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }
        Some(Self {
            id: id.into(),
            rtr: true,
            dlc: dlc as u8,
            data: [0; MAX_DLC],
        })
    }

    /// Assembles a frame from decoded register contents. `dlc` is clamped to
    /// eight and the payload is ignored for remote frames.
    pub(crate) fn from_raw(id: Id, rtr: bool, dlc: usize, payload: &[u8]) -> Self {
        let dlc = dlc.min(MAX_DLC);
        let mut data = [0u8; MAX_DLC];
        if !rtr {
            let n = dlc.min(payload.len());
            data[..n].copy_from_slice(&payload[..n]);
        }
        Self {
            id,
            rtr,
            dlc: dlc as u8,
            data,
        }
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::data_frame(id, data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        Self::remote_frame(id, dlc)
    }

    #[inline]
    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    #[inline]
    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    #[inline]
    fn id(&self) -> Id {
        self.id
    }

    #[inline]
    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    /// Payload of a data frame. Remote frames carry no payload.
    #[inline]
    fn data(&self) -> &[u8] {
        if self.rtr {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }
}
