use core::fmt::Debug;

use embedded_hal::can::{Error as CanError, ErrorKind};

use crate::{
    regs::OpMode,
    timing::{CanSpeed, McpSpeed, TimingError},
};

pub type Result<T, BUS> = core::result::Result<T, Error<BUS>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error<BUS: Debug> {
    /// The device was probed without platform data.
    MissingPlatformData,
    /// Oscillator frequency the requested bitrate cannot be derived from.
    InvalidOscillator(u32),
    /// No preset for this bus speed at this oscillator speed.
    InvalidConfiguration(CanSpeed, McpSpeed),
    /// No bit timing gets within 1% of the requested bitrate.
    UnreachableBitrate(u32),
    /// Explicit bit timing with a field out of range.
    InvalidBitTiming(TimingError),
    /// The pipeline cannot run in this mode.
    InvalidMode(OpMode),
    /// The interrupt line could not be requested.
    Irq,
    /// A transaction is still outstanding.
    Busy,
    /// Bus error.
    Bus(BUS),
}

impl<BUS: Debug> CanError for Error<BUS> {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}
