//! Network-side collaborators.

use core::fmt::Debug;

use crate::frame::CanFrame;

/// The interface refused a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropped;

/// The CAN network interface the controller is attached to.
///
/// Methods are called outside the device's critical section, possibly from
/// the bus's completion context.
pub trait NetInterface {
    /// Hands a received frame to the network stack.
    fn deliver(&self, frame: CanFrame) -> Result<(), Dropped>;

    /// The controller confirmed that `frame` went out on the bus. Called right
    /// before the queue is woken.
    fn echo(&self, _frame: &CanFrame) {}

    /// No more frames may be handed to [`MCP2515::transmit`](crate::MCP2515::transmit).
    fn stop_queue(&self);

    /// Frames may be handed to [`MCP2515::transmit`](crate::MCP2515::transmit)
    /// again.
    fn wake_queue(&self);
}

/// The controller's interrupt line.
pub trait InterruptLine {
    type Error: Debug;

    /// Registers the handler that calls
    /// [`MCP2515::interrupt`](crate::MCP2515::interrupt).
    fn request(&mut self) -> Result<(), Self::Error>;

    fn free(&mut self);
}
