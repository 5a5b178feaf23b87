//! Interface statistics.

/// Counters maintained by the pipeline. All counters wrap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Frames read from a receive buffer and handed to the interface.
    pub rx_packets: u32,
    /// Payload bytes of `rx_packets`.
    pub rx_bytes: u32,
    /// Frames read but refused by the interface.
    pub rx_dropped: u32,
    /// Receive overflow events reported by the controller.
    pub rx_over_errors: u32,
    /// Frames whose transmission the controller confirmed.
    pub tx_packets: u32,
    /// Payload bytes of `tx_packets`.
    pub tx_bytes: u32,
    /// Transactions the bus refused to start.
    pub bus_errors: u32,
}

impl Stats {
    pub(crate) fn record_rx(&mut self, len: usize) {
        self.rx_packets = self.rx_packets.wrapping_add(1);
        self.rx_bytes = self.rx_bytes.wrapping_add(len as u32);
    }

    pub(crate) fn record_tx(&mut self, len: usize) {
        self.tx_packets = self.tx_packets.wrapping_add(1);
        self.tx_bytes = self.tx_bytes.wrapping_add(len as u32);
    }
}
