//! Bit timing.
//!
//! The MCP2515 derives its time quantum from half the oscillator frequency:
//! `TQ = 2 * BRP / Fosc`. A bit is one synchronisation quantum followed by the
//! propagation segment and both phase segments.

use crate::regs::{Cnf1, Cnf2, Cnf3};

const BRP_MAX: u32 = 64;
const SEG_MAX: u8 = 8;
const SJW_MAX: u8 = 4;

/// Quantum counts the calculator considers: `1 + tseg1 + tseg2` with
/// `tseg1` in [2, 16] and `tseg2` in [2, 8].
const QUANTA_MIN: u32 = 5;
const QUANTA_MAX: u32 = 25;

/// Speed the CAN bus is operating at.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanSpeed {
    Kbps5,
    Kbps10,
    Kbps20,
    Kbps31_25,
    Kbps33_3,
    Kbps40,
    Kbps50,
    Kbps80,
    Kbps100,
    Kbps125,
    Kbps200,
    Kbps250,
    Kbps500,
    Kbps1000,
}

/// Speed the MCP2515 is operating at. Should match the crystal frequency
/// onboard.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpSpeed {
    MHz8,
    MHz16,
}

impl McpSpeed {
    /// Preset oscillator matching `hz`, if there is one.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8_000_000 => Some(McpSpeed::MHz8),
            16_000_000 => Some(McpSpeed::MHz16),
            _ => None,
        }
    }
}

/// A register field out of its allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingError {
    /// Baud rate prescaler outside [1, 64].
    Prescaler(u8),
    /// Propagation segment outside [1, 8].
    PropSeg(u8),
    /// Phase segment 1 outside [1, 8].
    PhaseSeg1(u8),
    /// Phase segment 2 outside [1, 8].
    PhaseSeg2(u8),
    /// Synchronization jump width outside [1, 4].
    Sjw(u8),
}

/// Bit timing in time quanta, as written to `CNF1`..`CNF3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    /// Baud rate prescaler, 1..=64.
    pub brp: u8,
    /// Propagation segment, 1..=8.
    pub prop_seg: u8,
    /// Phase segment 1, 1..=8.
    pub phase_seg1: u8,
    /// Phase segment 2, 1..=8.
    pub phase_seg2: u8,
    /// Synchronization jump width, 1..=4.
    pub sjw: u8,
    /// Sample the bus three times at the sample point.
    pub triple_sample: bool,
}

impl BitTiming {
    pub fn validate(&self) -> Result<(), TimingError> {
        if !(1..=BRP_MAX as u8).contains(&self.brp) {
            return Err(TimingError::Prescaler(self.brp));
        }
        if !(1..=SEG_MAX).contains(&self.prop_seg) {
            return Err(TimingError::PropSeg(self.prop_seg));
        }
        if !(1..=SEG_MAX).contains(&self.phase_seg1) {
            return Err(TimingError::PhaseSeg1(self.phase_seg1));
        }
        if !(1..=SEG_MAX).contains(&self.phase_seg2) {
            return Err(TimingError::PhaseSeg2(self.phase_seg2));
        }
        if !(1..=SJW_MAX).contains(&self.sjw) {
            return Err(TimingError::Sjw(self.sjw));
        }
        Ok(())
    }

    /// Time quanta per bit.
    #[inline]
    pub fn quanta(&self) -> u32 {
        1 + self.prop_seg as u32 + self.phase_seg1 as u32 + self.phase_seg2 as u32
    }

    /// Bitrate produced with a CAN clock of `clock_hz` (half the oscillator).
    pub fn bitrate(&self, clock_hz: u32) -> u32 {
        clock_hz / (self.brp as u32 * self.quanta())
    }

    /// Sample point in tenths of a percent.
    pub fn sample_point(&self) -> u32 {
        (1 + self.prop_seg as u32 + self.phase_seg1 as u32) * 1000 / self.quanta()
    }

    /// Encodes the timing into `CNF1`, `CNF2` and `CNF3`. Call
    /// [`validate`](Self::validate) first; out-of-range fields are truncated.
    pub fn registers(&self) -> (Cnf1, Cnf2, Cnf3) {
        let cnf1 = Cnf1::new()
            .with_brp(self.brp.wrapping_sub(1) & 0x3F)
            .with_sjw(self.sjw.wrapping_sub(1) & 0x3);
        let cnf2 = Cnf2::new()
            .with_prseg(self.prop_seg.wrapping_sub(1) & 0x7)
            .with_phseg1(self.phase_seg1.wrapping_sub(1) & 0x7)
            .with_sam(self.triple_sample)
            .with_btlmode(true);
        let cnf3 = Cnf3::new().with_phseg2(self.phase_seg2.wrapping_sub(1) & 0x7);
        (cnf1, cnf2, cnf3)
    }

    pub fn from_registers(cnf1: Cnf1, cnf2: Cnf2, cnf3: Cnf3) -> Self {
        Self {
            brp: cnf1.brp() + 1,
            prop_seg: cnf2.prseg() + 1,
            phase_seg1: cnf2.phseg1() + 1,
            phase_seg2: cnf3.phseg2() + 1,
            sjw: cnf1.sjw() + 1,
            triple_sample: cnf2.sam(),
        }
    }

    /// Derives a timing for `bitrate` from a CAN clock of `clock_hz`.
    ///
    /// Prefers the largest quantum count that hits the bitrate exactly and
    /// places the sample point at 87.5% (80% above 500 kbit/s, 75% above
    /// 800 kbit/s). Returns `None` if no prescaler gets within 1%.
    pub fn calculate(clock_hz: u32, bitrate: u32) -> Option<Self> {
        if clock_hz == 0 || bitrate == 0 {
            return None;
        }
        let sample_point = if bitrate > 800_000 {
            750
        } else if bitrate > 500_000 {
            800
        } else {
            875
        };

        let mut best: Option<(u32, u32, u32)> = None;
        for quanta in (QUANTA_MIN..=QUANTA_MAX).rev() {
            let per_bit = quanta as u64 * bitrate as u64;
            let brp = ((clock_hz as u64 + per_bit / 2) / per_bit) as u32;
            if !(1..=BRP_MAX).contains(&brp) {
                continue;
            }
            let error = (clock_hz / (brp * quanta)).abs_diff(bitrate);
            if best.map_or(true, |(best_error, ..)| error < best_error) {
                best = Some((error, quanta, brp));
                if error == 0 {
                    break;
                }
            }
        }

        let (error, quanta, brp) = best?;
        if error as u64 * 100 > bitrate as u64 {
            return None;
        }

        let mut tseg2 = (quanta - (quanta * sample_point + 500) / 1000).clamp(2, SEG_MAX as u32);
        let mut tseg1 = quanta - 1 - tseg2;
        if tseg1 > 2 * SEG_MAX as u32 {
            tseg1 = 2 * SEG_MAX as u32;
            tseg2 = quanta - 1 - tseg1;
        }
        let mut prop_seg = (tseg1 / 2).clamp(1, SEG_MAX as u32);
        let mut phase_seg1 = tseg1 - prop_seg;
        if phase_seg1 > SEG_MAX as u32 {
            phase_seg1 = SEG_MAX as u32;
            prop_seg = tseg1 - phase_seg1;
        }

        Some(Self {
            brp: brp as u8,
            prop_seg: prop_seg as u8,
            phase_seg1: phase_seg1 as u8,
            phase_seg2: tseg2 as u8,
            sjw: 1,
            triple_sample: false,
        })
    }

    /// Timing from the well-known register table for 8 MHz and 16 MHz
    /// oscillators.
    pub fn preset(mcp_speed: McpSpeed, can_speed: CanSpeed) -> Option<Self> {
        // Sourced from https://github.com/coryjfowler/MCP_CAN_lib/blob/master/mcp_can_dfs.h#L251-L363
        let (cfg1, cfg2, cfg3): (u8, u8, u8) = match (mcp_speed, can_speed) {
            (McpSpeed::MHz8, CanSpeed::Kbps5) => (0xA7, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps10) => (0x93, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps20) => (0x89, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps31_25) => (0x87, 0xE5, 0x83),
            (McpSpeed::MHz8, CanSpeed::Kbps33_3) => (0x85, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps40) => (0x84, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps50) => (0x84, 0xE5, 0x83),
            (McpSpeed::MHz8, CanSpeed::Kbps80) => (0x84, 0xD3, 0x81),
            (McpSpeed::MHz8, CanSpeed::Kbps100) => (0x81, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps125) => (0x81, 0xE5, 0x83),
            (McpSpeed::MHz8, CanSpeed::Kbps200) => (0x80, 0xF6, 0x84),
            (McpSpeed::MHz8, CanSpeed::Kbps250) => (0x80, 0xE5, 0x83),
            (McpSpeed::MHz8, CanSpeed::Kbps500) => (0x00, 0xD1, 0x81),
            (McpSpeed::MHz8, CanSpeed::Kbps1000) => (0x00, 0xC0, 0x80),
            (McpSpeed::MHz16, CanSpeed::Kbps5) => (0x3F, 0xFF, 0x87),
            (McpSpeed::MHz16, CanSpeed::Kbps10) => (0x67, 0xF6, 0x84),
            (McpSpeed::MHz16, CanSpeed::Kbps20) => (0x53, 0xF6, 0x74),
            (McpSpeed::MHz16, CanSpeed::Kbps33_3) => (0x4E, 0xE5, 0x83),
            (McpSpeed::MHz16, CanSpeed::Kbps40) => (0x49, 0xF6, 0x84),
            (McpSpeed::MHz16, CanSpeed::Kbps50) => (0x47, 0xF6, 0x84),
            (McpSpeed::MHz16, CanSpeed::Kbps80) => (0x44, 0xF6, 0x84),
            (McpSpeed::MHz16, CanSpeed::Kbps100) => (0x44, 0xE5, 0x83),
            (McpSpeed::MHz16, CanSpeed::Kbps125) => (0x43, 0xE5, 0x83),
            (McpSpeed::MHz16, CanSpeed::Kbps200) => (0x41, 0xF6, 0x84),
            (McpSpeed::MHz16, CanSpeed::Kbps250) => (0x41, 0xE5, 0x83),
            (McpSpeed::MHz16, CanSpeed::Kbps500) => (0x40, 0xE5, 0x83),
            (McpSpeed::MHz16, CanSpeed::Kbps1000) => (0x00, 0xCA, 0x81),
            _ => return None,
        };
        Some(Self::from_registers(
            Cnf1::from_bytes([cfg1]),
            Cnf2::from_bytes([cfg2]),
            Cnf3::from_bytes([cfg3]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculates_125k_from_8mhz_oscillator() {
        let timing = BitTiming::calculate(4_000_000, 125_000).unwrap();
        assert_eq!(
            timing,
            BitTiming {
                brp: 2,
                prop_seg: 6,
                phase_seg1: 7,
                phase_seg2: 2,
                sjw: 1,
                triple_sample: false,
            }
        );
        assert_eq!(timing.sample_point(), 875);

        let (cnf1, cnf2, cnf3) = timing.registers();
        assert_eq!(
            [cnf1.into_bytes()[0], cnf2.into_bytes()[0], cnf3.into_bytes()[0]],
            [0x01, 0xB5, 0x01]
        );
    }

    #[test]
    fn calculated_timings_hit_requested_rate() {
        for (clock, rate) in [
            (8_000_000, 1_000_000),
            (8_000_000, 500_000),
            (8_000_000, 250_000),
            (4_000_000, 50_000),
            (10_000_000, 20_000),
        ] {
            let timing = BitTiming::calculate(clock, rate).unwrap();
            assert_eq!(timing.validate(), Ok(()));
            assert_eq!(timing.bitrate(clock), rate);
            assert!(timing.phase_seg2 >= 2);
        }
    }

    #[test]
    fn unreachable_rates_are_rejected() {
        assert!(BitTiming::calculate(4_000_000, 2_000_000).is_none());
        assert!(BitTiming::calculate(4_000_000, 0).is_none());
        assert!(BitTiming::calculate(16_000_000, 1_000).is_none());
    }

    #[test]
    fn validate_reports_first_bad_field() {
        let mut timing = BitTiming::calculate(8_000_000, 500_000).unwrap();
        timing.sjw = 5;
        assert_eq!(timing.validate(), Err(TimingError::Sjw(5)));
        timing.brp = 0;
        assert_eq!(timing.validate(), Err(TimingError::Prescaler(0)));
    }

    #[test]
    fn presets_decode_to_their_rate() {
        let timing = BitTiming::preset(McpSpeed::MHz16, CanSpeed::Kbps500).unwrap();
        assert_eq!(timing.bitrate(8_000_000), 500_000);
        assert!(timing.triple_sample);

        let timing = BitTiming::preset(McpSpeed::MHz8, CanSpeed::Kbps125).unwrap();
        assert_eq!(timing.bitrate(4_000_000), 125_000);

        assert!(BitTiming::preset(McpSpeed::MHz16, CanSpeed::Kbps31_25).is_none());
    }
}
