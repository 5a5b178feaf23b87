//! Bus transports.

use core::{cell::RefCell, fmt::Debug};

use critical_section::Mutex;
use embedded_hal::{
    blocking::spi::{Transfer, Write},
    digital::v2::OutputPin,
};

use crate::transaction::Transaction;

/// The control bus between the host and the controller.
pub trait Transport {
    type Error: Debug;

    /// Starts `xfer` and returns without waiting for it.
    ///
    /// Once the exchange is done, the transaction has to be handed back to
    /// [`MCP2515::complete`](crate::MCP2515::complete). That call must not
    /// happen from inside `submit` itself. If the exchange cannot be started,
    /// the transaction is returned along with the error and no completion
    /// follows.
    fn submit(&self, xfer: Transaction) -> Result<(), (Self::Error, Transaction)>;

    /// Sends `bytes` and blocks until they are out. Only used while the
    /// pipeline is not running.
    fn write(&self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Errors of [`BlockingSpi`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpiError<SPI, PIN> {
    /// SPI error.
    Spi(SPI),
    /// Chip select error.
    Pin(PIN),
}

struct Bus<SPI, CS> {
    spi: SPI,
    cs: CS,
}

/// [`Transport`] over a blocking SPI bus and a chip select pin.
///
/// `submit` performs the whole exchange before it returns and parks the
/// finished transaction, which [`take_completed`](Self::take_completed) hands
/// out. The bus is used inside a critical section.
pub struct BlockingSpi<SPI, CS> {
    bus: Mutex<RefCell<Bus<SPI, CS>>>,
    completed: Mutex<RefCell<Option<Transaction>>>,
}

impl<SPI, CS> BlockingSpi<SPI, CS> {
    /// The last exchange that finished, if it has not been taken yet.
    pub fn take_completed(&self) -> Option<Transaction> {
        critical_section::with(|token| self.completed.borrow_ref_mut(token).take())
    }

    /// Gives back the SPI bus and the chip select pin.
    pub fn free(self) -> (SPI, CS) {
        let Bus { spi, cs } = self.bus.into_inner().into_inner();
        (spi, cs)
    }
}

impl<SPI, CS, SPIE, CSE> BlockingSpi<SPI, CS>
where
    SPI: Transfer<u8, Error = SPIE> + Write<u8, Error = SPIE>,
    CS: OutputPin<Error = CSE>,
    SPIE: Debug,
    CSE: Debug,
{
    /// The SPI bus must be configured for mode 0, MSB first, at no more than
    /// 10 MHz.
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, SpiError<SPIE, CSE>> {
        cs.set_high().map_err(SpiError::Pin)?;
        Ok(Self {
            bus: Mutex::new(RefCell::new(Bus { spi, cs })),
            completed: Mutex::new(RefCell::new(None)),
        })
    }

    /// Calls `f` with the chip select pin held low.
    fn with_cs<T>(
        &self,
        f: impl FnOnce(&mut SPI) -> Result<T, SPIE>,
    ) -> Result<T, SpiError<SPIE, CSE>> {
        critical_section::with(|token| {
            let mut bus = self.bus.borrow_ref_mut(token);
            let Bus { spi, cs } = &mut *bus;
            cs.set_low().map_err(SpiError::Pin)?;
            let result = f(spi).map_err(SpiError::Spi);
            cs.set_high().map_err(SpiError::Pin)?;
            result
        })
    }
}

impl<SPI, CS, SPIE, CSE> Transport for BlockingSpi<SPI, CS>
where
    SPI: Transfer<u8, Error = SPIE> + Write<u8, Error = SPIE>,
    CS: OutputPin<Error = CSE>,
    SPIE: Debug,
    CSE: Debug,
{
    type Error = SpiError<SPIE, CSE>;

    fn submit(&self, mut xfer: Transaction) -> Result<(), (Self::Error, Transaction)> {
        match self.with_cs(|spi| spi.transfer(xfer.in_place()).map(drop)) {
            Ok(()) => {
                critical_section::with(|token| {
                    *self.completed.borrow_ref_mut(token) = Some(xfer);
                });
                Ok(())
            }
            Err(e) => Err((e, xfer)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.with_cs(|spi| spi.write(bytes))
    }
}
