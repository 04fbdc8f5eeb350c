//! Operator console on USART1, Daisy Seed pins D13 (TX) and D14 (RX).
use core::fmt;

use log::debug;
use stm32h7xx_hal::{nb, prelude::*, serial::Serial, stm32::USART1};

use crate::console::Terminal;

/// Polled serial link, 8N1. Writes block until the bytes are in the data
/// register.
pub struct Uart {
    serial: Serial<USART1>,
}

impl Uart {
    pub fn new(serial: Serial<USART1>) -> Self {
        Uart { serial }
    }
}

impl fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        fmt::Write::write_str(&mut self.serial, s)
    }
}

impl Terminal for Uart {
    fn read_byte(&mut self) -> Option<u8> {
        match self.serial.read() {
            Ok(byte) => Some(byte),
            Err(nb::Error::WouldBlock) => None,
            Err(nb::Error::Other(err)) => {
                // the flag is cleared; the next byte is still good
                debug!("console rx {:?}", err);
                None
            }
        }
    }
}
