//! Serial peripheral adapters for the two buses.
//!
//! ## Dual-target design
//!
//! On ESP-IDF the shared multi-drop bus (bus A) and the secondary link
//! (bus B) are UART controllers.  ESP-IDF surfaces byte completion
//! through the driver's event path rather than a raw ISR, so the main
//! loop pumps received bytes out of the driver FIFO and feeds them to
//! `CommandQueue::on_byte_complete` — same software contract, different
//! delivery mechanism.
//!
//! On host/test targets the adapter is a loopback stub that never
//! receives; tests exercise the queue with their own mock ports.

use crate::transport::SerialPort;

/// UART controller numbers for the two buses.
pub const BUS_A_UART: u8 = 1;
pub const BUS_B_UART: u8 = 2;

#[cfg(target_os = "espidf")]
mod esp_impl {
    use super::SerialPort;
    use esp_idf_svc::sys::*;
    use log::info;

    /// One UART-backed bus port.
    pub struct BusUart {
        port: uart_port_t,
    }

    impl BusUart {
        /// Install the UART driver and configure framing.  9-bit
        /// address framing and RS-485 direction control belong to the
        /// excluded electrical layer; this adapter only moves bytes.
        pub fn new(uart_num: u8, baud: u32) -> Result<Self, EspError> {
            let port = uart_num as uart_port_t;
            let config = uart_config_t {
                baud_rate: baud as i32,
                data_bits: uart_word_length_t_UART_DATA_8_BITS,
                parity: uart_parity_t_UART_PARITY_DISABLE,
                stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
                flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
                ..Default::default()
            };
            // SAFETY: standard ESP-IDF UART bring-up sequence; `config`
            // outlives the call and the driver copies it.
            esp!(unsafe { uart_param_config(port, &config) })?;
            esp!(unsafe { uart_driver_install(port, 256, 256, 0, core::ptr::null_mut(), 0) })?;
            info!("bus_uart: UART{} up at {} baud", uart_num, baud);
            Ok(Self { port })
        }

        /// Pop one received byte from the driver FIFO, non-blocking.
        pub fn poll_rx(&mut self) -> Option<u8> {
            let mut byte = 0u8;
            // SAFETY: single-byte read into a stack buffer, zero timeout.
            let n = unsafe { uart_read_bytes(self.port, (&raw mut byte).cast(), 1, 0) };
            (n == 1).then_some(byte)
        }
    }

    impl SerialPort for BusUart {
        fn load_tx(&mut self, byte: u8) {
            // SAFETY: single-byte write from a stack buffer; the driver
            // copies it into its ring before returning.
            unsafe {
                uart_write_bytes(self.port, (&raw const byte).cast(), 1);
            }
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp_impl::BusUart;

#[cfg(not(target_os = "espidf"))]
pub struct BusUart;

#[cfg(not(target_os = "espidf"))]
impl BusUart {
    pub fn new(uart_num: u8, baud: u32) -> Result<Self, core::convert::Infallible> {
        log::info!("bus_uart(sim): UART{} at {} baud (loopback stub)", uart_num, baud);
        Ok(Self)
    }

    pub fn poll_rx(&mut self) -> Option<u8> {
        None
    }
}

#[cfg(not(target_os = "espidf"))]
impl SerialPort for BusUart {
    fn load_tx(&mut self, _byte: u8) {}
}
