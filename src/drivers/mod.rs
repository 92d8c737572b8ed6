//! Hardware tick source and serial peripheral adapters.

pub mod bus_uart;
pub mod hw_tick;
