//! Device readers: producers that turn instrument output into [`Frame`]s.
pub mod frame;
#[cfg(feature = "instrument_serial")]
pub mod serial_reader;
pub mod simulated;

pub use frame::Frame;
#[cfg(feature = "instrument_serial")]
pub use serial_reader::{list_devices, SerialReader, SerialStart};
pub use simulated::{SimulatedReader, SimulatedStart};

/// Serial port names, or an error when serial support is compiled out.
#[cfg(not(feature = "instrument_serial"))]
pub fn list_devices() -> crate::error::AppResult<Vec<String>> {
    Err(crate::error::DaqError::SerialFeatureDisabled)
}
