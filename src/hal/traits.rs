// src/hal/traits.rs
//! Core HAL traits for pump network and switch sensor abstraction

use crate::hal::types::{ChannelAddr, PumpStatus, PurgeDirection, RateUnit, VolumeUnit};
use crate::hal::HalError;

/// Channel-addressed syringe pump network sharing one serial link
///
/// Commands are fire-and-forget: a returned `Ok` means the command was
/// accepted by the link, not that the pump finished moving. Progress is
/// observed out-of-band through [`PumpNetwork::status`].
pub trait PumpNetwork: Send {
    /// Set the pumping rate of one channel
    fn set_rate(&mut self, addr: ChannelAddr, value: f64, unit: RateUnit) -> Result<(), HalError>;

    /// Set the volume to dispense on the next run
    fn set_volume(&mut self, addr: ChannelAddr, value: f64, unit: VolumeUnit) -> Result<(), HalError>;

    /// Start the programmed run
    fn run(&mut self, addr: ChannelAddr) -> Result<(), HalError>;

    /// Stop one channel
    fn stop(&mut self, addr: ChannelAddr) -> Result<(), HalError>;

    /// Move the carriage continuously until stopped
    fn purge(&mut self, addr: ChannelAddr, direction: PurgeDirection) -> Result<(), HalError>;

    /// Configure the loaded syringe's inner diameter
    fn set_diameter(&mut self, addr: ChannelAddr, diameter_mm: f64) -> Result<(), HalError>;

    /// Query the run state of one channel
    fn status(&mut self, addr: ChannelAddr) -> Result<PumpStatus, HalError>;

    /// Sound the buzzer of one pump
    fn buzz(&mut self, addr: ChannelAddr, repetitions: u32) -> Result<(), HalError>;

    /// Stop every listed channel
    fn stop_all(&mut self, addrs: &[ChannelAddr]) -> Result<(), HalError> {
        let mut first_error = None;
        for addr in addrs {
            if let Err(err) = self.stop(*addr) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Polled boolean-per-switch snapshot source
pub trait SwitchSensor: Send {
    /// Refresh the snapshot; must be called before reading
    fn refresh(&mut self) -> Result<(), HalError>;

    /// Read one named switch from the last snapshot
    fn is_active(&self, switch: &str) -> Result<bool, HalError>;
}
