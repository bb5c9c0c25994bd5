//! Settings the board keeps across sessions
//!
//! Flash persistence and the HTTP configuration UI live outside this crate;
//! the controller only needs the accessors below.

use crate::BoardError;
use crate::command::LedMapPoint;
use crate::config::MAX_LEDS;
use crate::transport::TransportId;
use alloc::vec;
use alloc::vec::Vec;

pub trait ConfigStore {
    fn led_count(&self) -> usize;
    fn set_led_count(&mut self, count: usize) -> Result<(), BoardError>;

    fn transport_enabled(&self, id: TransportId) -> bool;
    fn set_transport_enabled(&mut self, id: TransportId, enabled: bool) -> Result<(), BoardError>;

    /// Stored screen position of LED `index`, if one was ever saved
    fn mapping(&self, index: usize) -> Option<LedMapPoint>;
    fn set_mapping(&mut self, index: usize, point: LedMapPoint) -> Result<(), BoardError>;
}

/// RAM-only store, used on boards without a settings partition and in tests
#[derive(Debug, Clone)]
pub struct MemoryConfigStore {
    led_count: usize,
    enabled: [bool; 3],
    mapping: Vec<Option<LedMapPoint>>,
}

impl MemoryConfigStore {
    /// All transports enabled, no mapping stored
    pub fn new(led_count: usize) -> Self {
        Self {
            led_count,
            enabled: [true; 3],
            mapping: vec![None; MAX_LEDS],
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LED_COUNT)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn led_count(&self) -> usize {
        self.led_count
    }

    fn set_led_count(&mut self, count: usize) -> Result<(), BoardError> {
        if !(1..=MAX_LEDS).contains(&count) {
            return Err(BoardError::ConfigError);
        }
        self.led_count = count;
        Ok(())
    }

    fn transport_enabled(&self, id: TransportId) -> bool {
        self.enabled[id.index()]
    }

    fn set_transport_enabled(&mut self, id: TransportId, enabled: bool) -> Result<(), BoardError> {
        self.enabled[id.index()] = enabled;
        Ok(())
    }

    fn mapping(&self, index: usize) -> Option<LedMapPoint> {
        self.mapping.get(index).copied().flatten()
    }

    fn set_mapping(&mut self, index: usize, point: LedMapPoint) -> Result<(), BoardError> {
        let slot = self.mapping.get_mut(index).ok_or(BoardError::ConfigError)?;
        *slot = Some(point);
        Ok(())
    }
}
