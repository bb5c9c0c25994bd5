//! Interactive LED-to-screen mapping
//!
//! While calibrating, the host walks through the strip one LED at a time.
//! The selected LED blinks in the marker color so the operator can click its
//! position on screen; the collected positions come back as `save_map`.

use crate::BoardError;
use crate::command::LedMapPoint;
use crate::config::BLINK_INTERVAL;
use crate::config_store::ConfigStore;
use crate::led_control::{LedController, MARKER_COLOR};
use embassy_time::Instant;
use smart_leds::{RGB8, SmartLedsWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationState {
    Inactive,
    Active {
        highlight: Option<usize>,
        blink_on: bool,
        last_blink: Instant,
    },
}

pub struct CalibrationController {
    state: CalibrationState,
    suspended_at: Option<Instant>,
}

impl CalibrationController {
    pub const fn new() -> Self {
        Self {
            state: CalibrationState::Inactive,
            suspended_at: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, CalibrationState::Active { .. })
    }

    pub fn highlight_index(&self) -> Option<usize> {
        match self.state {
            CalibrationState::Active { highlight, .. } => highlight,
            CalibrationState::Inactive => None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        log!("[CAL] Calibration started");
        if self.suspended_at.is_some() {
            // Started during an animation: the blink period begins now
            self.suspended_at = Some(now);
        }
        self.state = CalibrationState::Active {
            highlight: None,
            blink_on: false,
            last_blink: now,
        };
    }

    pub fn end(&mut self) {
        if self.is_active() {
            log!("[CAL] Calibration ended");
        }
        self.state = CalibrationState::Inactive;
    }

    /// Select the LED to blink. Indices outside `0..led_count` clear the
    /// selection. The LED lights up immediately and the blink period restarts.
    pub fn highlight(&mut self, index: i32, led_count: usize, now: Instant) {
        let CalibrationState::Active { .. } = self.state else {
            log!("[CAL] Ignoring highlight {} outside calibration", index);
            return;
        };

        let selected = usize::try_from(index).ok().filter(|&i| i < led_count);
        if self.suspended_at.is_some() {
            self.suspended_at = Some(now);
        }
        self.state = CalibrationState::Active {
            highlight: selected,
            blink_on: true,
            last_blink: now,
        };
    }

    /// Advance the blink timer; true when the phase flipped and the strip
    /// needs a redraw.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.suspended_at.is_some() {
            return false;
        }
        let CalibrationState::Active {
            highlight,
            blink_on,
            last_blink,
        } = self.state
        else {
            return false;
        };

        if now.saturating_duration_since(last_blink) < BLINK_INTERVAL {
            return false;
        }
        self.state = CalibrationState::Active {
            highlight,
            blink_on: !blink_on,
            last_blink: now,
        };
        true
    }

    /// Draw the calibration view into the output buffer (without flushing)
    pub fn render<S>(&self, led: &mut LedController<S>)
    where
        S: SmartLedsWrite<Color = RGB8>,
    {
        led.clear();
        if let CalibrationState::Active {
            highlight: Some(index),
            blink_on: true,
            ..
        } = self.state
        {
            led.set(index, MARKER_COLOR);
        }
    }

    /// Drop a highlight that no longer fits the strip
    pub fn clamp_to(&mut self, led_count: usize) {
        if let CalibrationState::Active { highlight, .. } = &mut self.state {
            if highlight.is_some_and(|index| index >= led_count) {
                *highlight = None;
            }
        }
    }

    /// Persist the captured mapping. Points past `led_count` are ignored and
    /// LEDs the host did not send keep their stored position.
    pub fn save_map<C: ConfigStore>(
        &self,
        points: &[LedMapPoint],
        led_count: usize,
        store: &mut C,
    ) -> Result<usize, BoardError> {
        let count = points.len().min(led_count);
        for (index, point) in points.iter().take(count).enumerate() {
            store.set_mapping(index, *point)?;
        }
        log!("[CAL] Stored mapping for {} LEDs", count);
        Ok(count)
    }

    /// Freeze the blink timer while an animation owns the strip
    pub fn suspend(&mut self, now: Instant) {
        if self.suspended_at.is_none() {
            self.suspended_at = Some(now);
        }
    }

    /// Resume blinking where it left off
    pub fn resume(&mut self, now: Instant) {
        let Some(since) = self.suspended_at.take() else {
            return;
        };
        if let CalibrationState::Active { last_blink, .. } = &mut self.state {
            *last_blink = *last_blink + now.saturating_duration_since(since);
        }
    }
}

impl Default for CalibrationController {
    fn default() -> Self {
        Self::new()
    }
}
