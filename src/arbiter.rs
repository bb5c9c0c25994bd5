//! Transport arbitration
//!
//! Every transport gets its own decoder session. Whichever transport yields a
//! valid frame becomes the active source and its colors go straight to the
//! strip (last write wins, no priorities). Frames decoded in the same tick
//! are applied in registration order because the sessions are serviced in
//! that order.

use crate::device::DeviceState;
use crate::frame_decoder::{ColorFrame, DecodeEvent, DecoderStats, FrameDecoder};
use crate::led_control::LedController;
use crate::state_machine::Action;
use crate::transport::{Framing, TransportId, TransportLink};
use alloc::vec::Vec;
use embassy_time::Instant;
use smart_leds::{RGB8, SmartLedsWrite};

/// Upper bound of link reads per transport and tick, keeps one chatty
/// transport from starving the others
pub const MAX_POLLS_PER_TICK: usize = 8;

/// Decoder state owned on behalf of one transport
pub struct TransportSession {
    id: TransportId,
    decoder: FrameDecoder,
}

impl TransportSession {
    fn new(id: TransportId) -> Self {
        Self {
            id,
            decoder: FrameDecoder::new(id),
        }
    }

    pub fn id(&self) -> TransportId {
        self.id
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }
}

/// What happened to a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Written to the strip
    Applied,
    /// Decoded but discarded because calibration or an animation owns the
    /// output
    Suppressed,
}

pub struct TransportArbiter {
    sessions: [TransportSession; 3],
}

impl TransportArbiter {
    pub fn new() -> Self {
        Self {
            sessions: TransportId::ALL.map(TransportSession::new),
        }
    }

    pub fn session(&self, id: TransportId) -> &TransportSession {
        &self.sessions[id.index()]
    }

    /// Sessions in registration order
    pub fn sessions(&self) -> impl Iterator<Item = &TransportSession> {
        self.sessions.iter()
    }

    /// Enable or disable a transport. Either way the session starts over, so
    /// a frame cut off by disabling can never complete later.
    pub fn set_enabled(&mut self, id: TransportId, enabled: bool, state: &mut DeviceState) {
        let was_enabled = state.transport_enabled(id);
        state.enabled[id.index()] = enabled;
        self.sessions[id.index()].reset();
        if was_enabled && !enabled && state.active_source == Some(id) {
            state.active_source = None;
        }
        log!(
            "[ARB] {} {}",
            id.name(),
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Drain whatever `link` has buffered into its session. Returns the
    /// number of bytes consumed; disabled transports are not read at all.
    pub fn service(
        &mut self,
        link: &mut dyn TransportLink,
        now: Instant,
        state: &DeviceState,
        scratch: &mut [u8],
        events: &mut Vec<DecodeEvent>,
    ) -> usize {
        let id = link.id();
        if !state.transport_enabled(id) {
            return 0;
        }

        let session = &mut self.sessions[id.index()];
        session.decoder.expire(now);

        let mut consumed = 0;
        for _ in 0..MAX_POLLS_PER_TICK {
            let len = link.poll(scratch);
            if len == 0 {
                break;
            }
            consumed += len;
            match id.profile().framing {
                Framing::Stream => {
                    session
                        .decoder
                        .feed(&scratch[..len], now, state.led_count, events);
                }
                Framing::Datagram => {
                    session
                        .decoder
                        .feed_datagram(&scratch[..len], now, state.led_count, events);
                }
            }
        }
        consumed
    }

    /// Route a decoded frame to the strip
    pub fn offer<S>(
        &mut self,
        frame: &ColorFrame,
        state: &mut DeviceState,
        suppressed: bool,
        led: &mut LedController<S>,
    ) -> Offer
    where
        S: SmartLedsWrite<Color = RGB8>,
    {
        if suppressed {
            return Offer::Suppressed;
        }

        // The frame may have been sized for a larger strip
        let covered = frame.pixels.len().min(state.led_count);
        led.apply(&frame.pixels[..covered]);
        let _ = led.flush();

        if state.active_source != Some(frame.source) {
            log!("[ARB] Active source: {}", frame.source.name());
            state.active_source = Some(frame.source);
        }
        state.output.frame_applied(frame.received_at);
        Offer::Applied
    }

    /// Blank the strip once when the active source went quiet. Returns true
    /// on the tick the loss is detected.
    pub fn check_signal<S>(
        &mut self,
        now: Instant,
        state: &mut DeviceState,
        led: &mut LedController<S>,
    ) -> bool
    where
        S: SmartLedsWrite<Color = RGB8>,
    {
        let actions = state.output.check_timeout(now);
        for action in &actions {
            match action {
                Action::BlankOutput => {
                    led.clear();
                    let _ = led.flush();
                }
                Action::RecordSignalLoss => {
                    log!(
                        "[ARB] No frame from {:?} for {} ms, output off",
                        state.active_source.map(TransportId::name),
                        crate::config::SIGNAL_TIMEOUT.as_millis()
                    );
                    state.active_source = None;
                }
            }
        }
        !actions.is_empty()
    }

    /// Frames lost to corruption, truncation or stalls, all transports
    pub fn dropped_frames(&self) -> u32 {
        self.sessions()
            .map(|session| session.stats().dropped_frames())
            .fold(0, u32::saturating_add)
    }
}

impl Default for TransportArbiter {
    fn default() -> Self {
        Self::new()
    }
}
