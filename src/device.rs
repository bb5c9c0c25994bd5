//! Device controller
//!
//! Owns every piece of mutable board state and advances it one cooperative
//! tick at a time: transports are serviced in registration order, then the
//! exclusive animation steps, then calibration blinks, then the signal-loss
//! check runs. Nothing in here blocks.

use crate::animation::{Animation, AnimationPlayer};
use crate::arbiter::{Offer, TransportArbiter};
use crate::calibration::CalibrationController;
use crate::command::{Command, DEFAULT_BRIGHTNESS, InfoReply, Reply, parse_command};
use crate::config::{MAX_DATAGRAM, MAX_LEDS};
use crate::config_store::ConfigStore;
use crate::frame_decoder::{DecodeEvent, DecoderStats};
use crate::led_control::LedController;
use crate::state_machine::{OutputEvent, OutputStateMachine};
use crate::transport::{Framing, TransportId, TransportLink};
use crate::{BoardError, VERSION};
use alloc::vec;
use alloc::vec::Vec;
use embassy_time::Instant;
use smart_leds::{RGB8, SmartLedsWrite};

/// State shared by the arbiter and the command handlers
pub struct DeviceState {
    pub led_count: usize,
    pub brightness: u8,
    /// Indexed by [`TransportId::index`]
    pub enabled: [bool; 3],
    /// Transport whose frame was applied last, while output is live
    pub active_source: Option<TransportId>,
    pub output: OutputStateMachine,
}

impl DeviceState {
    pub fn new(led_count: usize, enabled: [bool; 3]) -> Self {
        Self {
            led_count,
            brightness: DEFAULT_BRIGHTNESS,
            enabled,
            active_source: None,
            output: OutputStateMachine::new(),
        }
    }

    /// True while the strip shows host colors
    pub fn output_active(&self) -> bool {
        self.output.output_active()
    }

    pub fn transport_enabled(&self, id: TransportId) -> bool {
        self.enabled[id.index()]
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Bytes read from all links
    pub bytes: usize,
    pub frames_applied: usize,
    /// Frames discarded because calibration or an animation owned the strip
    pub frames_suppressed: usize,
    pub commands: usize,
    /// The active source went quiet and the strip was blanked
    pub signal_lost: bool,
    pub animation_finished: bool,
}

pub struct DeviceController<S, C>
where
    S: SmartLedsWrite<Color = RGB8>,
    C: ConfigStore,
{
    state: DeviceState,
    arbiter: TransportArbiter,
    calibration: CalibrationController,
    led: LedController<S>,
    store: C,
    animation: Option<AnimationPlayer>,
    scratch: Vec<u8>,
    events: Vec<DecodeEvent>,
}

impl<S, C> DeviceController<S, C>
where
    S: SmartLedsWrite<Color = RGB8>,
    C: ConfigStore,
{
    pub fn new(sink: S, store: C) -> Self {
        let led_count = store.led_count().clamp(1, MAX_LEDS);
        let enabled = TransportId::ALL.map(|id| store.transport_enabled(id));
        log!(
            "[DEV] {} LEDs, transports enabled: {:?}",
            led_count,
            enabled
        );

        Self {
            state: DeviceState::new(led_count, enabled),
            arbiter: TransportArbiter::new(),
            calibration: CalibrationController::new(),
            led: LedController::new(sink, led_count),
            store,
            animation: None,
            scratch: vec![0; MAX_DATAGRAM],
            events: Vec::new(),
        }
    }

    /// Announce the board on every enabled link and play the boot sweep
    pub fn begin(&mut self, now: Instant, links: &mut [&mut dyn TransportLink]) {
        let ready = Reply::Ready {
            led_count: self.state.led_count,
            version: VERSION,
        };
        for link in links.iter_mut() {
            if self.state.transport_enabled(link.id()) {
                let _ = send_reply(&mut **link, &ready);
            }
        }
        self.enter_exclusive(Animation::Startup, now);
    }

    pub fn tick(&mut self, now: Instant, links: &mut [&mut dyn TransportLink]) -> TickReport {
        let mut report = TickReport::default();

        for id in TransportId::ALL {
            for link in links.iter_mut().filter(|link| link.id() == id) {
                self.service_link(&mut **link, now, &mut report);
            }
        }

        let finished = match &mut self.animation {
            Some(player) => !player.step(now, &mut self.led),
            None => false,
        };
        if finished {
            self.leave_exclusive(now);
            report.animation_finished = true;
        }

        if self.animation.is_none() {
            if self.calibration.tick(now) {
                self.calibration.render(&mut self.led);
                let _ = self.led.flush();
            }
            report.signal_lost = self.arbiter.check_signal(now, &mut self.state, &mut self.led);
        }

        report
    }

    fn service_link(
        &mut self,
        link: &mut dyn TransportLink,
        now: Instant,
        report: &mut TickReport,
    ) {
        let mut events = core::mem::take(&mut self.events);
        report.bytes += self
            .arbiter
            .service(link, now, &self.state, &mut self.scratch, &mut events);

        for event in events.drain(..) {
            match event {
                DecodeEvent::Frame(frame) => {
                    let suppressed = self.calibration.is_active() || self.animation.is_some();
                    match self
                        .arbiter
                        .offer(&frame, &mut self.state, suppressed, &mut self.led)
                    {
                        Offer::Applied => report.frames_applied += 1,
                        Offer::Suppressed => report.frames_suppressed += 1,
                    }
                }
                DecodeEvent::Command(document) => {
                    report.commands += 1;
                    self.handle_document(&document, now, link);
                }
            }
        }
        self.events = events;
    }

    fn handle_document(&mut self, document: &[u8], now: Instant, link: &mut dyn TransportLink) {
        match parse_command(document, self.state.led_count) {
            Ok(Some(command)) => {
                if let Err(err) = self.apply_command(command, now, link) {
                    log!("[CMD] {} command failed: {}", link.id().name(), err);
                }
            }
            Ok(None) => log!("[CMD] Unknown command from {}", link.id().name()),
            Err(err) => log!("[CMD] Rejected document from {}: {}", link.id().name(), err),
        }
    }

    /// Execute one command received on `link` and reply on the same link
    pub fn apply_command(
        &mut self,
        command: Command,
        now: Instant,
        link: &mut dyn TransportLink,
    ) -> Result<(), BoardError> {
        log!("[CMD] {} from {}", command.name(), link.id().name());
        let ack = Reply::Ack {
            cmd: command.name(),
        };

        match command {
            Command::Info => return send_reply(link, &Reply::Info(self.info())),
            Command::CalibrateStart => {
                self.calibration.start(now);
                self.disarm_output();
                if self.animation.is_none() {
                    self.calibration.render(&mut self.led);
                    let _ = self.led.flush();
                }
            }
            Command::CalibrateEnd => {
                self.calibration.end();
                if self.animation.is_none() {
                    self.led.clear();
                    let _ = self.led.flush();
                }
            }
            Command::Highlight(index) => {
                self.calibration
                    .highlight(index, self.state.led_count, now);
                if self.calibration.is_active() && self.animation.is_none() {
                    self.calibration.render(&mut self.led);
                    let _ = self.led.flush();
                }
            }
            Command::SaveMap(points) => {
                self.calibration
                    .save_map(&points, self.state.led_count, &mut self.store)?;
            }
            Command::TestPattern => self.enter_exclusive(Animation::TestPattern, now),
            Command::SetBrightness(value) => {
                self.state.brightness = value;
                self.led.set_brightness(value);
                let _ = self.led.flush();
            }
            Command::Clear => {
                if self.animation.take().is_some() {
                    log!("[DEV] Animation cancelled");
                    self.resume_timers(now);
                }
                self.led.clear();
                let _ = self.led.flush();
                self.disarm_output();
            }
        }

        send_reply(link, &ack)
    }

    /// Change the strip length. Frames already being received keep the size
    /// they started with and are cut to fit when applied.
    pub fn set_led_count(&mut self, count: usize) -> Result<(), BoardError> {
        if !(1..=MAX_LEDS).contains(&count) {
            return Err(BoardError::ConfigError);
        }
        self.store.set_led_count(count)?;
        self.state.led_count = count;
        self.led.resize(count);
        self.calibration.clamp_to(count);
        if self.calibration.is_active() && self.animation.is_none() {
            self.calibration.render(&mut self.led);
        }
        let _ = self.led.flush();
        log!("[DEV] LED count set to {}", count);
        Ok(())
    }

    pub fn set_transport_enabled(
        &mut self,
        id: TransportId,
        enabled: bool,
    ) -> Result<(), BoardError> {
        self.store.set_transport_enabled(id, enabled)?;
        self.arbiter.set_enabled(id, enabled, &mut self.state);
        Ok(())
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    /// Output buffer before brightness scaling
    pub fn pixels(&self) -> &[RGB8] {
        self.led.pixels()
    }

    pub fn led(&self) -> &LedController<S> {
        &self.led
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn stats(&self, id: TransportId) -> DecoderStats {
        self.arbiter.session(id).stats()
    }

    /// Animation currently owning the strip
    pub fn exclusive(&self) -> Option<Animation> {
        self.animation.as_ref().map(AnimationPlayer::animation)
    }

    pub fn info(&self) -> InfoReply {
        InfoReply {
            led_count: self.state.led_count,
            brightness: self.state.brightness,
            calibrating: self.calibration.is_active(),
            output_active: self.state.output_active(),
            active_source: self.state.active_source,
            dropped_frames: self.arbiter.dropped_frames(),
            version: VERSION,
        }
    }

    fn disarm_output(&mut self) {
        self.state.output.handle_event(OutputEvent::Cleared);
        self.state.active_source = None;
    }

    fn enter_exclusive(&mut self, animation: Animation, now: Instant) {
        if self.animation.is_none() {
            self.state.output.suspend(now);
            self.calibration.suspend(now);
        }
        self.animation = Some(AnimationPlayer::new(animation, now));
    }

    fn leave_exclusive(&mut self, now: Instant) {
        self.animation = None;
        self.resume_timers(now);
        if self.calibration.is_active() {
            self.calibration.render(&mut self.led);
            let _ = self.led.flush();
        }
    }

    fn resume_timers(&mut self, now: Instant) {
        self.state.output.resume(now);
        self.calibration.resume(now);
    }
}

/// Encode `reply` and queue it on `link`. Stream transports get one document
/// per line.
fn send_reply(link: &mut dyn TransportLink, reply: &Reply) -> Result<(), BoardError> {
    let mut bytes = reply.encode()?;
    if link.id().profile().framing == Framing::Stream {
        bytes.push(b'\n');
    }
    link.send(&bytes).inspect_err(|err| {
        log!("[DEV] Reply on {} failed: {}", link.id().name(), err);
    })
}
