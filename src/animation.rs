//! Built-in animations
//!
//! Animations are pure functions of elapsed time. The controller calls
//! [`AnimationPlayer::step`] every tick; the strip is only rewritten when the
//! visible frame changes.

use crate::led_control::{LedController, OFF};
use embassy_time::{Duration, Instant};
use smart_leds::{RGB8, SmartLedsWrite};

/// Per-LED advance of the test pattern chase
pub const CHASE_STEP: Duration = Duration::from_millis(30);

/// How long each solid test color is shown
pub const SOLID_HOLD: Duration = Duration::from_millis(500);

/// Per-LED advance of the boot sweep
pub const SWEEP_STEP: Duration = Duration::from_millis(15);

/// How long the fully swept strip stays lit at boot
pub const SWEEP_HOLD: Duration = Duration::from_millis(300);

const CHASE_COLOR: RGB8 = RGB8::new(255, 0, 0);
const SWEEP_COLOR: RGB8 = RGB8::new(0, 48, 96);
const SOLID_COLORS: [RGB8; 4] = [
    RGB8::new(255, 0, 0),
    RGB8::new(0, 255, 0),
    RGB8::new(0, 0, 255),
    RGB8::new(255, 255, 255),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Animation {
    /// Progressive sweep shown once at boot
    Startup,
    /// Red chase, then solid red, green, blue and white
    TestPattern,
}

/// What the strip shows at one point of an animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scene {
    /// LEDs `0..=n` lit
    Sweep(usize),
    /// Only LED `n` lit
    Chase(usize),
    Solid(RGB8),
    Finished,
}

pub struct AnimationPlayer {
    animation: Animation,
    started_at: Instant,
    shown: Option<Scene>,
}

impl AnimationPlayer {
    pub fn new(animation: Animation, now: Instant) -> Self {
        log!("[ANIM] {:?} started", animation);
        Self {
            animation,
            started_at: now,
            shown: None,
        }
    }

    pub fn animation(&self) -> Animation {
        self.animation
    }

    /// Total run time on a strip of `led_count` LEDs
    pub fn duration(&self, led_count: usize) -> Duration {
        let leds = led_count as u64;
        match self.animation {
            Animation::Startup => {
                Duration::from_ticks(SWEEP_STEP.as_ticks() * leds) + SWEEP_HOLD
            }
            Animation::TestPattern => {
                Duration::from_ticks(CHASE_STEP.as_ticks() * leds)
                    + Duration::from_ticks(SOLID_HOLD.as_ticks() * SOLID_COLORS.len() as u64)
            }
        }
    }

    /// Draw the frame due at `now`. Returns false once the animation is over;
    /// the strip is left dark at that point.
    pub fn step<S>(&mut self, now: Instant, led: &mut LedController<S>) -> bool
    where
        S: SmartLedsWrite<Color = RGB8>,
    {
        let scene = self.scene_at(now, led.led_count());
        if self.shown != Some(scene) {
            match scene {
                Scene::Sweep(last) => {
                    led.clear();
                    for index in 0..=last {
                        led.set(index, SWEEP_COLOR);
                    }
                }
                Scene::Chase(index) => {
                    led.clear();
                    led.set(index, CHASE_COLOR);
                }
                Scene::Solid(color) => led.fill(color),
                Scene::Finished => led.fill(OFF),
            }
            let _ = led.flush();
            self.shown = Some(scene);
        }

        if scene == Scene::Finished {
            log!("[ANIM] {:?} finished", self.animation);
            return false;
        }
        true
    }

    fn scene_at(&self, now: Instant, led_count: usize) -> Scene {
        let elapsed = now.saturating_duration_since(self.started_at).as_ticks();
        let last_led = led_count.saturating_sub(1);

        match self.animation {
            Animation::Startup => {
                let sweep = SWEEP_STEP.as_ticks() * led_count as u64;
                if elapsed < sweep {
                    Scene::Sweep((elapsed / SWEEP_STEP.as_ticks()) as usize)
                } else if elapsed < sweep + SWEEP_HOLD.as_ticks() {
                    Scene::Sweep(last_led)
                } else {
                    Scene::Finished
                }
            }
            Animation::TestPattern => {
                let chase = CHASE_STEP.as_ticks() * led_count as u64;
                if elapsed < chase {
                    return Scene::Chase((elapsed / CHASE_STEP.as_ticks()) as usize);
                }
                let solid = ((elapsed - chase) / SOLID_HOLD.as_ticks()) as usize;
                SOLID_COLORS
                    .get(solid)
                    .map_or(Scene::Finished, |color| Scene::Solid(*color))
            }
        }
    }
}
