use crate::BoardError;
use crate::config::MAX_LEDS;
use alloc::vec;
use alloc::vec::Vec;
use smart_leds::{RGB8, SmartLedsWrite, brightness};

/// Marker color for the LED being calibrated
pub const MARKER_COLOR: RGB8 = RGB8::new(255, 255, 255);

/// All LEDs off
pub const OFF: RGB8 = RGB8::new(0, 0, 0);

/// Output buffer in front of an addressable strip
///
/// Pixels are kept at full scale; brightness is applied when the buffer is
/// written out, so changing it never loses color information.
pub struct LedController<S>
where
    S: SmartLedsWrite<Color = RGB8>,
{
    sink: S,
    pixels: Vec<RGB8>,
    brightness: u8,
    write_failures: u32,
}

impl<S> LedController<S>
where
    S: SmartLedsWrite<Color = RGB8>,
{
    /// Create a controller for `led_count` LEDs, all off
    pub fn new(sink: S, led_count: usize) -> Self {
        Self {
            sink,
            pixels: vec![OFF; led_count.clamp(1, MAX_LEDS)],
            brightness: 255,
            write_failures: 0,
        }
    }

    pub fn led_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixels(&self) -> &[RGB8] {
        &self.pixels
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn set_brightness(&mut self, value: u8) {
        self.brightness = value;
    }

    /// Sink writes that failed since boot
    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    /// Resize the buffer; every LED is switched off
    pub fn resize(&mut self, led_count: usize) {
        self.pixels.clear();
        self.pixels.resize(led_count.clamp(1, MAX_LEDS), OFF);
    }

    pub fn clear(&mut self) {
        self.fill(OFF);
    }

    pub fn fill(&mut self, color: RGB8) {
        self.pixels.iter_mut().for_each(|pixel| *pixel = color);
    }

    /// Set one LED; out-of-range indices are ignored
    pub fn set(&mut self, index: usize, color: RGB8) {
        if let Some(pixel) = self.pixels.get_mut(index) {
            *pixel = color;
        }
    }

    /// Copy a frame into the buffer. Extra colors are ignored, LEDs the frame
    /// does not cover are switched off.
    pub fn apply(&mut self, colors: &[RGB8]) {
        let covered = colors.len().min(self.pixels.len());
        self.pixels[..covered].copy_from_slice(&colors[..covered]);
        self.pixels[covered..].iter_mut().for_each(|pixel| *pixel = OFF);
    }

    /// Push the buffer to the strip
    pub fn flush(&mut self) -> Result<(), BoardError> {
        let scaled = brightness(self.pixels.iter().copied(), self.brightness);
        self.sink.write(scaled).map_err(|_| {
            self.write_failures += 1;
            log!("[LED] Strip write failed ({} so far)", self.write_failures);
            BoardError::LedError
        })
    }

    /// Access the sink, e.g. to inspect a test double
    pub fn sink(&self) -> &S {
        &self.sink
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn apply_pads_and_truncates() {
        let mut led = LedController::new(RecordingSink::default(), 3);
        led.fill(RGB8::new(9, 9, 9));
        led.apply(&[RGB8::new(1, 2, 3)]);
        assert_eq!(led.pixels(), [RGB8::new(1, 2, 3), OFF, OFF]);

        led.apply(&[RGB8::new(4, 4, 4); 5]);
        assert_eq!(led.pixels(), [RGB8::new(4, 4, 4); 3]);
    }

    #[test]
    fn brightness_scales_only_the_output() {
        let mut led = LedController::new(RecordingSink::default(), 1);
        led.apply(&[RGB8::new(200, 100, 0)]);
        led.set_brightness(0);
        led.flush().unwrap();

        assert_eq!(led.sink().last(), [OFF]);
        assert_eq!(led.pixels(), [RGB8::new(200, 100, 0)]);

        led.set_brightness(255);
        led.flush().unwrap();
        assert_eq!(led.sink().last(), [RGB8::new(200, 100, 0)]);
    }

    struct FailingSink;

    impl SmartLedsWrite for FailingSink {
        type Error = BoardError;
        type Color = RGB8;

        fn write<T, I>(&mut self, _iterator: T) -> Result<(), Self::Error>
        where
            T: IntoIterator<Item = I>,
            I: Into<Self::Color>,
        {
            Err(BoardError::LedError)
        }
    }

    #[test]
    fn sink_errors_are_counted() {
        let mut led = LedController::new(FailingSink, 2);
        assert_eq!(led.flush(), Err(BoardError::LedError));
        assert_eq!(led.flush(), Err(BoardError::LedError));
        assert_eq!(led.write_failures(), 2);
    }

    #[test]
    fn led_count_is_clamped() {
        let led = LedController::new(RecordingSink::default(), 0);
        assert_eq!(led.led_count(), 1);
        let led = LedController::new(RecordingSink::default(), MAX_LEDS + 10);
        assert_eq!(led.led_count(), MAX_LEDS);
    }
}
