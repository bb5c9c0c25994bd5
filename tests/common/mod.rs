#![allow(dead_code)]

use ambilight_board::{BoardError, DeviceController, MemoryConfigStore, TransportId, TransportLink};
use embassy_time::Instant;
use smart_leds::{RGB8, SmartLedsWrite};
use std::collections::VecDeque;

/// Strip double that keeps every write
#[derive(Default)]
pub struct RecordingSink {
    pub writes: Vec<Vec<RGB8>>,
}

impl SmartLedsWrite for RecordingSink {
    type Error = ();
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.writes.push(iterator.into_iter().map(Into::into).collect());
        Ok(())
    }
}

/// Link that hands out queued chunks one per poll and records replies
pub struct MockLink {
    pub id: TransportId,
    pub inbox: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
}

impl MockLink {
    pub fn new(id: TransportId) -> Self {
        Self {
            id,
            inbox: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.inbox.push_back(bytes.to_vec());
    }

    pub fn replies(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|bytes| String::from_utf8(bytes.clone()).unwrap())
            .collect()
    }

    pub fn last_json(&self) -> serde_json::Value {
        let last = self.sent.last().expect("no reply sent");
        serde_json::from_slice(last).unwrap()
    }
}

impl TransportLink for MockLink {
    fn id(&self) -> TransportId {
        self.id
    }

    fn poll(&mut self, buf: &mut [u8]) -> usize {
        let Some(chunk) = self.inbox.pop_front() else {
            return 0;
        };
        buf[..chunk.len()].copy_from_slice(&chunk);
        chunk.len()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), BoardError> {
        self.sent.push(data.to_vec());
        Ok(())
    }
}

pub type TestDevice = DeviceController<RecordingSink, MemoryConfigStore>;

pub fn device(led_count: usize) -> TestDevice {
    DeviceController::new(RecordingSink::default(), MemoryConfigStore::new(led_count))
}

pub fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

pub const OFF: RGB8 = RGB8::new(0, 0, 0);
