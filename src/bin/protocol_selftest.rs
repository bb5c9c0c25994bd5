//! 协议自检程序
//!
//! 在板上用合成时间驱动控制器，验证帧解码、命令处理、信号丢失和测试图案

#![no_std]
#![no_main]

extern crate alloc;

use alloc::vec::Vec;
use ambilight_board::frame_decoder::encode_frame;
use ambilight_board::state_machine::OutputState;
use ambilight_board::{BoardError, DeviceController, MemoryConfigStore, TransportId, TransportLink};
use embassy_time::Instant;
use esp_hal::clock::CpuClock;
use esp_println::println;
use smart_leds::{RGB8, SmartLedsWrite};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("❌ 自检失败: {}", info);
    loop {}
}

/// 记录最后一次写入的灯带数据
#[derive(Default)]
struct LastFrame(Vec<RGB8>);

impl SmartLedsWrite for LastFrame {
    type Error = ();
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.0 = iterator.into_iter().map(Into::into).collect();
        Ok(())
    }
}

/// 预置输入的传输链路
struct CannedLink {
    input: Vec<Vec<u8>>,
    replies: Vec<Vec<u8>>,
}

impl CannedLink {
    fn new() -> Self {
        Self {
            input: Vec::new(),
            replies: Vec::new(),
        }
    }
}

impl TransportLink for CannedLink {
    fn id(&self) -> TransportId {
        TransportId::Serial
    }

    fn poll(&mut self, buf: &mut [u8]) -> usize {
        if self.input.is_empty() {
            return 0;
        }
        let chunk = self.input.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        chunk.len()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), BoardError> {
        self.replies.push(data.to_vec());
        Ok(())
    }
}

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let _peripherals = esp_hal::init(config);

    // Initialize heap allocator
    esp_alloc::heap_allocator!(size: 48 * 1024);

    println!("=== 协议自检 ===");

    let mut device = DeviceController::new(LastFrame::default(), MemoryConfigStore::new(3));
    let mut link = CannedLink::new();

    // 1. 有效帧
    println!("\n1. 测试有效帧");
    link.input.push(encode_frame(&[10, 20, 30, 40, 50, 60, 70, 80, 90]));
    let report = device.tick(at(0), &mut [&mut link]);
    assert_eq!(report.frames_applied, 1);
    assert_eq!(device.pixels()[2], RGB8::new(70, 80, 90));
    assert_eq!(device.state().active_source, Some(TransportId::Serial));
    println!("✅ 帧已应用: {:?}", device.pixels());

    // 2. 校验错误
    println!("\n2. 测试校验错误");
    let mut corrupt = encode_frame(&[1, 1, 1, 1, 1, 1, 1, 1, 1]);
    if let Some(last) = corrupt.last_mut() {
        *last ^= 0xFF;
    }
    link.input.push(corrupt);
    device.tick(at(10), &mut [&mut link]);
    assert_eq!(device.pixels()[2], RGB8::new(70, 80, 90));
    assert_eq!(device.stats(TransportId::Serial).checksum_failures, 1);
    println!("✅ 错误帧被丢弃");

    // 3. 命令
    println!("\n3. 测试命令处理");
    link.input.push(br#"{"cmd":"highlight","led":"x"}"#.to_vec());
    link.input.push(br#"{"cmd":"info"}"#.to_vec());
    device.tick(at(20), &mut [&mut link]);
    assert_eq!(link.replies.len(), 1);
    println!(
        "✅ 信息回复: {}",
        core::str::from_utf8(&link.replies[0]).unwrap_or("<binary>")
    );

    // 4. 信号丢失
    println!("\n4. 测试信号丢失");
    let report = device.tick(at(3001), &mut [&mut link]);
    assert!(report.signal_lost);
    assert_eq!(device.state().output.get_current_state(), OutputState::SignalLost);
    let report = device.tick(at(6000), &mut [&mut link]);
    assert!(!report.signal_lost);
    println!("✅ 信号丢失只触发一次");

    // 5. 测试图案
    println!("\n5. 测试图案");
    link.input.push(br#"{"cmd":"test_pattern"}"#.to_vec());
    device.tick(at(7000), &mut [&mut link]);
    assert!(device.exclusive().is_some());
    let mut now = 7000;
    while device.exclusive().is_some() {
        now += 10;
        device.tick(at(now), &mut [&mut link]);
    }
    println!("✅ 测试图案在 {} ms 后结束", now - 7000);

    println!("\n=== 自检全部通过 ===");

    loop {
        core::hint::spin_loop();
    }
}
