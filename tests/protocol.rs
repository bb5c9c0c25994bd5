mod common;

mod tests {
    use crate::common::{MockLink, OFF, at, device};
    use ambilight_board::frame_decoder::encode_frame;
    use ambilight_board::config::MAX_LEDS;
    use ambilight_board::transport::DatagramQueue;
    use ambilight_board::{ConfigStore, LedMapPoint, TransportId, TransportLink};
    use smart_leds::RGB8;

    #[test]
    fn test_frame_then_malformed_command() {
        let mut board = device(3);
        let mut serial = MockLink::new(TransportId::Serial);

        let mut wire = encode_frame(&[10, 20, 30, 40, 50, 60, 70, 80, 90]);
        wire.extend_from_slice(br#"{"cmd":"highlight","led":"oops"}"#);
        serial.push(&wire);

        let report = board.tick(at(0), &mut [&mut serial]);
        assert_eq!(report.frames_applied, 1);
        assert_eq!(report.commands, 1);
        assert_eq!(
            board.pixels(),
            [
                RGB8::new(10, 20, 30),
                RGB8::new(40, 50, 60),
                RGB8::new(70, 80, 90)
            ]
        );
        assert_eq!(board.state().active_source, Some(TransportId::Serial));
        assert!(board.state().output_active());
        assert!(!board.calibration().is_active());
        assert!(serial.sent.is_empty());
    }

    #[test]
    fn test_checksum_failure_keeps_previous_frame() {
        let mut board = device(1);
        let mut serial = MockLink::new(TransportId::Serial);
        serial.push(&encode_frame(&[5, 6, 7]));
        let mut bad = encode_frame(&[1, 1, 1]);
        *bad.last_mut().unwrap() ^= 0x55;
        serial.push(&bad);

        board.tick(at(0), &mut [&mut serial]);
        assert_eq!(board.pixels(), [RGB8::new(5, 6, 7)]);
        assert_eq!(board.stats(TransportId::Serial).checksum_failures, 1);
        assert_eq!(board.info().dropped_frames, 1);
    }

    #[test]
    fn test_info_reports_state_and_drops() {
        let mut board = device(2);
        let mut serial = MockLink::new(TransportId::Serial);
        let mut bad = encode_frame(&[1, 2, 3, 4, 5, 6]);
        *bad.last_mut().unwrap() ^= 1;
        serial.push(&bad);
        serial.push(br#"{"cmd":"info"}"#);
        board.tick(at(0), &mut [&mut serial]);

        let reply = serial.last_json();
        assert_eq!(reply["type"], "info");
        assert_eq!(reply["ledCount"], 2);
        assert_eq!(reply["brightness"], 255);
        assert_eq!(reply["calibrating"], false);
        assert_eq!(reply["outputActive"], false);
        assert_eq!(reply["droppedFrames"], 1);
        assert!(serial.replies()[0].ends_with('\n'));
    }

    #[test]
    fn test_frame_split_across_ticks() {
        let mut board = device(2);
        let mut serial = MockLink::new(TransportId::Serial);
        let wire = encode_frame(&[1, 2, 3, 4, 5, 6]);

        serial.push(&wire[..4]);
        assert_eq!(board.tick(at(0), &mut [&mut serial]).frames_applied, 0);
        serial.push(&wire[4..]);
        assert_eq!(board.tick(at(20), &mut [&mut serial]).frames_applied, 1);
        assert_eq!(board.pixels()[1], RGB8::new(4, 5, 6));
    }

    #[test]
    fn test_stalled_frame_is_abandoned() {
        let mut board = device(2);
        let mut serial = MockLink::new(TransportId::Serial);
        let stale = encode_frame(&[1, 2, 3, 4, 5, 6]);

        serial.push(&stale[..4]);
        board.tick(at(0), &mut [&mut serial]);
        board.tick(at(60), &mut [&mut serial]);
        assert_eq!(board.stats(TransportId::Serial).timeouts, 1);

        serial.push(&encode_frame(&[9, 9, 9, 8, 8, 8]));
        board.tick(at(70), &mut [&mut serial]);
        assert_eq!(board.pixels(), [RGB8::new(9, 9, 9), RGB8::new(8, 8, 8)]);
    }

    #[test]
    fn test_last_transport_in_tick_wins() {
        let mut board = device(1);
        let queue = DatagramQueue::new();
        let mut network = queue.link();
        let mut serial = MockLink::new(TransportId::Serial);
        let mut bluetooth = MockLink::new(TransportId::Bluetooth);

        serial.push(&encode_frame(&[1, 1, 1]));
        assert!(queue.deliver(&[2, 2, 2]));
        bluetooth.push(&encode_frame(&[3, 3, 3]));

        // Registration order applies regardless of slice order
        let report = board.tick(at(0), &mut [&mut bluetooth, &mut network, &mut serial]);
        assert_eq!(report.frames_applied, 3);
        assert_eq!(board.pixels(), [RGB8::new(3, 3, 3)]);
        assert_eq!(board.state().active_source, Some(TransportId::Bluetooth));

        assert!(queue.deliver(&[4, 4, 4]));
        board.tick(at(10), &mut [&mut serial, &mut network, &mut bluetooth]);
        assert_eq!(board.pixels(), [RGB8::new(4, 4, 4)]);
        assert_eq!(board.state().active_source, Some(TransportId::Network));
    }

    #[test]
    fn test_network_commands_reply_without_newline() {
        let mut board = device(1);
        let queue = DatagramQueue::new();
        let mut network = queue.link();

        assert!(queue.deliver(br#"{"cmd":"clear"}"#));
        board.tick(at(0), &mut [&mut network]);

        let reply = queue.take_reply().unwrap();
        assert_eq!(&reply[..], br#"{"type":"ack","cmd":"clear"}"#);
    }

    #[test]
    fn test_short_datagram_is_dropped() {
        let mut board = device(4);
        let queue = DatagramQueue::new();
        let mut network = queue.link();

        assert!(queue.deliver(&[1, 2, 3]));
        let report = board.tick(at(0), &mut [&mut network]);
        assert_eq!(report.frames_applied, 0);
        assert_eq!(board.pixels(), [OFF; 4]);
        assert_eq!(board.stats(TransportId::Network).short_datagrams, 1);
    }

    #[test]
    fn test_nested_save_map_over_stream() {
        let mut board = device(3);
        let mut bluetooth = MockLink::new(TransportId::Bluetooth);
        let doc = br#"{"cmd":"save_map","mapping":[{"x":1,"y":2},{"x":3,"y":4}]}"#;

        // Bluetooth modules deliver in small pieces
        for chunk in doc.chunks(16) {
            bluetooth.push(chunk);
        }
        board.tick(at(0), &mut [&mut bluetooth]);

        assert_eq!(board.store().mapping(1), Some(LedMapPoint::new(3, 4)));
        assert_eq!(
            bluetooth.replies(),
            ["{\"type\":\"ack\",\"cmd\":\"save_map\"}\n"]
        );
    }

    #[test]
    fn test_commands_between_frames_keep_order() {
        let mut board = device(1);
        let mut serial = MockLink::new(TransportId::Serial);
        let mut wire = encode_frame(&[100, 100, 100]);
        wire.extend_from_slice(br#"{"cmd":"clear"}"#);
        wire.extend_from_slice(&encode_frame(&[7, 7, 7]));
        serial.push(&wire);

        board.tick(at(0), &mut [&mut serial]);
        assert_eq!(board.pixels(), [RGB8::new(7, 7, 7)]);
        assert!(board.state().output_active());
    }

    #[test]
    fn test_unused_link_is_never_polled_when_disabled() {
        let mut board = device(1);
        board
            .set_transport_enabled(TransportId::Bluetooth, false)
            .unwrap();
        let mut bluetooth = MockLink::new(TransportId::Bluetooth);
        bluetooth.push(&encode_frame(&[1, 2, 3]));

        let report = board.tick(at(0), &mut [&mut bluetooth]);
        assert_eq!(report.bytes, 0);
        assert_eq!(bluetooth.inbox.len(), 1);
        assert_eq!(bluetooth.id(), TransportId::Bluetooth);
    }

    /// `save_map` laid out the way the desktop host's `json.dumps` writes it
    fn host_save_map(led_count: usize) -> Vec<u8> {
        let entries: Vec<String> = (0..led_count)
            .map(|i| format!(r#"{{"x": {}, "y": 255}}"#, i % 256))
            .collect();
        format!(
            r#"{{"cmd": "save_map", "mapping": [{}]}}"#,
            entries.join(", ")
        )
        .into_bytes()
    }

    fn drain(board: &mut crate::common::TestDevice, link: &mut MockLink) -> u64 {
        let mut now = 0;
        while !link.inbox.is_empty() {
            board.tick(at(now), &mut [&mut *link]);
            now += 1;
        }
        now
    }

    #[test]
    fn test_full_length_save_map_over_serial() {
        let mut board = device(MAX_LEDS);
        let mut serial = MockLink::new(TransportId::Serial);
        for chunk in host_save_map(MAX_LEDS).chunks(64) {
            serial.push(chunk);
        }
        drain(&mut board, &mut serial);

        assert_eq!(board.stats(TransportId::Serial).overflows, 0);
        assert_eq!(
            serial.replies(),
            ["{\"type\":\"ack\",\"cmd\":\"save_map\"}\n"]
        );
        assert_eq!(board.store().mapping(0), Some(LedMapPoint::new(0, 255)));
        assert_eq!(
            board.store().mapping(MAX_LEDS - 1),
            Some(LedMapPoint::new(((MAX_LEDS - 1) % 256) as u8, 255))
        );
    }

    #[test]
    fn test_default_strip_save_map_over_bluetooth() {
        let mut board = device(60);
        let mut bluetooth = MockLink::new(TransportId::Bluetooth);
        for chunk in host_save_map(60).chunks(64) {
            bluetooth.push(chunk);
        }
        drain(&mut board, &mut bluetooth);

        assert_eq!(board.stats(TransportId::Bluetooth).overflows, 0);
        assert_eq!(bluetooth.last_json()["cmd"], "save_map");
        assert_eq!(board.store().mapping(59), Some(LedMapPoint::new(59, 255)));
    }

    #[test]
    fn test_oversized_command_does_not_leak_inner_objects() {
        let mut board = device(1);
        let mut serial = MockLink::new(TransportId::Serial);
        let mut wire = host_save_map(MAX_LEDS * 2);
        wire.extend_from_slice(br#"{"cmd":"info"}"#);
        for chunk in wire.chunks(512) {
            serial.push(chunk);
        }
        drain(&mut board, &mut serial);

        assert_eq!(board.stats(TransportId::Serial).overflows, 1);
        assert_eq!(serial.sent.len(), 1);
        assert_eq!(serial.last_json()["type"], "info");
        assert_eq!(board.store().mapping(0), None);
    }
}
