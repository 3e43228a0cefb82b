//! End-to-end exercises of the protocol engine: a scripted target on an
//! in-memory byte stream, driven through the full medium → framer → codec →
//! dispatch stack.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use embedded_debugger::{
    ByteStream, ChannelMode, CpuId, DebugClient, DebugError, Deframed, Direction, ErrorEvent,
    Event, Frame, Framer, JsonCatalogLoader, Medium, RegisterKey, Value, VariableType, WriteStatus,
    MAX_DEBUG_CHANNELS,
};

/// Both ends of an in-memory bus. The test half injects target replies and
/// inspects what the host put on the wire.
#[derive(Clone, Default)]
struct SharedBus {
    inner: Rc<RefCell<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    to_host: VecDeque<u8>,
    from_host: Vec<u8>,
}

impl SharedBus {
    fn inject(&self, bytes: &[u8]) {
        self.inner.borrow_mut().to_host.extend(bytes.iter().copied());
    }

    /// Parse and drain every frame the host has emitted so far.
    fn take_host_frames(&self) -> Vec<Frame> {
        let bytes = std::mem::take(&mut self.inner.borrow_mut().from_host);
        deframe(&bytes)
    }
}

impl ByteStream for SharedBus {
    fn open(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn read_buf(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let n = buf.len().min(inner.to_host.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inner.to_host.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_buf(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.inner.borrow_mut().from_host.extend_from_slice(data);
        Ok(())
    }
}

fn deframe(bytes: &[u8]) -> Vec<Frame> {
    let mut framer = Framer::new();
    framer
        .push_bytes(bytes)
        .into_iter()
        .map(|d| match d {
            Deframed::Frame(frame) => frame,
            Deframed::Malformed { .. } => panic!("host emitted a malformed frame"),
        })
        .collect()
}

fn version_payload(proto: [u8; 4], app: [u8; 4], name: &str, serial: &str) -> Vec<u8> {
    let mut payload = vec![b'V'];
    payload.extend_from_slice(&proto);
    payload.extend_from_slice(&app);
    payload.push(name.len() as u8);
    payload.extend_from_slice(name.as_bytes());
    payload.push(serial.len() as u8);
    payload.extend_from_slice(serial.as_bytes());
    payload
}

/// The GetInfo reply used throughout: Bool is 1 byte, Int 4 bytes, Float 4
/// bytes, and the timestamp ticks once per microsecond.
fn type_info_payload() -> Vec<u8> {
    vec![
        b'I',
        0x02, 1, 0x1E, // Bool
        0x05, 4, 0x1E, // Int
        0x07, 4, 0x1E, // Float
        0x0A, 1, 0, 0, 0, // TimeStamp, 4-byte size field
    ]
}

const CATALOG: &str = r#"{
    "Registers": [
        {
            "id": 1,
            "name": "counter",
            "ReadWrite": "Write",
            "Type": "int32_t",
            "Source": "HandWrittenOffset",
            "DerefDepth": 0,
            "Offset": 4096
        },
        {
            "id": 2,
            "name": "speed",
            "ReadWrite": "Read",
            "Type": "float",
            "Source": "HandWrittenOffset",
            "DerefDepth": 0,
            "Offset": 32
        },
        {
            "id": 3,
            "name": "ticks",
            "ReadWrite": "Read",
            "Type": "int32_t",
            "Source": "HandWrittenOffset",
            "DerefDepth": 0,
            "Offset": 64
        }
    ]
}"#;

/// A connected medium talking to a scripted target with id 2, name "X1".
struct Fixture {
    bus: SharedBus,
    medium: Medium<SharedBus>,
    events: crossbeam_channel::Receiver<Event>,
    target: Framer,
    _catalog_dir: tempfile::TempDir,
}

const TARGET_ID: u8 = 2;

impl Fixture {
    fn connect() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cpu_dir = dir.path().join("X1");
        std::fs::create_dir_all(&cpu_dir).unwrap();
        let mut file = std::fs::File::create(cpu_dir.join("10.11.12.13.json")).unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let mut client =
            DebugClient::with_catalog_loader(Box::new(JsonCatalogLoader::new(dir.path())));
        let events = client.subscribe();
        let bus = SharedBus::default();
        let mut medium = Medium::new(bus.clone(), client);
        medium.connect().unwrap();

        Fixture {
            bus,
            medium,
            events,
            target: Framer::new(),
            _catalog_dir: dir,
        }
    }

    /// Connect and complete the discovery handshake, discarding the frames
    /// and events it produced.
    fn discovered() -> Fixture {
        let mut fx = Fixture::connect();
        fx.bus.take_host_frames();
        fx.reply(&version_payload([0, 1, 2, 3], [10, 11, 12, 13], "X1", "S01"));
        fx.reply(&type_info_payload());
        fx.bus.take_host_frames();
        while fx.events.try_recv().is_ok() {}
        fx
    }

    fn reply(&mut self, payload: &[u8]) {
        let wire = self.target.encode_frame(TARGET_ID, payload);
        self.bus.inject(&wire);
        self.medium.pump().unwrap();
    }

    fn key(&self, offset: u32, direction: Direction) -> RegisterKey {
        RegisterKey {
            cpu: CpuId(TARGET_ID),
            offset,
            direction,
        }
    }

    fn drain_events(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }
}

#[test]
fn scan_then_discover_runs_the_handshake() {
    let mut fx = Fixture::connect();

    // Connect broadcast exactly one scan.
    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].cpu_id, 0xFF);
    assert_eq!(frames[0].msg_id, 1);
    assert_eq!(frames[0].payload, [b'V']);

    fx.reply(&version_payload([0, 1, 2, 3], [10, 11, 12, 13], "X1", "S01"));

    let cpus = fx.medium.client().cpus();
    assert_eq!(cpus.len(), 1);
    let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
    assert_eq!(cpu.name(), "X1");
    assert_eq!(cpu.serial_number(), "S01");
    assert_eq!(cpu.protocol_version(), "0.1.2.3");
    assert_eq!(cpu.application_version(), "10.11.12.13");

    // Discovery first announces the CPU, then each catalog register.
    let events = fx.drain_events();
    assert_eq!(events[0], Event::CpuDiscovered(CpuId(TARGET_ID)));
    let added: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, Event::RegisterAdded(_)))
        .collect();
    assert_eq!(added.len(), 3);
    assert_eq!(fx.medium.client().registers().len(), 3);

    // The node gets a clean slate (all 16 slots off), then one GetInfo.
    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), MAX_DEBUG_CHANNELS + 1);
    for (i, frame) in frames[..MAX_DEBUG_CHANNELS].iter().enumerate() {
        assert_eq!(frame.cpu_id, TARGET_ID);
        assert_eq!(frame.payload, [b'C', i as u8, 0]);
    }
    assert_eq!(frames[MAX_DEBUG_CHANNELS].payload, [b'I']);
}

#[test]
fn discovery_works_bytewise_chunked() {
    let mut fx = Fixture::connect();
    fx.bus.take_host_frames();

    let wire = fx
        .target
        .encode_frame(TARGET_ID, &version_payload([0, 0, 0, 1], [1, 0, 0, 0], "X1", "S"));
    for &byte in &wire {
        fx.bus.inject(&[byte]);
        fx.medium.pump().unwrap();
    }
    assert_eq!(fx.medium.client().cpus().len(), 1);
    assert_eq!(
        fx.drain_events()
            .iter()
            .filter(|e| matches!(e, Event::CpuDiscovered(_)))
            .count(),
        1
    );
}

#[test]
fn duplicate_announcements_only_count_messages() {
    let mut fx = Fixture::connect();
    let announce = version_payload([0, 1, 2, 3], [10, 11, 12, 13], "X1", "S01");
    fx.reply(&announce);
    fx.reply(&announce);

    let cpus = fx.medium.client().cpus();
    assert_eq!(cpus.len(), 1);
    let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
    assert_eq!(cpu.message_counter(), 2);
    assert_eq!(cpu.invalid_message_counter(), 0);
    assert_eq!(
        fx.drain_events()
            .iter()
            .filter(|e| matches!(e, Event::CpuDiscovered(_)))
            .count(),
        1
    );
}

#[test]
fn type_table_is_learned_from_get_info() {
    let mut fx = Fixture::connect();
    fx.reply(&version_payload([0, 1, 2, 3], [10, 11, 12, 13], "X1", "S01"));
    fx.reply(&[
        b'I', 0x02, 1, 0x1E, 0x05, 4, 0x1E, 0x0A, 4, 0, 0, 0,
    ]);

    let cpus = fx.medium.client().cpus();
    let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
    assert_eq!(cpu.type_size(VariableType::Bool), Some(1));
    assert_eq!(cpu.type_size(VariableType::Int), Some(4));
    assert_eq!(cpu.type_size(VariableType::TimeStamp), Some(4));
    assert_eq!(cpu.type_size(VariableType::Double), None);
}

#[test]
fn write_acknowledgements_surface_failures_only() {
    let mut fx = Fixture::discovered();
    let counter = fx.key(4096, Direction::Write);

    fx.medium
        .client_mut()
        .write(counter, Value::I32(42))
        .unwrap();
    fx.medium.flush().unwrap();

    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0].payload,
        [b'W', 0x00, 0x10, 0x00, 0x00, 0x80, 0x04, 0x2A, 0x00, 0x00, 0x00]
    );

    // Status 0x00: written, nothing to report.
    fx.reply(&[b'W', 0x00]);
    assert!(fx.drain_events().is_empty());

    // Status 0x01: invalid address, surfaced as a warning event.
    fx.medium
        .client_mut()
        .write(counter, Value::I32(43))
        .unwrap();
    fx.medium.flush().unwrap();
    fx.reply(&[b'W', 0x01]);
    assert_eq!(
        fx.drain_events(),
        vec![Event::Error(ErrorEvent::WriteStatus {
            cpu: CpuId(TARGET_ID),
            status: WriteStatus::InvalidAddress,
        })]
    );
}

#[test]
fn query_round_trip_fires_value_changed_once() {
    let mut fx = Fixture::discovered();
    let speed = fx.key(32, Direction::Read);

    fx.medium.client_mut().query(speed).unwrap();
    fx.medium.flush().unwrap();
    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        frames[0].payload,
        [b'Q', 0x20, 0x00, 0x00, 0x00, 0x00, 0x04]
    );

    let reply = [
        b'Q', 0x20, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x80, 0x3F,
    ];
    fx.reply(&reply);
    assert_eq!(
        fx.drain_events(),
        vec![Event::ValueChanged {
            register: speed,
            value: Value::F32(1.0),
            timestamp: None,
        }]
    );
    let registers = fx.medium.client().registers();
    assert_eq!(registers.get(speed).unwrap().value(), Some(Value::F32(1.0)));

    // The same value again changes nothing and fires nothing.
    fx.reply(&reply);
    assert!(fx.drain_events().is_empty());
}

#[test]
fn channel_stream_delivers_values_tail_first() {
    let mut fx = Fixture::discovered();
    let ticks = fx.key(64, Direction::Read);
    let speed = fx.key(32, Direction::Read);

    fx.medium
        .client_mut()
        .configure_channel(ticks, ChannelMode::OnChange)
        .unwrap();
    fx.medium
        .client_mut()
        .configure_channel(speed, ChannelMode::OnChange)
        .unwrap();
    fx.medium.flush().unwrap();

    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), 2);
    // Slot 0 is the int register, slot 1 the float; both are full configs.
    assert_eq!(
        frames[0].payload,
        [b'C', 0, 1, 0x40, 0x00, 0x00, 0x00, 0x00, 0x04]
    );
    assert_eq!(
        frames[1].payload,
        [b'C', 1, 1, 0x20, 0x00, 0x00, 0x00, 0x00, 0x04]
    );

    // time 0x000010, mask bits 0 and 1, then the slot-0 int and slot-1
    // float in slot order; the decoder takes the float from the tail first.
    let mut payload = vec![b'R', 0x10, 0x00, 0x00, 0x03, 0x00];
    payload.extend_from_slice(&7i32.to_le_bytes());
    payload.extend_from_slice(&2.5f32.to_le_bytes());
    fx.reply(&payload);

    let events = fx.drain_events();
    assert_eq!(
        events,
        vec![
            Event::ValueChanged {
                register: speed,
                value: Value::F32(2.5),
                timestamp: Some(16),
            },
            Event::ValueChanged {
                register: ticks,
                value: Value::I32(7),
                timestamp: Some(16),
            },
        ]
    );
    let registers = fx.medium.client().registers();
    assert_eq!(registers.get(ticks).unwrap().timestamp(), Some(16));
    assert_eq!(registers.get(speed).unwrap().timestamp(), Some(16));
}

#[test]
fn msg_id_wraps_without_ever_emitting_zero() {
    let mut client = DebugClient::new();
    for _ in 0..300 {
        client.scan();
    }
    let frames: Vec<Frame> = client
        .take_outbound()
        .iter()
        .flat_map(|wire| deframe(wire))
        .collect();
    assert_eq!(frames.len(), 300);
    assert!(frames.iter().all(|f| f.cpu_id == 0xFF));
    assert!(frames.iter().all(|f| f.msg_id != 0));
    let ids: Vec<u8> = frames.iter().map(|f| f.msg_id).collect();
    assert_eq!(ids[0], 1);
    assert_eq!(ids[254], 255);
    assert_eq!(ids[255], 1);
}

#[test]
fn channel_slots_are_bounded_dense_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let cpu_dir = dir.path().join("X1");
    std::fs::create_dir_all(&cpu_dir).unwrap();
    let regs: Vec<String> = (0..20)
        .map(|i| {
            format!(
                r#"{{"id":{i},"name":"r{i}","ReadWrite":"Read","Type":"int32_t","Source":"HandWrittenOffset","DerefDepth":0,"Offset":{}}}"#,
                0x100 + i * 4
            )
        })
        .collect();
    std::fs::write(
        cpu_dir.join("10.11.12.13.json"),
        format!(r#"{{"Registers":[{}]}}"#, regs.join(",")),
    )
    .unwrap();

    let client = DebugClient::with_catalog_loader(Box::new(JsonCatalogLoader::new(dir.path())));
    let bus = SharedBus::default();
    let mut medium = Medium::new(bus.clone(), client);
    medium.connect().unwrap();
    let mut target = Framer::new();
    bus.inject(&target.encode_frame(
        TARGET_ID,
        &version_payload([0, 1, 2, 3], [10, 11, 12, 13], "X1", "S01"),
    ));
    bus.inject(&target.encode_frame(TARGET_ID, &type_info_payload()));
    medium.pump().unwrap();

    let key = |i: u32| RegisterKey {
        cpu: CpuId(TARGET_ID),
        offset: 0x100 + i * 4,
        direction: Direction::Read,
    };

    for i in 0..MAX_DEBUG_CHANNELS as u32 {
        medium
            .client_mut()
            .configure_channel(key(i), ChannelMode::OnChange)
            .unwrap();
    }
    // Slot 17 does not exist.
    assert!(matches!(
        medium
            .client_mut()
            .configure_channel(key(16), ChannelMode::LowSpeed),
        Err(DebugError::NoChannelSlot { .. })
    ));

    let check_invariants = |medium: &Medium<SharedBus>| {
        let cpus = medium.client().cpus();
        let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
        let channels = cpu.debug_channels();
        assert!(channels.len() <= MAX_DEBUG_CHANNELS);
        let mut seen = std::collections::HashSet::new();
        for &k in channels {
            assert!(seen.insert(k), "register appears twice in channel list");
            let registers = medium.client().registers();
            assert_ne!(registers.get(k).unwrap().channel_mode(), ChannelMode::Off);
        }
    };
    check_invariants(&medium);

    // Turning a channel off collapses the list and frees the last index for
    // the register that could not fit before.
    medium
        .client_mut()
        .configure_channel(key(3), ChannelMode::Off)
        .unwrap();
    check_invariants(&medium);
    {
        let cpus = medium.client().cpus();
        let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
        assert_eq!(cpu.debug_channels().len(), MAX_DEBUG_CHANNELS - 1);
    }
    medium
        .client_mut()
        .configure_channel(key(16), ChannelMode::LowSpeed)
        .unwrap();
    check_invariants(&medium);
    let cpus = medium.client().cpus();
    let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
    assert_eq!(cpu.debug_channels().len(), MAX_DEBUG_CHANNELS);
    assert_eq!(cpu.debug_channels()[MAX_DEBUG_CHANNELS - 1], key(16));
}

#[test]
fn missing_catalog_is_nonfatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut client =
        DebugClient::with_catalog_loader(Box::new(JsonCatalogLoader::new(dir.path())));
    let events = client.subscribe();
    let bus = SharedBus::default();
    let mut medium = Medium::new(bus.clone(), client);
    medium.connect().unwrap();

    let mut target = Framer::new();
    bus.inject(&target.encode_frame(
        TARGET_ID,
        &version_payload([0, 1, 2, 3], [1, 0, 0, 0], "Y2", "S99"),
    ));
    medium.pump().unwrap();

    let events: Vec<Event> = events.try_iter().collect();
    assert!(events.contains(&Event::CpuDiscovered(CpuId(TARGET_ID))));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Error(ErrorEvent::LoadFailed { .. }))));
    // The CPU stays usable for raw requests.
    assert!(medium.client().cpus().contains(CpuId(TARGET_ID)));
    medium
        .client_mut()
        .get_decimation(CpuId(TARGET_ID))
        .unwrap();
}

#[test]
fn frames_from_unknown_cpus_are_dropped() {
    let mut fx = Fixture::discovered();
    let wire = fx
        .target
        .encode_frame(9, &[b'Q', 0x20, 0, 0, 0, 0x00, 0x04, 1, 2, 3, 4]);
    fx.bus.inject(&wire);
    fx.medium.pump().unwrap();
    assert!(fx.drain_events().is_empty());
    assert_eq!(fx.medium.client().cpus().len(), 1);
    assert!(!fx.medium.client().cpus().contains(CpuId(9)));
}

#[test]
fn corrupt_frames_bump_the_invalid_counter() {
    let mut fx = Fixture::discovered();
    let mut wire = fx.target.encode_frame(TARGET_ID, &[b'Q', 0x41, 0x45]);
    // Flip a bit in the 0x41 payload byte; the stored CRC then no longer
    // matches, but the source address is still intact.
    let pos = wire.iter().position(|&b| b == 0x41).unwrap();
    wire[pos] ^= 0x01;
    fx.bus.inject(&wire);
    fx.medium.pump().unwrap();

    let cpus = fx.medium.client().cpus();
    let cpu = cpus.get(CpuId(TARGET_ID)).unwrap();
    assert_eq!(cpu.invalid_message_counter(), 1);
    assert!(cpu.invalid_message_counter() <= cpu.message_counter());
}

#[test]
fn decimation_round_trip() {
    let mut fx = Fixture::discovered();
    fx.medium
        .client_mut()
        .set_decimation(CpuId(TARGET_ID), 10)
        .unwrap();
    fx.medium.client_mut().get_decimation(CpuId(TARGET_ID)).unwrap();
    fx.medium.flush().unwrap();

    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, [b'D', 10]);
    assert_eq!(frames[1].payload, [b'D']);

    fx.reply(&[b'D', 9]);
    let cpus = fx.medium.client().cpus();
    assert_eq!(cpus.get(CpuId(TARGET_ID)).unwrap().decimation(), 9);
}

#[test]
fn reset_time_is_a_bare_command() {
    let mut fx = Fixture::discovered();
    fx.medium.client_mut().reset_time(CpuId(TARGET_ID)).unwrap();
    fx.medium.flush().unwrap();
    let frames = fx.bus.take_host_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, [b'T']);

    assert!(matches!(
        fx.medium.client_mut().reset_time(CpuId(77)),
        Err(DebugError::UnknownCpu(_))
    ));
}

#[test]
fn debug_strings_are_forwarded() {
    let mut fx = Fixture::discovered();
    let mut payload = vec![b'S'];
    payload.extend_from_slice(b"assert failed in motor.c:42");
    fx.reply(&payload);
    assert_eq!(
        fx.drain_events(),
        vec![Event::DebugString {
            cpu: CpuId(TARGET_ID),
            text: "assert failed in motor.c:42".into(),
        }]
    );
}
