// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests: two full link instances bridged by an in-memory
//! loopback radio and a shared manual clock.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use duolink::config::{BROADCAST_ADDRESS, KEY_LEN, MAC_LEN};
use duolink::error::Result;
use duolink::gpio::{DigitalInput, DigitalOutput};
use duolink::protocol::frame;
use duolink::store::{KvNv, MemoryPreferences};
use duolink::{
    Clock, KvStore, Link, LinkState, ManualClock, PairingRecord, PairingStore, RadioDriver,
    RadioEvents,
};

const ADDR_A: [u8; MAC_LEN] = [0xAA; MAC_LEN];
const ADDR_B: [u8; MAC_LEN] = [0xBB; MAC_LEN];

// ----------------------------------------------------------------------
// Shared clock
// ----------------------------------------------------------------------

#[derive(Clone)]
struct SharedClock(Rc<ManualClock>);

impl Clock for SharedClock {
    fn now_ms(&self) -> u32 {
        self.0.now_ms()
    }
}

// ----------------------------------------------------------------------
// Loopback air
// ----------------------------------------------------------------------

#[derive(Default)]
struct AirState {
    sinks: Vec<([u8; MAC_LEN], RadioEvents)>,
    drop_unicasts: bool,
}

#[derive(Clone, Default)]
struct Air(Rc<RefCell<AirState>>);

impl Air {
    fn join(&self, address: [u8; MAC_LEN], events: RadioEvents) {
        self.0.borrow_mut().sinks.push((address, events));
    }

    fn set_drop_unicasts(&self, drop: bool) {
        self.0.borrow_mut().drop_unicasts = drop;
    }
}

/// Radio driver over the loopback air. Unicasts deliver immediately and
/// self-confirm, the way ESP-NOW's send callback fires once the frame has
/// left; a dropped-unicast mode simulates the peer going out of range.
struct TestRadio {
    air: Air,
    address: [u8; MAC_LEN],
    events: Option<RadioEvents>,
    channel: u8,
    power: u8,
    peers: Vec<[u8; MAC_LEN]>,
}

impl TestRadio {
    fn new(air: Air, address: [u8; MAC_LEN]) -> Self {
        Self {
            air,
            address,
            events: None,
            channel: 1,
            power: 80,
            peers: Vec::new(),
        }
    }
}

impl RadioDriver for TestRadio {
    fn attach(&mut self, events: RadioEvents) {
        self.air.join(self.address, events.clone());
        self.events = Some(events);
    }

    fn init(&mut self, channel: u8) -> Result<()> {
        self.channel = channel;
        Ok(())
    }

    fn local_address(&self) -> [u8; MAC_LEN] {
        self.address
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn set_channel(&mut self, channel: u8) -> Result<()> {
        self.channel = channel;
        Ok(())
    }

    fn max_tx_power(&self) -> u8 {
        self.power
    }

    fn set_max_tx_power(&mut self, quarter_dbm: u8) -> Result<()> {
        self.power = quarter_dbm;
        Ok(())
    }

    fn set_primary_key(&mut self, _key: &[u8; KEY_LEN]) -> Result<()> {
        Ok(())
    }

    fn register_peer(
        &mut self,
        address: [u8; MAC_LEN],
        _channel: u8,
        _key: Option<&[u8; KEY_LEN]>,
    ) -> Result<()> {
        if !self.peers.contains(&address) {
            self.peers.push(address);
        }
        Ok(())
    }

    fn deregister_peer(&mut self, address: [u8; MAC_LEN]) -> Result<()> {
        self.peers.retain(|p| *p != address);
        Ok(())
    }

    fn has_peer(&self, address: [u8; MAC_LEN]) -> bool {
        self.peers.contains(&address)
    }

    fn send(&mut self, dest: [u8; MAC_LEN], frame: &[u8]) -> Result<()> {
        let state = self.air.0.borrow();
        if dest == BROADCAST_ADDRESS {
            for (address, sink) in &state.sinks {
                if *address != self.address {
                    sink.rx(self.address, frame);
                }
            }
            return Ok(());
        }
        if state.drop_unicasts {
            // No delivery and no confirmation: the sender times out.
            return Ok(());
        }
        for (address, sink) in &state.sinks {
            if *address == dest {
                sink.rx(self.address, frame);
            }
        }
        if let Some(events) = &self.events {
            events.tx_confirm(dest, true);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Shared preferences store (test keeps a handle for inspection)
// ----------------------------------------------------------------------

#[derive(Clone, Default)]
struct SharedPrefs(Rc<RefCell<MemoryPreferences>>);

impl KvNv for SharedPrefs {
    fn get(&mut self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<Option<usize>> {
        self.0.borrow_mut().get(namespace, key, buf)
    }

    fn put(&mut self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        self.0.borrow_mut().put(namespace, key, value)
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<()> {
        self.0.borrow_mut().remove(namespace, key)
    }
}

// ----------------------------------------------------------------------
// Peer harness
// ----------------------------------------------------------------------

#[derive(Clone, Default)]
struct Counters {
    pairing: Rc<Cell<u32>>,
    paired: Rc<Cell<u32>>,
    connected: Rc<Cell<u32>>,
    disconnected: Rc<Cell<u32>>,
}

struct Peer {
    link: Link<TestRadio, KvStore<SharedPrefs>, SharedClock>,
    prefs: SharedPrefs,
    counters: Counters,
}

fn make_peer(air: &Air, clock: &Rc<ManualClock>, address: [u8; MAC_LEN], name: &str) -> Peer {
    let prefs = SharedPrefs::default();
    let counters = Counters::default();
    let mut link = Link::new(
        TestRadio::new(air.clone(), address),
        KvStore::new(prefs.clone()),
        SharedClock(clock.clone()),
    );
    link.set_local_name(name);
    let c = counters.pairing.clone();
    link.set_pairing_callback(move || c.set(c.get() + 1));
    let c = counters.paired.clone();
    link.set_paired_callback(move || c.set(c.get() + 1));
    let c = counters.connected.clone();
    link.set_connected_callback(move || c.set(c.get() + 1));
    let c = counters.disconnected.clone();
    link.set_disconnected_callback(move || c.set(c.get() + 1));
    Peer {
        link,
        prefs,
        counters,
    }
}

fn pump_until(
    clock: &Rc<ManualClock>,
    peers: &mut [&mut Peer],
    step_ms: u32,
    max_steps: u32,
    mut done: impl FnMut(&[&mut Peer]) -> bool,
) -> bool {
    for _ in 0..max_steps {
        clock.advance(step_ms);
        for peer in peers.iter_mut() {
            peer.link.tick();
        }
        if done(peers) {
            return true;
        }
    }
    false
}

fn stored(prefs: &SharedPrefs) -> Option<PairingRecord> {
    KvStore::new(prefs.clone()).load()
}

fn fresh_connected_pair() -> (Air, Rc<ManualClock>, Peer, Peer) {
    let air = Air::default();
    let clock = Rc::new(ManualClock::new());
    let mut a = make_peer(&air, &clock, ADDR_A, "node-a");
    let mut b = make_peer(&air, &clock, ADDR_B, "node-b");
    a.link.begin(0, 1);
    b.link.begin(0, 1);
    let converged = pump_until(&clock, &mut [&mut a, &mut b], 300, 400, |peers| {
        peers.iter().all(|p| p.link.connected())
    });
    assert!(converged, "pair never reached connected");
    (air, clock, a, b)
}

// ----------------------------------------------------------------------
// Scenarios
// ----------------------------------------------------------------------

#[test]
fn test_fresh_pair_symmetric_start() {
    let (_air, _clock, a, b) = fresh_connected_pair();

    assert_eq!(a.link.state(), LinkState::Connected);
    assert_eq!(b.link.state(), LinkState::Connected);
    assert!(a.counters.pairing.get() >= 1);
    assert!(b.counters.pairing.get() >= 1);
    assert_eq!(a.counters.paired.get(), 1);
    assert_eq!(b.counters.paired.get(), 1);
    assert_eq!(a.counters.connected.get(), 1);
    assert_eq!(b.counters.connected.get(), 1);

    // Names crossed over during pairing.
    assert_eq!(a.link.remote_name(), Some("node-b"));
    assert_eq!(b.link.remote_name(), Some("node-a"));

    // Both wrote the pairing, and both hold the same agreed keys
    // (B's choice prevailed because BB > AA).
    let ra = stored(&a.prefs).expect("A persisted");
    let rb = stored(&b.prefs).expect("B persisted");
    assert_eq!(ra.remote_address, ADDR_B);
    assert_eq!(rb.remote_address, ADDR_A);
    assert_eq!(ra.primary_key, rb.primary_key);
    assert_eq!(ra.local_key, rb.local_key);
    assert_ne!(ra.primary_key, [0u8; KEY_LEN]);
}

#[test]
fn test_warm_start_skips_pairing() {
    let air = Air::default();
    let clock = Rc::new(ManualClock::new());
    let mut a = make_peer(&air, &clock, ADDR_A, "node-a");
    KvStore::new(a.prefs.clone())
        .save(&PairingRecord {
            remote_address: ADDR_B,
            primary_key: [0x11; KEY_LEN],
            local_key: [0x22; KEY_LEN],
            remote_name: Some("node-b".to_string()),
        })
        .expect("preload");

    a.link.begin(0, 1);
    clock.advance(100);
    a.link.tick();

    // One tick: uninitialised -> initialised -> connecting, paired fired once.
    assert_eq!(a.link.state(), LinkState::Connecting);
    assert_eq!(a.counters.paired.get(), 1);
    assert_eq!(a.counters.pairing.get(), 0);
    assert_eq!(a.link.remote_name(), Some("node-b"));

    clock.advance(300);
    a.link.tick();
    assert_eq!(a.counters.paired.get(), 1);
}

#[test]
fn test_reset_via_pairing_button() {
    let air = Air::default();
    let clock = Rc::new(ManualClock::new());
    let button = Rc::new(Cell::new(true)); // normally-open, pull-up: high = idle
    let mut a = make_peer(&air, &clock, ADDR_A, "node-a");
    let mut b = make_peer(&air, &clock, ADDR_B, "node-b");

    struct ButtonPin(Rc<Cell<bool>>);
    impl DigitalInput for ButtonPin {
        fn read(&self) -> bool {
            self.0.get()
        }
    }
    a.link.configure_pairing_button(ButtonPin(button.clone()), false);

    a.link.begin(0, 1);
    b.link.begin(0, 1);
    let converged = pump_until(&clock, &mut [&mut a, &mut b], 300, 400, |peers| {
        peers.iter().all(|p| p.link.connected())
    });
    assert!(converged);
    assert!(stored(&a.prefs).is_some());

    // Hold the button past five seconds.
    button.set(false);
    pump_until(&clock, &mut [&mut a, &mut b], 300, 20, |peers| {
        peers[0].counters.disconnected.get() > 0
    });

    assert_eq!(a.counters.disconnected.get(), 1);
    assert!(!a.link.connected());
    assert!(stored(&a.prefs).is_none());
    assert_eq!(a.link.remote_name(), None);

    // Released, the machine restarts a pairing cycle with fresh keys.
    button.set(true);
    clock.advance(300);
    a.link.tick();
    assert_eq!(a.link.state(), LinkState::Pairing);
    assert!(a.counters.pairing.get() >= 2);
}

#[test]
fn test_link_degradation_and_recovery() {
    let (air, clock, mut a, mut b) = fresh_connected_pair();

    // The busy-wait in the send path polls the clock; let each poll move
    // time forward so unconfirmed sends run into their timeout.
    clock.set_auto_step(1);
    air.set_drop_unicasts(true);

    let dropped = pump_until(&clock, &mut [&mut a, &mut b], 60, 600, |peers| {
        peers.iter().all(|p| p.link.state() == LinkState::Disconnected)
    });
    assert!(dropped, "sustained loss never dropped the link");
    assert!(a.counters.disconnected.get() >= 1);
    assert!(a.link.link_quality_score() < 12);

    air.set_drop_unicasts(false);
    let recovered = pump_until(&clock, &mut [&mut a, &mut b], 60, 600, |peers| {
        peers.iter().all(|p| p.link.connected())
    });
    assert!(recovered, "link never recovered");
    assert!(a.counters.connected.get() >= 2);
    assert!(a.link.link_quality_score() >= 18);
}

#[test]
fn test_corrupted_pairing_frame_is_ignored() {
    let air = Air::default();
    let clock = Rc::new(ManualClock::new());
    let mut a = make_peer(&air, &clock, ADDR_A, "node-a");
    a.link.begin(0, 1);
    clock.advance(100);
    a.link.tick();
    assert_eq!(a.link.state(), LinkState::Pairing);

    let mut buf = [0u8; 250];
    let len = frame::encode_pairing(
        &mut buf,
        11,
        &ADDR_B,
        &[0x33; KEY_LEN],
        &[0x44; KEY_LEN],
        b"node-b",
    )
    .expect("encode");
    buf[len - 1] ^= 0x01;
    a.link.events().rx(ADDR_B, &buf[..len]);

    clock.advance(300);
    a.link.tick();

    assert_eq!(a.link.state(), LinkState::Pairing);
    assert_eq!(a.counters.paired.get(), 0);
    assert_eq!(a.link.remote_name(), None);
}

#[test]
fn test_typed_message_roundtrip_over_link() {
    let (_air, clock, mut a, mut b) = fresh_connected_pair();

    let received: Rc<RefCell<Vec<(bool, u16, String, [i32; 3], f32)>>> =
        Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    b.link.set_message_callback(move |msg| {
        let flag = msg.retrieve::<bool>().expect("bool");
        let word = msg.retrieve::<u16>().expect("u16");
        let text = msg.retrieve_str().expect("str");
        let mut arr = [0i32; 3];
        msg.retrieve_array(&mut arr).expect("array");
        let real = msg.retrieve::<f32>().expect("f32");
        sink.borrow_mut().push((flag, word, text, arr, real));
    });

    assert!(a.link.add(true));
    assert!(a.link.add(0x1234u16));
    assert!(a.link.add_str("hi"));
    assert!(a.link.add_array(&[-1i32, 0, 1]));
    assert!(a.link.add(3.5f32));
    assert!(a.link.send_message(true));

    clock.advance(50);
    b.link.tick();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], (true, 0x1234, "hi".to_string(), [-1, 0, 1], 3.5));
}

#[test]
fn test_indicator_steady_on_when_connected() {
    struct LedPin(Rc<Cell<bool>>);
    impl DigitalOutput for LedPin {
        fn write(&mut self, high: bool) {
            self.0.set(high);
        }
    }

    let air = Air::default();
    let clock = Rc::new(ManualClock::new());
    let led = Rc::new(Cell::new(false));
    let mut a = make_peer(&air, &clock, ADDR_A, "node-a");
    let mut b = make_peer(&air, &clock, ADDR_B, "node-b");
    a.link.configure_indicator(LedPin(led.clone()), false);

    a.link.begin(0, 1);
    b.link.begin(0, 1);
    let converged = pump_until(&clock, &mut [&mut a, &mut b], 300, 400, |peers| {
        peers.iter().all(|p| p.link.connected())
    });
    assert!(converged);
    assert!(led.get(), "indicator should be steady on when connected");
}

#[test]
fn test_send_message_refused_when_not_connected() {
    let air = Air::default();
    let clock = Rc::new(ManualClock::new());
    let mut a = make_peer(&air, &clock, ADDR_A, "node-a");
    a.link.begin(0, 1);
    assert!(a.link.add(1u8));
    assert!(!a.link.send_message(true));
}

#[test]
fn test_second_inbound_message_dropped_until_cleared() {
    let (_air, clock, mut a, mut b) = fresh_connected_pair();
    // No message callback on B: the first frame parks in the inbox.
    assert!(a.link.add(7u32));
    assert!(a.link.send_message(true));
    clock.advance(50);
    b.link.tick();
    // Without a callback the link clears the inbox itself.
    assert_eq!(b.link.data_available(), 0);

    // Now register a callback that leaves the message unread.
    b.link.set_message_callback(|_msg| {});
    assert!(a.link.add(8u32));
    assert!(a.link.send_message(true));
    clock.advance(50);
    b.link.tick();
    assert_eq!(b.link.data_available(), 1);

    // A second message arrives while the inbox is occupied: dropped.
    assert!(a.link.add(9u32));
    assert!(a.link.send_message(true));
    clock.advance(50);
    b.link.tick();
    assert_eq!(b.link.retrieve::<u32>(), Some(8));
    b.link.clear_received();
    assert_eq!(b.link.data_available(), 0);
}
