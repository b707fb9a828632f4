// Dispatcher + bring-up machine, with recorded process creation instead of
// real daemons.

use async_trait::async_trait;
use iotwifi_core::bringup::BringupMachine;
use iotwifi_core::bus::{
    BusHandle, BusMessage, Dispatcher, EventBus, EventHandler, OutputEvent, Reaction,
    ShutdownReason, StreamOrigin,
};
use iotwifi_core::config::parse_config;
use iotwifi_core::supervisor::{CommandId, CommandSpec, ExitEvent};
use iotwifi_core::traits::{CommandRunner, ProcessSpawner};
use iotwifi_core::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

// ── Helpers ─────────────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<String>>>;

/// Records spawns into the shared log as `spawn <id>: <command line>`.
struct RecordingSpawner {
    log: Log,
    reaped: Arc<Mutex<Vec<CommandId>>>,
    fail_program: Option<&'static str>,
}

impl ProcessSpawner for RecordingSpawner {
    fn spawn(&mut self, spec: CommandSpec) -> Result<()> {
        if self.fail_program == Some(spec.program.as_str()) {
            return Err(Error::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("spawn {}: {}", spec.id, spec.command_line()));
        Ok(())
    }

    fn reaped(&mut self, exit: &ExitEvent) {
        self.reaped.lock().unwrap().push(exit.id.clone());
    }
}

/// Records one-shot runs into the shared log as `run: <command line>`.
struct RecordingRunner {
    log: Log,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.log.lock().unwrap().push(format!("run: {}", line));
        Ok(Vec::new())
    }
}

struct Harness {
    bus: BusHandle,
    log: Log,
    reaped: Arc<Mutex<Vec<CommandId>>>,
    dispatch: JoinHandle<ShutdownReason>,
}

const CONFIG: &str = r#"{
    "dnsmasq_cfg": {
        "address": "/#/192.168.27.1",
        "dhcp_range": "192.168.27.100,192.168.27.150,1h",
        "vendor_class": "set:device,IoT"
    },
    "host_apd_cfg": {
        "ssid": "iotwifi",
        "wpa_passphrase": "iotwifipass",
        "channel": "6",
        "ip": "192.168.27.1"
    },
    "wpa_supplicant_cfg": { "cfg_file": "/etc/wpa_supplicant/wpa_supplicant.conf" }
}"#;

fn start(fail_program: Option<&'static str>) -> Harness {
    let config = Arc::new(parse_config(CONFIG).unwrap());
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let reaped = Arc::new(Mutex::new(Vec::new()));

    let (bus, rx) = EventBus::channel();
    let spawner = RecordingSpawner {
        log: log.clone(),
        reaped: reaped.clone(),
        fail_program,
    };
    let runner = Arc::new(RecordingRunner { log: log.clone() });

    let machine = BringupMachine::new(config);
    let mut dispatcher = Dispatcher::new(rx, bus.clone(), Box::new(spawner), runner);
    dispatcher.register(machine.command_ids(), Box::new(machine));

    Harness {
        bus,
        log,
        reaped,
        dispatch: tokio::spawn(dispatcher.run()),
    }
}

fn output(id: &str, line: &str, origin: StreamOrigin) -> BusMessage {
    BusMessage::Output(OutputEvent {
        id: CommandId::new(id),
        program: "test".to_string(),
        line: line.to_string(),
        origin,
        pid: Some(4242),
    })
}

impl Harness {
    fn emit(&self, id: &str, line: &str) {
        self.bus.send(output(id, line, StreamOrigin::Stdout));
    }

    /// Waits until the log holds at least `n` entries.
    async fn wait_for_log(&self, n: usize) -> Vec<String> {
        for _ in 0..200 {
            {
                let log = self.log.lock().unwrap();
                if log.len() >= n {
                    return log.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("log never reached {} entries: {:?}", n, self.log.lock().unwrap());
    }

    async fn stop(self) -> (ShutdownReason, Vec<String>) {
        self.bus.request_kill();
        let reason = tokio::time::timeout(Duration::from_secs(2), self.dispatch)
            .await
            .expect("dispatch loop did not stop")
            .unwrap();
        let log = self.log.lock().unwrap().clone();
        (reason, log)
    }
}

// ── Cascade ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_absent_interface_is_added_then_rechecked_once() {
    let h = start(None);
    h.emit(
        "ifconfig_uap0",
        "ifconfig: uap0: error fetching interface information: Device not found",
    );
    h.wait_for_log(2).await;

    let (reason, log) = h.stop().await;
    assert_eq!(reason, ShutdownReason::Killed);
    assert_eq!(
        log,
        vec![
            "run: iw phy phy0 interface add uap0 type __ap",
            "spawn ifconfig_uap0_recheck: ifconfig uap0",
        ]
    );
}

#[tokio::test]
async fn test_present_interface_runs_up_configure_hostapd_in_order() {
    let h = start(None);
    h.emit("ifconfig_uap0", "uap0      Link encap:Ethernet  HWaddr b8:27:eb:00:00:01");
    h.emit("ifconfig_uap0", "          UP BROADCAST MULTICAST  MTU:1500  Metric:1");
    h.wait_for_log(3).await;

    let (_, log) = h.stop().await;
    assert_eq!(
        log,
        vec![
            "run: ifconfig uap0 up",
            "run: ifconfig uap0 192.168.27.1",
            "spawn hostapd: hostapd -d /dev/stdin",
        ]
    );
}

#[tokio::test]
async fn test_full_cascade_reaches_dnsmasq() {
    let h = start(None);
    h.emit("ifconfig_uap0", "Device not found");
    h.wait_for_log(2).await;
    h.emit("ifconfig_uap0_recheck", "uap0 Link encap:Ethernet");
    h.wait_for_log(5).await;
    h.emit("hostapd", "uap0: AP-ENABLED ");
    h.wait_for_log(6).await;
    // driver chatter: the second AP-ENABLED is latched
    h.emit("hostapd", "uap0: AP-ENABLED ");

    let (reason, log) = h.stop().await;
    assert_eq!(reason, ShutdownReason::Killed);
    assert_eq!(log.len(), 6);
    assert!(log[5].starts_with("spawn dnsmasq: dnsmasq --no-hosts --keep-in-foreground"));
    assert!(log[5].contains("--address=/#/192.168.27.1"));
    assert!(log[5].contains("--dhcp-vendorclass=set:device,IoT"));
}

#[tokio::test]
async fn test_ap_disabled_stops_with_distinct_reason() {
    let h = start(None);
    h.emit("ifconfig_uap0", "uap0 Link encap:Ethernet");
    h.wait_for_log(3).await;
    h.bus.send(output("hostapd", "uap0: AP-DISABLED ", StreamOrigin::Stderr));

    let reason = tokio::time::timeout(Duration::from_secs(2), h.dispatch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::ApDisabled);
    assert_ne!(reason.exit_code(), ShutdownReason::Killed.exit_code());
    assert_ne!(reason.exit_code(), 0);
}

#[tokio::test]
async fn test_hostapd_spawn_failure_is_fatal() {
    let h = start(Some("hostapd"));
    h.emit("ifconfig_uap0", "uap0 Link encap:Ethernet");

    let reason = tokio::time::timeout(Duration::from_secs(2), h.dispatch)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reason, ShutdownReason::SpawnFailed { program, .. } if program == "hostapd"));
}

// ── Dispatch loop ───────────────────────────────────────────────────

#[tokio::test]
async fn test_unrouted_events_and_spawn_requests() {
    let h = start(None);
    h.emit("dnsmasq", "dnsmasq: started, version 2.85");
    h.bus.spawn(CommandSpec::new("wpa_supplicant", "wpa_supplicant").arg("-iwlan0"));
    h.wait_for_log(1).await;

    let (_, log) = h.stop().await;
    assert_eq!(log, vec!["spawn wpa_supplicant: wpa_supplicant -iwlan0"]);
}

#[tokio::test]
async fn test_exit_events_reach_the_spawner() {
    let h = start(None);
    h.bus.send(BusMessage::Exited(ExitEvent {
        id: CommandId::new("ifconfig_uap0"),
        program: "ifconfig".to_string(),
        code: Some(1),
    }));
    let reaped = h.reaped.clone();
    let (reason, _) = h.stop().await;

    assert_eq!(reason, ShutdownReason::Killed);
    assert_eq!(*reaped.lock().unwrap(), vec![CommandId::new("ifconfig_uap0")]);
}

#[tokio::test]
async fn test_fatal_message_stops_the_loop() {
    let h = start(None);
    h.bus.fatal(ShutdownReason::SpawnFailed {
        program: "iw".to_string(),
        reason: "not installed".to_string(),
    });

    let reason = tokio::time::timeout(Duration::from_secs(2), h.dispatch)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reason, ShutdownReason::SpawnFailed { .. }));
}

/// Counts events and records their stream flag.
struct Counter(Arc<Mutex<Vec<(String, bool)>>>);

impl EventHandler for Counter {
    fn handle(&mut self, event: &OutputEvent) -> Reaction {
        self.0.lock().unwrap().push((event.line.clone(), event.is_error()));
        Reaction::Ignore
    }
}

#[tokio::test]
async fn test_handlers_see_events_in_arrival_order_and_kill_is_reserved() {
    let (bus, rx) = EventBus::channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let spawner = RecordingSpawner {
        log: Arc::new(Mutex::new(Vec::new())),
        reaped: Arc::new(Mutex::new(Vec::new())),
        fail_program: None,
    };
    let runner = Arc::new(RecordingRunner {
        log: Arc::new(Mutex::new(Vec::new())),
    });
    let mut dispatcher = Dispatcher::new(rx, bus.clone(), Box::new(spawner), runner);
    dispatcher.register(
        [CommandId::new("probe"), CommandId::kill()],
        Box::new(Counter(seen.clone())),
    );
    assert!(dispatcher.is_registered(&CommandId::kill()));

    for i in 0..3 {
        bus.send(output("probe", &format!("line {}", i), StreamOrigin::Stdout));
    }
    bus.send(output("probe", "oops", StreamOrigin::Stderr));
    bus.request_kill();

    let reason = dispatcher.run().await;
    assert_eq!(reason, ShutdownReason::Killed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("line 0".to_string(), false),
            ("line 1".to_string(), false),
            ("line 2".to_string(), false),
            ("oops".to_string(), true),
        ]
    );
}
