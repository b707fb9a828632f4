//! Wires the supervisor, dispatch loop, bring-up machine, station side and
//! HTTP surface together, and reports why the service stopped.

use crate::bringup::{BringupMachine, BringupState, commands};
use crate::bus::{BusHandle, Dispatcher, EventBus, ShutdownReason};
use crate::config::SetupConfig;
use crate::supervisor::{ProcessSupervisor, SystemRunner};
use crate::traits::CommandRunner;
use crate::web_server::{AppState, start_web_server};
use crate::wpa::WpaConnectionManager;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{info, warn};

/// Upper bound on waiting for the AP before the supplicant is started anyway.
pub const AP_READY_TIMEOUT: Duration = Duration::from_secs(20);
pub const RESCAN_PERIOD: Duration = Duration::from_secs(30);

/// Runs until the dispatch loop stops, returning its reason. An error means
/// the HTTP server or a core task died.
pub async fn run(config: SetupConfig, listen: SocketAddr) -> Result<ShutdownReason> {
    info!("🚀 Starting IoT Wifi...");
    let config = Arc::new(config);
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    let (bus, rx) = EventBus::channel();
    let supervisor = ProcessSupervisor::new(bus.clone());

    // All handlers are in place before the first process is spawned.
    let machine = BringupMachine::new(config.clone());
    let bringup_state = machine.subscribe();
    let first_check = machine.initial_check();
    let mut dispatcher = Dispatcher::new(rx, bus.clone(), Box::new(supervisor), runner.clone());
    dispatcher.register(machine.command_ids(), Box::new(machine));

    bus.spawn(first_check);
    let dispatch = tokio::spawn(dispatcher.run());

    let wpa = Arc::new(WpaConnectionManager::new(runner, config.interfaces.sta.clone()));
    let web = start_web_server(
        listen,
        Arc::new(AppState {
            wpa: wpa.clone(),
            bus: bus.clone(),
        }),
    );
    let station = tokio::spawn(station_mode(
        config,
        bringup_state,
        bus,
        wpa,
        AP_READY_TIMEOUT,
        RESCAN_PERIOD,
    ));

    let outcome = tokio::select! {
        joined = dispatch => joined.map_err(|e| Error::Io(std::io::Error::other(e))),
        served = web => match served {
            Ok(Ok(())) => Err(Error::Io(std::io::Error::other("HTTP server stopped"))),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Io(std::io::Error::other(e))),
        },
    };

    station.abort();
    outcome
}

/// Waits until the bring-up machine reports a running AP.
pub async fn wait_for_ap(rx: &mut watch::Receiver<BringupState>, max_wait: Duration) -> Result<()> {
    let ready = timeout(max_wait, async {
        rx.wait_for(|state| state.is_ap_ready()).await.map(|_| ())
    })
    .await;

    match ready {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(Error::CommandFailed(
            "bring-up stopped before the access point was ready".to_string(),
        )),
        Err(_) => Err(Error::Timeout("access point readiness".to_string())),
    }
}

/// Starts the supplicant once the AP is up (or `ready_timeout` passed), then
/// rescans every `rescan_period`. Never returns.
async fn station_mode(
    config: Arc<SetupConfig>,
    mut bringup_state: watch::Receiver<BringupState>,
    bus: BusHandle,
    wpa: Arc<WpaConnectionManager>,
    ready_timeout: Duration,
    rescan_period: Duration,
) {
    match wait_for_ap(&mut bringup_state, ready_timeout).await {
        Ok(()) => info!("Access point ready, starting wpa_supplicant"),
        Err(e) => warn!(error = %e, "starting wpa_supplicant without a ready access point"),
    }
    bus.spawn(commands::wpa_supplicant(&config));

    rescan_loop(wpa, rescan_period).await;
}

/// Scans for the lifetime of the process; the first scan is immediate.
async fn rescan_loop(wpa: Arc<WpaConnectionManager>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match wpa.scan().await {
            Ok(networks) => info!(iface = %wpa.interface(), count = networks.len(), "periodic scan"),
            Err(e) => warn!(iface = %wpa.interface(), error = %e, "periodic scan failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusMessage;
    use crate::config::parse_config;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::Instant;

    /// A supplicant that always has one network and counts scan triggers.
    #[derive(Default)]
    struct CountingRunner {
        scans: AtomicU32,
    }

    impl CountingRunner {
        fn scans(&self) -> u32 {
            self.scans.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(&self, _program: &str, args: &[String]) -> Result<Vec<u8>> {
            let reply = match args.get(2).map(String::as_str) {
                Some("scan") => {
                    self.scans.fetch_add(1, Ordering::SeqCst);
                    "OK\n"
                }
                Some("scan_results") => {
                    "bssid / frequency / signal level / flags / ssid\n\
                     b8:27:eb:11:22:33\t2437\t-52\t[ESS]\tHome\n"
                }
                _ => "OK\n",
            };
            Ok(reply.as_bytes().to_vec())
        }
    }

    fn config() -> Arc<SetupConfig> {
        let cfg = parse_config(
            r#"{
                "dnsmasq_cfg": { "address": "/#/192.168.27.1", "dhcp_range": "192.168.27.100,192.168.27.150,1h", "vendor_class": "set:device,IoT" },
                "host_apd_cfg": { "ssid": "iotwifi", "wpa_passphrase": "iotwifipass", "channel": "6", "ip": "192.168.27.1" },
                "wpa_supplicant_cfg": { "cfg_file": "/etc/wpa_supplicant/wpa_supplicant.conf" }
            }"#,
        )
        .unwrap();
        Arc::new(cfg)
    }

    fn start_station(
        state_rx: watch::Receiver<BringupState>,
    ) -> (Arc<CountingRunner>, UnboundedReceiver<BusMessage>, tokio::task::JoinHandle<()>) {
        let (bus, rx) = EventBus::channel();
        let runner = Arc::new(CountingRunner::default());
        let wpa = Arc::new(WpaConnectionManager::new(runner.clone(), "wlan0"));
        let task = tokio::spawn(station_mode(
            config(),
            state_rx,
            bus,
            wpa,
            Duration::from_secs(20),
            Duration::from_secs(30),
        ));
        (runner, rx, task)
    }

    fn assert_supplicant_spawn(message: Option<BusMessage>) {
        match message {
            Some(BusMessage::Spawn(spec)) => {
                assert_eq!(spec.id.as_str(), "wpa_supplicant");
                assert!(spec.args.contains(&"-iwlan0".to_string()));
                assert!(spec.args.contains(&"-c/etc/wpa_supplicant/wpa_supplicant.conf".to_string()));
            }
            other => panic!("expected wpa_supplicant spawn, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn supplicant_waits_for_ap_then_rescans_every_period() {
        let (state_tx, state_rx) = watch::channel(BringupState::Unknown);
        let (runner, mut rx, station) = start_station(state_rx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(runner.scans(), 0);

        state_tx.send_replace(BringupState::ApStarting);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        state_tx.send_replace(BringupState::ApEnabled);
        assert_supplicant_spawn(rx.recv().await);

        // first scan is immediate, then one per period
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(runner.scans(), 3);

        station.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn supplicant_starts_after_readiness_timeout() {
        let (_state_tx, state_rx) = watch::channel(BringupState::ApStarting);
        let started = Instant::now();
        let (runner, mut rx, station) = start_station(state_rx);

        assert_supplicant_spawn(rx.recv().await);
        assert!(started.elapsed() >= Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.scans(), 1);

        station.abort();
    }

    #[tokio::test]
    async fn wait_for_ap_returns_once_enabled() {
        let (tx, mut rx) = watch::channel(BringupState::Unknown);
        tokio::spawn(async move {
            tx.send_replace(BringupState::ApStarting);
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_replace(BringupState::ApEnabled);
            // keep the sender alive until the waiter has seen the value
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        wait_for_ap(&mut rx, Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_ap_times_out() {
        let (_tx, mut rx) = watch::channel(BringupState::ApStarting);
        let err = wait_for_ap(&mut rx, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn wait_for_ap_reports_a_stopped_machine() {
        let (tx, mut rx) = watch::channel(BringupState::Creating);
        drop(tx);
        let err = wait_for_ap(&mut rx, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed(_)));
    }
}
