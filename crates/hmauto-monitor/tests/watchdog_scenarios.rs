//! ---
//! hma_section: "07-resilience-fault-tolerance"
//! hma_subsection: "tests"
//! hma_type: "source"
//! hma_scope: "test"
//! hma_description: "Watchdog and remediation scenarios over paused time."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmauto_alert::{AlertError, AlertLevel, Notifier};
use hmauto_metrics::prometheus::Registry;
use hmauto_metrics::{new_registry, WatchdogMetrics};
use hmauto_monitor::{
    BackoffPolicy, Prober, RemediationLoop, RemediationTarget, Watchdog, INTERNET_CHECK_CATEGORY,
    INTERNET_UP_MESSAGE, MODEM_DOWN_MESSAGE, RESTARTING_MESSAGE,
};
use hmauto_msg::TopicBus;
use hmauto_state::{MemoryStateStore, StateService};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

const CHECK: &str = "1.1.1.1";
const MODEM: &str = "10.10.10.1";

#[derive(Default)]
struct ScriptedProber {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    steady: Mutex<HashMap<String, bool>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    fn with(self, address: &str, first: &[bool], then: bool) -> Self {
        self.scripts
            .lock()
            .insert(address.to_owned(), first.iter().copied().collect());
        self.steady.lock().insert(address.to_owned(), then);
        self
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .scripts
            .lock()
            .get_mut(address)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => result,
            None => self.steady.lock().get(address).copied().unwrap_or(false),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<(AlertLevel, String, String)>>,
}

impl RecordingNotifier {
    fn count(&self, level: AlertLevel, message: &str) -> usize {
        self.alerts
            .lock()
            .iter()
            .filter(|(l, _, m)| *l == level && m == message)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        level: AlertLevel,
        category: &str,
        message: &str,
    ) -> Result<(), AlertError> {
        self.alerts
            .lock()
            .push((level, category.to_owned(), message.to_owned()));
        Ok(())
    }
}

fn target() -> RemediationTarget {
    RemediationTarget {
        check_address: CHECK.into(),
        modem_address: MODEM.into(),
        switch_key: "server_1".into(),
        settle: Duration::from_millis(500),
    }
}

fn counter(registry: &Registry, name: &str, label: &str, value: &str) -> f64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric().iter())
        .filter(|metric| {
            metric
                .get_label()
                .iter()
                .any(|pair| pair.get_name() == label && pair.get_value() == value)
        })
        .map(|metric| metric.get_counter().get_value())
        .sum()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn outage_is_remediated_with_two_pulses_and_one_recovery_alert() {
    let bus = TopicBus::new(64);
    let mut switch_events = bus.subscribe("hmstt_channel.hmstt.switch.server_1");
    let states = Arc::new(StateService::new(
        Arc::new(MemoryStateStore::new()),
        Arc::new(bus.clone()),
        "hmstt_channel",
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = new_registry();
    let metrics = WatchdogMetrics::new(registry.clone()).unwrap();

    // First entry is the watchdog's own tick probe; the loop then sees two more
    // failures before the uplink answers on its third internet probe.
    let prober = Arc::new(
        ScriptedProber::default()
            .with(CHECK, &[false, false, false], true)
            .with(MODEM, &[], true),
    );
    let remediation = RemediationLoop::new(
        prober.clone(),
        states.clone(),
        BackoffPolicy::default(),
        target(),
    )
    .with_notifier(notifier.clone())
    .with_metrics(metrics.clone())
    .with_seed(42);
    let watchdog =
        Watchdog::new(prober, remediation, Duration::from_millis(100)).with_metrics(metrics);

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watchdog.run(cancel).await })
    };

    wait_until(|| notifier.count(AlertLevel::Info, INTERNET_UP_MESSAGE) == 1).await;
    cancel.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(summary.outages, 1);
    assert_eq!(summary.recoveries, 1);
    assert_eq!(states.get_state("switch", "server_1").await.unwrap(), "on");

    let mut values = Vec::new();
    while values.len() < 4 {
        values.push(switch_events.recv().await.unwrap().body);
    }
    assert_eq!(values, vec!["off", "on", "off", "on"]);

    assert_eq!(notifier.count(AlertLevel::Info, RESTARTING_MESSAGE), 2);
    assert_eq!(notifier.count(AlertLevel::Info, INTERNET_UP_MESSAGE), 1);
    assert!(notifier
        .alerts
        .lock()
        .iter()
        .all(|(_, category, _)| category == INTERNET_CHECK_CATEGORY));

    let attempts = counter(&registry, "hmauto_remediation_attempts_total", "outcome", "still_down")
        + counter(&registry, "hmauto_remediation_attempts_total", "outcome", "recovered");
    assert_eq!(attempts, 3.0);
    assert_eq!(
        counter(&registry, "hmauto_remediation_runs_total", "result", "recovered"),
        1.0
    );
}

#[tokio::test(start_paused = true)]
async fn dead_modem_is_never_actuated_and_cancel_is_prompt() {
    let bus = TopicBus::new(64);
    let states = Arc::new(StateService::new(
        Arc::new(MemoryStateStore::new()),
        Arc::new(bus.clone()),
        "hmstt_channel",
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let prober = Arc::new(
        ScriptedProber::default()
            .with(CHECK, &[], false)
            .with(MODEM, &[], false),
    );
    let remediation =
        RemediationLoop::new(prober.clone(), states.clone(), BackoffPolicy::default(), target())
            .with_notifier(notifier.clone())
            .with_seed(7);
    let watchdog = Watchdog::new(prober, remediation, Duration::from_secs(120));

    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watchdog.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(4 * 3600)).await;
    cancel.cancel();
    let summary = tokio::time::timeout(Duration::from_millis(10), handle)
        .await
        .expect("watchdog did not stop promptly")
        .unwrap();

    assert_eq!(summary.outages, 1);
    assert_eq!(summary.recoveries, 0);
    assert!(notifier.count(AlertLevel::Warning, MODEM_DOWN_MESSAGE) > 10);
    assert_eq!(notifier.count(AlertLevel::Info, RESTARTING_MESSAGE), 0);
    assert_eq!(bus.published(), 0);
    assert!(states.list_states().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn first_probe_waits_one_full_interval() {
    let prober = Arc::new(ScriptedProber::default().with(CHECK, &[], true));
    let remediation = RemediationLoop::new(
        prober.clone(),
        Arc::new(StateService::new(
            Arc::new(MemoryStateStore::new()),
            Arc::new(TopicBus::new(4)),
            "hmstt_channel",
        )),
        BackoffPolicy::default(),
        target(),
    );
    let watchdog = Watchdog::new(prober.clone(), remediation, Duration::from_secs(120));
    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watchdog.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(119)).await;
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

    cancel.cancel();
    let summary = handle.await.unwrap();
    assert_eq!(summary.ticks, 1);
    assert_eq!(summary.outages, 0);
}

#[tokio::test(start_paused = true)]
async fn ticks_missed_during_remediation_are_not_replayed() {
    let prober = Arc::new(
        ScriptedProber::default()
            .with(CHECK, &[false, false, false], true)
            .with(MODEM, &[], true),
    );
    let remediation = RemediationLoop::new(
        prober.clone(),
        Arc::new(StateService::new(
            Arc::new(MemoryStateStore::new()),
            Arc::new(TopicBus::new(64)),
            "hmstt_channel",
        )),
        BackoffPolicy::default(),
        target(),
    )
    .with_seed(1);
    let watchdog = Watchdog::new(prober, remediation, Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watchdog.run(cancel).await })
    };

    // Two backoff waits of at least 21 s and 63 s separate the three loop attempts.
    tokio::time::sleep(Duration::from_secs(200)).await;
    cancel.cancel();
    let summary = handle.await.unwrap();

    assert_eq!(summary.recoveries, 1);
    // Recovery lands no earlier than t=86s, leaving at most ~115 on-schedule ticks.
    assert!(
        summary.ticks <= 118,
        "ticks were queued during remediation: {}",
        summary.ticks
    );
}
