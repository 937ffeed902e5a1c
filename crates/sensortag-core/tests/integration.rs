//! Integration tests for sensortag-core
//!
//! These tests require a powered SensorTag in range and should be run with:
//! `cargo test --package sensortag-core --test integration -- --ignored --nocapture`
//!
//! Set the SENSORTAG_ADAPTER environment variable to pick an adapter other
//! than the first one.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use sensortag_core::{
    BleDiscoverer, CaptureSequencer, Discoverer, MockSink, SensorDriver, SessionState,
    SessionSupervisor, SupervisorConfig, get_adapter,
};
use tokio::time::timeout;

/// Default timeout for BLE operations.
const BLE_TIMEOUT: Duration = Duration::from_secs(60);

fn adapter_index() -> usize {
    env::var("SENSORTAG_ADAPTER")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

async fn discover_one() -> Arc<dyn SensorDriver> {
    // Several tests may initialise logging
    let _ = tracing_subscriber::fmt::try_init();

    let adapter = get_adapter(adapter_index()).await.expect("no adapter");
    let discoverer = BleDiscoverer::new(adapter).await.expect("scan failed");

    match timeout(BLE_TIMEOUT, discoverer.discover()).await {
        Ok(Ok(driver)) => {
            discoverer.stop().await.ok();
            driver
        }
        Ok(Err(e)) => panic!("Discovery failed: {}", e),
        Err(_) => panic!("No SensorTag found within {:?}", BLE_TIMEOUT),
    }
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_discover_and_run_program() {
    let driver = discover_one().await;
    println!("Found {} ({:?})", driver.id(), driver.name());

    timeout(BLE_TIMEOUT, driver.connect_and_set_up())
        .await
        .expect("connect timed out")
        .expect("connect failed");

    let battery = CaptureSequencer::default()
        .run(driver.as_ref())
        .await
        .expect("capture program failed");
    println!("Battery: {}%", battery);
    assert!(battery <= 100);

    let mut events = driver.subscribe();
    let event = timeout(Duration::from_secs(15), events.recv())
        .await
        .expect("no notification within 15s")
        .expect("event channel closed");
    println!("First event: {:?}", event);

    driver.disconnect().await.ok();
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_supervised_session_reaches_streaming() {
    let sink = Arc::new(MockSink::new());
    let supervisor = SessionSupervisor::new(sink.clone(), SupervisorConfig::default());

    let driver = discover_one().await;
    let id = driver.id().to_string();
    let sensortag_core::Admission::Admitted { mut state, .. } = supervisor.admit(driver).await else {
        panic!("{} was rejected", id);
    };

    timeout(BLE_TIMEOUT, state.wait_for(|s| *s == SessionState::Streaming))
        .await
        .expect("setup did not finish")
        .expect("session ended during setup");

    let samples = timeout(Duration::from_secs(15), sink.wait_for_samples(3))
        .await
        .expect("no samples within 15s");
    for sample in samples {
        println!("{} = {}", sample.series_name(), sample.value);
    }

    let stats = supervisor.shutdown().await;
    assert_eq!(stats.streaming, 1);
}
