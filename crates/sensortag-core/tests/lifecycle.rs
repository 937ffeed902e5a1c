//! Session lifecycle tests against mock drivers.
//!
//! All tests run on a paused clock, so deadlines of tens of seconds
//! complete instantly.

use std::sync::Arc;
use std::time::Duration;

use sensortag_core::{
    Admission, Capability, CapabilityReading, DriverCall, DriverOp, Metric, MockSensorTag,
    MockSink, ReconnectPolicy, RejectReason, SessionState, SessionSupervisor, SupervisorConfig,
};
use tokio::sync::watch;
use tokio::time::Instant;

const D1: &str = "B0:B4:48:00:00:D1";

async fn admit(supervisor: &Arc<SessionSupervisor>, tag: &Arc<MockSensorTag>) -> watch::Receiver<SessionState> {
    match supervisor.admit(tag.clone()).await {
        Admission::Admitted { state, .. } => state,
        Admission::Rejected(reason) => panic!("unexpected rejection: {:?}", reason),
    }
}

async fn wait_until(state: &mut watch::Receiver<SessionState>, expected: SessionState) {
    state
        .wait_for(|s| *s == expected)
        .await
        .unwrap_or_else(|_| panic!("session ended before reaching {}", expected));
}

fn short_deadline() -> SupervisorConfig {
    SupervisorConfig::default()
        .connect_timeout(Duration::from_secs(1))
        .settle(Duration::ZERO)
        .margin(Duration::ZERO)
}

#[tokio::test(start_paused = true)]
async fn test_connects_streams_and_rejects_duplicate() {
    let sink = Arc::new(MockSink::new());
    let supervisor = SessionSupervisor::new(sink.clone(), SupervisorConfig::default());
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .battery(87)
            .connect_latency(Duration::from_secs(1))
            .build(),
    );

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Streaming).await;

    let samples = sink.wait_for_samples(1).await;
    assert_eq!(samples[0].metric, Metric::Battery);
    assert_eq!(samples[0].value, 87.0);
    assert_eq!(samples[0].series_name(), "battery_TI-ST_b0b4480000d1");

    // Every operation of the program, in order, after the connect
    let expected_ops = supervisor.config().program.operations();
    assert_eq!(tag.ops(), expected_ops);
    assert_eq!(tag.calls()[0], DriverCall::ConnectAndSetUp);

    let duplicate = Arc::new(MockSensorTag::builder().id(D1).build());
    let admission = supervisor.admit(duplicate.clone()).await;
    assert!(matches!(
        admission,
        Admission::Rejected(RejectReason::AlreadyManaged)
    ));
    assert!(duplicate.calls().is_empty());
    assert_eq!(supervisor.state(D1).await, Some(SessionState::Streaming));

    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.streaming, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_during_setup_issues_no_driver_calls() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let first = Arc::new(MockSensorTag::builder().id(D1).hang_on_connect().build());
    let mut state = admit(&supervisor, &first).await;
    wait_until(&mut state, SessionState::Connecting).await;

    for _ in 0..3 {
        let duplicate = Arc::new(MockSensorTag::builder().id(D1).build());
        assert!(!supervisor.admit(duplicate.clone()).await.is_admitted());
        assert!(duplicate.calls().is_empty());
    }
    assert_eq!(first.connect_count(), 1);
    assert_eq!(supervisor.session_ids().await, vec![D1.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_times_out_and_releases_identifier() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let tag = Arc::new(MockSensorTag::builder().id(D1).hang_on_connect().build());

    let started = Instant::now();
    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Disconnected).await;

    assert!(started.elapsed() >= supervisor.config().setup_deadline());
    assert_eq!(tag.disconnect_count(), 1);
    assert!(tag.ops().is_empty());
    assert!(!supervisor.is_managed(D1).await);

    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.disconnects, 0);

    let again = Arc::new(MockSensorTag::builder().id(D1).build());
    let mut state = admit(&supervisor, &again).await;
    wait_until(&mut state, SessionState::Streaming).await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_setup_tears_down_immediately() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let fifth = DriverOp::SetPeriod(Capability::BarometricPressure, Duration::from_millis(10_000));
    assert_eq!(supervisor.config().program.operations()[4], fifth);

    let tag = Arc::new(MockSensorTag::builder().id(D1).disconnect_on(fifth).build());

    let started = Instant::now();
    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Disconnected).await;

    assert!(started.elapsed() < supervisor.config().setup_deadline());
    assert_eq!(
        tag.ops(),
        vec![
            DriverOp::Enable(Capability::Humidity),
            DriverOp::SetPeriod(Capability::Humidity, Duration::from_millis(2000)),
            DriverOp::Notify(Capability::Humidity),
            DriverOp::Enable(Capability::BarometricPressure),
            fifth,
        ]
    );
    assert_eq!(tag.disconnect_count(), 0);
    assert!(!supervisor.is_managed(D1).await);

    // Nothing fires later either
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(tag.ops().len(), 5);
    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.timed_out, 0);

    let again = Arc::new(MockSensorTag::builder().id(D1).build());
    assert!(supervisor.admit(again).await.is_admitted());
}

#[tokio::test(start_paused = true)]
async fn test_failed_step_aborts_program_and_disconnects() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let failing = DriverOp::Notify(Capability::Luxometer);
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .fail_on(failing)
            .fail_disconnect()
            .build(),
    );

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Disconnected).await;

    let ops = tag.ops();
    assert_eq!(ops.last(), Some(&failing));
    let program = supervisor.config().program.operations();
    assert_eq!(ops[..], program[..ops.len()]);
    assert_eq!(tag.disconnect_count(), 1);
    assert!(!supervisor.is_managed(D1).await);
    assert_eq!(supervisor.stats().snapshot().setup_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_disconnects_and_releases_identifier() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .connect_latency(Duration::from_secs(1))
            .fail_connect()
            .build(),
    );

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Disconnected).await;

    assert_eq!(tag.connect_count(), 1);
    assert!(tag.ops().is_empty());
    assert_eq!(tag.disconnect_count(), 1);
    assert!(!supervisor.is_managed(D1).await);

    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.setup_failures, 1);
    assert_eq!(stats.timed_out, 0);
    assert_eq!(stats.streaming, 0);

    let again = Arc::new(MockSensorTag::builder().id(D1).build());
    assert!(supervisor.admit(again).await.is_admitted());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_as_program_completes_is_not_lost() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let last = DriverOp::Notify(Capability::BatteryLevel);
    let tag = Arc::new(MockSensorTag::builder().id(D1).drop_link_after(last).build());

    let mut state = admit(&supervisor, &tag).await;
    tokio::time::timeout(
        Duration::from_secs(600),
        wait_until(&mut state, SessionState::Disconnected),
    )
    .await
    .expect("session stuck after the link dropped");

    assert_eq!(tag.ops().last(), Some(&last));
    assert_eq!(tag.disconnect_count(), 0);
    assert!(!supervisor.is_managed(D1).await);
    assert_eq!(supervisor.stats().snapshot().disconnects, 1);

    let again = Arc::new(MockSensorTag::builder().id(D1).build());
    let mut state = admit(&supervisor, &again).await;
    wait_until(&mut state, SessionState::Streaming).await;
}

#[tokio::test(start_paused = true)]
async fn test_same_handle_reconnects_after_disconnect_as_program_completes() {
    let config = SupervisorConfig::default().reconnect(ReconnectPolicy::SameHandle);
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), config);
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .drop_link_after(DriverOp::Notify(Capability::BatteryLevel))
            .build(),
    );

    admit(&supervisor, &tag).await;
    let per_round = 1 + supervisor.config().program.operations().len();
    tokio::time::timeout(Duration::from_secs(600), tag.wait_for_calls(per_round * 2))
        .await
        .expect("same handle never reconnected");

    assert_eq!(tag.connect_count(), 2);
    assert_eq!(supervisor.stats().snapshot().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reading_during_configuration_is_forwarded() {
    let sink = Arc::new(MockSink::new());
    let supervisor = SessionSupervisor::new(sink.clone(), SupervisorConfig::default());
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .op_latency(Duration::from_millis(100))
            .build(),
    );

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Configuring).await;
    tag.emit(CapabilityReading::Luxometer { lux: 120.0 });
    wait_until(&mut state, SessionState::Streaming).await;

    let samples = sink.wait_for_samples(2).await;
    assert_eq!(samples[0].metric, Metric::Battery);
    assert_eq!(samples[1].metric, Metric::Lux);
    assert_eq!(samples[1].value, 120.0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_configuring_disconnects() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let stalled = DriverOp::Enable(Capability::IrTemperature);
    let tag = Arc::new(MockSensorTag::builder().id(D1).stall_on(stalled).build());

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Configuring).await;
    let calls = tag.wait_for_calls(1 + 7).await;
    assert_eq!(calls.last(), Some(&DriverCall::Op(stalled)));

    let stats = supervisor.shutdown().await;

    assert_eq!(tag.disconnect_count(), 1);
    assert_eq!(*state.borrow(), SessionState::Disconnected);
    assert!(!supervisor.is_managed(D1).await);
    assert_eq!(stats.timed_out, 0);
    assert_eq!(stats.setup_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_beats_slow_connect() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), short_deadline());
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .connect_latency(Duration::from_secs(10))
            .build(),
    );

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Disconnected).await;

    // A disconnect reported after the timeout is ignored
    tag.disconnect_now();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.disconnects, 0);
    assert_eq!(stats.streaming, 0);
    assert_eq!(tag.disconnect_count(), 1);
    assert!(tag.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_beats_deadline() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let tag = Arc::new(
        MockSensorTag::builder()
            .id(D1)
            .connect_latency(Duration::from_secs(10))
            .build(),
    );

    let mut state = admit(&supervisor, &tag).await;
    tag.wait_for_calls(1).await;
    tag.disconnect_now();
    wait_until(&mut state, SessionState::Disconnected).await;

    // Past the original deadline
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.timed_out, 0);
    assert_eq!(tag.disconnect_count(), 0);
    assert!(tag.ops().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_never_fires_after_streaming() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), short_deadline());
    let tag = Arc::new(MockSensorTag::builder().id(D1).build());

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Streaming).await;

    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(*state.borrow(), SessionState::Streaming);
    assert_eq!(supervisor.stats().snapshot().timed_out, 0);
    assert_eq!(tag.disconnect_count(), 0);
    assert!(supervisor.is_managed(D1).await);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_does_not_block_next_sample() {
    let sink = Arc::new(MockSink::new().fail_metric(Metric::Humidity));
    let supervisor = SessionSupervisor::new(sink.clone(), SupervisorConfig::default());
    let tag = Arc::new(MockSensorTag::builder().id(D1).build());

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Streaming).await;

    tag.emit(CapabilityReading::Humidity {
        temperature: 22.5,
        humidity: 41.0,
    });
    tag.emit(CapabilityReading::BarometricPressure { pressure: 1013.25 });

    // battery, temperature, pressure
    let samples = sink.wait_for_samples(3).await;
    let pressure = sink.samples_of(Metric::Pressure);
    assert_eq!(pressure.len(), 1);
    assert_eq!(pressure[0].value, 1013.25);
    assert_eq!(pressure[0].series_name(), "pressure_TI-ST_b0b4480000d1");
    assert_eq!(sink.samples_of(Metric::Temperature).len(), 1);
    assert!(samples.iter().all(|s| s.metric != Metric::Humidity));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(supervisor.stats().snapshot().samples_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_failed_write_of_a_series_is_not_sticky() {
    let sink = Arc::new(MockSink::new().fail_next(Metric::Humidity));
    let supervisor = SessionSupervisor::new(sink.clone(), SupervisorConfig::default());
    let tag = Arc::new(MockSensorTag::builder().id(D1).build());

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Streaming).await;

    tag.emit(CapabilityReading::Humidity {
        temperature: 22.0,
        humidity: 40.0,
    });
    sink.wait_for_samples(2).await;
    tag.emit(CapabilityReading::Humidity {
        temperature: 22.1,
        humidity: 40.5,
    });
    sink.wait_for_samples(4).await;

    let humidity = sink.samples_of(Metric::Humidity);
    assert_eq!(humidity.len(), 1);
    assert_eq!(humidity[0].value, 40.5);
}

#[tokio::test(start_paused = true)]
async fn test_runtime_disconnect_releases_for_rediscovery() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let tag = Arc::new(MockSensorTag::builder().id(D1).build());

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Streaming).await;

    tag.disconnect_now();
    wait_until(&mut state, SessionState::Disconnected).await;

    assert!(!supervisor.is_managed(D1).await);
    assert_eq!(tag.connect_count(), 1);
    assert_eq!(tag.disconnect_count(), 0);

    let again = Arc::new(MockSensorTag::builder().id(D1).build());
    let mut state = admit(&supervisor, &again).await;
    wait_until(&mut state, SessionState::Streaming).await;
    assert_eq!(supervisor.stats().snapshot().streaming, 2);
}

#[tokio::test(start_paused = true)]
async fn test_same_handle_policy_reconnects() {
    let sink = Arc::new(MockSink::new());
    let config = SupervisorConfig::default().reconnect(ReconnectPolicy::SameHandle);
    let supervisor = SessionSupervisor::new(sink.clone(), config);
    let tag = Arc::new(MockSensorTag::builder().id(D1).battery(64).build());

    let mut state = admit(&supervisor, &tag).await;
    wait_until(&mut state, SessionState::Streaming).await;
    let per_round = tag.calls().len();

    tag.disconnect_now();
    tag.wait_for_calls(per_round * 2).await;
    wait_until(&mut state, SessionState::Streaming).await;

    assert_eq!(tag.connect_count(), 2);
    assert_eq!(tag.disconnect_count(), 0);
    assert!(supervisor.is_managed(D1).await);
    assert_eq!(sink.samples_of(Metric::Battery).len(), 2);

    let stats = supervisor.stats().snapshot();
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.streaming, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects_configured_sessions_only() {
    let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
    let streaming = Arc::new(MockSensorTag::builder().id("AA:01").build());
    let failing = Arc::new(MockSensorTag::builder().id("AA:02").fail_disconnect().build());
    let connecting = Arc::new(MockSensorTag::builder().id("AA:03").hang_on_connect().build());

    let mut first = admit(&supervisor, &streaming).await;
    let mut second = admit(&supervisor, &failing).await;
    let mut third = admit(&supervisor, &connecting).await;
    wait_until(&mut first, SessionState::Streaming).await;
    wait_until(&mut second, SessionState::Streaming).await;
    wait_until(&mut third, SessionState::Connecting).await;

    let stats = supervisor.shutdown().await;

    assert_eq!(streaming.disconnect_count(), 1);
    assert_eq!(failing.disconnect_count(), 1);
    assert_eq!(connecting.disconnect_count(), 0);
    assert!(supervisor.session_ids().await.is_empty());
    assert_eq!(stats.admitted, 3);
    assert_eq!(stats.timed_out, 0);

    let late = Arc::new(MockSensorTag::builder().id("AA:04").build());
    assert!(matches!(
        supervisor.admit(late.clone()).await,
        Admission::Rejected(RejectReason::ShuttingDown)
    ));
    assert!(late.calls().is_empty());
}
