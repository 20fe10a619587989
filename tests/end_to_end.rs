//! Producer and consumer talking through a real socket and shared region

use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use vitals_portal::{
    wall_clock_millis, ConnectionState, SensorDataSource, SensorProducer, SensorRecord, SourceEvent,
    TransportConfig, TransportError, VitalsRecord, WaveformRecord,
};

const WAIT: Duration = Duration::from_secs(5);

fn config(dir: &tempfile::TempDir) -> TransportConfig {
    TransportConfig {
        socket_path: dir.path().join("sensor.sock"),
        frame_size: 512,
        frame_count: 64,
        stall_threshold_ms: 100,
        reconnect_initial_ms: 10,
        reconnect_max_ms: 50,
        ..Default::default()
    }
}

async fn next_event(events: &mut Receiver<SourceEvent>) -> SourceEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn wait_for_state(events: &mut Receiver<SourceEvent>, wanted: ConnectionState) {
    loop {
        if let SourceEvent::StateChanged(state) = next_event(events).await {
            if state == wanted {
                return;
            }
        }
    }
}

/// Collect `count` records, ignoring other events
async fn collect_records(events: &mut Receiver<SourceEvent>, count: usize) -> Vec<(u64, SensorRecord)> {
    let mut records = Vec::with_capacity(count);
    while records.len() < count {
        if let SourceEvent::Record { sequence, record, .. } = next_event(events).await {
            records.push((sequence, record));
        }
    }
    records
}

#[tokio::test]
async fn test_records_arrive_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut producer = SensorProducer::start(config(&dir)).await.unwrap();

    let mut source = SensorDataSource::new(config(&dir));
    let mut events = source.start().unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    for i in 0..20 {
        producer
            .write_vitals(wall_clock_millis(), &VitalsRecord::new(60 + i, 98, 16))
            .unwrap();
    }
    producer
        .write_waveform(&WaveformRecord {
            channel: "ECG_LEAD_II".to_string(),
            sample_rate: 250,
            start_timestamp_ms: 1_000,
            values: (0..10).collect(),
        })
        .unwrap();

    let records = collect_records(&mut events, 21).await;
    for (i, (sequence, record)) in records.iter().take(20).enumerate() {
        assert_eq!(*sequence, i as u64);
        assert_eq!(record, &SensorRecord::Vitals(VitalsRecord::new(60 + i as i32, 98, 16)));
    }

    let (sequence, last) = &records[20];
    assert_eq!(*sequence, 20);
    let SensorRecord::Waveform(chunk) = last else {
        panic!("expected a waveform chunk, got {:?}", last);
    };
    let samples = chunk.samples();
    assert_eq!(samples.len(), 10);
    assert_eq!(samples[1].timestamp_ms, 1_004);

    source.stop().await;
    assert_eq!(source.stats().frames_read, 21);
    assert_eq!(producer.stats().server.handshakes_served, 1);
}

#[tokio::test]
async fn test_consumers_share_one_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mut producer = SensorProducer::start(config(&dir)).await.unwrap();

    let mut first = SensorDataSource::new(config(&dir));
    let mut second = SensorDataSource::new(config(&dir));
    let mut first_events = first.start().unwrap();
    let mut second_events = second.start().unwrap();
    wait_for_state(&mut first_events, ConnectionState::Streaming).await;
    wait_for_state(&mut second_events, ConnectionState::Streaming).await;

    for i in 0..10 {
        producer
            .write_vitals(wall_clock_millis(), &VitalsRecord::new(70 + i, 97, 14))
            .unwrap();
    }

    let a = collect_records(&mut first_events, 10).await;
    let b = collect_records(&mut second_events, 10).await;
    assert_eq!(a, b);
    assert_eq!(producer.stats().writer.frames_written, 10);

    first.stop().await;
    second.stop().await;
}

#[tokio::test]
async fn test_stall_detected_and_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let producer = SensorProducer::start(config(&dir)).await.unwrap();

    let mut source = SensorDataSource::new(config(&dir));
    let mut events = source.start().unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    producer.set_heartbeat_paused(true);
    wait_for_state(&mut events, ConnectionState::Stalled).await;
    assert_eq!(source.state(), ConnectionState::Stalled);

    producer.set_heartbeat_paused(false);
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    source.stop().await;
    assert!(source.stats().stalls >= 1);
}

#[tokio::test]
async fn test_reconnects_after_producer_restart() {
    let dir = tempfile::tempdir().unwrap();
    let consumer_config = TransportConfig {
        reconnect_after_stall_ms: 200,
        ..config(&dir)
    };

    let producer = SensorProducer::start(config(&dir)).await.unwrap();
    let mut source = SensorDataSource::new(consumer_config);
    let mut events = source.start().unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    producer.shutdown();

    loop {
        match next_event(&mut events).await {
            SourceEvent::Error(TransportError::Stalled { elapsed_ms }) => {
                assert!(elapsed_ms >= 200);
                break;
            }
            SourceEvent::Record { .. } => panic!("no frames expected from a stopped producer"),
            _ => {}
        }
    }
    wait_for_state(&mut events, ConnectionState::Disconnected).await;

    let mut restarted = SensorProducer::start(config(&dir)).await.unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    restarted
        .write_vitals(wall_clock_millis(), &VitalsRecord::new(80, 99, 12))
        .unwrap();
    let records = collect_records(&mut events, 1).await;
    assert_eq!(records[0], (0, SensorRecord::Vitals(VitalsRecord::new(80, 99, 12))));

    source.stop().await;
}

#[tokio::test]
async fn test_waits_for_late_producer() {
    let dir = tempfile::tempdir().unwrap();

    let mut source = SensorDataSource::new(config(&dir));
    let mut events = source.start().unwrap();

    let mut failures = 0;
    while failures < 2 {
        if let SourceEvent::Error(e) = next_event(&mut events).await {
            assert!(e.is_recoverable());
            failures += 1;
        }
    }

    let mut producer = SensorProducer::start(config(&dir)).await.unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    producer
        .write_vitals(wall_clock_millis(), &VitalsRecord::new(65, 96, 18))
        .unwrap();
    let records = collect_records(&mut events, 1).await;
    assert_eq!(records[0].0, 0);

    source.stop().await;
}

#[tokio::test]
async fn test_undecodable_payload_does_not_stop_stream() {
    let dir = tempfile::tempdir().unwrap();
    let mut producer = SensorProducer::start(config(&dir)).await.unwrap();

    let mut source = SensorDataSource::new(config(&dir));
    let mut events = source.start().unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    producer
        .write_frame(vitals_portal::FrameType::Vitals, wall_clock_millis(), b"not json")
        .unwrap();
    producer
        .write_vitals(wall_clock_millis(), &VitalsRecord::new(75, 98, 15))
        .unwrap();

    loop {
        match next_event(&mut events).await {
            SourceEvent::Error(TransportError::Serialization(_)) => break,
            SourceEvent::Record { .. } => panic!("garbage payload decoded"),
            _ => {}
        }
    }
    let records = collect_records(&mut events, 1).await;
    assert_eq!(records[0].0, 1);

    source.stop().await;
    assert_eq!(source.stats().decode_failures, 1);
}

#[tokio::test]
async fn test_stop_returns_while_events_are_undrained() {
    let dir = tempfile::tempdir().unwrap();
    let mut producer = SensorProducer::start(config(&dir)).await.unwrap();

    let mut source = SensorDataSource::new(TransportConfig {
        event_channel_capacity: 4,
        ..config(&dir)
    });
    let mut events = source.start().unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    for i in 0..20 {
        producer
            .write_vitals(wall_clock_millis(), &VitalsRecord::new(60 + i, 98, 16))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(3), source.stop())
        .await
        .expect("stop did not return with a full event channel");
    assert_eq!(source.state(), ConnectionState::Disconnected);
    assert!(!source.is_running());
    drop(events);
}

#[tokio::test]
async fn test_lapped_consumer_reports_overrun_and_keeps_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let small_ring = TransportConfig {
        frame_count: 16,
        event_channel_capacity: 4,
        max_frames_per_poll: 1,
        ..config(&dir)
    };
    let mut producer = SensorProducer::start(small_ring.clone()).await.unwrap();

    let mut source = SensorDataSource::new(small_ring);
    let mut events = source.start().unwrap();
    wait_for_state(&mut events, ConnectionState::Streaming).await;

    // Fill the event channel so the consumer stops polling, then lap it
    for i in 0..10 {
        producer
            .write_vitals(wall_clock_millis(), &VitalsRecord::new(60 + i, 98, 16))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    for i in 0..200 {
        producer
            .write_vitals(wall_clock_millis(), &VitalsRecord::new(i % 100, 98, 16))
            .unwrap();
    }

    let mut delivered = Vec::new();
    let dropped = loop {
        match next_event(&mut events).await {
            SourceEvent::Record { sequence, .. } => delivered.push(sequence),
            SourceEvent::Overrun { dropped } => break dropped,
            _ => {}
        }
    };
    assert_eq!(delivered, (0..delivered.len() as u64).collect::<Vec<_>>());
    assert!(dropped > 16);
    assert_eq!(delivered.len() as u64 + dropped, 210);

    producer
        .write_vitals(wall_clock_millis(), &VitalsRecord::new(90, 99, 12))
        .unwrap();
    let records = collect_records(&mut events, 1).await;
    assert_eq!(records[0], (210, SensorRecord::Vitals(VitalsRecord::new(90, 99, 12))));

    source.stop().await;
    let stats = source.stats();
    assert_eq!(stats.overruns, 1);
    assert_eq!(stats.dropped_frames, dropped);
}
