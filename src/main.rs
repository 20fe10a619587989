use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use vitals_portal::cli::{load_config, Cli, Command};
use vitals_portal::{
    wall_clock_millis, ConnectionState, SensorDataSource, SensorProducer, SensorRecord, ServerEvent,
    SourceEvent, TransportConfig, VitalsRecord, WaveformRecord,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Init { path } = &cli.command {
        TransportConfig::default().save_to_file(path)?;
        println!("Wrote default configuration to {:?}", path);
        return Ok(());
    }

    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter(&config))
        .init();

    match cli.command {
        Command::Produce {
            vitals_hz,
            waveform_hz,
            samples_per_frame,
            duration_secs,
        } => {
            let rates = Rates {
                vitals_hz: vitals_hz.max(1),
                waveform_hz: waveform_hz.max(1),
                samples_per_frame: samples_per_frame.max(1),
            };
            produce(config, rates, duration_secs.map(Duration::from_secs)).await
        }
        Command::Consume {
            max_records,
            duration_secs,
            stats,
        } => consume(config, max_records, duration_secs.map(Duration::from_secs), stats).await,
        Command::Init { .. } => Ok(()),
    }
}

struct Rates {
    vitals_hz: u32,
    waveform_hz: u32,
    samples_per_frame: u32,
}

/// Resolves when Ctrl-C arrives or `limit` elapses
async fn shutdown_signal(limit: Option<Duration>) {
    match limit {
        Some(limit) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(limit) => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
            }
        }
    }
}

async fn produce(config: TransportConfig, rates: Rates, limit: Option<Duration>) -> Result<()> {
    let mut producer = SensorProducer::start(config)
        .await
        .context("Failed to start producer")?;
    info!("Producing on {:?}", producer.socket_path());

    let mut server_events = producer.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = server_events.recv().await {
            match event {
                ServerEvent::ClientConnected { uid, pid } => info!("Consumer attached (uid {:?}, pid {:?})", uid, pid),
                ServerEvent::HandshakeSent { .. } => {}
                ServerEvent::Error { message } => warn!("Control channel: {}", message),
            }
        }
    });

    let mut vitals_tick = tokio::time::interval(Duration::from_micros(1_000_000 / rates.vitals_hz as u64));
    let chunk_period = Duration::from_micros(rates.samples_per_frame as u64 * 1_000_000 / rates.waveform_hz as u64);
    let mut waveform_tick = tokio::time::interval(chunk_period);
    vitals_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    waveform_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut sample_index: u64 = 0;
    let shutdown = shutdown_signal(limit);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = vitals_tick.tick() => {
                let secs = started.elapsed().as_secs_f64();
                let vitals = synthetic_vitals(secs);
                if let Err(e) = producer.write_vitals(wall_clock_millis(), &vitals) {
                    warn!("Dropped vitals frame: {}", e);
                }
            }
            _ = waveform_tick.tick() => {
                let start = wall_clock_millis() as i64;
                for (channel, shape) in [("ECG_LEAD_II", ecg_sample as fn(f64) -> i32), ("PLETH", pleth_sample)] {
                    let values = (0..rates.samples_per_frame as u64)
                        .map(|i| shape((sample_index + i) as f64 / rates.waveform_hz as f64))
                        .collect();
                    let chunk = WaveformRecord {
                        channel: channel.to_string(),
                        sample_rate: rates.waveform_hz as i32,
                        start_timestamp_ms: start,
                        values,
                    };
                    if let Err(e) = producer.write_waveform(&chunk) {
                        warn!("Dropped {} frame: {}", channel, e);
                    }
                }
                sample_index += rates.samples_per_frame as u64;
            }
        }
    }

    let stats = producer.stats();
    producer.shutdown();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn synthetic_vitals(secs: f64) -> VitalsRecord {
    let drift = (secs / 10.0).sin();
    VitalsRecord::new(
        72 + (drift * 4.0).round() as i32,
        98 - (drift.abs() * 1.5).round() as i32,
        16 + (drift * 2.0).round() as i32,
    )
}

fn ecg_sample(t: f64) -> i32 {
    let phase = (t * 1.2).fract();
    let spike = (-((phase - 0.3) * 60.0).powi(2)).exp();
    (spike * 1000.0 + (t * std::f64::consts::TAU * 0.25).sin() * 50.0) as i32
}

fn pleth_sample(t: f64) -> i32 {
    let phase = (t * 1.2).fract();
    (((phase * std::f64::consts::TAU).sin() * 0.5 + 0.5) * 4000.0) as i32
}

async fn consume(
    config: TransportConfig,
    max_records: Option<u64>,
    limit: Option<Duration>,
    print_stats: bool,
) -> Result<()> {
    let mut source = SensorDataSource::new(config);
    let mut events = source.start()?;
    let mut received: u64 = 0;

    let shutdown = shutdown_signal(limit);
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => event,
        };

        match event {
            Some(SourceEvent::Record { sequence, timestamp_ms, record }) => {
                match record {
                    SensorRecord::Vitals(v) => {
                        println!("#{} {} vitals hr={} spo2={} rr={}", sequence, timestamp_ms, v.hr, v.spo2, v.rr)
                    }
                    SensorRecord::Waveform(w) => println!(
                        "#{} {} {} {} samples @ {} Hz",
                        sequence,
                        timestamp_ms,
                        w.channel,
                        w.values.len(),
                        w.sample_rate
                    ),
                }
                received += 1;
                if max_records.map(|max| received >= max).unwrap_or(false) {
                    break;
                }
            }
            Some(SourceEvent::StateChanged(state)) => {
                info!("Connection {:?}", state);
                if state == ConnectionState::Stalled {
                    warn!("Producer heartbeat lost");
                }
            }
            Some(SourceEvent::Overrun { dropped }) => warn!("Fell behind, {} frames dropped", dropped),
            Some(SourceEvent::Error(e)) => warn!("{} ({:?})", e, e.category()),
            None => break,
        }
    }

    source.stop().await;
    if print_stats {
        println!("{}", serde_json::to_string_pretty(&source.stats())?);
    }
    Ok(())
}
