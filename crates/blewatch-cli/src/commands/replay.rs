//! Replay command implementation.
//!
//! Pushes a session file through the same pipeline a live scanner would feed:
//! scheduler -> store -> bus. When playback ends (or is cut short) the store
//! snapshot is filtered, sorted and printed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use blewatch_core::{
    BusEvent, Config, ConfigError, DeviceStore, EventBus, Recorder, ReplayScheduler,
    ReplaySession, Topic, query,
};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{OutputFormat, ReplayArgs};
use crate::format::{
    FormatOptions, format_devices_csv, format_devices_json, format_devices_text,
    format_update_line,
};
use crate::util::write_output;

pub async fn cmd_replay(
    args: ReplayArgs,
    config: &Config,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
    quiet: bool,
) -> Result<()> {
    let limit = match args.duration {
        Some(secs) => Some(
            Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .with_context(|| format!("Invalid duration: {}", secs))?,
        ),
        None => None,
    };

    let mut replay = config.replay.clone();
    if let Some(rate) = args.rate {
        replay.playback_rate = rate;
    }
    if args.loop_playback {
        replay.loop_playback = true;
    }
    let errors = replay.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors).into());
    }
    let options = replay.to_options();

    let session = ReplaySession::load(&args.file)
        .with_context(|| format!("Failed to load session {}", args.file.display()))?;
    let session_name = session.meta().name.clone();
    let packet_count = session.len();
    let playback_time =
        Duration::try_from_secs_f64(session.duration().as_secs_f64() / options.playback_rate)
            .unwrap_or(Duration::MAX);

    let bus = EventBus::shared();
    let store = Arc::new(DeviceStore::with_options(
        Arc::clone(&bus),
        config.store.to_options(),
    ));

    if args.follow {
        let follow_opts = *opts;
        bus.subscribe(Topic::DeviceUpdated, move |event| {
            if let BusEvent::DeviceUpdated(record) = event {
                eprintln!("{}", format_update_line(record, &follow_opts));
            }
        });
    }

    let recorder = match &args.record {
        Some(_) => {
            let recorder = Recorder::new(Arc::clone(&bus), config.recorder.max_records);
            recorder.start();
            Some(recorder)
        }
        None => None,
    };

    let cancel = CancellationToken::new();
    let ticker = store.start_rate_ticker(cancel.clone());

    let scheduler = ReplayScheduler::new(store.clone(), Arc::clone(&bus), options.clone())?;
    scheduler.load(session).await?;

    if !quiet {
        let title = if opts.no_color {
            session_name.clone()
        } else {
            format!("{}", session_name.cyan())
        };
        eprintln!(
            "Replaying: {} | {} packets | {:.1}s at {}x{}",
            title,
            packet_count,
            playback_time.as_secs_f64(),
            options.playback_rate,
            if options.loop_playback { " (looping)" } else { "" }
        );
        if options.loop_playback && limit.is_none() {
            eprintln!("Press Ctrl+C to stop");
        }
    }

    scheduler.start().await?;

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        state = scheduler.wait_stopped() => {
            let state = state?;
            debug!("Playback ended in state {}", state);
        }
        _ = deadline => {
            info!("Replay time limit reached");
        }
        _ = tokio::signal::ctrl_c() => {
            if !quiet {
                eprintln!("\nShutting down...");
            }
        }
    }

    scheduler.stop().await?;
    scheduler.shutdown().await;
    cancel.cancel();
    if let Err(e) = ticker.await {
        warn!("Rate ticker ended abnormally: {}", e);
    }

    if let (Some(recorder), Some(path)) = (recorder, args.record.as_ref()) {
        recorder.stop();
        if recorder.is_empty() {
            bail!("Nothing was replayed; not writing {}", path.display());
        }
        if recorder.is_truncated() {
            warn!("Recording truncated at {} packets", recorder.max_records());
        }
        recorder
            .save(path, &format!("{} (replayed)", session_name))
            .with_context(|| format!("Failed to write session {}", path.display()))?;
        info!("Recorded {} packets to {}", recorder.len(), path.display());
    }

    let query_config = args.query.apply(config.query.to_query());
    let devices = query(&store.get_all(), &query_config);

    let content = match args.format {
        OutputFormat::Text => format_devices_text(&devices, opts),
        OutputFormat::Json => format_devices_json(&devices, opts)?,
        OutputFormat::Csv => format_devices_csv(&devices),
    };
    write_output(output, &content)
}
