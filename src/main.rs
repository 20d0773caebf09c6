//! meeting-core - Main entry point
//!
//! `join` takes part in a real meeting over WebSocket signaling; `loopback`
//! runs a full mesh in-process to check that every pair converges.

mod args;

use args::{Args, Command};
use clap::Parser;
use log::{error, info, warn};
use meeting_core::transport::loopback::UserProfile;
use meeting_core::{
    Config, LoopbackHub, MeetingConfig, MeetingService, StartOptions, SyntheticCapture, WebRtcFactory,
    WebSocketTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("MEETING_LOG").unwrap_or_else(|_| log_level.to_string()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("meeting-core v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.load_config() {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    config.apply_env();

    match args.command {
        Command::Join { url, user, meeting, kind, scope, title, no_audio, no_video } => {
            if let Some(url) = url {
                config.signaling.url = Some(url);
            }
            if let Some(user) = user {
                config.signaling.user_id = user;
            }
            let options = StartOptions { audio: !no_audio, video: !no_video, title };
            run_join(config, kind.config(&meeting, &scope), options).await
        }
        Command::Loopback { participants, timeout_secs } => {
            run_loopback(config, participants, Duration::from_secs(timeout_secs)).await
        }
    }
}

async fn run_join(
    config: Config,
    meeting: MeetingConfig,
    options: StartOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let url = config
        .signaling
        .url
        .clone()
        .ok_or("No signaling url configured (set [signaling] url or --url)")?;

    let transport = WebSocketTransport::connect(&url).await?;
    let service = MeetingService::new(
        &config,
        Arc::new(SyntheticCapture::new()),
        Arc::new(WebRtcFactory::new(&config.ice)),
    )?;
    service.attach_transport(transport.clone());

    if let Some(stored) = service.stored_meeting() {
        info!("Previous meeting {} still on record", stored.config.meeting_id);
    }

    let _roster = service.on_participant_update(|participants| {
        let ids: Vec<&str> = participants.iter().map(|p| p.user_id.as_str()).collect();
        info!("Participants: {:?}", ids);
    });
    let _streams = service.on_stream_update(|update| match &update.stream {
        Some(stream) => info!("Receiving {} track(s) from {}", stream.tracks.len(), update.user_id),
        None => info!("Stream from {} ended", update.user_id),
    });
    let _calls = service.on_incoming_call(|call| {
        info!(
            "{} is calling (meeting {})",
            call.caller_name.as_deref().unwrap_or(&call.caller_id),
            call.meeting_id
        );
    });

    let outcome = service.start_meeting(meeting.clone(), options).await?;
    info!(
        "Joined {} with {} participant(s), audio={} video={}",
        meeting.meeting_id,
        outcome.participants.len(),
        outcome.media_state.audio_enabled,
        outcome.media_state.video_enabled
    );

    tokio::select! {
        _ = signal::ctrl_c() => info!("Shutdown signal received"),
        _ = wait_closed(&transport) => error!("Signaling connection lost"),
    }

    service.leave_meeting().await;
    service.notify_view_detached();
    service.media_released().await;
    match service.metrics().render() {
        Ok(text) => log::debug!("Final metrics:\n{}", text),
        Err(e) => warn!("Failed to render metrics: {}", e),
    }
    service.dispose().await;
    transport.close();
    Ok(())
}

async fn wait_closed(transport: &WebSocketTransport) {
    while !transport.is_closed() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn run_loopback(
    mut config: Config,
    participants: usize,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    if participants < 2 {
        return Err("Loopback needs at least two participants".into());
    }
    // Each participant would otherwise share one record
    config.storage.state_file = None;
    // Every peer is in this process
    config.ice.include_loopback = true;

    let hub = LoopbackHub::new();
    let user_ids: Vec<String> = (1..=participants).map(|i| format!("user-{}", i)).collect();
    let members: Vec<&str> = user_ids.iter().map(String::as_str).collect();
    hub.register_group("loopback", "Loopback", &members);
    let meeting = MeetingConfig::group(format!("loopback-{}", uuid::Uuid::new_v4()), "loopback");

    let mut services = Vec::with_capacity(participants);
    for user_id in &user_ids {
        let mut participant_config = config.clone();
        participant_config.signaling.user_id = user_id.clone();
        participant_config.validate()?;

        let service = MeetingService::new(
            &participant_config,
            Arc::new(SyntheticCapture::new()),
            Arc::new(WebRtcFactory::new(&participant_config.ice)),
        )?;
        service.attach_transport(hub.connect(UserProfile::new(user_id.clone()).with_name(user_id.to_uppercase())));

        let outcome = service.start_meeting(meeting.clone(), StartOptions::default()).await?;
        info!("{} joined with {} participant(s) present", user_id, outcome.participants.len());
        services.push(service);
    }

    let expected = participants - 1;
    let converged = tokio::time::timeout(timeout, async {
        loop {
            let done = services.iter().all(|service| {
                let roster = service.get_participants();
                roster.len() == expected
                    && roster.iter().all(|p| service.get_remote_stream(&p.user_id).is_some())
            });
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await
    .is_ok();

    for service in &services {
        let receiving = service
            .get_participants()
            .iter()
            .filter(|p| service.get_remote_stream(&p.user_id).is_some())
            .count();
        info!("{}: receiving media from {}/{} peer(s)", service.local_user_id(), receiving, expected);
    }

    for service in &services {
        service.leave_meeting().await;
        service.notify_view_detached();
        service.media_released().await;
        service.dispose().await;
    }

    if converged {
        info!("Mesh of {} participants converged", participants);
        Ok(())
    } else {
        Err(format!("Mesh did not converge within {:?}", timeout).into())
    }
}
