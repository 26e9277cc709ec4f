use crate::api::{ApiServer, ApiState};
use crate::captions::CaptionLog;
use crate::config::Config;
use crate::detector::{DetectorHandle, MicCapture, SpeakingDetector};
use crate::directory::UserDirectory;
use crate::global;
use crate::room::MeetingRoom;
use crate::session::{AuthIdentity, SessionGate, SessionState};
use crate::speech::{CaptionPump, HttpSpeechProvider, PumpHandle};
use crate::store::SqliteStore;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const MIC_SAMPLE_RATE: u32 = 16_000;

pub async fn run_service() -> Result<()> {
    info!("Starting Huddle service");

    let config = Config::load()?;
    let store = Arc::new(SqliteStore::open(
        &global::db_file()?,
        &global::photos_dir()?,
    )?);

    // Log in and wait out the admission gate before touching the room.
    let identity = identity_from_config(&config)?;
    let mut gate = SessionGate::new(store.clone());
    gate.login(&identity).await?;

    let directory = Arc::new(UserDirectory::new(store.clone()));
    directory.load().await?;
    directory.spawn_sync();

    if gate.state() == SessionState::PendingApproval {
        info!("Waiting for an admin to approve this account");
        let mut users_changed = directory.users().watch();
        while gate.state() == SessionState::PendingApproval {
            users_changed
                .changed()
                .await
                .context("users feed closed while waiting for approval")?;
            gate.evaluate(directory.users());
        }
    }

    let user = gate
        .current_user()
        .cloned()
        .context("no user record after login")?;
    info!("Admitted to meeting as {}", user.display_name);

    let room = MeetingRoom::new(store.clone(), &config.room.meeting_id);
    room.load().await?;
    room.spawn_sync();
    room.join(&user).await?;

    let captions = Arc::new(CaptionLog::new(
        store.clone(),
        &config.room.meeting_id,
        config.room.max_captions,
    ));
    captions.load().await?;
    captions.spawn_sync();

    // Microphone failure degrades to a listener-only session.
    let mic = match open_microphone() {
        Ok(mic) => Some(mic),
        Err(e) => {
            warn!("Microphone unavailable, joining without speaking detection: {e}");
            None
        }
    };

    let mut pump_handle: Option<PumpHandle> = None;
    let mut pump_task = None;
    let mut detector_task = None;
    let detector_handle: DetectorHandle = if let Some(mic) = &mic {
        let detector = SpeakingDetector::new(
            Box::new(mic.spectrum_source()),
            room.presence_sink(&user.id),
            &config.detector,
        );
        let (handle, task) = detector.spawn();
        detector_task = Some(task);

        if config.speech.api_endpoint.is_empty() {
            info!("Captioning disabled (no speech API endpoint configured)");
        } else {
            let provider = Arc::new(HttpSpeechProvider::new(
                &config.speech.api_endpoint,
                config.speech.api_key.clone(),
            ));
            let pump = CaptionPump::new(
                Box::new(mic.chunk_source()),
                provider,
                captions.clone(),
                user.clone(),
                &config.speech.language,
                config.speech.chunk_seconds,
            );
            let (handle, task) = pump.spawn();
            pump_handle = Some(handle);
            pump_task = Some(task);
        }

        handle
    } else {
        DetectorHandle::detached(config.detector.threshold)
    };

    let session = Arc::new(Mutex::new(gate));
    let api_server = ApiServer::new(
        config.server.port,
        ApiState {
            session: session.clone(),
            directory: directory.clone(),
            room: room.clone(),
            captions: captions.clone(),
            detector: detector_handle.clone(),
        },
    );
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("Huddle is ready!");
    info!(
        "Check the room: curl http://127.0.0.1:{}/room",
        config.server.port
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    detector_handle.stop();
    if let Some(pump) = &pump_handle {
        pump.stop();
    }
    // Wait for both loops to wind down: the detector's final idle publish
    // must land before the participant row is deleted.
    if let Some(task) = pump_task {
        let _ = task.await;
    }
    if let Some(task) = detector_task {
        let _ = task.await;
    }
    if let Err(e) = room.leave(&user.id).await {
        warn!("Failed to leave room cleanly: {e}");
    }
    if let Err(e) = session.lock().await.logout().await {
        warn!("Failed to log out cleanly: {e}");
    }
    drop(mic);

    Ok(())
}

/// Build the login identity from config. IDs are derived from the email so
/// the same person maps to the same row across restarts.
fn identity_from_config(config: &Config) -> Result<AuthIdentity> {
    let email = config.identity.email.trim();
    if email.is_empty() {
        bail!(
            "no identity configured; set [identity] email in {:?}",
            global::config_file()?
        );
    }

    let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, email.as_bytes()).to_string();
    Ok(AuthIdentity {
        id,
        email: email.to_string(),
        display_name: config.identity.display_name.clone(),
        photo_url: config.identity.photo_url.clone(),
    })
}

fn open_microphone() -> Result<MicCapture> {
    let mut mic = MicCapture::new(MIC_SAMPLE_RATE)?;
    mic.start()?;
    Ok(mic)
}
