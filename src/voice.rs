//! Songbird-backed audio output.

use crate::playback::{AudioSink, EndNotifier, EndReason, Track};
use anyhow::{anyhow, Result};
use serenity::all::{ChannelId, GuildId};
use songbird::{
    events::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, TrackEvent},
    input::{Compose, Input, YoutubeDl},
    tracks::{Track as SongbirdTrack, TrackHandle},
    Call, Songbird,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub async fn manager(ctx: &serenity::all::Context) -> Result<Arc<Songbird>> {
    songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow!("songbird is not registered with the client"))
}

/// Join `channel_id` and wrap the resulting call as a sink.
pub async fn connect(
    manager: Arc<Songbird>,
    http: reqwest::Client,
    yt_dlp: &'static str,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Result<Arc<dyn AudioSink>> {
    let call = manager
        .join(guild_id, channel_id)
        .await
        .map_err(|e| anyhow!("could not join voice channel: {}", e))?;

    if let Err(e) = call.lock().await.deafen(true).await {
        debug!("Could not self-deafen in guild {}: {}", guild_id, e);
    }

    Ok(Arc::new(SongbirdSink {
        manager,
        call,
        http,
        yt_dlp,
        guild_id,
        current: Mutex::new(None),
    }))
}

pub struct SongbirdSink {
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    yt_dlp: &'static str,
    guild_id: GuildId,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSink {
    async fn with_current<F>(&self, action: &str, f: F) -> Result<()>
    where
        F: FnOnce(&TrackHandle) -> songbird::tracks::TrackResult<()>,
    {
        let current = self.current.lock().await;
        let handle = current
            .as_ref()
            .ok_or_else(|| anyhow!("nothing is loaded"))?;
        f(handle).map_err(|e| anyhow!("could not {}: {}", action, e))
    }
}

struct NotifyOnEnd(EndNotifier, EndReason);

#[serenity::async_trait]
impl VoiceEventHandler for NotifyOnEnd {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        self.0.notify(self.1);
        None
    }
}

#[serenity::async_trait]
impl AudioSink for SongbirdSink {
    async fn load(&self, track: &Track, volume: f32, on_end: EndNotifier) -> Result<Track> {
        let mut source =
            YoutubeDl::new_ytdl_like(self.yt_dlp, self.http.clone(), track.source_url.clone());

        // Playlist entries arrive without durations; the stream's metadata fills them in.
        let mut loaded = track.clone();
        match source.aux_metadata().await {
            Ok(meta) => {
                if loaded.duration_seconds.is_none() {
                    loaded.duration_seconds = meta.duration.map(|d| d.as_secs());
                }
                if loaded.thumbnail_url.is_none() {
                    loaded.thumbnail_url = meta.thumbnail;
                }
            }
            Err(e) => warn!("No metadata for \"{}\": {}", track.title, e),
        }

        let input: Input = source.into();
        let handle = self
            .call
            .lock()
            .await
            .play_only(SongbirdTrack::from(input).volume(volume));

        for (event, reason) in [
            (TrackEvent::End, EndReason::Finished),
            (TrackEvent::Error, EndReason::Failed),
        ] {
            handle
                .add_event(VoiceEvent::Track(event), NotifyOnEnd(on_end.clone(), reason))
                .map_err(|e| anyhow!("could not watch track: {}", e))?;
        }

        *self.current.lock().await = Some(handle);
        Ok(loaded)
    }

    async fn pause(&self) -> Result<()> {
        self.with_current("pause", |h| h.pause()).await
    }

    async fn resume(&self) -> Result<()> {
        self.with_current("resume", |h| h.play()).await
    }

    async fn stop(&self) -> Result<()> {
        match self.current.lock().await.take() {
            Some(handle) => handle
                .stop()
                .map_err(|e| anyhow!("could not stop: {}", e)),
            None => Ok(()),
        }
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        self.with_current("set volume", |h| h.set_volume(volume)).await
    }

    async fn release(&self) -> Result<()> {
        self.call.lock().await.stop();
        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(songbird::error::JoinError::NoCall) => Ok(()),
            Err(e) => Err(anyhow!("could not leave voice: {}", e)),
        }
    }
}
