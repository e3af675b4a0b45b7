//! Per-guild music queues.
//!
//! Each guild gets one `GuildPlayback` behind its own mutex, so guilds never wait on each other
//! while every operation within a guild is serialized.  Track completion is not a callback that
//! reaches back into the queue: the sink sends a `TrackEnded` message carrying the token of the
//! track it was loaded with, and the player only advances if that token is still current.
//! `stop` bumps the token, so a completion that was already in flight is ignored.

use anyhow::Result;
use serenity::all::GuildId;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub source_url: String,
    /// Unknown for playlist stubs until the track is loaded.
    pub duration_seconds: Option<u64>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Played out, or stopped on request.
    Finished,
    /// The stream broke while playing.
    Failed,
}

/// Sent by a sink when the track it was given stops producing audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEnded {
    pub guild_id: GuildId,
    pub reason: EndReason,
    token: u64,
}

/// Handed to the sink along with each track.
#[derive(Debug, Clone)]
pub struct EndNotifier {
    tx: mpsc::UnboundedSender<TrackEnded>,
    guild_id: GuildId,
    token: u64,
}

impl EndNotifier {
    pub fn notify(&self, reason: EndReason) {
        // Receiver only goes away on shutdown.
        let _ = self.tx.send(TrackEnded {
            guild_id: self.guild_id,
            reason,
            token: self.token,
        });
    }
}

/// Audio output for one guild.  Volume is a first-class control of every sink.
#[serenity::async_trait]
pub trait AudioSink: Send + Sync {
    /// Start streaming `track`, replacing whatever was playing.  `on_end` must be notified when
    /// the track finishes, fails mid-stream or is stopped.  Returns the track with any metadata
    /// that was resolved while loading.
    async fn load(&self, track: &Track, volume: f32, on_end: EndNotifier) -> Result<Track>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn set_volume(&self, volume: f32) -> Result<()>;
    /// Leave the voice channel.
    async fn release(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkStatus {
    Idle,
    Playing,
    Paused,
}

struct GuildPlayback {
    queue: VecDeque<Track>,
    current: Option<Track>,
    looping: bool,
    volume: f32,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    status: SinkStatus,
    sink: Option<Arc<dyn AudioSink>>,
    token: u64,
}

impl GuildPlayback {
    fn new(volume: f32) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            looping: false,
            volume,
            started_at: None,
            paused_at: None,
            status: SinkStatus::Idle,
            sink: None,
            token: 0,
        }
    }

    fn clear_current(&mut self) {
        self.current = None;
        self.started_at = None;
        self.paused_at = None;
        self.status = SinkStatus::Idle;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub title: String,
    pub elapsed_seconds: u64,
    pub duration_seconds: Option<u64>,
    /// 0..=100
    pub percent: u8,
}

pub struct Player {
    guilds: RwLock<HashMap<GuildId, Arc<Mutex<GuildPlayback>>>>,
    events: mpsc::UnboundedSender<TrackEnded>,
    default_volume: f32,
}

impl Player {
    /// The receiver must be handed to `drive` (or pumped by hand in tests).
    pub fn new(default_volume: f32) -> (Self, mpsc::UnboundedReceiver<TrackEnded>) {
        let (events, rx) = mpsc::unbounded_channel();
        let player = Self {
            guilds: RwLock::new(HashMap::new()),
            events,
            default_volume: default_volume.clamp(0.0, 1.0),
        };
        (player, rx)
    }

    /// Advance queues as tracks end.  Runs until every sender is gone.
    pub async fn drive(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<TrackEnded>) {
        while let Some(ended) = rx.recv().await {
            let player = self.clone();
            tokio::spawn(async move {
                player.track_ended(ended).await;
            });
        }
    }

    async fn guild(&self, guild_id: GuildId) -> Arc<Mutex<GuildPlayback>> {
        if let Some(state) = self.guilds.read().await.get(&guild_id) {
            return state.clone();
        }
        self.guilds
            .write()
            .await
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildPlayback::new(self.default_volume))))
            .clone()
    }

    async fn existing(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildPlayback>>> {
        self.guilds.read().await.get(&guild_id).cloned()
    }

    pub async fn has_sink(&self, guild_id: GuildId) -> bool {
        match self.existing(guild_id).await {
            Some(state) => state.lock().await.sink.is_some(),
            None => false,
        }
    }

    pub async fn attach_sink(&self, guild_id: GuildId, sink: Arc<dyn AudioSink>) {
        self.guild(guild_id).await.lock().await.sink = Some(sink);
    }

    /// Append tracks without starting playback.  Returns how many were added.
    pub async fn enqueue(&self, guild_id: GuildId, tracks: Vec<Track>) -> usize {
        let count = tracks.len();
        self.guild(guild_id).await.lock().await.queue.extend(tracks);
        count
    }

    /// Load the next track into the sink: the current one again when looping, otherwise the head
    /// of the queue.  Tracks that fail to load are skipped.  `None` means the queue is drained
    /// (or there is no sink to play into).
    pub async fn play_next(&self, guild_id: GuildId) -> Option<Track> {
        let state = self.guild(guild_id).await;
        let mut state = state.lock().await;
        self.play_next_locked(guild_id, &mut state).await
    }

    /// `play_next`, unless something is already loaded.
    pub async fn start_if_idle(&self, guild_id: GuildId) -> Option<Track> {
        let state = self.guild(guild_id).await;
        let mut state = state.lock().await;
        if state.status != SinkStatus::Idle {
            return None;
        }
        self.play_next_locked(guild_id, &mut state).await
    }

    async fn play_next_locked(
        &self,
        guild_id: GuildId,
        state: &mut GuildPlayback,
    ) -> Option<Track> {
        let sink = state.sink.clone()?;

        loop {
            let next = match (state.looping, state.current.take()) {
                (true, Some(current)) => current,
                _ => match state.queue.pop_front() {
                    Some(track) => track,
                    None => {
                        state.clear_current();
                        return None;
                    }
                },
            };

            state.token += 1;
            let on_end = EndNotifier {
                tx: self.events.clone(),
                guild_id,
                token: state.token,
            };

            match sink.load(&next, state.volume, on_end).await {
                Ok(loaded) => {
                    info!("Now playing \"{}\" in guild {}", loaded.title, guild_id);
                    state.current = Some(loaded.clone());
                    state.started_at = Some(Instant::now());
                    state.paused_at = None;
                    state.status = SinkStatus::Playing;
                    return Some(loaded);
                }
                Err(e) => {
                    // Dropping it as current keeps a looping guild from retrying it forever.
                    warn!("Could not play \"{}\" in guild {}: {}", next.title, guild_id, e);
                    state.clear_current();
                }
            }
        }
    }

    /// React to a sink reporting the end of a track.
    pub async fn track_ended(&self, ended: TrackEnded) -> Option<Track> {
        let state = self.existing(ended.guild_id).await?;
        let mut state = state.lock().await;

        if state.token != ended.token || state.status == SinkStatus::Idle {
            debug!("Ignoring stale track end in guild {}", ended.guild_id);
            return None;
        }

        if ended.reason == EndReason::Failed {
            // A broken stream would fail again, so loop moves on to the queue.
            if let Some(track) = &state.current {
                warn!("\"{}\" failed while playing in guild {}", track.title, ended.guild_id);
            }
            state.clear_current();
        }
        state.status = SinkStatus::Idle;
        self.play_next_locked(ended.guild_id, &mut state).await
    }

    /// Stop the loaded track; its end notification advances the queue.  `false` if nothing was
    /// loaded.
    pub async fn skip(&self, guild_id: GuildId) -> bool {
        let Some(state) = self.existing(guild_id).await else {
            return false;
        };
        let state = state.lock().await;

        let Some(sink) = state.sink.as_ref() else {
            return false;
        };
        if state.status == SinkStatus::Idle {
            return false;
        }

        match sink.stop().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not skip track in guild {}: {}", guild_id, e);
                false
            }
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> bool {
        let Some(state) = self.existing(guild_id).await else {
            return false;
        };
        let mut state = state.lock().await;

        let Some(sink) = state.sink.clone() else {
            return false;
        };
        if state.status != SinkStatus::Playing {
            return false;
        }

        match sink.pause().await {
            Ok(()) => {
                state.status = SinkStatus::Paused;
                state.paused_at = Some(Instant::now());
                true
            }
            Err(e) => {
                warn!("Could not pause in guild {}: {}", guild_id, e);
                false
            }
        }
    }

    pub async fn resume(&self, guild_id: GuildId) -> bool {
        let Some(state) = self.existing(guild_id).await else {
            return false;
        };
        let mut state = state.lock().await;

        let Some(sink) = state.sink.clone() else {
            return false;
        };
        if state.status != SinkStatus::Paused {
            return false;
        }

        match sink.resume().await {
            Ok(()) => {
                // Shift the start so the paused stretch doesn't count as elapsed.
                if let (Some(started), Some(paused)) = (state.started_at, state.paused_at) {
                    state.started_at = Some(started + paused.elapsed());
                }
                state.paused_at = None;
                state.status = SinkStatus::Playing;
                true
            }
            Err(e) => {
                warn!("Could not resume in guild {}: {}", guild_id, e);
                false
            }
        }
    }

    /// Stop playback, leave voice and forget the queue.  Safe to call repeatedly.
    pub async fn stop(&self, guild_id: GuildId) {
        let Some(state) = self.existing(guild_id).await else {
            return;
        };
        let mut state = state.lock().await;

        // Invalidate before detaching so the stop's own end notification is ignored.
        state.token += 1;
        let sink = state.sink.take();
        state.queue.clear();
        state.clear_current();

        if let Some(sink) = sink {
            if let Err(e) = sink.stop().await {
                warn!("Could not stop playback in guild {}: {}", guild_id, e);
            }
            if let Err(e) = sink.release().await {
                warn!("Could not leave voice in guild {}: {}", guild_id, e);
            }
            info!("Stopped playback in guild {}", guild_id);
        }
    }

    /// Stop and drop everything kept for a guild the bot was removed from.
    pub async fn forget(&self, guild_id: GuildId) {
        self.stop(guild_id).await;
        if self.guilds.write().await.remove(&guild_id).is_some() {
            debug!("Forgot playback state of guild {}", guild_id);
        }
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> bool {
        let state = self.guild(guild_id).await;
        let mut state = state.lock().await;
        state.looping = !state.looping;
        state.looping
    }

    /// Rejects anything outside `0.0..=1.0`.
    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> bool {
        if !(0.0..=1.0).contains(&volume) {
            return false;
        }

        let state = self.guild(guild_id).await;
        let mut state = state.lock().await;
        state.volume = volume;

        if let (Some(sink), true) = (&state.sink, state.status != SinkStatus::Idle) {
            if let Err(e) = sink.set_volume(volume).await {
                warn!("Could not change live volume in guild {}: {}", guild_id, e);
            }
        }
        true
    }

    pub async fn volume(&self, guild_id: GuildId) -> f32 {
        match self.existing(guild_id).await {
            Some(state) => state.lock().await.volume,
            None => self.default_volume,
        }
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        self.existing(guild_id).await?.lock().await.current.clone()
    }

    pub async fn upcoming(&self, guild_id: GuildId) -> Vec<Track> {
        match self.existing(guild_id).await {
            Some(state) => state.lock().await.queue.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn progress(&self, guild_id: GuildId) -> Option<Progress> {
        let state = self.existing(guild_id).await?;
        let state = state.lock().await;

        let current = state.current.as_ref()?;
        let started = state.started_at?;
        let until = state.paused_at.unwrap_or_else(Instant::now);
        let elapsed_seconds = until.saturating_duration_since(started).as_secs();

        let percent = match current.duration_seconds {
            Some(duration) if duration > 0 => (elapsed_seconds * 100 / duration).min(100) as u8,
            _ => 0,
        };

        Some(Progress {
            title: current.title.clone(),
            elapsed_seconds,
            duration_seconds: current.duration_seconds,
            percent,
        })
    }
}

/// `M:SS`, or `H:MM:SS` past the hour.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}
