//! Periodic "new upload" notifications.

use crate::youtube::{Video, YouTubeClient};
use anyhow::Result;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex, RwLock},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

#[serenity::async_trait]
pub trait VideoSource: Send + Sync {
    async fn latest_upload(&self, channel_id: &str) -> Result<Option<Video>>;
}

#[serenity::async_trait]
impl VideoSource for YouTubeClient {
    async fn latest_upload(&self, channel_id: &str) -> Result<Option<Video>> {
        YouTubeClient::latest_upload(self, channel_id).await
    }
}

#[serenity::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, video: &Video) -> Result<()>;
}

/// What is being watched, shared between the poller and the commands that configure it.
#[derive(Default)]
pub struct VideoWatch {
    channel_id: RwLock<Option<String>>,
    last_seen: Mutex<Option<String>>,
    running: AtomicBool,
}

impl VideoWatch {
    pub fn new(channel_id: Option<String>) -> Self {
        Self {
            channel_id: RwLock::new(channel_id),
            ..Default::default()
        }
    }

    pub async fn channel_id(&self) -> Option<String> {
        self.channel_id.read().await.clone()
    }

    /// Watching a different channel starts de-duplication over.
    pub async fn set_channel_id(&self, channel_id: String) {
        let mut current = self.channel_id.write().await;
        if current.as_deref() != Some(channel_id.as_str()) {
            *self.last_seen.lock().await = None;
            info!("Now watching YouTube channel {}", channel_id);
        }
        *current = Some(channel_id);
    }

    pub async fn last_seen(&self) -> Option<String> {
        self.last_seen.lock().await.clone()
    }

    /// `true` for exactly one caller.
    pub fn mark_started(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn mark_stopped(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Notified(Video),
    /// Latest upload was already announced.
    Unchanged,
    NoUploads,
    NotConfigured,
    FetchFailed,
    /// The watched channel changed while fetching; the result belongs to the old one.
    ChannelChanged,
    /// The id was recorded but the message could not be delivered; it will not be retried.
    NotifyFailed(Video),
}

pub struct NotificationPoller {
    source: Arc<dyn VideoSource>,
    notifier: Arc<dyn Notifier>,
    watch: Arc<VideoWatch>,
}

impl NotificationPoller {
    pub fn new(
        source: Arc<dyn VideoSource>,
        notifier: Arc<dyn Notifier>,
        watch: Arc<VideoWatch>,
    ) -> Self {
        Self {
            source,
            notifier,
            watch,
        }
    }

    pub async fn poll(&self) -> PollOutcome {
        let Some(channel_id) = self.watch.channel_id().await else {
            return PollOutcome::NotConfigured;
        };

        let video = match self.source.latest_upload(&channel_id).await {
            Ok(Some(video)) => video,
            Ok(None) => return PollOutcome::NoUploads,
            Err(e) => {
                warn!("Could not check {} for new uploads: {}", channel_id, e);
                return PollOutcome::FetchFailed;
            }
        };

        {
            // Same lock order as `set_channel_id`, so a switch cannot land in between.
            let watched = self.watch.channel_id.read().await;
            if watched.as_deref() != Some(channel_id.as_str()) {
                debug!("Dropping upload from {}, no longer watched", channel_id);
                return PollOutcome::ChannelChanged;
            }
            let mut last_seen = self.watch.last_seen.lock().await;
            if last_seen.as_deref() == Some(video.id.as_str()) {
                return PollOutcome::Unchanged;
            }
            *last_seen = Some(video.id.clone());
        }

        match self.notifier.notify(&video).await {
            Ok(()) => {
                info!("Announced new upload \"{}\"", video.title);
                PollOutcome::Notified(video)
            }
            Err(e) => {
                error!("Could not announce \"{}\": {}", video.title, e);
                PollOutcome::NotifyFailed(video)
            }
        }
    }

    /// Poll immediately, then every `interval`, until `shutdown` flips or its sender is dropped.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Started upload notifications, every {}s", interval.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.watch.mark_stopped();
        info!("Stopped upload notifications");
    }
}
