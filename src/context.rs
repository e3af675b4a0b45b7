use crate::{
    config::Config, config_store::ConfigStore, discord_view::DiscordView, playback::Player,
    poller::VideoWatch, ytdlp::TrackResolver,
};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Collection of data that is shared across events
pub struct Context<'a> {
    // Sagebot's own context types
    pub cfg: &'a RwLock<Config>,
    pub store: &'a ConfigStore,
    pub player: &'a Arc<Player>,
    pub videos: &'a Arc<VideoWatch>,
    pub resolver: &'a dyn TrackResolver,
    /// Shared client for YouTube, lyrics and voice input.
    pub web: &'a reqwest::Client,
    pub yt_dlp: &'static str,
    pub shutdown: &'a watch::Receiver<bool>,
    // Discord/Serenity context types
    pub cache: &'a Arc<serenity::all::Cache>,
    pub http: &'a Arc<serenity::all::Http>,
    pub cache_http: &'a CacheHttp,
}

impl Context<'_> {
    pub fn view(&self) -> DiscordView<'_> {
        DiscordView {
            cache: self.cache,
            http: self.http,
        }
    }
}

/// Many Serenity functions take a `impl CacheHttp` in order to first check the cache if the item
/// is available and fall back to an http request otherwise.  The most readily available type that
/// impl's this is named very differently in a way that could be confusing, and so we alias it.
pub type CacheHttp = serenity::all::Context;
