use crate::{
    config::Config, config_store::ConfigStore, context::Context, event::Event, playback::Player,
    poller::VideoWatch, ytdlp::TrackResolver,
};
use serenity::all::{
    Guild, Interaction, Message, Reaction, Ready, UnavailableGuild, VoiceState,
};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Long-lived components the plugins work with.
pub struct Services {
    pub store: Arc<ConfigStore>,
    pub player: Arc<Player>,
    pub videos: Arc<VideoWatch>,
    pub resolver: Box<dyn TrackResolver>,
    pub web: reqwest::Client,
    pub yt_dlp: &'static str,
    pub shutdown: watch::Receiver<bool>,
}

/// Discord event handler
pub struct Handler {
    cfg: RwLock<Config>,
    services: Services,
}

impl<'a> Handler {
    pub fn new(cfg: Config, services: Services) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            services,
        }
    }

    fn ctx(&'a self, discord_ctx: &'a serenity::all::Context) -> Context<'a> {
        let services = &self.services;
        Context {
            cfg: &self.cfg,
            store: &services.store,
            player: &services.player,
            videos: &services.videos,
            resolver: services.resolver.as_ref(),
            web: &services.web,
            yt_dlp: services.yt_dlp,
            shutdown: &services.shutdown,
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        Event::Ready(ready).handle(self.ctx(&discord_ctx)).await;
    }

    async fn message(&self, discord_ctx: serenity::all::Context, msg: Message) {
        Event::Message(msg).handle(self.ctx(&discord_ctx)).await;
    }

    async fn voice_state_update(
        &self,
        discord_ctx: serenity::all::Context,
        old: Option<VoiceState>,
        new: VoiceState,
    ) {
        Event::VoiceStateUpdate { old, new }
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn reaction_add(&self, discord_ctx: serenity::all::Context, reaction: Reaction) {
        Event::ReactionAdd(reaction)
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn reaction_remove(&self, discord_ctx: serenity::all::Context, reaction: Reaction) {
        Event::ReactionRemove(reaction)
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn guild_create(
        &self,
        discord_ctx: serenity::all::Context,
        guild: Guild,
        is_new: Option<bool>,
    ) {
        Event::GuildCreate { guild, is_new }
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn guild_delete(
        &self,
        discord_ctx: serenity::all::Context,
        incomplete: UnavailableGuild,
        _full: Option<Guild>,
    ) {
        Event::GuildDelete { incomplete }
            .handle(self.ctx(&discord_ctx))
            .await;
    }

    async fn interaction_create(&self, discord_ctx: serenity::all::Context, interaction: Interaction) {
        Event::Interaction(interaction)
            .handle(self.ctx(&discord_ctx))
            .await;
    }
}
