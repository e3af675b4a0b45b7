mod config;
mod config_store;
mod context;
mod discord_view;
mod emoji;
mod event;
mod handler;
mod helper;
mod logging;
mod lyrics;
mod playback;
mod plugin;
mod poller;
mod reconciler;
mod voice;
mod youtube;
mod ytdlp;

use crate::{
    config::Config,
    config_store::ConfigStore,
    handler::{Handler, Services},
    playback::Player,
    poller::VideoWatch,
    ytdlp::YtDlp,
};
use serenity::{all::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = Config::load().await?;
    let token = cfg.general.discord_token.clone();

    let store_path = match &cfg.storage.snapshot_path {
        Some(path) => path.clone(),
        None => ConfigStore::default_path()?,
    };
    let store = Arc::new(ConfigStore::load(store_path).await);

    let (player, track_events) = Player::new(cfg.music.default_volume);
    let player = Arc::new(player);
    tokio::spawn(player.clone().drive(track_events));

    // Songbird's yt-dlp input wants a 'static program name; reloads keep the startup value.
    let yt_dlp: &'static str = Box::leak(cfg.music.yt_dlp.clone().into_boxed_str());
    let resolver = YtDlp::new(yt_dlp, cfg.music.playlist_limit);

    let (shutdown_tx, shutdown) = watch::channel(false);
    let services = Services {
        store: store.clone(),
        player,
        videos: Arc::new(VideoWatch::default()),
        resolver: Box::new(resolver),
        web: reqwest::Client::new(),
        yt_dlp,
        shutdown,
    };
    let handler = Handler::new(cfg, services);

    // Things we want discord to tell us about.
    let intents = GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for ctrl-c: {}", e);
            return;
        }
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
        shard_manager.shutdown_all().await;
    });

    client.start().await?;

    // Mutations whose write failed are still in memory; one last attempt.
    if let Err(e) = store.flush().await {
        error!("{}", e);
    }
    Ok(())
}
