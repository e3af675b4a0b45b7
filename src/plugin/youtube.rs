use crate::{
    event::*,
    helper::MessageHelper,
    log_internal,
    plugin::*,
    poller::{NotificationPoller, Notifier},
    youtube::{parse_channel_reference, Video, YouTubeClient},
};
use anyhow::Result;
use serenity::all::{ChannelId, Colour, CreateEmbed, CreateMessage, Http, Message};
use std::{sync::Arc, time::Duration};
use tracing::warn;

const SET_CHANNEL: &[&str] = &["set_youtube_channel", "syc"];
const STATUS: &[&str] = &["youtube_status", "ys"];

/// Configures and reports on new-upload notifications.
pub struct YouTube;

#[serenity::async_trait]
impl Plugin for YouTube {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{p}set_youtube_channel|syc <url|id> - announce new uploads from a channel (admin)\n\
             {p}youtube_status|ys - show upload notification status (admin)",
            p = prefix
        ))
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        if let Some((msg, args)) = event.is_bot_cmd(ctx, SET_CHANNEL).await {
            if admin_only(ctx, msg).await? {
                set_channel(ctx, msg, args).await?;
            }
            return Ok(EventHandled::Yes);
        }
        if let Some((msg, _)) = event.is_bot_cmd(ctx, STATUS).await {
            if admin_only(ctx, msg).await? {
                status(ctx, msg).await?;
            }
            return Ok(EventHandled::Yes);
        }
        Ok(EventHandled::No)
    }
}

async fn admin_only(ctx: &Context<'_>, msg: &Message) -> Result<bool> {
    if msg.is_from_admin(ctx).await {
        return Ok(true);
    }
    msg.reply(
        ctx.cache_http,
        "❌ You need 'Administrator' permission to use this command!",
    )
    .await?;
    Ok(false)
}

/// Posts the configured announcement into a Discord channel.
struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
    template: crate::config::Video,
}

#[serenity::async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, video: &Video) -> Result<()> {
        let text = self.template.render(&video.title, &video.url());
        self.channel_id.say(&*self.http, text).await?;
        Ok(())
    }
}

fn client(ctx: &Context<'_>, api_key: &str) -> YouTubeClient {
    YouTubeClient::new(ctx.web.clone(), api_key)
}

/// Start the upload poller unless it is already running or the configuration lacks an API key
/// or announcement channel.  Returns whether a poller was started.
pub(super) async fn start_poller(ctx: &Context<'_>) -> bool {
    let video_cfg = ctx.cfg.read().await.video.clone();
    let (Some(api_key), Some(notify_channel_id)) = (
        video_cfg.api_key.as_deref().filter(|key| !key.is_empty()),
        video_cfg.notify_channel_id.filter(|id| *id != 0),
    ) else {
        return false;
    };

    if !ctx.videos.mark_started() {
        return false;
    }

    let client = client(ctx, api_key);
    if let (None, Some(configured)) = (ctx.videos.channel_id().await, &video_cfg.channel) {
        match parse_channel_reference(configured) {
            Some(reference) => match client.resolve(reference).await {
                Ok(Some(channel_id)) => ctx.videos.set_channel_id(channel_id).await,
                Ok(None) => warn!("Configured YouTube channel {} does not exist", configured),
                Err(e) => warn!("Could not resolve YouTube channel {}: {:#}", configured, e),
            },
            None => warn!("Configured YouTube channel {} is not a URL, handle or id", configured),
        }
    }

    let notifier = ChannelNotifier {
        http: ctx.http.clone(),
        channel_id: ChannelId::new(notify_channel_id),
        template: video_cfg.clone(),
    };
    let poller = NotificationPoller::new(
        Arc::new(client),
        Arc::new(notifier),
        ctx.videos.clone(),
    );
    let interval = Duration::from_secs(video_cfg.poll_interval_seconds.max(1));
    tokio::spawn(poller.run(interval, ctx.shutdown.clone()));
    true
}

async fn set_channel(ctx: &Context<'_>, msg: &Message, args: &str) -> Result<()> {
    let Some(reference) = parse_channel_reference(args) else {
        msg.reply(
            ctx.cache_http,
            "❌ Please give a channel URL (`/channel/<id>` or `/@handle`), a handle or a channel ID.",
        )
        .await?;
        return Ok(());
    };

    let api_key = ctx.cfg.read().await.video.api_key.clone();
    let Some(api_key) = api_key.filter(|key| !key.is_empty()) else {
        msg.reply(ctx.cache_http, "❌ No YouTube API key is configured.")
            .await?;
        return Ok(());
    };

    let response = match client(ctx, &api_key).resolve(reference).await {
        Ok(Some(channel_id)) => {
            ctx.videos.set_channel_id(channel_id.clone()).await;
            log_internal!("YouTube channel set to {} by {}", channel_id, msg.author.name);
            let started = start_poller(ctx).await;
            if started || ctx.videos.is_running() {
                format!("✅ Now announcing new uploads from `{}`", channel_id)
            } else {
                format!(
                    "⚠️ Channel set to `{}`, but no announcement channel is configured.",
                    channel_id
                )
            }
        }
        Ok(None) => "❌ Could not find that YouTube channel.".to_owned(),
        Err(e) => {
            warn!("YouTube channel lookup failed: {:#}", e);
            "❌ Could not reach YouTube, try again later.".to_owned()
        }
    };

    msg.reply(ctx.cache_http, response).await?;
    Ok(())
}

async fn status(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let api_key_set = ctx
        .cfg
        .read()
        .await
        .video
        .api_key
        .as_deref()
        .is_some_and(|key| !key.is_empty());
    let channel = ctx
        .videos
        .channel_id()
        .await
        .unwrap_or_else(|| "Not set".to_owned());
    let last_seen = ctx
        .videos
        .last_seen()
        .await
        .unwrap_or_else(|| "None yet".to_owned());
    let running = ctx.videos.is_running();

    let yes_no = |b: bool| if b { "✅ Yes" } else { "❌ No" };
    let embed = CreateEmbed::new()
        .title("YouTube Monitor Status")
        .colour(if running { Colour::DARK_GREEN } else { Colour::RED })
        .field("API Key Set", yes_no(api_key_set), true)
        .field("Channel ID", channel, true)
        .field("Monitoring Active", yes_no(running), true)
        .field("Last Video ID", last_seen, true);

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}
