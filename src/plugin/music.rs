use crate::{
    event::*,
    helper::{progress_bar, truncate, MESSAGE_LIMIT},
    lyrics,
    playback::{format_duration, Track},
    plugin::*,
    voice,
};
use anyhow::Result;
use serenity::all::{ChannelId, Colour, CreateEmbed, CreateMessage, GuildId, Message};
use std::fmt::Write;
use tracing::debug;

const SHOWN_IN_QUEUE: usize = 10;
const SEARCH_RESULTS: usize = 5;

#[derive(Clone, Copy)]
enum Command {
    Play,
    Queue,
    Skip,
    Pause,
    Resume,
    Stop,
    Loop,
    Volume,
    NowPlaying,
    Search,
    Lyrics,
}

const COMMANDS: &[(&[&str], Command)] = &[
    (&["play", "p"], Command::Play),
    (&["queue", "q"], Command::Queue),
    (&["skip"], Command::Skip),
    (&["pause"], Command::Pause),
    (&["resume"], Command::Resume),
    (&["stop"], Command::Stop),
    (&["loop"], Command::Loop),
    (&["volume", "vol"], Command::Volume),
    (&["nowplaying", "np"], Command::NowPlaying),
    (&["search"], Command::Search),
    (&["lyrics"], Command::Lyrics),
];

/// Voice channel music queue.
pub struct Music;

#[serenity::async_trait]
impl Plugin for Music {
    fn name(&self) -> &'static str {
        "music"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{p}play|p <url|search> - play a song or playlist in your voice channel\n\
             {p}queue|q - show what's coming up\n\
             {p}skip, {p}pause, {p}resume, {p}stop - control playback\n\
             {p}loop - repeat the current song\n\
             {p}volume|vol [0-100] - show or set the volume\n\
             {p}nowplaying|np - show the current song\n\
             {p}search <query> - list the top {n} matches\n\
             {p}lyrics [title] - lyrics for a song, or for the current one",
            p = prefix,
            n = SEARCH_RESULTS
        ))
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        if let Event::VoiceStateUpdate { new, .. } = event {
            // Kicked or disconnected: nothing can play until the next `play`.
            if let (Some(guild_id), None) = (new.guild_id, new.channel_id) {
                if new.user_id == ctx.cache.current_user().id {
                    debug!("Left voice in guild {}, dropping its queue", guild_id);
                    ctx.player.stop(guild_id).await;
                }
            }
            return Ok(EventHandled::No);
        }

        let mut matched = None;
        for (names, command) in COMMANDS {
            if let Some((msg, args)) = event.is_bot_cmd(ctx, names).await {
                matched = Some((msg, args, *command));
                break;
            }
        }
        let Some((msg, args, command)) = matched else {
            return Ok(EventHandled::No);
        };

        let Some(guild_id) = msg.guild_id else {
            msg.reply(ctx.cache_http, "❌ Music only works in a server.")
                .await?;
            return Ok(EventHandled::Yes);
        };

        let response = match command {
            Command::Play => play(ctx, msg, guild_id, args).await?,
            Command::Queue => queue(ctx, guild_id).await,
            Command::Skip => {
                if ctx.player.skip(guild_id).await {
                    "⏭️ Skipped".to_owned()
                } else {
                    "❌ Nothing is playing.".to_owned()
                }
            }
            Command::Pause => {
                if ctx.player.pause(guild_id).await {
                    "⏸️ Paused".to_owned()
                } else {
                    "❌ Nothing is playing.".to_owned()
                }
            }
            Command::Resume => {
                if ctx.player.resume(guild_id).await {
                    "▶️ Resumed".to_owned()
                } else {
                    "❌ Nothing is paused.".to_owned()
                }
            }
            Command::Stop => {
                ctx.player.stop(guild_id).await;
                "⏹️ Stopped and cleared the queue".to_owned()
            }
            Command::Loop => {
                if ctx.player.toggle_loop(guild_id).await {
                    "🔂 Looping the current song".to_owned()
                } else {
                    "➡️ Loop disabled".to_owned()
                }
            }
            Command::Volume => volume(ctx, guild_id, args).await,
            Command::NowPlaying => {
                now_playing(ctx, msg, guild_id).await?;
                return Ok(EventHandled::Yes);
            }
            Command::Search => search(ctx, args).await,
            Command::Lyrics => lyrics(ctx, guild_id, args).await,
        };

        msg.reply(ctx.cache_http, truncate(&response, MESSAGE_LIMIT))
            .await?;
        Ok(EventHandled::Yes)
    }
}

fn author_voice_channel(ctx: &Context<'_>, guild_id: GuildId, msg: &Message) -> Option<ChannelId> {
    ctx.cache
        .guild(guild_id)?
        .voice_states
        .get(&msg.author.id)
        .and_then(|state| state.channel_id)
}

async fn play(ctx: &Context<'_>, msg: &Message, guild_id: GuildId, args: &str) -> Result<String> {
    if args.is_empty() {
        return Ok("❌ Give me a link or something to search for.".to_owned());
    }

    if !ctx.player.has_sink(guild_id).await {
        let Some(channel_id) = author_voice_channel(ctx, guild_id, msg) else {
            return Ok("❌ Join a voice channel first!".to_owned());
        };
        let manager = voice::manager(ctx.cache_http).await?;
        match voice::connect(manager, ctx.web.clone(), ctx.yt_dlp, guild_id, channel_id).await {
            Ok(sink) => ctx.player.attach_sink(guild_id, sink).await,
            Err(e) => return Ok(format!("❌ {}", e)),
        }
    }

    let tracks = match ctx.resolver.resolve(args).await {
        Ok(tracks) if !tracks.is_empty() => tracks,
        Ok(_) => return Ok("❌ Nothing found.".to_owned()),
        Err(e) => {
            debug!("Could not resolve {:?}: {:#}", args, e);
            return Ok("❌ Could not load that, is the link right?".to_owned());
        }
    };

    let first_title = tracks[0].title.clone();
    let added = ctx.player.enqueue(guild_id, tracks).await;
    let started = ctx.player.start_if_idle(guild_id).await;

    Ok(match (added, started) {
        (1, Some(track)) => format!("🎶 Now playing **{}**", track.title),
        (1, None) => format!(
            "➕ Queued **{}** (position {})",
            first_title,
            ctx.player.upcoming(guild_id).await.len()
        ),
        (n, Some(track)) => format!("🎶 Added {} songs, now playing **{}**", n, track.title),
        (n, None) => format!("➕ Queued {} songs", n),
    })
}

async fn queue(ctx: &Context<'_>, guild_id: GuildId) -> String {
    let current = ctx.player.now_playing(guild_id).await;
    let upcoming = ctx.player.upcoming(guild_id).await;
    format_queue(current.as_ref(), &upcoming)
}

fn format_queue(current: Option<&Track>, upcoming: &[Track]) -> String {
    if current.is_none() && upcoming.is_empty() {
        return "📭 The queue is empty.".to_owned();
    }

    let mut out = String::new();
    if let Some(track) = current {
        let _ = writeln!(out, "**Now playing:** {}", describe(track));
    }
    if upcoming.is_empty() {
        out.push_str("Nothing else queued.");
        return out;
    }

    out.push_str("**Up next:**\n");
    for (i, track) in upcoming.iter().take(SHOWN_IN_QUEUE).enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, describe(track));
    }
    if upcoming.len() > SHOWN_IN_QUEUE {
        let _ = writeln!(out, "…and {} more", upcoming.len() - SHOWN_IN_QUEUE);
    }
    out
}

fn describe(track: &Track) -> String {
    match track.duration_seconds {
        Some(seconds) => format!("{} `[{}]`", track.title, format_duration(seconds)),
        None => track.title.clone(),
    }
}

/// `0`..=`100` to a sink volume.
fn parse_volume_percent(arg: &str) -> Option<f32> {
    let percent = arg.trim().trim_end_matches('%').parse::<u8>().ok()?;
    (percent <= 100).then(|| f32::from(percent) / 100.0)
}

fn as_percent(volume: f32) -> u8 {
    (volume * 100.0).round().clamp(0.0, 100.0) as u8
}

async fn volume(ctx: &Context<'_>, guild_id: GuildId, args: &str) -> String {
    if args.is_empty() {
        return format!("🔊 Volume is {}%", as_percent(ctx.player.volume(guild_id).await));
    }

    match parse_volume_percent(args) {
        Some(volume) if ctx.player.set_volume(guild_id, volume).await => {
            format!("🔊 Volume set to {}%", as_percent(volume))
        }
        _ => "❌ Volume must be a number from 0 to 100.".to_owned(),
    }
}

async fn now_playing(ctx: &Context<'_>, msg: &Message, guild_id: GuildId) -> Result<()> {
    let (Some(progress), Some(track)) = (
        ctx.player.progress(guild_id).await,
        ctx.player.now_playing(guild_id).await,
    ) else {
        msg.reply(ctx.cache_http, "❌ Nothing is playing.").await?;
        return Ok(());
    };

    let position = match progress.duration_seconds {
        Some(duration) => format!(
            "{} {} / {}",
            progress_bar(progress.percent, 20),
            format_duration(progress.elapsed_seconds),
            format_duration(duration)
        ),
        None => format!("{} elapsed", format_duration(progress.elapsed_seconds)),
    };

    let mut embed = CreateEmbed::new()
        .title("Now Playing")
        .colour(Colour::BLURPLE)
        .description(format!("[{}]({})\n{}", track.title, track.source_url, position))
        .field(
            "Volume",
            format!("{}%", as_percent(ctx.player.volume(guild_id).await)),
            true,
        )
        .field(
            "Up next",
            ctx.player.upcoming(guild_id).await.len().to_string(),
            true,
        );
    if let Some(thumbnail) = &track.thumbnail_url {
        embed = embed.thumbnail(thumbnail);
    }

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn search(ctx: &Context<'_>, query: &str) -> String {
    if query.is_empty() {
        return "❌ What should I search for?".to_owned();
    }

    match ctx.resolver.search(query, SEARCH_RESULTS).await {
        Ok(tracks) if tracks.is_empty() => "❌ Nothing found.".to_owned(),
        Ok(tracks) => {
            let mut out = format!("🔎 Results for **{}**:\n", query);
            for (i, track) in tracks.iter().enumerate() {
                let _ = writeln!(out, "{}. {} <{}>", i + 1, describe(track), track.source_url);
            }
            out
        }
        Err(e) => {
            debug!("Search for {:?} failed: {:#}", query, e);
            "❌ Search failed, try again later.".to_owned()
        }
    }
}

async fn lyrics(ctx: &Context<'_>, guild_id: GuildId, args: &str) -> String {
    let title = if args.is_empty() {
        match ctx.player.now_playing(guild_id).await {
            Some(track) => track.title,
            None => return "❌ Nothing is playing, give me a song title.".to_owned(),
        }
    } else {
        args.to_owned()
    };

    match lyrics::lookup(ctx.web, &title).await {
        Ok(Some(found)) => format!("📜 **{}** by {}\n\n{}", found.title, found.artist, found.text),
        Ok(None) => format!("❌ No lyrics found for **{}**", title),
        Err(e) => {
            debug!("Lyrics lookup for {:?} failed: {:#}", title, e);
            "❌ Couldn't reach the lyrics service.".to_owned()
        }
    }
}
