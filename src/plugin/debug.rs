use crate::{emoji::EmojiKey, event::*, log_event, logging::*, plugin::*};
use anyhow::Result;
use serenity::all::{Interaction, Reaction};
use std::borrow::Cow;

/// Logs information about every event
pub struct Debug;

fn emoji_name(reaction: &Reaction) -> Cow<'static, str> {
    match EmojiKey::from_reaction(&reaction.emoji) {
        Ok(key) => Cow::Owned(key.to_string()),
        Err(_) => Cow::Borrowed("<unknown-emoji>"),
    }
}

#[serenity::async_trait]
impl Plugin for Debug {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn usage(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        match event {
            Event::Ready(ready) => {
                log_event!(
                    "Connected to {} server(s) as {}",
                    ready.guilds.len(),
                    ready.user.color(),
                );
            }
            Event::Message(msg) => {
                log_event!(
                    "{}{}{}{}{}{} {}",
                    msg.guild_id.color(ctx.http).await,
                    Glue {}.color(),
                    msg.channel_id.color(ctx.http).await,
                    Glue {}.color(),
                    msg.author.color(),
                    Glue {}.color(),
                    msg.content,
                );
            }
            Event::VoiceStateUpdate { old, new } => match (old, new.channel_id) {
                (Some(old), Some(new_id)) if old.channel_id == Some(new_id) => {
                    // State change within same channel, e.g. mute/unmute
                }
                (Some(old), Some(_)) => log_event!(
                    "{} moved VC channel from \"{}\" to \"{}\"",
                    new.user_id.color(ctx.http).await,
                    old.channel_id.color(ctx.http).await,
                    new.channel_id.color(ctx.http).await,
                ),
                (Some(old), None) => log_event!(
                    "{} left VC channel \"{}\"",
                    new.user_id.color(ctx.http).await,
                    old.channel_id.color(ctx.http).await,
                ),
                (None, Some(_)) => log_event!(
                    "{} joined VC channel \"{}\"",
                    new.user_id.color(ctx.http).await,
                    new.channel_id.color(ctx.http).await,
                ),
                (None, None) => log_event!("Unknown voice state update"),
            },
            Event::ReactionAdd(reaction) => {
                log_event!(
                    "{} reacted to message {} in \"{}\" with \"{}\"",
                    reaction.user_id.color(ctx.http).await,
                    reaction.message_id,
                    reaction.channel_id.color(ctx.http).await,
                    emoji_name(reaction),
                );
            }
            Event::ReactionRemove(reaction) => {
                log_event!(
                    "{} removed reaction \"{}\" from message {} in \"{}\"",
                    reaction.user_id.color(ctx.http).await,
                    emoji_name(reaction),
                    reaction.message_id,
                    reaction.channel_id.color(ctx.http).await,
                );
            }
            Event::GuildCreate { guild, is_new } => {
                if *is_new == Some(true) {
                    log_event!("Joined server {}", guild.color());
                }
            }
            Event::GuildDelete { incomplete } => {
                if incomplete.unavailable {
                    log_event!("Server {} became unavailable", incomplete.id);
                } else {
                    log_event!("Removed from server {}", incomplete.id);
                }
            }
            Event::Interaction(Interaction::Component(component)) => {
                log_event!(
                    "{} pressed \"{}\" in \"{}\"",
                    component.user.color(),
                    component.data.custom_id,
                    component.channel_id.color(ctx.http).await,
                );
            }
            Event::Interaction(_) => {}
        }

        Ok(EventHandled::No)
    }
}
