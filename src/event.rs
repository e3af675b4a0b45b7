//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  However, this does not mesh well with our plugin framework here.  To resolve this,
//! `Handler` translates the callbacks into a distinct Event enum.

use crate::context::Context;
use serenity::all::{Guild, Interaction, Message, Reaction, Ready, UnavailableGuild, VoiceState};
use tracing::error;

/// A Discord event
pub enum Event {
    Ready(Ready),
    Message(Message),
    ReactionAdd(Reaction),
    ReactionRemove(Reaction),
    GuildCreate {
        guild: Guild,
        is_new: Option<bool>,
    },
    GuildDelete {
        incomplete: UnavailableGuild,
    },
    VoiceStateUpdate {
        old: Option<VoiceState>,
        new: VoiceState,
    },
    Interaction(Interaction),
}

impl Event {
    // When an event occurs, iterate over all the plugins to see if any can/should handle it.
    pub async fn handle(self, ctx: Context<'_>) {
        for plugin in crate::plugin::plugins() {
            match plugin.handle(&ctx, &self).await {
                Ok(EventHandled::Yes) => return,
                Ok(EventHandled::No) => continue,
                Err(err) => error!("Error in plugin {}: {:#}", plugin.name(), err),
            }
        }
    }

    /// Check if a message invokes one of the bot commands in `names`, e.g. `!play some song`.
    /// Returns the message and the trimmed remainder after the command word.
    pub async fn is_bot_cmd<'e>(
        &'e self,
        ctx: &Context<'_>,
        names: &[&str],
    ) -> Option<(&'e Message, &'e str)> {
        let Event::Message(msg) = self else {
            return None;
        };

        let prefix = ctx.cfg.read().await.general.command_prefix.clone();
        let (cmd, args) = split_command(&msg.content, &prefix)?;

        names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(cmd))
            .then_some((msg, args))
    }
}

/// `"!cmd  some args "` -> `("cmd", "some args")`
fn split_command<'c>(content: &'c str, prefix: &str) -> Option<(&'c str, &'c str)> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    let (cmd, args) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));

    if cmd.is_empty() {
        return None;
    }
    Some((cmd, args.trim()))
}

pub enum EventHandled {
    Yes,
    No,
}
