use crate::{event::*, log_internal, plugin::*};
use anyhow::Result;

/// Forgets a server's configuration when the bot is removed from it.
pub struct Guilds;

#[serenity::async_trait]
impl Plugin for Guilds {
    fn name(&self) -> &'static str {
        "guilds"
    }

    async fn usage(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Event::GuildDelete { incomplete } = event else {
            return Ok(EventHandled::No);
        };

        // Outages also arrive as guild deletes; only a real removal clears state.
        if incomplete.unavailable {
            return Ok(EventHandled::Yes);
        }

        ctx.player.forget(incomplete.id).await;
        if ctx.store.purge_guild(incomplete.id).await? {
            log_internal!("Purged configuration of server {}", incomplete.id);
        }

        Ok(EventHandled::Yes)
    }
}
