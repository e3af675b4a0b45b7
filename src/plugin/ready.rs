use crate::{event::*, log_internal, plugin::*};
use anyhow::Result;
use serenity::all::ActivityData;
use tracing::debug;

/// Presence, per-server nickname and background tasks once the connection to Discord is ready.
pub struct Ready;

#[serenity::async_trait]
impl Plugin for Ready {
    fn name(&self) -> &'static str {
        "ready"
    }

    async fn usage(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Event::Ready(ready) = event else {
            return Ok(EventHandled::No);
        };

        let (activity, nickname) = {
            let cfg = ctx.cfg.read().await;
            (cfg.general.activity.clone(), cfg.general.nickname.clone())
        };

        if let Some(activity) = activity {
            ctx.cache_http
                .set_activity(Some(ActivityData::watching(activity)));
        }

        if let Some(nickname) = nickname {
            for guild in &ready.guilds {
                // Missing "Change Nickname" is not worth more than a debug line.
                if let Err(e) = guild.id.edit_nickname(ctx.http, Some(&nickname)).await {
                    debug!("Could not set nickname in guild {}: {}", guild.id, e);
                }
            }
        }

        // Reconnects deliver Ready again; the poller only starts the first time.
        if crate::plugin::youtube::start_poller(ctx).await {
            log_internal!("Upload notifications are running");
        }

        Ok(EventHandled::Yes)
    }
}
