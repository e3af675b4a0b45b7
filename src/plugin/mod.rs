pub use crate::context::Context;
use crate::event::{Event, EventHandled};
use anyhow::Result;

mod debug;
mod guilds;
mod help;
mod ignore_bots;
mod music;
mod reaction_roles;
mod ready;
mod reload;
mod welcome;
mod youtube;

#[serenity::async_trait]
pub trait Plugin: Sync + Send {
    /// Plugin name.  Used for debug, and as the command name where there is one
    fn name(&self) -> &'static str;
    /// Help message line(s).  None if no help message
    async fn usage(&self, ctx: &Context) -> Option<String>;
    /// Potentially handle event.  Returns:
    /// - Ok(EventHandled::Yes) if the event has been handled and no other plugin should attempt to
    /// handle it
    /// - Ok(EventHandled::No) if another plugin should attempt to handle the event
    /// - Err if an error occurred
    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled>;
}

/// Ordered list of available plugins
pub fn plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        // Core bot operations
        Box::new(debug::Debug),
        Box::new(ignore_bots::IgnoreBots),
        Box::new(ready::Ready),
        Box::new(guilds::Guilds),
        Box::new(help::Help),
        Box::new(reload::Reload),
        // Roles
        Box::new(reaction_roles::ReactionRoles),
        Box::new(welcome::Welcome),
        // Notifications
        Box::new(youtube::YouTube),
        // Voice
        Box::new(music::Music),
    ]
}
