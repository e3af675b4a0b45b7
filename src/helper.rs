//! Miscellaneous convenience methods

use crate::context::Context;
use serenity::all::Permissions;
use tracing::warn;

#[serenity::async_trait]
pub trait MessageHelper {
    async fn is_from_owner(&self, ctx: &Context) -> bool;
    /// Bot owner, guild owner, or a member with the Administrator permission.  Always false
    /// outside of guilds for everyone but bot owners.
    async fn is_from_admin(&self, ctx: &Context) -> bool;
}

#[serenity::async_trait]
impl MessageHelper for serenity::all::Message {
    async fn is_from_owner(&self, ctx: &Context) -> bool {
        let owners = &ctx.cfg.read().await.general.bot_owners;
        let author_global_name = &self.author.name;

        owners.contains(author_global_name)
    }

    async fn is_from_admin(&self, ctx: &Context) -> bool {
        if self.is_from_owner(ctx).await {
            return true;
        }
        let Some(guild_id) = self.guild_id else {
            return false;
        };

        match ctx.view().permissions(guild_id, self.author.id).await {
            Ok(permissions) => permissions.contains(Permissions::ADMINISTRATOR),
            Err(e) => {
                warn!(
                    "Could not check permissions of {} in guild {}: {}",
                    self.author.name, guild_id, e
                );
                false
            }
        }
    }
}

/// Render up to `width` cells of a progress bar for `percent` (0..=100).
pub fn progress_bar(percent: u8, width: usize) -> String {
    let filled = (usize::from(percent.min(100)) * width) / 100;
    format!("{}{}", "▬".repeat(filled), "─".repeat(width - filled))
}

/// Discord rejects messages longer than this.
pub const MESSAGE_LIMIT: usize = 2000;

/// Cut `text` to at most `limit` characters, marking the cut.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(0, 4), "────");
        assert_eq!(progress_bar(50, 4), "▬▬──");
        assert_eq!(progress_bar(100, 4), "▬▬▬▬");
        assert_eq!(progress_bar(250, 4), "▬▬▬▬");
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ありがとうございます", 5), "ありがと…");
        assert_eq!(truncate("abcdef", 6), "abcdef");
    }
}
