use crate::{
    config_store::{AddOutcome, ReactionRoleEntry, RemoveOutcome},
    emoji::{EmojiError, EmojiKey},
    event::*,
    helper::MessageHelper,
    log_internal,
    plugin::*,
    reconciler::{self, check_assignable, Direction, PlatformView, ReactionEvent, ReactionOutcome},
};
use anyhow::Result;
use serenity::all::{
    Colour, CreateEmbed, CreateMessage, GuildId, Message, MessageId, Permissions, Reaction,
};
use tracing::debug;

const SETUP: &[&str] = &["setup_reaction_role", "srr"];
const REMOVE: &[&str] = &["remove_reaction_role", "rrr"];
const LIST: &[&str] = &["list_reaction_roles", "lrr"];
const CLEANUP: &[&str] = &["cleanup_reaction_roles"];
const TEST_PERMISSIONS: &[&str] = &["test_permissions"];

const NOT_ADMIN: &str = "❌ You need 'Administrator' permission to use this command!";

/// Grant and revoke roles from reactions, and the commands that configure them.
pub struct ReactionRoles;

#[serenity::async_trait]
impl Plugin for ReactionRoles {
    fn name(&self) -> &'static str {
        "reaction_roles"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{p}setup_reaction_role|srr <message-id> <emoji> <role> - react with <emoji> on a \
             message in this channel to get <role> (admin)\n\
             {p}remove_reaction_role|rrr <message-id> <emoji> - undo a reaction role (admin)\n\
             {p}list_reaction_roles|lrr - list this server's reaction roles (admin)\n\
             {p}cleanup_reaction_roles - drop reaction roles whose role or channel is gone (admin)\n\
             {p}test_permissions - check what I'm allowed to do here (admin)",
            p = prefix
        ))
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        match event {
            Event::ReactionAdd(reaction) => handle_reaction(ctx, reaction, Direction::Add).await,
            Event::ReactionRemove(reaction) => {
                handle_reaction(ctx, reaction, Direction::Remove).await
            }
            Event::Message(_) => handle_command(ctx, event).await,
            _ => Ok(EventHandled::No),
        }
    }
}

async fn handle_reaction(
    ctx: &Context<'_>,
    reaction: &Reaction,
    direction: Direction,
) -> Result<EventHandled> {
    let (Some(guild_id), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
        return Ok(EventHandled::No);
    };
    let Ok(emoji) = EmojiKey::from_reaction(&reaction.emoji) else {
        return Ok(EventHandled::No);
    };

    let event = ReactionEvent {
        guild_id,
        channel_id: reaction.channel_id,
        message_id: reaction.message_id,
        user_id,
        emoji,
        direction,
    };

    let outcome = reconciler::reconcile(ctx.store, &ctx.view(), &event).await;
    debug!("Reaction {:?} by {}: {:?}", direction, user_id, outcome);

    Ok(match outcome {
        ReactionOutcome::NotConfigured | ReactionOutcome::OwnReaction => EventHandled::No,
        _ => EventHandled::Yes,
    })
}

#[derive(Clone, Copy)]
enum Command {
    Setup,
    Remove,
    List,
    Cleanup,
    TestPermissions,
}

async fn handle_command(ctx: &Context<'_>, event: &Event) -> Result<EventHandled> {
    let commands = [
        (SETUP, Command::Setup),
        (REMOVE, Command::Remove),
        (LIST, Command::List),
        (CLEANUP, Command::Cleanup),
        (TEST_PERMISSIONS, Command::TestPermissions),
    ];

    let mut matched = None;
    for (names, command) in commands {
        if let Some((msg, args)) = event.is_bot_cmd(ctx, names).await {
            matched = Some((msg, args, command));
            break;
        }
    }
    let Some((msg, args, command)) = matched else {
        return Ok(EventHandled::No);
    };

    let Some(guild_id) = msg.guild_id else {
        msg.reply(ctx.cache_http, "❌ This command only works in a server.")
            .await?;
        return Ok(EventHandled::Yes);
    };

    if !msg.is_from_admin(ctx).await {
        msg.reply(ctx.cache_http, NOT_ADMIN).await?;
        return Ok(EventHandled::Yes);
    }

    match command {
        Command::Setup => setup(ctx, msg, guild_id, args).await?,
        Command::Remove => remove(ctx, msg, guild_id, args).await?,
        Command::List => list(ctx, msg, guild_id).await?,
        Command::Cleanup => cleanup(ctx, msg, guild_id).await?,
        Command::TestPermissions => test_permissions(ctx, msg, guild_id).await?,
    }

    Ok(EventHandled::Yes)
}

#[derive(Debug, PartialEq)]
enum ArgError {
    Usage,
    MessageId,
    Emoji(EmojiError),
}

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgError::Usage => f.write_str("❌ Missing arguments, see `help`"),
            ArgError::MessageId => f.write_str("❌ That is not a valid message ID"),
            ArgError::Emoji(e) => write!(f, "❌ Invalid emoji format: {}", e),
        }
    }
}

/// `<message-id> <emoji> [rest...]`
fn parse_target(args: &str) -> Result<(MessageId, EmojiKey, &str), ArgError> {
    let mut parts = args.splitn(3, char::is_whitespace);
    let (Some(message_id), Some(emoji)) = (parts.next(), parts.next()) else {
        return Err(ArgError::Usage);
    };
    if message_id.is_empty() {
        return Err(ArgError::Usage);
    }

    let message_id = message_id
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(MessageId::new)
        .ok_or(ArgError::MessageId)?;
    let emoji = EmojiKey::parse(emoji).map_err(ArgError::Emoji)?;

    Ok((message_id, emoji, parts.next().unwrap_or_default().trim()))
}

async fn setup(ctx: &Context<'_>, msg: &Message, guild_id: GuildId, args: &str) -> Result<()> {
    let (message_id, emoji, role_arg) = match parse_target(args) {
        Ok((_, _, "")) => {
            msg.reply(ctx.cache_http, ArgError::Usage.to_string()).await?;
            return Ok(());
        }
        Ok(target) => target,
        Err(e) => {
            msg.reply(ctx.cache_http, e.to_string()).await?;
            return Ok(());
        }
    };

    let target = match msg.channel_id.message(ctx.cache_http, message_id).await {
        Ok(target) => target,
        Err(_) => {
            msg.reply(ctx.cache_http, "❌ Message not found in this channel!")
                .await?;
            return Ok(());
        }
    };

    let view = ctx.view();
    let Some(role) = view.find_role(guild_id, role_arg).await? else {
        msg.reply(ctx.cache_http, format!("❌ Role '{}' not found!", role_arg))
            .await?;
        return Ok(());
    };

    let standing = view.bot_standing(guild_id).await;
    let refusal = match &standing {
        Some(standing) => check_assignable(standing, &role).err(),
        None => Some(reconciler::Refusal::MissingManageRoles),
    };
    if let Some(refusal) = refusal {
        msg.reply(
            ctx.cache_http,
            format!("❌ I cannot assign **{}**: {}!", role.name, refusal),
        )
        .await?;
        return Ok(());
    }

    let entry = ReactionRoleEntry {
        guild_id,
        channel_id: msg.channel_id,
        message_id,
        emoji: emoji.clone(),
        role_id: role.id,
    };

    let response = match ctx.store.add_entry(entry).await {
        Ok(AddOutcome::AlreadyExists) => {
            "❌ This emoji already has a reaction role on that message!".to_owned()
        }
        Ok(AddOutcome::Added) => {
            log_internal!(
                "Reaction role {} -> {} set up by {}",
                emoji,
                role.name,
                msg.author.name
            );
            match target.react(ctx.cache_http, emoji.to_reaction()).await {
                Ok(_) => format!(
                    "✅ Reaction role set up successfully!\n\
                     Users can now react with {} to get the **{}** role.",
                    emoji, role.name
                ),
                Err(e) => format!(
                    "⚠️ Reaction role saved, but I couldn't add {} to the message: {}",
                    emoji, e
                ),
            }
        }
        Err(e) => format!("⚠️ Reaction role is active but could not be saved: {}", e),
    };

    msg.reply(ctx.cache_http, response).await?;
    Ok(())
}

async fn remove(ctx: &Context<'_>, msg: &Message, guild_id: GuildId, args: &str) -> Result<()> {
    let (message_id, emoji) = match parse_target(args) {
        Ok((message_id, emoji, _)) => (message_id, emoji),
        Err(e) => {
            msg.reply(ctx.cache_http, e.to_string()).await?;
            return Ok(());
        }
    };

    let response = match ctx
        .store
        .remove_entry(guild_id, msg.channel_id, message_id, &emoji)
        .await
    {
        Ok(RemoveOutcome::Removed) => {
            // Reactions left behind are harmless, so failures here are ignored.
            if let Err(e) = msg
                .channel_id
                .delete_reaction_emoji(ctx.http, message_id, emoji.to_reaction())
                .await
            {
                debug!("Could not clear {} from message {}: {}", emoji, message_id, e);
            }
            format!("✅ Reaction role removed for {}", emoji)
        }
        Ok(RemoveOutcome::NotFound) => {
            "❌ No reaction role found for that emoji on that message!".to_owned()
        }
        Err(e) => format!("⚠️ Reaction role removed but the change could not be saved: {}", e),
    };

    msg.reply(ctx.cache_http, response).await?;
    Ok(())
}

async fn list(ctx: &Context<'_>, msg: &Message, guild_id: GuildId) -> Result<()> {
    let entries = ctx.store.list_entries(guild_id).await;
    if entries.is_empty() {
        msg.reply(ctx.cache_http, "📝 No reaction roles configured in this server.")
            .await?;
        return Ok(());
    }

    let view = ctx.view();
    let roles = view.roles(guild_id).await.unwrap_or_default();
    let channels = view.channels(guild_id).await.unwrap_or_default();

    let mut embed = CreateEmbed::new()
        .title("Reaction Roles Configuration")
        .colour(Colour::BLUE);
    // Embeds hold at most 25 fields.
    for entry in entries.iter().take(25) {
        let channel = match channels.get(&entry.channel_id) {
            Some(name) => format!("#{}", name),
            None => format!("Unknown Channel ({})", entry.channel_id),
        };
        let role = match roles.get(&entry.role_id) {
            Some(role) => role.name.clone(),
            None => format!("Unknown Role ({})", entry.role_id),
        };
        embed = embed.field(
            format!("Message {}", entry.message_id),
            format!(
                "**Channel:** {}\n**Emoji:** {}\n**Role:** {}",
                channel, entry.emoji, role
            ),
            false,
        );
    }
    if entries.len() > 25 {
        embed = embed.footer(serenity::all::CreateEmbedFooter::new(format!(
            "…and {} more",
            entries.len() - 25
        )));
    }

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn cleanup(ctx: &Context<'_>, msg: &Message, guild_id: GuildId) -> Result<()> {
    let view = ctx.view();
    // Without a complete picture every entry would look stale.
    let (roles, channels) = match (view.roles(guild_id).await, view.channels(guild_id).await) {
        (Ok(roles), Ok(channels)) => (roles, channels),
        (Err(e), _) | (_, Err(e)) => {
            msg.reply(
                ctx.cache_http,
                format!("❌ Could not read the server's roles and channels: {}", e),
            )
            .await?;
            return Ok(());
        }
    };

    let response = match ctx
        .store
        .reconcile_against_live_state(
            guild_id,
            |role_id| roles.contains_key(&role_id),
            |channel_id| channels.contains_key(&channel_id),
        )
        .await
    {
        Ok(0) => "✅ Nothing to clean up.".to_owned(),
        Ok(removed) => format!("🧹 Removed {} stale reaction role(s).", removed),
        Err(e) => format!("⚠️ Stale reaction roles removed but not saved: {}", e),
    };

    msg.reply(ctx.cache_http, response).await?;
    Ok(())
}

async fn test_permissions(ctx: &Context<'_>, msg: &Message, guild_id: GuildId) -> Result<()> {
    let view = ctx.view();
    let permissions = view
        .permissions(guild_id, view.bot_id())
        .await
        .unwrap_or_else(|_| Permissions::empty());

    let checks = [
        ("Manage Roles", Permissions::MANAGE_ROLES),
        ("Add Reactions", Permissions::ADD_REACTIONS),
        ("Read Message History", Permissions::READ_MESSAGE_HISTORY),
    ];
    let all_ok = checks.iter().all(|(_, p)| permissions.contains(*p));

    let mut embed = CreateEmbed::new()
        .title("Bot Permissions Check")
        .colour(if all_ok { Colour::DARK_GREEN } else { Colour::RED });
    for (name, permission) in checks {
        let value = if permissions.contains(permission) {
            "✅ Yes"
        } else {
            "❌ No"
        };
        embed = embed.field(name, value, true);
    }

    msg.channel_id
        .send_message(ctx.cache_http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}
