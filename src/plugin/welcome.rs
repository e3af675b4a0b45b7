use crate::{
    config::Welcome as WelcomeConfig,
    config_store::{ConfigStore, WelcomeRef},
    emoji::EmojiKey,
    event::*,
    helper::MessageHelper,
    log_internal,
    plugin::*,
    reconciler::{check_assignable, PlatformView, Refusal, RoleInfo},
};
use anyhow::Result;
use serenity::all::{
    ButtonStyle, ComponentInteraction, CreateActionRow, CreateButton, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, GuildId, Interaction, Message, RoleId,
    UserId,
};
use tracing::{debug, warn};

const BUTTON_ID: &str = "sagebot:welcome";
const SOMETHING_WENT_WRONG: &str = "❌ Something went wrong, please try again later.";

/// Posts the welcome message and hands out the member role from its button.
pub struct Welcome;

#[serenity::async_trait]
impl Plugin for Welcome {
    fn name(&self) -> &'static str {
        "welcome"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}welcome_message|wm - (re)post the welcome message in this channel (admin)",
            prefix
        ))
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        match event {
            Event::Interaction(Interaction::Component(component))
                if component.data.custom_id == BUTTON_ID =>
            {
                press(ctx, component).await?;
                Ok(EventHandled::Yes)
            }
            Event::Message(_) => {
                let Some((msg, _)) = event.is_bot_cmd(ctx, &["welcome_message", "wm"]).await
                else {
                    return Ok(EventHandled::No);
                };
                post(ctx, msg).await?;
                Ok(EventHandled::Yes)
            }
            _ => Ok(EventHandled::No),
        }
    }
}

async fn post(ctx: &Context<'_>, msg: &Message) -> Result<()> {
    let Some(guild_id) = msg.guild_id else {
        msg.reply(ctx.cache_http, "❌ This command only works in a server.")
            .await?;
        return Ok(());
    };
    if !msg.is_from_admin(ctx).await {
        msg.reply(
            ctx.cache_http,
            "❌ You need 'Administrator' permission to use this command!",
        )
        .await?;
        return Ok(());
    }

    if let Some(previous) = ctx.store.welcome_ref(guild_id).await {
        if let Err(e) = previous
            .channel_id
            .delete_message(ctx.http, previous.message_id)
            .await
        {
            debug!("Previous welcome message already gone: {}", e);
        }
        // The new ref below overwrites this one, and its write persists the clear too.
        if let Err(e) = ctx.store.clear_welcome_ref(guild_id).await {
            warn!("{}", e);
        }
    }

    let builder = {
        let cfg = ctx.cfg.read().await;
        welcome_message(&cfg.welcome)
    };
    let sent = msg.channel_id.send_message(ctx.cache_http, builder).await?;
    log_internal!("Welcome message posted in {} by {}", sent.channel_id, msg.author.name);

    let posted = WelcomeRef {
        channel_id: sent.channel_id,
        message_id: sent.id,
    };
    if let Some(warning) = remember_welcome(ctx.store, guild_id, posted).await {
        msg.channel_id.say(ctx.cache_http, warning).await?;
    }

    if let Err(e) = msg.delete(ctx.cache_http).await {
        debug!("Could not delete welcome command: {}", e);
    }
    Ok(())
}

/// Record the posted message; a failed write becomes a warning for the admin.
async fn remember_welcome(
    store: &ConfigStore,
    guild_id: GuildId,
    posted: WelcomeRef,
) -> Option<String> {
    match store.set_welcome_ref(guild_id, posted).await {
        Ok(()) => None,
        Err(e) => {
            warn!("{}", e);
            Some(format!(
                "⚠️ Welcome message posted but could not be saved: {}",
                e
            ))
        }
    }
}

fn welcome_message(cfg: &WelcomeConfig) -> CreateMessage {
    let mut button = CreateButton::new(BUTTON_ID)
        .label(&cfg.button_label)
        .style(ButtonStyle::Success);
    match cfg.button_emoji.as_deref().map(EmojiKey::parse) {
        Some(Ok(emoji)) => button = button.emoji(emoji.to_reaction()),
        Some(Err(e)) => warn!("Ignoring welcome button emoji: {}", e),
        None => {}
    }

    CreateMessage::new()
        .content(&cfg.text)
        .components(vec![CreateActionRow::Buttons(vec![button])])
}

/// What pressing the welcome button did.
#[derive(Debug, PartialEq, Eq)]
enum Admission {
    AlreadyMember,
    MemberUnavailable,
    Refused(Refusal),
    Granted,
    Failed,
}

async fn admit<V>(view: &V, guild_id: GuildId, user_id: UserId, role: &RoleInfo) -> Admission
where
    V: PlatformView + ?Sized,
{
    let Some(member_roles) = view.member_roles(guild_id, user_id).await else {
        return Admission::MemberUnavailable;
    };
    if member_roles.contains(&role.id) {
        return Admission::AlreadyMember;
    }

    let Some(standing) = view.bot_standing(guild_id).await else {
        return Admission::Refused(Refusal::MissingManageRoles);
    };
    if let Err(refusal) = check_assignable(&standing, role) {
        return Admission::Refused(refusal);
    }

    match view.grant_role(guild_id, user_id, role.id).await {
        Ok(()) => Admission::Granted,
        Err(e) => {
            warn!("Could not grant {} to {}: {:#}", role.name, user_id, e);
            Admission::Failed
        }
    }
}

async fn press(ctx: &Context<'_>, component: &ComponentInteraction) -> Result<()> {
    let Some(guild_id) = component.guild_id else {
        return Ok(());
    };

    let (role_id, role_name) = {
        let cfg = ctx.cfg.read().await;
        (cfg.welcome.role_id, cfg.welcome.role_name.clone())
    };
    let view = ctx.view();
    let lookup = match (role_id.filter(|id| *id != 0), role_name) {
        (Some(id), _) => view.role(guild_id, RoleId::new(id)).await,
        (None, Some(name)) => view.find_role(guild_id, &name).await,
        (None, None) => Ok(None),
    };
    let reply = answer(&view, guild_id, component.user.id, lookup).await;

    component
        .create_response(
            ctx.cache_http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(reply)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

/// The ephemeral reply to a button press, given the outcome of the welcome role lookup.
async fn answer<V>(
    view: &V,
    guild_id: GuildId,
    user_id: UserId,
    lookup: Result<Option<RoleInfo>>,
) -> String
where
    V: PlatformView + ?Sized,
{
    let role = match lookup {
        Ok(Some(role)) => role,
        Ok(None) => {
            return "❌ The welcome role isn't set up on this server. Please tell an admin!"
                .to_owned()
        }
        Err(e) => {
            warn!("Could not look up the welcome role in {}: {:#}", guild_id, e);
            return SOMETHING_WENT_WRONG.to_owned();
        }
    };

    match admit(view, guild_id, user_id, &role).await {
        Admission::AlreadyMember => format!("You already have the **{}** role.", role.name),
        Admission::Granted => {
            log_internal!("Welcomed {} into {}", user_id, guild_id);
            format!("✅ Welcome! You now have the **{}** role.", role.name)
        }
        Admission::Refused(refusal) => {
            format!("❌ I cannot give you **{}**: {}.", role.name, refusal)
        }
        Admission::MemberUnavailable | Admission::Failed => SOMETHING_WENT_WRONG.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::tests::{role, FakeGuild};
    use serenity::all::{ChannelId, MessageId};

    const GUILD: GuildId = GuildId::new(1);
    const NEWCOMER: UserId = UserId::new(42);

    #[tokio::test]
    async fn grants_role_to_newcomer() {
        let view = FakeGuild::new().with_role(role(5, 3)).with_member(42, &[]);

        assert_eq!(admit(&view, GUILD, NEWCOMER, &role(5, 3)).await, Admission::Granted);
        assert_eq!(view.grant_count(), 1);
    }

    #[tokio::test]
    async fn existing_members_are_left_alone() {
        let view = FakeGuild::new().with_role(role(5, 3)).with_member(42, &[5]);

        assert_eq!(
            admit(&view, GUILD, NEWCOMER, &role(5, 3)).await,
            Admission::AlreadyMember
        );
        assert_eq!(view.grant_count(), 0);
    }

    #[tokio::test]
    async fn refuses_roles_above_the_bot() {
        let view = FakeGuild::new().with_role(role(5, 30)).with_member(42, &[]);

        assert_eq!(
            admit(&view, GUILD, NEWCOMER, &role(5, 30)).await,
            Admission::Refused(Refusal::RoleNotBelowBot)
        );
        assert_eq!(view.grant_count(), 0);
    }

    #[tokio::test]
    async fn unknown_member_is_reported() {
        let view = FakeGuild::new().with_role(role(5, 3));

        assert_eq!(
            admit(&view, GUILD, NEWCOMER, &role(5, 3)).await,
            Admission::MemberUnavailable
        );
    }

    #[tokio::test]
    async fn failed_grant_is_reported() {
        let mut view = FakeGuild::new().with_role(role(5, 3)).with_member(42, &[]);
        view.fail_calls = true;

        assert_eq!(admit(&view, GUILD, NEWCOMER, &role(5, 3)).await, Admission::Failed);
    }

    #[tokio::test]
    async fn failed_role_lookup_still_gets_a_reply() {
        let mut view = FakeGuild::new().with_role(role(5, 3)).with_member(42, &[]);
        view.fail_lookups = true;

        let lookup = view.role(GUILD, RoleId::new(5)).await;
        let reply = answer(&view, GUILD, NEWCOMER, lookup).await;
        assert_eq!(reply, SOMETHING_WENT_WRONG);
        assert_eq!(view.grant_count(), 0);
    }

    #[tokio::test]
    async fn missing_welcome_role_is_explained() {
        let view = FakeGuild::new().with_member(42, &[]);

        let lookup = view.role(GUILD, RoleId::new(5)).await;
        let reply = answer(&view, GUILD, NEWCOMER, lookup).await;
        assert!(reply.contains("isn't set up"));
        assert_eq!(view.grant_count(), 0);
    }

    #[tokio::test]
    async fn found_role_is_granted_through_the_reply() {
        let view = FakeGuild::new().with_role(role(5, 3)).with_member(42, &[]);

        let lookup = view.role(GUILD, RoleId::new(5)).await;
        let reply = answer(&view, GUILD, NEWCOMER, lookup).await;
        assert!(reply.starts_with("✅"));
        assert_eq!(view.grant_count(), 1);
    }

    #[tokio::test]
    async fn unsaved_welcome_ref_warns_but_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"").unwrap();
        let store = ConfigStore::load(blocker.join("roles.json")).await;
        let posted = WelcomeRef {
            channel_id: ChannelId::new(10),
            message_id: MessageId::new(100),
        };

        let warning = remember_welcome(&store, GUILD, posted).await;
        assert!(warning.is_some_and(|w| w.starts_with("⚠️ Welcome message posted")));
        assert_eq!(store.welcome_ref(GUILD).await, Some(posted));
    }

    #[tokio::test]
    async fn saved_welcome_ref_needs_no_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("roles.json")).await;
        let posted = WelcomeRef {
            channel_id: ChannelId::new(10),
            message_id: MessageId::new(100),
        };

        assert_eq!(remember_welcome(&store, GUILD, posted).await, None);
        assert_eq!(store.welcome_ref(GUILD).await, Some(posted));
    }
}
