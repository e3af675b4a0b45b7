//! Turns reaction events into role grants and revocations.
//!
//! Nothing here is remembered between events: each event re-reads the store and the live guild
//! state, so a stale entry is noticed (and dropped) the first time someone reacts to it.

use crate::{config_store::ConfigStore, emoji::EmojiKey};
use anyhow::Result;
use serenity::all::{ChannelId, GuildId, MessageId, RoleId, UserId};
use tracing::{error, info, warn};

/// Live facts about a role, as far as hierarchy checks care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
    pub position: u16,
    /// Owned by an integration (bot role, booster role, ...); cannot be assigned by hand.
    pub managed: bool,
}

impl RoleInfo {
    // Same ordering Discord uses: position first, id breaks ties.
    fn rank(&self) -> (u16, RoleId) {
        (self.position, self.id)
    }
}

/// What the bot itself may do in a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotStanding {
    pub can_manage_roles: bool,
    /// The bot's highest role, if it has any besides @everyone.
    pub top_role: Option<RoleInfo>,
}

impl BotStanding {
    pub fn outranks(&self, role: &RoleInfo) -> bool {
        self.top_role
            .as_ref()
            .is_some_and(|top| role.rank() < top.rank())
    }
}

/// Read and write access to the chat platform's view of a guild.
#[serenity::async_trait]
pub trait PlatformView: Send + Sync {
    fn bot_id(&self) -> UserId;
    /// `Ok(None)` only when the role is known to be gone; lookups that could not be completed
    /// are errors.
    async fn role(&self, guild_id: GuildId, role_id: RoleId) -> Result<Option<RoleInfo>>;
    /// `None` if the member could not be resolved.
    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> Option<Vec<RoleId>>;
    async fn bot_standing(&self, guild_id: GuildId) -> Option<BotStanding>;
    async fn grant_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId)
        -> Result<()>;
    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Add,
    Remove,
}

#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: EmojiKey,
    pub direction: Direction,
}

/// Why the bot refuses to touch a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    MissingManageRoles,
    RoleNotBelowBot,
    ManagedRole,
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Refusal::MissingManageRoles => "I don't have the 'Manage Roles' permission",
            Refusal::RoleNotBelowBot => {
                "that role is higher than or equal to my highest role"
            }
            Refusal::ManagedRole => {
                "that role is managed by an integration and cannot be assigned manually"
            }
        })
    }
}

/// Check the two preconditions for changing someone's `role`: the bot may manage roles, and
/// `role` sits strictly below the bot's highest role.
pub fn check_authority(standing: &BotStanding, role: &RoleInfo) -> Result<(), Refusal> {
    if !standing.can_manage_roles {
        return Err(Refusal::MissingManageRoles);
    }
    if !standing.outranks(role) {
        return Err(Refusal::RoleNotBelowBot);
    }
    Ok(())
}

/// Stricter variant for administrator commands, which also rejects integration-managed roles.
pub fn check_assignable(standing: &BotStanding, role: &RoleInfo) -> Result<(), Refusal> {
    check_authority(standing, role)?;
    if role.managed {
        return Err(Refusal::ManagedRole);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// The bot's own reaction.
    OwnReaction,
    /// No reaction-role entry for this message and emoji.
    NotConfigured,
    /// The configured role is gone; the entry was removed.
    StaleEntryRemoved,
    MemberUnavailable,
    /// Member already has (add) or already lacks (remove) the role.
    AlreadySatisfied,
    Refused(Refusal),
    Granted,
    Revoked,
    /// A lookup or the grant/revoke call failed on the platform side.
    PlatformFailed,
}

/// Process one reaction event.  At most one role change and at most one store mutation happen
/// per call; failures are logged and not retried.
pub async fn reconcile<V>(store: &ConfigStore, view: &V, event: &ReactionEvent) -> ReactionOutcome
where
    V: PlatformView + ?Sized,
{
    if event.user_id == view.bot_id() {
        return ReactionOutcome::OwnReaction;
    }

    let Some(entry) = store
        .lookup_entry(
            event.guild_id,
            event.channel_id,
            event.message_id,
            &event.emoji,
        )
        .await
    else {
        return ReactionOutcome::NotConfigured;
    };

    let role = match view.role(event.guild_id, entry.role_id).await {
        Ok(role) => role,
        Err(e) => {
            error!(
                "Could not look up role {} in guild {}: {}",
                entry.role_id, event.guild_id, e
            );
            return ReactionOutcome::PlatformFailed;
        }
    };

    let Some(role) = role else {
        warn!(
            "Role {} no longer exists in guild {}; removing its reaction role",
            entry.role_id, event.guild_id
        );
        if let Err(e) = store
            .remove_entry(
                entry.guild_id,
                entry.channel_id,
                entry.message_id,
                &entry.emoji,
            )
            .await
        {
            error!("{}", e);
        }
        return ReactionOutcome::StaleEntryRemoved;
    };

    let Some(member_roles) = view.member_roles(event.guild_id, event.user_id).await else {
        warn!(
            "Member {} not found in guild {}",
            event.user_id, event.guild_id
        );
        return ReactionOutcome::MemberUnavailable;
    };

    let has_role = member_roles.contains(&role.id);
    match event.direction {
        Direction::Add if has_role => return ReactionOutcome::AlreadySatisfied,
        Direction::Remove if !has_role => return ReactionOutcome::AlreadySatisfied,
        _ => {}
    }

    let standing = view.bot_standing(event.guild_id).await.unwrap_or(BotStanding {
        can_manage_roles: false,
        top_role: None,
    });
    if let Err(refusal) = check_authority(&standing, &role) {
        warn!(
            "Cannot change role {} in guild {}: {}",
            role.name, event.guild_id, refusal
        );
        return ReactionOutcome::Refused(refusal);
    }

    let (result, outcome, verb) = match event.direction {
        Direction::Add => (
            view.grant_role(event.guild_id, event.user_id, role.id).await,
            ReactionOutcome::Granted,
            "Assigned",
        ),
        Direction::Remove => (
            view.revoke_role(event.guild_id, event.user_id, role.id).await,
            ReactionOutcome::Revoked,
            "Removed",
        ),
    };

    match result {
        Ok(()) => {
            info!(
                "{} role {} for user {} in guild {}",
                verb, role.name, event.user_id, event.guild_id
            );
            outcome
        }
        Err(e) => {
            error!(
                "Could not change role {} for user {} in guild {}: {}",
                role.name, event.user_id, event.guild_id, e
            );
            ReactionOutcome::PlatformFailed
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config_store::{AddOutcome, ReactionRoleEntry};
    use anyhow::anyhow;
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    pub const BOT: u64 = 9000;

    /// In-memory guild used by reconciler and welcome tests.
    pub struct FakeGuild {
        pub roles: Mutex<HashMap<RoleId, RoleInfo>>,
        pub members: Mutex<HashMap<UserId, HashSet<RoleId>>>,
        pub standing: Mutex<BotStanding>,
        pub fail_calls: bool,
        pub fail_lookups: bool,
        pub grants: Mutex<Vec<(UserId, RoleId)>>,
        pub revokes: Mutex<Vec<(UserId, RoleId)>>,
    }

    pub fn role(id: u64, position: u16) -> RoleInfo {
        RoleInfo {
            id: RoleId::new(id),
            name: format!("role-{id}"),
            position,
            managed: false,
        }
    }

    impl FakeGuild {
        pub fn new() -> Self {
            Self {
                roles: Mutex::new(HashMap::new()),
                members: Mutex::new(HashMap::new()),
                standing: Mutex::new(BotStanding {
                    can_manage_roles: true,
                    top_role: Some(role(1, 10)),
                }),
                fail_calls: false,
                fail_lookups: false,
                grants: Mutex::new(Vec::new()),
                revokes: Mutex::new(Vec::new()),
            }
        }

        pub fn with_role(self, info: RoleInfo) -> Self {
            self.roles.lock().unwrap().insert(info.id, info);
            self
        }

        pub fn with_member(self, user: u64, roles: &[u64]) -> Self {
            self.members.lock().unwrap().insert(
                UserId::new(user),
                roles.iter().map(|r| RoleId::new(*r)).collect(),
            );
            self
        }

        pub fn grant_count(&self) -> usize {
            self.grants.lock().unwrap().len()
        }

        pub fn revoke_count(&self) -> usize {
            self.revokes.lock().unwrap().len()
        }
    }

    #[serenity::async_trait]
    impl PlatformView for FakeGuild {
        fn bot_id(&self) -> UserId {
            UserId::new(BOT)
        }

        async fn role(&self, _guild_id: GuildId, role_id: RoleId) -> Result<Option<RoleInfo>> {
            if self.fail_lookups {
                return Err(anyhow!("503 Service Unavailable"));
            }
            Ok(self.roles.lock().unwrap().get(&role_id).cloned())
        }

        async fn member_roles(&self, _guild_id: GuildId, user_id: UserId) -> Option<Vec<RoleId>> {
            self.members
                .lock()
                .unwrap()
                .get(&user_id)
                .map(|roles| roles.iter().copied().collect())
        }

        async fn bot_standing(&self, _guild_id: GuildId) -> Option<BotStanding> {
            Some(self.standing.lock().unwrap().clone())
        }

        async fn grant_role(&self, _guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()> {
            if self.fail_calls {
                return Err(anyhow!("403 Forbidden"));
            }
            self.grants.lock().unwrap().push((user_id, role_id));
            self.members
                .lock()
                .unwrap()
                .entry(user_id)
                .or_default()
                .insert(role_id);
            Ok(())
        }

        async fn revoke_role(&self, _guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()> {
            if self.fail_calls {
                return Err(anyhow!("403 Forbidden"));
            }
            self.revokes.lock().unwrap().push((user_id, role_id));
            if let Some(roles) = self.members.lock().unwrap().get_mut(&user_id) {
                roles.remove(&role_id);
            }
            Ok(())
        }
    }

    async fn store_with_entry(dir: &tempfile::TempDir) -> ConfigStore {
        let store = ConfigStore::load(dir.path().join("roles.json")).await;
        let added = store
            .add_entry(ReactionRoleEntry {
                guild_id: GuildId::new(1),
                channel_id: ChannelId::new(10),
                message_id: MessageId::new(100),
                emoji: EmojiKey::parse("🎮").unwrap(),
                role_id: RoleId::new(55),
            })
            .await
            .unwrap();
        assert_eq!(added, AddOutcome::Added);
        store
    }

    fn event(user: u64, emoji: &str, direction: Direction) -> ReactionEvent {
        ReactionEvent {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(10),
            message_id: MessageId::new(100),
            user_id: UserId::new(user),
            emoji: EmojiKey::parse(emoji).unwrap(),
            direction,
        }
    }

    #[tokio::test]
    async fn grants_once_then_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let guild = FakeGuild::new().with_role(role(55, 3)).with_member(42, &[]);

        let first = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(first, ReactionOutcome::Granted);
        assert_eq!(guild.grant_count(), 1);

        let second = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(second, ReactionOutcome::AlreadySatisfied);
        assert_eq!(guild.grant_count(), 1);
        assert_eq!(store.list_entries(GuildId::new(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn revokes_only_when_member_holds_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let guild = FakeGuild::new()
            .with_role(role(55, 3))
            .with_member(42, &[55])
            .with_member(43, &[]);

        let outcome = reconcile(&store, &guild, &event(42, "🎮", Direction::Remove)).await;
        assert_eq!(outcome, ReactionOutcome::Revoked);
        let outcome = reconcile(&store, &guild, &event(43, "🎮", Direction::Remove)).await;
        assert_eq!(outcome, ReactionOutcome::AlreadySatisfied);
        assert_eq!(guild.revoke_count(), 1);
    }

    #[tokio::test]
    async fn ignores_bot_and_unconfigured_reactions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let guild = FakeGuild::new().with_role(role(55, 3)).with_member(42, &[]);

        let own = reconcile(&store, &guild, &event(BOT, "🎮", Direction::Add)).await;
        assert_eq!(own, ReactionOutcome::OwnReaction);
        let other = reconcile(&store, &guild, &event(42, "🔥", Direction::Add)).await;
        assert_eq!(other, ReactionOutcome::NotConfigured);
        assert_eq!(guild.grant_count(), 0);
    }

    #[tokio::test]
    async fn missing_role_removes_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let guild = FakeGuild::new().with_member(42, &[]);

        let first = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(first, ReactionOutcome::StaleEntryRemoved);
        let emoji = EmojiKey::parse("🎮").unwrap();
        assert!(store
            .lookup_entry(GuildId::new(1), ChannelId::new(10), MessageId::new(100), &emoji)
            .await
            .is_none());

        let second = reconcile(&store, &guild, &event(42, "🎮", Direction::Remove)).await;
        assert_eq!(second, ReactionOutcome::NotConfigured);
        assert_eq!(guild.grant_count() + guild.revoke_count(), 0);
    }

    #[tokio::test]
    async fn unknown_member_aborts_silently() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let guild = FakeGuild::new().with_role(role(55, 3));

        let outcome = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(outcome, ReactionOutcome::MemberUnavailable);
        assert_eq!(store.list_entries(GuildId::new(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn refuses_without_manage_roles() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let guild = FakeGuild::new().with_role(role(55, 3)).with_member(42, &[]);
        guild.standing.lock().unwrap().can_manage_roles = false;

        let outcome = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(outcome, ReactionOutcome::Refused(Refusal::MissingManageRoles));
        assert_eq!(guild.grant_count(), 0);
    }

    #[tokio::test]
    async fn refuses_role_at_or_above_bot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        // Same position as the bot's top role, larger id: ranks above it.
        let guild = FakeGuild::new().with_role(role(55, 10)).with_member(42, &[]);

        let outcome = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(outcome, ReactionOutcome::Refused(Refusal::RoleNotBelowBot));
        assert_eq!(guild.grant_count(), 0);
    }

    #[tokio::test]
    async fn platform_failure_is_reported_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let mut guild = FakeGuild::new().with_role(role(55, 3)).with_member(42, &[]);
        guild.fail_calls = true;

        let outcome = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(outcome, ReactionOutcome::PlatformFailed);
        assert_eq!(guild.grant_count(), 0);
    }

    #[tokio::test]
    async fn failed_role_lookup_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entry(&dir).await;
        let mut guild = FakeGuild::new().with_member(42, &[]);
        guild.fail_lookups = true;

        let outcome = reconcile(&store, &guild, &event(42, "🎮", Direction::Add)).await;
        assert_eq!(outcome, ReactionOutcome::PlatformFailed);
        assert_eq!(store.list_entries(GuildId::new(1)).await.len(), 1);
    }

    #[test]
    fn bot_without_roles_outranks_nothing() {
        let standing = BotStanding {
            can_manage_roles: true,
            top_role: None,
        };
        assert_eq!(
            check_authority(&standing, &role(55, 0)),
            Err(Refusal::RoleNotBelowBot)
        );
    }

    #[test]
    fn managed_roles_are_not_assignable_from_commands() {
        let standing = BotStanding {
            can_manage_roles: true,
            top_role: Some(role(1, 10)),
        };
        let mut booster = role(55, 2);
        assert_eq!(check_assignable(&standing, &booster), Ok(()));
        booster.managed = true;
        assert_eq!(
            check_assignable(&standing, &booster),
            Err(Refusal::ManagedRole)
        );
        assert_eq!(check_authority(&standing, &booster), Ok(()));
    }
}
