//! `PlatformView` over serenity's cache, falling back to HTTP for guilds we don't have cached.

use crate::reconciler::{BotStanding, PlatformView, RoleInfo};
use anyhow::Result;
use serenity::all::{Cache, ChannelId, GuildId, Http, Permissions, Role, RoleId, UserId};
use std::{collections::HashMap, sync::Arc};

const AUDIT_REASON: &str = "Reaction role";

pub struct DiscordView<'a> {
    pub cache: &'a Arc<Cache>,
    pub http: &'a Arc<Http>,
}

/// The parts of a guild permission math needs.
struct GuildSnapshot {
    owner_id: UserId,
    roles: HashMap<RoleId, Role>,
}

impl From<&Role> for RoleInfo {
    fn from(role: &Role) -> Self {
        RoleInfo {
            id: role.id,
            name: role.name.clone(),
            position: role.position,
            managed: role.managed,
        }
    }
}

impl GuildSnapshot {
    fn permissions(&self, guild_id: GuildId, user_id: UserId, member_roles: &[RoleId]) -> Permissions {
        if user_id == self.owner_id {
            return Permissions::all();
        }

        // @everyone shares the guild's id.
        let everyone = RoleId::new(guild_id.get());
        let permissions = std::iter::once(&everyone)
            .chain(member_roles)
            .filter_map(|id| self.roles.get(id))
            .fold(Permissions::empty(), |acc, role| acc | role.permissions);

        if permissions.contains(Permissions::ADMINISTRATOR) {
            Permissions::all()
        } else {
            permissions
        }
    }

    fn top_role(&self, member_roles: &[RoleId]) -> Option<RoleInfo> {
        member_roles
            .iter()
            .filter_map(|id| self.roles.get(id))
            .max_by_key(|role| (role.position, role.id))
            .map(RoleInfo::from)
    }
}

impl DiscordView<'_> {
    async fn snapshot(&self, guild_id: GuildId) -> Result<GuildSnapshot> {
        let cached = self.cache.guild(guild_id).map(|guild| GuildSnapshot {
            owner_id: guild.owner_id,
            roles: guild.roles.clone(),
        });
        if let Some(snapshot) = cached {
            return Ok(snapshot);
        }

        let guild = self.http.get_guild(guild_id).await?;
        Ok(GuildSnapshot {
            owner_id: guild.owner_id,
            roles: guild.roles,
        })
    }

    async fn roles_of(&self, guild_id: GuildId, user_id: UserId) -> Result<Vec<RoleId>> {
        let cached = self
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.members.get(&user_id).map(|m| m.roles.clone()));
        if let Some(roles) = cached {
            return Ok(roles);
        }

        Ok(self.http.get_member(guild_id, user_id).await?.roles)
    }

    /// Guild-wide permissions of `user_id`, owner and administrator included.
    pub async fn permissions(&self, guild_id: GuildId, user_id: UserId) -> Result<Permissions> {
        let snapshot = self.snapshot(guild_id).await?;
        let member_roles = self.roles_of(guild_id, user_id).await?;
        Ok(snapshot.permissions(guild_id, user_id, &member_roles))
    }

    pub async fn roles(&self, guild_id: GuildId) -> Result<HashMap<RoleId, RoleInfo>> {
        let snapshot = self.snapshot(guild_id).await?;
        Ok(snapshot
            .roles
            .iter()
            .map(|(id, role)| (*id, role.into()))
            .collect())
    }

    /// Channel names by id.
    pub async fn channels(&self, guild_id: GuildId) -> Result<HashMap<ChannelId, String>> {
        let cached = self.cache.guild(guild_id).map(|guild| {
            guild
                .channels
                .iter()
                .map(|(id, channel)| (*id, channel.name.clone()))
                .collect::<HashMap<_, _>>()
        });
        if let Some(channels) = cached {
            return Ok(channels);
        }

        Ok(self
            .http
            .get_channels(guild_id)
            .await?
            .into_iter()
            .map(|channel| (channel.id, channel.name))
            .collect())
    }

    /// Resolve a role by id, `<@&id>` mention or case-insensitive name.
    pub async fn find_role(&self, guild_id: GuildId, arg: &str) -> Result<Option<RoleInfo>> {
        let snapshot = self.snapshot(guild_id).await?;
        Ok(find_role_in(&snapshot.roles, arg))
    }
}

fn find_role_in(roles: &HashMap<RoleId, Role>, arg: &str) -> Option<RoleInfo> {
    let arg = arg.trim();
    let id = arg
        .strip_prefix("<@&")
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(arg);

    if let Some(role) = id
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .and_then(|id| roles.get(&RoleId::new(id)))
    {
        return Some(role.into());
    }

    roles
        .values()
        .find(|role| role.name.eq_ignore_ascii_case(arg))
        .map(RoleInfo::from)
}

#[serenity::async_trait]
impl PlatformView for DiscordView<'_> {
    fn bot_id(&self) -> UserId {
        self.cache.current_user().id
    }

    async fn role(&self, guild_id: GuildId, role_id: RoleId) -> Result<Option<RoleInfo>> {
        let snapshot = self.snapshot(guild_id).await?;
        Ok(snapshot.roles.get(&role_id).map(RoleInfo::from))
    }

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId) -> Option<Vec<RoleId>> {
        self.roles_of(guild_id, user_id).await.ok()
    }

    async fn bot_standing(&self, guild_id: GuildId) -> Option<BotStanding> {
        let bot_id = self.bot_id();
        let snapshot = self.snapshot(guild_id).await.ok()?;
        let member_roles = self.roles_of(guild_id, bot_id).await.ok()?;

        let permissions = snapshot.permissions(guild_id, bot_id, &member_roles);
        Some(BotStanding {
            can_manage_roles: permissions.contains(Permissions::MANAGE_ROLES),
            top_role: snapshot.top_role(&member_roles),
        })
    }

    async fn grant_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(AUDIT_REASON))
            .await
            .map_err(Into::into)
    }

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<()> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, Some(AUDIT_REASON))
            .await
            .map_err(Into::into)
    }
}
