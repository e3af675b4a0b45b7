use crate::emoji::EmojiKey;
use anyhow::{anyhow, Result};
use serenity::all::{ChannelId, GuildId, MessageId, RoleId};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STORE_PATH_REL_HOME: &str = ".config/sagebot/reaction_roles.json";

/// A rule granting `role_id` to whoever reacts with `emoji` on a specific message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionRoleEntry {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub emoji: EmojiKey,
    pub role_id: RoleId,
}

/// Where a guild's welcome message (the one carrying the entry button) lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WelcomeRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// The in-memory mutation has been applied; only writing it to disk failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not persist reaction roles to `{path}`: {reason}")]
    Persist { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    channel_id: ChannelId,
    message_id: MessageId,
    emoji: EmojiKey,
}

impl ReactionRoleEntry {
    fn key(&self) -> EntryKey {
        EntryKey {
            channel_id: self.channel_id,
            message_id: self.message_id,
            emoji: self.emoji.clone(),
        }
    }
}

#[derive(Default)]
struct GuildConfig {
    entries: HashMap<EntryKey, ReactionRoleEntry>,
    welcome: Option<WelcomeRef>,
}

impl GuildConfig {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.welcome.is_none()
    }
}

/// Durable reaction-role configuration, one `GuildConfig` per guild.
///
/// Every operation takes the same lock, so writers are serialized and each mutation is on disk
/// (or reported as `StoreError::Persist`) before the next one starts.
pub struct ConfigStore {
    path: PathBuf,
    guilds: Mutex<HashMap<GuildId, GuildConfig>>,
}

impl ConfigStore {
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(STORE_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    /// Open the store backed by `path`.  A missing or unreadable snapshot yields an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let guilds = match tokio::fs::read(&path).await {
            Ok(data) => match serde_json::from_slice::<Snapshot>(&data) {
                Ok(snapshot) => from_snapshot(snapshot),
                Err(e) => {
                    warn!(
                        "Snapshot `{}` is corrupt ({}); starting with empty configuration",
                        path.display(),
                        e
                    );
                    set_aside_corrupt(&path).await;
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No snapshot at `{}`; starting with empty configuration",
                    path.display()
                );
                HashMap::new()
            }
            Err(e) => {
                warn!(
                    "Could not read snapshot `{}` ({}); starting with empty configuration",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        };

        info!("Loaded reaction-role configuration for {} guild(s)", guilds.len());

        Self {
            path,
            guilds: Mutex::new(guilds),
        }
    }

    pub async fn add_entry(&self, entry: ReactionRoleEntry) -> Result<AddOutcome, StoreError> {
        let mut guilds = self.guilds.lock().await;
        let config = guilds.entry(entry.guild_id).or_default();

        let key = entry.key();
        if config.entries.contains_key(&key) {
            return Ok(AddOutcome::AlreadyExists);
        }

        info!(
            "Added reaction role {}_{}_{} -> role {}",
            entry.channel_id, entry.message_id, entry.emoji, entry.role_id
        );
        config.entries.insert(key, entry);

        self.persist(&guilds).await?;
        Ok(AddOutcome::Added)
    }

    pub async fn remove_entry(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &EmojiKey,
    ) -> Result<RemoveOutcome, StoreError> {
        let mut guilds = self.guilds.lock().await;
        let key = EntryKey {
            channel_id,
            message_id,
            emoji: emoji.clone(),
        };

        let Some(config) = guilds.get_mut(&guild_id) else {
            return Ok(RemoveOutcome::NotFound);
        };
        if config.entries.remove(&key).is_none() {
            return Ok(RemoveOutcome::NotFound);
        }
        if config.is_empty() {
            guilds.remove(&guild_id);
        }

        info!(
            "Removed reaction role {}_{}_{}",
            channel_id, message_id, emoji
        );
        self.persist(&guilds).await?;
        Ok(RemoveOutcome::Removed)
    }

    pub async fn lookup_entry(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &EmojiKey,
    ) -> Option<ReactionRoleEntry> {
        let key = EntryKey {
            channel_id,
            message_id,
            emoji: emoji.clone(),
        };
        self.guilds
            .lock()
            .await
            .get(&guild_id)
            .and_then(|config| config.entries.get(&key))
            .cloned()
    }

    pub async fn list_entries(&self, guild_id: GuildId) -> Vec<ReactionRoleEntry> {
        self.guilds
            .lock()
            .await
            .get(&guild_id)
            .map(|config| config.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget everything about a guild.  Returns whether there was anything to forget.
    pub async fn purge_guild(&self, guild_id: GuildId) -> Result<bool, StoreError> {
        let mut guilds = self.guilds.lock().await;
        if guilds.remove(&guild_id).is_none() {
            return Ok(false);
        }

        info!("Purged configuration for guild {}", guild_id);
        self.persist(&guilds).await?;
        Ok(true)
    }

    pub async fn set_welcome_ref(
        &self,
        guild_id: GuildId,
        welcome: WelcomeRef,
    ) -> Result<(), StoreError> {
        let mut guilds = self.guilds.lock().await;
        guilds.entry(guild_id).or_default().welcome = Some(welcome);
        self.persist(&guilds).await
    }

    pub async fn welcome_ref(&self, guild_id: GuildId) -> Option<WelcomeRef> {
        self.guilds
            .lock()
            .await
            .get(&guild_id)
            .and_then(|config| config.welcome)
    }

    pub async fn clear_welcome_ref(&self, guild_id: GuildId) -> Result<bool, StoreError> {
        let mut guilds = self.guilds.lock().await;
        let Some(config) = guilds.get_mut(&guild_id) else {
            return Ok(false);
        };
        if config.welcome.take().is_none() {
            return Ok(false);
        }
        if config.is_empty() {
            guilds.remove(&guild_id);
        }

        self.persist(&guilds).await?;
        Ok(true)
    }

    /// Drop every entry of `guild_id` whose role or channel no longer exists.  Returns how many
    /// entries were dropped.
    pub async fn reconcile_against_live_state(
        &self,
        guild_id: GuildId,
        role_exists: impl Fn(RoleId) -> bool,
        channel_exists: impl Fn(ChannelId) -> bool,
    ) -> Result<usize, StoreError> {
        let mut guilds = self.guilds.lock().await;
        let Some(config) = guilds.get_mut(&guild_id) else {
            return Ok(0);
        };

        let before = config.entries.len();
        config
            .entries
            .retain(|_, entry| channel_exists(entry.channel_id) && role_exists(entry.role_id));
        let removed = before - config.entries.len();

        if config.is_empty() {
            guilds.remove(&guild_id);
        }
        if removed == 0 {
            return Ok(0);
        }

        info!(
            "Cleaned up {} stale reaction role(s) in guild {}",
            removed, guild_id
        );
        self.persist(&guilds).await?;
        Ok(removed)
    }

    /// Write the current state again, e.g. after an earlier `StoreError::Persist`.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let guilds = self.guilds.lock().await;
        self.persist(&guilds).await
    }

    // Called with the lock held so snapshots hit the disk in mutation order.
    async fn persist(&self, guilds: &HashMap<GuildId, GuildConfig>) -> Result<(), StoreError> {
        write_snapshot(&self.path, &to_snapshot(guilds))
            .await
            .map_err(|e| StoreError::Persist {
                path: self.path.to_string_lossy().into_owned(),
                reason: e.to_string(),
            })
    }
}

// On-disk layout: guild id -> { "<channel>_<message>_<emoji>": entry, "welcome_message": ref }
type Snapshot = BTreeMap<String, GuildRecord>;

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct GuildRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    welcome_message: Option<WelcomeRecord>,
    #[serde(flatten)]
    entries: BTreeMap<String, serde_json::Value>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct EntryRecord {
    guild_id: u64,
    channel_id: u64,
    message_id: u64,
    emoji: String,
    role_id: u64,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WelcomeRecord {
    channel_id: u64,
    message_id: u64,
}

fn to_snapshot(guilds: &HashMap<GuildId, GuildConfig>) -> Snapshot {
    guilds
        .iter()
        .filter(|(_, config)| !config.is_empty())
        .map(|(guild_id, config)| {
            let entries = config
                .entries
                .values()
                .filter_map(|entry| {
                    let record = EntryRecord {
                        guild_id: entry.guild_id.get(),
                        channel_id: entry.channel_id.get(),
                        message_id: entry.message_id.get(),
                        emoji: entry.emoji.to_string(),
                        role_id: entry.role_id.get(),
                    };
                    let composite = format!(
                        "{}_{}_{}",
                        record.channel_id, record.message_id, record.emoji
                    );
                    serde_json::to_value(record).ok().map(|v| (composite, v))
                })
                .collect();
            let welcome_message = config.welcome.map(|w| WelcomeRecord {
                channel_id: w.channel_id.get(),
                message_id: w.message_id.get(),
            });
            (
                guild_id.to_string(),
                GuildRecord {
                    welcome_message,
                    entries,
                },
            )
        })
        .collect()
}

fn from_snapshot(snapshot: Snapshot) -> HashMap<GuildId, GuildConfig> {
    let mut guilds = HashMap::new();

    for (guild_key, record) in snapshot {
        let Some(guild_id) = parse_id(&guild_key).map(GuildId::new) else {
            warn!("Skipping snapshot guild with invalid id `{}`", guild_key);
            continue;
        };

        let mut config = GuildConfig {
            entries: HashMap::new(),
            welcome: record.welcome_message.and_then(|w| {
                Some(WelcomeRef {
                    channel_id: ChannelId::new(nonzero(w.channel_id)?),
                    message_id: MessageId::new(nonzero(w.message_id)?),
                })
            }),
        };

        for (composite, value) in record.entries {
            match entry_from_value(guild_id, value) {
                Some(entry) => {
                    config.entries.insert(entry.key(), entry);
                }
                None => warn!(
                    "Skipping unreadable reaction role `{}` in guild {}",
                    composite, guild_id
                ),
            }
        }

        if !config.is_empty() {
            guilds.insert(guild_id, config);
        }
    }

    guilds
}

fn entry_from_value(guild_id: GuildId, value: serde_json::Value) -> Option<ReactionRoleEntry> {
    let record: EntryRecord = serde_json::from_value(value).ok()?;
    Some(ReactionRoleEntry {
        guild_id,
        channel_id: ChannelId::new(nonzero(record.channel_id)?),
        message_id: MessageId::new(nonzero(record.message_id)?),
        emoji: EmojiKey::parse(&record.emoji).ok()?,
        role_id: RoleId::new(nonzero(record.role_id)?),
    })
}

fn parse_id(s: &str) -> Option<u64> {
    s.parse().ok().and_then(nonzero)
}

// Serenity ids panic on zero.
fn nonzero(id: u64) -> Option<u64> {
    (id != 0).then_some(id)
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let serialized = serde_json::to_string_pretty(snapshot)
        .map_err(|e| anyhow!("Could not serialize reaction roles: {}", e))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            anyhow!(
                "Could not create directory `{}`: {}",
                parent.to_string_lossy(),
                e
            )
        })?;
    }

    // Create a temporary file in the same directory.
    let tmp_path = path.with_extension("json.new");

    tokio::fs::write(&tmp_path, serialized).await.map_err(|e| {
        anyhow!(
            "Could not write temporary file `{}`: {}",
            tmp_path.to_string_lossy(),
            e
        )
    })?;

    // Atomically rename the temporary file over the target file.
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        anyhow!(
            "Could not rename temporary file `{}` to `{}`: {}",
            tmp_path.to_string_lossy(),
            path.to_string_lossy(),
            e
        )
    })?;

    debug!("Reaction roles saved to `{}`", path.display());
    Ok(())
}

// Keep the unreadable file around instead of overwriting it on the next save.
async fn set_aside_corrupt(path: &Path) {
    let backup = path.with_extension("json.corrupt");
    if let Err(e) = tokio::fs::rename(path, &backup).await {
        warn!(
            "Could not move corrupt snapshot to `{}`: {}",
            backup.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(guild: u64, channel: u64, message: u64, emoji: &str, role: u64) -> ReactionRoleEntry {
        ReactionRoleEntry {
            guild_id: GuildId::new(guild),
            channel_id: ChannelId::new(channel),
            message_id: MessageId::new(message),
            emoji: EmojiKey::parse(emoji).unwrap(),
            role_id: RoleId::new(role),
        }
    }

    async fn fresh_store() -> (TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("roles.json")).await;
        (dir, store)
    }

    #[tokio::test]
    async fn add_then_lookup_returns_entry() {
        let (_dir, store) = fresh_store().await;
        let e = entry(1, 10, 100, "🎮", 55);

        assert_eq!(store.add_entry(e.clone()).await.unwrap(), AddOutcome::Added);
        let found = store
            .lookup_entry(e.guild_id, e.channel_id, e.message_id, &e.emoji)
            .await;
        assert_eq!(found, Some(e));
    }

    #[tokio::test]
    async fn duplicate_key_reports_already_exists_and_keeps_original() {
        let (_dir, store) = fresh_store().await;
        store.add_entry(entry(1, 10, 100, "🎮", 55)).await.unwrap();

        let outcome = store.add_entry(entry(1, 10, 100, "🎮", 99)).await.unwrap();
        assert_eq!(outcome, AddOutcome::AlreadyExists);

        let emoji = EmojiKey::parse("🎮").unwrap();
        let found = store
            .lookup_entry(GuildId::new(1), ChannelId::new(10), MessageId::new(100), &emoji)
            .await
            .unwrap();
        assert_eq!(found.role_id, RoleId::new(55));
        assert_eq!(store.list_entries(GuildId::new(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn removing_unknown_entry_is_not_found() {
        let (_dir, store) = fresh_store().await;
        store.add_entry(entry(1, 10, 100, "🎮", 55)).await.unwrap();

        let emoji = EmojiKey::parse("🔥").unwrap();
        let outcome = store
            .remove_entry(GuildId::new(1), ChannelId::new(10), MessageId::new(100), &emoji)
            .await
            .unwrap();
        assert_eq!(outcome, RemoveOutcome::NotFound);
        assert_eq!(store.list_entries(GuildId::new(1)).await.len(), 1);

        let outcome = store
            .remove_entry(GuildId::new(2), ChannelId::new(10), MessageId::new(100), &emoji)
            .await
            .unwrap();
        assert_eq!(outcome, RemoveOutcome::NotFound);
    }

    #[tokio::test]
    async fn remove_then_lookup_is_absent() {
        let (_dir, store) = fresh_store().await;
        let e = entry(1, 10, 100, "<:party:777>", 55);
        store.add_entry(e.clone()).await.unwrap();

        let outcome = store
            .remove_entry(e.guild_id, e.channel_id, e.message_id, &e.emoji)
            .await
            .unwrap();
        assert_eq!(outcome, RemoveOutcome::Removed);
        assert!(store
            .lookup_entry(e.guild_id, e.channel_id, e.message_id, &e.emoji)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn renamed_custom_emoji_still_matches() {
        let (_dir, store) = fresh_store().await;
        store
            .add_entry(entry(1, 10, 100, "<:before:4242>", 55))
            .await
            .unwrap();

        let renamed = EmojiKey::parse("<:after:4242>").unwrap();
        let found = store
            .lookup_entry(GuildId::new(1), ChannelId::new(10), MessageId::new(100), &renamed)
            .await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        {
            let store = ConfigStore::load(&path).await;
            store.add_entry(entry(1, 10, 100, "🎮", 55)).await.unwrap();
            store
                .add_entry(entry(1, 10, 101, "<a:spin:9>", 56))
                .await
                .unwrap();
            store
                .set_welcome_ref(
                    GuildId::new(1),
                    WelcomeRef {
                        channel_id: ChannelId::new(20),
                        message_id: MessageId::new(200),
                    },
                )
                .await
                .unwrap();
        }

        let reopened = ConfigStore::load(&path).await;
        let mut roles: Vec<u64> = reopened
            .list_entries(GuildId::new(1))
            .await
            .iter()
            .map(|e| e.role_id.get())
            .collect();
        roles.sort();
        assert_eq!(roles, vec![55, 56]);
        assert_eq!(
            reopened.welcome_ref(GuildId::new(1)).await,
            Some(WelcomeRef {
                channel_id: ChannelId::new(20),
                message_id: MessageId::new(200),
            })
        );
    }

    #[tokio::test]
    async fn snapshot_uses_composite_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        let store = ConfigStore::load(&path).await;
        store.add_entry(entry(1, 10, 100, "🎮", 55)).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let record = &raw["1"]["10_100_🎮"];
        assert_eq!(record["role_id"], 55);
        assert_eq!(record["emoji"], "🎮");
        assert!(raw["1"].get("welcome_message").is_none());
    }

    #[tokio::test]
    async fn missing_snapshot_is_empty_store() {
        let (_dir, store) = fresh_store().await;
        assert!(store.list_entries(GuildId::new(1)).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_empty_store_and_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = ConfigStore::load(&path).await;
        assert!(store.list_entries(GuildId::new(1)).await.is_empty());
        assert!(path.with_extension("json.corrupt").exists());
    }

    #[tokio::test]
    async fn unreadable_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.json");
        std::fs::write(
            &path,
            r#"{
                "1": {
                    "10_100_🎮": {"guild_id": 1, "channel_id": 10, "message_id": 100, "emoji": "🎮", "role_id": 55},
                    "10_100_bad": {"guild_id": 1, "channel_id": 10, "message_id": 100, "emoji": "<:broken>", "role_id": 56},
                    "welcome_message": {"channel_id": 20, "message_id": 200}
                }
            }"#,
        )
        .unwrap();

        let store = ConfigStore::load(&path).await;
        let entries = store.list_entries(GuildId::new(1)).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role_id, RoleId::new(55));
        assert!(store.welcome_ref(GuildId::new(1)).await.is_some());
    }

    #[tokio::test]
    async fn purge_removes_entries_and_welcome() {
        let (_dir, store) = fresh_store().await;
        let guild = GuildId::new(1);
        store.add_entry(entry(1, 10, 100, "🎮", 55)).await.unwrap();
        store.add_entry(entry(2, 10, 100, "🎮", 55)).await.unwrap();
        store
            .set_welcome_ref(
                guild,
                WelcomeRef {
                    channel_id: ChannelId::new(20),
                    message_id: MessageId::new(200),
                },
            )
            .await
            .unwrap();

        assert!(store.purge_guild(guild).await.unwrap());
        assert!(store.list_entries(guild).await.is_empty());
        assert!(store.welcome_ref(guild).await.is_none());
        assert_eq!(store.list_entries(GuildId::new(2)).await.len(), 1);
        assert!(!store.purge_guild(guild).await.unwrap());
    }

    #[tokio::test]
    async fn welcome_ref_can_be_cleared() {
        let (_dir, store) = fresh_store().await;
        let guild = GuildId::new(3);
        assert!(!store.clear_welcome_ref(guild).await.unwrap());

        store
            .set_welcome_ref(
                guild,
                WelcomeRef {
                    channel_id: ChannelId::new(20),
                    message_id: MessageId::new(200),
                },
            )
            .await
            .unwrap();
        assert!(store.clear_welcome_ref(guild).await.unwrap());
        assert!(store.welcome_ref(guild).await.is_none());
    }

    #[tokio::test]
    async fn reconcile_drops_entries_with_missing_role_or_channel() {
        let (_dir, store) = fresh_store().await;
        store.add_entry(entry(1, 10, 100, "🎮", 55)).await.unwrap();
        store.add_entry(entry(1, 10, 100, "🔥", 66)).await.unwrap();
        store.add_entry(entry(1, 11, 100, "🎮", 55)).await.unwrap();

        let removed = store
            .reconcile_against_live_state(
                GuildId::new(1),
                |role| role != RoleId::new(66),
                |channel| channel != ChannelId::new(11),
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = store.list_entries(GuildId::new(1)).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].role_id, RoleId::new(55));
        assert_eq!(remaining[0].channel_id, ChannelId::new(10));
    }

    #[tokio::test]
    async fn failed_persist_keeps_in_memory_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"").unwrap();
        let store = ConfigStore::load(blocker.join("roles.json")).await;

        let e = entry(1, 10, 100, "🎮", 55);
        let result = store.add_entry(e.clone()).await;
        assert!(matches!(result, Err(StoreError::Persist { .. })));

        let found = store
            .lookup_entry(e.guild_id, e.channel_id, e.message_id, &e.emoji)
            .await;
        assert_eq!(found, Some(e.clone()));
        assert_eq!(
            store.add_entry(e).await.unwrap(),
            AddOutcome::AlreadyExists
        );
        assert!(store.flush().await.is_err());
    }
}
