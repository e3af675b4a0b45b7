use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

const CONFIG_PATH_REL_HOME: &str = ".config/sagebot/config.toml";

const TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";
const YOUTUBE_KEY_ENV: &str = "YOUTUBE_API_KEY";

/// Bot configuration
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub video: Video,
    #[serde(default)]
    pub music: Music,
    #[serde(default)]
    pub welcome: Welcome,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct General {
    /// May be left empty when `DISCORD_BOT_TOKEN` is set.
    #[serde(default)]
    pub discord_token: String,
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
    /// Global user names allowed to run administrative and owner-only commands anywhere.
    #[serde(default)]
    pub bot_owners: Vec<String>,
    pub nickname: Option<String>,
    /// Shown as "Watching ..."
    pub activity: Option<String>,
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
pub struct Storage {
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Video {
    pub api_key: Option<String>,
    /// Channel URL, `@handle` or id to watch from startup.
    pub channel: Option<String>,
    pub poll_interval_seconds: u64,
    pub notify_channel_id: Option<u64>,
    /// `{title}` and `{url}` are substituted.
    pub message: String,
}

impl Default for Video {
    fn default() -> Self {
        Self {
            api_key: None,
            channel: None,
            poll_interval_seconds: 300,
            notify_channel_id: None,
            message: "@everyone\nA new video was just released!\n\n**{title}**\n{url}".to_owned(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Music {
    /// 0.0 to 1.0
    pub default_volume: f32,
    pub playlist_limit: usize,
    pub yt_dlp: String,
}

impl Default for Music {
    fn default() -> Self {
        Self {
            default_volume: 0.5,
            playlist_limit: 50,
            yt_dlp: "yt-dlp".to_owned(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Welcome {
    pub text: String,
    pub button_label: String,
    pub button_emoji: Option<String>,
    /// Takes precedence over `role_name`.
    pub role_id: Option<u64>,
    pub role_name: Option<String>,
}

impl Default for Welcome {
    fn default() -> Self {
        Self {
            text: "Welcome! Press the button below to enter.".to_owned(),
            button_label: "Enter".to_owned(),
            button_emoji: Some("🦄".to_owned()),
            role_id: None,
            role_name: Some("Member".to_owned()),
        }
    }
}

fn default_prefix() -> String {
    "!".to_owned()
}

impl Video {
    pub fn render(&self, title: &str, url: &str) -> String {
        self.message.replace("{title}", title).replace("{url}", url)
    }
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            anyhow!(
                "Could not open configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut config = Self::from_toml_str(&contents).map_err(|e| {
            anyhow!(
                "Could not parse configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        config.apply_overrides(
            std::env::var(TOKEN_ENV).ok(),
            std::env::var(YOUTUBE_KEY_ENV).ok(),
        );
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(Into::into)
    }

    /// Non-empty environment values win over the file.
    pub fn apply_overrides(&mut self, token: Option<String>, youtube_key: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.general.discord_token = token;
        }
        if let Some(key) = youtube_key.filter(|k| !k.trim().is_empty()) {
            self.video.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.discord_token.trim().is_empty() {
            return Err(anyhow!(
                "No Discord token: set `general.discord_token` or `{}`",
                TOKEN_ENV
            ));
        }
        if self.general.command_prefix.is_empty() {
            return Err(anyhow!("`general.command_prefix` must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.music.default_volume) {
            return Err(anyhow!("`music.default_volume` must be between 0.0 and 1.0"));
        }
        if self.video.poll_interval_seconds == 0 {
            return Err(anyhow!("`video.poll_interval_seconds` must be positive"));
        }
        Ok(())
    }

    pub async fn reload(&mut self) -> Result<()> {
        let new = Self::load().await?;
        *self = new;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = Config::from_toml_str("[general]\ndiscord_token = \"abc\"\n").unwrap();

        assert_eq!(cfg.general.command_prefix, "!");
        assert!(cfg.general.bot_owners.is_empty());
        assert_eq!(cfg.video.poll_interval_seconds, 300);
        assert_eq!(cfg.music.default_volume, 0.5);
        assert_eq!(cfg.music.playlist_limit, 50);
        assert_eq!(cfg.music.yt_dlp, "yt-dlp");
        assert!(cfg.storage.snapshot_path.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_file() {
        let cfg = Config::from_toml_str(
            r#"
            [general]
            discord_token = "abc"
            command_prefix = ";"
            bot_owners = ["someone"]
            nickname = "Sage"
            activity = "the uploads"

            [storage]
            snapshot_path = "/var/lib/sagebot/roles.json"

            [video]
            channel = "https://www.youtube.com/@creator"
            poll_interval_seconds = 60
            notify_channel_id = 1234
            message = "New: {title} {url}"

            [music]
            default_volume = 0.25
            playlist_limit = 10

            [welcome]
            text = "Hi"
            button_label = "Agree"
            role_id = 42
            "#,
        )
        .unwrap();

        assert_eq!(cfg.general.command_prefix, ";");
        assert_eq!(cfg.general.bot_owners, vec!["someone"]);
        assert_eq!(cfg.video.notify_channel_id, Some(1234));
        assert_eq!(cfg.music.yt_dlp, "yt-dlp");
        assert_eq!(cfg.welcome.role_id, Some(42));
        // Fields left out of a present section still get defaults.
        assert_eq!(cfg.welcome.role_name.as_deref(), Some("Member"));
        assert_eq!(
            cfg.video.render("Title", "https://youtu.be/x"),
            "New: Title https://youtu.be/x"
        );
    }

    #[test]
    fn environment_overrides_file() {
        let mut cfg = Config::from_toml_str("[general]\n").unwrap();
        assert!(cfg.validate().is_err());

        cfg.apply_overrides(Some("from-env".to_owned()), Some("key".to_owned()));
        assert_eq!(cfg.general.discord_token, "from-env");
        assert_eq!(cfg.video.api_key.as_deref(), Some("key"));
        assert!(cfg.validate().is_ok());

        cfg.apply_overrides(Some("  ".to_owned()), None);
        assert_eq!(cfg.general.discord_token, "from-env");
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = Config::from_toml_str(
            "[general]\ndiscord_token = \"x\"\n[music]\ndefault_volume = 1.5\n",
        )
        .unwrap();
        assert!(cfg.validate().is_err());

        assert!(Config::from_toml_str("not toml at all [").is_err());
    }
}
