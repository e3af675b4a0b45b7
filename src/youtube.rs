//! Minimal YouTube Data API v3 client: latest upload of a channel, handle lookup.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::debug;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
}

impl Video {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

/// What an administrator may pass to identify a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelReference {
    Id(String),
    /// `@handle`, stored without the `@`.
    Handle(String),
}

/// Accepts a raw channel id, `@handle`, or a youtube.com `/channel/<id>` or `/@handle` URL.
pub fn parse_channel_reference(input: &str) -> Option<ChannelReference> {
    let input = input.trim();
    if input.is_empty() || input.contains(char::is_whitespace) {
        return None;
    }

    let path_segment = |marker: &str| {
        input
            .split_once(marker)
            .map(|(_, rest)| rest.split(['?', '/', '#']).next().unwrap_or_default())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    if input.contains("youtube.com") {
        if let Some(id) = path_segment("/channel/") {
            return Some(ChannelReference::Id(id));
        }
        return path_segment("/@").map(ChannelReference::Handle);
    }

    match input.strip_prefix('@') {
        Some("") => None,
        Some(handle) => Some(ChannelReference::Handle(handle.to_owned())),
        None => Some(ChannelReference::Id(input.to_owned())),
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
}

impl SearchResponse {
    fn latest(self) -> Option<Video> {
        self.items.into_iter().find_map(|item| {
            Some(Video {
                id: item.id.video_id?,
                title: unescape_html(&item.snippet.title),
            })
        })
    }
}

/// The search endpoint returns titles with HTML entities escaped.
fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub struct YouTubeClient {
    http: reqwest::Client,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }

    /// The most recent video uploaded to `channel_id`, if it has any.
    pub async fn latest_upload(&self, channel_id: &str) -> Result<Option<Video>> {
        debug!("Fetching latest upload of {}", channel_id);

        let response: SearchResponse = self
            .http
            .get(format!("{}/search", API_BASE))
            .query(&[
                ("part", "snippet"),
                ("channelId", channel_id),
                ("order", "date"),
                ("maxResults", "1"),
                ("type", "video"),
                ("key", &self.api_key),
            ])
            .send()
            .await?
            .error_for_status()
            .context("YouTube search request failed")?
            .json()
            .await?;

        Ok(response.latest())
    }

    pub async fn resolve_handle(&self, handle: &str) -> Result<Option<String>> {
        let handle = format!("@{}", handle.trim_start_matches('@'));

        let response: ChannelsResponse = self
            .http
            .get(format!("{}/channels", API_BASE))
            .query(&[("part", "id"), ("forHandle", &handle), ("key", &self.api_key)])
            .send()
            .await?
            .error_for_status()
            .context("YouTube channel lookup failed")?
            .json()
            .await?;

        Ok(response.items.into_iter().next().map(|item| item.id))
    }

    pub async fn resolve(&self, reference: ChannelReference) -> Result<Option<String>> {
        match reference {
            ChannelReference::Id(id) => Ok(Some(id)),
            ChannelReference::Handle(handle) => self.resolve_handle(&handle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_ids_and_handles() {
        assert_eq!(
            parse_channel_reference(" UC_x5XG1OV2P6uZZ5FSM9Ttw "),
            Some(ChannelReference::Id("UC_x5XG1OV2P6uZZ5FSM9Ttw".to_owned()))
        );
        assert_eq!(
            parse_channel_reference("@somecreator"),
            Some(ChannelReference::Handle("somecreator".to_owned()))
        );
    }

    #[test]
    fn parses_channel_urls() {
        assert_eq!(
            parse_channel_reference("https://www.youtube.com/channel/UC123abc?sub_confirmation=1"),
            Some(ChannelReference::Id("UC123abc".to_owned()))
        );
        assert_eq!(
            parse_channel_reference("https://youtube.com/@somecreator/videos"),
            Some(ChannelReference::Handle("somecreator".to_owned()))
        );
    }

    #[test]
    fn rejects_unusable_references() {
        assert_eq!(parse_channel_reference(""), None);
        assert_eq!(parse_channel_reference("@"), None);
        assert_eq!(parse_channel_reference("two words"), None);
        assert_eq!(
            parse_channel_reference("https://www.youtube.com/watch?v=abc"),
            None
        );
    }

    #[test]
    fn picks_first_video_from_search() {
        let json = r#"{
            "kind": "youtube#searchListResponse",
            "items": [{
                "id": {"kind": "youtube#video", "videoId": "abc123"},
                "snippet": {"title": "Tom &amp; Jerry&#39;s &quot;Best&quot; Bits"}
            }]
        }"#;

        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let video = response.latest().unwrap();
        assert_eq!(video.id, "abc123");
        assert_eq!(video.title, "Tom & Jerry's \"Best\" Bits");
        assert_eq!(video.url(), "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn empty_search_has_no_latest() {
        let response: SearchResponse = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert!(response.latest().is_none());

        let response: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(response.latest().is_none());
    }
}
