//! Turning user input into playable tracks with the `yt-dlp` binary.

use crate::playback::Track;
use anyhow::{anyhow, Context as _, Result};
use reqwest::Url;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

#[serenity::async_trait]
pub trait TrackResolver: Send + Sync {
    /// A URL (video or playlist) or a free-text query, which resolves to its first hit.
    async fn resolve(&self, input: &str) -> Result<Vec<Track>>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>>;
}

pub struct YtDlp {
    program: String,
    playlist_limit: usize,
}

impl YtDlp {
    pub fn new(program: impl Into<String>, playlist_limit: usize) -> Self {
        Self {
            program: program.into(),
            playlist_limit: playlist_limit.max(1),
        }
    }

    async fn dump_json(&self, args: &[&str]) -> Result<String> {
        debug!("Running {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(["-J", "--no-warnings"])
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("could not run `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "`{}` failed ({}): {}",
                self.program,
                output.status,
                stderr.lines().last().unwrap_or_default()
            ));
        }

        String::from_utf8(output.stdout).context("yt-dlp printed invalid UTF-8")
    }
}

#[serenity::async_trait]
impl TrackResolver for YtDlp {
    async fn resolve(&self, input: &str) -> Result<Vec<Track>> {
        let input = input.trim();

        let json = if is_playlist(input) {
            let limit = self.playlist_limit.to_string();
            self.dump_json(&["--flat-playlist", "--playlist-end", &limit, input])
                .await?
        } else if looks_like_url(input) {
            self.dump_json(&["--no-playlist", input]).await?
        } else {
            let query = format!("ytsearch1:{input}");
            self.dump_json(&["--no-playlist", &query]).await?
        };

        let mut tracks = parse_tracks(&json)?;
        tracks.truncate(self.playlist_limit);
        Ok(tracks)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Track>> {
        let query = format!("ytsearch{}:{}", limit.max(1), query.trim());
        let json = self.dump_json(&["--flat-playlist", &query]).await?;
        parse_tracks(&json)
    }
}

/// youtube.com links carrying a `list` parameter.  youtu.be short links never count.
pub fn is_playlist(input: &str) -> bool {
    let Ok(url) = Url::parse(input) else {
        return false;
    };
    let is_youtube = url
        .host_str()
        .is_some_and(|host| host == "youtube.com" || host.ends_with(".youtube.com"));

    is_youtube && url.query_pairs().any(|(key, _)| key == "list")
}

fn looks_like_url(input: &str) -> bool {
    Url::parse(input).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

#[derive(Debug, Deserialize)]
struct Info {
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    entries: Option<Vec<Info>>,
}

impl Info {
    fn into_track(self) -> Option<Track> {
        let source_url = self
            .webpage_url
            .or_else(|| self.url.filter(|u| u.starts_with("http")))
            .or_else(|| {
                self.id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            })?;

        Some(Track {
            title: self.title.unwrap_or_else(|| source_url.clone()),
            source_url,
            duration_seconds: self
                .duration
                .filter(|d| d.is_finite() && *d > 0.0)
                .map(|d| d.round() as u64),
            thumbnail_url: self.thumbnail,
        })
    }
}

/// Tracks from a `yt-dlp -J` dump, whether it describes one video or a list of them.
pub fn parse_tracks(json: &str) -> Result<Vec<Track>> {
    let info: Info = serde_json::from_str(json).context("unexpected yt-dlp output")?;

    Ok(match info.entries {
        Some(entries) => entries.into_iter().filter_map(Info::into_track).collect(),
        None => info.into_track().into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_playlists() {
        assert!(is_playlist(
            "https://www.youtube.com/playlist?list=PL1234567890"
        ));
        assert!(is_playlist(
            "https://youtube.com/watch?v=abc&list=PL1234567890"
        ));
        assert!(is_playlist("https://music.youtube.com/playlist?list=OLAK5"));
    }

    #[test]
    fn single_videos_and_queries_are_not_playlists() {
        assert!(!is_playlist("https://www.youtube.com/watch?v=abc"));
        assert!(!is_playlist("https://youtu.be/abc?list=PL1234567890"));
        assert!(!is_playlist("https://notyoutube.com/watch?list=PL1"));
        assert!(!is_playlist("never gonna give you up"));
    }

    #[test]
    fn parses_single_video() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "duration": 212.0,
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"
        }"#;

        let tracks = parse_tracks(json).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "Never Gonna Give You Up");
        assert_eq!(tracks[0].duration_seconds, Some(212));
        assert!(tracks[0].thumbnail_url.is_some());
    }

    #[test]
    fn parses_flat_playlist_entries_without_durations() {
        let json = r#"{
            "_type": "playlist",
            "title": "Mix",
            "entries": [
                {"id": "aaa", "title": "First", "url": "https://www.youtube.com/watch?v=aaa"},
                {"id": "bbb", "title": "Second", "duration": null},
                {"title": "No way to play this"}
            ]
        }"#;

        let tracks = parse_tracks(json).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].source_url, "https://www.youtube.com/watch?v=aaa");
        assert_eq!(tracks[1].source_url, "https://www.youtube.com/watch?v=bbb");
        assert!(tracks.iter().all(|t| t.duration_seconds.is_none()));
    }

    #[test]
    fn search_results_keep_their_durations() {
        let json = r#"{"entries": [
            {"id": "x1", "title": "One", "duration": 61.4},
            {"id": "x2", "title": "Two", "duration": 0}
        ]}"#;

        let tracks = parse_tracks(json).unwrap();
        assert_eq!(tracks[0].duration_seconds, Some(61));
        assert_eq!(tracks[1].duration_seconds, None);
    }

    #[test]
    fn garbage_output_is_an_error() {
        assert!(parse_tracks("ERROR: video unavailable").is_err());
    }
}
