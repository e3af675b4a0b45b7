//! Lyrics lookup against lrclib.net.

use anyhow::{Context as _, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

const SEARCH_URL: &str = "https://lrclib.net/api/search";

// "(Official Music Video)", "[Lyrics]", "【MV】" and friends only hurt the search.
static DECORATIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[\(\[【][^\)\]】]*[\)\]】]").expect("decoration pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lyrics {
    pub title: String,
    pub artist: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrclibRecord {
    track_name: String,
    artist_name: String,
    plain_lyrics: Option<String>,
    #[serde(default)]
    instrumental: bool,
}

pub fn clean_title(title: &str) -> String {
    DECORATIONS.replace_all(title, "").trim().to_owned()
}

fn first_with_lyrics(records: Vec<LrclibRecord>) -> Option<Lyrics> {
    records.into_iter().find_map(|record| {
        let text = record.plain_lyrics.filter(|t| !t.trim().is_empty());
        let text = match (text, record.instrumental) {
            (Some(text), _) => text,
            (None, true) => "(instrumental)".to_owned(),
            (None, false) => return None,
        };
        Some(Lyrics {
            title: record.track_name,
            artist: record.artist_name,
            text,
        })
    })
}

pub async fn lookup(http: &reqwest::Client, title: &str) -> Result<Option<Lyrics>> {
    let query = clean_title(title);
    if query.is_empty() {
        return Ok(None);
    }

    let records: Vec<LrclibRecord> = http
        .get(SEARCH_URL)
        .query(&[("q", query.as_str())])
        .send()
        .await?
        .error_for_status()
        .context("lyrics search failed")?
        .json()
        .await?;

    Ok(first_with_lyrics(records))
}
