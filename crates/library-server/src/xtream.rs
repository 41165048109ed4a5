use anyhow::{Context, Result};
use serde::Deserialize;

/// One category as the Xtream `player_api.php` reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct XtreamCategory {
    #[serde(rename = "category_id")]
    pub external_id: String,
    #[serde(rename = "category_name")]
    pub name: String,
}

/// One live channel as the Xtream `player_api.php` reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct XtreamChannel {
    #[serde(default)]
    pub num: i64,
    pub name: String,
    pub stream_id: i64,
    #[serde(rename = "category_id")]
    pub external_category_id: String,
    #[serde(default)]
    pub epg_channel_id: Option<String>,
    #[serde(default)]
    pub stream_icon: Option<String>,
    /// Direct source URL, present in m3u lineups only; Xtream providers
    /// leave it out and the store derives one instead.
    #[serde(default)]
    pub stream_url: Option<String>,
}

/// Where the relay's transcoder pulls the channel from. Xtream providers
/// serve live channels under this fixed path scheme.
pub fn live_stream_url(server: &str, username: &str, password: &str, stream_id: i64) -> String {
    format!(
        "{}/live/{username}/{password}/{stream_id}.m3u8",
        server.trim_end_matches('/')
    )
}

fn player_api_url(server: &str, username: &str, password: &str, action: &str) -> String {
    format!(
        "{}/player_api.php?username={username}&password={password}&action={action}",
        server.trim_end_matches('/')
    )
}

/// Fetches the provider's live lineup: categories first, then channels.
pub async fn fetch_live_lineup(
    http: &reqwest::Client,
    server: &str,
    username: &str,
    password: &str,
) -> Result<(Vec<XtreamCategory>, Vec<XtreamChannel>)> {
    let categories: Vec<XtreamCategory> = http
        .get(player_api_url(server, username, password, "get_live_categories"))
        .send()
        .await
        .context("fetching live categories")?
        .json()
        .await
        .context("decoding live categories")?;

    let channels: Vec<XtreamChannel> = http
        .get(player_api_url(server, username, password, "get_live_streams"))
        .send()
        .await
        .context("fetching live streams")?
        .json()
        .await
        .context("decoding live streams")?;

    Ok((categories, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_provider_payloads() {
        let categories: Vec<XtreamCategory> = serde_json::from_str(
            r#"[{"category_id":"10","category_name":"News","parent_id":0}]"#,
        )
        .expect("decode categories");
        assert_eq!(categories[0].external_id, "10");
        assert_eq!(categories[0].name, "News");

        let channels: Vec<XtreamChannel> = serde_json::from_str(
            r#"[{
                "num": 3,
                "name": "World News",
                "stream_type": "live",
                "stream_id": 101,
                "stream_icon": "http://icons/news.png",
                "epg_channel_id": "world.news",
                "category_id": "10"
            }]"#,
        )
        .expect("decode channels");
        assert_eq!(channels[0].stream_id, 101);
        assert_eq!(channels[0].external_category_id, "10");
        assert_eq!(channels[0].epg_channel_id.as_deref(), Some("world.news"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let channels: Vec<XtreamChannel> = serde_json::from_str(
            r#"[{"name":"Bare","stream_id":7,"category_id":"10"}]"#,
        )
        .expect("decode minimal channel");
        assert_eq!(channels[0].num, 0);
        assert!(channels[0].epg_channel_id.is_none());
        assert!(channels[0].stream_url.is_none());
    }

    #[test]
    fn m3u_lineup_entries_carry_their_source() {
        let channels: Vec<XtreamChannel> = serde_json::from_str(
            r#"[{
                "name": "Direct",
                "stream_id": 101,
                "category_id": "10",
                "stream_url": "http://cdn.example.com/direct/101.ts"
            }]"#,
        )
        .expect("decode m3u channel");
        assert_eq!(
            channels[0].stream_url.as_deref(),
            Some("http://cdn.example.com/direct/101.ts")
        );
    }

    #[test]
    fn url_builders_normalize_trailing_slash() {
        assert_eq!(
            live_stream_url("http://x.example.com/", "u", "p", 42),
            "http://x.example.com/live/u/p/42.m3u8"
        );
        assert_eq!(
            player_api_url("http://x.example.com", "u", "p", "get_live_streams"),
            "http://x.example.com/player_api.php?username=u&password=p&action=get_live_streams"
        );
    }
}
