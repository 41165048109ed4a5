use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::xtream;

/// Import lifecycle markers stored on a playlist row.
pub mod import_status {
    pub const PENDING: i64 = 0;
    pub const RUNNING: i64 = 1;
    pub const DONE: i64 = 2;
    pub const FAILED: i64 = -1;
}

/// HDHomeRun-style channel numbers start here, matching what tuner clients
/// expect from a virtual lineup.
const HDHR_BASE_CHANNEL_NUM: i64 = 1000;

/// How a playlist's channels reach the relay: an Xtream provider the store
/// derives URLs for, or an m3u lineup whose entries carry their own source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistKind {
    #[default]
    Xtream,
    M3u,
}

impl PlaylistKind {
    fn as_str(self) -> &'static str {
        match self {
            PlaylistKind::Xtream => "xtream",
            PlaylistKind::M3u => "m3u",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "m3u" => PlaylistKind::M3u,
            _ => PlaylistKind::Xtream,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
    pub server: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "type")]
    pub kind: PlaylistKind,
    pub import_status: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlaylist {
    pub name: String,
    pub server: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "type", default)]
    pub kind: PlaylistKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub playlist_id: i64,
    pub external_id: String,
    pub name: String,
    pub num: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub category_id: i64,
    pub external_category_id: String,
    pub stream_id: i64,
    pub num: i64,
    pub name: String,
    pub stream_url: String,
    pub epg_channel_id: Option<String>,
    pub stream_icon: Option<String>,
    pub hdhr_channel_num: i64,
    pub active: bool,
}

/// The channel store: playlists imported from an Xtream provider, their
/// categories and live channels. One connection behind a mutex is plenty for
/// the management surface.
#[derive(Clone)]
pub struct Library {
    conn: Arc<Mutex<Connection>>,
}

impl Library {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                server TEXT NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'xtream',
                import_status INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                num INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 0,
                UNIQUE(playlist_id, external_id)
            );
            CREATE TABLE IF NOT EXISTS channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                external_category_id TEXT NOT NULL,
                stream_id INTEGER NOT NULL,
                num INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                stream_url TEXT NOT NULL,
                epg_channel_id TEXT,
                stream_icon TEXT,
                hdhr_channel_num INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                UNIQUE(category_id, stream_id)
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create_playlist(&self, new: &NewPlaylist) -> Result<Playlist> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO playlists (name, server, username, password, type)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new.name, new.server, new.username, new.password, new.kind.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Playlist {
            id,
            name: new.name.clone(),
            server: new.server.clone(),
            username: new.username.clone(),
            password: new.password.clone(),
            kind: new.kind,
            import_status: import_status::PENDING,
        })
    }

    pub fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, server, username, password, type, import_status
             FROM playlists ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], row_to_playlist)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_playlist(&self, id: i64) -> Result<Option<Playlist>> {
        let conn = self.conn.lock();
        let playlist = conn
            .query_row(
                "SELECT id, name, server, username, password, type, import_status
                 FROM playlists WHERE id = ?1",
                params![id],
                row_to_playlist,
            )
            .optional()?;
        Ok(playlist)
    }

    pub fn update_playlist(&self, id: i64, new: &NewPlaylist) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE playlists SET name = ?1, server = ?2, username = ?3, password = ?4, type = ?5
             WHERE id = ?6",
            params![new.name, new.server, new.username, new.password, new.kind.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_playlist(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM playlists WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn set_import_status(&self, id: i64, status: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE playlists SET import_status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(())
    }

    pub fn list_categories(&self, playlist_id: i64) -> Result<Vec<Category>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, playlist_id, external_id, name, num, active
             FROM categories WHERE playlist_id = ?1 ORDER BY num",
        )?;
        let rows = stmt
            .query_map(params![playlist_id], row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_category_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE categories SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_channels(&self, category_id: i64) -> Result<Vec<Channel>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, category_id, external_category_id, stream_id, num, name, stream_url,
                    epg_channel_id, stream_icon, hdhr_channel_num, active
             FROM channels WHERE category_id = ?1 ORDER BY num",
        )?;
        let rows = stmt
            .query_map(params![category_id], row_to_channel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upstream source for one channel, used by the relay.
    pub fn channel_stream_url(&self, channel_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let url = conn
            .query_row(
                "SELECT stream_url FROM channels WHERE id = ?1",
                params![channel_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url)
    }

    /// Reconciles one fetched Xtream lineup with the stored one: new rows are
    /// inserted, existing rows updated in place (keeping their `active`
    /// flags), and rows the provider no longer lists are dropped.
    pub fn apply_import(
        &self,
        playlist: &Playlist,
        categories: &[xtream::XtreamCategory],
        channels: &[xtream::XtreamChannel],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for (num, category) in categories.iter().enumerate() {
            tx.execute(
                "INSERT INTO categories (playlist_id, external_id, name, num, active)
                 VALUES (?1, ?2, ?3, ?4, 0)
                 ON CONFLICT(playlist_id, external_id)
                 DO UPDATE SET name = excluded.name, num = excluded.num",
                params![playlist.id, category.external_id, category.name, num as i64],
            )?;
        }

        // sweep categories the provider dropped
        let stale_categories: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id, external_id FROM categories WHERE playlist_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![playlist.id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .filter(|(_, external_id)| {
                    !categories.iter().any(|c| &c.external_id == external_id)
                })
                .map(|(id, _)| id)
                .collect()
        };
        for id in stale_categories {
            tx.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        }

        let mut hdhr_channel_num = HDHR_BASE_CHANNEL_NUM;
        for channel in channels {
            let category_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM categories WHERE playlist_id = ?1 AND external_id = ?2",
                    params![playlist.id, channel.external_category_id],
                    |row| row.get(0),
                )
                .optional()?;
            // channels whose category the provider never listed are skipped
            let Some(category_id) = category_id else {
                continue;
            };

            let stream_url = match playlist.kind {
                // m3u entries name their own source; there is nothing to derive
                PlaylistKind::M3u => match &channel.stream_url {
                    Some(url) => url.clone(),
                    None => continue,
                },
                PlaylistKind::Xtream => xtream::live_stream_url(
                    &playlist.server,
                    &playlist.username,
                    &playlist.password,
                    channel.stream_id,
                ),
            };
            tx.execute(
                "INSERT INTO channels (category_id, external_category_id, stream_id, num, name,
                                       stream_url, epg_channel_id, stream_icon, hdhr_channel_num)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(category_id, stream_id)
                 DO UPDATE SET num = excluded.num, name = excluded.name,
                               stream_url = excluded.stream_url,
                               epg_channel_id = excluded.epg_channel_id,
                               stream_icon = excluded.stream_icon,
                               hdhr_channel_num = excluded.hdhr_channel_num",
                params![
                    category_id,
                    channel.external_category_id,
                    channel.stream_id,
                    channel.num,
                    channel.name,
                    stream_url,
                    channel.epg_channel_id,
                    channel.stream_icon,
                    hdhr_channel_num,
                ],
            )?;
            hdhr_channel_num += 1;
        }

        // sweep channels the provider dropped
        let stale_channels: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT channels.id, channels.stream_id, channels.external_category_id
                 FROM channels
                 JOIN categories ON categories.id = channels.category_id
                 WHERE categories.playlist_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![playlist.id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .filter(|(_, stream_id, external_category_id)| {
                    !channels.iter().any(|c| {
                        c.stream_id == *stream_id
                            && &c.external_category_id == external_category_id
                    })
                })
                .map(|(id, _, _)| id)
                .collect()
        };
        for id in stale_channels {
            tx.execute("DELETE FROM channels WHERE id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn row_to_playlist(row: &rusqlite::Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        name: row.get(1)?,
        server: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        kind: PlaylistKind::from_db(&row.get::<_, String>(5)?),
        import_status: row.get(6)?,
    })
}

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        playlist_id: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        num: row.get(4)?,
        active: row.get(5)?,
    })
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        category_id: row.get(1)?,
        external_category_id: row.get(2)?,
        stream_id: row.get(3)?,
        num: row.get(4)?,
        name: row.get(5)?,
        stream_url: row.get(6)?,
        epg_channel_id: row.get(7)?,
        stream_icon: row.get(8)?,
        hdhr_channel_num: row.get(9)?,
        active: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_playlist(library: &Library) -> Playlist {
        library
            .create_playlist(&NewPlaylist {
                name: "provider".to_string(),
                server: "http://xtream.example.com".to_string(),
                username: "user".to_string(),
                password: "pass".to_string(),
                kind: PlaylistKind::Xtream,
            })
            .expect("create playlist")
    }

    fn sample_lineup() -> (Vec<xtream::XtreamCategory>, Vec<xtream::XtreamChannel>) {
        let categories = vec![
            xtream::XtreamCategory {
                external_id: "10".to_string(),
                name: "News".to_string(),
            },
            xtream::XtreamCategory {
                external_id: "20".to_string(),
                name: "Sports".to_string(),
            },
        ];
        let channels = vec![
            xtream::XtreamChannel {
                num: 1,
                name: "World News".to_string(),
                stream_id: 101,
                external_category_id: "10".to_string(),
                epg_channel_id: Some("world.news".to_string()),
                stream_icon: None,
                stream_url: None,
            },
            xtream::XtreamChannel {
                num: 2,
                name: "Sports One".to_string(),
                stream_id: 201,
                external_category_id: "20".to_string(),
                epg_channel_id: None,
                stream_icon: Some("http://icons/sports.png".to_string()),
                stream_url: None,
            },
        ];
        (categories, channels)
    }

    #[test]
    fn playlist_crud_roundtrip() {
        let library = Library::open_in_memory().expect("open");
        let playlist = sample_playlist(&library);

        assert_eq!(library.list_playlists().expect("list").len(), 1);
        assert_eq!(
            library
                .get_playlist(playlist.id)
                .expect("get")
                .expect("exists")
                .name,
            "provider"
        );

        let updated = library
            .update_playlist(
                playlist.id,
                &NewPlaylist {
                    name: "renamed".to_string(),
                    server: playlist.server.clone(),
                    username: playlist.username.clone(),
                    password: playlist.password.clone(),
                    kind: PlaylistKind::M3u,
                },
            )
            .expect("update");
        assert!(updated);

        assert!(library.delete_playlist(playlist.id).expect("delete"));
        assert!(library.get_playlist(playlist.id).expect("get").is_none());
    }

    #[test]
    fn import_builds_lineup_and_stream_urls() {
        let library = Library::open_in_memory().expect("open");
        let playlist = sample_playlist(&library);
        let (categories, channels) = sample_lineup();

        library
            .apply_import(&playlist, &categories, &channels)
            .expect("import");

        let stored_categories = library.list_categories(playlist.id).expect("categories");
        assert_eq!(stored_categories.len(), 2);
        assert_eq!(stored_categories[0].name, "News");

        let news = library
            .list_channels(stored_categories[0].id)
            .expect("channels");
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].hdhr_channel_num, 1000);
        assert_eq!(
            news[0].stream_url,
            "http://xtream.example.com/live/user/pass/101.m3u8"
        );
        assert_eq!(
            library
                .channel_stream_url(news[0].id)
                .expect("lookup")
                .as_deref(),
            Some("http://xtream.example.com/live/user/pass/101.m3u8")
        );
    }

    #[test]
    fn reimport_updates_in_place_and_sweeps_stale_rows() {
        let library = Library::open_in_memory().expect("open");
        let playlist = sample_playlist(&library);
        let (categories, channels) = sample_lineup();
        library
            .apply_import(&playlist, &categories, &channels)
            .expect("first import");

        let news_id = library.list_categories(playlist.id).expect("categories")[0].id;
        library
            .set_category_active(news_id, true)
            .expect("activate");

        // provider renamed News, dropped Sports entirely
        let next_categories = vec![xtream::XtreamCategory {
            external_id: "10".to_string(),
            name: "World News 24".to_string(),
        }];
        let next_channels = vec![xtream::XtreamChannel {
            num: 1,
            name: "World News".to_string(),
            stream_id: 101,
            external_category_id: "10".to_string(),
            epg_channel_id: None,
            stream_icon: None,
            stream_url: None,
        }];
        library
            .apply_import(&playlist, &next_categories, &next_channels)
            .expect("second import");

        let stored = library.list_categories(playlist.id).expect("categories");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, news_id, "row updated in place");
        assert_eq!(stored[0].name, "World News 24");
        assert!(stored[0].active, "active flag survives reimport");
    }

    #[test]
    fn m3u_import_keeps_channel_provided_urls() {
        let library = Library::open_in_memory().expect("open");
        let playlist = library
            .create_playlist(&NewPlaylist {
                name: "recordings".to_string(),
                server: "http://ignored.example.com".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
                kind: PlaylistKind::M3u,
            })
            .expect("create playlist");
        assert_eq!(playlist.kind, PlaylistKind::M3u);

        let categories = vec![xtream::XtreamCategory {
            external_id: "10".to_string(),
            name: "News".to_string(),
        }];
        let channels = vec![
            xtream::XtreamChannel {
                num: 1,
                name: "Direct".to_string(),
                stream_id: 101,
                external_category_id: "10".to_string(),
                epg_channel_id: None,
                stream_icon: None,
                stream_url: Some("http://cdn.example.com/direct/101.ts".to_string()),
            },
            // an m3u entry without a source has nothing the relay could pull
            xtream::XtreamChannel {
                num: 2,
                name: "Sourceless".to_string(),
                stream_id: 102,
                external_category_id: "10".to_string(),
                epg_channel_id: None,
                stream_icon: None,
                stream_url: None,
            },
        ];

        library
            .apply_import(&playlist, &categories, &channels)
            .expect("import");

        let category_id = library.list_categories(playlist.id).expect("categories")[0].id;
        let stored = library.list_channels(category_id).expect("channels");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].stream_url, "http://cdn.example.com/direct/101.ts");

        // a reload reads the stored type back, not the default
        let reloaded = library
            .get_playlist(playlist.id)
            .expect("get")
            .expect("exists");
        assert_eq!(reloaded.kind, PlaylistKind::M3u);
    }

    #[test]
    fn unknown_channel_has_no_stream_url() {
        let library = Library::open_in_memory().expect("open");
        assert!(library.channel_stream_url(999).expect("lookup").is_none());
    }
}
