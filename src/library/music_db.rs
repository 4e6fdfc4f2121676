//! Relational snapshot store for the synced catalog.
//!
//! The schema carries no declarative foreign keys: referential integrity is
//! established by `library::integrity` before anything reaches
//! [`MusicDb::replace_all`], because invalid rows must be skipped
//! individually rather than abort the whole batch.

use rusqlite::{params, Connection, Row};

use crate::library::integrity::FilteredCatalog;

/// Stored artist row.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRecord {
    pub id: i64,
    pub name: String,
    pub track_count: u32,
    pub image_url: Option<String>,
    pub subsonic_id: Option<String>,
}

/// Stored album row, owned by exactly one artist.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumRecord {
    pub id: i64,
    pub title: String,
    pub artist_id: i64,
    pub artist_name: String,
    pub year: i32,
    pub cover_art_url: Option<String>,
    pub song_count: u32,
    pub subsonic_id: Option<String>,
}

/// Stored song row with denormalized display strings.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRecord {
    pub id: i64,
    /// The provider-native string id this row was derived from.
    pub subsonic_id: String,
    pub title: String,
    pub album_id: i64,
    pub album_name: String,
    pub artist_id: i64,
    pub artist_name: String,
    pub stream_url: String,
    pub cover_art_url: Option<String>,
    pub duration_ms: i64,
    pub genre: Option<String>,
    pub lyrics: Option<String>,
    pub is_favorite: bool,
    pub track_number: i32,
    pub year: i32,
    pub mime_type: String,
    pub bitrate: i32,
    pub sample_rate: i32,
}

/// Song-to-artist association row; `(song_id, artist_id)` is the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongArtistLink {
    pub song_id: i64,
    pub artist_id: i64,
    pub is_primary: bool,
}

pub struct MusicDb {
    conn: Connection,
}

impl MusicDb {
    pub fn new() -> Result<Self, rusqlite::Error> {
        let data_dir = dirs::data_dir()
            .expect("Could not find data directory")
            .join("navitune");

        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).expect("Could not create data directory");
        }

        let db_path = data_dir.join("library.db");
        let conn = Connection::open(db_path)?;

        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS artists (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                track_count INTEGER NOT NULL,
                image_url TEXT,
                subsonic_id TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS albums (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                artist_id INTEGER NOT NULL,
                artist_name TEXT NOT NULL,
                year INTEGER NOT NULL,
                cover_art_url TEXT,
                song_count INTEGER NOT NULL,
                subsonic_id TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY,
                subsonic_id TEXT NOT NULL,
                title TEXT NOT NULL,
                album_id INTEGER NOT NULL,
                album_name TEXT NOT NULL,
                artist_id INTEGER NOT NULL,
                artist_name TEXT NOT NULL,
                stream_url TEXT NOT NULL,
                cover_art_url TEXT,
                duration_ms INTEGER NOT NULL,
                genre TEXT,
                lyrics TEXT,
                is_favorite INTEGER NOT NULL,
                track_number INTEGER NOT NULL,
                year INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                bitrate INTEGER NOT NULL,
                sample_rate INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS song_artists (
                song_id INTEGER NOT NULL,
                artist_id INTEGER NOT NULL,
                is_primary INTEGER NOT NULL,
                PRIMARY KEY (song_id, artist_id)
            )",
            [],
        )?;
        Ok(())
    }

    /// Replaces the entire stored snapshot in one transaction.
    ///
    /// Readers observe either the previous complete snapshot or the new
    /// one; on any insert error the transaction rolls back and the previous
    /// snapshot survives untouched.
    pub fn replace_all(&mut self, catalog: &FilteredCatalog) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM song_artists", [])?;
        tx.execute("DELETE FROM songs", [])?;
        tx.execute("DELETE FROM albums", [])?;
        tx.execute("DELETE FROM artists", [])?;

        for artist in &catalog.artists {
            tx.execute(
                "INSERT INTO artists (id, name, track_count, image_url, subsonic_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    artist.id,
                    artist.name,
                    artist.track_count,
                    artist.image_url,
                    artist.subsonic_id
                ],
            )?;
        }

        for album in &catalog.albums {
            tx.execute(
                "INSERT INTO albums (id, title, artist_id, artist_name, year, cover_art_url, song_count, subsonic_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    album.id,
                    album.title,
                    album.artist_id,
                    album.artist_name,
                    album.year,
                    album.cover_art_url,
                    album.song_count,
                    album.subsonic_id
                ],
            )?;
        }

        for song in &catalog.songs {
            tx.execute(
                "INSERT INTO songs (id, subsonic_id, title, album_id, album_name, artist_id, artist_name,
                                    stream_url, cover_art_url, duration_ms, genre, lyrics, is_favorite,
                                    track_number, year, mime_type, bitrate, sample_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    song.id,
                    song.subsonic_id,
                    song.title,
                    song.album_id,
                    song.album_name,
                    song.artist_id,
                    song.artist_name,
                    song.stream_url,
                    song.cover_art_url,
                    song.duration_ms,
                    song.genre,
                    song.lyrics,
                    song.is_favorite,
                    song.track_number,
                    song.year,
                    song.mime_type,
                    song.bitrate,
                    song.sample_rate
                ],
            )?;
        }

        for link in &catalog.links {
            tx.execute(
                "INSERT INTO song_artists (song_id, artist_id, is_primary) VALUES (?1, ?2, ?3)",
                params![link.song_id, link.artist_id, link.is_primary],
            )?;
        }

        tx.commit()
    }

    fn song_from_row(row: &Row) -> Result<SongRecord, rusqlite::Error> {
        Ok(SongRecord {
            id: row.get(0)?,
            subsonic_id: row.get(1)?,
            title: row.get(2)?,
            album_id: row.get(3)?,
            album_name: row.get(4)?,
            artist_id: row.get(5)?,
            artist_name: row.get(6)?,
            stream_url: row.get(7)?,
            cover_art_url: row.get(8)?,
            duration_ms: row.get(9)?,
            genre: row.get(10)?,
            lyrics: row.get(11)?,
            is_favorite: row.get(12)?,
            track_number: row.get(13)?,
            year: row.get(14)?,
            mime_type: row.get(15)?,
            bitrate: row.get(16)?,
            sample_rate: row.get(17)?,
        })
    }

    const SONG_COLUMNS: &'static str = "id, subsonic_id, title, album_id, album_name, artist_id, artist_name, \
         stream_url, cover_art_url, duration_ms, genre, lyrics, is_favorite, \
         track_number, year, mime_type, bitrate, sample_rate";

    pub fn song_by_id(&self, id: i64) -> Result<Option<SongRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM songs WHERE id = ?1",
            Self::SONG_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], Self::song_from_row)?;
        rows.next().transpose()
    }

    pub fn album_by_id(&self, id: i64) -> Result<Option<AlbumRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, artist_id, artist_name, year, cover_art_url, song_count, subsonic_id
             FROM albums WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(AlbumRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                artist_id: row.get(2)?,
                artist_name: row.get(3)?,
                year: row.get(4)?,
                cover_art_url: row.get(5)?,
                song_count: row.get(6)?,
                subsonic_id: row.get(7)?,
            })
        })?;
        rows.next().transpose()
    }

    pub fn artist_by_id(&self, id: i64) -> Result<Option<ArtistRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, track_count, image_url, subsonic_id FROM artists WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(ArtistRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                track_count: row.get(2)?,
                image_url: row.get(3)?,
                subsonic_id: row.get(4)?,
            })
        })?;
        rows.next().transpose()
    }

    /// Stable page of songs ordered by title then id.
    pub fn songs_page(&self, offset: u32, limit: u32) -> Result<Vec<SongRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM songs ORDER BY title ASC, id ASC LIMIT ?1 OFFSET ?2",
            Self::SONG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit, offset], Self::song_from_row)?;
        let mut songs = Vec::new();
        for song in rows {
            songs.push(song?);
        }
        Ok(songs)
    }

    /// Case-insensitive substring search over song title, artist and album
    /// display names.
    pub fn search_songs(&self, query: &str) -> Result<Vec<SongRecord>, rusqlite::Error> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM songs
             WHERE title LIKE ?1 ESCAPE '\\'
                OR artist_name LIKE ?1 ESCAPE '\\'
                OR album_name LIKE ?1 ESCAPE '\\'
             ORDER BY title ASC, id ASC",
            Self::SONG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![pattern], Self::song_from_row)?;
        let mut songs = Vec::new();
        for song in rows {
            songs.push(song?);
        }
        Ok(songs)
    }

    pub fn songs_by_album(&self, album_id: i64) -> Result<Vec<SongRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM songs WHERE album_id = ?1 ORDER BY track_number ASC, id ASC",
            Self::SONG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![album_id], Self::song_from_row)?;
        let mut songs = Vec::new();
        for song in rows {
            songs.push(song?);
        }
        Ok(songs)
    }

    pub fn song_count(&self) -> Result<u32, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))
    }

    pub fn album_count(&self) -> Result<u32, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM albums", [], |row| row.get(0))
    }

    pub fn artist_count(&self) -> Result<u32, rusqlite::Error> {
        self.conn
            .query_row("SELECT COUNT(*) FROM artists", [], |row| row.get(0))
    }
}
