//! Subsonic/Navidrome catalog client backed by `ureq`.

use std::time::Duration;

use serde_json::Value;

use crate::backends::{CatalogProvider, ProviderError, SubsonicCredentials};
use crate::library::ids::translate;
use crate::library::model::{Album, Artist, ArtistRef, Song};

const API_VERSION: &str = "1.16.1";
const CLIENT_ID: &str = "navitune";
const SALT_LENGTH: usize = 12;
const SALT_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a fresh `(token, salt)` authentication pair for one request.
///
/// `token = md5(password + salt)`; the salt is random per call, so tokens
/// are never reused across requests.
pub fn generate_auth_token(password: &str) -> (String, String) {
    let salt = make_salt();
    let token = format!("{:x}", md5::compute(format!("{password}{salt}")));
    (token, salt)
}

fn make_salt() -> String {
    let mut bytes = [0u8; SALT_LENGTH];
    let _ = getrandom::fill(&mut bytes);
    bytes
        .iter()
        .map(|value| SALT_CHARS[*value as usize % SALT_CHARS.len()] as char)
        .collect()
}

fn endpoint_base(server_url: &str) -> String {
    server_url.trim().trim_end_matches('/').to_string()
}

/// Subsonic client holding only the HTTP agent; authentication material is
/// passed per call and every request carries a freshly generated token.
pub struct SubsonicClient {
    http_client: ureq::Agent,
}

impl SubsonicClient {
    /// Creates a new Subsonic client.
    pub fn new() -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .build();
        Self { http_client }
    }

    fn auth_params(credentials: &SubsonicCredentials) -> Vec<(String, String)> {
        let (token, salt) = generate_auth_token(&credentials.password);
        vec![
            ("u".to_string(), credentials.username.clone()),
            ("t".to_string(), token),
            ("s".to_string(), salt),
            ("f".to_string(), "json".to_string()),
            ("v".to_string(), API_VERSION.to_string()),
            ("c".to_string(), CLIENT_ID.to_string()),
        ]
    }

    fn api_url(
        credentials: &SubsonicCredentials,
        method: &str,
        params: &[(String, String)],
    ) -> String {
        let mut query_parts: Vec<String> = Self::auth_params(credentials)
            .into_iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(&value)))
            .collect();
        query_parts.extend(
            params
                .iter()
                .map(|(key, value)| format!("{key}={}", urlencoding::encode(value))),
        );
        format!(
            "{}/rest/{}.view?{}",
            endpoint_base(&credentials.server_url),
            method,
            query_parts.join("&")
        )
    }

    fn request_json(
        &self,
        credentials: &SubsonicCredentials,
        method: &str,
        params: &[(String, String)],
    ) -> Result<Value, ProviderError> {
        let url = Self::api_url(credentials, method, params);
        let response = self.http_client.get(&url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => ProviderError::Api {
                code: Some(code as i64),
                message: format!("{method} returned HTTP {code}"),
            },
            other => ProviderError::Network(format!("{method}: {other}")),
        })?;
        let parsed: Value = response
            .into_json()
            .map_err(|err| ProviderError::Network(format!("{method}: response parse failed: {err}")))?;
        let envelope = parsed.get("subsonic-response").cloned().unwrap_or(Value::Null);
        let status = envelope
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if status != "ok" {
            let error = envelope.get("error");
            return Err(ProviderError::Api {
                code: error.and_then(|value| value.get("code")).and_then(Value::as_i64),
                message: error
                    .and_then(|value| value.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("server returned an error")
                    .to_string(),
            });
        }
        Ok(envelope)
    }

    fn array_or_single(value: Option<&Value>) -> Vec<&Value> {
        match value {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item @ Value::Object(_)) => vec![item],
            _ => Vec::new(),
        }
    }

    /// Builds a stream URL for a song, with its own fresh auth pair.
    pub fn stream_url(credentials: &SubsonicCredentials, song_id: &str) -> String {
        let query: Vec<String> = Self::auth_params(credentials)
            .into_iter()
            .chain([("id".to_string(), song_id.to_string())])
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(&value)))
            .collect();
        format!(
            "{}/rest/stream?{}",
            endpoint_base(&credentials.server_url),
            query.join("&")
        )
    }

    /// Builds a cover art URL for a song, album, or artist.
    pub fn cover_art_url(credentials: &SubsonicCredentials, cover_id: &str) -> String {
        let query: Vec<String> = Self::auth_params(credentials)
            .into_iter()
            .chain([("id".to_string(), cover_id.to_string())])
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(&value)))
            .collect();
        format!(
            "{}/rest/getCoverArt?{}",
            endpoint_base(&credentials.server_url),
            query.join("&")
        )
    }

    fn parse_artist(credentials: &SubsonicCredentials, artist: &Value) -> Option<Artist> {
        let provider_id = artist.get("id")?.as_str()?.to_string();
        let name = artist
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Artist")
            .to_string();
        let image_url = artist
            .get("coverArt")
            .and_then(Value::as_str)
            .map(|cover| Self::cover_art_url(credentials, cover));
        Some(Artist {
            id: translate(&provider_id),
            name,
            track_count: 0,
            image_url,
            subsonic_id: Some(provider_id),
        })
    }

    fn parse_album(credentials: &SubsonicCredentials, album: &Value) -> Option<Album> {
        let provider_id = album.get("id")?.as_str()?.to_string();
        // getArtist responses use "name" for albums, search/list responses
        // use "title"; accept either.
        let title = album
            .get("title")
            .or_else(|| album.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Album")
            .to_string();
        let artist_name = album
            .get("artist")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Artist")
            .to_string();
        let cover_art_url = album
            .get("coverArt")
            .and_then(Value::as_str)
            .map(|cover| Self::cover_art_url(credentials, cover));
        Some(Album {
            id: translate(&provider_id),
            title,
            artist_name,
            year: album.get("year").and_then(Value::as_i64).unwrap_or(0) as i32,
            cover_art_url,
            song_count: album.get("songCount").and_then(Value::as_u64).unwrap_or(0) as u32,
            subsonic_id: Some(provider_id),
        })
    }

    fn parse_song(credentials: &SubsonicCredentials, song: &Value) -> Option<Song> {
        let provider_id = song.get("id")?.as_str()?.to_string();
        let title = song
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Title")
            .to_string();
        let artist_name = song
            .get("artist")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Artist")
            .to_string();
        // Songs without an artist id keep a -1 sentinel; the integrity
        // filter drops them unless such an artist actually exists.
        let primary_artist_id = song
            .get("artistId")
            .and_then(Value::as_str)
            .map(translate)
            .unwrap_or(-1);
        let mut artists = vec![ArtistRef {
            id: primary_artist_id,
            name: artist_name.clone(),
            is_primary: true,
        }];
        // OpenSubsonic servers may list contributing artists as well.
        for entry in Self::array_or_single(song.get("artists")) {
            let Some(entry_id) = entry.get("id").and_then(Value::as_str) else {
                continue;
            };
            let entry_numeric_id = translate(entry_id);
            if entry_numeric_id == primary_artist_id {
                continue;
            }
            artists.push(ArtistRef {
                id: entry_numeric_id,
                name: entry
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown Artist")
                    .to_string(),
                is_primary: false,
            });
        }
        let duration_secs = song.get("duration").and_then(Value::as_i64).unwrap_or(0);
        let cover_art_url = song
            .get("coverArt")
            .and_then(Value::as_str)
            .map(|cover| Self::cover_art_url(credentials, cover));
        Some(Song {
            stream_url: Self::stream_url(credentials, &provider_id),
            title,
            artists,
            album_name: song
                .get("album")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Album")
                .to_string(),
            album_id: song
                .get("albumId")
                .and_then(Value::as_str)
                .map(translate)
                .unwrap_or(-1),
            cover_art_url,
            duration_ms: duration_secs * 1000,
            genre: song
                .get("genre")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            lyrics: None,
            is_favorite: song.get("starred").is_some(),
            track_number: song.get("track").and_then(Value::as_i64).unwrap_or(0) as i32,
            year: song.get("year").and_then(Value::as_i64).unwrap_or(0) as i32,
            mime_type: song
                .get("contentType")
                .and_then(Value::as_str)
                .unwrap_or("audio/mpeg")
                .to_string(),
            bitrate: song.get("bitRate").and_then(Value::as_i64).unwrap_or(0) as i32,
            sample_rate: 0,
            id: provider_id,
        })
    }
}

impl Default for SubsonicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogProvider for SubsonicClient {
    fn test_connection(&self, credentials: &SubsonicCredentials) -> Result<(), ProviderError> {
        let _ = self.request_json(credentials, "ping", &[])?;
        Ok(())
    }

    fn list_artists(&self, credentials: &SubsonicCredentials) -> Result<Vec<Artist>, ProviderError> {
        let envelope = self.request_json(credentials, "getArtists", &[])?;
        let mut artists = Vec::new();
        for index in Self::array_or_single(
            envelope
                .get("artists")
                .and_then(|value| value.get("index")),
        ) {
            for artist in Self::array_or_single(index.get("artist")) {
                if let Some(parsed) = Self::parse_artist(credentials, artist) {
                    artists.push(parsed);
                }
            }
        }
        Ok(artists)
    }

    fn artist_with_albums(
        &self,
        credentials: &SubsonicCredentials,
        artist_id: &str,
    ) -> Result<(Artist, Vec<Album>), ProviderError> {
        let envelope = self.request_json(
            credentials,
            "getArtist",
            &[("id".to_string(), artist_id.to_string())],
        )?;
        let artist_value = envelope.get("artist").ok_or_else(|| ProviderError::Api {
            code: None,
            message: format!("artist '{artist_id}' not found"),
        })?;
        let mut artist =
            Self::parse_artist(credentials, artist_value).ok_or_else(|| ProviderError::Api {
                code: None,
                message: format!("artist '{artist_id}' is missing an id"),
            })?;
        let albums: Vec<Album> = Self::array_or_single(artist_value.get("album"))
            .into_iter()
            .filter_map(|album| Self::parse_album(credentials, album))
            .collect();
        artist.track_count = albums.iter().map(|album| album.song_count).sum();
        Ok((artist, albums))
    }

    fn album_with_songs(
        &self,
        credentials: &SubsonicCredentials,
        album_id: &str,
    ) -> Result<(Album, Vec<Song>), ProviderError> {
        let envelope = self.request_json(
            credentials,
            "getAlbum",
            &[("id".to_string(), album_id.to_string())],
        )?;
        let album_value = envelope.get("album").ok_or_else(|| ProviderError::Api {
            code: None,
            message: format!("album '{album_id}' not found"),
        })?;
        let album =
            Self::parse_album(credentials, album_value).ok_or_else(|| ProviderError::Api {
                code: None,
                message: format!("album '{album_id}' is missing an id"),
            })?;
        let songs: Vec<Song> = Self::array_or_single(album_value.get("song"))
            .into_iter()
            .filter_map(|song| Self::parse_song(credentials, song))
            .collect();
        Ok((album, songs))
    }
}
