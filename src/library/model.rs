//! Domain models produced by the catalog crawl.
//!
//! These are provider-agnostic: numeric ids are already translated from the
//! provider's string ids (see `library::ids`), with the original string id
//! preserved for round-tripping back to the server.

/// One artist as returned by the remote catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Artist {
    /// Local numeric id derived from the provider string id.
    pub id: i64,
    pub name: String,
    pub track_count: u32,
    pub image_url: Option<String>,
    /// Original provider string id, kept for provider lookups.
    pub subsonic_id: Option<String>,
}

/// One album as returned by the remote catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    /// Local numeric id derived from the provider string id.
    pub id: i64,
    pub title: String,
    /// Denormalized display name of the album artist.
    pub artist_name: String,
    pub year: i32,
    pub cover_art_url: Option<String>,
    pub song_count: u32,
    /// Original provider string id, kept for provider lookups.
    pub subsonic_id: Option<String>,
}

/// Reference from a song to one of its artists.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRef {
    pub id: i64,
    pub name: String,
    /// At most one reference per song should be primary, but the model does
    /// not enforce this; callers must tolerate zero or multiple flags.
    pub is_primary: bool,
}

/// One song as returned by the remote catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Provider-native string id; the relational join key is derived from
    /// this during integrity filtering.
    pub id: String,
    pub title: String,
    pub artists: Vec<ArtistRef>,
    pub album_name: String,
    /// Numeric id of the owning album, derived from the provider album id.
    pub album_id: i64,
    /// Playable locator: the server stream URL.
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

impl Song {
    /// The artist reference flagged primary, falling back to the first
    /// reference when no flag (or more than one) is present.
    pub fn primary_artist(&self) -> Option<&ArtistRef> {
        self.artists
            .iter()
            .find(|artist| artist.is_primary)
            .or_else(|| self.artists.first())
    }
}
