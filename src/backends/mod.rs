//! Catalog provider abstractions and concrete implementations.

pub mod subsonic;

use crate::library::model::{Album, Artist, Song};

/// Connection settings and credentials for a remote catalog server.
#[derive(Debug, Clone)]
pub struct SubsonicCredentials {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub enabled: bool,
}

impl SubsonicCredentials {
    /// True when the source is enabled and no credential field is blank.
    pub fn is_configured(&self) -> bool {
        self.enabled
            && !self.server_url.trim().is_empty()
            && !self.username.trim().is_empty()
            && !self.password.trim().is_empty()
    }
}

/// Failure reported by a catalog provider call.
///
/// `Network` is a transport-level failure (unreachable host, timeout,
/// malformed response body); `Api` means the server answered and reported
/// an error of its own, including not-found outcomes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("server error{}: {message}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Api { code: Option<i64>, message: String },
}

/// Interface implemented by concrete catalog providers.
///
/// The crawl issues these calls sequentially; implementations are expected
/// to carry fresh authentication per request.
pub trait CatalogProvider {
    /// Cheap connectivity and authentication check.
    fn test_connection(&self, credentials: &SubsonicCredentials) -> Result<(), ProviderError>;

    /// Fetches the full artist index.
    fn list_artists(&self, credentials: &SubsonicCredentials) -> Result<Vec<Artist>, ProviderError>;

    /// Fetches one artist's detail, including the albums it owns.
    fn artist_with_albums(
        &self,
        credentials: &SubsonicCredentials,
        artist_id: &str,
    ) -> Result<(Artist, Vec<Album>), ProviderError>;

    /// Fetches one album's detail, including its songs.
    fn album_with_songs(
        &self,
        credentials: &SubsonicCredentials,
        album_id: &str,
    ) -> Result<(Album, Vec<Song>), ProviderError>;
}
