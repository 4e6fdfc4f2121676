//! Lazy artist-by-artist crawl of the remote catalog hierarchy.
//!
//! Each iterator step fetches one artist's detail plus the detail of every
//! album not yet seen this run, so the orchestrator can report progress and
//! honor cancellation between steps without buffering the whole catalog
//! fetch plan up front.

use std::collections::HashSet;

use log::warn;

use crate::backends::{CatalogProvider, SubsonicCredentials};
use crate::library::model::{Album, Artist, Song};

/// One artist's worth of crawl results.
pub struct CrawlStep {
    /// The artist, refreshed from its detail fetch when that succeeded.
    pub artist: Artist,
    /// Albums first seen under this artist, paired with its numeric id.
    pub albums: Vec<(Album, i64)>,
    pub songs: Vec<Song>,
}

pub struct ArtistCrawl<'a, P: CatalogProvider + ?Sized> {
    provider: &'a P,
    credentials: &'a SubsonicCredentials,
    artists: std::vec::IntoIter<Artist>,
    /// Numeric album ids already claimed by an earlier artist this run.
    seen_albums: HashSet<i64>,
    skipped_artists: u32,
    skipped_albums: u32,
}

impl<'a, P: CatalogProvider + ?Sized> ArtistCrawl<'a, P> {
    pub fn new(provider: &'a P, credentials: &'a SubsonicCredentials, artists: Vec<Artist>) -> Self {
        Self {
            provider,
            credentials,
            artists: artists.into_iter(),
            seen_albums: HashSet::new(),
            skipped_artists: 0,
            skipped_albums: 0,
        }
    }

    /// Artists whose detail fetch failed; their index entry is still kept.
    pub fn skipped_artists(&self) -> u32 {
        self.skipped_artists
    }

    /// Albums whose song fetch failed; the album row itself is still kept.
    pub fn skipped_albums(&self) -> u32 {
        self.skipped_albums
    }

    fn provider_key(artist: &Artist) -> String {
        match &artist.subsonic_id {
            Some(id) => id.clone(),
            None => artist.id.to_string(),
        }
    }
}

impl<P: CatalogProvider + ?Sized> Iterator for ArtistCrawl<'_, P> {
    type Item = CrawlStep;

    fn next(&mut self) -> Option<CrawlStep> {
        let indexed = self.artists.next()?;
        let key = Self::provider_key(&indexed);

        let (artist, albums) = match self.provider.artist_with_albums(self.credentials, &key) {
            Ok(detail) => detail,
            Err(err) => {
                warn!(
                    "ArtistCrawl: skipping artist '{}' ({key}): {err}",
                    indexed.name
                );
                self.skipped_artists += 1;
                return Some(CrawlStep {
                    artist: indexed,
                    albums: Vec::new(),
                    songs: Vec::new(),
                });
            }
        };

        let mut step_albums: Vec<(Album, i64)> = Vec::new();
        let mut step_songs: Vec<Song> = Vec::new();
        for album in albums {
            // An album shared between artists belongs to whichever artist
            // surfaced it first.
            if !self.seen_albums.insert(album.id) {
                continue;
            }
            let album_key = match &album.subsonic_id {
                Some(id) => id.clone(),
                None => album.id.to_string(),
            };
            match self.provider.album_with_songs(self.credentials, &album_key) {
                Ok((_, songs)) => step_songs.extend(songs),
                Err(err) => {
                    warn!(
                        "ArtistCrawl: no songs for album '{}' ({album_key}): {err}",
                        album.title
                    );
                    self.skipped_albums += 1;
                }
            }
            step_albums.push((album, artist.id));
        }

        Some(CrawlStep {
            artist,
            albums: step_albums,
            songs: step_songs,
        })
    }
}
