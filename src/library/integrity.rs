//! Referential-integrity filtering of a crawled catalog before commit.
//!
//! The snapshot store declares no foreign keys, so every guarantee readers
//! rely on is established here: songs whose album or primary artist is
//! unknown are dropped one by one, never the whole batch.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::library::ids::translate;
use crate::library::model::{Album, Artist, Song};
use crate::library::music_db::{AlbumRecord, ArtistRecord, SongArtistLink, SongRecord};

/// Mutually consistent entity set ready for [`crate::library::music_db::MusicDb::replace_all`].
///
/// Guarantees: every album's `artist_id` is in the artist set, every song's
/// `album_id` is in the album set and its `artist_id` in the artist set,
/// every link's `artist_id` is in the artist set, song ids and
/// `(song_id, artist_id)` link pairs are unique.
#[derive(Debug, Clone, Default)]
pub struct FilteredCatalog {
    pub artists: Vec<ArtistRecord>,
    pub albums: Vec<AlbumRecord>,
    pub songs: Vec<SongRecord>,
    pub links: Vec<SongArtistLink>,
    pub dropped_songs: u32,
    pub dropped_links: u32,
}

/// Filters the crawled catalog down to a referentially consistent set.
///
/// Albums arrive paired with the numeric id of their owning artist, as
/// assigned during the crawl; albums and artists are assumed valid. Songs
/// are checked individually: an unknown album id or primary artist id drops
/// the song, an unknown secondary artist id drops only that link. Songs
/// sharing a numeric id collapse last-write-wins.
pub fn filter_catalog(
    songs: Vec<Song>,
    albums: Vec<(Album, i64)>,
    artists: Vec<Artist>,
) -> FilteredCatalog {
    // Duplicate ids (an id collision, or a doubled index entry) would trip
    // the primary key and fail the whole commit, so artists and albums get
    // the same last-write-wins dedup as songs.
    let mut artist_records: Vec<ArtistRecord> = Vec::new();
    let mut artist_slots: HashMap<i64, usize> = HashMap::new();
    for artist in artists {
        let record = ArtistRecord {
            id: artist.id,
            name: artist.name,
            track_count: artist.track_count,
            image_url: artist.image_url,
            subsonic_id: artist.subsonic_id,
        };
        match artist_slots.get(&record.id) {
            Some(&slot) => {
                warn!(
                    "IntegrityFilter: duplicate artist id {}, keeping later entry '{}'",
                    record.id, record.name
                );
                artist_records[slot] = record;
            }
            None => {
                artist_slots.insert(record.id, artist_records.len());
                artist_records.push(record);
            }
        }
    }
    let mut album_records: Vec<AlbumRecord> = Vec::new();
    let mut album_slots: HashMap<i64, usize> = HashMap::new();
    for (album, artist_id) in albums {
        let record = AlbumRecord {
            id: album.id,
            title: album.title,
            artist_id,
            artist_name: album.artist_name,
            year: album.year,
            cover_art_url: album.cover_art_url,
            song_count: album.song_count,
            subsonic_id: album.subsonic_id,
        };
        match album_slots.get(&record.id) {
            Some(&slot) => {
                warn!(
                    "IntegrityFilter: duplicate album id {}, keeping later entry '{}'",
                    record.id, record.title
                );
                album_records[slot] = record;
            }
            None => {
                album_slots.insert(record.id, album_records.len());
                album_records.push(record);
            }
        }
    }

    let artist_ids: HashSet<i64> = artist_records.iter().map(|artist| artist.id).collect();
    let album_ids: HashSet<i64> = album_records.iter().map(|album| album.id).collect();

    let mut song_records: Vec<SongRecord> = Vec::new();
    let mut song_slots: HashMap<i64, usize> = HashMap::new();
    let mut song_artists: HashMap<i64, Vec<(i64, bool)>> = HashMap::new();
    let mut dropped_songs = 0u32;
    let mut dropped_links = 0u32;

    for song in songs {
        if !album_ids.contains(&song.album_id) {
            warn!(
                "IntegrityFilter: dropping song '{}' ({}): unknown album id {}",
                song.title, song.id, song.album_id
            );
            dropped_songs += 1;
            continue;
        }
        let Some(primary) = song.primary_artist().cloned() else {
            warn!(
                "IntegrityFilter: dropping song '{}' ({}): no artist reference",
                song.title, song.id
            );
            dropped_songs += 1;
            continue;
        };
        if !artist_ids.contains(&primary.id) {
            warn!(
                "IntegrityFilter: dropping song '{}' ({}): unknown artist id {}",
                song.title, song.id, primary.id
            );
            dropped_songs += 1;
            continue;
        }

        let song_id = translate(&song.id);
        let mut links: Vec<(i64, bool)> = Vec::new();
        let mut linked: HashSet<i64> = HashSet::new();
        for artist_ref in &song.artists {
            if !artist_ids.contains(&artist_ref.id) {
                warn!(
                    "IntegrityFilter: dropping link from song '{}' ({}) to unknown artist id {}",
                    song.title, song.id, artist_ref.id
                );
                dropped_links += 1;
                continue;
            }
            if linked.insert(artist_ref.id) {
                links.push((artist_ref.id, artist_ref.is_primary));
            }
        }

        let record = SongRecord {
            id: song_id,
            subsonic_id: song.id,
            title: song.title,
            album_id: song.album_id,
            album_name: song.album_name,
            artist_id: primary.id,
            artist_name: primary.name,
            stream_url: song.stream_url,
            cover_art_url: song.cover_art_url,
            duration_ms: song.duration_ms,
            genre: song.genre,
            lyrics: song.lyrics,
            is_favorite: song.is_favorite,
            track_number: song.track_number,
            year: song.year,
            mime_type: song.mime_type,
            bitrate: song.bitrate,
            sample_rate: song.sample_rate,
        };
        match song_slots.get(&song_id) {
            Some(&slot) => {
                // Duplicate numeric id: the later crawl result wins.
                song_records[slot] = record;
                song_artists.insert(song_id, links);
            }
            None => {
                song_slots.insert(song_id, song_records.len());
                song_records.push(record);
                song_artists.insert(song_id, links);
            }
        }
    }

    let links: Vec<SongArtistLink> = song_records
        .iter()
        .flat_map(|song| {
            song_artists
                .get(&song.id)
                .into_iter()
                .flatten()
                .map(|&(artist_id, is_primary)| SongArtistLink {
                    song_id: song.id,
                    artist_id,
                    is_primary,
                })
        })
        .collect();

    FilteredCatalog {
        artists: artist_records,
        albums: album_records,
        songs: song_records,
        links,
        dropped_songs,
        dropped_links,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::filter_catalog;
    use crate::library::ids::translate;
    use crate::library::model::{Album, Artist, ArtistRef, Song};

    fn artist(id: i64, name: &str) -> Artist {
        Artist {
            id,
            name: name.to_string(),
            track_count: 0,
            image_url: None,
            subsonic_id: Some(format!("ar-{id}")),
        }
    }

    fn album(id: i64, title: &str) -> Album {
        Album {
            id,
            title: title.to_string(),
            artist_name: "Artist".to_string(),
            year: 2020,
            cover_art_url: None,
            song_count: 1,
            subsonic_id: Some(format!("al-{id}")),
        }
    }

    fn song(id: &str, album_id: i64, artists: Vec<ArtistRef>) -> Song {
        Song {
            id: id.to_string(),
            title: format!("Song {id}"),
            artists,
            album_name: "Album".to_string(),
            album_id,
            stream_url: format!("https://example.com/rest/stream?id={id}"),
            cover_art_url: None,
            duration_ms: 1000,
            genre: None,
            lyrics: None,
            is_favorite: false,
            track_number: 1,
            year: 2020,
            mime_type: "audio/mpeg".to_string(),
            bitrate: 320,
            sample_rate: 0,
        }
    }

    fn primary(id: i64) -> ArtistRef {
        ArtistRef {
            id,
            name: format!("Artist {id}"),
            is_primary: true,
        }
    }

    fn secondary(id: i64) -> ArtistRef {
        ArtistRef {
            id,
            name: format!("Artist {id}"),
            is_primary: false,
        }
    }

    #[test]
    fn test_consistent_catalog_passes_through() {
        let filtered = filter_catalog(
            vec![song("1", 10, vec![primary(1), secondary(2)])],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A"), artist(2, "B")],
        );
        assert_eq!(filtered.songs.len(), 1);
        assert_eq!(filtered.links.len(), 2);
        assert_eq!(filtered.dropped_songs, 0);
        assert_eq!(filtered.dropped_links, 0);
    }

    #[test]
    fn test_song_with_unknown_album_is_dropped() {
        let filtered = filter_catalog(
            vec![
                song("1", 999, vec![primary(1)]),
                song("2", 10, vec![primary(1)]),
            ],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A")],
        );
        assert_eq!(filtered.songs.len(), 1);
        assert_eq!(filtered.songs[0].subsonic_id, "2");
        assert_eq!(filtered.dropped_songs, 1);
        // Album and artist counts are unaffected by song drops.
        assert_eq!(filtered.albums.len(), 1);
        assert_eq!(filtered.artists.len(), 1);
    }

    #[test]
    fn test_song_with_unknown_primary_artist_is_dropped() {
        let filtered = filter_catalog(
            vec![song("1", 10, vec![primary(999)])],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A")],
        );
        assert!(filtered.songs.is_empty());
        assert_eq!(filtered.dropped_songs, 1);
    }

    #[test]
    fn test_song_without_artists_is_dropped() {
        let filtered = filter_catalog(
            vec![song("1", 10, Vec::new())],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A")],
        );
        assert!(filtered.songs.is_empty());
        assert_eq!(filtered.dropped_songs, 1);
    }

    #[test]
    fn test_unknown_secondary_artist_drops_only_the_link() {
        let filtered = filter_catalog(
            vec![song("1", 10, vec![primary(1), secondary(999)])],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A")],
        );
        assert_eq!(filtered.songs.len(), 1);
        assert_eq!(filtered.links.len(), 1);
        assert_eq!(filtered.links[0].artist_id, 1);
        assert_eq!(filtered.dropped_links, 1);
        assert_eq!(filtered.dropped_songs, 0);
    }

    #[test]
    fn test_duplicate_song_ids_collapse_last_write_wins() {
        let mut first = song("dup", 10, vec![primary(1)]);
        first.title = "First".to_string();
        let mut second = song("dup", 10, vec![primary(2)]);
        second.title = "Second".to_string();
        let filtered = filter_catalog(
            vec![first, second],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A"), artist(2, "B")],
        );
        assert_eq!(filtered.songs.len(), 1);
        assert_eq!(filtered.songs[0].title, "Second");
        assert_eq!(filtered.songs[0].artist_id, 2);
        assert_eq!(filtered.links.len(), 1);
        assert_eq!(filtered.links[0].artist_id, 2);
    }

    #[test]
    fn test_duplicate_artist_refs_dedup_link_pairs() {
        let filtered = filter_catalog(
            vec![song("1", 10, vec![primary(1), secondary(1)])],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A")],
        );
        assert_eq!(filtered.links.len(), 1);
        assert!(filtered.links[0].is_primary);
    }

    #[test]
    fn test_duplicate_artist_ids_collapse_last_write_wins() {
        let mut renamed = artist(1, "New Name");
        renamed.track_count = 7;
        let filtered = filter_catalog(
            vec![song("1", 10, vec![primary(1)])],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "Old Name"), renamed],
        );
        assert_eq!(filtered.artists.len(), 1);
        assert_eq!(filtered.artists[0].name, "New Name");
        assert_eq!(filtered.artists[0].track_count, 7);
        // The song still resolves against the surviving artist row.
        assert_eq!(filtered.songs.len(), 1);
        assert_eq!(filtered.links.len(), 1);
    }

    #[test]
    fn test_duplicate_album_ids_collapse_last_write_wins() {
        let filtered = filter_catalog(
            vec![song("1", 10, vec![primary(2)])],
            vec![(album(10, "First Title"), 1), (album(10, "Second Title"), 2)],
            vec![artist(1, "A"), artist(2, "B")],
        );
        assert_eq!(filtered.albums.len(), 1);
        assert_eq!(filtered.albums[0].title, "Second Title");
        assert_eq!(filtered.albums[0].artist_id, 2);
        assert_eq!(filtered.songs.len(), 1);
    }

    #[test]
    fn test_output_is_referentially_consistent() {
        let filtered = filter_catalog(
            vec![
                song("1", 10, vec![primary(1), secondary(2), secondary(999)]),
                song("2", 11, vec![primary(2)]),
                song("3", 999, vec![primary(1)]),
            ],
            vec![(album(10, "Album A"), 1), (album(11, "Album B"), 2)],
            vec![artist(1, "A"), artist(2, "B")],
        );
        let artist_ids: HashSet<i64> = filtered.artists.iter().map(|a| a.id).collect();
        let album_ids: HashSet<i64> = filtered.albums.iter().map(|a| a.id).collect();
        for album in &filtered.albums {
            assert!(artist_ids.contains(&album.artist_id));
        }
        for song in &filtered.songs {
            assert!(album_ids.contains(&song.album_id));
            assert!(artist_ids.contains(&song.artist_id));
        }
        for link in &filtered.links {
            assert!(artist_ids.contains(&link.artist_id));
        }
    }

    #[test]
    fn test_song_record_keys_derive_from_provider_ids() {
        let filtered = filter_catalog(
            vec![song("song-abc", 10, vec![primary(1)])],
            vec![(album(10, "Album"), 1)],
            vec![artist(1, "A")],
        );
        assert_eq!(filtered.songs[0].id, translate("song-abc"));
        assert_eq!(filtered.songs[0].subsonic_id, "song-abc");
    }
}
