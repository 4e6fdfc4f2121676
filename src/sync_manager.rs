//! Catalog sync orchestrator.
//!
//! This manager is the bus-owned owner of the snapshot store. A sync run is
//! a single pass through the state machine checking config → testing
//! connection → fetching artists → fetching albums and songs → filtering →
//! committing, driven synchronously on the manager thread. Control messages
//! arriving mid-run are drained at crawl boundaries, which is where
//! cancellation takes effect and where duplicate start requests are
//! coalesced.

use std::panic::AssertUnwindSafe;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::backends::{CatalogProvider, ProviderError, SubsonicCredentials};
use crate::library::integrity::filter_catalog;
use crate::library::model::{Album, Artist, Song};
use crate::library::music_db::MusicDb;
use crate::protocol::{LibraryMessage, Message, SyncMessage, SyncPhase, SyncProgress, SyncSummary};
use crate::sync_crawler::ArtistCrawl;

const PROGRESS_EVERY_ARTISTS: usize = 5;

/// Fatal sync outcome; per-item fetch failures and integrity drops are
/// counters on [`SyncSummary`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("subsonic source is disabled or credentials are incomplete")]
    Configuration,
    #[error("could not reach server: {0}")]
    Connectivity(ProviderError),
    #[error("could not fetch artist index: {0}")]
    ArtistList(ProviderError),
    #[error("could not commit library snapshot: {0}")]
    Commit(#[from] rusqlite::Error),
    #[error("sync cancelled")]
    Cancelled,
}

pub struct SyncManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    provider: Box<dyn CatalogProvider + Send>,
    credentials: SubsonicCredentials,
    db: MusicDb,
}

impl SyncManager {
    /// Creates a manager bound to bus channels, owning the provider and the
    /// snapshot store.
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        provider: Box<dyn CatalogProvider + Send>,
        credentials: SubsonicCredentials,
        db: MusicDb,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            provider,
            credentials,
            db,
        }
    }

    /// Starts the blocking event loop for sync control messages.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Sync(SyncMessage::StartSync)) => self.handle_start_sync(),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SyncManager: lagged behind bus, skipped {skipped} messages");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Runs one sync to its terminal message. Panics inside the run are
    /// contained and reported as a failed sync rather than killing the
    /// manager thread.
    pub fn handle_start_sync(&mut self) {
        info!("SyncManager: starting catalog sync");
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.run_sync()));
        match outcome {
            Ok(Ok(summary)) => {
                info!(
                    "SyncManager: sync finished: {} songs, {} albums, {} artists ({} artists skipped, {} albums skipped, {} songs dropped, {} links dropped)",
                    summary.songs,
                    summary.albums,
                    summary.artists,
                    summary.skipped_artists,
                    summary.skipped_albums,
                    summary.dropped_songs,
                    summary.dropped_links
                );
                let _ = self
                    .bus_producer
                    .send(Message::Sync(SyncMessage::SyncCompleted(summary)));
            }
            Ok(Err(err)) => {
                error!("SyncManager: sync failed: {err}");
                let _ = self.bus_producer.send(Message::Sync(SyncMessage::SyncFailed {
                    reason: err.to_string(),
                }));
            }
            Err(payload) => {
                let reason = format!(
                    "internal error: {}",
                    crate::panic_payload_to_string(payload.as_ref())
                );
                error!("SyncManager: sync panicked: {reason}");
                let _ = self
                    .bus_producer
                    .send(Message::Sync(SyncMessage::SyncFailed { reason }));
            }
        }
        Self::discard_stale_control(&mut self.bus_consumer);
    }

    /// Drops control messages queued while the run was in flight. A start
    /// or cancel observed here belongs to the finished run, not a new one;
    /// fatal paths never reach a crawl-boundary drain, so this is the only
    /// drain those runs get.
    fn discard_stale_control(bus_consumer: &mut Receiver<Message>) {
        loop {
            match bus_consumer.try_recv() {
                Ok(Message::Sync(SyncMessage::StartSync)) => {
                    debug!("SyncManager: dropping start request received during the run");
                }
                Ok(Message::Sync(SyncMessage::CancelSync)) => {
                    debug!("SyncManager: dropping cancel request for a finished run");
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("SyncManager: lagged behind bus, skipped {skipped} messages");
                }
            }
        }
    }

    fn run_sync(&mut self) -> Result<SyncSummary, SyncError> {
        let Self {
            bus_consumer,
            bus_producer,
            provider,
            credentials,
            db,
        } = self;
        let provider: &(dyn CatalogProvider + Send) = &**provider;

        Self::emit_progress(bus_producer, SyncPhase::CheckingConfig, 0, 0, String::new());
        if !credentials.is_configured() {
            return Err(SyncError::Configuration);
        }

        Self::emit_progress(bus_producer, SyncPhase::TestingConnection, 0, 0, String::new());
        provider
            .test_connection(credentials)
            .map_err(SyncError::Connectivity)?;

        Self::emit_progress(bus_producer, SyncPhase::FetchingArtists, 0, 0, String::new());
        let indexed_artists = provider
            .list_artists(credentials)
            .map_err(SyncError::ArtistList)?;
        let total_artists = indexed_artists.len();
        info!("SyncManager: artist index has {total_artists} entries");

        let mut artists: Vec<Artist> = Vec::new();
        let mut albums: Vec<(Album, i64)> = Vec::new();
        let mut songs: Vec<Song> = Vec::new();
        let mut crawl = ArtistCrawl::new(provider, credentials, indexed_artists);
        let mut processed = 0usize;
        Self::emit_progress(
            bus_producer,
            SyncPhase::FetchingAlbumsAndSongs,
            0,
            total_artists,
            String::new(),
        );
        loop {
            Self::drain_control(bus_consumer)?;
            let Some(step) = crawl.next() else {
                break;
            };
            processed += 1;
            let artist_name = step.artist.name.clone();
            artists.push(step.artist);
            albums.extend(step.albums);
            songs.extend(step.songs);
            if processed % PROGRESS_EVERY_ARTISTS == 0 || processed == total_artists {
                Self::emit_progress(
                    bus_producer,
                    SyncPhase::FetchingAlbumsAndSongs,
                    processed,
                    total_artists,
                    artist_name,
                );
            }
        }
        let skipped_artists = crawl.skipped_artists();
        let skipped_albums = crawl.skipped_albums();

        Self::drain_control(bus_consumer)?;
        Self::emit_progress(
            bus_producer,
            SyncPhase::Filtering,
            total_artists,
            total_artists,
            String::new(),
        );
        let filtered = filter_catalog(songs, albums, artists);

        // The commit is uninterruptible: no cancellation poll past this
        // point, the transaction completes or rolls back as a unit.
        Self::emit_progress(
            bus_producer,
            SyncPhase::Committing,
            total_artists,
            total_artists,
            String::new(),
        );
        db.replace_all(&filtered)?;

        let summary = SyncSummary {
            songs: filtered.songs.len(),
            albums: filtered.albums.len(),
            artists: filtered.artists.len(),
            skipped_artists: skipped_artists as usize,
            skipped_albums: skipped_albums as usize,
            dropped_songs: filtered.dropped_songs as usize,
            dropped_links: filtered.dropped_links as usize,
        };
        let _ = bus_producer.send(Message::Library(LibraryMessage::SnapshotReplaced {
            songs: summary.songs,
            albums: summary.albums,
            artists: summary.artists,
        }));
        Ok(summary)
    }

    /// Drains queued control messages at a crawl boundary. A `CancelSync`
    /// aborts the run; a `StartSync` observed mid-run is coalesced into the
    /// run already in flight.
    fn drain_control(bus_consumer: &mut Receiver<Message>) -> Result<(), SyncError> {
        loop {
            match bus_consumer.try_recv() {
                Ok(Message::Sync(SyncMessage::CancelSync)) => {
                    info!("SyncManager: cancellation requested, stopping before commit");
                    return Err(SyncError::Cancelled);
                }
                Ok(Message::Sync(SyncMessage::StartSync)) => {
                    debug!("SyncManager: sync already running, ignoring start request");
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("SyncManager: lagged behind bus, skipped {skipped} messages");
                }
                Err(TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    fn emit_progress(
        bus_producer: &Sender<Message>,
        phase: SyncPhase,
        current: usize,
        total: usize,
        message: String,
    ) {
        debug!(
            "SyncManager: {} ({current}/{total})",
            phase.label()
        );
        let _ = bus_producer.send(Message::Sync(SyncMessage::SyncProgress(SyncProgress {
            phase,
            current,
            total,
            message,
        })));
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::{self, error::TryRecvError, Receiver, Sender};

    use super::{SyncError, SyncManager};
    use crate::library::ids::translate;
    use crate::library::music_db::MusicDb;
    use crate::protocol::{Message, SyncMessage, SyncPhase, SyncSummary};
    use crate::sync_crawler::tests::{artist, test_credentials, two_artist_provider, MockProvider};

    fn manager_with(
        provider: MockProvider,
        enabled: bool,
        password: &str,
    ) -> (SyncManager, Sender<Message>, Receiver<Message>) {
        let (bus, _) = broadcast::channel::<Message>(256);
        let observer = bus.subscribe();
        let mut credentials = test_credentials();
        credentials.enabled = enabled;
        credentials.password = password.to_string();
        let manager = SyncManager::new(
            bus.subscribe(),
            bus.clone(),
            Box::new(provider),
            credentials,
            MusicDb::open_in_memory().unwrap(),
        );
        (manager, bus, observer)
    }

    fn drain_sync_messages(observer: &mut Receiver<Message>) -> Vec<SyncMessage> {
        let mut messages = Vec::new();
        loop {
            match observer.try_recv() {
                Ok(Message::Sync(message)) => messages.push(message),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        messages
    }

    fn terminal_of(messages: &[SyncMessage]) -> &SyncMessage {
        messages
            .iter()
            .find(|message| {
                matches!(
                    message,
                    SyncMessage::SyncCompleted(_) | SyncMessage::SyncFailed { .. }
                )
            })
            .expect("sync should reach a terminal message")
    }

    fn completed_summary(messages: &[SyncMessage]) -> SyncSummary {
        match terminal_of(messages) {
            SyncMessage::SyncCompleted(summary) => summary.clone(),
            other => panic!("expected SyncCompleted, got {other:?}"),
        }
    }

    fn assert_no_queued_start(manager: &mut SyncManager) {
        loop {
            match manager.bus_consumer.try_recv() {
                Ok(Message::Sync(SyncMessage::StartSync)) => {
                    panic!("stale start request left queued for the event loop")
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    fn seven_artist_provider() -> MockProvider {
        let mut provider = MockProvider::default();
        for id in 1..=7 {
            let entry = artist(id, &format!("Artist {id}"));
            provider.artists.push(entry.clone());
            provider
                .artist_albums
                .insert(format!("ar-{id}"), (entry, Vec::new()));
        }
        provider
    }

    #[test]
    fn test_disabled_source_fails_without_network_calls() {
        let provider = two_artist_provider();
        let calls = provider.calls.clone();
        let (mut manager, _bus, mut observer) = manager_with(provider, false, "hunter2");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        assert!(matches!(terminal_of(&messages), SyncMessage::SyncFailed { .. }));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_blank_password_fails_without_network_calls() {
        let provider = two_artist_provider();
        let calls = provider.calls.clone();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "  ");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        assert!(matches!(terminal_of(&messages), SyncMessage::SyncFailed { .. }));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_connection_failure_aborts_before_crawl() {
        let mut provider = two_artist_provider();
        provider.fail_connection = true;
        let calls = provider.calls.clone();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        match terminal_of(&messages) {
            SyncMessage::SyncFailed { reason } => {
                assert!(reason.contains("could not reach server"), "{reason}");
            }
            other => panic!("expected SyncFailed, got {other:?}"),
        }
        assert_eq!(calls.lock().unwrap().clone(), vec!["ping"]);
    }

    #[test]
    fn test_artist_index_failure_is_fatal() {
        let mut provider = two_artist_provider();
        provider.fail_artist_list = true;
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        match terminal_of(&messages) {
            SyncMessage::SyncFailed { reason } => {
                assert!(reason.contains("artist index"), "{reason}");
            }
            other => panic!("expected SyncFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_provider_succeeds_with_zero_counts() {
        let provider = MockProvider::default();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let summary = completed_summary(&drain_sync_messages(&mut observer));
        assert_eq!(summary, SyncSummary::default());
        assert_eq!(manager.db.song_count().unwrap(), 0);
    }

    #[test]
    fn test_happy_path_commits_full_catalog() {
        let provider = two_artist_provider();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        let summary = completed_summary(&messages);
        assert_eq!(summary.songs, 3);
        assert_eq!(summary.albums, 2);
        assert_eq!(summary.artists, 2);
        assert_eq!(summary.skipped_artists, 0);
        assert_eq!(summary.dropped_songs, 0);

        assert_eq!(manager.db.song_count().unwrap(), 3);
        assert_eq!(manager.db.album_count().unwrap(), 2);
        assert_eq!(manager.db.artist_count().unwrap(), 2);
        assert!(messages
            .iter()
            .any(|message| matches!(message, SyncMessage::SyncProgress(_))));
    }

    #[test]
    fn test_snapshot_replaced_is_announced_after_commit() {
        let provider = two_artist_provider();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let mut announced = false;
        loop {
            match observer.try_recv() {
                Ok(Message::Library(crate::protocol::LibraryMessage::SnapshotReplaced {
                    songs,
                    ..
                })) => {
                    assert_eq!(songs, 3);
                    announced = true;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert!(announced);
    }

    #[test]
    fn test_partial_album_failure_still_succeeds() {
        let mut provider = two_artist_provider();
        provider.fail_albums.insert("al-11".to_string());
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let summary = completed_summary(&drain_sync_messages(&mut observer));
        assert_eq!(summary.songs, 2);
        assert_eq!(summary.albums, 2);
        assert_eq!(summary.skipped_albums, 1);
        assert_eq!(manager.db.songs_by_album(11).unwrap().len(), 0);
        assert_eq!(manager.db.songs_by_album(10).unwrap().len(), 2);
    }

    #[test]
    fn test_repeat_sync_reuses_numeric_identities() {
        let provider = two_artist_provider();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();
        drain_sync_messages(&mut observer);
        manager.handle_start_sync();

        let summary = completed_summary(&drain_sync_messages(&mut observer));
        assert_eq!(summary.songs, 3);
        assert_eq!(manager.db.song_count().unwrap(), 3);
        let stored = manager.db.song_by_id(translate("s-1")).unwrap().unwrap();
        assert_eq!(stored.subsonic_id, "s-1");
    }

    #[test]
    fn test_cancellation_before_commit_keeps_previous_snapshot() {
        let provider = two_artist_provider();
        let (mut manager, bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();
        drain_sync_messages(&mut observer);

        // Queued before the second run begins, so the first crawl-boundary
        // poll sees it.
        bus.send(Message::Sync(SyncMessage::CancelSync)).unwrap();
        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        match terminal_of(&messages) {
            SyncMessage::SyncFailed { reason } => {
                assert_eq!(reason, &SyncError::Cancelled.to_string());
            }
            other => panic!("expected SyncFailed, got {other:?}"),
        }
        assert_eq!(manager.db.song_count().unwrap(), 3);
    }

    #[test]
    fn test_start_sync_mid_run_is_coalesced_not_queued() {
        let provider = two_artist_provider();
        let calls = provider.calls.clone();
        let (mut manager, bus, mut observer) = manager_with(provider, true, "hunter2");

        // The extra trigger sits in the queue when the run's first
        // crawl-boundary poll drains it.
        bus.send(Message::Sync(SyncMessage::StartSync)).unwrap();
        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        let completions = messages
            .iter()
            .filter(|message| matches!(message, SyncMessage::SyncCompleted(_)))
            .count();
        assert_eq!(completions, 1);
        let ping_count = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == "ping")
            .count();
        assert_eq!(ping_count, 1);
    }

    #[test]
    fn test_start_request_queued_during_failed_run_is_discarded() {
        let provider = two_artist_provider();
        let calls = provider.calls.clone();
        // Disabled config fails before the crawl, so no crawl-boundary
        // poll ever sees the queued trigger.
        let (mut manager, bus, mut observer) = manager_with(provider, false, "hunter2");

        bus.send(Message::Sync(SyncMessage::StartSync)).unwrap();
        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        assert!(matches!(terminal_of(&messages), SyncMessage::SyncFailed { .. }));
        assert_no_queued_start(&mut manager);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panic_during_run_surfaces_as_failed_sync() {
        let mut provider = two_artist_provider();
        provider.panic_in_artist_list = true;
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        match terminal_of(&messages) {
            SyncMessage::SyncFailed { reason } => {
                assert!(reason.contains("internal error"), "{reason}");
                assert!(reason.contains("scripted provider panic"), "{reason}");
            }
            other => panic!("expected SyncFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_crawl_progress_ticks_every_five_artists() {
        let provider = seven_artist_provider();
        let (mut manager, _bus, mut observer) = manager_with(provider, true, "hunter2");

        manager.handle_start_sync();

        let messages = drain_sync_messages(&mut observer);
        let ticks: Vec<usize> = messages
            .iter()
            .filter_map(|message| match message {
                SyncMessage::SyncProgress(progress)
                    if progress.phase == SyncPhase::FetchingAlbumsAndSongs =>
                {
                    Some(progress.current)
                }
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![0, 5, 7]);
    }
}
