//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the message payloads exchanged between the sync
//! engine, the library store consumers, and the host application shell.

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Sync(SyncMessage),
    Library(LibraryMessage),
}

/// Sync-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// Start a full catalog sync. Ignored (coalesced) while a run is active.
    StartSync,
    /// Request cooperative cancellation of the active run. Honored between
    /// crawl steps; has no effect once the commit transaction has begun.
    CancelSync,
    /// Advisory progress update. Consumers may drop these freely.
    SyncProgress(SyncProgress),
    /// Terminal notification: the run committed a new snapshot.
    SyncCompleted(SyncSummary),
    /// Terminal notification: the run failed and the previous snapshot is
    /// still in place.
    SyncFailed { reason: String },
}

/// Library-domain notifications for snapshot readers.
#[derive(Debug, Clone)]
pub enum LibraryMessage {
    /// The snapshot store now holds a freshly committed catalog.
    SnapshotReplaced {
        songs: usize,
        albums: usize,
        artists: usize,
    },
}

/// Coarse sync phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    CheckingConfig,
    TestingConnection,
    FetchingArtists,
    FetchingAlbumsAndSongs,
    Filtering,
    Committing,
}

impl SyncPhase {
    /// Short human-readable label used in progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            SyncPhase::CheckingConfig => "Checking configuration",
            SyncPhase::TestingConnection => "Connecting to server",
            SyncPhase::FetchingArtists => "Fetching artists",
            SyncPhase::FetchingAlbumsAndSongs => "Fetching albums and songs",
            SyncPhase::Filtering => "Validating catalog",
            SyncPhase::Committing => "Saving library",
        }
    }
}

/// One advisory progress tick emitted by the sync engine.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    /// Items processed so far within the phase. Zero when not applicable.
    pub current: usize,
    /// Total items in the phase, when known. Zero when not applicable.
    pub total: usize,
    /// Display text for notification surfaces.
    pub message: String,
}

/// Counters reported by a successful sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Entities committed to the snapshot store.
    pub songs: usize,
    pub albums: usize,
    pub artists: usize,
    /// Artists whose detail fetch failed and were skipped during the crawl.
    pub skipped_artists: usize,
    /// Albums whose detail fetch failed and were skipped during the crawl.
    pub skipped_albums: usize,
    /// Songs dropped by the integrity filter.
    pub dropped_songs: usize,
    /// Song-artist links dropped by the integrity filter.
    pub dropped_links: usize,
}
