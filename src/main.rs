mod backends;
mod config;
mod integration_keyring;
mod library;
mod protocol;
mod sync_crawler;
mod sync_manager;

use std::thread;

use log::{error, info, warn};
use tokio::sync::broadcast;

use crate::backends::subsonic::SubsonicClient;
use crate::backends::SubsonicCredentials;
use crate::config::Config;
use crate::library::music_db::MusicDb;
use crate::protocol::{Message, SyncMessage};
use crate::sync_manager::SyncManager;

pub(crate) fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    let config_root = dirs::config_dir()
        .ok_or("could not determine config directory")?
        .join("navitune");
    let config_file = config_root.join("config.toml");

    std::fs::create_dir_all(&config_root).map_err(|err| {
        format!(
            "failed to create config directory {}: {}",
            config_root.display(),
            err
        )
    })?;

    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        std::fs::write(&config_file, toml::to_string(&default_config)?)?;
    }

    let config_content = std::fs::read_to_string(&config_file)?;
    Ok(toml::from_str::<Config>(&config_content).unwrap_or_default())
}

/// Reads a password from stdin and stores it in the OS keyring for the
/// username configured in `config.toml`.
fn store_password(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let server_url = config.subsonic.server_url.trim();
    let username = config.subsonic.username.trim();
    if server_url.is_empty() || username.is_empty() {
        return Err(
            "set [subsonic] server_url and username in config.toml before storing a password"
                .into(),
        );
    }
    eprintln!("Enter password for '{username}' at {server_url}:");
    let mut password = String::new();
    std::io::stdin().read_line(&mut password)?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err("empty password not stored".into());
    }
    integration_keyring::set_subsonic_password(server_url, username, password)?;
    info!("Stored Subsonic password for '{username}' at {server_url}");
    Ok(())
}

fn run_sync() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let password = if config.subsonic.username.trim().is_empty()
        || config.subsonic.server_url.trim().is_empty()
    {
        String::new()
    } else {
        integration_keyring::get_subsonic_password(
            &config.subsonic.server_url,
            &config.subsonic.username,
        )?
        .unwrap_or_default()
    };
    let credentials = SubsonicCredentials {
        server_url: config.subsonic.server_url.clone(),
        username: config.subsonic.username.clone(),
        password,
        enabled: config.subsonic.enabled,
    };

    let db = MusicDb::new()?;
    let (bus_sender, _) = broadcast::channel::<Message>(1024);

    let sync_bus_receiver = bus_sender.subscribe();
    let sync_bus_sender = bus_sender.clone();
    let mut observer = bus_sender.subscribe();
    thread::spawn(move || {
        let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut sync_manager = SyncManager::new(
                sync_bus_receiver,
                sync_bus_sender,
                Box::new(SubsonicClient::new()),
                credentials,
                db,
            );
            sync_manager.run();
        }));
        if let Err(payload) = run_result {
            error!(
                "SyncManager thread terminated due to panic: {}",
                panic_payload_to_string(payload.as_ref())
            );
        }
    });

    bus_sender.send(Message::Sync(SyncMessage::StartSync))?;

    loop {
        match observer.blocking_recv() {
            Ok(Message::Sync(SyncMessage::SyncProgress(progress))) => {
                if progress.total > 0 {
                    info!(
                        "{} ({}/{})",
                        progress.phase.label(),
                        progress.current,
                        progress.total
                    );
                } else {
                    info!("{}", progress.phase.label());
                }
            }
            Ok(Message::Sync(SyncMessage::SyncCompleted(summary))) => {
                info!(
                    "Sync complete: {} songs, {} albums, {} artists",
                    summary.songs, summary.albums, summary.artists
                );
                if summary.skipped_artists > 0 || summary.skipped_albums > 0 {
                    warn!(
                        "Skipped during crawl: {} artists, {} albums",
                        summary.skipped_artists, summary.skipped_albums
                    );
                }
                if summary.dropped_songs > 0 || summary.dropped_links > 0 {
                    warn!(
                        "Dropped by integrity checks: {} songs, {} artist links",
                        summary.dropped_songs, summary.dropped_links
                    );
                }
                return Ok(());
            }
            Ok(Message::Sync(SyncMessage::SyncFailed { reason })) => {
                return Err(reason.into());
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Observer lagged behind bus, skipped {skipped} messages");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err("event bus closed before sync finished".into());
            }
        }
    }
}

fn print_song(song: &library::music_db::SongRecord) {
    println!(
        "{}  {} — {} [{}]  {}s",
        song.id,
        song.artist_name,
        song.title,
        song.album_name,
        song.duration_ms / 1000
    );
}

fn print_stats() -> Result<(), Box<dyn std::error::Error>> {
    let db = MusicDb::new()?;
    println!(
        "{} songs, {} albums, {} artists",
        db.song_count()?,
        db.album_count()?,
        db.artist_count()?
    );
    Ok(())
}

fn search(query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = MusicDb::new()?;
    let hits = db.search_songs(query)?;
    for song in &hits {
        print_song(song);
    }
    println!("{} matches", hits.len());
    Ok(())
}

fn list_songs(offset: u32, limit: u32) -> Result<(), Box<dyn std::error::Error>> {
    let db = MusicDb::new()?;
    for song in db.songs_page(offset, limit)? {
        print_song(&song);
    }
    Ok(())
}

/// Looks an id up as a song, then an album, then an artist. Accepts either
/// the local numeric id or the provider string id.
fn show_entity(id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let numeric_id = library::ids::translate(id);
    let db = MusicDb::new()?;
    if let Some(song) = db.song_by_id(numeric_id)? {
        print_song(&song);
        return Ok(());
    }
    if let Some(album) = db.album_by_id(numeric_id)? {
        println!(
            "{}  {} — {} ({})",
            album.id, album.artist_name, album.title, album.year
        );
        for song in db.songs_by_album(album.id)? {
            print_song(&song);
        }
        return Ok(());
    }
    if let Some(artist) = db.artist_by_id(numeric_id)? {
        println!("{}  {} ({} tracks)", artist.id, artist.name, artist.track_count);
        return Ok(());
    }
    Err(format!("no song, album, or artist with id '{id}'").into())
}

const USAGE: &str = "Commands: set-password, stats, search <query>, songs [offset] [limit], show <id>";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("set-password") => store_password(&load_config()?),
        Some("stats") => print_stats(),
        Some("search") => {
            let query = args.next().ok_or("search needs a query")?;
            search(&query)
        }
        Some("songs") => {
            let offset = args.next().map(|arg| arg.parse()).transpose()?.unwrap_or(0);
            let limit = args.next().map(|arg| arg.parse()).transpose()?.unwrap_or(50);
            list_songs(offset, limit)
        }
        Some("show") => {
            let id = args.next().ok_or("show needs an id")?;
            show_entity(&id)
        }
        Some(other) => Err(format!("unknown command '{other}'. {USAGE}").into()),
        None => run_sync(),
    }
}
