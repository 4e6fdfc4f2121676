//! Credential-storage helpers for the Subsonic server password.

use keyring::Entry;

const SUBSONIC_SERVICE_NAME: &str = "navitune.backend.subsonic";

/// Keyring account name for one server login. Keyed by username and server
/// so the same username against two servers stores two passwords.
fn subsonic_account(server_url: &str, username: &str) -> String {
    format!("{}@{}", username, server_url.trim().trim_end_matches('/'))
}

fn subsonic_entry(server_url: &str, username: &str) -> Result<Entry, String> {
    let account = subsonic_account(server_url, username);
    Entry::new(SUBSONIC_SERVICE_NAME, &account)
        .map_err(|err| format!("failed to create keyring entry for '{account}': {err}"))
}

fn keyring_error_hint(error: &str) -> Option<String> {
    if error.contains("org.freedesktop.DBus.Error.ServiceUnknown") {
        return Some(
            "no Secret Service provider is available. Start GNOME Keyring or KeePassXC Secret Service."
                .to_string(),
        );
    }
    None
}

fn format_keyring_error(operation: &str, account: &str, error: &str) -> String {
    let base = format!("{operation} failed in system keyring for '{account}': {error}");
    match keyring_error_hint(error) {
        Some(hint) => format!("{base}. Hint: {hint}"),
        None => base,
    }
}

/// Saves the Subsonic password for a server login into the OS keyring.
pub fn set_subsonic_password(
    server_url: &str,
    username: &str,
    password: &str,
) -> Result<(), String> {
    let entry = subsonic_entry(server_url, username)?;
    entry.set_password(password).map_err(|err| {
        let detail = format!("failed to set keyring password: {err}");
        format_keyring_error(
            "save Subsonic credential",
            &subsonic_account(server_url, username),
            detail.as_str(),
        )
    })
}

/// Loads the Subsonic password for a server login from the OS keyring.
pub fn get_subsonic_password(
    server_url: &str,
    username: &str,
) -> Result<Option<String>, String> {
    let entry = subsonic_entry(server_url, username)?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => {
            let detail = format!("failed to get keyring password: {err}");
            Err(format_keyring_error(
                "load Subsonic credential",
                &subsonic_account(server_url, username),
                detail.as_str(),
            ))
        }
    }
}
