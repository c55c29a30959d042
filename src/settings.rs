use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::SettingsError;

pub const DESTINATION_KEY: &str = "googleScriptUrl";
pub const PROXY_KEY: &str = "proxyServerUrl";
pub const USE_PROXY_KEY: &str = "useProxy";

/// Where the relay should send submissions.
///
/// Passed explicitly to [`crate::relay::Relay::submit`]; the form re-reads it
/// from the [`SettingsStore`] before every attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySettings {
    /// Spreadsheet-append endpoint
    pub destination_url: Option<String>,

    /// Base URL of the proxy relay server
    pub proxy_url: Option<String>,

    /// Try the proxy before the destination
    pub use_proxy: bool,
}

impl RelaySettings {
    pub fn destination(&self) -> Option<&str> {
        non_blank(self.destination_url.as_deref())
    }

    /// The proxy URL, only when the proxy transport is switched on
    pub fn proxy(&self) -> Option<&str> {
        if self.use_proxy {
            non_blank(self.proxy_url.as_deref())
        } else {
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// String-keyed settings persisted as a flat JSON object on disk.
///
/// This is the terminal equivalent of browser local storage: values are plain
/// strings and unknown keys are preserved on save.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl SettingsStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(SettingsStore { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Write all entries back to disk
    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.entries)?;
        writer.flush()?;
        Ok(())
    }

    /// Read the relay settings out of the string entries
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            destination_url: self.get(DESTINATION_KEY).map(str::to_string),
            proxy_url: self.get(PROXY_KEY).map(str::to_string),
            use_proxy: self.get(USE_PROXY_KEY) == Some("true"),
        }
    }

    /// Store the relay settings as string entries (not yet saved)
    pub fn put_settings(&mut self, settings: &RelaySettings) {
        match settings.destination_url.as_deref() {
            Some(url) => self.set(DESTINATION_KEY, url),
            None => {
                self.remove(DESTINATION_KEY);
            }
        }
        match settings.proxy_url.as_deref() {
            Some(url) => self.set(PROXY_KEY, url),
            None => {
                self.remove(PROXY_KEY);
            }
        }
        self.set(USE_PROXY_KEY, if settings.use_proxy { "true" } else { "false" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), RelaySettings::default());
    }

    #[test]
    fn settings_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut store = SettingsStore::open(&path).unwrap();
        store.put_settings(&RelaySettings {
            destination_url: Some("https://script.example/exec".to_string()),
            proxy_url: Some("http://localhost:3000".to_string()),
            use_proxy: true,
        });
        store.set("theme", "dark");
        store.save().unwrap();

        let reopened = SettingsStore::open(&path).unwrap();
        let settings = reopened.settings();
        assert_eq!(settings.destination(), Some("https://script.example/exec"));
        assert_eq!(settings.proxy(), Some("http://localhost:3000"));
        assert_eq!(reopened.get(USE_PROXY_KEY), Some("true"));
        assert_eq!(reopened.get("theme"), Some("dark"));
    }

    #[test]
    fn proxy_is_ignored_when_disabled() {
        let settings = RelaySettings {
            destination_url: Some(" ".to_string()),
            proxy_url: Some("http://localhost:3000".to_string()),
            use_proxy: false,
        };
        assert_eq!(settings.proxy(), None);
        assert_eq!(settings.destination(), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SettingsStore::open(&path),
            Err(SettingsError::Json(_))
        ));
    }
}
