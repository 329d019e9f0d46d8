//! Application settings: an explicit context struct handed down to whatever
//! embeds the engine, persisted through a repository seam instead of ambient
//! globals.
//!
//! On disk the settings are a plain `key=value` file in the platform config
//! directory, parsed line by line; unknown keys are skipped so older builds
//! can open newer files.

use std::path::PathBuf;

use crate::log_warn;
use crate::stroke::AI_REQUEST_MIN_INTERVAL;

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Language code (e.g. "en", "ja"). Empty string = auto-detect.
    pub language: String,
    /// Maximum number of undo steps retained.
    pub max_undo_steps: usize,
    /// Maximum number of version snapshots before oldest-first eviction.
    pub max_versions: usize,
    /// Base URL of the remote AI service.
    pub api_base_url: String,
    /// Minimum milliseconds between AI region requests fired from move
    /// events.
    pub ai_min_interval_ms: u64,
    /// Auto-save interval in minutes (0 = disabled).
    pub auto_save_minutes: u32,
    /// Show a save-confirmation dialog when exiting with unsaved work.
    pub confirm_on_exit: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            language: String::new(),
            max_undo_steps: 50,
            max_versions: crate::version::DEFAULT_MAX_VERSIONS,
            api_base_url: String::new(),
            ai_min_interval_ms: AI_REQUEST_MIN_INTERVAL.as_millis() as u64,
            auto_save_minutes: 0,
            confirm_on_exit: true,
        }
    }
}

// ============================================================================
// REPOSITORY SEAM
// ============================================================================

/// Persistence boundary for settings. The engine only ever talks to this
/// trait; tests inject an in-memory double.
pub trait SettingsRepository {
    fn load(&self) -> AppSettings;
    /// Persist; returns false on I/O failure (never fatal).
    fn save(&self, settings: &AppSettings) -> bool;
}

/// `key=value` file in the platform config directory.
pub struct FileSettingsRepository {
    path: PathBuf,
}

impl FileSettingsRepository {
    /// Repository at the default platform location.
    ///
    /// Linux:   `$XDG_CONFIG_HOME/characanvas/settings.cfg`
    /// Windows: `%APPDATA%\CharaCanvas\settings.cfg`
    /// macOS:   `~/Library/Application Support/CharaCanvas/settings.cfg`
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    fn default_path() -> PathBuf {
        #[cfg(target_os = "windows")]
        let base = std::env::var("APPDATA")
            .map(|p| PathBuf::from(p).join("CharaCanvas"))
            .unwrap_or_else(|_| PathBuf::from("."));
        #[cfg(target_os = "macos")]
        let base = std::env::var("HOME")
            .map(|h| {
                PathBuf::from(h)
                    .join("Library")
                    .join("Application Support")
                    .join("CharaCanvas")
            })
            .unwrap_or_else(|_| PathBuf::from("."));
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".config")
            })
            .join("characanvas");

        base.join("settings.cfg")
    }
}

impl Default for FileSettingsRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsRepository for FileSettingsRepository {
    fn load(&self) -> AppSettings {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return AppSettings::default();
        };

        let mut s = AppSettings::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "language" => s.language = val.to_string(),
                "max_undo_steps" => {
                    if let Ok(v) = val.parse() {
                        s.max_undo_steps = v;
                    }
                }
                "max_versions" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_versions = v.max(1);
                    }
                }
                "api_base_url" => s.api_base_url = val.to_string(),
                "ai_min_interval_ms" => {
                    if let Ok(v) = val.parse() {
                        s.ai_min_interval_ms = v;
                    }
                }
                "auto_save_minutes" => {
                    if let Ok(v) = val.parse() {
                        s.auto_save_minutes = v;
                    }
                }
                "confirm_on_exit" => s.confirm_on_exit = val == "true",
                _ => {} // unknown key, skip
            }
        }
        s
    }

    fn save(&self, settings: &AppSettings) -> bool {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let content = format!(
            "language={}\nmax_undo_steps={}\nmax_versions={}\napi_base_url={}\nai_min_interval_ms={}\nauto_save_minutes={}\nconfirm_on_exit={}\n",
            settings.language,
            settings.max_undo_steps,
            settings.max_versions,
            settings.api_base_url,
            settings.ai_min_interval_ms,
            settings.auto_save_minutes,
            settings.confirm_on_exit,
        );
        match std::fs::write(&self.path, content) {
            Ok(()) => true,
            Err(e) => {
                log_warn!("Failed to save settings to {:?}: {}", self.path, e);
                false
            }
        }
    }
}

// ============================================================================
// APP CONTEXT
// ============================================================================

/// Everything ambient the original UI kept in global stores, made explicit
/// and injected: current settings plus the repository that persists them.
pub struct AppContext {
    pub settings: AppSettings,
    repository: Box<dyn SettingsRepository>,
}

impl AppContext {
    pub fn load(repository: Box<dyn SettingsRepository>) -> Self {
        let settings = repository.load();
        Self {
            settings,
            repository,
        }
    }

    pub fn with_defaults(repository: Box<dyn SettingsRepository>) -> Self {
        Self {
            settings: AppSettings::default(),
            repository,
        }
    }

    pub fn persist(&self) -> bool {
        self.repository.save(&self.settings)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    struct MemoryRepository {
        stored: RefCell<Option<AppSettings>>,
    }

    impl SettingsRepository for MemoryRepository {
        fn load(&self) -> AppSettings {
            self.stored.borrow().clone().unwrap_or_default()
        }
        fn save(&self, settings: &AppSettings) -> bool {
            *self.stored.borrow_mut() = Some(settings.clone());
            true
        }
    }

    #[test]
    fn context_round_trips_through_repository() {
        let repo = Box::new(MemoryRepository {
            stored: RefCell::new(None),
        });
        let mut ctx = AppContext::load(repo);
        assert_eq!(ctx.settings, AppSettings::default());

        ctx.settings.max_versions = 5;
        ctx.settings.language = "ja".into();
        assert!(ctx.persist());

        let reloaded = ctx.repository.load();
        assert_eq!(reloaded.max_versions, 5);
        assert_eq!(reloaded.language, "ja");
    }

    #[test]
    fn file_repository_parses_and_skips_unknown_keys() {
        let dir = std::env::temp_dir().join("characanvas-settings-test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("settings.cfg");
        std::fs::write(
            &path,
            "language=en\nmax_versions=7\nmystery_key=42\nconfirm_on_exit=false\n",
        )
        .unwrap();

        let repo = FileSettingsRepository::at(path.clone());
        let s = repo.load();
        assert_eq!(s.language, "en");
        assert_eq!(s.max_versions, 7);
        assert!(!s.confirm_on_exit);
        // untouched fields keep their defaults
        assert_eq!(s.max_undo_steps, 50);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let repo = FileSettingsRepository::at(PathBuf::from("/nonexistent/nowhere.cfg"));
        assert_eq!(repo.load(), AppSettings::default());
    }
}
