use std::path::{Path, PathBuf};

use ini::Ini;

/// Default config location, relative to the working directory.
pub const CONFIG_FILE: &str = "config.ini";

/// Where to look for release updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSource {
    /// `owner/name` of the release repository.
    pub repo: String,
    /// Access token; empty for anonymous requests.
    pub token: String,
}

/// Explicit locations of the external binaries. `None` means search `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub yt_dlp: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// `None` disables the update check.
    pub update: Option<UpdateSource>,
    pub tools: ToolPaths,
}

impl AppConfig {
    /// Reads `path`; any problem degrades to defaults with update checks off.
    pub fn load(path: &Path) -> Self {
        match Ini::load_from_file(path) {
            Ok(ini) => Self::from_ini(&ini),
            Err(err) => {
                tracing::warn!("config {} unavailable, update check disabled: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        match Ini::load_from_str(text) {
            Ok(ini) => Self::from_ini(&ini),
            Err(err) => {
                tracing::warn!("malformed config, update check disabled: {err}");
                Self::default()
            }
        }
    }

    fn from_ini(ini: &Ini) -> Self {
        let update = ini.section(Some("GitHub")).and_then(|s| {
            let repo = s.get("repo")?.trim();
            let token = s.get("token").unwrap_or_default().trim();
            if repo.is_empty() {
                return None;
            }
            Some(UpdateSource {
                repo: repo.to_owned(),
                token: token.to_owned(),
            })
        });
        if update.is_none() {
            tracing::info!("no [GitHub] repo configured, update check disabled");
        }

        let tools = ini
            .section(Some("Tools"))
            .map(|s| ToolPaths {
                yt_dlp: non_empty_path(s.get("yt_dlp")),
                ffmpeg: non_empty_path(s.get("ffmpeg")),
            })
            .unwrap_or_default();

        Self { update, tools }
    }
}

fn non_empty_path(value: Option<&str>) -> Option<PathBuf> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
