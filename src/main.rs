//! Main application for the TubeGrab video downloader GUI

// ini-backed settings: update feed and tool locations
mod config;
// External downloader boundary (yt-dlp)
mod downloader;
// Error types shared by jobs, controller and updater
mod error;
// Background download worker
mod job;
// Data models for jobs, events and history
mod model;
// Thumbnail preview worker
mod preview;
// Progress parsing and smoothing
mod progress;
// UI-thread owner of jobs and history
mod session;
// Thumbnail fetching, decoding and caching
mod thumbnail;
// Release feed check
mod update;
#[cfg(test)]
mod testing;

use config::{AppConfig, CONFIG_FILE};
use downloader::YtDlp;
use error::StartError;
use model::{FormatSelector, JobOutcome, JobStatus};
use session::{SessionController, SessionEvent};
use thumbnail::ThumbnailCache;
use update::Release;

// eframe/egui for GUI application framework
use eframe::{App, Frame, egui};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{runtime::Runtime, sync::oneshot};
use egui::{ColorImage, TextureOptions, Visuals};
use tracing_subscriber::EnvFilter;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Program entry point: initializes logging and runtime, then launches GUI
fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Create a new Tokio runtime and store it globally
    let rt = Arc::new(Runtime::new().expect("failed to start tokio runtime"));
    let rt = RUNTIME.get_or_init(|| rt);

    let config = AppConfig::load(Path::new(CONFIG_FILE));
    let handle = rt.handle().clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1024.0, 768.0]),
        ..Default::default()
    };
    eframe::run_native(
        "TubeGrab",
        options,
        Box::new(move |cc| {
            // Use dark theme visuals
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(TubeGrabApp::new(config, handle))
        }),
    )
}

/// Blocking message shown on top of the window
struct Dialog {
    title: &'static str,
    message: String,
}

/// Application state for the GUI
struct TubeGrabApp {
    /// Jobs, save folder and history
    session: SessionController<YtDlp>,
    /// Runtime used for blocking update work
    runtime: tokio::runtime::Handle,
    /// Input field for the video URL
    url_input: String,
    /// Selected output format
    selected_format: FormatSelector,
    /// Texture of the current preview thumbnail
    preview_texture: Option<egui::TextureHandle>,
    /// Title shown next to the preview
    preview_title: String,
    /// Soft preview failure, shown under the thumbnail
    preview_note: Option<String>,
    /// Validation errors and warnings
    dialog: Option<Dialog>,
    /// Pending result of the startup update check
    update_check: Option<oneshot::Receiver<Option<Release>>>,
    /// Newer release waiting for the user's answer
    update_offer: Option<Release>,
    /// Pending installer download
    installer: Option<oneshot::Receiver<Result<PathBuf, String>>>,
}

impl TubeGrabApp {
    fn new(config: AppConfig, runtime: tokio::runtime::Handle) -> Self {
        let cache = ThumbnailCache::new(ThumbnailCache::default_root());
        tracing::info!("thumbnail cache at {}", cache.root().display());
        let backend = Arc::new(YtDlp::new(config.tools.clone()));

        let update_check = config.update.map(|source| {
            let (tx, rx) = oneshot::channel();
            runtime.spawn_blocking(move || {
                let latest = update::check_latest(&source, env!("CARGO_PKG_VERSION"))
                    .unwrap_or_else(|err| {
                        tracing::warn!("update check skipped: {err}");
                        None
                    });
                let _ = tx.send(latest);
            });
            rx
        });

        Self {
            session: SessionController::new(runtime.clone(), backend, cache),
            runtime,
            url_input: String::new(),
            selected_format: FormatSelector::Mp4FullHd,
            preview_texture: None,
            preview_title: String::new(),
            preview_note: None,
            dialog: None,
            update_check,
            update_offer: None,
            installer: None,
        }
    }

    fn show_dialog(&mut self, title: &'static str, message: impl Into<String>) {
        self.dialog = Some(Dialog {
            title,
            message: message.into(),
        });
    }

    fn clear_preview(&mut self) {
        self.preview_texture = None;
        self.preview_title.clear();
        self.preview_note = None;
    }

    /// Applies worker results delivered since the last frame
    fn handle_session_events(&mut self, ctx: &egui::Context) {
        for event in self.session.poll(Instant::now()) {
            match event {
                SessionEvent::PreviewReady(preview) => {
                    let img = preview.image;
                    let size = [img.width as usize, img.height as usize];
                    let color = ColorImage::from_rgba_unmultiplied(size, &img.rgba);
                    self.preview_texture =
                        Some(ctx.load_texture("preview", color, TextureOptions::default()));
                    self.preview_title = match (preview.title, preview.from_cache) {
                        (Some(title), _) => title,
                        (None, true) => "(cached preview)".to_owned(),
                        (None, false) => String::new(),
                    };
                    self.preview_note = None;
                }
                SessionEvent::PreviewFailed(message) => {
                    self.preview_texture = None;
                    self.preview_title.clear();
                    self.preview_note = Some(message);
                }
                SessionEvent::Progress(_) => {}
                SessionEvent::DownloadFinished(outcome) => {
                    if let JobOutcome::Succeeded(_) = outcome {
                        self.url_input.clear();
                        self.clear_preview();
                    }
                }
            }
        }
    }

    /// Collects update check and installer results
    fn handle_update_results(&mut self) {
        if let Some(rx) = self.update_check.as_mut() {
            match rx.try_recv() {
                Ok(release) => {
                    self.update_offer = release;
                    self.update_check = None;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.update_check = None,
            }
        }
        if let Some(rx) = self.installer.as_mut() {
            match rx.try_recv() {
                Ok(Ok(path)) => {
                    self.session.note(format!(
                        "Installer saved to {}. Close TubeGrab and run it to update.",
                        path.display()
                    ));
                    self.installer = None;
                }
                Ok(Err(message)) => {
                    self.session.note(format!("Update download failed: {message}"));
                    self.installer = None;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.installer = None,
            }
        }
    }

    fn start_installer_download(&mut self, release: Release) {
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn_blocking(move || {
            let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            let result = update::download_installer(&release, &dir).map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.installer = Some(rx);
    }

    fn start_download(&mut self) {
        match self.session.start_download(&self.url_input, self.selected_format) {
            Ok(()) => {}
            Err(StartError::AlreadyRunning) => {
                self.show_dialog("Warning", StartError::AlreadyRunning.to_string())
            }
            Err(StartError::Invalid(err)) => self.show_dialog("Error", err.to_string()),
        }
    }

    fn dialog_window(&mut self, ctx: &egui::Context) {
        let Some(dialog) = &self.dialog else {
            return;
        };
        let mut close = false;
        egui::Window::new(dialog.title)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&dialog.message);
                if ui.button("OK").clicked() {
                    close = true;
                }
            });
        if close {
            self.dialog = None;
        }
    }

    fn update_window(&mut self, ctx: &egui::Context) {
        let Some(release) = &self.update_offer else {
            return;
        };
        let mut accept = false;
        let mut dismiss = false;
        egui::Window::new("Update available")
            .collapsible(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                let name = release.name.as_deref().unwrap_or(&release.tag_name);
                ui.label(format!(
                    "{name} is available (you have {}).",
                    env!("CARGO_PKG_VERSION")
                ));
                if let Some(notes) = release.body.as_deref().filter(|b| !b.trim().is_empty()) {
                    egui::ScrollArea::vertical().max_height(200.0).show(ui, |ui| {
                        ui.label(notes);
                    });
                }
                ui.horizontal(|ui| {
                    if release.installer().is_some() && ui.button("Download installer").clicked() {
                        accept = true;
                    }
                    if ui.button("Later").clicked() {
                        dismiss = true;
                    }
                });
            });
        if accept {
            if let Some(release) = self.update_offer.take() {
                self.start_installer_download(release);
            }
        } else if dismiss {
            self.update_offer = None;
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for TubeGrabApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // 1️⃣ Drain worker channels
        self.handle_session_events(ctx);
        self.handle_update_results();

        // 2️⃣ Bottom panel: history of finished jobs
        egui::TopBottomPanel::bottom("history_panel")
            .resizable(true)
            .min_height(160.0)
            .show(ctx, |ui| {
                ui.heading("History");
                ui.separator();
                egui::ScrollArea::vertical()
                    .auto_shrink([false; 2])
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        if self.session.history().is_empty() {
                            ui.weak("Download history...");
                        }
                        for entry in self.session.history().iter() {
                            ui.label(entry.to_string());
                        }
                    });
            });

        // 3️⃣ Main panel: URL, format, folder, download controls and preview
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("TubeGrab");

            ui.horizontal(|ui| {
                let edit = ui.add(
                    egui::TextEdit::singleline(&mut self.url_input)
                        .hint_text("Paste video URL...")
                        .desired_width(600.0),
                );
                if edit.changed() {
                    self.session.url_edited(&self.url_input, Instant::now());
                }

                egui::ComboBox::from_id_source("format")
                    .selected_text(self.selected_format.label())
                    .show_ui(ui, |ui| {
                        for format in FormatSelector::ALL {
                            ui.selectable_value(&mut self.selected_format, format, format.label());
                        }
                    });

                let folder_label = match self.session.save_directory() {
                    Some(dir) => dir.display().to_string(),
                    None => "Choose folder".to_owned(),
                };
                if ui.button(folder_label).clicked() {
                    if let Some(folder) = FileDialog::new().pick_folder() {
                        if let Err(err) = self.session.select_directory(folder) {
                            self.show_dialog("Error", err.to_string());
                        }
                    }
                }
            });

            ui.add_space(8.0);
            ui.horizontal(|ui| {
                if ui.add_sized([200.0, 40.0], egui::Button::new("Download")).clicked() {
                    self.start_download();
                }
                if self.session.is_downloading() && ui.button("Cancel").clicked() {
                    self.session.cancel_download();
                }
            });

            ui.add_space(8.0);
            ui.horizontal(|ui| {
                // Show thumbnail if available
                match &self.preview_texture {
                    Some(tex) => {
                        ui.add(egui::Image::new(tex).max_size(egui::vec2(400.0, 225.0)));
                    }
                    None if self.session.preview_pending() => {
                        ui.spinner();
                    }
                    None => {
                        ui.add_sized([400.0, 225.0], egui::Label::new("No preview"));
                    }
                }
                ui.vertical(|ui| {
                    ui.label(format!("Title: {}", self.preview_title));
                    ui.label(format!("Format: {}", self.selected_format));
                    let url = self
                        .session
                        .active_request()
                        .map(|r| r.url.as_str())
                        .unwrap_or(self.url_input.trim());
                    ui.label(format!("URL: {url}"));
                    if let Some(note) = &self.preview_note {
                        ui.colored_label(egui::Color32::LIGHT_RED, note);
                    }
                    let status = match self.session.download_status() {
                        None => "Idle",
                        Some(JobStatus::Pending) => "Starting…",
                        Some(JobStatus::Running) => "⬇️ Downloading",
                        Some(JobStatus::Succeeded) => "✅ Done",
                        Some(JobStatus::Failed) => "❌ Failed",
                        Some(JobStatus::Cancelled) => "Cancelled",
                    };
                    ui.label(status);
                    let progress = f32::from(self.session.progress()) / 100.0;
                    ui.add(egui::ProgressBar::new(progress).show_percentage());
                    if self.installer.is_some() {
                        ui.label("Downloading update…");
                    }
                });
            });
        });

        // 4️⃣ Modal windows
        self.dialog_window(ctx);
        self.update_window(ctx);

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
