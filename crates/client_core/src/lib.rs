use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::{FieldKey, MappingCategory, SessionId};
use shared::protocol::{ColumnMapping, ConvertedFile, SierraRecord, SIERRA_COLUMNS};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

pub mod api;
pub mod guard;
pub mod store;
pub mod theme;

pub use api::{ConverterApi, DownloadError, HttpConverterApi};
pub use guard::{GuardOutcome, NavigationKind};
pub use store::{MemoryStore, StateStore, CONVERTED_FILES_KEY, SESSION_MARKER_KEY, THEME_KEY};
pub use theme::Theme;

const LEAVE_WARNING: &str = "You have converted files that will be lost if you leave this page. \
     Files are NOT stored on our servers. Have you downloaded everything?";
const SESSION_CLEARED_WARNING: &str = "Session Cleared: Your previous files were removed because \
     you reloaded the page. Files are NOT stored on our servers. Please upload and convert again.";

/// Linear workflow the page moves through. Reset returns to `Idle` from
/// anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowPhase {
    #[default]
    Idle,
    Mapping,
    Converted,
    AwaitingPayment,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Warning,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    ConsoleLog { line: String, level: LogLevel },
    Toast { message: String, kind: ToastKind },
    ErrorShown(String),
    PhaseChanged(WorkflowPhase),
    PreviewReady { total_rows: usize, note: Option<String> },
    DownloadsReady(Vec<ConvertedFile>),
}

/// One row of the mapping UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub key: FieldKey,
    pub source_column: String,
    pub included: bool,
    pub category: MappingCategory,
}

/// A mapping row is offered iff the field's stock column name was detected in
/// the uploaded CSV; offered rows start checked.
pub fn derive_mapping_entries(detected_columns: &[String]) -> Vec<MappingEntry> {
    FieldKey::ALL
        .iter()
        .filter(|key| {
            let default = key.default_source_column();
            detected_columns.iter().any(|column| column == default)
        })
        .map(|key| MappingEntry {
            key: *key,
            source_column: key.default_source_column().to_string(),
            included: true,
            category: key.category(),
        })
        .collect()
}

fn included_mapping(entries: &[MappingEntry]) -> ColumnMapping {
    let mut mapping = ColumnMapping::default();
    for entry in entries.iter().filter(|entry| entry.included) {
        mapping.insert(entry.key, entry.source_column.clone());
    }
    mapping
}

#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ResetStage {
    #[default]
    None,
    Warned,
    FinalPrompt,
}

/// Everything the page tracks for one visit. Replaces the scattered globals
/// of the browser build with a single explicit object.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub phase: WorkflowPhase,
    pub selected_file: Option<SelectedFile>,
    pub detected_columns: Vec<String>,
    pub mapping_entries: Vec<MappingEntry>,
    pub converted_files: Vec<ConvertedFile>,
    pub preview: Vec<SierraRecord>,
    pub session_id: Option<SessionId>,
    pub payment_completed: bool,
    pub has_active_files: bool,
    pub is_downloading: bool,
    pub upload_enabled: bool,
    reset_stage: ResetStage,
}

impl Default for UploadSession {
    fn default() -> Self {
        Self {
            phase: WorkflowPhase::Idle,
            selected_file: None,
            detected_columns: Vec::new(),
            mapping_entries: Vec::new(),
            converted_files: Vec::new(),
            preview: Vec::new(),
            session_id: None,
            payment_completed: false,
            has_active_files: false,
            is_downloading: false,
            upload_enabled: true,
            reset_stage: ResetStage::None,
        }
    }
}

/// Cached conversion result, persisted so a revisit can rehydrate its
/// downloads after the payment redirect round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedConversion {
    pub session_id: Option<SessionId>,
    pub files: Vec<ConvertedFile>,
}

pub struct SessionController {
    api: Arc<dyn ConverterApi>,
    store: Arc<dyn StateStore>,
    session: Mutex<UploadSession>,
    events: broadcast::Sender<ControllerEvent>,
    page_loaded_at_ms: i64,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn ConverterApi>,
        store: Arc<dyn StateStore>,
        page_loaded_at: DateTime<Utc>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            store,
            session: Mutex::new(UploadSession::default()),
            events,
            page_loaded_at_ms: page_loaded_at.timestamp_millis(),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> UploadSession {
        self.session.lock().await.clone()
    }

    /// Page-load entry point: run the reload guard, write a fresh session
    /// marker, then bootstrap payment state from the URL query or the server.
    pub async fn start(&self, navigation: NavigationKind, query: &str) -> GuardOutcome {
        let outcome = self.run_session_guard(navigation).await;
        guard::write_marker(&*self.store, self.page_loaded_at_ms, false);

        if query_confirms_payment(query) {
            self.handle_payment_return().await;
        } else if outcome == GuardOutcome::Fresh {
            self.rehydrate().await;
        }
        outcome
    }

    async fn run_session_guard(&self, navigation: NavigationKind) -> GuardOutcome {
        let Some(marker) = guard::read_marker(&*self.store) else {
            return GuardOutcome::Fresh;
        };
        if !guard::should_invalidate(&marker, navigation, self.page_loaded_at_ms) {
            return GuardOutcome::Fresh;
        }

        let cached = self.cached_conversion();
        self.store.remove(SESSION_MARKER_KEY);
        self.store.remove(CONVERTED_FILES_KEY);
        if let Some(cached) = cached {
            // Best effort: the sweep reclaims the files even if this fails.
            let _ = self.api.reset_session(cached.session_id).await;
        }
        info!("mid-session reload detected; session and server files cleared");
        self.emit(ControllerEvent::Toast {
            message: SESSION_CLEARED_WARNING.to_string(),
            kind: ToastKind::Warning,
        });
        GuardOutcome::Invalidated
    }

    /// Returning from the payment redirect: mark complete first, then
    /// re-verify before exposing anything, regardless of prior state.
    async fn handle_payment_return(&self) {
        let Some(session_id) = self.cached_session_id().await else {
            self.log("No files found. Please upload and convert a file first.", LogLevel::Error);
            return;
        };

        match self.api.mark_payment_complete(session_id).await {
            Ok(ack) if ack.success => {
                self.log("Payment verified! Loading your downloads...", LogLevel::Success);
            }
            Ok(_) => {
                self.log("Payment could not be confirmed.", LogLevel::Error);
                return;
            }
            Err(err) => {
                self.log(format!("Error verifying payment: {err}"), LogLevel::Error);
                return;
            }
        }

        match self.api.verify_payment(Some(session_id)).await {
            Ok(verify) if verify.payment_completed && verify.has_files => {
                self.expose_downloads(session_id, verify.files).await;
            }
            Ok(_) => {
                self.log("No files found. Please upload and convert a file first.", LogLevel::Error);
            }
            Err(err) => {
                self.log(format!("Error verifying payment: {err}"), LogLevel::Error);
            }
        }
    }

    /// Plain revisit: ask the server whether this session already paid.
    async fn rehydrate(&self) {
        let session_id = self.cached_session_id().await;
        let Ok(verify) = self.api.verify_payment(session_id).await else {
            // No reachable session to restore; not an error.
            return;
        };
        if verify.payment_completed && verify.has_files {
            let Some(session_id) = session_id else { return };
            self.expose_downloads(session_id, verify.files).await;
            self.log("Welcome back! Your files are ready to download.", LogLevel::Success);
        }
    }

    async fn expose_downloads(&self, session_id: SessionId, files: Vec<ConvertedFile>) {
        {
            let mut session = self.session.lock().await;
            session.session_id = Some(session_id);
            session.converted_files = files.clone();
            session.payment_completed = true;
            session.has_active_files = true;
            session.upload_enabled = false;
            self.set_phase(&mut session, WorkflowPhase::Paid);
        }
        self.persist_cached_conversion(Some(session_id), &files);
        guard::write_marker(&*self.store, self.page_loaded_at_ms, true);
        self.emit(ControllerEvent::DownloadsReady(files));
    }

    /// File picked in the upload zone: validate the extension locally, then
    /// ask the server which columns it sees.
    pub async fn select_file(&self, name: &str, bytes: Vec<u8>) {
        if !name.to_ascii_lowercase().ends_with(".csv") {
            self.emit(ControllerEvent::ErrorShown(
                "Please select a CSV file".to_string(),
            ));
            return;
        }

        {
            let mut session = self.session.lock().await;
            session.selected_file = Some(SelectedFile {
                name: name.to_string(),
                bytes: bytes.clone(),
            });
        }

        match self.api.detect_columns(name, bytes).await {
            Ok(response) if response.success => {
                let columns = response.columns.unwrap_or_default();
                let entries = derive_mapping_entries(&columns);
                let mut session = self.session.lock().await;
                session.detected_columns = columns;
                session.mapping_entries = entries;
                self.set_phase(&mut session, WorkflowPhase::Mapping);
            }
            Ok(response) => {
                let mut session = self.session.lock().await;
                session.detected_columns.clear();
                session.mapping_entries.clear();
                drop(session);
                self.emit(ControllerEvent::ErrorShown(
                    response
                        .error
                        .unwrap_or_else(|| "Could not read file".to_string()),
                ));
            }
            Err(err) => {
                self.emit(ControllerEvent::ErrorShown(format!(
                    "Error reading file: {err}"
                )));
            }
        }
    }

    /// Checkbox toggle on one mapping row.
    pub async fn set_entry_included(&self, key: FieldKey, included: bool) {
        let mut session = self.session.lock().await;
        if let Some(entry) = session
            .mapping_entries
            .iter_mut()
            .find(|entry| entry.key == key)
        {
            entry.included = included;
        }
    }

    /// Run the conversion with the currently checked mapping rows.
    pub async fn convert(&self) {
        let (file, mapping) = {
            let session = self.session.lock().await;
            let Some(file) = session.selected_file.clone() else {
                self.emit(ControllerEvent::ErrorShown(
                    "Please select a file first".to_string(),
                ));
                return;
            };
            (file, included_mapping(&session.mapping_entries))
        };

        match self.api.convert(&file.name, file.bytes, &mapping).await {
            Ok(response) if response.success => {
                for line in &response.logs {
                    self.log(line.clone(), LogLevel::Info);
                }
                let total_rows = response.total_rows.unwrap_or(response.preview.len());
                {
                    let mut session = self.session.lock().await;
                    session.session_id = response.session_id;
                    session.converted_files = response.files.clone();
                    session.preview = response.preview.clone();
                    session.has_active_files = true;
                    self.set_phase(&mut session, WorkflowPhase::Converted);
                }
                self.persist_cached_conversion(response.session_id, &response.files);
                guard::write_marker(&*self.store, self.page_loaded_at_ms, true);
                self.emit(ControllerEvent::PreviewReady {
                    total_rows,
                    note: response.preview_note,
                });
            }
            Ok(response) => {
                let mut message = response
                    .error
                    .unwrap_or_else(|| "Conversion failed".to_string());
                if let Some(details) = response.details {
                    message.push_str("\n\n");
                    message.push_str(&details);
                }
                for line in &response.logs {
                    self.log(line.clone(), LogLevel::Error);
                }
                self.emit(ControllerEvent::ErrorShown(message));
            }
            Err(err) => {
                self.emit(ControllerEvent::ErrorShown(format!(
                    "Conversion failed: {err}"
                )));
            }
        }
    }

    /// Column order for rendering preview rows: always the key order of the
    /// row objects themselves.
    pub async fn preview_columns(&self) -> Vec<String> {
        let session = self.session.lock().await;
        if session.preview.is_empty() {
            Vec::new()
        } else {
            SIERRA_COLUMNS.iter().map(|s| s.to_string()).collect()
        }
    }

    /// The user followed the payment link and is off to the provider.
    pub async fn begin_payment(&self) {
        let mut session = self.session.lock().await;
        if session.phase == WorkflowPhase::Converted {
            self.set_phase(&mut session, WorkflowPhase::AwaitingPayment);
        }
    }

    /// First step of the two-step reset confirmation.
    pub async fn request_reset(&self) {
        let mut session = self.session.lock().await;
        session.reset_stage = ResetStage::Warned;
    }

    /// Second step: the user sat through the warning modal.
    pub async fn acknowledge_reset_warning(&self) {
        let mut session = self.session.lock().await;
        if session.reset_stage == ResetStage::Warned {
            session.reset_stage = ResetStage::FinalPrompt;
        }
    }

    pub async fn cancel_reset(&self) {
        let mut session = self.session.lock().await;
        session.reset_stage = ResetStage::None;
    }

    /// Final confirmation: wipe local state, then ask the server to delete
    /// its copies. Does nothing unless both confirmations happened.
    pub async fn confirm_reset(&self) -> Result<()> {
        let session_id = {
            let session = self.session.lock().await;
            if session.reset_stage != ResetStage::FinalPrompt {
                return Err(anyhow!("reset has not been confirmed"));
            }
            session.session_id
        };

        {
            let mut session = self.session.lock().await;
            let phase_changed = session.phase != WorkflowPhase::Idle;
            *session = UploadSession::default();
            if phase_changed {
                self.emit(ControllerEvent::PhaseChanged(WorkflowPhase::Idle));
            }
        }
        self.store.remove(CONVERTED_FILES_KEY);
        guard::write_marker(&*self.store, self.page_loaded_at_ms, false);

        self.api.reset_session(session_id).await?;
        self.emit(ControllerEvent::Toast {
            message: "All files deleted. Ready for new conversion.".to_string(),
            kind: ToastKind::Success,
        });
        Ok(())
    }

    /// Leave-page check. Consumes the in-progress-download flag so the one
    /// navigation caused by the download itself stays silent.
    pub async fn leave_warning(&self) -> Option<String> {
        let mut session = self.session.lock().await;
        if session.is_downloading {
            session.is_downloading = false;
            return None;
        }
        let unreturned = session.has_active_files
            || !session.preview.is_empty()
            || !session.converted_files.is_empty();
        unreturned.then(|| LEAVE_WARNING.to_string())
    }

    pub async fn download_file(&self, artifact: &str) -> Result<Vec<u8>> {
        let session_id = self.require_session_id().await?;
        {
            let mut session = self.session.lock().await;
            session.is_downloading = true;
        }
        self.emit(ControllerEvent::Toast {
            message: "Downloading file...".to_string(),
            kind: ToastKind::Info,
        });
        let bytes = self.api.download(session_id, artifact).await?;
        self.emit(ControllerEvent::Toast {
            message: "Download started! Check your downloads folder.".to_string(),
            kind: ToastKind::Success,
        });
        Ok(bytes)
    }

    pub async fn download_bundle(&self) -> Result<Vec<u8>> {
        let session_id = self.require_session_id().await?;
        {
            let mut session = self.session.lock().await;
            session.is_downloading = true;
        }
        self.emit(ControllerEvent::Toast {
            message: "Preparing ZIP file...".to_string(),
            kind: ToastKind::Info,
        });
        let bytes = self.api.download_zip(session_id).await?;
        self.emit(ControllerEvent::Toast {
            message: "ZIP download started! Check your downloads folder.".to_string(),
            kind: ToastKind::Success,
        });
        Ok(bytes)
    }

    /// The download finished (or failed) without navigating away.
    pub async fn acknowledge_download(&self) {
        let mut session = self.session.lock().await;
        session.is_downloading = false;
    }

    async fn require_session_id(&self) -> Result<SessionId> {
        let session = self.session.lock().await;
        session
            .session_id
            .ok_or_else(|| anyhow!("no converted files in this session"))
    }

    async fn cached_session_id(&self) -> Option<SessionId> {
        if let Some(session_id) = self.session.lock().await.session_id {
            return Some(session_id);
        }
        self.cached_conversion().and_then(|cached| cached.session_id)
    }

    fn cached_conversion(&self) -> Option<CachedConversion> {
        let raw = self.store.get(CONVERTED_FILES_KEY)?;
        serde_json::from_str(&raw).ok()
    }

    fn persist_cached_conversion(&self, session_id: Option<SessionId>, files: &[ConvertedFile]) {
        let cached = CachedConversion {
            session_id,
            files: files.to_vec(),
        };
        if let Ok(raw) = serde_json::to_string(&cached) {
            self.store.set(CONVERTED_FILES_KEY, &raw);
        }
    }

    fn set_phase(&self, session: &mut UploadSession, phase: WorkflowPhase) {
        if session.phase != phase {
            session.phase = phase;
            self.emit(ControllerEvent::PhaseChanged(phase));
        }
    }

    fn log(&self, line: impl Into<String>, level: LogLevel) {
        self.emit(ControllerEvent::ConsoleLog {
            line: line.into(),
            level,
        });
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}

fn query_confirms_payment(query: &str) -> bool {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .any(|(key, value)| key == "payment_success" && value == "true")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
