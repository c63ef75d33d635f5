//! Per-invocation modal state.
//!
//! A [`MediaSession`] lives from the moment the editor opens the media modal until the
//! user confirms or cancels. Selecting a file only stages it; nothing touches storage
//! until [`MediaSession::create`], which validates, stores, builds the descriptor and
//! hands back the events the editor listens for.

use crate::config::ModalConfig;
use crate::descriptor::{self, MediaDescriptor, MediaMetadata};
use crate::errors::{Error, Result};
use crate::types::{MediaType, SessionId, abbrev_uuid};
use crate::upload::{StoredFile, UploadRequest, UploadResolver, UploadedFile};
use crate::validation::{self, FieldErrors, fields};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// A file is staged or fields have been entered
    Editing,
}

/// Settings supplied when the modal is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalOptions {
    /// Identifier carried in emitted events so the editor knows which modal to close
    pub modal_id: String,
    pub disk: String,
    pub directory: String,
    pub accepted_file_types: Vec<String>,
    pub max_file_size_kb: u64,
}

impl From<&ModalConfig> for ModalOptions {
    fn from(config: &ModalConfig) -> Self {
        Self {
            modal_id: config.id.clone(),
            disk: config.disk.clone(),
            directory: config.directory.clone(),
            accepted_file_types: config.accepted_file_types.clone(),
            max_file_size_kb: config.max_file_size_kb,
        }
    }
}

/// The file the user picked
#[derive(Debug, Clone)]
pub enum FileSelection {
    /// A new upload, held until the session is confirmed
    Upload(UploadedFile),
    /// A file already stored on the session's disk
    Existing { key: String, mime_type: String },
}

impl FileSelection {
    pub fn mime_type(&self) -> &str {
        match self {
            FileSelection::Upload(file) => file.mime_type(),
            FileSelection::Existing { mime_type, .. } => mime_type,
        }
    }

    /// Byte size, known only for uploads
    pub fn size(&self) -> Option<u64> {
        match self {
            FileSelection::Upload(file) => Some(file.size()),
            FileSelection::Existing { .. } => None,
        }
    }
}

/// Current form contents
#[derive(Debug, Clone, Default)]
pub struct FormValues {
    pub selection: Option<FileSelection>,
    pub metadata: MediaMetadata,
}

/// Signals emitted to the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ModalEvent {
    CloseModal {
        id: String,
    },
    InsertMedia {
        id: String,
        media: MediaDescriptor,
        field_id: Option<String>,
    },
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub media_type: MediaType,
    pub field_id: Option<String>,
    pub options: ModalOptions,
    pub selection: Option<SelectionView>,
    pub metadata: MediaMetadata,
    pub errors: FieldErrors,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionView {
    Upload { name: String, mime_type: String, size: u64 },
    Existing { key: String, mime_type: String },
}

#[derive(Debug, Clone)]
pub struct MediaSession {
    options: ModalOptions,
    field_id: Option<String>,
    phase: SessionPhase,
    media_type: MediaType,
    form: FormValues,
    errors: FieldErrors,
}

impl MediaSession {
    pub fn new(options: ModalOptions, field_id: Option<String>) -> Self {
        Self {
            options,
            field_id,
            phase: SessionPhase::Idle,
            media_type: MediaType::Image,
            form: FormValues::default(),
            errors: FieldErrors::new(),
        }
    }

    pub fn options(&self) -> &ModalOptions {
        &self.options
    }

    pub fn field_id(&self) -> Option<&str> {
        self.field_id.as_deref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn form(&self) -> &FormValues {
        &self.form
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    /// Switch to document mode for non-image MIME types. Never switches back.
    pub fn determine_type(&mut self, mime: &str) {
        if MediaType::from_mime(mime) == MediaType::Document {
            self.media_type = MediaType::Document;
        }
    }

    /// Stage an upload after checking its type and size.
    ///
    /// A rejected file is not staged; its errors are kept on the session and returned.
    pub fn select_file(&mut self, file: UploadedFile) -> Result<()> {
        self.phase = SessionPhase::Editing;
        self.errors.clear_field(fields::SRC);

        let mut errors = FieldErrors::new();
        validation::check_file(
            &mut errors,
            &self.options.accepted_file_types,
            self.options.max_file_size_kb,
            file.mime_type(),
            Some(file.size()),
        );
        if !errors.is_empty() {
            for message in errors.get(fields::SRC) {
                self.errors.add(fields::SRC, message.clone());
            }
            return Err(Error::Validation { errors });
        }

        tracing::debug!(file = %file.original_name(), mime = %file.mime_type(), size = file.size(), "Staged upload");
        self.determine_type(file.mime_type());
        self.form.selection = Some(FileSelection::Upload(file));
        Ok(())
    }

    /// Stage a file already on the session's disk. Its existence is checked on create.
    pub fn select_existing(&mut self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        self.phase = SessionPhase::Editing;
        self.errors.clear_field(fields::SRC);

        if key.trim().is_empty() {
            return Err(Error::BadRequest {
                message: "A storage key is required".to_string(),
            });
        }

        let mime_type = mime_guess::from_path(&key).first_or_octet_stream().to_string();
        let mut errors = FieldErrors::new();
        validation::check_file(&mut errors, &self.options.accepted_file_types, self.options.max_file_size_kb, &mime_type, None);
        if !errors.is_empty() {
            for message in errors.get(fields::SRC) {
                self.errors.add(fields::SRC, message.clone());
            }
            return Err(Error::Validation { errors });
        }

        self.determine_type(&mime_type);
        self.form.selection = Some(FileSelection::Existing { key, mime_type });
        Ok(())
    }

    pub fn set_metadata(&mut self, patch: MediaMetadata) {
        self.phase = SessionPhase::Editing;
        if patch.link_text.is_some() {
            self.errors.clear_field(fields::LINK_TEXT);
        }
        self.form.metadata.apply(patch);
    }

    /// Run every field rule. Errors replace whatever the session held before.
    pub fn validate(&mut self) -> Result<()> {
        let mut errors = FieldErrors::new();

        match &self.form.selection {
            None => errors.add(fields::SRC, "The file field is required."),
            Some(selection) => validation::check_file(
                &mut errors,
                &self.options.accepted_file_types,
                self.options.max_file_size_kb,
                selection.mime_type(),
                selection.size(),
            ),
        }

        let link_text_blank = self.form.metadata.link_text.as_deref().is_none_or(|t| t.trim().is_empty());
        if self.media_type == MediaType::Document && link_text_blank {
            errors.add(fields::LINK_TEXT, "The link text field is required.");
        }

        self.errors = errors.clone();
        if errors.is_empty() { Ok(()) } else { Err(Error::Validation { errors }) }
    }

    /// Validate, store the staged file, and emit `close-modal` then `insert-media`.
    ///
    /// On any failure the session keeps its values and stays in `Editing`.
    #[tracing::instrument(skip_all, fields(modal = %self.options.modal_id, field_id = ?self.field_id))]
    pub async fn create(&mut self, resolver: &UploadResolver) -> Result<Vec<ModalEvent>> {
        self.phase = SessionPhase::Editing;
        self.validate()?;

        let Some(selection) = self.form.selection.clone() else {
            return Err(self.missing_file());
        };

        let stored = match selection {
            FileSelection::Upload(file) => {
                let request = UploadRequest::builder()
                    .file(file)
                    .disk(self.options.disk.clone())
                    .directory(self.options.directory.clone())
                    .preserve_original_name(resolver.config().preserve_file_names)
                    .visibility(resolver.config().visibility)
                    .build();
                resolver.resolve(request).await?
            }
            FileSelection::Existing { key, .. } => resolver.resolve_existing(&self.options.disk, &key).await?,
        };

        let events = self.finish(&stored);
        tracing::info!(key = %stored.key, media_type = %self.media_type, "Media inserted");
        self.reset();
        Ok(events)
    }

    fn missing_file(&mut self) -> Error {
        let mut errors = FieldErrors::new();
        errors.add(fields::SRC, "The file field is required.");
        self.errors = errors.clone();
        Error::Validation { errors }
    }

    fn finish(&self, stored: &StoredFile) -> Vec<ModalEvent> {
        let media = descriptor::build(stored, &self.form.metadata, self.media_type);
        vec![
            ModalEvent::CloseModal {
                id: self.options.modal_id.clone(),
            },
            ModalEvent::InsertMedia {
                id: self.options.modal_id.clone(),
                media,
                field_id: self.field_id.clone(),
            },
        ]
    }

    /// Abandon the session. Nothing is written to storage.
    pub fn cancel(&mut self) -> Vec<ModalEvent> {
        self.reset();
        vec![ModalEvent::CloseModal {
            id: self.options.modal_id.clone(),
        }]
    }

    /// Back to `Idle`: image mode, empty form, no errors, no target field
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.media_type = MediaType::Image;
        self.form = FormValues::default();
        self.errors = FieldErrors::new();
        self.field_id = None;
    }

    pub fn view(&self) -> SessionView {
        let selection = self.form.selection.as_ref().map(|selection| match selection {
            FileSelection::Upload(file) => SelectionView::Upload {
                name: file.original_name().to_string(),
                mime_type: file.mime_type().to_string(),
                size: file.size(),
            },
            FileSelection::Existing { key, mime_type } => SelectionView::Existing {
                key: key.clone(),
                mime_type: mime_type.clone(),
            },
        });

        SessionView {
            phase: self.phase,
            media_type: self.media_type,
            field_id: self.field_id.clone(),
            options: self.options.clone(),
            selection,
            metadata: self.form.metadata.clone(),
            errors: self.errors.clone(),
        }
    }
}

struct SessionEntry {
    session: Arc<Mutex<MediaSession>>,
    touched: Instant,
}

/// Open sessions keyed by id.
///
/// Each session sits behind its own async mutex so one create or cancel runs at a time per
/// session while unrelated sessions proceed independently.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: MediaSession) -> SessionId {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            SessionEntry {
                session: Arc::new(Mutex::new(session)),
                touched: Instant::now(),
            },
        );
        tracing::debug!(session_id = %abbrev_uuid(&id), "Opened session");
        id
    }

    /// Look up a session and mark it as used
    pub fn get(&self, id: &SessionId) -> Option<Arc<Mutex<MediaSession>>> {
        self.sessions.get_mut(id).map(|mut entry| {
            entry.touched = Instant::now();
            entry.session.clone()
        })
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Mutex<MediaSession>>> {
        self.sessions.remove(id).map(|(_, entry)| entry.session)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions untouched for longer than `ttl`. Returns how many were dropped.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.touched.elapsed() <= ttl);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::info!(purged, remaining = self.sessions.len(), "Purged expired sessions");
        }
        purged
    }
}
