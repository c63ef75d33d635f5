use crate::AppState;
use crate::api::models::sessions::{EventsResponse, SelectExisting, SessionCreate, SessionResponse};
use crate::config::UploadsConfig;
use crate::descriptor::MediaMetadata;
use crate::errors::{Error, Result};
use crate::session::{MediaSession, ModalOptions};
use crate::storage;
use crate::types::{SessionId, abbrev_uuid};
use crate::upload::UploadedFile;
use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
};
use bytes::BytesMut;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

fn session_not_found(id: &SessionId) -> Error {
    Error::NotFound {
        resource: "Session".to_string(),
        id: id.to_string(),
    }
}

fn find_session(state: &AppState, id: &SessionId) -> Result<Arc<Mutex<MediaSession>>> {
    state.sessions.get(id).ok_or_else(|| session_not_found(id))
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { message: e.body_text() }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

fn spool_error(e: std::io::Error) -> Error {
    Error::Internal {
        operation: format!("spool upload to a temporary file: {e}"),
    }
}

/// Open a media modal session
#[tracing::instrument(skip_all)]
pub async fn create_session(State(state): State<AppState>, Json(request): Json<SessionCreate>) -> Result<(StatusCode, Json<SessionResponse>)> {
    let options = request.apply_to(ModalOptions::from(&state.config.modal));

    if !state.resolver.disks().contains(&options.disk) {
        return Err(Error::NotFound {
            resource: "Disk".to_string(),
            id: options.disk,
        });
    }
    if storage::check_directory(&options.directory).is_err() {
        return Err(Error::BadRequest {
            message: format!("directory '{}' must not contain '..' segments or backslashes", options.directory),
        });
    }
    let max_request_size_kb = state.config.uploads.max_request_size_kb;
    if options.max_file_size_kb == 0 || options.max_file_size_kb > max_request_size_kb {
        return Err(Error::BadRequest {
            message: format!("max_file_size_kb must be between 1 and {max_request_size_kb}"),
        });
    }

    let session = MediaSession::new(options, request.field_id.clone());
    let view = session.view();
    let id = state.sessions.insert(session);

    Ok((StatusCode::CREATED, Json(SessionResponse { id, session: view })))
}

/// Current state of a session
pub async fn get_session(State(state): State<AppState>, Path(id): Path<SessionId>) -> Result<Json<SessionResponse>> {
    let session = find_session(&state, &id)?;
    let view = session.lock().await.view();
    Ok(Json(SessionResponse { id, session: view }))
}

/// Read the `file` part, keeping it in memory up to the configured threshold and spooling
/// the rest to a temporary file.
async fn receive_file(mut field: Field<'_>, uploads: &UploadsConfig) -> Result<UploadedFile> {
    let name = field.file_name().map(str::to_string).unwrap_or_default();
    let mime_type = field.content_type().map(str::to_string);
    let limit = uploads.max_request_size_kb.saturating_mul(1024);
    let threshold = uploads.memory_threshold_kb.saturating_mul(1024);

    let mut buffer = BytesMut::new();
    let mut spool: Option<(tokio::fs::File, TempPath)> = None;
    let mut total_size = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        total_size += chunk.len() as u64;
        if total_size > limit {
            tracing::warn!(file = %name, total_size, limit, "Upload size limit exceeded, aborting");
            return Err(Error::PayloadTooLarge {
                message: format!("File size exceeds maximum allowed size of {} kilobytes", uploads.max_request_size_kb),
            });
        }

        if let Some((file, _)) = spool.as_mut() {
            file.write_all(&chunk).await.map_err(spool_error)?;
        } else if total_size > threshold {
            let (std_file, path) = tempfile::NamedTempFile::new().map_err(spool_error)?.into_parts();
            let mut file = tokio::fs::File::from_std(std_file);
            file.write_all(&buffer).await.map_err(spool_error)?;
            file.write_all(&chunk).await.map_err(spool_error)?;
            buffer.clear();
            tracing::debug!(file = %name, path = ?path, "Spooling upload to temporary file");
            spool = Some((file, path));
        } else {
            buffer.extend_from_slice(&chunk);
        }
    }

    match spool {
        Some((mut file, path)) => {
            file.flush().await.map_err(spool_error)?;
            drop(file);
            UploadedFile::from_temp_path(name, mime_type, path).await.map_err(spool_error)
        }
        None => Ok(UploadedFile::from_bytes(name, mime_type, buffer.freeze())),
    }
}

/// Stage an uploaded file (multipart field `file`). Nothing is stored yet.
#[tracing::instrument(skip_all, fields(session_id = %abbrev_uuid(&id)))]
pub async fn upload_file(State(state): State<AppState>, Path(id): Path<SessionId>, mut multipart: Multipart) -> Result<Json<SessionResponse>> {
    let session = find_session(&state, &id)?;

    let mut staged = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => staged = Some(receive_file(field, &state.config.uploads).await?),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }
    let file = staged.ok_or_else(|| Error::BadRequest {
        message: "Missing multipart field 'file'".to_string(),
    })?;

    let mut session = session.lock().await;
    session.select_file(file)?;
    Ok(Json(SessionResponse { id, session: session.view() }))
}

/// Stage a file already stored on the session's disk
pub async fn select_existing(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(request): Json<SelectExisting>,
) -> Result<Json<SessionResponse>> {
    let session = find_session(&state, &id)?;
    let mut session = session.lock().await;
    session.select_existing(request.key)?;
    Ok(Json(SessionResponse { id, session: session.view() }))
}

/// Update alt text, title or link text
pub async fn update_metadata(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
    Json(patch): Json<MediaMetadata>,
) -> Result<Json<SessionResponse>> {
    let session = find_session(&state, &id)?;
    let mut session = session.lock().await;
    session.set_metadata(patch);
    Ok(Json(SessionResponse { id, session: session.view() }))
}

/// Store the staged file and return `close-modal` + `insert-media`.
///
/// The session is discarded on success and kept for another attempt on failure.
#[tracing::instrument(skip_all, fields(session_id = %abbrev_uuid(&id)))]
pub async fn create_media(State(state): State<AppState>, Path(id): Path<SessionId>) -> Result<Json<EventsResponse>> {
    let session = find_session(&state, &id)?;
    let mut session = session.lock().await;
    // Cancelled while we waited for the lock
    if !state.sessions.contains(&id) {
        return Err(session_not_found(&id));
    }

    let events = session.create(&state.resolver).await?;
    state.sessions.remove(&id);
    Ok(Json(EventsResponse { events }))
}

/// Abandon the session and return `close-modal`
#[tracing::instrument(skip_all, fields(session_id = %abbrev_uuid(&id)))]
pub async fn cancel_session(State(state): State<AppState>, Path(id): Path<SessionId>) -> Result<Json<EventsResponse>> {
    let session = find_session(&state, &id)?;
    let mut session = session.lock().await;
    // A create that held the lock may already have finished the session
    if state.sessions.remove(&id).is_none() {
        return Err(session_not_found(&id));
    }

    let events = session.cancel();
    tracing::debug!("Session cancelled");
    Ok(Json(EventsResponse { events }))
}

#[cfg(test)]
mod tests {
    use crate::probe::tests::encoded_image;
    use crate::test_utils::{create_test_app, create_test_config};
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use bytes::Bytes;
    use image::ImageFormat;
    use serde_json::{Value, json};

    fn png_form(width: u32, height: u32) -> MultipartForm {
        MultipartForm::new().add_part(
            "file",
            Part::bytes(encoded_image(width, height, ImageFormat::Png))
                .file_name("photo.png")
                .mime_type("image/png"),
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_image_flow() {
        let (server, state) = create_test_app(create_test_config()).await;

        let response = server.post("/api/v1/sessions").json(&json!({ "field_id": "content" })).await;
        response.assert_status(StatusCode::CREATED);
        let session: Value = response.json();
        let id = session["id"].as_str().unwrap().to_string();
        assert_eq!(session["phase"], "idle");
        assert_eq!(session["media_type"], "image");
        assert_eq!(session["options"]["disk"], "public");

        let response = server.post(&format!("/api/v1/sessions/{id}/file")).multipart(png_form(800, 600)).await;
        response.assert_status_ok();
        let session: Value = response.json();
        assert_eq!(session["phase"], "editing");
        assert_eq!(session["selection"]["kind"], "upload");
        assert_eq!(session["selection"]["name"], "photo.png");

        let response = server
            .patch(&format!("/api/v1/sessions/{id}/metadata"))
            .json(&json!({ "alt": "A lighthouse", "title": "Lighthouse" }))
            .await;
        response.assert_status_ok();

        let response = server.post(&format!("/api/v1/sessions/{id}/create")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        let events = body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], json!({ "event": "close-modal", "id": "media-uploader-modal" }));
        assert_eq!(events[1]["event"], "insert-media");
        assert_eq!(events[1]["field_id"], "content");
        assert_eq!(events[1]["media"]["width"], 800);
        assert_eq!(events[1]["media"]["height"], 600);
        assert_eq!(events[1]["media"]["alt"], "A lighthouse");

        let src = events[1]["media"]["src"].as_str().unwrap();
        let key = src.strip_prefix("http://localhost/storage/").unwrap();
        let disk = state.resolver.disks().get("public").unwrap();
        assert!(disk.exists(key).await.unwrap());

        // The session is gone
        server.get(&format!("/api/v1/sessions/{id}")).await.assert_status_not_found();
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_document_requires_link_text() {
        let (server, state) = create_test_app(create_test_config()).await;

        let session: Value = server.post("/api/v1/sessions").json(&json!({})).await.json();
        let id = session["id"].as_str().unwrap().to_string();

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"%PDF-1.7 test".to_vec())
                .file_name("report.pdf")
                .mime_type("application/pdf"),
        );
        let session: Value = server.post(&format!("/api/v1/sessions/{id}/file")).multipart(form).await.json();
        assert_eq!(session["media_type"], "document");

        let response = server.post(&format!("/api/v1/sessions/{id}/create")).await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["errors"]["link_text"][0], "The link text field is required.");

        // Still editing, errors visible, nothing stored
        let session: Value = server.get(&format!("/api/v1/sessions/{id}")).await.json();
        assert_eq!(session["phase"], "editing");
        assert!(session["errors"]["link_text"].is_array());
        let disk = state.resolver.disks().get("public").unwrap();
        assert!(!disk.exists("media/report.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_returns_close_modal() {
        let (server, state) = create_test_app(create_test_config()).await;

        let session: Value = server.post("/api/v1/sessions").json(&json!({})).await.json();
        let id = session["id"].as_str().unwrap().to_string();
        server.post(&format!("/api/v1/sessions/{id}/file")).multipart(png_form(4, 4)).await.assert_status_ok();

        let response = server.post(&format!("/api/v1/sessions/{id}/cancel")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body, json!({ "events": [{ "event": "close-modal", "id": "media-uploader-modal" }] }));
        assert!(state.sessions.is_empty());

        server.post(&format!("/api/v1/sessions/{id}/cancel")).await.assert_status_not_found();
    }

    #[tokio::test]
    async fn test_rejected_file_type() {
        let (server, _state) = create_test_app(create_test_config()).await;

        let session: Value = server
            .post("/api/v1/sessions")
            .json(&json!({ "accepted_file_types": ["image/png"] }))
            .await
            .json();
        let id = session["id"].as_str().unwrap().to_string();

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"PK\x03\x04".to_vec()).file_name("bundle.zip").mime_type("application/zip"),
        );
        let response = server.post(&format!("/api/v1/sessions/{id}/file")).multipart(form).await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert!(body["errors"]["src"][0].as_str().unwrap().contains("image/png"));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let mut config = create_test_config();
        config.uploads.max_request_size_kb = 4;
        config.modal.max_file_size_kb = 4;
        let (server, _state) = create_test_app(config).await;

        let session: Value = server.post("/api/v1/sessions").json(&json!({})).await.json();
        let id = session["id"].as_str().unwrap().to_string();

        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(vec![0u8; 8 * 1024]).file_name("big.pdf").mime_type("application/pdf"),
        );
        let response = server.post(&format!("/api/v1/sessions/{id}/file")).multipart(form).await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_large_upload_is_spooled_and_stored() {
        let mut config = create_test_config();
        config.uploads.memory_threshold_kb = 1;
        let (server, state) = create_test_app(config).await;

        let session: Value = server.post("/api/v1/sessions").json(&json!({})).await.json();
        let id = session["id"].as_str().unwrap().to_string();

        let content: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(content.clone()).file_name("manual.pdf").mime_type("application/pdf"),
        );
        let session: Value = server.post(&format!("/api/v1/sessions/{id}/file")).multipart(form).await.json();
        assert_eq!(session["selection"]["size"], 3000);

        server
            .patch(&format!("/api/v1/sessions/{id}/metadata"))
            .json(&json!({ "link_text": "Manual" }))
            .await
            .assert_status_ok();
        let body: Value = server.post(&format!("/api/v1/sessions/{id}/create")).await.json();

        let src = body["events"][1]["media"]["src"].as_str().unwrap();
        let key = src.strip_prefix("http://localhost/storage/").unwrap();
        let disk = state.resolver.disks().get("public").unwrap();
        assert_eq!(disk.read(key).await.unwrap(), Bytes::from(content));
        assert_eq!(body["events"][1]["media"]["link_text"], "Manual");
    }

    #[tokio::test]
    async fn test_select_existing_file() {
        let (server, state) = create_test_app(create_test_config()).await;
        let disk = state.resolver.disks().get("public").unwrap();
        let options = crate::storage::PutOptions {
            visibility: crate::types::Visibility::Public,
            content_type: Some("image/png".to_string()),
        };
        disk.put("media/logo.png", Bytes::from(encoded_image(120, 30, ImageFormat::Png)), &options)
            .await
            .unwrap();

        let session: Value = server.post("/api/v1/sessions").json(&json!({ "field_id": "hero" })).await.json();
        let id = session["id"].as_str().unwrap().to_string();

        server
            .post(&format!("/api/v1/sessions/{id}/existing"))
            .json(&json!({ "key": "media/logo.png" }))
            .await
            .assert_status_ok();
        let body: Value = server.post(&format!("/api/v1/sessions/{id}/create")).await.json();

        assert_eq!(body["events"][1]["media"]["src"], "http://localhost/storage/media/logo.png");
        assert_eq!(body["events"][1]["media"]["width"], 120);
        assert_eq!(body["events"][1]["field_id"], "hero");
    }

    #[tokio::test]
    async fn test_unsafe_directory_is_rejected_on_open() {
        let (server, state) = create_test_app(create_test_config()).await;

        for directory in ["../x", "media/../../etc", "media\\uploads"] {
            server
                .post("/api/v1/sessions")
                .json(&json!({ "directory": directory }))
                .await
                .assert_status_bad_request();
        }
        assert!(state.sessions.is_empty());

        let session: Value = server
            .post("/api/v1/sessions")
            .json(&json!({ "directory": "/docs/2024/" }))
            .await
            .json();
        assert_eq!(session["options"]["directory"], "/docs/2024/");
    }

    #[tokio::test]
    async fn test_create_and_cancel_racing_have_one_outcome() {
        let (server, state) = create_test_app(create_test_config()).await;

        let session: Value = server.post("/api/v1/sessions").json(&json!({})).await.json();
        let id = session["id"].as_str().unwrap().to_string();
        server.post(&format!("/api/v1/sessions/{id}/file")).multipart(png_form(8, 8)).await.assert_status_ok();

        // Hold the session so both requests queue on it
        let session_id: crate::types::SessionId = id.parse().unwrap();
        let guard = state.sessions.get(&session_id).unwrap().lock_owned().await;

        let (create, cancel, ()) = tokio::join!(
            async { server.post(&format!("/api/v1/sessions/{id}/create")).await },
            async { server.post(&format!("/api/v1/sessions/{id}/cancel")).await },
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                drop(guard);
            },
        );

        let mut statuses = [create.status_code(), cancel.status_code()];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::OK, StatusCode::NOT_FOUND]);
        if create.status_code() == StatusCode::OK {
            assert_eq!(create.json::<Value>()["events"].as_array().unwrap().len(), 2);
        }
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_session_errors() {
        let (server, _state) = create_test_app(create_test_config()).await;

        server
            .get("/api/v1/sessions/00000000-0000-0000-0000-000000000000")
            .await
            .assert_status_not_found();

        server
            .post("/api/v1/sessions")
            .json(&json!({ "disk": "missing" }))
            .await
            .assert_status_not_found();

        server
            .post("/api/v1/sessions")
            .json(&json!({ "max_file_size_kb": 0 }))
            .await
            .assert_status_bad_request();

        let session: Value = server.post("/api/v1/sessions").json(&json!({})).await.json();
        let id = session["id"].as_str().unwrap().to_string();
        let form = MultipartForm::new().add_text("alt", "no file here");
        server
            .post(&format!("/api/v1/sessions/{id}/file"))
            .multipart(form)
            .await
            .assert_status_bad_request();
    }
}
