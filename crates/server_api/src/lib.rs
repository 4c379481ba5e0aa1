use converter::{chunk_count, convert_source, output_filename, write_sierra_csv, SIERRA_MAX_ROWS};
use shared::domain::SessionId;
use shared::error::{ApiError, ErrorCode};
use shared::protocol::{ColumnMapping, ConvertedFile, SierraRecord, VerifyPaymentResponse};
use storage::{owning_session, sanitize_filename, FileStore, SessionRegistry};
use tracing::info;

pub const PREVIEW_ROWS: usize = 10;
pub const ZIP_DOWNLOAD_NAME: &str = "sierra-import-files.zip";

const LOG_RULE_WIDTH: usize = 60;

#[derive(Clone)]
pub struct ApiContext {
    pub store: FileStore,
    pub sessions: SessionRegistry,
}

pub struct ConvertOutcome {
    pub session_id: SessionId,
    pub logs: Vec<String>,
    pub preview: Vec<SierraRecord>,
    pub preview_note: Option<String>,
    pub total_rows: usize,
    pub files: Vec<ConvertedFile>,
}

pub struct ArtifactDownload {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Shared validation for file-bearing requests. Order matters: missing part,
/// then empty name, then extension.
pub fn validate_csv_upload(filename: Option<&str>) -> Result<&str, ApiError> {
    let filename = filename.ok_or_else(|| ApiError::validation("No file uploaded"))?;
    if filename.is_empty() {
        return Err(ApiError::validation("No file selected"));
    }
    if !filename.to_ascii_lowercase().ends_with(".csv") {
        return Err(ApiError::validation("File must be a CSV"));
    }
    Ok(filename)
}

/// Header sniff for the mapping UI. Presence of the file part is the only
/// validation; a malformed body surfaces as a business error.
pub fn detect_columns(filename: Option<&str>, bytes: &[u8]) -> Result<Vec<String>, ApiError> {
    if filename.is_none() {
        return Err(ApiError::validation("No file uploaded"));
    }
    converter::detect_columns(bytes)
        .map_err(|err| ApiError::validation(format!("Could not read CSV columns: {err}")))
}

fn parse_mapping(mapping_json: Option<&str>) -> Result<ColumnMapping, ApiError> {
    let raw = mapping_json.unwrap_or("{}");
    serde_json::from_str(raw).map_err(|err| {
        ApiError::validation("Invalid column mapping").with_details(err.to_string())
    })
}

fn log_rule() -> String {
    "=".repeat(LOG_RULE_WIDTH)
}

/// The whole conversion flow: stash the upload, convert, chunk the output
/// into download artifacts, register the session, drop the upload.
pub async fn convert_upload(
    ctx: &ApiContext,
    filename: Option<&str>,
    bytes: &[u8],
    mapping_json: Option<&str>,
) -> Result<ConvertOutcome, ApiError> {
    let filename = validate_csv_upload(filename)?;
    let mapping = parse_mapping(mapping_json)?;

    let session_id = SessionId::random();
    let safe_name = sanitize_filename(filename);
    let upload_path = ctx
        .store
        .stash_upload(session_id, &safe_name, bytes)
        .await
        .map_err(internal)?;

    let mut logs = vec![format!("Processing: {safe_name}"), log_rule()];

    let conversion = match convert_source(bytes, &mapping) {
        Ok(conversion) => conversion,
        Err(err) => {
            let _ = ctx.store.discard_upload(&upload_path).await;
            return Err(
                ApiError::validation("Conversion failed").with_details(err.to_string())
            );
        }
    };
    logs.extend(conversion.row_logs);

    let total_rows = conversion.rows.len();
    logs.push(log_rule());
    logs.push(format!("Total rows processed: {total_rows}"));

    let chunks = chunk_count(total_rows);
    if chunks > 1 {
        logs.push(format!(
            "Splitting into {chunks} chunks (Sierra max: {SIERRA_MAX_ROWS} rows/file)"
        ));
    }

    let stem = converter::file_stem(&safe_name);
    let mut files = Vec::with_capacity(chunks);
    for (index, rows) in conversion.rows.chunks(SIERRA_MAX_ROWS).enumerate() {
        let output_name = output_filename(stem, index, chunks);
        let encoded = write_sierra_csv(rows)
            .map_err(|err| ApiError::internal(err.to_string()))?;
        let path = ctx
            .store
            .write_artifact(session_id, &output_name, &encoded)
            .await
            .map_err(internal)?;
        logs.push(format!("Created: {output_name} ({} rows)", rows.len()));
        files.push(ConvertedFile {
            filename: output_name,
            path,
            rows: rows.len(),
        });
    }

    logs.push(log_rule());
    logs.push("✓ Conversion complete!".to_string());

    ctx.sessions
        .record_conversion(session_id, files.clone())
        .await;
    ctx.store
        .discard_upload(&upload_path)
        .await
        .map_err(internal)?;

    let preview: Vec<SierraRecord> = conversion
        .rows
        .iter()
        .take(PREVIEW_ROWS)
        .cloned()
        .collect();
    let preview_note = (total_rows > preview.len()).then(|| {
        format!(
            "Showing the first {} of {total_rows} converted rows. Download the files for the complete data.",
            preview.len()
        )
    });

    info!(session = %session_id, total_rows, files = files.len(), "conversion complete");

    Ok(ConvertOutcome {
        session_id,
        logs,
        preview,
        preview_note,
        total_rows,
        files,
    })
}

async fn ensure_paid(ctx: &ApiContext, session: SessionId) -> Result<(), ApiError> {
    if ctx.sessions.payment_completed(session).await {
        Ok(())
    } else {
        Err(ApiError::payment_required(
            "Payment is required before downloads are available",
        ))
    }
}

/// Serve one converted artifact. The artifact must belong to the requesting
/// session and the session must have completed payment; the payment flag on
/// the server is the gate, not the client.
pub async fn load_artifact(
    ctx: &ApiContext,
    session: SessionId,
    artifact: &str,
) -> Result<ArtifactDownload, ApiError> {
    if owning_session(artifact) != Some(session) {
        return Err(ApiError::validation(
            "File does not belong to this session",
        ));
    }
    ensure_paid(ctx, session).await?;

    let bytes = ctx
        .store
        .read_artifact(artifact)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(ArtifactDownload {
        filename: storage::original_name(artifact).to_string(),
        content_type: "text/csv",
        bytes,
    })
}

/// Zip bundle of every artifact the session owns.
pub async fn zip_session(
    ctx: &ApiContext,
    session: SessionId,
) -> Result<ArtifactDownload, ApiError> {
    ensure_paid(ctx, session).await?;

    let bytes = ctx
        .store
        .zip_session_artifacts(session)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("No converted files for this session"))?;

    Ok(ArtifactDownload {
        filename: ZIP_DOWNLOAD_NAME.to_string(),
        content_type: "application/zip",
        bytes,
    })
}

/// Delete every stored artifact of the session and forget its record.
/// Resetting an unknown session is a no-op, not an error.
pub async fn reset_session(ctx: &ApiContext, session: SessionId) -> Result<(), ApiError> {
    let removed = ctx
        .store
        .remove_session_files(session)
        .await
        .map_err(internal)?;
    ctx.sessions.clear(session).await;
    info!(session = %session, removed, "session reset");
    Ok(())
}

/// Flip the payment flag after the provider redirected back with
/// `payment_success=true`.
pub async fn mark_payment_complete(
    ctx: &ApiContext,
    session: SessionId,
    payment_success: Option<&str>,
) -> Result<(), ApiError> {
    if payment_success != Some("true") {
        return Err(ApiError::validation("Payment confirmation missing"));
    }
    if !ctx.sessions.mark_payment_complete(session).await {
        return Err(ApiError::not_found("No converted files for this session"));
    }
    info!(session = %session, "payment marked complete");
    Ok(())
}

/// Rehydration snapshot. Unknown or absent sessions read as inactive.
pub async fn verify_payment(
    ctx: &ApiContext,
    session: Option<SessionId>,
) -> VerifyPaymentResponse {
    let Some(session) = session else {
        return VerifyPaymentResponse::inactive();
    };
    let Some(record) = ctx.sessions.snapshot(session).await else {
        return VerifyPaymentResponse::inactive();
    };
    VerifyPaymentResponse {
        payment_completed: record.payment_completed,
        has_files: !record.files.is_empty(),
        files: record.files,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
