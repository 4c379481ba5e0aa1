use super::*;
use shared::error::ErrorCode;

fn context() -> (tempfile::TempDir, ApiContext) {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileStore::new(root.path().join("uploads"), root.path().join("downloads"))
        .expect("file store");
    (
        root,
        ApiContext {
            store,
            sessions: SessionRegistry::new(),
        },
    )
}

fn sample_csv() -> &'static [u8] {
    b"First Name,Last Name,Email,Phone\n\
      Jane,Doe,jane@example.com,5551234567\n\
      John,Roe,john@example.com,15550001111\n"
}

fn stock_mapping_json() -> String {
    serde_json::to_string(&ColumnMapping::stock()).expect("mapping json")
}

#[tokio::test]
async fn upload_validation_order_matches_the_contract() {
    let (_root, ctx) = context();

    let missing = convert_upload(&ctx, None, b"", None).await.err().expect("err");
    assert_eq!(missing.message, "No file uploaded");

    let unnamed = convert_upload(&ctx, Some(""), b"", None)
        .await
        .err()
        .expect("err");
    assert_eq!(unnamed.message, "No file selected");

    let wrong_ext = convert_upload(&ctx, Some("leads.txt"), b"", None)
        .await
        .err()
        .expect("err");
    assert_eq!(wrong_ext.message, "File must be a CSV");

    // Validation failures must not leave anything on disk.
    assert_eq!(
        std::fs::read_dir(ctx.store.upload_dir()).expect("dir").count(),
        0
    );
}

#[tokio::test]
async fn detect_columns_requires_a_file_part() {
    let err = detect_columns(None, b"").err().expect("err");
    assert_eq!(err.message, "No file uploaded");

    let columns = detect_columns(Some("contacts.csv"), sample_csv()).expect("columns");
    assert_eq!(columns, vec!["First Name", "Last Name", "Email", "Phone"]);
}

#[tokio::test]
async fn rejects_malformed_column_mapping() {
    let (_root, ctx) = context();
    let err = convert_upload(&ctx, Some("contacts.csv"), sample_csv(), Some("not json"))
        .await
        .err()
        .expect("err");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.message, "Invalid column mapping");
    assert!(err.details.is_some());
}

#[tokio::test]
async fn convert_upload_produces_artifacts_logs_and_preview() {
    let (_root, ctx) = context();
    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        sample_csv(),
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");

    assert_eq!(outcome.total_rows, 2);
    assert_eq!(outcome.files.len(), 1);
    assert_eq!(outcome.files[0].filename, "contacts-sierra.csv");
    assert_eq!(outcome.files[0].rows, 2);
    assert!(outcome.preview_note.is_none());
    assert_eq!(outcome.preview.len(), 2);
    assert_eq!(outcome.preview[0].full_name, "Jane Doe");
    assert_eq!(outcome.preview[0].phone, "(555) 123-4567");
    assert_eq!(outcome.preview[1].phone, "(555) 000-1111");

    assert_eq!(outcome.logs.first().map(String::as_str), Some("Processing: contacts.csv"));
    assert!(outcome
        .logs
        .contains(&"Row 1: Jane Doe - jane@example.com".to_string()));
    assert!(outcome
        .logs
        .contains(&"Total rows processed: 2".to_string()));
    assert_eq!(
        outcome.logs.last().map(String::as_str),
        Some("✓ Conversion complete!")
    );

    // The upload stash is gone, the download artifact remains.
    assert_eq!(
        std::fs::read_dir(ctx.store.upload_dir()).expect("dir").count(),
        0
    );
    let artifacts = ctx
        .store
        .session_artifacts(outcome.session_id)
        .await
        .expect("artifacts");
    assert_eq!(artifacts, vec![outcome.files[0].path.clone()]);

    // Fresh conversions are unpaid.
    let verify = verify_payment(&ctx, Some(outcome.session_id)).await;
    assert!(!verify.payment_completed);
    assert!(verify.has_files);
    assert_eq!(verify.files, outcome.files);
}

#[tokio::test]
async fn preview_is_capped_with_a_note() {
    let (_root, ctx) = context();
    let mut csv = String::from("First Name,Last Name,Email\n");
    for i in 0..25 {
        csv.push_str(&format!("Lead{i},Example,lead{i}@example.com\n"));
    }

    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        csv.as_bytes(),
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");

    assert_eq!(outcome.preview.len(), PREVIEW_ROWS);
    assert_eq!(outcome.total_rows, 25);
    let note = outcome.preview_note.expect("note");
    assert!(note.contains("first 10"));
    assert!(note.contains("25"));
}

#[tokio::test]
async fn downloads_are_gated_on_payment() {
    let (_root, ctx) = context();
    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        sample_csv(),
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");
    let session = outcome.session_id;
    let artifact = outcome.files[0].path.clone();

    let denied = load_artifact(&ctx, session, &artifact)
        .await
        .err()
        .expect("unpaid download must fail");
    assert_eq!(denied.code, ErrorCode::PaymentRequired);

    let denied_zip = zip_session(&ctx, session)
        .await
        .err()
        .expect("unpaid zip must fail");
    assert_eq!(denied_zip.code, ErrorCode::PaymentRequired);

    mark_payment_complete(&ctx, session, Some("true"))
        .await
        .expect("mark paid");

    let download = load_artifact(&ctx, session, &artifact)
        .await
        .expect("paid download");
    assert_eq!(download.filename, "contacts-sierra.csv");
    assert_eq!(download.content_type, "text/csv");
    assert!(download.bytes.starts_with(b"First Name,Last Name,Full Name,"));

    let bundle = zip_session(&ctx, session).await.expect("paid zip");
    assert_eq!(bundle.filename, ZIP_DOWNLOAD_NAME);
    assert_eq!(bundle.content_type, "application/zip");
}

#[tokio::test]
async fn download_refuses_artifacts_of_other_sessions() {
    let (_root, ctx) = context();
    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        sample_csv(),
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");

    let stranger = SessionId::random();
    let err = load_artifact(&ctx, stranger, &outcome.files[0].path)
        .await
        .err()
        .expect("cross-session download must fail");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn mark_payment_complete_requires_the_literal_confirmation() {
    let (_root, ctx) = context();
    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        sample_csv(),
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");
    let session = outcome.session_id;

    for bad in [None, Some("false"), Some("TRUE"), Some("1")] {
        let err = mark_payment_complete(&ctx, session, bad)
            .await
            .err()
            .expect("must fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }
    assert!(!verify_payment(&ctx, Some(session)).await.payment_completed);

    let unknown = mark_payment_complete(&ctx, SessionId::random(), Some("true"))
        .await
        .err()
        .expect("unknown session must fail");
    assert_eq!(unknown.code, ErrorCode::NotFound);

    mark_payment_complete(&ctx, session, Some("true"))
        .await
        .expect("mark paid");
    assert!(verify_payment(&ctx, Some(session)).await.payment_completed);
}

#[tokio::test]
async fn verify_payment_is_inactive_without_a_session() {
    let (_root, ctx) = context();
    let none = verify_payment(&ctx, None).await;
    assert!(!none.payment_completed);
    assert!(!none.has_files);
    assert!(none.files.is_empty());

    let unknown = verify_payment(&ctx, Some(SessionId::random())).await;
    assert!(!unknown.payment_completed);
    assert!(!unknown.has_files);
}

#[tokio::test]
async fn reset_session_deletes_artifacts_and_state() {
    let (_root, ctx) = context();
    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        sample_csv(),
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");
    let session = outcome.session_id;

    reset_session(&ctx, session).await.expect("reset");

    assert!(ctx
        .store
        .session_artifacts(session)
        .await
        .expect("artifacts")
        .is_empty());
    let verify = verify_payment(&ctx, Some(session)).await;
    assert!(!verify.has_files);

    // Resetting again (or an unknown session) is still fine.
    reset_session(&ctx, session).await.expect("reset again");
    reset_session(&ctx, SessionId::random())
        .await
        .expect("reset unknown");
}

#[tokio::test]
async fn empty_source_yields_no_files_and_no_preview() {
    let (_root, ctx) = context();
    let outcome = convert_upload(
        &ctx,
        Some("contacts.csv"),
        b"First Name,Last Name,Email\n",
        Some(&stock_mapping_json()),
    )
    .await
    .expect("convert");

    assert_eq!(outcome.total_rows, 0);
    assert!(outcome.files.is_empty());
    assert!(outcome.preview.is_empty());
    let verify = verify_payment(&ctx, Some(outcome.session_id)).await;
    assert!(!verify.has_files);
}
