use super::*;
use axum::{
    extract::{Multipart, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shared::domain::FieldKey;
use tokio::net::TcpListener;

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

async fn collect_parts(mut multipart: Multipart) -> (Option<(String, Vec<u8>)>, Option<String>) {
    let mut file = None;
    let mut mapping = None;
    while let Some(field) = multipart.next_field().await.expect("field") {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("").to_string();
                let bytes = field.bytes().await.expect("bytes").to_vec();
                file = Some((name, bytes));
            }
            Some("column_mapping") => mapping = Some(field.text().await.expect("text")),
            _ => {}
        }
    }
    (file, mapping)
}

#[tokio::test]
async fn detect_columns_posts_the_file_as_multipart() {
    let app = Router::new().route(
        "/detect_columns",
        post(|multipart: Multipart| async move {
            let (file, _) = collect_parts(multipart).await;
            let (name, bytes) = file.expect("file part");
            assert_eq!(name, "contacts.csv");
            assert_eq!(bytes, b"First Name\nJane\n");
            Json(DetectColumnsResponse::ok(vec!["First Name".to_string()]))
        }),
    );
    let server_url = spawn_server(app).await;

    let api = HttpConverterApi::new(server_url);
    let response = api
        .detect_columns("contacts.csv", b"First Name\nJane\n".to_vec())
        .await
        .expect("detect");
    assert!(response.success);
    assert_eq!(response.columns.expect("columns"), vec!["First Name"]);
}

#[tokio::test]
async fn convert_sends_the_mapping_as_a_json_form_field() {
    let app = Router::new().route(
        "/upload",
        post(|multipart: Multipart| async move {
            let (file, mapping_json) = collect_parts(multipart).await;
            assert!(file.is_some());
            let mapping: ColumnMapping =
                serde_json::from_str(&mapping_json.expect("mapping field")).expect("json");
            assert_eq!(
                mapping.source_column(FieldKey::FirstName),
                Some("First Name")
            );
            Json(ConvertResponse::failure("Conversion failed", None))
        }),
    );
    let server_url = spawn_server(app).await;

    let mut mapping = ColumnMapping::default();
    mapping.insert(FieldKey::FirstName, "First Name");

    let api = HttpConverterApi::new(server_url);
    let response = api
        .convert("contacts.csv", b"First Name\nJane\n".to_vec(), &mapping)
        .await
        .expect("transport ok");
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Conversion failed"));
}

#[derive(Debug, Deserialize)]
struct SessionParams {
    session: Option<String>,
    payment_success: Option<String>,
}

#[tokio::test]
async fn payment_calls_carry_the_session_and_confirmation() {
    let app = Router::new()
        .route(
            "/mark_payment_complete",
            get(|Query(params): Query<SessionParams>| async move {
                assert_eq!(params.payment_success.as_deref(), Some("true"));
                assert!(params.session.is_some());
                Json(AckResponse::ok())
            }),
        )
        .route(
            "/verify_payment",
            get(|Query(params): Query<SessionParams>| async move {
                assert!(params.session.is_some());
                Json(VerifyPaymentResponse::inactive())
            }),
        );
    let server_url = spawn_server(app).await;

    let api = HttpConverterApi::new(server_url);
    let session = SessionId::random();
    assert!(api.mark_payment_complete(session).await.expect("mark").success);
    let verify = api.verify_payment(Some(session)).await.expect("verify");
    assert!(!verify.payment_completed);
}

#[tokio::test]
async fn download_errors_map_to_payment_and_not_found() {
    let app = Router::new()
        .route(
            "/download/:artifact",
            get(|| async { StatusCode::PAYMENT_REQUIRED }),
        )
        .route("/download_zip", get(|| async { StatusCode::NOT_FOUND }));
    let server_url = spawn_server(app).await;

    let api = HttpConverterApi::new(server_url);
    let session = SessionId::random();

    let err = api
        .download(session, "whatever.csv")
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, DownloadError::PaymentRequired));

    let err = api.download_zip(session).await.err().expect("must fail");
    assert!(matches!(err, DownloadError::NotFound));
}
