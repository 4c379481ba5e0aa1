use std::io::{Cursor, Read};

use converter::{chunk_count, convert_source, output_filename, write_sierra_csv, SIERRA_MAX_ROWS};
use shared::domain::SessionId;
use shared::protocol::{ColumnMapping, ConvertedFile};
use storage::{FileStore, SessionRegistry};

fn fub_csv(rows: usize) -> String {
    let mut csv = String::from("First Name,Last Name,Email,Phone\n");
    for i in 0..rows {
        csv.push_str(&format!("Lead{i},Example,lead{i}@example.com,5551234567\n"));
    }
    csv
}

#[tokio::test]
async fn convert_store_pay_download_reset_acceptance() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = FileStore::new(root.path().join("uploads"), root.path().join("downloads"))
        .expect("file store");
    let registry = SessionRegistry::new();
    let session = SessionId::random();

    let source = fub_csv(SIERRA_MAX_ROWS + 10);
    let mapping = ColumnMapping::stock();
    let conversion = convert_source(source.as_bytes(), &mapping).expect("convert");
    assert_eq!(conversion.rows.len(), SIERRA_MAX_ROWS + 10);

    let chunks = chunk_count(conversion.rows.len());
    assert_eq!(chunks, 2);

    let mut files = Vec::new();
    for (index, rows) in conversion.rows.chunks(SIERRA_MAX_ROWS).enumerate() {
        let filename = output_filename("contacts", index, chunks);
        let bytes = write_sierra_csv(rows).expect("encode chunk");
        let path = store
            .write_artifact(session, &filename, &bytes)
            .await
            .expect("write chunk");
        files.push(ConvertedFile {
            filename,
            path,
            rows: rows.len(),
        });
    }
    registry.record_conversion(session, files.clone()).await;

    assert_eq!(files[0].rows, SIERRA_MAX_ROWS);
    assert_eq!(files[1].rows, 10);
    assert_eq!(files[0].filename, "contacts-sierra-chunk1.csv");
    assert_eq!(files[1].filename, "contacts-sierra-chunk2.csv");

    // Unpaid sessions report their files but stay unpaid until marked.
    assert!(!registry.payment_completed(session).await);
    assert!(registry.mark_payment_complete(session).await);
    assert!(registry.payment_completed(session).await);

    // Download each chunk and confirm the Sierra header is present.
    for file in &files {
        let bytes = store
            .read_artifact(&file.path)
            .await
            .expect("read")
            .expect("artifact exists");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.starts_with("First Name,Last Name,Full Name,"));
        assert_eq!(text.lines().count(), file.rows + 1);
    }

    // The zip bundle carries every chunk under its original name.
    let zip_bytes = store
        .zip_session_artifacts(session)
        .await
        .expect("zip")
        .expect("bundle exists");
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes)).expect("archive");
    assert_eq!(archive.len(), 2);
    let mut chunk_one = String::new();
    archive
        .by_name("contacts-sierra-chunk1.csv")
        .expect("entry")
        .read_to_string(&mut chunk_one)
        .expect("read entry");
    assert!(chunk_one.contains("Lead0 Example"));

    // Reset deletes the artifacts and the registry record.
    store
        .remove_session_files(session)
        .await
        .expect("remove files");
    registry.clear(session).await;
    assert!(store
        .session_artifacts(session)
        .await
        .expect("list")
        .is_empty());
    assert!(registry.snapshot(session).await.is_none());
}
