use curator_cli::render;
use curator_core::app::App;
use curator_core::config::AppConfig;
use curator_core::scanner;
use curator_core::{DuplicatePolicy, Hierarchy, RecordKey};
use providers::local::{LocalStore, LocalStoreConfig};
use providers::noop::NoopProvider;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn write_png(path: &std::path::Path, seed: &str) {
    let mut data = PNG_MAGIC.to_vec();
    data.extend_from_slice(seed.as_bytes());
    fs::write(path, data).unwrap();
}

async fn local_app(root: &std::path::Path, policy: DuplicatePolicy) -> App {
    let mut cfg = AppConfig::default();
    cfg.database.path = root.join("db").join("curator.db").to_string_lossy().into_owned();
    cfg.remote.provider = "local".into();
    cfg.remote.local_root = root.join("remote").to_string_lossy().into_owned();
    cfg.remote.page_size = 2;
    cfg.dataset.policy = policy;
    cfg.dataset.staging_dir = root.join("staging").to_string_lossy().into_owned();
    cfg.retry.base_delay_ms = 0;
    App::from_config(cfg).await.unwrap()
}

#[tokio::test]
async fn batch_upload_files_into_category_folders() {
    let temp = tempdir().unwrap();
    let inbox = temp.path().join("inbox");
    fs::create_dir_all(inbox.join("more")).unwrap();
    write_png(&inbox.join("one.png"), "one");
    write_png(&inbox.join("more/two.png"), "two");
    // Same bytes as one.png under another name.
    write_png(&inbox.join("more/copy.png"), "one");
    fs::write(inbox.join("readme.txt"), "not an image").unwrap();

    let app = local_app(temp.path(), DuplicatePolicy::ReparentExisting).await;
    let hierarchy = Hierarchy::from_parts("plastic", Some("pet"), None).unwrap();
    let files = scanner::collect_images(&[inbox.clone()], &app.config.dataset.accept)
        .await
        .unwrap();
    assert_eq!(files.len(), 3);

    let report = scanner::upload_files(&app.reconciler, &files, &hierarchy, "tester").await;
    assert_eq!(report.uploaded, 3);
    assert_eq!(report.failed, 0);

    let records = app.reconciler.list_records().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.uploaded_by == "tester"));

    let folder = temp.path().join("remote/dataset/plastic/pet");
    let stored: Vec<_> = fs::read_dir(&folder).unwrap().collect();
    assert_eq!(stored.len(), 2);

    let lines = render::tree_lines(&app.reconciler.categories().await);
    assert_eq!(lines, vec!["plastic", "  pet"]);
    app.close().await;
}

#[tokio::test]
async fn reparenting_moves_files_on_disk() {
    let temp = tempdir().unwrap();
    let image = temp.path().join("item.png");
    write_png(&image, "item");
    let app = local_app(temp.path(), DuplicatePolicy::ReparentExisting).await;

    let bytes = bytes::Bytes::from(fs::read(&image).unwrap());
    let first = app
        .reconciler
        .upload(bytes.clone(), &"glass".parse().unwrap())
        .await
        .unwrap();
    let moved = app
        .reconciler
        .upload(bytes, &"metal/can".parse().unwrap())
        .await
        .unwrap();

    let name = format!("{}.png", first.record.fingerprint);
    assert!(!temp.path().join("remote/dataset/glass").join(&name).exists());
    assert!(temp.path().join("remote/dataset/metal/can").join(&name).exists());
    assert_eq!(moved.record.id, first.record.id);

    let removal = app
        .reconciler
        .delete_category(&"metal".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(removal.records_removed, 1);
    assert!(removal.parent.is_none());
    assert!(!temp.path().join("remote/dataset/metal").exists());
    assert!(!app
        .reconciler
        .delete(&RecordKey::Id(first.record.id))
        .await
        .unwrap());
    app.close().await;
}

#[tokio::test]
async fn records_survive_a_restart() {
    let temp = tempdir().unwrap();
    let image = temp.path().join("keep.png");
    write_png(&image, "keep");
    {
        let app = local_app(temp.path(), DuplicatePolicy::EvictStale).await;
        let bytes = bytes::Bytes::from(fs::read(&image).unwrap());
        app.reconciler
            .upload(bytes, &"paper".parse().unwrap())
            .await
            .unwrap();
        app.close().await;
    }
    let app = local_app(temp.path(), DuplicatePolicy::EvictStale).await;
    let records = app.reconciler.list_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hierarchy.to_string(), "paper");
    app.close().await;
}

#[tokio::test]
async fn truncated_file_on_disk_is_rewritten() {
    let temp = tempdir().unwrap();
    let app = local_app(temp.path(), DuplicatePolicy::ReparentExisting).await;
    let mut data = PNG_MAGIC.to_vec();
    data.extend_from_slice(b"eighteen more bytes");
    let fingerprint = curator_core::fingerprint::content_digest(&data);
    let glass = temp.path().join("remote/dataset/glass");
    fs::create_dir_all(&glass).unwrap();
    let target = glass.join(format!("{fingerprint}.png"));
    fs::write(&target, &data[..5]).unwrap();

    let outcome = app
        .reconciler
        .upload(bytes::Bytes::from(data.clone()), &"glass".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.record.fingerprint, fingerprint);
    assert_eq!(fs::read(&target).unwrap(), data);
    assert_eq!(fs::read_dir(&glass).unwrap().count(), 1);
    app.close().await;
}

#[tokio::test]
async fn export_copies_category_folders_to_disk() {
    let temp = tempdir().unwrap();
    let app = local_app(temp.path(), DuplicatePolicy::ReparentExisting).await;
    let mut data = PNG_MAGIC.to_vec();
    data.extend_from_slice(b"tray");
    let record = app
        .reconciler
        .upload(bytes::Bytes::from(data.clone()), &"paper/cardboard".parse().unwrap())
        .await
        .unwrap()
        .record;

    let dest = temp.path().join("training");
    let report = app.reconciler.export(&dest).await.unwrap();
    assert_eq!(report.files, 1);
    let copied = dest.join(format!("paper/cardboard/{}.png", record.fingerprint));
    assert_eq!(fs::read(copied).unwrap(), data);
    app.close().await;
}

#[tokio::test]
async fn noop_classifier_reports_not_implemented() {
    let temp = tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.database.path = "sqlite::memory:".into();
    cfg.dataset.staging_dir = temp.path().join("staging").to_string_lossy().into_owned();
    let store = Arc::new(LocalStore::new(LocalStoreConfig {
        root: temp.path().join("remote"),
        page_size: 10,
    }));
    let app = App::assemble(cfg, store, Arc::new(NoopProvider)).await.unwrap();
    let mut data = PNG_MAGIC.to_vec();
    data.extend_from_slice(b"x");
    assert!(app.predictor.predict(data.into()).await.is_err());
    assert!(app.predictor.list().await.unwrap().is_empty());
    app.close().await;
}
