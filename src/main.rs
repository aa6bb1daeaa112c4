use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use eframe::egui;

use dental_annotate::app::ReviewApp;
use dental_annotate::model::Slot;
use dental_annotate::store::{BlobStore, FsBlobStore, FsRecordStore, Record, RecordStore};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dental_annotate=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (root, record) = match args.as_slice() {
        [_, data_root, record_id] => {
            let root = PathBuf::from(data_root);
            let store = FsRecordStore::new(&root);
            let record = store
                .load(record_id)
                .with_context(|| format!("loading record {record_id} from {data_root}"))?;
            (root, record)
        }
        [_, image_path] => legacy_session(Path::new(image_path))?,
        _ => {
            eprintln!("Usage: dental-annotate <data-root> <record-id>");
            eprintln!("       dental-annotate <image.png|jpg>");
            std::process::exit(1);
        }
    };

    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&root));
    let records: Arc<dyn RecordStore> = Arc::new(FsRecordStore::new(&root));

    let title = format!("dental-annotate — {}", record.id);
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    let app = ReviewApp::new(record, blobs, records);
    eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| Ok(Box::new(app))),
    )
    .map_err(|err| anyhow::anyhow!("failed to run editor: {err}"))
}

/// Single-image invocation: synthesizes a record next to the image so saves
/// have somewhere to land, reusing it on later runs.
fn legacy_session(image_path: &Path) -> anyhow::Result<(PathBuf, Record)> {
    if !image_path.exists() {
        bail!("file not found: {}", image_path.display());
    }
    let root = image_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let record_id = image_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("scan")
        .to_string();

    let store = FsRecordStore::new(&root);
    if let Ok(existing) = store.load(&record_id) {
        return Ok((root, existing));
    }

    let mut images = BTreeMap::new();
    images.insert(Slot::Primary, image_path.display().to_string());
    let record = Record {
        id: record_id,
        images,
        annotation_data: None,
        annotated_image_url: None,
        status: "pending".to_string(),
        updated_at: None,
    };
    store.create(&record).context("seeding legacy record")?;
    Ok((root, record))
}
