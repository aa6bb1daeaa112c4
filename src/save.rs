use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use image::RgbaImage;

use crate::model::{Annotation, AnnotationDocument, Slot};
use crate::render;
use crate::store::{annotated_blob_path, BlobStore, RecordStore, RecordUpdate, StoreError};

/// Everything the save pipeline needs, captured at the moment the clinician
/// hits save. Owning copies keep the background thread independent of the
/// editor, which may keep changing.
pub struct SaveRequest {
    pub record_id: String,
    pub slot: Slot,
    pub base: RgbaImage,
    pub annotations: Vec<Annotation>,
    pub document: AnnotationDocument,
    /// Source reference of the active slot, used to default `images` to a
    /// single legacy-compatible slot when the mapping is empty.
    pub source_image: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SaveOutcome {
    pub slot: Slot,
    pub annotated_url: String,
}

/// The save pipeline: render the composite, upload it, merge the active
/// slot into the document, write the record back. Any failure returns
/// without a partial visible state change; the caller retries by saving
/// again.
pub fn perform(
    request: SaveRequest,
    blobs: &dyn BlobStore,
    records: &dyn RecordStore,
) -> Result<SaveOutcome, StoreError> {
    let composite = render::composite(&request.base, &request.annotations);
    let png = render::encode_png(&composite)?;

    let now = Utc::now();
    let blob_path = annotated_blob_path(&request.record_id, request.slot, now.timestamp_millis());
    let annotated_url = blobs.upload(&blob_path, &png)?;

    let mut document = request.document;
    if document.images.is_empty() {
        if let Some(source) = request.source_image {
            document.images.insert(request.slot, source);
        }
    }
    document
        .annotations
        .insert(request.slot, request.annotations);
    document
        .annotated_images
        .insert(request.slot, annotated_url.clone());

    records.update(
        &request.record_id,
        RecordUpdate {
            annotation_data: serde_json::to_string(&document)?,
            annotated_image_url: annotated_url.clone(),
            status: "annotated".to_string(),
            updated_at: now,
        },
    )?;

    tracing::info!(record = %request.record_id, slot = %request.slot, "annotations saved");
    Ok(SaveOutcome {
        slot: request.slot,
        annotated_url,
    })
}

/// Serializes saves onto one background thread. At most one save is in
/// flight; a request while busy is rejected so two uploads for the same
/// slot can never race.
pub struct Saver {
    in_flight: Option<Receiver<Result<SaveOutcome, StoreError>>>,
}

impl Saver {
    pub fn new() -> Self {
        Self { in_flight: None }
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts a save unless one is already outstanding. Returns whether the
    /// request was accepted.
    pub fn request(
        &mut self,
        request: SaveRequest,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
    ) -> bool {
        if self.in_flight.is_some() {
            tracing::warn!("save already in progress, request rejected");
            return false;
        }
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let outcome = perform(request, blobs.as_ref(), records.as_ref());
            let _ = sender.send(outcome);
        });
        self.in_flight = Some(receiver);
        true
    }

    /// Non-blocking check for a finished save; clears the busy flag when
    /// one completes.
    pub fn poll(&mut self) -> Option<Result<SaveOutcome, StoreError>> {
        let receiver = self.in_flight.as_ref()?;
        match receiver.try_recv() {
            Ok(outcome) => {
                self.in_flight = None;
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.in_flight = None;
                Some(Err(StoreError::Io(std::io::Error::other(
                    "save worker terminated unexpectedly",
                ))))
            }
        }
    }
}

impl Default for Saver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, ShapeKind, DEFAULT_STROKE_WIDTH};
    use std::sync::mpsc::Sender;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct NullRecords;

    impl RecordStore for NullRecords {
        fn load(&self, id: &str) -> Result<crate::store::Record, StoreError> {
            Err(StoreError::NotFound { id: id.to_string() })
        }

        fn update(&self, _id: &str, _update: RecordUpdate) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Blocks every upload until the test releases it, to hold a save
    /// in flight deterministically.
    struct GatedBlobs {
        gate: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl GatedBlobs {
        fn new() -> (Arc<Self>, Sender<()>) {
            let (sender, receiver) = mpsc::channel();
            (
                Arc::new(Self {
                    gate: Mutex::new(receiver),
                }),
                sender,
            )
        }
    }

    impl BlobStore for GatedBlobs {
        fn upload(&self, path: &str, _bytes: &[u8]) -> Result<String, StoreError> {
            self.gate.lock().unwrap().recv().ok();
            Ok(self.public_url(path))
        }

        fn public_url(&self, path: &str) -> String {
            format!("gated://{path}")
        }
    }

    fn request(slot: Slot) -> SaveRequest {
        SaveRequest {
            record_id: "rec".to_string(),
            slot,
            base: RgbaImage::new(8, 8),
            annotations: vec![Annotation {
                id: "1".to_string(),
                kind: ShapeKind::Rectangle,
                points: vec![Point::new(1.0, 1.0), Point::new(4.0, 4.0)],
                color: "#ef4444".to_string(),
                stroke_width: DEFAULT_STROKE_WIDTH,
                label_id: Some("stains".to_string()),
            }],
            document: AnnotationDocument::default(),
            source_image: Some("scan.png".to_string()),
        }
    }

    #[test]
    fn second_save_while_one_is_outstanding_is_rejected() {
        let (blobs, release) = GatedBlobs::new();
        let records: Arc<dyn RecordStore> = Arc::new(NullRecords);
        let mut saver = Saver::new();

        assert!(saver.request(request(Slot::Upper), blobs.clone(), records.clone()));
        assert!(saver.is_saving());
        assert!(
            !saver.request(request(Slot::Upper), blobs.clone(), records.clone()),
            "concurrent save must be rejected"
        );

        release.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            if let Some(outcome) = saver.poll() {
                break outcome;
            }
            assert!(Instant::now() < deadline, "save never completed");
            thread::sleep(Duration::from_millis(5));
        };
        let outcome = outcome.expect("save succeeds");
        assert_eq!(outcome.slot, Slot::Upper);
        assert!(!saver.is_saving(), "busy flag clears after completion");

        // The flag is down, so a new save is accepted again.
        assert!(saver.request(request(Slot::Upper), blobs, records));
        release.send(()).unwrap();
    }
}
