use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use image::RgbaImage;

use crate::model::Slot;

/// Completed load for the slot that was current when the request went out.
pub struct LoadedImage {
    pub slot: Slot,
    pub result: Result<RgbaImage, String>,
}

struct Completion {
    generation: u64,
    slot: Slot,
    result: Result<RgbaImage, String>,
}

/// Background image loading with a request-generation counter. Every slot
/// switch bumps the generation; completions carrying an older generation
/// are discarded on poll, so a slow load can never overwrite the surface
/// for a slot the clinician has already left.
pub struct ImageLoader {
    generation: u64,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
}

impl ImageLoader {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            generation: 0,
            sender,
            receiver,
        }
    }

    /// Starts loading `source` for `slot`, superseding every outstanding
    /// request.
    pub fn request(&mut self, slot: Slot, source: &str) {
        self.generation += 1;
        let generation = self.generation;
        let sender = self.sender.clone();
        let path = resolve_source(source);
        thread::spawn(move || {
            let result = image::open(&path)
                .map(|img| img.to_rgba8())
                .map_err(|err| format!("failed to load {}: {err}", path.display()));
            let _ = sender.send(Completion {
                generation,
                slot,
                result,
            });
        });
    }

    /// Drains finished loads and returns the one matching the current
    /// generation, if any. Stale completions are dropped.
    pub fn poll(&mut self) -> Option<LoadedImage> {
        let mut latest = None;
        while let Ok(completion) = self.receiver.try_recv() {
            if completion.generation == self.generation {
                latest = Some(LoadedImage {
                    slot: completion.slot,
                    result: completion.result,
                });
            } else {
                tracing::debug!(
                    slot = %completion.slot,
                    generation = completion.generation,
                    current = self.generation,
                    "discarding stale image load"
                );
            }
        }
        latest
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Sources are filesystem paths, possibly written as `file://` URLs by the
/// blob store.
fn resolve_source(source: &str) -> PathBuf {
    PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
}
