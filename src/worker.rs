//! Background conversion and dictionary loading.
//!
//! Each submitted page runs as one unit of work on the rayon pool. Results are
//! tagged with a generation number; only the most recent submission is current.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use tracing::{debug, warn};

use crate::convert::{Conversion, ConvertOptions, Driver};
use crate::dictionary::Dictionary;
use crate::store::{SqliteStore, StoreError};
use crate::ConvertError;

/// Messages delivered for one task, in order. `Finished` is always last.
#[derive(Debug)]
pub enum TaskEvent {
    Progress { processed: usize, total: usize },
    Finished(Conversion),
}

/// Owns the dictionary and hands read-only snapshots to conversion tasks.
///
/// Mutating through [`ConversionService::dictionary_mut`] while tasks are in
/// flight copies the dictionary; running tasks keep the snapshot they started with.
#[derive(Debug)]
pub struct ConversionService {
    dictionary: Arc<Dictionary>,
    options: ConvertOptions,
    latest: Arc<AtomicU64>,
}

impl ConversionService {
    pub fn new(dictionary: Dictionary, options: ConvertOptions) -> Self {
        Self {
            dictionary: Arc::new(dictionary),
            options,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        Arc::make_mut(&mut self.dictionary)
    }

    pub fn latest_generation(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Starts converting `page` in the background.
    pub fn submit(&self, page: impl Into<String>) -> Result<ConversionTask, ConvertError> {
        if !self.dictionary.is_ready() {
            return Err(ConvertError::NotReady(self.dictionary.state()));
        }

        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let dictionary = Arc::clone(&self.dictionary);
        let options = self.options;
        let page = page.into();
        let (tx, rx) = mpsc::channel();

        debug!(generation, chars = page.chars().count(), "conversion submitted");

        rayon::spawn(move || {
            let chars: Vec<char> = page.chars().collect();
            let total = chars.len();
            let report = |processed: usize| {
                let _ = tx.send(TaskEvent::Progress { processed, total });
            };
            let conversion = Driver::new(&dictionary, &chars, options).run(Some(&report));
            debug!(generation, segments = conversion.segments.len(), "conversion finished");
            let _ = tx.send(TaskEvent::Finished(conversion));
        });

        Ok(ConversionTask {
            generation,
            latest: Arc::clone(&self.latest),
            events: rx,
        })
    }
}

#[derive(Debug)]
pub struct ConversionTask {
    generation: u64,
    latest: Arc<AtomicU64>,
    events: Receiver<TaskEvent>,
}

impl ConversionTask {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once a newer page has been submitted to the same service.
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.generation
    }

    pub fn events(&self) -> &Receiver<TaskEvent> {
        &self.events
    }

    /// Blocks until the task finishes. Returns `Ok(None)` when the result is stale.
    pub fn wait(self) -> Result<Option<Conversion>, ConvertError> {
        self.wait_with_progress(|_, _| {})
    }

    pub fn wait_with_progress(
        self,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<Option<Conversion>, ConvertError> {
        for event in self.events.iter() {
            match event {
                TaskEvent::Progress { processed, total } => on_progress(processed, total),
                TaskEvent::Finished(conversion) => {
                    if self.latest.load(Ordering::SeqCst) != self.generation {
                        warn!(generation = self.generation, "discarding stale conversion");
                        return Ok(None);
                    }
                    return Ok(Some(conversion));
                }
            }
        }
        Err(ConvertError::Disconnected)
    }
}

/// Loads the dictionary stored at `path` on the rayon pool and calls
/// `on_finished` exactly once with the outcome.
pub fn load_in_background<F>(path: PathBuf, on_finished: F)
where
    F: FnOnce(Result<Dictionary, StoreError>) + Send + 'static,
{
    rayon::spawn(move || {
        let result = SqliteStore::open(&path).and_then(|store| {
            let mut dictionary = Dictionary::new();
            dictionary.load(&store)?;
            Ok(dictionary)
        });
        on_finished(result);
    });
}
