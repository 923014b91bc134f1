//! Background statistics-pyramid generation.
//!
//! The worker owns one CPU thread. Requests are tagged with a generation
//! number; only the result of the most recent request is ever handed back, so
//! a user flicking through normal maps never sees an older map land after a
//! newer one.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::pyramid::{build_pyramid, PyramidError, PyramidResult, StatisticsPyramid};
use crate::texture::ImageData;

enum Source {
    Path(PathBuf),
    Image(ImageData),
}

struct Job {
    generation: u64,
    source: Source,
    sharpness: f32,
}

struct Finished {
    generation: u64,
    result: PyramidResult<StatisticsPyramid>,
}

/// Builds statistics pyramids off the render thread.
pub struct PyramidWorker {
    requests: Option<Sender<Job>>,
    results: Receiver<Finished>,
    generation: u64,
    pending: bool,
    handle: Option<JoinHandle<()>>,
}

impl PyramidWorker {
    pub fn new() -> Self {
        let (request_tx, request_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel::<Finished>();

        let handle = thread::Builder::new()
            .name("pyramid-worker".into())
            .spawn(move || run(request_rx, result_tx))
            .map_err(|e| log::error!("Failed to spawn pyramid worker: {}", e))
            .ok();

        Self {
            requests: handle.as_ref().map(|_| request_tx),
            results: result_rx,
            generation: 0,
            pending: false,
            handle,
        }
    }

    /// Queue a build from a normal map on disk. Supersedes any pending request.
    pub fn request(&mut self, path: impl Into<PathBuf>, sharpness: f32) -> u64 {
        self.submit(Source::Path(path.into()), sharpness)
    }

    /// Queue a build from an already decoded normal map.
    pub fn request_image(&mut self, image: ImageData, sharpness: f32) -> u64 {
        self.submit(Source::Image(image), sharpness)
    }

    fn submit(&mut self, source: Source, sharpness: f32) -> u64 {
        self.generation += 1;
        self.pending = true;

        let job = Job {
            generation: self.generation,
            source,
            sharpness,
        };

        let sent = self
            .requests
            .as_ref()
            .map(|tx| tx.send(job).is_ok())
            .unwrap_or(false);
        if !sent {
            log::error!("Pyramid worker is not running, request {} dropped", self.generation);
            self.pending = false;
        }
        self.generation
    }

    /// Generation number of the most recent request.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the latest request is still being built.
    pub fn is_busy(&self) -> bool {
        self.pending
    }

    /// Non-blocking check for the latest result. Stale results are dropped.
    pub fn poll(&mut self) -> Option<PyramidResult<StatisticsPyramid>> {
        loop {
            match self.results.try_recv() {
                Ok(finished) => {
                    if let Some(result) = self.accept(finished) {
                        return Some(result);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return self.disconnected(),
            }
        }
    }

    /// Block until the latest request finishes. Returns `None` when idle.
    pub fn wait(&mut self) -> Option<PyramidResult<StatisticsPyramid>> {
        while self.pending {
            match self.results.recv() {
                Ok(finished) => {
                    if let Some(result) = self.accept(finished) {
                        return Some(result);
                    }
                }
                Err(_) => return self.disconnected(),
            }
        }
        None
    }

    fn accept(&mut self, finished: Finished) -> Option<PyramidResult<StatisticsPyramid>> {
        if finished.generation != self.generation {
            log::debug!(
                "Discarding stale pyramid (generation {}, latest {})",
                finished.generation,
                self.generation
            );
            return None;
        }
        self.pending = false;
        Some(finished.result)
    }

    fn disconnected(&mut self) -> Option<PyramidResult<StatisticsPyramid>> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        Some(Err(PyramidError::Worker("worker thread exited".into())))
    }
}

impl Default for PyramidWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PyramidWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Pyramid worker panicked");
            }
        }
    }
}

fn run(requests: Receiver<Job>, results: Sender<Finished>) {
    while let Ok(mut job) = requests.recv() {
        // Only the newest queued job matters
        while let Ok(newer) = requests.try_recv() {
            job = newer;
        }

        log::info!("Building statistics pyramid (generation {})", job.generation);
        let result = match job.source {
            Source::Path(path) => build_pyramid(&path, job.sharpness),
            Source::Image(image) => StatisticsPyramid::from_image(&image, job.sharpness),
        };

        let finished = Finished {
            generation: job.generation,
            result,
        };
        if results.send(finished).is_err() {
            break;
        }
    }
}
