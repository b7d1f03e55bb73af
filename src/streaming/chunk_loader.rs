//! Background chunk building with nearest-first concurrent loading

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::priority::{ChunkPriority, ChunkPriorityQueue};
use crate::terrain::{ChunkCoord, ChunkData, ChunkSource};

/// Request to build one chunk
#[derive(Debug, Clone, Copy)]
pub struct LoadRequest {
    pub coord: ChunkCoord,
    /// Distance from the observer when requested; nearer builds start first
    pub distance: f32,
    /// Sea level to classify biomes against
    pub sea_level_meters: f32,
}

/// Result of a background build
#[derive(Debug)]
pub enum LoadResult {
    Built(ChunkData),
    Failed(ChunkCoord, Error),
}

impl LoadResult {
    pub fn coord(&self) -> ChunkCoord {
        match self {
            LoadResult::Built(data) => data.coord,
            LoadResult::Failed(coord, _) => *coord,
        }
    }
}

type CancelSet = Arc<Mutex<HashSet<ChunkCoord>>>;

fn lock(set: &CancelSet) -> MutexGuard<'_, HashSet<ChunkCoord>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builds chunks on a dedicated tokio runtime.
///
/// Builds are CPU work, so each runs on the blocking pool; the worker task
/// only orders requests and caps how many are in flight.
pub struct ChunkLoader {
    request_tx: Option<mpsc::UnboundedSender<LoadRequest>>,
    result_rx: mpsc::UnboundedReceiver<LoadResult>,
    /// Requested and not yet polled or cancelled
    pending: HashSet<ChunkCoord>,
    /// Cancelled and not yet skipped by the worker or discarded on poll
    cancelled: CancelSet,
    runtime: Option<Runtime>,
}

impl ChunkLoader {
    /// Create a loader running at most `max_concurrent` builds at once
    pub fn new(source: Arc<dyn ChunkSource>, max_concurrent: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_concurrent.max(1))
            .thread_name("chunk-loader")
            .build()
            .map_err(|e| Error::Runtime(e.to_string()))?;

        let (request_tx, request_rx) = mpsc::unbounded_channel::<LoadRequest>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<LoadResult>();
        let cancelled = CancelSet::default();

        let worker_cancelled = cancelled.clone();
        runtime.spawn(async move {
            Self::worker_loop(source, max_concurrent.max(1), request_rx, result_tx, worker_cancelled).await;
        });

        Ok(Self {
            request_tx: Some(request_tx),
            result_rx,
            pending: HashSet::new(),
            cancelled,
            runtime: Some(runtime),
        })
    }

    async fn worker_loop(
        source: Arc<dyn ChunkSource>,
        max_concurrent: usize,
        mut request_rx: mpsc::UnboundedReceiver<LoadRequest>,
        result_tx: mpsc::UnboundedSender<LoadResult>,
        cancelled: CancelSet,
    ) {
        use tokio::task::JoinSet;

        let mut active_tasks: JoinSet<LoadResult> = JoinSet::new();
        let mut queue = ChunkPriorityQueue::new();
        let mut requests = std::collections::HashMap::new();
        let mut open = true;

        loop {
            tokio::select! {
                request = request_rx.recv(), if open => {
                    match request {
                        Some(request) => {
                            queue.push(ChunkPriority::new(request.coord, request.distance));
                            requests.insert(request.coord, request);
                        }
                        None => open = false,
                    }
                }

                Some(joined) = active_tasks.join_next(), if !active_tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            if result_tx.send(result).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::error!("Chunk build task failed: {}", e),
                    }
                }

                else => break,
            }

            while active_tasks.len() < max_concurrent {
                let Some(next) = queue.pop() else { break };
                let Some(request) = requests.remove(&next.coord) else { continue };
                if lock(&cancelled).remove(&request.coord) {
                    log::trace!("Skipping cancelled chunk {}", request.coord);
                    continue;
                }

                let source = source.clone();
                active_tasks.spawn(async move {
                    let coord = request.coord;
                    let built = tokio::task::spawn_blocking(move || source.build_chunk(coord, request.sea_level_meters)).await;
                    match built {
                        Ok(Ok(data)) => LoadResult::Built(data),
                        Ok(Err(e)) => LoadResult::Failed(coord, e),
                        Err(e) => LoadResult::Failed(coord, Error::load_failure(coord, format!("build panicked: {}", e))),
                    }
                });
            }

            if !open && queue.is_empty() && active_tasks.is_empty() {
                break;
            }
        }
        log::debug!("Chunk loader worker stopped");
    }

    /// Queue a build. Returns `false` if `coord` is already pending.
    pub fn request(&mut self, coord: ChunkCoord, distance: f32, sea_level_meters: f32) -> Result<bool> {
        if self.pending.contains(&coord) {
            return Ok(false);
        }
        let tx = self
            .request_tx
            .as_ref()
            .ok_or_else(|| Error::Runtime("chunk loader shut down".into()))?;

        lock(&self.cancelled).remove(&coord);
        tx.send(LoadRequest {
            coord,
            distance,
            sea_level_meters,
        })
        .map_err(|_| Error::Runtime("chunk loader worker stopped".into()))?;
        self.pending.insert(coord);
        Ok(true)
    }

    /// Drain finished builds without blocking.
    ///
    /// Results for chunks cancelled after their build started are dropped,
    /// along with their cancel marker.
    pub fn poll_results(&mut self) -> Vec<LoadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            let coord = result.coord();
            if self.pending.remove(&coord) {
                results.push(result);
            } else {
                lock(&self.cancelled).remove(&coord);
                log::trace!("Discarding result for cancelled chunk {}", coord);
            }
        }
        results
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, coord: ChunkCoord) -> bool {
        self.pending.contains(&coord)
    }

    pub fn pending(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.pending.iter().copied()
    }

    /// Cancel a pending build. Returns whether it was pending.
    ///
    /// A build that has not started yet is skipped; one already running
    /// finishes and its result is discarded.
    pub fn cancel(&mut self, coord: ChunkCoord) -> bool {
        if !self.pending.remove(&coord) {
            return false;
        }
        lock(&self.cancelled).insert(coord);
        true
    }
}

impl Drop for ChunkLoader {
    fn drop(&mut self) {
        // Closing the channel lets the worker exit; running builds are abandoned
        self.request_tx.take();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
