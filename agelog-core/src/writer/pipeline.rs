//! Parallel compression with strictly ordered writeback.
//!
//! The producer submits indexed blocks into a bounded inbound queue; P
//! compressor threads deflate blocks independently and push the
//! results onto an outbound queue; one writer thread parks
//! out-of-order completions in a reorder buffer and writes blocks to
//! the file in ascending index order. Both queues, the submission
//! index, and the failure slot live behind a single mutex paired with
//! one condition variable.

use std::{
    collections::{BTreeMap, VecDeque},
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
};

use flate2::{Compression, write::DeflateEncoder};
use tracing::trace;

use super::{OperationBlock, WriterError};

enum CompressorTask {
    Block { block: OperationBlock, index: u64 },
    Shutdown,
}

enum WriterTask {
    Compressed { bytes: Vec<u8>, index: u64 },
    Shutdown,
}

#[derive(Default)]
struct PipelineState {
    inbound: VecDeque<CompressorTask>,
    outbound: VecDeque<WriterTask>,
    next_submit_index: u64,
    failure: Option<WriterError>,
    failed: bool,
}

impl PipelineState {
    fn fail(&mut self, error: WriterError) {
        if !self.failed {
            self.failure = Some(error);
            self.failed = true;
        }
    }

    fn take_failure(&mut self) -> Option<WriterError> {
        if self.failed {
            Some(self.failure.take().unwrap_or(WriterError::WorkerFailed))
        } else {
            None
        }
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    signal: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, PipelineState>, WriterError> {
        self.state.lock().map_err(|_| WriterError::WorkerPanicked {
            worker: "pipeline peer",
        })
    }
}

/// Handle to the running compression workers. Created by
/// [`LogWriter::open_edge_stream`](super::LogWriter::open_edge_stream)
/// and consumed by the matching close.
#[derive(Debug)]
pub(super) struct Pipeline {
    shared: Arc<Shared>,
    compressors: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<File>>,
    max_pending: usize,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Spawns `compressors` deflate workers plus the ordering writer.
    pub(super) fn spawn(
        file: File,
        path: PathBuf,
        compressors: usize,
        max_pending: usize,
    ) -> Result<Self, WriterError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState::default()),
            signal: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(compressors);
        for worker in 0..compressors {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("agelog-compress-{worker}"))
                .spawn(move || compressor_main(&shared))
                .map_err(spawn_error)?;
            handles.push(handle);
        }

        let writer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("agelog-write".to_owned())
                .spawn(move || writer_main(&shared, file, path))
                .map_err(spawn_error)?
        };

        Ok(Self {
            shared,
            compressors: handles,
            writer: Some(writer),
            max_pending,
        })
    }

    /// Queues a block, blocking while the inbound queue is at capacity.
    pub(super) fn submit(&self, block: OperationBlock) -> Result<(), WriterError> {
        let mut state = self.shared.lock()?;
        loop {
            if let Some(error) = state.take_failure() {
                return Err(error);
            }
            if state.inbound.len() < self.max_pending {
                break;
            }
            state = self
                .shared
                .signal
                .wait(state)
                .map_err(|_| WriterError::WorkerPanicked {
                    worker: "pipeline peer",
                })?;
        }

        let index = state.next_submit_index;
        state.next_submit_index += 1;
        state.inbound.push_back(CompressorTask::Block { block, index });
        drop(state);
        self.shared.signal.notify_all();
        Ok(())
    }

    /// Drains both queues with sentinels, joins every worker, and
    /// returns the file handle.
    pub(super) fn shutdown(mut self) -> Result<File, WriterError> {
        {
            let mut state = self.shared.lock()?;
            for _ in 0..self.compressors.len() {
                state.inbound.push_back(CompressorTask::Shutdown);
            }
        }
        self.shared.signal.notify_all();

        let mut panicked = false;
        for handle in self.compressors.drain(..) {
            panicked |= handle.join().is_err();
        }

        {
            let mut state = self.shared.lock()?;
            state.outbound.push_back(WriterTask::Shutdown);
        }
        self.shared.signal.notify_all();

        let writer = self
            .writer
            .take()
            .expect("shutdown consumes the pipeline exactly once");
        let file = writer.join().map_err(|_| WriterError::WorkerPanicked {
            worker: "agelog-write",
        })?;

        if panicked {
            return Err(WriterError::WorkerPanicked {
                worker: "agelog-compress",
            });
        }
        if let Some(error) = self.shared.lock()?.take_failure() {
            return Err(error);
        }
        Ok(file)
    }
}

fn compressor_main(shared: &Shared) {
    loop {
        let task = {
            let Ok(mut state) = shared.state.lock() else {
                return;
            };
            loop {
                if state.failed {
                    return;
                }
                if let Some(task) = state.inbound.pop_front() {
                    break task;
                }
                let Ok(next) = shared.signal.wait(state) else {
                    return;
                };
                state = next;
            }
        };
        // The producer may be blocked on the queue-depth cap.
        shared.signal.notify_all();

        let (block, index) = match task {
            CompressorTask::Block { block, index } => (block, index),
            CompressorTask::Shutdown => return,
        };

        match compress_block(&block) {
            Ok(bytes) => {
                trace!(index, input = block.serialized_len(), output = bytes.len(), "block compressed");
                let Ok(mut state) = shared.state.lock() else {
                    return;
                };
                state.outbound.push_back(WriterTask::Compressed { bytes, index });
                drop(state);
                shared.signal.notify_all();
            }
            Err(error) => {
                if let Ok(mut state) = shared.state.lock() {
                    state.fail(error);
                }
                shared.signal.notify_all();
                return;
            }
        }
    }
}

/// Writes compressed blocks in submission order, parking early
/// completions in a reorder buffer until their predecessors arrive.
fn writer_main(shared: &Shared, mut file: File, path: PathBuf) -> File {
    let mut reorder: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
    let mut next_index = 0_u64;
    let mut draining = false;

    loop {
        let mut tasks = VecDeque::new();
        {
            let Ok(mut state) = shared.state.lock() else {
                return file;
            };
            loop {
                if state.failed {
                    return file;
                }
                if !state.outbound.is_empty() {
                    std::mem::swap(&mut tasks, &mut state.outbound);
                    break;
                }
                let Ok(next) = shared.signal.wait(state) else {
                    return file;
                };
                state = next;
            }
        }

        for task in tasks {
            match task {
                WriterTask::Compressed { bytes, index } => {
                    reorder.insert(index, bytes);
                }
                WriterTask::Shutdown => draining = true,
            }
        }

        while let Some(bytes) = reorder.remove(&next_index) {
            if let Err(source) = file.write_all(&bytes) {
                if let Ok(mut state) = shared.state.lock() {
                    state.fail(WriterError::Io {
                        path: path.clone(),
                        source,
                    });
                }
                shared.signal.notify_all();
                return file;
            }
            trace!(index = next_index, bytes = bytes.len(), "block written");
            next_index += 1;
        }

        if draining {
            if !reorder.is_empty() {
                if let Ok(mut state) = shared.state.lock() {
                    state.fail(WriterError::OutOfOrder {
                        operation: "close_edge_stream",
                        state: "missing blocks in the reorder buffer",
                    });
                }
                shared.signal.notify_all();
            }
            return file;
        }
    }
}

/// Deflates one block into an independent raw stream (no zlib or gzip
/// wrapper), level 9.
fn compress_block(block: &OperationBlock) -> Result<Vec<u8>, WriterError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(9));
    block
        .write_into(&mut encoder)
        .and_then(|()| encoder.finish())
        .map_err(|source| WriterError::Compression {
            message: source.to_string(),
        })
}

fn spawn_error(source: std::io::Error) -> WriterError {
    WriterError::Compression {
        message: format!("cannot spawn pipeline worker: {source}"),
    }
}
