//! Per-path sequential work queues
//!
//! Work for one path runs strictly in submission order, one unit at a time;
//! different paths proceed concurrently. A lane's worker is spawned on the
//! first submission and retires when its queue drains. Workers are detached:
//! lifecycle calls never cancel work that has already been handed over.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// Processing step run inside a lane
#[async_trait]
pub trait LaneProcessor<J>: Send + Sync + 'static {
    async fn process(&self, job: J);
}

/// Lane table: presence of a key means a worker is running for that path
pub struct PathLanes<J, P> {
    queues: Arc<DashMap<PathBuf, VecDeque<J>>>,
    processor: Arc<P>,
}

impl<J, P> PathLanes<J, P>
where
    J: Send + Sync + 'static,
    P: LaneProcessor<J>,
{
    pub fn new(processor: Arc<P>) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            processor,
        }
    }

    /// Queue `job` behind any work already pending for `path`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, path: PathBuf, job: J) {
        match self.queues.entry(path.clone()) {
            Entry::Occupied(mut running) => running.get_mut().push_back(job),
            Entry::Vacant(idle) => {
                idle.insert(VecDeque::new());
                let queues = Arc::clone(&self.queues);
                let processor = Arc::clone(&self.processor);
                tokio::spawn(run_lane(queues, processor, path, job));
            }
        }
    }

    /// Number of paths with work queued or running
    pub fn active(&self) -> usize {
        self.queues.len()
    }
}

impl<J, P> Clone for PathLanes<J, P> {
    fn clone(&self) -> Self {
        Self {
            queues: Arc::clone(&self.queues),
            processor: Arc::clone(&self.processor),
        }
    }
}

async fn run_lane<J, P>(
    queues: Arc<DashMap<PathBuf, VecDeque<J>>>,
    processor: Arc<P>,
    path: PathBuf,
    first: J,
) where
    J: Send + Sync + 'static,
    P: LaneProcessor<J>,
{
    let mut job = first;
    loop {
        processor.process(job).await;

        // Pop-or-retire under the entry lock so a concurrent submit either
        // lands in our queue or finds the lane gone and spawns a new worker
        job = match queues.entry(path.clone()) {
            Entry::Occupied(mut lane) => match lane.get_mut().pop_front() {
                Some(next) => next,
                None => {
                    lane.remove();
                    return;
                }
            },
            Entry::Vacant(_) => return,
        };
    }
}
