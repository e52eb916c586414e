//! Contract between paged level-of-detail nodes and the scheduler that streams
//! their children in.
//!
//! A node owns the [`RequestHandle`] of its in-flight load. The scheduler
//! shares the same handle and reads the `expired` flag before doing work or
//! attaching a result, so it never needs a reference to the node itself.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::node::{Node, NodeId};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Errors produced while loading a tile.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("tile not found: {path}")]
    NotFound { path: String },

    #[error("failed to decode tile '{path}': {message}")]
    Decode { path: String, message: String },

    #[error("failed to read tile: {0}")]
    Io(#[from] std::io::Error),
}

/// Function producing a subtree in place of reading a file.
pub type LoaderFn = Arc<dyn Fn() -> Result<Node, LoadError> + Send + Sync>;

/// Where the content of a paged slot comes from.
#[derive(Clone)]
pub enum TileSource {
    /// Path relative to the owning node's database path.
    File(String),
    /// Programmatic loader.
    Function(LoaderFn),
}

impl fmt::Debug for TileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileSource::File(name) => f.debug_tuple("File").field(name).finish(),
            TileSource::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Scheduling fields of a request; refreshed in place while the request waits.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RequestState {
    pub priority: f32,
    /// Simulation time of the last traversal that still wanted this tile.
    pub time_stamp: f64,
    /// Length of the node path when the request was last refreshed.
    pub depth: usize,
    pub required_range: f32,
    pub distance: f32,
}

/// One outstanding asynchronous tile fetch.
#[derive(Debug)]
pub struct LoadRequest {
    id: u64,
    group: NodeId,
    slot: usize,
    path: String,
    state: Mutex<RequestState>,
    expired: AtomicBool,
}

/// Shared handle to a [`LoadRequest`].
pub type RequestHandle = Arc<LoadRequest>;

impl LoadRequest {
    /// Create a request for `slot` of the paged node `group`.
    pub fn new(group: NodeId, slot: usize, path: impl Into<String>, state: RequestState) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            group,
            slot,
            path: path.into(),
            state: Mutex::new(state),
            expired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Node the loaded subtree must be attached to.
    pub fn group(&self) -> NodeId {
        self.group
    }

    /// Child slot the loaded subtree fills.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Resource path including the owning node's database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Snapshot of the scheduling fields.
    pub fn state(&self) -> RequestState {
        *self.lock_state()
    }

    pub fn priority(&self) -> f32 {
        self.lock_state().priority
    }

    pub fn time_stamp(&self) -> f64 {
        self.lock_state().time_stamp
    }

    /// Overwrite the scheduling fields of a request that is still wanted.
    pub fn refresh(&self, state: RequestState) {
        *self.lock_state() = state;
    }

    /// Whether the requesting slot was evicted; the result must be discarded.
    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn mark_expired(&self) {
        self.expired.store(true, Ordering::Release);
    }

    fn lock_state(&self) -> MutexGuard<'_, RequestState> {
        // the state is plain data, a poisoned lock still holds a usable value
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parameters of a new load request.
#[derive(Clone, Debug)]
pub struct TileRequest {
    pub source: TileSource,
    /// Database path joined with the slot's file name.
    pub path: String,
    pub group: NodeId,
    pub slot: usize,
    pub state: RequestState,
}

/// External loader capability consumed by paged nodes.
pub trait TileLoadScheduler {
    /// Queue a load and return immediately.
    ///
    /// `None` means the scheduler did not accept the request; the node retries
    /// on a later traversal.
    fn request_load(&mut self, request: TileRequest) -> Option<RequestHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let group = NodeId::next();
        let a = LoadRequest::new(group, 1, "a", RequestState::default());
        let b = LoadRequest::new(group, 1, "a", RequestState::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_refresh_updates_state_in_place() {
        let request = Arc::new(LoadRequest::new(
            NodeId::next(),
            2,
            "tiles/a.bin",
            RequestState {
                priority: 0.1,
                time_stamp: 1.0,
                depth: 3,
                required_range: 50.0,
                distance: 50.0,
            },
        ));
        let shared = Arc::clone(&request);
        shared.refresh(RequestState {
            priority: 0.5,
            time_stamp: 2.0,
            depth: 4,
            required_range: 20.0,
            distance: 20.0,
        });
        assert_eq!(request.priority(), 0.5);
        assert_eq!(request.time_stamp(), 2.0);
        assert_eq!(request.state().depth, 4);
        assert_eq!(request.slot(), 2);
        assert_eq!(request.path(), "tiles/a.bin");
    }

    #[test]
    fn test_expired_flag_is_shared() {
        let request = Arc::new(LoadRequest::new(NodeId::next(), 0, "x", RequestState::default()));
        let seen_by_pager = Arc::clone(&request);
        assert!(!seen_by_pager.is_expired());
        request.mark_expired();
        assert!(seen_by_pager.is_expired());
    }

    #[test]
    fn test_tile_source_debug_hides_closure() {
        let source = TileSource::Function(Arc::new(|| {
            Err(LoadError::NotFound {
                path: "generated".to_string(),
            })
        }));
        assert_eq!(format!("{source:?}"), "Function(..)");
        assert_eq!(
            format!("{:?}", TileSource::File("a.bin".into())),
            "File(\"a.bin\")"
        );
    }
}
