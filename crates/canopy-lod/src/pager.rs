//! Database pager: the [`TileLoadScheduler`] that streams paged children in.
//!
//! Paged nodes queue requests during traversal. Once per frame
//! [`DatabasePager::update`] hands the most wanted ones to a pool of worker
//! threads, and [`DatabasePager::merge_completed`] attaches finished subtrees
//! back on the traversal thread. Workers never touch the scene graph; they
//! only see the shared request handle and its `expired` flag.

use std::any::Any;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use canopy_scene::{
    FrameStamp, LoadError, LoadRequest, Node, NodeId, RequestHandle, SceneNode, TileLoadScheduler, TileRequest,
    TileSource,
};
use tracing::{debug, info, warn};

use crate::paged_lod::PagedLodNode;

/// Turns a resource path into a subtree. Asset decoding lives behind this trait.
pub trait TileReader: Send + Sync {
    fn read_tile(&self, path: &str) -> Result<Node, LoadError>;
}

/// Tuning of the pager.
#[derive(Clone, Debug, PartialEq)]
pub struct PagerSettings {
    /// Number of loader threads.
    pub worker_threads: usize,
    /// Maximum number of requests handed to workers and not yet merged back.
    pub max_in_flight: usize,
    /// Maximum number of requests dispatched by one [`DatabasePager::update`].
    pub max_requests_per_frame: usize,
    /// Seconds a paged child must stay unused before it may be evicted.
    pub expiry_delay: f64,
    /// Frames a paged child must stay unused before it may be evicted.
    pub expiry_frames: u64,
}

impl Default for PagerSettings {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().saturating_sub(1).max(1),
            max_in_flight: 16,
            max_requests_per_frame: 4,
            expiry_delay: 10.0,
            expiry_frames: 60,
        }
    }
}

/// Totals of one [`DatabasePager::merge_completed`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub attached: usize,
    /// Results dropped because their request was orphaned or superseded.
    pub discarded: usize,
    pub failed: usize,
}

struct LoadTask {
    request: RequestHandle,
    source: TileSource,
}

enum Completion {
    Loaded(Node),
    Failed(LoadError),
    /// The request expired before a worker picked it up.
    Skipped,
}

struct LoadOutcome {
    request: RequestHandle,
    completion: Completion,
}

pub struct DatabasePager {
    task_sender: Option<crossbeam_channel::Sender<LoadTask>>,
    result_receiver: crossbeam_channel::Receiver<LoadOutcome>,
    worker_handles: Vec<JoinHandle<()>>,
    pending: Vec<LoadTask>,
    in_flight: usize,
    settings: PagerSettings,
    accept_requests: bool,
}

/// Run the task's loader. A panicking loader fails the request instead of
/// taking the worker down with it.
fn load_tile(task: &LoadTask, reader: &dyn TileReader) -> Result<Node, LoadError> {
    let path = task.request.path();
    let result = panic::catch_unwind(AssertUnwindSafe(|| match &task.source {
        TileSource::Function(loader) => loader(),
        TileSource::File(_) => reader.read_tile(path),
    }));
    result.unwrap_or_else(|payload| {
        Err(LoadError::Decode {
            path: path.to_string(),
            message: format!("loader panicked: {}", panic_message(payload.as_ref())),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

impl DatabasePager {
    /// Spawn the worker threads. File-backed requests are read with `reader`.
    pub fn new(settings: PagerSettings, reader: Arc<dyn TileReader>) -> Self {
        let worker_count = settings.worker_threads.max(1);
        let (task_tx, task_rx) = crossbeam_channel::bounded::<LoadTask>(settings.max_in_flight.max(1));
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let reader = Arc::clone(&reader);

            handles.push(std::thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let completion = if task.request.is_expired() {
                        Completion::Skipped
                    } else {
                        match load_tile(&task, reader.as_ref()) {
                            Ok(node) => Completion::Loaded(node),
                            Err(err) => Completion::Failed(err),
                        }
                    };
                    let _ = tx.send(LoadOutcome {
                        request: task.request,
                        completion,
                    });
                }
            }));
        }

        info!(workers = worker_count, max_in_flight = settings.max_in_flight, "database pager started");

        Self {
            task_sender: Some(task_tx),
            result_receiver: result_rx,
            worker_handles: handles,
            pending: Vec::new(),
            in_flight: 0,
            settings,
            accept_requests: true,
        }
    }

    pub fn settings(&self) -> &PagerSettings {
        &self.settings
    }

    /// While paused, [`TileLoadScheduler::request_load`] rejects every request.
    pub fn set_accept_requests(&mut self, accept: bool) {
        self.accept_requests = accept;
    }

    pub fn accepts_requests(&self) -> bool {
        self.accept_requests
    }

    /// Requests queued and not yet handed to a worker.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Requests handed to workers whose results were not merged yet.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight_count() == 0
    }

    /// Dispatch the most wanted pending requests to the workers.
    ///
    /// Requests orphaned since they were queued are dropped. The remaining
    /// ones go out most recently refreshed first, then by priority, within
    /// the per-frame and in-flight budgets. Returns the number dispatched.
    pub fn update(&mut self, frame_stamp: FrameStamp) -> usize {
        let queued = self.pending.len();
        self.pending.retain(|task| !task.request.is_expired());
        if self.pending.len() < queued {
            debug!(dropped = queued - self.pending.len(), "dropped orphaned requests");
        }

        self.pending.sort_by(|a, b| compare_requests(&a.request, &b.request));

        let room = self.settings.max_in_flight.saturating_sub(self.in_flight_count());
        let count = self.pending.len().min(room).min(self.settings.max_requests_per_frame);
        let batch: Vec<LoadTask> = self.pending.drain(..count).collect();

        let mut dispatched = 0;
        for task in batch {
            if self.submit(task) {
                dispatched += 1;
            }
        }
        if dispatched > 0 {
            debug!(frame = frame_stamp.frame_number, dispatched, pending = self.pending.len(), "dispatched tile loads");
        }
        dispatched
    }

    fn submit(&mut self, task: LoadTask) -> bool {
        let Some(sender) = &self.task_sender else {
            return false;
        };
        if sender.send(task).is_err() {
            return false;
        }
        self.in_flight += 1;
        true
    }

    fn drain_results(&mut self) -> Vec<LoadOutcome> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_receiver.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            results.push(result);
        }
        results
    }

    /// Attach every finished load below `root`. Must run on the traversal thread.
    pub fn merge_completed(&mut self, root: &mut dyn SceneNode) -> MergeReport {
        let mut report = MergeReport::default();
        for outcome in self.drain_results() {
            let request = &outcome.request;
            match outcome.completion {
                Completion::Skipped => {
                    report.discarded += 1;
                }
                Completion::Failed(err) => {
                    warn!(path = request.path(), error = %err, "tile load failed");
                    if let Some(target) = find_paged_lod(root, request.group()) {
                        target.load_failed(request);
                    }
                    report.failed += 1;
                }
                Completion::Loaded(node) => {
                    let attached = match find_paged_lod(root, request.group()) {
                        Some(target) => target.attach_loaded(request, node),
                        None => false,
                    };
                    if attached {
                        report.attached += 1;
                    } else {
                        debug!(path = request.path(), group = %request.group(), "discarded orphaned tile");
                        report.discarded += 1;
                    }
                }
            }
        }
        report
    }

    /// Evict idle paged children below `root` and return them.
    ///
    /// A child expires once it has been unused for both `expiry_delay`
    /// seconds and `expiry_frames` frames, on top of the node's own delays.
    /// Requests issued from inside the evicted subtrees are orphaned.
    pub fn remove_expired_subgraphs(&mut self, root: &mut dyn SceneNode, frame_stamp: FrameStamp) -> Vec<Node> {
        let expiry_time = frame_stamp.simulation_time - self.settings.expiry_delay;
        let expiry_frame = frame_stamp.frame_number.saturating_sub(self.settings.expiry_frames);

        let mut removed = Vec::new();
        for_each_paged_lod(root, &mut |node| {
            node.remove_expired_children(expiry_time, expiry_frame, &mut removed);
        });

        for child in &removed {
            orphan_requests(child.as_ref());
        }
        if !removed.is_empty() {
            debug!(frame = frame_stamp.frame_number, removed = removed.len(), "expired paged children");
        }
        removed
    }

    /// Stop the workers; queued requests are dropped.
    pub fn shutdown(&mut self) {
        self.pending.clear();
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for DatabasePager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TileLoadScheduler for DatabasePager {
    fn request_load(&mut self, request: TileRequest) -> Option<RequestHandle> {
        if !self.accept_requests {
            return None;
        }
        let handle = Arc::new(LoadRequest::new(request.group, request.slot, request.path, request.state));
        debug!(path = handle.path(), slot = handle.slot(), priority = handle.priority(), "queued tile request");
        self.pending.push(LoadTask {
            request: Arc::clone(&handle),
            source: request.source,
        });
        Some(handle)
    }
}

/// Most recently refreshed first, then highest priority.
fn compare_requests(a: &LoadRequest, b: &LoadRequest) -> Ordering {
    let (a, b) = (a.state(), b.state());
    b.time_stamp
        .partial_cmp(&a.time_stamp)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.priority.partial_cmp(&a.priority).unwrap_or(Ordering::Equal))
}

/// Find the paged node with `id` in the subtree rooted at `node`.
pub fn find_paged_lod(node: &mut dyn SceneNode, id: NodeId) -> Option<&mut PagedLodNode> {
    if node.id() == id {
        return node.as_any_mut().downcast_mut::<PagedLodNode>();
    }
    for child in node.children_mut() {
        if let Some(found) = find_paged_lod(child.as_mut(), id) {
            return Some(found);
        }
    }
    None
}

fn for_each_paged_lod(node: &mut dyn SceneNode, f: &mut dyn FnMut(&mut PagedLodNode)) {
    if let Some(paged) = node.as_any_mut().downcast_mut::<PagedLodNode>() {
        f(paged);
    }
    for child in node.children_mut() {
        for_each_paged_lod(child.as_mut(), f);
    }
}

fn orphan_requests(node: &dyn SceneNode) {
    if let Some(paged) = node.as_any().downcast_ref::<PagedLodNode>() {
        paged.mark_requests_expired();
    }
    for child in node.children() {
        orphan_requests(child.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use canopy_scene::{BoundingSphere, CullVisitor, Geometry, Group, RequestState, Viewport, accept};
    use glam::{Mat4, Vec3};

    use crate::paged_lod::SlotState;

    /// Serves geometry leaves named after the requested path.
    #[derive(Default)]
    struct MemoryReader {
        missing: Vec<String>,
        reads: Mutex<Vec<String>>,
    }

    impl TileReader for MemoryReader {
        fn read_tile(&self, path: &str) -> Result<Node, LoadError> {
            self.reads.lock().unwrap().push(path.to_string());
            if self.missing.iter().any(|missing| missing == path) {
                return Err(LoadError::NotFound { path: path.to_string() });
            }
            Ok(Geometry::new(path, BoundingSphere::new(Vec3::ZERO, 1.0)).boxed())
        }
    }

    fn settings(workers: usize, per_frame: usize) -> PagerSettings {
        PagerSettings {
            worker_threads: workers,
            max_in_flight: 8,
            max_requests_per_frame: per_frame,
            expiry_delay: 1.0,
            expiry_frames: 2,
        }
    }

    fn paged_tile(file: &str) -> PagedLodNode {
        let mut node = PagedLodNode::new();
        node.set_center(Vec3::ZERO);
        node.set_radius(1.0);
        node.set_database_path("db/");
        node.add_child(Geometry::new("coarse", BoundingSphere::new(Vec3::ZERO, 1.0)).boxed(), 0.0, 100.0);
        node.set_range(1, 100.0, f32::INFINITY);
        node.set_file_name(1, file);
        node
    }

    fn cull(root: &mut Group, pager: &mut DatabasePager, frame: u64, distance: f32) -> Vec<NodeId> {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -distance));
        let mut visitor = CullVisitor::new(view, Mat4::IDENTITY, Viewport::default())
            .with_frame_stamp(FrameStamp::new(frame, frame as f64))
            .with_scheduler(pager);
        accept(root, &mut visitor);
        visitor.draw_list().to_vec()
    }

    fn merge_until(pager: &mut DatabasePager, root: &mut Group, expected: usize) -> MergeReport {
        let mut total = MergeReport::default();
        let start = Instant::now();
        while total.attached + total.discarded + total.failed < expected {
            let report = pager.merge_completed(root);
            total.attached += report.attached;
            total.discarded += report.discarded;
            total.failed += report.failed;
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for tile loads");
            std::thread::sleep(Duration::from_millis(1));
        }
        total
    }

    #[test]
    fn test_request_is_queued_until_update() {
        let mut pager = DatabasePager::new(settings(1, 4), Arc::new(MemoryReader::default()));
        let mut root = Group::new();
        root.add_child(Box::new(paged_tile("a.bin")));

        cull(&mut root, &mut pager, 1, 150.0);
        assert_eq!(pager.pending_count(), 1);
        assert_eq!(pager.in_flight_count(), 0);

        assert_eq!(pager.update(FrameStamp::new(1, 1.0)), 1);
        assert_eq!(pager.pending_count(), 0);
    }

    #[test]
    fn test_completed_load_is_attached_to_requesting_node() {
        let reader = Arc::new(MemoryReader::default());
        let mut pager = DatabasePager::new(settings(2, 4), reader.clone());
        let mut root = Group::new();
        let tile = paged_tile("a.bin");
        let tile_id = tile.id();
        root.add_child(Box::new(tile));

        cull(&mut root, &mut pager, 1, 150.0);
        pager.update(FrameStamp::new(1, 1.0));
        let report = merge_until(&mut pager, &mut root, 1);
        assert_eq!(report.attached, 1);
        assert!(pager.is_idle());
        assert_eq!(reader.reads.lock().unwrap().as_slice(), &["db/a.bin".to_string()]);

        let node = find_paged_lod(&mut root, tile_id).unwrap();
        assert_eq!(node.slot_state(1), SlotState::Loaded);
        assert_eq!(cull(&mut root, &mut pager, 2, 150.0).len(), 1);
        assert_eq!(pager.pending_count(), 0);
    }

    #[test]
    fn test_function_source_runs_on_worker() {
        let mut pager = DatabasePager::new(settings(1, 4), Arc::new(MemoryReader::default()));
        let mut node = PagedLodNode::new();
        node.set_center(Vec3::ZERO);
        node.set_radius(1.0);
        node.set_range(0, 0.0, f32::INFINITY);
        node.set_function(
            0,
            Arc::new(|| Ok::<Node, LoadError>(Geometry::new("generated", BoundingSphere::new(Vec3::ZERO, 2.0)).boxed())),
        );
        let mut root = Group::new();
        root.add_child(Box::new(node));

        assert!(cull(&mut root, &mut pager, 1, 10.0).is_empty());
        pager.update(FrameStamp::new(1, 1.0));
        assert_eq!(merge_until(&mut pager, &mut root, 1).attached, 1);
        assert_eq!(cull(&mut root, &mut pager, 2, 10.0).len(), 1);
    }

    #[test]
    fn test_paused_pager_rejects_requests() {
        let mut pager = DatabasePager::new(settings(1, 4), Arc::new(MemoryReader::default()));
        pager.set_accept_requests(false);
        let request = TileRequest {
            source: TileSource::File("a.bin".into()),
            path: "a.bin".into(),
            group: NodeId::next(),
            slot: 1,
            state: RequestState::default(),
        };
        assert!(pager.request_load(request).is_none());
        assert_eq!(pager.pending_count(), 0);
    }

    #[test]
    fn test_orphaned_request_is_never_loaded() {
        let reader = Arc::new(MemoryReader::default());
        let mut pager = DatabasePager::new(settings(1, 4), reader.clone());
        let handle = pager
            .request_load(TileRequest {
                source: TileSource::File("a.bin".into()),
                path: "a.bin".into(),
                group: NodeId::next(),
                slot: 1,
                state: RequestState::default(),
            })
            .unwrap();

        handle.mark_expired();
        assert_eq!(pager.update(FrameStamp::new(1, 1.0)), 0);
        assert!(pager.is_idle());
        assert!(reader.reads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_result_for_missing_group_is_discarded() {
        let mut pager = DatabasePager::new(settings(1, 4), Arc::new(MemoryReader::default()));
        pager.request_load(TileRequest {
            source: TileSource::File("a.bin".into()),
            path: "a.bin".into(),
            group: NodeId::next(),
            slot: 1,
            state: RequestState::default(),
        });
        pager.update(FrameStamp::new(1, 1.0));
        let mut root = Group::new();
        let report = merge_until(&mut pager, &mut root, 1);
        assert_eq!(report.discarded, 1);
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_failed_load_is_retried() {
        let reader = Arc::new(MemoryReader {
            missing: vec!["db/broken.bin".to_string()],
            ..Default::default()
        });
        let mut pager = DatabasePager::new(settings(1, 4), reader.clone());
        let mut root = Group::new();
        root.add_child(Box::new(paged_tile("broken.bin")));

        cull(&mut root, &mut pager, 1, 150.0);
        pager.update(FrameStamp::new(1, 1.0));
        assert_eq!(merge_until(&mut pager, &mut root, 1).failed, 1);

        // the next traversal notices the missing handle, the one after asks again
        cull(&mut root, &mut pager, 2, 150.0);
        assert_eq!(pager.pending_count(), 0);
        cull(&mut root, &mut pager, 3, 150.0);
        assert_eq!(pager.pending_count(), 1);
    }

    #[test]
    fn test_panicking_loader_fails_and_is_retried() {
        let mut pager = DatabasePager::new(settings(1, 4), Arc::new(MemoryReader::default()));
        let mut tile = paged_tile("unused.bin");
        tile.set_function(1, Arc::new(|| -> Result<Node, LoadError> { panic!("decoder bug") }));
        let tile_id = tile.id();
        let mut root = Group::new();
        root.add_child(Box::new(tile));

        cull(&mut root, &mut pager, 1, 150.0);
        pager.update(FrameStamp::new(1, 1.0));
        assert_eq!(merge_until(&mut pager, &mut root, 1).failed, 1);
        assert_eq!(pager.in_flight_count(), 0);
        assert!(find_paged_lod(&mut root, tile_id).unwrap().request(1).is_none());

        cull(&mut root, &mut pager, 2, 150.0);
        assert_eq!(find_paged_lod(&mut root, tile_id).unwrap().slot_state(1), SlotState::Unloaded);

        // the single worker survived and serves the retry
        cull(&mut root, &mut pager, 3, 150.0);
        assert_eq!(pager.pending_count(), 1);
        pager.update(FrameStamp::new(3, 3.0));
        assert_eq!(merge_until(&mut pager, &mut root, 1).failed, 1);
    }

    #[test]
    fn test_update_prefers_recent_then_high_priority() {
        let reader = Arc::new(MemoryReader::default());
        let mut pager = DatabasePager::new(settings(1, 1), reader.clone());
        for (path, time_stamp, priority) in [("old", 1.0, 5.0), ("low", 2.0, -1.0), ("high", 2.0, 3.0)] {
            pager.request_load(TileRequest {
                source: TileSource::File(path.into()),
                path: path.into(),
                group: NodeId::next(),
                slot: 0,
                state: RequestState {
                    priority,
                    time_stamp,
                    ..Default::default()
                },
            });
        }

        let mut root = Group::new();
        for frame in 1..=3 {
            assert_eq!(pager.update(FrameStamp::new(frame, 2.0)), 1);
            merge_until(&mut pager, &mut root, 1);
        }
        assert_eq!(reader.reads.lock().unwrap().as_slice(), &["high", "low", "old"]);
    }

    #[test]
    fn test_update_respects_in_flight_budget() {
        let mut pager = DatabasePager::new(
            PagerSettings {
                max_in_flight: 2,
                ..settings(1, 10)
            },
            Arc::new(MemoryReader::default()),
        );
        for i in 0..5 {
            pager.request_load(TileRequest {
                source: TileSource::File(format!("{i}.bin")),
                path: format!("{i}.bin"),
                group: NodeId::next(),
                slot: 0,
                state: RequestState::default(),
            });
        }
        assert_eq!(pager.update(FrameStamp::new(1, 0.0)), 2);
        assert_eq!(pager.pending_count(), 3);
        assert_eq!(pager.update(FrameStamp::new(2, 0.0)), 0);
    }

    #[test]
    fn test_idle_children_expire_and_orphan_nested_requests() {
        let mut pager = DatabasePager::new(settings(1, 4), Arc::new(MemoryReader::default()));
        let mut outer = paged_tile("outer.bin");
        let outer_id = outer.id();
        let nested = paged_tile("nested.bin");
        let nested_id = nested.id();
        outer.add_child(Box::new(nested), 100.0, f32::INFINITY);

        let mut root = Group::new();
        root.add_child(Box::new(outer));

        // the nested node asks for its own deeper level
        cull(&mut root, &mut pager, 1, 150.0);
        let nested_request = find_paged_lod(&mut root, nested_id)
            .and_then(|node| node.request(1).cloned())
            .unwrap();
        assert_eq!(pager.pending_count(), 1);

        assert!(pager.remove_expired_subgraphs(&mut root, FrameStamp::new(3, 2.0)).is_empty());
        let removed = pager.remove_expired_subgraphs(&mut root, FrameStamp::new(10, 10.0));
        assert_eq!(removed.len(), 1);
        assert!(nested_request.is_expired());

        let outer = find_paged_lod(&mut root, outer_id).unwrap();
        assert_eq!(outer.slot_state(1), SlotState::Unloaded);
        assert_eq!(pager.update(FrameStamp::new(10, 10.0)), 0);
        assert_eq!(pager.pending_count(), 0);
    }
}
