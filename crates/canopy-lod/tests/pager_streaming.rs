//! End-to-end streaming: paged tiles on disk are requested while the camera
//! approaches, merged back into the graph, then evicted once it leaves.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canopy_lod::{DatabasePager, PagedLodNode, PagerSettings, SlotState, TileReader, find_paged_lod};
use canopy_scene::{
    BoundingSphere, CullVisitor, FrameStamp, Geometry, Group, LoadError, Node, NodeId, SceneNode, Viewport, accept,
};
use glam::{Mat4, Vec3};

/// Reads `<root>/<path>`; the file holds the radius of the tile's geometry.
struct DirectoryReader {
    root: PathBuf,
}

impl TileReader for DirectoryReader {
    fn read_tile(&self, path: &str) -> Result<Node, LoadError> {
        let text = fs::read_to_string(self.root.join(path))?;
        let radius: f32 = text.trim().parse().map_err(|err: std::num::ParseFloatError| LoadError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Ok(Geometry::new(path, BoundingSphere::new(Vec3::ZERO, radius)).boxed())
    }
}

fn tile(x: f32, file: &str) -> PagedLodNode {
    let mut node = PagedLodNode::new();
    node.set_center(Vec3::new(x, 0.0, 0.0));
    node.set_radius(1.0);
    node.set_database_path("tiles/");
    node.add_child(Geometry::new("coarse", BoundingSphere::new(Vec3::new(x, 0.0, 0.0), 1.0)).boxed(), 50.0, f32::INFINITY);
    node.set_range(1, 0.0, 50.0);
    node.set_file_name(1, file);
    node
}

fn frame(root: &mut Group, pager: &mut DatabasePager, stamp: FrameStamp, eye_z: f32) -> Vec<NodeId> {
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, eye_z), Vec3::ZERO, Vec3::Y);
    let mut visitor = CullVisitor::new(view, Mat4::IDENTITY, Viewport::default())
        .with_frame_stamp(stamp)
        .with_scheduler(pager);
    accept(root, &mut visitor);
    visitor.draw_list().to_vec()
}

fn wait_for_merges(pager: &mut DatabasePager, root: &mut Group) {
    let start = Instant::now();
    while !pager.is_idle() {
        pager.merge_completed(root);
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for tiles");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_tiles_stream_in_and_expire() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("tiles")).unwrap();
    fs::write(dir.path().join("tiles/left.tile"), "2.0").unwrap();
    fs::write(dir.path().join("tiles/right.tile"), "2.5").unwrap();

    let mut pager = DatabasePager::new(
        PagerSettings {
            worker_threads: 2,
            max_in_flight: 4,
            max_requests_per_frame: 4,
            expiry_delay: 1.0,
            expiry_frames: 5,
        },
        Arc::new(DirectoryReader {
            root: dir.path().to_path_buf(),
        }),
    );

    let left = tile(-5.0, "left.tile");
    let right = tile(5.0, "right.tile");
    let (left_id, right_id) = (left.id(), right.id());
    let mut root = Group::new();
    root.add_child(Box::new(left));
    root.add_child(Box::new(right));

    // far away: only coarse levels, nothing requested
    let drawn = frame(&mut root, &mut pager, FrameStamp::new(1, 0.1), 500.0);
    assert_eq!(drawn.len(), 2);
    assert_eq!(pager.pending_count(), 0);

    // close: coarse levels stand in while the detailed tiles load
    let drawn = frame(&mut root, &mut pager, FrameStamp::new(2, 0.2), 10.0);
    assert_eq!(drawn.len(), 2);
    assert_eq!(pager.pending_count(), 2);
    assert_eq!(pager.update(FrameStamp::new(2, 0.2)), 2);

    // further frames refresh the in-flight requests instead of adding more
    frame(&mut root, &mut pager, FrameStamp::new(3, 0.3), 12.0);
    assert_eq!(pager.pending_count(), 0);

    wait_for_merges(&mut pager, &mut root);
    for id in [left_id, right_id] {
        assert_eq!(find_paged_lod(&mut root, id).unwrap().slot_state(1), SlotState::Loaded);
    }
    let detailed = frame(&mut root, &mut pager, FrameStamp::new(4, 0.4), 10.0);
    assert_eq!(detailed.len(), 2);
    assert!(detailed.iter().all(|id| !drawn.contains(id)));

    // camera leaves; the detailed tiles go stale and are evicted
    let mut simulation_time = 0.4;
    let mut evicted = 0;
    for frame_number in 5..20 {
        simulation_time += 0.25;
        let stamp = FrameStamp::new(frame_number, simulation_time);
        frame(&mut root, &mut pager, stamp, 500.0);
        evicted += pager.remove_expired_subgraphs(&mut root, stamp).len();
    }
    assert_eq!(evicted, 2);
    for id in [left_id, right_id] {
        let node = find_paged_lod(&mut root, id).unwrap();
        assert_eq!(node.slot_state(1), SlotState::Unloaded);
        assert_eq!(node.num_children(), 1);
    }
    assert!(pager.is_idle());
}

#[test]
fn test_missing_tile_file_is_reported_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut pager = DatabasePager::new(
        PagerSettings {
            worker_threads: 1,
            ..PagerSettings::default()
        },
        Arc::new(DirectoryReader {
            root: dir.path().to_path_buf(),
        }),
    );
    let mut root = Group::new();
    root.add_child(Box::new(tile(0.0, "absent.tile")));

    frame(&mut root, &mut pager, FrameStamp::new(1, 0.0), 5.0);
    pager.update(FrameStamp::new(1, 0.0));

    let start = Instant::now();
    let mut failed = 0;
    while failed == 0 {
        failed += pager.merge_completed(&mut root).failed;
        assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for failure");
        std::thread::sleep(Duration::from_millis(1));
    }

    frame(&mut root, &mut pager, FrameStamp::new(2, 0.1), 5.0);
    frame(&mut root, &mut pager, FrameStamp::new(3, 0.2), 5.0);
    assert_eq!(pager.pending_count(), 1);
}
