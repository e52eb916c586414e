//! Headless demo: a camera flies down onto a grid of paged tiles and back up.
//!
//! Detail levels stream in through the database pager while it approaches and
//! are evicted once it leaves; shader variants are generated for every
//! resident mesh kind. Configuration is loaded from `config.ron` and can be
//! overridden via CLI flags, e.g. `cargo run -p canopy-demo -- --frames 600`.

mod tiles;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use canopy_config::{CliArgs, Config};
use canopy_lod::{DatabasePager, MergeReport, PagerSettings};
use canopy_scene::{CullVisitor, FrameStamp, GeometryCollector, Group, Viewport, accept};
use canopy_shader::ShaderVariantCache;
use clap::Parser;
use glam::{Mat4, Vec3};
use tracing::{error, info};

use crate::tiles::{ProceduralReader, build_grid, grid_center, shader_state_for};

/// Tiles per side of the grid.
const GRID: u32 = 8;
/// Simulated frame duration in seconds.
const FRAME_TIME: f64 = 1.0 / 60.0;
const HIGH_ALTITUDE: f32 = 900.0;
const LOW_ALTITUDE: f32 = 20.0;
/// Frames between status reports.
const REPORT_INTERVAL: u64 = 30;

fn pager_settings(config: &Config) -> PagerSettings {
    let defaults = PagerSettings::default();
    PagerSettings {
        worker_threads: match config.pager.worker_threads {
            0 => defaults.worker_threads,
            n => n,
        },
        max_in_flight: config.pager.max_in_flight,
        max_requests_per_frame: config.pager.max_requests_per_frame,
        expiry_delay: config.lod.expiry_delay_s,
        expiry_frames: config.lod.expiry_frames,
    }
}

/// Eye position: down to the grid during the first half, back up after.
fn camera_eye(frame: u64, frames: u64) -> Vec3 {
    let t = frame as f32 / frames.max(1) as f32;
    let descent = if t < 0.5 { t * 2.0 } else { (1.0 - t) * 2.0 };
    let altitude = HIGH_ALTITUDE + (LOW_ALTITUDE - HIGH_ALTITUDE) * descent;
    grid_center(GRID) + Vec3::new(0.0, altitude, altitude * 0.5)
}

/// Compile a shader variant for every resident mesh.
fn compile_resident_variants(root: &mut Group, cache: &mut ShaderVariantCache) {
    let mut collector = GeometryCollector::default();
    accept(root, &mut collector);
    for name in collector.names() {
        if let Err(err) = cache.get_or_compile(&shader_state_for(&name)) {
            error!(mesh = %name, %err, "shader variant failed");
        }
    }
}

fn run(config: &Config) {
    let mut pager = DatabasePager::new(pager_settings(config), Arc::new(ProceduralReader::new(GRID)));
    pager.set_accept_requests(config.pager.accept_requests);

    let mut root = build_grid(GRID, config.lod.expiry_delay_s, config.lod.expiry_frames);

    let (width, height) = (config.viewport.width as f32, config.viewport.height as f32);
    let viewport = Viewport::new(0.0, 0.0, width, height);
    let projection = Mat4::perspective_rh(45f32.to_radians(), width / height, 1.0, 5000.0);

    let mut cache = ShaderVariantCache::new(config.shader.cache_capacity);
    if !config.shader.fragment_shader_name.is_empty() {
        cache = cache.with_fragment_shader_name(config.shader.fragment_shader_name.clone());
    }

    let frames = config.debug.frames.max(1);
    let mut totals = MergeReport::default();
    let mut evicted = 0;

    for frame in 0..frames {
        let stamp = FrameStamp::new(frame, frame as f64 * FRAME_TIME);
        let view = Mat4::look_at_rh(camera_eye(frame, frames), grid_center(GRID), Vec3::Y);

        let drawn = {
            let mut visitor = CullVisitor::new(view, projection, viewport)
                .with_lod_scale(config.lod.lod_scale)
                .with_frame_stamp(stamp)
                .with_scheduler(&mut pager);
            accept(&mut root, &mut visitor);
            visitor.draw_list().len()
        };

        let dispatched = pager.update(stamp);
        let report = pager.merge_completed(&mut root);
        totals.attached += report.attached;
        totals.discarded += report.discarded;
        totals.failed += report.failed;
        evicted += pager.remove_expired_subgraphs(&mut root, stamp).len();

        if frame % REPORT_INTERVAL == 0 {
            compile_resident_variants(&mut root, &mut cache);
            info!(
                frame,
                drawn,
                dispatched,
                pending = pager.pending_count(),
                in_flight = pager.in_flight_count(),
                attached = totals.attached,
                evicted,
                "frame"
            );
        }

        // give the loader threads a slice of the frame
        std::thread::sleep(Duration::from_millis(2));
    }

    compile_resident_variants(&mut root, &mut cache);
    info!(
        attached = totals.attached,
        discarded = totals.discarded,
        failed = totals.failed,
        evicted,
        "streaming finished"
    );
    info!(
        variants = cache.len(),
        hits = cache.hits(),
        misses = cache.misses(),
        layouts = cache.registry().len(),
        "shader cache"
    );

    pager.shutdown();
}

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .or_else(Config::default_dir)
        .unwrap_or_else(|| PathBuf::from(".canopy"));

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    canopy_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(err) = config.validate() {
        error!(%err, "invalid configuration after CLI overrides, using defaults");
        config = Config::default();
    }

    info!(grid = GRID, frames = config.debug.frames, lod_scale = config.lod.lod_scale, "canopy demo starting");
    run(&config);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_descends_then_climbs() {
        let frames = 100;
        let start = camera_eye(0, frames);
        let lowest = camera_eye(50, frames);
        let end = camera_eye(99, frames);
        assert_eq!(start.y, HIGH_ALTITUDE);
        assert_eq!(lowest.y, LOW_ALTITUDE);
        assert!(end.y > lowest.y);
    }

    #[test]
    fn test_zero_workers_means_automatic() {
        let mut config = Config::default();
        config.pager.worker_threads = 0;
        assert!(pager_settings(&config).worker_threads >= 1);
        config.pager.worker_threads = 3;
        assert_eq!(pager_settings(&config).worker_threads, 3);
    }

    #[test]
    fn test_short_run_streams_and_compiles() {
        let mut config = Config::default();
        config.debug.frames = 20;
        config.pager.worker_threads = 1;
        run(&config);
    }
}
