//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line arguments; values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "canopy", about = "Paged level-of-detail scene streamer")]
pub struct CliArgs {
    /// LOD scale factor.
    #[arg(long)]
    pub lod_scale: Option<f32>,

    /// Tile loader threads.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Viewport width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Viewport height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Frames to simulate.
    #[arg(long)]
    pub frames: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(scale) = args.lod_scale {
            self.lod.lod_scale = scale;
        }
        if let Some(workers) = args.workers {
            self.pager.worker_threads = workers;
        }
        if let Some(w) = args.width {
            self.viewport.width = w;
        }
        if let Some(h) = args.height {
            self.viewport.height = h;
        }
        if let Some(frames) = args.frames {
            self.debug.frames = frames;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
