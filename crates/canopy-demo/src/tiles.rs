//! Procedural tile grid streamed by the demo.
//!
//! Every tile is a paged node with three levels: a resident coarse mesh, a
//! detail subtree read through [`ProceduralReader`] and a foliage mesh built by
//! a loader function.

use std::sync::Arc;

use canopy_lod::{LodNode, PagedLodNode, TileReader};
use canopy_scene::{BoundingSphere, Geometry, Group, LoadError, LoaderFn, Node};
use canopy_shader::{
    BillboardAttribute, Light, LightKind, Material, ShaderState, ShadowReceiveAttribute, ShadowTexture,
    StateAttribute, Texture,
};
use glam::Vec3;

pub const TILE_SPACING: f32 = 100.0;

/// Eye distance below which the detail level replaces the coarse one.
const COARSE_MIN: f32 = 300.0;
/// Eye distance below which foliage is shown.
const DETAIL_MIN: f32 = 80.0;
/// Split between the two meshes inside a detail tile.
const DETAIL_SPLIT: f32 = 150.0;

pub fn tile_center(x: u32, y: u32) -> Vec3 {
    Vec3::new(x as f32 * TILE_SPACING, 0.0, y as f32 * TILE_SPACING)
}

pub fn grid_center(grid: u32) -> Vec3 {
    let half = grid.saturating_sub(1) as f32 * TILE_SPACING * 0.5;
    Vec3::new(half, 0.0, half)
}

fn tile_bound(x: u32, y: u32) -> BoundingSphere {
    BoundingSphere::new(tile_center(x, y), TILE_SPACING * 0.5)
}

/// `grid` x `grid` paged tiles under one group.
pub fn build_grid(grid: u32, expiry_time: f64, expiry_frame: u64) -> Group {
    let mut root = Group::new();
    for x in 0..grid {
        for y in 0..grid {
            let mut tile = PagedLodNode::new();
            tile.set_center(tile_center(x, y));
            tile.set_radius(TILE_SPACING * 0.5);
            tile.set_database_path("tiles/");
            tile.set_expiry_time(expiry_time);
            tile.set_expiry_frame(expiry_frame);
            tile.set_num_children_that_cannot_be_expired(1);

            tile.add_child(
                Geometry::new(format!("coarse-{x}-{y}"), tile_bound(x, y)).boxed(),
                COARSE_MIN,
                f32::INFINITY,
            );
            tile.set_range(1, DETAIL_MIN, COARSE_MIN);
            tile.set_file_name(1, format!("{x}_{y}.tile"));
            tile.set_range(2, 0.0, DETAIL_MIN);
            let foliage: LoaderFn = Arc::new(move || {
                Ok::<Node, LoadError>(Geometry::new(format!("foliage-{x}-{y}"), tile_bound(x, y)).boxed())
            });
            tile.set_function(2, foliage);

            root.add_child(Box::new(tile));
        }
    }
    root
}

/// Builds detail tiles from paths of the form `tiles/<x>_<y>.tile`.
pub struct ProceduralReader {
    grid: u32,
}

impl ProceduralReader {
    pub fn new(grid: u32) -> Self {
        Self { grid }
    }
}

impl TileReader for ProceduralReader {
    fn read_tile(&self, path: &str) -> Result<Node, LoadError> {
        let (x, y) = parse_tile_path(path).ok_or_else(|| LoadError::Decode {
            path: path.to_string(),
            message: "expected <x>_<y>.tile".to_string(),
        })?;
        if x >= self.grid || y >= self.grid {
            return Err(LoadError::NotFound { path: path.to_string() });
        }

        let mut lod = LodNode::new();
        lod.set_center(tile_center(x, y));
        lod.add_child(Geometry::new(format!("detail-near-{x}-{y}"), tile_bound(x, y)).boxed(), 0.0, DETAIL_SPLIT);
        lod.add_child(
            Geometry::new(format!("detail-far-{x}-{y}"), tile_bound(x, y)).boxed(),
            DETAIL_SPLIT,
            f32::INFINITY,
        );
        let node: Node = Box::new(lod);
        Ok(node)
    }
}

fn parse_tile_path(path: &str) -> Option<(u32, u32)> {
    let name = path.rsplit('/').next()?.strip_suffix(".tile")?;
    let (x, y) = name.split_once('_')?;
    Some((x.parse().ok()?, y.parse().ok()?))
}

/// Render state of a tile mesh, chosen by its name prefix.
pub fn shader_state_for(name: &str) -> ShaderState {
    let mut attributes = vec![StateAttribute::Material(Material::default())];
    if name.starts_with("coarse") {
        return ShaderState::from_attributes(&attributes);
    }

    attributes.push(StateAttribute::Light(Light::new(0, LightKind::Directional)));
    attributes.push(StateAttribute::Texture(Texture::new("ground", 0)));
    if name.starts_with("detail-near") {
        attributes.push(StateAttribute::Light(Light::new(1, LightKind::Point)));
        attributes.push(StateAttribute::Texture(Texture::new("ground-detail", 1)));
        attributes.push(StateAttribute::ShadowReceive(ShadowReceiveAttribute::new(0)));
        attributes.push(StateAttribute::ShadowTexture(ShadowTexture::new("sun-shadow", 2, 0)));
    } else if name.starts_with("foliage") {
        attributes.push(StateAttribute::Billboard(BillboardAttribute::default()));
    }
    ShaderState::from_attributes(&attributes)
}
