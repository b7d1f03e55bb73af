//! Chunk mesh generation
//!
//! One regular grid per LOD, decimated by `2^lod`. Vertex positions are
//! chunk-local (`origin` holds the chunk's minimum corner) so large world
//! coordinates never enter the f32 vertex data.
//!
//! Cracks between chunks are handled three ways:
//! - edge heights come from the same global samples on both sides, so equal
//!   LODs produce identical edge vertices;
//! - an edge facing a coarser neighbour is welded: vertices between the
//!   neighbour's vertices are moved onto its edge line;
//! - every edge carries a vertical skirt hiding anything left over.

use bytemuck::{Pod, Zeroable};

use crate::core::config::ElevationRange;
use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::render::lod::{mesh_resolution, sample_step};
use crate::terrain::{BiomeMap, ChunkCoord, Heightmap, NormalMap};

/// GPU vertex layout for terrain
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    /// Chunk-local position in meters
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// 0..1 across the chunk
    pub uv: [f32; 2],
    /// `Biome::id()` of the nearest sample
    pub biome: u32,
}

impl TerrainVertex {
    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Chunk edges. North is `-Z`, west is `-X`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    West,
    East,
    North,
    South,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::West, Side::East, Side::North, Side::South];

    /// Grid offset of the neighbour across this edge
    pub fn offset(self) -> (i32, i32) {
        match self {
            Side::West => (-1, 0),
            Side::East => (1, 0),
            Side::North => (0, -1),
            Side::South => (0, 1),
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::West => Side::East,
            Side::East => Side::West,
            Side::North => Side::South,
            Side::South => Side::North,
        }
    }

    /// Sample `(x, z)` of position `s` along this edge of a `res`-sample grid
    fn sample(self, s: usize, res: usize) -> (usize, usize) {
        match self {
            Side::West => (0, s),
            Side::East => (res - 1, s),
            Side::North => (s, 0),
            Side::South => (s, res - 1),
        }
    }
}

/// A resident neighbour as seen from one edge
#[derive(Clone, Copy, Debug)]
pub struct NeighborEdge<'a> {
    pub heightmap: &'a Heightmap,
    pub lod: u32,
}

/// Neighbours on each edge, `None` where nothing is resident
#[derive(Clone, Copy, Debug, Default)]
pub struct Neighbors<'a> {
    pub west: Option<NeighborEdge<'a>>,
    pub east: Option<NeighborEdge<'a>>,
    pub north: Option<NeighborEdge<'a>>,
    pub south: Option<NeighborEdge<'a>>,
}

impl<'a> Neighbors<'a> {
    /// LOD each edge should be stitched to by a mesh at `lod`
    pub fn welds(&self, lod: u32) -> [u32; 4] {
        Side::ALL.map(|side| self.get(side).map_or(lod, |edge| edge.lod.max(lod)))
    }

    pub fn get(&self, side: Side) -> Option<NeighborEdge<'a>> {
        match side {
            Side::West => self.west,
            Side::East => self.east,
            Side::North => self.north,
            Side::South => self.south,
        }
    }

    pub fn set(&mut self, side: Side, edge: Option<NeighborEdge<'a>>) {
        match side {
            Side::West => self.west = edge,
            Side::East => self.east = edge,
            Side::North => self.north = edge,
            Side::South => self.south = edge,
        }
    }
}

/// Triangle mesh of one chunk at one LOD
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkMesh {
    pub coord: ChunkCoord,
    pub lod: u32,
    /// World position of the chunk's minimum corner at `y = 0`
    pub origin: Vec3,
    /// Surface grid (`grid_size^2`, row-major) followed by skirt vertices
    pub vertices: Vec<TerrainVertex>,
    pub indices: Vec<u32>,
    /// Vertices per grid edge
    pub grid_size: usize,
    /// LOD each edge was stitched to, in `Side::ALL` order
    pub welds: [u32; 4],
    /// World-space bounds including skirts
    pub bounds: Aabb,
}

impl ChunkMesh {
    /// Surface vertex at grid position `(i, j)`
    pub fn grid_vertex(&self, i: usize, j: usize) -> Option<&TerrainVertex> {
        if i >= self.grid_size || j >= self.grid_size {
            return None;
        }
        self.vertices.get(j * self.grid_size + i)
    }

    /// World position of a vertex of this mesh
    pub fn world_position(&self, vertex: &TerrainVertex) -> Vec3 {
        self.origin + vertex.position()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn memory_bytes(&self) -> usize {
        self.vertices.len() * std::mem::size_of::<TerrainVertex>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
}

/// Mesh construction parameters shared by every chunk
#[derive(Clone, Copy, Debug)]
pub struct MeshBuilder {
    pub chunk_size: f32,
    pub range: ElevationRange,
    pub skirt_depth: f32,
}

impl MeshBuilder {
    pub fn new(chunk_size: f32, range: ElevationRange, skirt_depth: f32) -> Self {
        Self {
            chunk_size,
            range,
            skirt_depth,
        }
    }

    /// Build the mesh of `coord` at `lod`.
    ///
    /// `heightmap`, `biome_map` and `bump_map` share one square footprint of
    /// `2^k + 1` samples.
    pub fn build(
        &self,
        heightmap: &Heightmap,
        biome_map: &BiomeMap,
        bump_map: &NormalMap,
        coord: ChunkCoord,
        lod: u32,
        neighbors: &Neighbors<'_>,
    ) -> ChunkMesh {
        let res = heightmap.width();
        let quads = res - 1;
        let step = sample_step(lod).min(quads.max(1));
        let n = mesh_resolution(res, lod).max(2);
        let origin2 = coord.origin(self.chunk_size);
        let origin = Vec3::new(origin2.x, 0.0, origin2.y);

        let mut heights = vec![0.0f32; n * n];
        for j in 0..n {
            for i in 0..n {
                heights[j * n + i] = self.range.to_meters(heightmap.get(i * step, j * step));
            }
        }

        for side in Side::ALL {
            if let Some(edge) = neighbors.get(side) {
                self.stitch_edge(&mut heights, n, step, lod, side, edge);
            }
        }

        let mut vertices = Vec::with_capacity(n * n + 4 * n);
        let mut bounds = Aabb::EMPTY;
        for j in 0..n {
            for i in 0..n {
                let (sx, sz) = (i * step, j * step);
                let position = Vec3::new(
                    self.local_coord(sx, quads),
                    heights[j * n + i],
                    self.local_coord(sz, quads),
                );
                bounds.expand(origin + position);
                vertices.push(TerrainVertex {
                    position: position.to_array(),
                    normal: bump_map.get(sx, sz).to_array(),
                    uv: [sx as f32 / quads as f32, sz as f32 / quads as f32],
                    biome: biome_map.get(sx, sz).id() as u32,
                });
            }
        }

        let mut indices = Vec::with_capacity((n - 1) * (n - 1) * 6 + 4 * (n - 1) * 6);
        for j in 0..n - 1 {
            for i in 0..n - 1 {
                let a = (j * n + i) as u32;
                let b = a + 1;
                let c = a + n as u32;
                let d = c + 1;
                indices.extend_from_slice(&[a, c, b, b, c, d]);
            }
        }

        if self.skirt_depth > 0.0 {
            for side in Side::ALL {
                self.add_skirt(&mut vertices, &mut indices, &mut bounds, origin, n, side);
            }
        }

        ChunkMesh {
            coord,
            lod,
            origin,
            vertices,
            indices,
            grid_size: n,
            welds: neighbors.welds(lod),
            bounds,
        }
    }

    /// Local coordinate of sample `s`. The last sample lands exactly on the
    /// chunk edge so both neighbours agree on it.
    fn local_coord(&self, s: usize, quads: usize) -> f32 {
        if s >= quads {
            self.chunk_size
        } else {
            self.chunk_size * s as f32 / quads as f32
        }
    }

    /// Take edge heights from the neighbour's copy of the shared samples and
    /// weld onto its vertices when it is coarser.
    fn stitch_edge(
        &self,
        heights: &mut [f32],
        n: usize,
        step: usize,
        lod: u32,
        side: Side,
        edge: NeighborEdge<'_>,
    ) {
        let res = edge.heightmap.width();
        if edge.heightmap.height() != res || (res - 1) != (n - 1) * step {
            log::warn!("Neighbour heightmap on {:?} edge has a different footprint, not stitching", side);
            return;
        }
        let theirs = side.opposite();
        let shared = |s: usize| {
            let (x, z) = theirs.sample(s, res);
            self.range.to_meters(edge.heightmap.get(x, z))
        };
        let coarse = if edge.lod > lod {
            sample_step(edge.lod).min(res - 1)
        } else {
            step
        };

        for k in 0..n {
            let s = k * step;
            let h = if s % coarse == 0 {
                shared(s)
            } else {
                let s0 = s - s % coarse;
                let s1 = (s0 + coarse).min(res - 1);
                let t = (s - s0) as f32 / (s1 - s0) as f32;
                let (h0, h1) = (shared(s0), shared(s1));
                h0 + (h1 - h0) * t
            };
            let (x, z) = side.sample(k, n);
            heights[z * n + x] = h;
        }
    }

    fn add_skirt(
        &self,
        vertices: &mut Vec<TerrainVertex>,
        indices: &mut Vec<u32>,
        bounds: &mut Aabb,
        origin: Vec3,
        n: usize,
        side: Side,
    ) {
        let first = vertices.len() as u32;
        for k in 0..n {
            let (x, z) = side.sample(k, n);
            let mut v = vertices[z * n + x];
            v.position[1] -= self.skirt_depth;
            bounds.expand(origin + v.position());
            vertices.push(v);
        }

        // Outward facing: south and west walk with the outward winding,
        // north and east against it.
        let flip = matches!(side, Side::North | Side::East);
        for k in 0..n - 1 {
            let (x0, z0) = side.sample(k, n);
            let (x1, z1) = side.sample(k + 1, n);
            let top0 = (z0 * n + x0) as u32;
            let top1 = (z1 * n + x1) as u32;
            let bot0 = first + k as u32;
            let bot1 = bot0 + 1;
            if flip {
                indices.extend_from_slice(&[top0, top1, bot0, top1, bot1, bot0]);
            } else {
                indices.extend_from_slice(&[top0, bot0, top1, top1, bot0, bot1]);
            }
        }
    }
}
