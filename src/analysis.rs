//! Physical metrics of assembled scenes.
//!
//! Volume uses the divergence theorem: every triangle forms a tetrahedron
//! with the origin and the signed volumes are summed. That is only
//! meaningful for closed, consistently wound meshes. Open or
//! self-intersecting input still yields a finite number, and callers should
//! treat an odd volume/area ratio as a data-quality signal.

use std::collections::HashSet;

use cgmath::{InnerSpace, Vector3};
use serde::Serialize;

use crate::data_structures::scene_graph::{Bounds, SceneGraph};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Axes {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<[f64; 3]> for Axes {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalMetrics {
    pub volume: f64,
    pub surface_area: f64,
    pub dimensions: Axes,
    /// Center of the world-space bounding box. This approximates the true
    /// volume-weighted centroid and is kept on purpose.
    pub center_of_mass: Axes,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModelStats {
    pub triangles: usize,
    pub vertices: usize,
    pub parts: usize,
    /// Number of distinct materials by value.
    pub materials: usize,
    pub bounds: Option<Bounds>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GeometryAnalyzer;

impl GeometryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, graph: &SceneGraph) -> PhysicalMetrics {
        let mut volume = 0.0;
        let mut area = 0.0;

        for visited in graph.meshes() {
            let scale = visited.world_scale.cast::<f64>().unwrap_or(Vector3::new(1.0, 1.0, 1.0));
            for [a, b, c] in visited.part.geometry.triangles() {
                let p1 = scaled(a, scale);
                let p2 = scaled(b, scale);
                let p3 = scaled(c, scale);
                volume += signed_volume_of_triangle(p1, p2, p3);
                area += area_of_triangle(p1, p2, p3);
            }
        }

        let (dimensions, center) = match graph.bounds() {
            Some(bounds) => (bounds.size().into(), bounds.center().into()),
            None => (Axes::default(), Axes::default()),
        };

        // avoid negative zero and reversed winding
        PhysicalMetrics {
            volume: volume.abs(),
            surface_area: area.abs(),
            dimensions,
            center_of_mass: center,
        }
    }

    pub fn stats(&self, graph: &SceneGraph) -> ModelStats {
        let meshes = graph.meshes();
        let mut materials = HashSet::new();
        let mut stats = ModelStats {
            parts: meshes.len(),
            bounds: graph.bounds(),
            ..Default::default()
        };
        for visited in &meshes {
            stats.triangles += visited.part.geometry.triangle_count();
            stats.vertices += visited.part.geometry.vertex_count();
            // MaterialProperties holds floats, so dedupe on the debug form
            materials.insert(format!("{:?}", visited.part.material));
        }
        stats.materials = materials.len();
        stats
    }
}

fn scaled(p: [f32; 3], scale: Vector3<f64>) -> Vector3<f64> {
    Vector3::new(
        p[0] as f64 * scale.x,
        p[1] as f64 * scale.y,
        p[2] as f64 * scale.z,
    )
}

/// Signed volume of the tetrahedron spanned by the triangle and the origin.
fn signed_volume_of_triangle(p1: Vector3<f64>, p2: Vector3<f64>, p3: Vector3<f64>) -> f64 {
    p1.dot(p2.cross(p3)) / 6.0
}

fn area_of_triangle(p1: Vector3<f64>, p2: Vector3<f64>, p3: Vector3<f64>) -> f64 {
    (p2 - p1).cross(p3 - p1).magnitude() * 0.5
}
