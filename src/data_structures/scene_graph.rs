//! Scene graph and hierarchical scene organization.
//!
//! Nodes are an explicit tagged variant, decided when the node is built:
//! a [`SceneNode::Group`] only has children, a [`SceneNode::Mesh`] is a leaf
//! that owns one [`AssembledPart`].
//!
//! Imports never construct a [`SceneGraph`] directly. They fill an
//! [`Assembly`] and call [`Assembly::finalize`], which is the only place the
//! coordinate normalization is set on the root.

use cgmath::{ElementWise, Matrix4, SquareMatrix, Vector3};
use serde::Serialize;

use crate::{
    data_structures::{
        model::{AssembledPart, Geometry},
        transform::Transform,
    },
    material::MaterialProperties,
};

#[derive(Debug)]
pub enum SceneNode {
    Group(GroupNode),
    Mesh(MeshNode),
}

impl SceneNode {
    pub fn name(&self) -> &str {
        match self {
            SceneNode::Group(group) => &group.name,
            SceneNode::Mesh(mesh) => &mesh.part.name,
        }
    }

    pub fn transform(&self) -> &Transform {
        match self {
            SceneNode::Group(group) => &group.transform,
            SceneNode::Mesh(mesh) => &mesh.transform,
        }
    }
}

#[derive(Debug, Default)]
pub struct GroupNode {
    pub name: String,
    pub transform: Transform,
    pub children: Vec<SceneNode>,
}

impl GroupNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }
}

#[derive(Debug)]
pub struct MeshNode {
    pub transform: Transform,
    pub part: AssembledPart,
}

/// A mesh leaf visited during traversal, with its accumulated placement.
pub struct VisitedMesh<'a> {
    pub part: &'a AssembledPart,
    /// Full world matrix, including the root normalization.
    pub world_matrix: Matrix4<f32>,
    /// Component-wise product of the leaf's scale and all ancestor scales.
    pub world_scale: Vector3<f32>,
}

/// Axis-aligned world-space bounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    pub fn size(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    fn grow(bounds: Option<Bounds>, point: [f64; 3]) -> Bounds {
        match bounds {
            None => Bounds {
                min: point,
                max: point,
            },
            Some(mut b) => {
                for axis in 0..3 {
                    b.min[axis] = b.min[axis].min(point[axis]);
                    b.max[axis] = b.max[axis].max(point[axis]);
                }
                b
            }
        }
    }
}

/// Listing entry for one part, as consumed by the editor and part panels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartSummary {
    pub id: u32,
    pub name: String,
    pub source_file: String,
    pub material: MaterialProperties,
}

/// Collects parts for one import. Consumed by [`Assembly::finalize`].
#[derive(Debug)]
pub struct Assembly {
    root: GroupNode,
    next_id: u32,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            root: GroupNode::new(name),
            next_id: 0,
        }
    }

    /// Attaches a mesh leaf under the root and returns the part id.
    pub fn attach(
        &mut self,
        name: impl Into<String>,
        geometry: Geometry,
        material: MaterialProperties,
        source_file: impl Into<String>,
        transform: Transform,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.root.add_child(SceneNode::Mesh(MeshNode {
            transform,
            part: AssembledPart {
                id,
                name: name.into(),
                geometry,
                material,
                source_file: source_file.into(),
            },
        }));
        id
    }

    pub fn part_count(&self) -> usize {
        self.next_id as usize
    }

    /// Applies the Z-up to Y-up normalization to the root and seals the graph.
    pub fn finalize(self) -> SceneGraph {
        let mut root = self.root;
        root.transform = Transform::z_up_to_y_up();
        log::debug!(
            "finalized '{}' with {} top-level nodes",
            root.name,
            root.children.len()
        );
        SceneGraph { root }
    }
}

/// A finished scene: the root group carries exactly one normalization
/// transform and every leaf owns its geometry.
#[derive(Debug)]
pub struct SceneGraph {
    root: GroupNode,
}

impl SceneGraph {
    /// Wraps an arbitrary tree. The root's own transform is replaced by the
    /// normalization, the same as for imported scenes.
    pub fn from_root(root: GroupNode) -> Self {
        let name = root.name.clone();
        let mut assembly = Assembly::new(name);
        assembly.root = root;
        assembly.finalize()
    }

    pub fn name(&self) -> &str {
        &self.root.name
    }

    pub fn root(&self) -> &GroupNode {
        &self.root
    }

    pub fn normalization(&self) -> &Transform {
        &self.root.transform
    }

    pub fn is_empty(&self) -> bool {
        self.meshes().is_empty()
    }

    /// Collects every mesh leaf in depth-first order with its world placement.
    pub fn meshes(&self) -> Vec<VisitedMesh<'_>> {
        let mut out = Vec::new();
        visit_group(
            &self.root,
            Matrix4::identity(),
            Vector3::new(1.0, 1.0, 1.0),
            &mut out,
        );
        out
    }

    pub fn parts(&self) -> Vec<PartSummary> {
        self.meshes()
            .into_iter()
            .map(|visited| PartSummary {
                id: visited.part.id,
                name: visited.part.name.clone(),
                source_file: visited.part.source_file.clone(),
                material: visited.part.material.clone(),
            })
            .collect()
    }

    /// World-space bounds of all vertices, `None` for an empty scene.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut bounds = None;
        for visited in self.meshes() {
            for p in visited.part.geometry.positions() {
                let world = visited.world_matrix * Vector3::from(*p).extend(1.0);
                bounds = Some(Bounds::grow(
                    bounds,
                    [world.x as f64, world.y as f64, world.z as f64],
                ));
            }
        }
        bounds
    }

    /// Translation that would center the scene in X/Z and rest it on Y = 0.
    ///
    /// Only computed, never applied: the root keeps the normalization as its
    /// single transform.
    pub fn grounding_offset(&self) -> [f64; 3] {
        match self.bounds() {
            Some(bounds) => {
                let center = bounds.center();
                [-center[0], -bounds.min[1], -center[2]]
            }
            None => [0.0; 3],
        }
    }

    /// Releases every geometry buffer in the scene. The tree itself stays
    /// intact so part listings remain available.
    pub fn dispose(&mut self) {
        dispose_group(&mut self.root);
    }
}

fn visit_group<'a>(
    group: &'a GroupNode,
    parent_matrix: Matrix4<f32>,
    parent_scale: Vector3<f32>,
    out: &mut Vec<VisitedMesh<'a>>,
) {
    let matrix = parent_matrix * group.transform.to_matrix();
    let scale = parent_scale.mul_element_wise(group.transform.scale);
    for child in &group.children {
        match child {
            SceneNode::Group(inner) => visit_group(inner, matrix, scale, out),
            SceneNode::Mesh(mesh) => out.push(VisitedMesh {
                part: &mesh.part,
                world_matrix: matrix * mesh.transform.to_matrix(),
                world_scale: scale.mul_element_wise(mesh.transform.scale),
            }),
        }
    }
}

fn dispose_group(group: &mut GroupNode) {
    for child in &mut group.children {
        match child {
            SceneNode::Group(inner) => dispose_group(inner),
            SceneNode::Mesh(mesh) => mesh.part.geometry.dispose(),
        }
    }
}
