//! Mesh decoders for the supported payload formats.
//!
//! Every decoder produces exactly one [`Geometry`] per file. Multi-object
//! OBJ files and multi-node glTF scenes are merged, with glTF node
//! transforms baked into the positions, so one file is one part.

use std::{
    collections::HashMap,
    io::{BufReader, Cursor},
};

use anyhow::{Context, bail};
use base64::Engine;
use cgmath::{Matrix4, SquareMatrix, Vector4};

use crate::data_structures::model::{BufferLedger, Geometry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshFormat {
    Stl,
    Obj,
    Gltf,
}

impl MeshFormat {
    /// Detects the format from the file extension, case-insensitively.
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, extension) = path.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "stl" => Some(Self::Stl),
            "obj" => Some(Self::Obj),
            "glb" | "gltf" => Some(Self::Gltf),
            _ => None,
        }
    }
}

/// External resources of a `.gltf` file, keyed by the uri used in the file.
pub type ExternalBuffers = HashMap<String, Vec<u8>>;

pub fn decode(
    format: MeshFormat,
    label: &str,
    bytes: &[u8],
    external: &ExternalBuffers,
    ledger: &BufferLedger,
) -> anyhow::Result<Geometry> {
    let geometry = match format {
        MeshFormat::Stl => load_stl(label, bytes, ledger)?,
        MeshFormat::Obj => load_obj(label, bytes, ledger)?,
        MeshFormat::Gltf => load_gltf(label, bytes, external, ledger)?,
    };
    if geometry.triangle_count() == 0 {
        log::warn!("{label} decoded without any triangles");
    }
    Ok(geometry)
}

/// STL is decoded into a flat triangle list.
pub fn load_stl(label: &str, bytes: &[u8], ledger: &BufferLedger) -> anyhow::Result<Geometry> {
    let mut reader = Cursor::new(bytes);
    let mesh = stl_io::read_stl(&mut reader).with_context(|| format!("{label} is not a valid STL file"))?;

    let mut positions = Vec::with_capacity(mesh.faces.len() * 3);
    for face in &mesh.faces {
        for &index in &face.vertices {
            let v = mesh
                .vertices
                .get(index)
                .with_context(|| format!("{label}: face references missing vertex {index}"))?;
            positions.push([v[0], v[1], v[2]]);
        }
    }
    Ok(Geometry::triangle_list(label, positions, ledger))
}

pub fn load_obj(label: &str, bytes: &[u8], ledger: &BufferLedger) -> anyhow::Result<Geometry> {
    let mut reader = BufReader::new(Cursor::new(bytes));
    let (models, _) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        // materials come from the part name, not from .mtl files
        |_| Ok((Vec::new(), Default::default())),
    )
    .with_context(|| format!("{label} is not a valid OBJ file"))?;

    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for model in &models {
        let base = positions.len() as u32;
        positions.extend(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|p| [p[0], p[1], p[2]]),
        );
        indices.extend(model.mesh.indices.iter().map(|i| base + i));
    }
    Ok(Geometry::indexed(label, positions, indices, ledger))
}

/// Loads `.glb` and `.gltf`. Buffers come from the binary chunk, from
/// base64 `data:` uris or from `external`.
pub fn load_gltf(
    label: &str,
    bytes: &[u8],
    external: &ExternalBuffers,
    ledger: &BufferLedger,
) -> anyhow::Result<Geometry> {
    let gltf = gltf::Gltf::from_slice(bytes).with_context(|| format!("{label} is not a valid glTF file"))?;

    let mut buffer_data: Vec<Vec<u8>> = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => gltf
                .blob
                .clone()
                .with_context(|| format!("{label}: binary chunk is missing"))?,
            gltf::buffer::Source::Uri(uri) => match decode_data_uri(uri)? {
                Some(data) => data,
                None => external
                    .get(uri)
                    .cloned()
                    .with_context(|| format!("{label}: external buffer '{uri}' is not available"))?,
            },
        };
        buffer_data.push(data);
    }

    let mut merged = MergedMesh::default();
    let scene = gltf.default_scene().or_else(|| gltf.scenes().next());
    match scene {
        Some(scene) => {
            for node in scene.nodes() {
                merged.visit(&node, Matrix4::identity(), &buffer_data, label)?;
            }
        }
        None => {
            for mesh in gltf.meshes() {
                merged.add_mesh(&mesh, Matrix4::identity(), &buffer_data, label)?;
            }
        }
    }
    Ok(Geometry::indexed(label, merged.positions, merged.indices, ledger))
}

/// Lists the external (non-`data:`) buffer uris a `.gltf` document needs.
pub fn gltf_external_uris(bytes: &[u8]) -> anyhow::Result<Vec<String>> {
    let gltf = gltf::Gltf::from_slice(bytes)?;
    Ok(gltf
        .buffers()
        .filter_map(|buffer| match buffer.source() {
            gltf::buffer::Source::Uri(uri) if !uri.starts_with("data:") => Some(uri.to_string()),
            _ => None,
        })
        .collect())
}

fn decode_data_uri(uri: &str) -> anyhow::Result<Option<Vec<u8>>> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Ok(None);
    };
    let Some((_, payload)) = rest.split_once(";base64,") else {
        bail!("only base64 data uris are supported");
    };
    Ok(Some(base64::engine::general_purpose::STANDARD.decode(payload)?))
}

#[derive(Default)]
struct MergedMesh {
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
}

impl MergedMesh {
    fn visit(
        &mut self,
        node: &gltf::Node,
        parent: Matrix4<f32>,
        buffers: &[Vec<u8>],
        label: &str,
    ) -> anyhow::Result<()> {
        let world = parent * Matrix4::from(node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            self.add_mesh(&mesh, world, buffers, label)?;
        }
        for child in node.children() {
            self.visit(&child, world, buffers, label)?;
        }
        Ok(())
    }

    fn add_mesh(
        &mut self,
        mesh: &gltf::Mesh,
        world: Matrix4<f32>,
        buffers: &[Vec<u8>],
        label: &str,
    ) -> anyhow::Result<()> {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!(
                    "{label}: skipping primitive {} of mesh {} with mode {:?}",
                    primitive.index(),
                    mesh.index(),
                    primitive.mode()
                );
                continue;
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| b.as_slice()));
            let Some(positions) = reader.read_positions() else {
                log::warn!("{label}: primitive {} has no positions", primitive.index());
                continue;
            };

            let base = self.positions.len() as u32;
            let mut count = 0u32;
            for p in positions {
                let v = world * Vector4::new(p[0], p[1], p[2], 1.0);
                self.positions.push([v.x, v.y, v.z]);
                count += 1;
            }
            match reader.read_indices() {
                Some(indices) => self.indices.extend(indices.into_u32().map(|i| base + i)),
                None => self.indices.extend(base..base + count),
            }
        }
        Ok(())
    }
}
