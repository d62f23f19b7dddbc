use std::{
    collections::HashMap,
    io::{Cursor, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::Engine;
use scene_assembler::{
    BufferLedger, Fetch, Geometry, MaterialClassifier,
    data_structures::scene_graph::{Assembly, SceneGraph},
    data_structures::transform::Transform,
};
use zip::{ZipWriter, write::SimpleFileOptions};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-4
}

/// Outward-facing, counter-clockwise box triangles.
pub const BOX_INDICES: [u32; 36] = [
    0, 2, 1, 0, 3, 2, // bottom
    4, 5, 6, 4, 6, 7, // top
    0, 1, 5, 0, 5, 4, // front
    3, 7, 6, 3, 6, 2, // back
    0, 4, 7, 0, 7, 3, // left
    1, 2, 6, 1, 6, 5, // right
];

pub fn box_positions(min: [f32; 3], size: [f32; 3]) -> Vec<[f32; 3]> {
    let [x, y, z] = min;
    let [w, h, d] = size;
    vec![
        [x, y, z],
        [x + w, y, z],
        [x + w, y + h, z],
        [x, y + h, z],
        [x, y, z + d],
        [x + w, y, z + d],
        [x + w, y + h, z + d],
        [x, y + h, z + d],
    ]
}

pub fn box_triangles(min: [f32; 3], size: [f32; 3]) -> Vec<[[f32; 3]; 3]> {
    let positions = box_positions(min, size);
    BOX_INDICES
        .chunks_exact(3)
        .map(|c| [positions[c[0] as usize], positions[c[1] as usize], positions[c[2] as usize]])
        .collect()
}

pub fn indexed_box(ledger: &BufferLedger, min: [f32; 3], size: [f32; 3]) -> Geometry {
    Geometry::indexed("box", box_positions(min, size), BOX_INDICES.to_vec(), ledger)
}

pub fn soup_box(ledger: &BufferLedger, min: [f32; 3], size: [f32; 3]) -> Geometry {
    let positions = box_triangles(min, size).into_iter().flatten().collect();
    Geometry::triangle_list("box", positions, ledger)
}

pub fn unit_cube(ledger: &BufferLedger) -> Geometry {
    indexed_box(ledger, [0.0; 3], [1.0; 3])
}

/// Finalized scene with one part per geometry, each with its transform.
pub fn scene_of(parts: Vec<(&str, Geometry, Transform)>) -> SceneGraph {
    let classifier = MaterialClassifier::new();
    let mut assembly = Assembly::new("test scene");
    for (name, geometry, transform) in parts {
        assembly.attach(name, geometry, classifier.classify(name), "test.stl", transform);
    }
    assembly.finalize()
}

/// Binary STL with one facet per triangle.
pub fn stl_bytes(triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
    let mut out = vec![0u8; 80];
    out.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
    for triangle in triangles {
        out.extend(std::iter::repeat_n(0u8, 12));
        for vertex in triangle {
            for c in vertex {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    out
}

pub fn cube_stl(min: [f32; 3], size: [f32; 3]) -> Vec<u8> {
    stl_bytes(&box_triangles(min, size))
}

pub fn cube_obj() -> String {
    let mut obj = String::from("# unit cube\no cube\n");
    for [x, y, z] in box_positions([0.0; 3], [1.0; 3]) {
        obj.push_str(&format!("v {x} {y} {z}\n"));
    }
    for c in BOX_INDICES.chunks_exact(3) {
        obj.push_str(&format!("f {} {} {}\n", c[0] + 1, c[1] + 1, c[2] + 1));
    }
    obj
}

/// Buffer contents (positions then u16 indices) of a unit cube.
pub fn gltf_cube_buffer() -> Vec<u8> {
    let mut data = Vec::new();
    for p in box_positions([0.0; 3], [1.0; 3]) {
        for c in p {
            data.extend_from_slice(&c.to_le_bytes());
        }
    }
    for i in BOX_INDICES {
        data.extend_from_slice(&(i as u16).to_le_bytes());
    }
    data
}

/// A `.gltf` document for a unit cube whose buffer lives at `buffer_uri`.
pub fn gltf_cube_json(buffer_uri: &str) -> String {
    format!(
        r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "mesh": 0 }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1 }}] }}],
  "buffers": [{{ "uri": "{buffer_uri}", "byteLength": 168 }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 96 }},
    {{ "buffer": 0, "byteOffset": 96, "byteLength": 72 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 8, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 1] }},
    {{ "bufferView": 1, "componentType": 5123, "count": 36, "type": "SCALAR" }}
  ]
}}"#
    )
}

pub fn gltf_cube_embedded() -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(gltf_cube_buffer());
    gltf_cube_json(&format!("data:application/octet-stream;base64,{payload}"))
}

pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A stored single-entry zip whose central directory declares a zip64
/// uncompressed size of `declared` bytes for `data`.
pub fn forged_zip64_entry(name: &str, data: &[u8], declared: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let put16 = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_le_bytes());
    let put32 = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_le_bytes());

    put32(&mut out, 0x0403_4b50);
    for v in [45, 0, 0, 0, 33] {
        put16(&mut out, v);
    }
    put32(&mut out, 0);
    put32(&mut out, data.len() as u32);
    put32(&mut out, data.len() as u32);
    put16(&mut out, name.len() as u16);
    put16(&mut out, 0);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(data);

    let central_start = out.len();
    put32(&mut out, 0x0201_4b50);
    for v in [45, 45, 0, 0, 0, 33] {
        put16(&mut out, v);
    }
    put32(&mut out, 0);
    put32(&mut out, data.len() as u32);
    put32(&mut out, u32::MAX);
    put16(&mut out, name.len() as u16);
    put16(&mut out, 12);
    for v in [0, 0, 0] {
        put16(&mut out, v);
    }
    put32(&mut out, 0);
    put32(&mut out, 0);
    out.extend_from_slice(name.as_bytes());
    put16(&mut out, 0x0001);
    put16(&mut out, 8);
    out.extend_from_slice(&declared.to_le_bytes());
    let central_size = out.len() - central_start;

    put32(&mut out, 0x0605_4b50);
    for v in [0, 0, 1, 1] {
        put16(&mut out, v);
    }
    put32(&mut out, central_size as u32);
    put32(&mut out, central_start as u32);
    put16(&mut out, 0);
    out
}

pub fn sdf_visual(name: &str, uri: &str, pose: &str) -> String {
    format!(
        "<visual name=\"{name}\"><pose>{pose}</pose><geometry><mesh><uri>{uri}</uri></mesh></geometry></visual>"
    )
}

pub fn sdf_document(links: &[(&str, Vec<String>)]) -> String {
    let mut doc = String::from("<?xml version=\"1.0\"?>\n<sdf version=\"1.7\"><model name=\"test\">");
    for (name, visuals) in links {
        doc.push_str(&format!("<link name=\"{name}\">"));
        for visual in visuals {
            doc.push_str(visual);
        }
        doc.push_str("</link>");
    }
    doc.push_str("</model></sdf>");
    doc
}

/// In-memory [`Fetch`] with optional per-url delays and a request log.
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.to_string(), bytes.into());
        self
    }

    pub fn delayed(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<String>>> {
        self.requests.clone()
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send {
        self.requests.lock().unwrap().push(url.to_string());
        let data = self.files.get(url).cloned();
        let delay = self.delays.get(url).copied();
        let url = url.to_string();
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            data.ok_or_else(|| anyhow::anyhow!("404 for {url}"))
        }
    }
}
