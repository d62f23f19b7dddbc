//! Geometry buffers and assembled parts.
//!
//! `Geometry` plays the role of the vertex/index buffer pair of a mesh. It
//! owns the positions exclusively and registers its byte size with a
//! [`BufferLedger`], so the amount of live buffer memory is observable.
//! Buffers are released by [`Geometry::dispose`] or, at the latest, when the
//! geometry is dropped.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::material::MaterialProperties;

/// Counts live geometry buffers and their size in bytes.
///
/// Cloning a ledger yields another handle to the same counters.
#[derive(Clone, Debug, Default)]
pub struct BufferLedger {
    inner: Arc<LedgerCounters>,
}

#[derive(Debug, Default)]
struct LedgerCounters {
    buffers: AtomicUsize,
    bytes: AtomicUsize,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_buffers(&self) -> usize {
        self.inner.buffers.load(Ordering::Acquire)
    }

    pub fn live_bytes(&self) -> usize {
        self.inner.bytes.load(Ordering::Acquire)
    }

    fn allocate(&self, bytes: usize) -> Allocation {
        self.inner.buffers.fetch_add(1, Ordering::AcqRel);
        self.inner.bytes.fetch_add(bytes, Ordering::AcqRel);
        Allocation {
            ledger: self.clone(),
            bytes,
        }
    }
}

/// One registered buffer. Releases its ledger entry on drop.
#[derive(Debug)]
struct Allocation {
    ledger: BufferLedger,
    bytes: usize,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.ledger.inner.buffers.fetch_sub(1, Ordering::AcqRel);
        self.ledger.inner.bytes.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// How the triangles of a geometry are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Every three entries of the index buffer form a triangle.
    Indexed,
    /// Every three consecutive positions form a triangle (triangle soup).
    TriangleList,
}

#[derive(Debug)]
pub struct Geometry {
    label: String,
    positions: Vec<[f32; 3]>,
    indices: Option<Vec<u32>>,
    allocation: Option<Allocation>,
}

impl Geometry {
    /// Creates an indexed geometry. Index triples referencing missing
    /// positions are dropped when triangles are iterated.
    pub fn indexed(
        label: impl Into<String>,
        positions: Vec<[f32; 3]>,
        indices: Vec<u32>,
        ledger: &BufferLedger,
    ) -> Self {
        Self::upload(label.into(), positions, Some(indices), ledger)
    }

    /// Creates a flat triangle list. Trailing positions that do not complete a
    /// triangle are ignored.
    pub fn triangle_list(
        label: impl Into<String>,
        positions: Vec<[f32; 3]>,
        ledger: &BufferLedger,
    ) -> Self {
        Self::upload(label.into(), positions, None, ledger)
    }

    /// Axis-aligned box of `size` centered on the origin, with outward
    /// facing triangles.
    pub fn cuboid(label: impl Into<String>, size: [f32; 3], ledger: &BufferLedger) -> Self {
        let [x, y, z] = size.map(|extent| extent / 2.0);
        let positions = vec![
            [-x, -y, -z],
            [x, -y, -z],
            [x, y, -z],
            [-x, y, -z],
            [-x, -y, z],
            [x, -y, z],
            [x, y, z],
            [-x, y, z],
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 0, 3, 2,
            4, 5, 6, 4, 6, 7,
            0, 1, 5, 0, 5, 4,
            3, 7, 6, 3, 6, 2,
            0, 4, 7, 0, 7, 3,
            1, 2, 6, 1, 6, 5,
        ];
        Self::indexed(label, positions, indices, ledger)
    }

    fn upload(
        label: String,
        positions: Vec<[f32; 3]>,
        indices: Option<Vec<u32>>,
        ledger: &BufferLedger,
    ) -> Self {
        let vertex_bytes = bytemuck::cast_slice::<[f32; 3], u8>(&positions).len();
        let index_bytes = indices
            .as_deref()
            .map_or(0, |indices| bytemuck::cast_slice::<u32, u8>(indices).len());
        let allocation = Some(ledger.allocate(vertex_bytes + index_bytes));
        log::trace!("{label}: registered {} bytes", vertex_bytes + index_bytes);
        Self {
            label,
            positions,
            indices,
            allocation,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn topology(&self) -> Topology {
        match self.indices {
            Some(_) => Topology::Indexed,
            None => Topology::TriangleList,
        }
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    /// Raw vertex buffer contents, as they would be handed to a GPU upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    /// Iterates all triangles regardless of the encoding.
    pub fn triangles(&self) -> impl Iterator<Item = [[f32; 3]; 3]> + '_ {
        let indexed = self.indices.as_deref().map(move |indices| {
            indices.chunks_exact(3).filter_map(move |c| {
                Some([
                    *self.positions.get(c[0] as usize)?,
                    *self.positions.get(c[1] as usize)?,
                    *self.positions.get(c[2] as usize)?,
                ])
            })
        });
        let flat = match self.indices {
            Some(_) => None,
            None => Some(self.positions.chunks_exact(3).map(|c| [c[0], c[1], c[2]])),
        };
        indexed
            .into_iter()
            .flatten()
            .chain(flat.into_iter().flatten())
    }

    pub fn is_disposed(&self) -> bool {
        self.allocation.is_none()
    }

    /// Releases the vertex and index storage. Calling it twice is a no-op.
    pub fn dispose(&mut self) {
        if self.allocation.take().is_some() {
            self.positions = Vec::new();
            self.indices = self.indices.as_ref().map(|_| Vec::new());
            log::trace!("{}: buffers released", self.label);
        }
    }
}

/// A decoded mesh attached to the scene, with its render material.
#[derive(Debug)]
pub struct AssembledPart {
    pub id: u32,
    pub name: String,
    pub geometry: Geometry,
    pub material: MaterialProperties,
    /// Name of the file the geometry was decoded from.
    pub source_file: String,
}
