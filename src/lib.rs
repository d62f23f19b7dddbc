//! scene-assembler
//!
//! Import and physical-analysis pipeline for generated CAD models. A package
//! (a zip archive, a single mesh, or a remote scene description with its
//! meshes) is turned into a normalized scene graph with render materials,
//! then analyzed for volume, surface area and extents. Assembled scenes can
//! be kept in a small recency cache that releases their buffers on eviction.
//!
//! High-level modules
//! - `analysis`: volume, area, bounds and statistics of a scene
//! - `cache`: bounded LRU cache of scenes with explicit disposal
//! - `context`: runtime configuration (cache size, timeouts)
//! - `data_structures`: transforms, geometry buffers and the scene graph
//! - `error`: fatal import errors and per-part diagnostics
//! - `flow`: the import flow tying all stages together
//! - `material`: render materials derived from part names
//! - `resources`: fetching, archives, scene descriptions and mesh decoding
//!

pub mod analysis;
pub mod cache;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod material;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;

pub use analysis::{GeometryAnalyzer, ModelStats, PhysicalMetrics};
pub use cache::{Dispose, ModelCache, Put};
pub use context::ImportConfig;
pub use data_structures::{
    model::{BufferLedger, Geometry},
    scene_graph::{Assembly, SceneGraph, SceneNode},
    transform::Transform,
};
pub use error::{Diagnostic, DiagnosticKind, ImportError};
pub use flow::{CachedImport, ImportFlow, ImportReport, Imported};
pub use material::{MaterialClassifier, MaterialProperties};
#[cfg(feature = "http")]
pub use resources::HttpFetcher;
pub use resources::{
    DirFetcher, Fetch,
    resolver::{NamedAsset, Package, PackageExtractor, ResolvedPackage, UrlSet},
};
