//! Import flow: package in, analyzed scene out.
//!
//! [`ImportFlow`] owns one instance of every pipeline stage (extractor with
//! its parser and classifier, analyzer). The cache is not owned; callers
//! pass it in so one cache can serve several flows.
//!
//! # Lifecycle
//!
//! 1. [`PackageExtractor::resolve`] assembles and normalizes the scene
//! 2. [`GeometryAnalyzer`] computes metrics and statistics
//! 3. the caller either keeps the [`Imported`] scene or stores it with
//!    [`ImportFlow::import_and_cache`]

use instant::{Duration, Instant};
use serde::Serialize;
use serde_json::Value;

use crate::{
    analysis::{GeometryAnalyzer, ModelStats, PhysicalMetrics},
    cache::{ModelCache, Put},
    context::ImportConfig,
    data_structures::{
        model::BufferLedger,
        scene_graph::{PartSummary, SceneGraph},
    },
    error::{Diagnostic, ImportError},
    resources::{
        Fetch,
        physics::PhysicsHints,
        resolver::{Package, PackageExtractor, ResolvedPackage},
    },
};

/// A freshly imported and analyzed scene.
#[derive(Debug)]
pub struct Imported {
    pub graph: SceneGraph,
    pub report: ImportReport,
}

/// Everything about an import except the scene itself.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub name: String,
    pub metrics: PhysicalMetrics,
    pub stats: ModelStats,
    pub parts: Vec<PartSummary>,
    /// Translation that would center the model on the ground plane.
    pub grounding_offset: [f64; 3],
    pub specification: Option<Value>,
    pub config: Option<String>,
    pub source_script: Option<String>,
    pub physics: PhysicsHints,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Result of [`ImportFlow::import_and_cache`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum CachedImport {
    /// The id was cached already; metrics were recomputed from the cached
    /// scene and nothing was fetched.
    Hit {
        metrics: PhysicalMetrics,
        stats: ModelStats,
    },
    Imported {
        report: ImportReport,
        evicted: Option<String>,
    },
}

pub struct ImportFlow<F> {
    extractor: PackageExtractor<F>,
    analyzer: GeometryAnalyzer,
}

impl<F: Fetch> ImportFlow<F> {
    pub fn new(fetcher: F, config: &ImportConfig) -> Self {
        Self::with_ledger(fetcher, config, BufferLedger::new())
    }

    pub fn with_ledger(fetcher: F, config: &ImportConfig, ledger: BufferLedger) -> Self {
        Self {
            extractor: PackageExtractor::new(fetcher, ledger)
                .with_timeouts(config.part_timeout, config.package_timeout)
                .with_size_limit(config.max_package_bytes),
            analyzer: GeometryAnalyzer::new(),
        }
    }

    pub fn ledger(&self) -> &BufferLedger {
        self.extractor.ledger()
    }

    pub fn analyzer(&self) -> &GeometryAnalyzer {
        &self.analyzer
    }

    pub async fn import(&self, package: Package) -> Result<Imported, ImportError> {
        let start = Instant::now();
        let resolved = self.extractor.resolve(package).await?;
        let imported = self.analyze(resolved, start);
        log::info!(
            "imported '{}' in {:?}: volume {:.6}, area {:.6}",
            imported.report.name,
            imported.report.elapsed,
            imported.report.metrics.volume,
            imported.report.metrics.surface_area
        );
        Ok(imported)
    }

    /// Serves `id` from the cache when present, otherwise imports the
    /// package and caches the scene under `id`.
    pub async fn import_and_cache(
        &self,
        id: &str,
        package: Package,
        cache: &mut ModelCache,
    ) -> Result<CachedImport, ImportError> {
        if let Some(graph) = cache.get(id) {
            log::debug!("'{id}' served from cache");
            return Ok(CachedImport::Hit {
                metrics: self.analyzer.analyze(graph),
                stats: self.analyzer.stats(graph),
            });
        }

        let Imported { graph, report } = self.import(package).await?;
        let evicted = match cache.put(id, graph) {
            Put::Inserted { evicted } => evicted,
            // checked above, and `&mut` rules out a concurrent insert
            Put::AlreadyCached(_) => None,
        };
        Ok(CachedImport::Imported { report, evicted })
    }

    fn analyze(&self, resolved: ResolvedPackage, start: Instant) -> Imported {
        let ResolvedPackage {
            graph,
            name,
            specification,
            config,
            source_script,
            physics,
            diagnostics,
        } = resolved;
        let mut report = ImportReport {
            name,
            metrics: self.analyzer.analyze(&graph),
            stats: self.analyzer.stats(&graph),
            parts: graph.parts(),
            grounding_offset: graph.grounding_offset(),
            specification,
            config,
            source_script,
            physics,
            diagnostics,
            elapsed: Duration::ZERO,
        };
        report.elapsed = start.elapsed();
        Imported { graph, report }
    }
}
