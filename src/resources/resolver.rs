//! Turning a package into an assembled scene.
//!
//! Three shapes of package are understood:
//!
//! * a zip archive, optionally with a scene description and side files,
//! * a single mesh file (local bytes or a remote url),
//! * a remote scene description whose meshes live next to it or in a list
//!   of named assets.
//!
//! Whatever the path, the parts end up in an [`Assembly`] that is finalized
//! exactly once. Only problems with the package itself are fatal; a part
//! that cannot be found, fetched or decoded is skipped with a [`Diagnostic`].

use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};

use crate::{
    data_structures::{
        model::{BufferLedger, Geometry},
        scene_graph::{Assembly, SceneGraph},
        transform::Transform,
    },
    error::{Diagnostic, DiagnosticKind, ImportError},
    material::MaterialClassifier,
    resources::{
        Fetch,
        archive::{ArchiveContents, ArchiveEntry, MAX_PACKAGE_BYTES, is_safe_path},
        mesh::{self, ExternalBuffers, MeshFormat},
        physics::{PhysicsHints, parse_physics},
        sdf::{SceneDescriptionParser, VisualDescriptor, file_name},
        sibling_url, url_path, with_query_of,
    },
};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const FALLBACK_NAME: &str = "Generated Model";
/// Edge length of a specified part without `dimensions`.
const DEFAULT_PART_SIZE: f32 = 0.1;
const SPECIFICATION_SOURCE: &str = "specification.json";

#[derive(Clone, Debug)]
pub enum Package {
    /// An uploaded zip archive or a single mesh file.
    Bytes { file_name: String, bytes: Vec<u8> },
    Remote(UrlSet),
}

#[derive(Clone, Debug, Default)]
pub struct UrlSet {
    /// Scene description or mesh url.
    pub primary: String,
    /// Physics hints file.
    pub config: Option<String>,
    pub assets: Vec<NamedAsset>,
}

impl UrlSet {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, url: impl Into<String>) -> Self {
        self.config = Some(url.into());
        self
    }

    pub fn with_asset(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.assets.push(NamedAsset {
            name: name.into(),
            url: url.into(),
        });
        self
    }
}

/// A file published next to a generated model, e.g. one of its meshes.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedAsset {
    pub name: String,
    pub url: String,
}

#[derive(Debug)]
pub struct ResolvedPackage {
    pub graph: SceneGraph,
    pub name: String,
    pub specification: Option<Value>,
    pub config: Option<String>,
    pub source_script: Option<String>,
    pub physics: PhysicsHints,
    pub diagnostics: Vec<Diagnostic>,
}

/// Bytes of one part plus what its decoder needs.
struct FetchedPart {
    url: String,
    bytes: Vec<u8>,
    external: ExternalBuffers,
}

#[derive(Default)]
struct SideFiles {
    specification: Option<Value>,
    config: Option<String>,
    source_script: Option<String>,
    physics: PhysicsHints,
}

pub struct PackageExtractor<F> {
    fetcher: F,
    parser: SceneDescriptionParser,
    classifier: MaterialClassifier,
    ledger: BufferLedger,
    part_timeout: Duration,
    package_timeout: Duration,
    max_package_bytes: u64,
}

impl<F: Fetch> PackageExtractor<F> {
    pub fn new(fetcher: F, ledger: BufferLedger) -> Self {
        Self {
            fetcher,
            parser: SceneDescriptionParser::new(),
            classifier: MaterialClassifier::new(),
            ledger,
            part_timeout: Duration::from_secs(15),
            package_timeout: Duration::from_secs(60),
            max_package_bytes: MAX_PACKAGE_BYTES,
        }
    }

    pub fn with_timeouts(mut self, part: Duration, package: Duration) -> Self {
        self.part_timeout = part;
        self.package_timeout = package;
        self
    }

    /// Caps uploaded packages and the total size of inflated archive entries.
    pub fn with_size_limit(mut self, max_package_bytes: u64) -> Self {
        self.max_package_bytes = max_package_bytes;
        self
    }

    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    pub fn classifier(&self) -> &MaterialClassifier {
        &self.classifier
    }

    pub async fn resolve(&self, package: Package) -> Result<ResolvedPackage, ImportError> {
        match package {
            Package::Bytes { file_name, bytes } => {
                if bytes.len() as u64 > self.max_package_bytes {
                    Err(ImportError::TooLarge {
                        name: file_name,
                        limit: self.max_package_bytes,
                    })
                } else if is_archive(&file_name, &bytes) {
                    self.resolve_archive(&file_name, &bytes)
                } else if let Some(format) = MeshFormat::from_path(&file_name) {
                    self.resolve_mesh_bytes(&file_name, format, &bytes).await
                } else {
                    Err(ImportError::UnsupportedPackage(file_name))
                }
            }
            Package::Remote(urls) => match MeshFormat::from_path(url_path(&urls.primary)) {
                Some(format) => self.resolve_remote_mesh(&urls.primary, format).await,
                None => self.resolve_remote_description(urls).await,
            },
        }
    }

    fn resolve_archive(&self, archive_name: &str, bytes: &[u8]) -> Result<ResolvedPackage, ImportError> {
        let contents = ArchiveContents::read_with_limit(bytes, self.max_package_bytes)?;
        let mut diagnostics = contents.rejected.clone();

        let side = SideFiles {
            specification: contents
                .specification()
                .map(|entry| parse_specification(&entry.text())),
            config: contents.config().map(ArchiveEntry::text),
            source_script: contents.source_script().map(ArchiveEntry::text),
            physics: contents
                .physics()
                .map(|entry| parse_physics(&entry.text()))
                .unwrap_or_default(),
        };
        let name = model_name(side.specification.as_ref())
            .or_else(|| archive_stem(archive_name))
            .unwrap_or_else(|| FALLBACK_NAME.to_string());
        log::info!("importing archive '{archive_name}' as '{name}'");

        let mut assembly = Assembly::new(&name);
        let direct = match contents.scene_description() {
            Some(description) => match self.parser.parse(&description.text()) {
                Ok(visuals) => {
                    let matched = if visuals.is_empty() {
                        self.attach_specified_parts(side.specification.as_ref(), &mut assembly)
                    } else {
                        self.attach_visuals(&contents, &visuals, &mut assembly, &mut diagnostics)
                    };
                    if matched == 0 && !contents.meshes().is_empty() {
                        diagnostics.push(Diagnostic::new(
                            DiagnosticKind::FallbackToDirectMeshes,
                            &description.path,
                            "no visual matched a mesh in the archive, loading every mesh directly",
                        ));
                        true
                    } else {
                        false
                    }
                }
                Err(err) => {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::DescriptorInvalid,
                        &description.path,
                        format!("{err}, loading every mesh directly"),
                    ));
                    true
                }
            },
            None => true,
        };
        if direct {
            for entry in contents.meshes() {
                let part_name = display_name(entry.file_name());
                self.attach_entry(
                    &contents,
                    entry,
                    &part_name,
                    Transform::new(),
                    &mut assembly,
                    &mut diagnostics,
                );
            }
        }

        Ok(finish(assembly, name, side, diagnostics))
    }

    /// Attaches every visual whose mesh is in the archive. Returns how many
    /// visuals found their mesh.
    fn attach_visuals(
        &self,
        contents: &ArchiveContents,
        visuals: &[VisualDescriptor],
        assembly: &mut Assembly,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> usize {
        let mut matched = 0;
        for visual in visuals {
            match contents.find_mesh(&visual.mesh_reference) {
                Some(entry) => {
                    matched += 1;
                    self.attach_entry(
                        contents,
                        entry,
                        &visual.name,
                        visual.placement(),
                        assembly,
                        diagnostics,
                    );
                }
                None => diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UnresolvedMesh,
                    &visual.mesh_reference,
                    format!("no archive entry for visual '{}'", visual.name),
                )),
            }
        }
        matched
    }

    fn attach_entry(
        &self,
        contents: &ArchiveContents,
        entry: &ArchiveEntry,
        part_name: &str,
        transform: Transform,
        assembly: &mut Assembly,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let Some(format) = MeshFormat::from_path(&entry.path) else {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::UnsupportedFormat,
                &entry.path,
                "unsupported mesh format",
            ));
            return;
        };
        let mut external = ExternalBuffers::new();
        if format == MeshFormat::Gltf {
            for uri in mesh::gltf_external_uris(&entry.bytes).unwrap_or_default() {
                let path = sibling_url(&entry.path, &uri);
                match contents.get(&path).filter(|_| is_safe_path(&path)) {
                    Some(sibling) => {
                        external.insert(uri, sibling.bytes.clone());
                    }
                    None => log::warn!("{}: buffer '{uri}' is not in the archive", entry.path),
                }
            }
        }
        self.attach(
            part_name,
            entry.file_name(),
            format,
            &entry.bytes,
            &external,
            transform,
            assembly,
            diagnostics,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn attach(
        &self,
        part_name: &str,
        source_file: &str,
        format: MeshFormat,
        bytes: &[u8],
        external: &ExternalBuffers,
        transform: Transform,
        assembly: &mut Assembly,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        match mesh::decode(format, part_name, bytes, external, &self.ledger) {
            Ok(geometry) => {
                let material = self.classifier.classify(part_name);
                let id = assembly.attach(part_name, geometry, material, source_file, transform);
                log::debug!("attached part {id} '{part_name}' from {source_file}");
            }
            Err(err) => diagnostics.push(Diagnostic::new(
                DiagnosticKind::DecodeFailed,
                source_file,
                format!("{err:#}"),
            )),
        }
    }

    /// Attaches one box per entry of the specification's `parts`, sized by
    /// its `dimensions` and centered on its `placement`. Used when the scene
    /// description has no visuals at all.
    fn attach_specified_parts(&self, specification: Option<&Value>, assembly: &mut Assembly) -> usize {
        let Some(parts) = specification
            .and_then(|specification| specification.get("parts"))
            .and_then(Value::as_array)
        else {
            return 0;
        };
        for (i, part) in parts.iter().enumerate() {
            let name = part
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| format!("part_{i}"), str::to_string);
            let size = match part.get("dimensions") {
                Some(dimensions) => {
                    ["length", "width", "height"].map(|key| number(dimensions, key, DEFAULT_PART_SIZE))
                }
                None => [DEFAULT_PART_SIZE; 3],
            };
            let position = match part.get("placement") {
                Some(placement) => ["x", "y", "z"].map(|key| number(placement, key, 0.0)),
                None => [0.0; 3],
            };
            let geometry = Geometry::cuboid(&name, size, &self.ledger);
            let material = self.classifier.classify(&name);
            assembly.attach(
                &name,
                geometry,
                material,
                SPECIFICATION_SOURCE,
                Transform::from_pose(position, [0.0; 3]),
            );
        }
        log::info!("built {} parts from the specification", parts.len());
        parts.len()
    }

    /// A local mesh. External `.gltf` buffers are read through the fetcher,
    /// relative to the mesh.
    async fn resolve_mesh_bytes(
        &self,
        file_name: &str,
        format: MeshFormat,
        bytes: &[u8],
    ) -> Result<ResolvedPackage, ImportError> {
        let name = display_name(file_name);
        let mut external = ExternalBuffers::new();
        if format == MeshFormat::Gltf {
            for uri in mesh::gltf_external_uris(bytes).unwrap_or_default() {
                let url = sibling_url(file_name, &uri);
                let data = tokio::time::timeout(self.package_timeout, self.fetcher.fetch(&url))
                    .await
                    .map_err(|_| ImportError::Timeout { url: url.clone() })?
                    .map_err(|source| ImportError::Fetch { url, source })?;
                external.insert(uri, data);
            }
        }
        let mut assembly = Assembly::new(&name);
        self.attach_direct(&mut assembly, &name, file_name, format, bytes, &external)?;
        Ok(finish(assembly, name, SideFiles::default(), Vec::new()))
    }

    async fn resolve_remote_mesh(
        &self,
        url: &str,
        format: MeshFormat,
    ) -> Result<ResolvedPackage, ImportError> {
        let source_file = file_name(url_path(url)).to_string();
        let name = display_name(&source_file);
        log::info!("importing mesh {url} as '{name}'");

        let fetched = tokio::time::timeout(self.package_timeout, self.fetch_part(url, format))
            .await
            .map_err(|_| ImportError::Timeout { url: url.to_string() })?
            .map_err(|source| ImportError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let mut assembly = Assembly::new(&name);
        self.attach_direct(
            &mut assembly,
            &name,
            &source_file,
            format,
            &fetched.bytes,
            &fetched.external,
        )?;
        Ok(finish(assembly, name, SideFiles::default(), Vec::new()))
    }

    /// Single-mesh imports: a decode failure is fatal.
    fn attach_direct(
        &self,
        assembly: &mut Assembly,
        name: &str,
        source_file: &str,
        format: MeshFormat,
        bytes: &[u8],
        external: &ExternalBuffers,
    ) -> Result<(), ImportError> {
        let geometry = mesh::decode(format, name, bytes, external, &self.ledger).map_err(|source| {
            ImportError::Decode {
                name: source_file.to_string(),
                source,
            }
        })?;
        let material = self.classifier.classify(name);
        assembly.attach(name, geometry, material, source_file, Transform::new());
        Ok(())
    }

    async fn resolve_remote_description(&self, urls: UrlSet) -> Result<ResolvedPackage, ImportError> {
        let primary = urls.primary.as_str();
        let text = tokio::time::timeout(self.package_timeout, self.fetcher.fetch(primary))
            .await
            .map_err(|_| ImportError::Timeout {
                url: primary.to_string(),
            })?
            .map_err(|source| ImportError::Fetch {
                url: primary.to_string(),
                source,
            })?;
        let visuals = self.parser.parse(&String::from_utf8_lossy(&text))?;
        log::info!("{primary} describes {} visuals", visuals.len());

        let fetches = visuals.iter().map(|visual| self.fetch_visual(&urls, visual));
        let (fetched, side) = futures::join!(join_all(fetches), self.fetch_side_files(&urls));
        let (side, mut diagnostics) = side;

        let name = model_name(side.specification.as_ref())
            .or_else(|| url_model_name(primary))
            .unwrap_or_else(|| FALLBACK_NAME.to_string());
        let mut assembly = Assembly::new(&name);
        if visuals.is_empty() {
            self.attach_specified_parts(side.specification.as_ref(), &mut assembly);
        }
        for (visual, result) in visuals.iter().zip(fetched) {
            match result {
                Ok((format, part)) => self.attach(
                    &visual.name,
                    file_name(url_path(&part.url)),
                    format,
                    &part.bytes,
                    &part.external,
                    visual.placement(),
                    &mut assembly,
                    &mut diagnostics,
                ),
                Err(diagnostic) => diagnostics.push(diagnostic),
            }
        }

        Ok(finish(assembly, name, side, diagnostics))
    }

    /// Fetches the mesh of one visual, trying every candidate url in order
    /// under a single part timeout.
    async fn fetch_visual(
        &self,
        urls: &UrlSet,
        visual: &VisualDescriptor,
    ) -> Result<(MeshFormat, FetchedPart), Diagnostic> {
        let reference = visual.mesh_reference.as_str();
        let Some(format) = MeshFormat::from_path(reference) else {
            return Err(Diagnostic::new(
                DiagnosticKind::UnsupportedFormat,
                reference,
                format!("visual '{}' has no supported mesh", visual.name),
            ));
        };
        let candidates = candidate_urls(urls, reference);

        let attempt = async {
            let mut last_error = None;
            for url in &candidates {
                match self.fetch_part(url, format).await {
                    Ok(part) => return Ok(part),
                    Err(err) => {
                        log::debug!("{} not at {url}: {err:#}", visual.name);
                        last_error = Some(err);
                    }
                }
            }
            Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no candidate urls")))
        };
        match tokio::time::timeout(self.part_timeout, attempt).await {
            Ok(Ok(part)) => Ok((format, part)),
            Ok(Err(err)) => Err(Diagnostic::new(
                DiagnosticKind::FetchFailed,
                reference,
                format!("tried {}: {err:#}", candidates.join(", ")),
            )),
            Err(_) => Err(Diagnostic::new(
                DiagnosticKind::Timeout,
                reference,
                format!("no response within {:?}", self.part_timeout),
            )),
        }
    }

    /// Fetches a mesh and, for `.gltf`, the buffers it references.
    async fn fetch_part(&self, url: &str, format: MeshFormat) -> anyhow::Result<FetchedPart> {
        let bytes = self.fetcher.fetch(url).await?;
        let mut external = ExternalBuffers::new();
        if format == MeshFormat::Gltf {
            for uri in mesh::gltf_external_uris(&bytes).unwrap_or_default() {
                let data = self
                    .fetcher
                    .fetch(&with_query_of(sibling_url(url, &uri), url))
                    .await?;
                external.insert(uri, data);
            }
        }
        Ok(FetchedPart {
            url: url.to_string(),
            bytes,
            external,
        })
    }

    async fn fetch_side_files(&self, urls: &UrlSet) -> (SideFiles, Vec<Diagnostic>) {
        let mut side = SideFiles::default();
        let mut diagnostics = Vec::new();

        if let Some(url) = &urls.config {
            match self.fetch_text(url).await {
                Ok(text) => side.physics = parse_physics(&text),
                Err(diagnostic) => diagnostics.push(diagnostic),
            }
        }
        for asset in &urls.assets {
            let name = asset.name.to_ascii_lowercase();
            if name == "specification.json" || name == "specification" {
                match self.fetch_text(&asset.url).await {
                    Ok(text) => side.specification = Some(parse_specification(&text)),
                    Err(diagnostic) => diagnostics.push(diagnostic),
                }
            } else if side.source_script.is_none() && (name.ends_with(".py") || name.ends_with(".scad")) {
                match self.fetch_text(&asset.url).await {
                    Ok(text) => side.source_script = Some(text),
                    Err(diagnostic) => diagnostics.push(diagnostic),
                }
            }
        }
        (side, diagnostics)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, Diagnostic> {
        match tokio::time::timeout(self.part_timeout, self.fetcher.fetch(url)).await {
            Ok(Ok(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(Err(err)) => Err(Diagnostic::new(
                DiagnosticKind::SideFileFailed,
                url,
                format!("{err:#}"),
            )),
            Err(_) => Err(Diagnostic::new(
                DiagnosticKind::SideFileFailed,
                url,
                "timed out",
            )),
        }
    }
}

fn finish(
    assembly: Assembly,
    name: String,
    side: SideFiles,
    mut diagnostics: Vec<Diagnostic>,
) -> ResolvedPackage {
    if assembly.part_count() == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::EmptyImport,
            &name,
            "no parts could be assembled",
        ));
    }
    let graph = assembly.finalize();
    log::info!(
        "resolved '{name}': {} parts, {} diagnostics",
        graph.meshes().len(),
        diagnostics.len()
    );
    ResolvedPackage {
        graph,
        name,
        specification: side.specification,
        config: side.config,
        source_script: side.source_script,
        physics: side.physics,
        diagnostics,
    }
}

fn is_archive(file_name: &str, bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC) || file_name.to_ascii_lowercase().ends_with(".zip")
}

/// Urls to try for a mesh reference: matching named assets first, then
/// the exact path, the bare file name and `meshes/<file name>` next to the
/// scene description.
fn candidate_urls(urls: &UrlSet, reference: &str) -> Vec<String> {
    let name = file_name(reference);
    let asset_matches = |needle: &str| {
        let suffix = format!("/{needle}");
        let aligned = |path: &str| path == needle || path.ends_with(&suffix);
        urls.assets
            .iter()
            .filter(|asset| aligned(&asset.name) || aligned(url_path(&asset.url)))
            .map(|asset| asset.url.clone())
            .collect::<Vec<_>>()
    };
    let exact = asset_matches(reference);
    if !exact.is_empty() {
        return exact;
    }
    let by_name = asset_matches(name);
    if !by_name.is_empty() {
        return by_name;
    }

    let mut candidates = Vec::with_capacity(3);
    for relative in [reference.to_string(), name.to_string(), format!("meshes/{name}")] {
        let url = sibling_url(&urls.primary, &relative);
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    }
    candidates
}

/// Part name from a mesh file name: `front_left-wheel.stl` is
/// `Front Left Wheel`.
pub fn display_name(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    let name = stem
        .split(['_', '-'])
        .filter(|token| !token.is_empty())
        .map(|token| {
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() { file_name.to_string() } else { name }
}

/// Keeps unparsable specifications as `{"raw": text}`.
fn parse_specification(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|err| {
        log::warn!("specification is not valid JSON ({err}), keeping it as raw text");
        json!({ "raw": text })
    })
}

fn number(object: &Value, key: &str, default: f32) -> f32 {
    object
        .get(key)
        .and_then(Value::as_f64)
        .map_or(default, |value| value as f32)
}

fn model_name(specification: Option<&Value>) -> Option<String> {
    specification?
        .get("model_name")?
        .as_str()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn archive_stem(archive_name: &str) -> Option<String> {
    let name = file_name(archive_name);
    let stem = if name.to_ascii_lowercase().ends_with(".zip") {
        &name[..name.len() - 4]
    } else {
        name
    };
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Directory name of the scene description, e.g. `drone_x1` for
/// `https://host/models/drone_x1/model.sdf`.
fn url_model_name(url: &str) -> Option<String> {
    let mut segments = url_path(url).rsplit('/');
    segments.next()?;
    segments
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
}
