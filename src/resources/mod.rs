//! Loading packages and their payloads from external sources.
//!
//! Byte transport is behind [`Fetch`]: [`HttpFetcher`] for remote assets,
//! [`DirFetcher`] for a local asset directory. Everything after the bytes
//! arrive (archive reading, scene descriptions, mesh decoding) lives in the
//! submodules.

use std::path::PathBuf;

use anyhow::Context;

pub mod archive;
pub mod mesh;
pub mod physics;
pub mod resolver;
pub mod sdf;

/// Source of raw bytes for a url or path.
pub trait Fetch {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send;
}

#[cfg(feature = "http")]
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send {
        let request = self.client.get(url);
        let url = url.to_string();
        async move {
            let response = request
                .send()
                .await
                .with_context(|| format!("request to {url} failed"))?
                .error_for_status()?;
            let bytes = response.bytes().await?;
            log::debug!("fetched {} bytes from {url}", bytes.len());
            Ok(bytes.to_vec())
        }
    }
}

/// Reads assets below a root directory. Urls are interpreted as paths
/// relative to the root; a leading `file://` or `/` is ignored.
#[derive(Clone, Debug)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Fetch for DirFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<Vec<u8>>> + Send {
        let relative = url
            .strip_prefix("file://")
            .unwrap_or(url)
            .trim_start_matches('/')
            .to_string();
        let path = self.root.join(&relative);
        async move {
            anyhow::ensure!(
                archive::is_safe_path(&relative),
                "{relative} points outside the asset root"
            );
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("could not read {}", path.display()))
        }
    }
}

/// Strips query and fragment from a url.
pub fn url_path(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Resolves `relative` against the directory of `base`.
pub fn sibling_url(base: &str, relative: &str) -> String {
    let base = url_path(base);
    let dir = match base.rfind('/') {
        Some(i) => &base[..=i],
        None => "",
    };
    format!("{dir}{}", relative.trim_start_matches("./"))
}

/// Carries the query of `base` over to `url` when `url` has none, so
/// sibling requests keep a token-bearing query.
pub fn with_query_of(url: String, base: &str) -> String {
    let base = base.split('#').next().unwrap_or(base);
    match base.find('?') {
        Some(start) if !url.contains('?') => format!("{url}{}", &base[start..]),
        _ => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_urls() {
        assert_eq!(
            sibling_url("https://host/models/drone/model.sdf?token=a/b", "meshes/arm.stl"),
            "https://host/models/drone/meshes/arm.stl"
        );
        assert_eq!(sibling_url("model.sdf", "./a.stl"), "a.stl");
    }

    #[test]
    fn queries_carry_over() {
        let base = "https://host/parts/gear.gltf?token=abc#view";
        assert_eq!(
            with_query_of(sibling_url(base, "gear.bin"), base),
            "https://host/parts/gear.bin?token=abc"
        );
        assert_eq!(with_query_of("https://host/a.bin?v=2".to_string(), base), "https://host/a.bin?v=2");
        assert_eq!(with_query_of("b.bin".to_string(), "a.gltf"), "b.bin");
    }
}
