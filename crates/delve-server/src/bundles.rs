//! Fetching mod bundles from a URL or a directory.

use anyhow::{bail, Context, Result};
use delve_mods::bundle::MANIFEST_PATH;
use delve_mods::{ModBundle, ModManifest};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Load the bundle at `location`.
///
/// Remote bundles are read through their manifest: the manifest itself, the
/// entry module and every listed resource are fetched relative to the URL.
#[instrument(skip(client))]
pub async fn fetch(client: &Client, location: &str) -> Result<ModBundle> {
    if is_remote(location) {
        fetch_remote(client, location).await
    } else {
        let root = Path::new(location).to_path_buf();
        let bundle = tokio::task::spawn_blocking(move || ModBundle::from_dir(&root))
            .await
            .context("bundle reader panicked")??;
        info!(location, files = bundle.len(), "Bundle read from disk");
        Ok(bundle)
    }
}

async fn fetch_remote(client: &Client, base: &str) -> Result<ModBundle> {
    let base = base.trim_end_matches('/');
    let mut bundle = ModBundle::new();

    let manifest_bytes = fetch_file(client, base, MANIFEST_PATH).await?;
    let manifest: ModManifest =
        serde_json::from_slice(&manifest_bytes).context("bundle manifest is not valid JSON")?;
    bundle.insert(MANIFEST_PATH, manifest_bytes);

    for path in manifest.entry.iter().chain(manifest.resources.iter()) {
        let bytes = fetch_file(client, base, path).await?;
        bundle.insert(path, bytes);
    }

    info!(location = base, files = bundle.len(), "Bundle fetched");
    Ok(bundle)
}

async fn fetch_file(client: &Client, base: &str, path: &str) -> Result<Vec<u8>> {
    if path.split('/').any(|part| part == "..") {
        bail!("bundle path {} escapes the bundle", path);
    }
    let url = format!("{}/{}", base, path);
    debug!(url, "Fetching bundle file");

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        bail!("{} returned {}", url, response.status());
    }
    Ok(response.bytes().await?.to_vec())
}

pub fn http_client() -> Result<Client> {
    Ok(Client::builder().timeout(Duration::from_secs(30)).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_detection() {
        assert!(is_remote("https://mods.example/torches"));
        assert!(is_remote("http://localhost:9000/m"));
        assert!(!is_remote("./mods/torches"));
    }

    #[tokio::test]
    async fn test_directory_bundle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_PATH),
            br#"{"name":"art","version":"1"}"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("tiles")).unwrap();
        std::fs::write(dir.path().join("tiles").join("lamp.png"), [1, 2]).unwrap();

        let client = http_client().unwrap();
        let bundle = fetch(&client, dir.path().to_str().unwrap()).await.unwrap();

        assert_eq!(bundle.manifest().unwrap().name, "art");
        assert_eq!(bundle.resource("tiles/lamp.png"), Some(&[1u8, 2][..]));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let client = http_client().unwrap();
        assert!(fetch(&client, "/definitely/not/a/bundle").await.is_err());
    }
}
