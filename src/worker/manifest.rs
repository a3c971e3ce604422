use color_eyre::{eyre::eyre, Result};
use url::Url;

/// The application shell: assets seeded at install and served cache-first.
#[derive(Debug, Clone)]
pub struct ShellManifest {
  assets: Vec<Url>,
}

impl ShellManifest {
  /// Resolve `entries` (e.g. `./index.html`) against the application base URL.
  pub fn new(base: &Url, entries: &[String]) -> Result<Self> {
    let assets = entries
      .iter()
      .map(|entry| {
        base
          .join(entry)
          .map_err(|e| eyre!("Invalid shell asset '{}': {}", entry, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { assets })
  }

  /// Resolved asset URLs, in manifest order.
  pub fn assets(&self) -> &[Url] {
    &self.assets
  }

  /// Whether `url` names a shell asset.
  ///
  /// Origins must match and paths must be equal after URL normalisation. The
  /// query string is ignored.
  pub fn contains(&self, url: &Url) -> bool {
    self
      .assets
      .iter()
      .any(|asset| asset.origin() == url.origin() && asset.path() == url.path())
  }
}
