//! Hot-reloadable bands configuration.
//!
//! Content-hash polling (no OS-specific file watcher) publishes new
//! snapshots via an `arc_swap::ArcSwap` handle, so readers always see a
//! fully-formed, validated `BandSet` with no partial-update window.

use crate::bands::BandSet;
use crate::error::ConfigError;
use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Expands template directives in a raw configuration document before it is
/// parsed as JSON. A real templating engine is an external collaborator;
/// this trait is the seam.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, raw: &str) -> Result<String, ConfigError>;
}

/// No-op engine for plain (non-templated) configuration files.
pub struct PassthroughTemplate;

impl TemplateEngine for PassthroughTemplate {
    fn render(&self, raw: &str) -> Result<String, ConfigError> {
        Ok(raw.to_string())
    }
}

/// Minimal `{{VAR}}` substitution from process environment variables, for
/// the common case of injecting secrets/addresses into an otherwise static
/// bands document.
pub struct EnvTemplate;

impl TemplateEngine for EnvTemplate {
    fn render(&self, raw: &str) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(ConfigError::Template(format!("unterminated template directive near {:.20}", after)));
            };
            let var = after[..end].trim();
            let value = std::env::var(var)
                .map_err(|_| ConfigError::Template(format!("undefined template variable {var:?}")))?;
            out.push_str(&value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn parse_document(raw: &str) -> Result<BandSet, ConfigError> {
    // Unknown top-level keys prefixed with "_" are documentation anchors and
    // are simply ignored by serde's default (non-`deny_unknown_fields`)
    // behavior.
    serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Watches a configuration file for content changes and republishes parsed,
/// validated `BandSet` snapshots. A malformed edit never blanks the bands:
/// the previous valid snapshot stays current and the error is logged once.
pub struct ReloadableConfig {
    path: PathBuf,
    template: Box<dyn TemplateEngine>,
    last_hash: parking_lot::Mutex<Option<[u8; 32]>>,
    current: Arc<ArcSwap<BandSet>>,
    last_error_logged: parking_lot::Mutex<bool>,
}

impl ReloadableConfig {
    /// Performs the first read; fails if the initial document is missing or
    /// invalid (there is no "previous valid snapshot" to fall back on yet).
    pub fn load(path: impl AsRef<Path>, template: Box<dyn TemplateEngine>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rendered = template.render(&raw)?;
        let band_set = parse_document(&rendered)?;
        band_set.validate()?;

        Ok(Self {
            last_hash: parking_lot::Mutex::new(Some(hash(&raw))),
            current: Arc::new(ArcSwap::from_pointee(band_set)),
            path,
            template,
            last_error_logged: parking_lot::Mutex::new(false),
        })
    }

    /// The most recently published valid snapshot.
    pub fn snapshot(&self) -> Arc<BandSet> {
        self.current.load_full()
    }

    /// Re-reads the file if its content hash changed, publishing a new
    /// snapshot on success. Idempotent: if the content is unchanged, this is
    /// a no-op.
    pub fn poll(&self) {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                self.log_once(&format!("failed to read {}: {e}", self.path.display()));
                return;
            }
        };

        let digest = hash(&raw);
        {
            let mut last = self.last_hash.lock();
            if *last == Some(digest) {
                return;
            }
            *last = Some(digest);
        }

        match self
            .template
            .render(&raw)
            .and_then(|rendered| parse_document(&rendered))
            .and_then(|bands| {
                bands.validate()?;
                Ok(bands)
            }) {
            Ok(band_set) => {
                self.current.store(Arc::new(band_set));
                *self.last_error_logged.lock() = false;
                info!(path = %self.path.display(), "reloaded bands configuration");
            }
            Err(e) => self.log_once(&e.to_string()),
        }
    }

    fn log_once(&self, message: &str) {
        let mut logged = self.last_error_logged.lock();
        if !*logged {
            error!(path = %self.path.display(), error = %message, "invalid configuration edit; keeping previous snapshot");
            *logged = true;
        } else {
            warn!(path = %self.path.display(), "configuration still invalid");
        }
    }

    /// Spawns a background task that calls `poll` on `interval` until the
    /// returned handle is dropped/aborted.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.poll();
            }
        })
    }
}

fn hash(raw: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"{
        "buyBands": [{"minMargin":0.005,"avgMargin":0.01,"maxMargin":0.02,"minAmount":20,"avgAmount":30,"maxAmount":40,"dustCutoff":0}],
        "sellBands": []
    }"#;

    const INVALID: &str = r#"{
        "buyBands": [{"minMargin":0.02,"avgMargin":0.01,"maxMargin":0.02,"minAmount":20,"avgAmount":30,"maxAmount":40,"dustCutoff":0}],
        "sellBands": []
    }"#;

    #[test]
    fn loads_and_reloads_on_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let reloadable = ReloadableConfig::load(file.path(), Box::new(PassthroughTemplate)).unwrap();
        assert_eq!(reloadable.snapshot().buy_bands.len(), 1);

        let mut file2 = std::fs::OpenOptions::new().write(true).truncate(true).open(file.path()).unwrap();
        file2.write_all(r#"{"buyBands":[],"sellBands":[]}"#.as_bytes()).unwrap();
        drop(file2);

        reloadable.poll();
        assert_eq!(reloadable.snapshot().buy_bands.len(), 0);
    }

    #[test]
    fn invalid_edit_keeps_previous_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let reloadable = ReloadableConfig::load(file.path(), Box::new(PassthroughTemplate)).unwrap();

        let mut file2 = std::fs::OpenOptions::new().write(true).truncate(true).open(file.path()).unwrap();
        file2.write_all(INVALID.as_bytes()).unwrap();
        drop(file2);

        reloadable.poll();
        assert_eq!(reloadable.snapshot().buy_bands.len(), 1, "invalid edit must not replace the previous valid snapshot");

        let mut file3 = std::fs::OpenOptions::new().write(true).truncate(true).open(file.path()).unwrap();
        file3.write_all(r#"{"buyBands":[],"sellBands":[]}"#.as_bytes()).unwrap();
        drop(file3);
        reloadable.poll();
        assert_eq!(reloadable.snapshot().buy_bands.len(), 0, "a later valid edit must be accepted atomically");
    }

    #[test]
    fn idempotent_reread_is_a_noop() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();
        let reloadable = ReloadableConfig::load(file.path(), Box::new(PassthroughTemplate)).unwrap();
        let before = reloadable.snapshot();
        reloadable.poll();
        let after = reloadable.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn env_template_substitutes_variables() {
        std::env::set_var("KEEPER_TEST_VAR", "0.01");
        let template = EnvTemplate;
        let rendered = template.render(r#"{"avgMargin": {{KEEPER_TEST_VAR}}}"#).unwrap();
        assert_eq!(rendered, r#"{"avgMargin": 0.01}"#);
    }
}
