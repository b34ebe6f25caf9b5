//! Worker configuration: version tag, precache list, and bucket naming.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Version scalar embedded in the precache bucket name.
///
/// Bumping the tag is the only way to invalidate the precache: a new tag
/// yields a new bucket name, which leaves the old bucket off the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawVersion", into = "String")]
pub struct VersionTag(String);

impl VersionTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for VersionTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<u32> for VersionTag {
    fn from(tag: u32) -> Self {
        Self(tag.to_string())
    }
}

impl From<u64> for VersionTag {
    fn from(tag: u64) -> Self {
        Self(tag.to_string())
    }
}

// Rendered like a script's number-to-string: `1.0` is `1`, `-0.0` is `0`,
// and magnitudes from 1e21 up (or below 1e-6) use exponent form (`1e+21`).
impl From<f64> for VersionTag {
    fn from(tag: f64) -> Self {
        Self(render_number(tag))
    }
}

fn render_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = n.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let exp = format!("{:e}", n);
        return match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => {
                format!("{}e+{}", mantissa, power)
            }
            _ => exp,
        };
    }
    n.to_string()
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl From<RawVersion> for VersionTag {
    fn from(raw: RawVersion) -> Self {
        match raw {
            RawVersion::Integer(n) => n.into(),
            RawVersion::Float(n) => n.into(),
            RawVersion::Text(s) => s.into(),
        }
    }
}

/// Configuration injected into a worker at startup. Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Version tag for the precache bucket.
    pub version: VersionTag,

    /// Assets required for offline operation, relative to the script URL.
    pub precache_urls: Vec<String>,

    /// Prefix of the precache bucket name.
    pub bucket_prefix: String,

    /// Bucket filled lazily on cache misses.
    pub progressive_bucket: String,

    /// Extra bucket names that activation must never delete.
    #[serde(default)]
    pub retained_buckets: Vec<String>,

    /// Skip the waiting state once installed.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Take control of open pages on activation.
    #[serde(default)]
    pub claim_clients: bool,

    /// Cached page served when a navigation fails on the network.
    /// Disabled unless set.
    #[serde(default)]
    pub offline_fallback: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: VersionTag::from(1.0),
            precache_urls: vec![
                "/".to_string(),
                "/styles/styles.css".to_string(),
                "/script/main.js".to_string(),
            ],
            bucket_prefix: "precache".to_string(),
            progressive_bucket: "progressive-cache".to_string(),
            retained_buckets: Vec::new(),
            skip_waiting: true,
            claim_clients: false,
            offline_fallback: None,
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with the default bucket names.
    pub fn new<I, S>(version: impl Into<VersionTag>, precache_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: version.into(),
            precache_urls: precache_urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_bucket_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bucket_prefix = prefix.into();
        self
    }

    pub fn with_progressive_bucket(mut self, name: impl Into<String>) -> Self {
        self.progressive_bucket = name.into();
        self
    }

    pub fn retain_bucket(mut self, name: impl Into<String>) -> Self {
        self.retained_buckets.push(name.into());
        self
    }

    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    pub fn with_claim_clients(mut self, claim: bool) -> Self {
        self.claim_clients = claim;
        self
    }

    pub fn with_offline_fallback(mut self, url: impl Into<String>) -> Self {
        self.offline_fallback = Some(url.into());
        self
    }

    /// Name of this version's precache bucket: `<prefix>-v<version>`.
    pub fn precache_bucket(&self) -> String {
        format!("{}-v{}", self.bucket_prefix, self.version)
    }

    /// Bucket names this version keeps during activation.
    pub fn allow_list(&self) -> HashSet<String> {
        let mut allow: HashSet<String> = self.retained_buckets.iter().cloned().collect();
        allow.insert(self.precache_bucket());
        allow.insert(self.progressive_bucket.clone());
        allow
    }

    /// Resolve the precache list against the worker script URL.
    pub fn resolve_precache(&self, script_url: &Url) -> Result<Vec<Url>> {
        self.precache_urls
            .iter()
            .map(|u| resolve(script_url, u))
            .collect()
    }

    /// Resolve the offline fallback page, if one is configured.
    pub fn resolve_fallback(&self, script_url: &Url) -> Result<Option<Url>> {
        self.offline_fallback
            .as_deref()
            .map(|u| resolve(script_url, u))
            .transpose()
    }

    /// Check the configuration before a worker is built from it.
    pub fn validate(&self, script_url: &Url) -> Result<()> {
        if self.bucket_prefix.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "bucket prefix must not be empty".to_string(),
            ));
        }
        if self.version.as_str().trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "version tag must not be empty".to_string(),
            ));
        }
        if self.progressive_bucket.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "progressive bucket name must not be empty".to_string(),
            ));
        }
        if self.progressive_bucket == self.precache_bucket() {
            return Err(ServiceWorkerError::Config(format!(
                "progressive bucket '{}' collides with the precache bucket",
                self.progressive_bucket
            )));
        }

        let mut seen = HashSet::new();
        for url in self.resolve_precache(script_url)? {
            let mut key = url.clone();
            key.set_fragment(None);
            if !seen.insert(key) {
                return Err(ServiceWorkerError::Config(format!(
                    "duplicate precache entry: {}",
                    url
                )));
            }
        }

        self.resolve_fallback(script_url)?;
        Ok(())
    }
}

fn resolve(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative)
        .map_err(|e| ServiceWorkerError::Config(format!("invalid URL '{}': {}", relative, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> Url {
        Url::parse("https://example.com/service-worker.js").unwrap()
    }

    #[test]
    fn test_version_tag_rendering() {
        assert_eq!(VersionTag::from(1.0).as_str(), "1");
        assert_eq!(VersionTag::from(1.5).as_str(), "1.5");
        assert_eq!(VersionTag::from(7u32).as_str(), "7");
        assert_eq!(VersionTag::from(-0.0).as_str(), "0");
        assert_eq!(VersionTag::from("2024-06").as_str(), "2024-06");
    }

    #[test]
    fn test_version_tag_large_and_tiny_floats_use_exponent_form() {
        assert_eq!(VersionTag::from(1e21).as_str(), "1e+21");
        assert_eq!(VersionTag::from(1.5e22).as_str(), "1.5e+22");
        assert_eq!(VersionTag::from(1e20).as_str(), "100000000000000000000");
        assert_eq!(VersionTag::from(1.5e-7).as_str(), "1.5e-7");
        assert_eq!(VersionTag::from(0.000001).as_str(), "0.000001");
    }

    #[test]
    fn test_version_tag_deserializes_numbers_and_strings() {
        let tags: Vec<VersionTag> = serde_json::from_str(r#"[2, 1.5, "beta"]"#).unwrap();
        assert_eq!(tags[0].as_str(), "2");
        assert_eq!(tags[1].as_str(), "1.5");
        assert_eq!(tags[2].as_str(), "beta");
    }

    #[test]
    fn test_precache_bucket_name() {
        let config = WorkerConfig::new(2u32, ["/"]);
        assert_eq!(config.precache_bucket(), "precache-v2");

        let config = config.with_bucket_prefix("offline");
        assert_eq!(config.precache_bucket(), "offline-v2");
    }

    #[test]
    fn test_distinct_versions_give_distinct_buckets() {
        let v1 = WorkerConfig::new(1u32, ["/"]);
        let v2 = WorkerConfig::new(2u32, ["/"]);
        assert_ne!(v1.precache_bucket(), v2.precache_bucket());
    }

    #[test]
    fn test_allow_list() {
        let config = WorkerConfig::new(2u32, ["/"]).retain_bucket("fonts");
        let allow = config.allow_list();

        assert_eq!(allow.len(), 3);
        assert!(allow.contains("precache-v2"));
        assert!(allow.contains("progressive-cache"));
        assert!(allow.contains("fonts"));
        assert!(!allow.contains("precache-v1"));
    }

    #[test]
    fn test_resolve_precache() {
        let config = WorkerConfig::default();
        let urls = config.resolve_precache(&script()).unwrap();

        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0].as_str(), "https://example.com/");
        assert_eq!(urls[1].as_str(), "https://example.com/styles/styles.css");
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(WorkerConfig::default().validate(&script()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let empty_prefix = WorkerConfig::default().with_bucket_prefix(" ");
        assert!(matches!(
            empty_prefix.validate(&script()),
            Err(ServiceWorkerError::Config(_))
        ));

        let collision = WorkerConfig::new(3u32, ["/"]).with_progressive_bucket("precache-v3");
        assert!(collision.validate(&script()).is_err());

        let empty_version = WorkerConfig::new("", ["/"]);
        assert!(empty_version.validate(&script()).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = WorkerConfig::new(1u32, ["/app.js", "app.js"]);
        assert!(config.validate(&script()).is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{
                "version": 3,
                "precache_urls": ["/"],
                "bucket_prefix": "precache",
                "progressive_bucket": "progressive-cache"
            }"#,
        )
        .unwrap();

        assert_eq!(config.precache_bucket(), "precache-v3");
        assert!(config.skip_waiting);
        assert!(!config.claim_clients);
        assert!(config.offline_fallback.is_none());
    }
}
