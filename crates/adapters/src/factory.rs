//! Adapter registry: turns source descriptors into adapters by type key

use news_pulse_domain::{ConfigError, NewsAdapter, SourceDescriptor};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::news_service::{NewsServiceAdapter, NewsServiceParams};
use crate::rss::{RssAdapter, RssParams};
use crate::social::{HttpPageRenderer, SocialAdapter, SocialParams};
use crate::stub::{StubAdapter, StubParams};

/// Builds one adapter from its descriptor
pub type AdapterBuilder =
    Arc<dyn Fn(&SourceDescriptor) -> Result<Arc<dyn NewsAdapter>, ConfigError> + Send + Sync>;

pub struct AdapterRegistry {
    builders: BTreeMap<String, AdapterBuilder>,
}

impl AdapterRegistry {
    /// Registry with no adapter types
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Registry with `rss`, `news_service`, `social` and `stub`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("rss", |d| {
            let params: RssParams = parse_params(d)?;
            let adapter = RssAdapter::new(d.name.clone(), d.markets.clone(), params)
                .map_err(|e| invalid(d, e))?;
            Ok(Arc::new(adapter))
        });
        registry.register("news_service", |d| {
            let params: NewsServiceParams = parse_params(d)?;
            let adapter = NewsServiceAdapter::new(d.name.clone(), d.markets.clone(), params)
                .map_err(|e| invalid(d, e))?;
            Ok(Arc::new(adapter))
        });
        registry.register("social", |d| {
            let params: SocialParams = parse_params(d)?;
            if params.handles.is_empty() {
                return Err(invalid(d, "at least one handle is required"));
            }
            let renderer = HttpPageRenderer::new(Duration::from_secs(params.timeout_secs.max(1)))
                .map_err(|e| invalid(d, e))?;
            Ok(Arc::new(SocialAdapter::new(
                d.name.clone(),
                d.markets.clone(),
                params,
                Arc::new(renderer),
            )))
        });
        registry.register("stub", |d| {
            let params: StubParams = parse_params(d)?;
            Ok(Arc::new(StubAdapter::new(d.name.clone(), d.markets.clone(), params)))
        });
        registry
    }

    /// Add or replace the builder for `adapter_type`
    pub fn register<F>(&mut self, adapter_type: impl Into<String>, builder: F)
    where
        F: Fn(&SourceDescriptor) -> Result<Arc<dyn NewsAdapter>, ConfigError> + Send + Sync + 'static,
    {
        self.builders.insert(adapter_type.into(), Arc::new(builder));
    }

    pub fn types(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }

    pub fn build(&self, descriptor: &SourceDescriptor) -> Result<Arc<dyn NewsAdapter>, ConfigError> {
        if descriptor.markets.is_empty() {
            return Err(ConfigError::NoMarkets(descriptor.name.clone()));
        }
        let builder = self.builders.get(&descriptor.adapter_type).ok_or_else(|| {
            ConfigError::UnknownAdapterType {
                source_name: descriptor.name.clone(),
                adapter_type: descriptor.adapter_type.clone(),
            }
        })?;

        let adapter = builder(descriptor)?;
        tracing::debug!(
            adapter = %descriptor.name,
            adapter_type = %descriptor.adapter_type,
            markets = ?descriptor.markets,
            "Built adapter"
        );
        Ok(adapter)
    }

    /// Build every descriptor; the first invalid one aborts
    pub fn build_all(
        &self,
        descriptors: &[SourceDescriptor],
    ) -> Result<Vec<Arc<dyn NewsAdapter>>, ConfigError> {
        let mut seen = HashSet::new();
        descriptors
            .iter()
            .map(|descriptor| {
                if !seen.insert(descriptor.name.as_str()) {
                    return Err(ConfigError::DuplicateSource(descriptor.name.clone()));
                }
                self.build(descriptor)
            })
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Deserialize a descriptor's params; a missing table reads as empty
pub fn parse_params<T: DeserializeOwned>(descriptor: &SourceDescriptor) -> Result<T, ConfigError> {
    let value = match &descriptor.params {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| invalid(descriptor, e))
}

fn invalid(descriptor: &SourceDescriptor, error: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidParams {
        source_name: descriptor.name.clone(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use news_pulse_domain::{AdapterKind, Market};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn descriptor(name: &str, adapter_type: &str, params: serde_json::Value) -> SourceDescriptor {
        SourceDescriptor {
            name: name.to_string(),
            adapter_type: adapter_type.to_string(),
            markets: BTreeSet::from([Market::Us]),
            params,
        }
    }

    #[test]
    fn default_registry_knows_every_type() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(registry.types(), vec!["news_service", "rss", "social", "stub"]);
    }

    #[test]
    fn builds_each_default_type() {
        let registry = AdapterRegistry::with_defaults();
        let rss = registry
            .build(&descriptor(
                "wire",
                "rss",
                json!({ "feeds": [{ "url": "https://news.example/feed.xml" }] }),
            ))
            .unwrap();
        assert_eq!(rss.id(), "wire");
        assert_eq!(rss.kind(), AdapterKind::Rss);

        let api = registry
            .build(&descriptor(
                "api",
                "news_service",
                json!({ "api_key": "k", "default_sources": "reuters" }),
            ))
            .unwrap();
        assert_eq!(api.kind(), AdapterKind::NewsService);

        let social = registry
            .build(&descriptor("desk", "social", json!({ "handles": ["markets"] })))
            .unwrap();
        assert_eq!(social.kind(), AdapterKind::Social);

        let stub = registry
            .build(&descriptor("demo", "stub", serde_json::Value::Null))
            .unwrap();
        assert_eq!(stub.markets(), &BTreeSet::from([Market::Us]));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = AdapterRegistry::with_defaults()
            .build(&descriptor("x", "carrier_pigeon", json!({})))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::UnknownAdapterType { ref adapter_type, .. } if adapter_type == "carrier_pigeon"
        ));
    }

    #[test]
    fn empty_markets_are_rejected() {
        let mut d = descriptor("demo", "stub", json!({}));
        d.markets.clear();
        let err = AdapterRegistry::with_defaults().build(&d).err().unwrap();
        assert!(matches!(err, ConfigError::NoMarkets(name) if name == "demo"));
    }

    #[test]
    fn bad_params_are_invalid() {
        let err = AdapterRegistry::with_defaults()
            .build(&descriptor("wire", "rss", json!({ "feeds": "nope" })))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidParams { ref source_name, .. } if source_name == "wire"));

        let err = AdapterRegistry::with_defaults()
            .build(&descriptor("desk", "social", json!({ "handles": [] })))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidParams { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = AdapterRegistry::with_defaults()
            .build_all(&[
                descriptor("demo", "stub", json!({})),
                descriptor("demo", "stub", json!({})),
            ])
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::DuplicateSource(name) if name == "demo"));
    }

    #[test]
    fn custom_builders_can_be_registered() {
        let mut registry = AdapterRegistry::empty();
        registry.register("fixture", |d| {
            Ok(Arc::new(StubAdapter::new(d.name.clone(), d.markets.clone(), StubParams::default())))
        });
        let adapters = registry
            .build_all(&[descriptor("a", "fixture", json!({})), descriptor("b", "fixture", json!({}))])
            .unwrap();
        assert_eq!(adapters.len(), 2);
    }
}
