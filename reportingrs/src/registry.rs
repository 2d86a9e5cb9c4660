use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::glob;

use crate::config::{ReportingConfig, ReportingDefaults};
use crate::error::{Result, ReportingError};
use crate::filters::{DimensionFilter, SearchTermEvaluator};
use crate::metric::{Metric, MetricDefinition};
use crate::schema::{DimensionKind, Fact, FactBuilder, FactDefinition};

/// Immutable catalog of facts and metrics, built once at startup.
#[derive(Clone)]
pub struct SchemaRegistry {
    facts: HashMap<String, Arc<Fact>>,
    metrics: HashMap<String, Metric>,
    dialects: HashMap<String, String>,
    search: Option<Arc<dyn SearchTermEvaluator>>,
    defaults: ReportingDefaults,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("facts", &self.facts.keys().collect::<Vec<_>>())
            .field("metrics", &self.metrics.keys().collect::<Vec<_>>())
            .field("dialects", &self.dialects)
            .field("search", &self.search.is_some())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Load `facts/*.yml` and `metrics/*.yml` under `root`.
    pub fn load_from_dir<P: AsRef<Path>>(root: P, config: &ReportingConfig) -> Result<Self> {
        Self::builder()
            .config(config)
            .load_dir(root)?
            .build()
    }

    pub fn fact(&self, name: &str) -> Result<&Arc<Fact>> {
        self.facts
            .get(name)
            .ok_or_else(|| ReportingError::UnknownFact(name.to_string()))
    }

    pub fn metric(&self, name: &str) -> Result<&Metric> {
        self.metrics
            .get(name)
            .ok_or_else(|| ReportingError::UnknownMetric(name.to_string()))
    }

    pub fn facts(&self) -> impl Iterator<Item = &Arc<Fact>> {
        self.facts.values()
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    /// Adapter name of the fact's data source, when declared.
    pub fn dialect_name_for(&self, fact: &Fact) -> Option<&str> {
        self.dialects.get(&fact.data_source).map(String::as_str)
    }

    pub fn search_evaluator(&self) -> Option<&Arc<dyn SearchTermEvaluator>> {
        self.search.as_ref()
    }

    pub fn defaults(&self) -> &ReportingDefaults {
        &self.defaults
    }

    /// Declared filter on the fact, honouring the global search fallback.
    pub fn dimension_filter(&self, fact: &Fact, name: &str) -> Result<DimensionFilter> {
        fact.dimension_filter(name, self.defaults.search_fallback)
    }
}

#[derive(Default)]
pub struct SchemaRegistryBuilder {
    facts: Vec<FactBuilder>,
    metrics: Vec<MetricDefinition>,
    dialects: HashMap<String, String>,
    search: Option<Arc<dyn SearchTermEvaluator>>,
    defaults: ReportingDefaults,
}

impl SchemaRegistryBuilder {
    /// Take declaration defaults and datasource dialects from config.
    pub fn config(mut self, config: &ReportingConfig) -> Self {
        self.defaults = config.defaults.reporting.clone();
        for (name, dialect) in config.dialects() {
            self.dialects.insert(name.to_string(), dialect.to_string());
        }
        self
    }

    pub fn data_source(mut self, name: impl Into<String>, dialect: impl Into<String>) -> Self {
        self.dialects.insert(name.into(), dialect.into());
        self
    }

    pub fn search_evaluator(mut self, evaluator: Arc<dyn SearchTermEvaluator>) -> Self {
        self.search = Some(evaluator);
        self
    }

    pub fn fact(mut self, fact: FactBuilder) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn metric(mut self, metric: MetricDefinition) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn load_dir<P: AsRef<Path>>(mut self, root: P) -> Result<Self> {
        for path in yaml_files(root.as_ref().join("facts"))? {
            let contents = fs::read_to_string(&path)?;
            let def: FactDefinition = serde_yaml::from_str(&contents)?;
            tracing::debug!(path = %path.display(), fact = %def.name, "loaded fact");
            self.facts.push(def.into_builder());
        }
        for path in yaml_files(root.as_ref().join("metrics"))? {
            let contents = fs::read_to_string(&path)?;
            let def: MetricDefinition = serde_yaml::from_str(&contents)?;
            tracing::debug!(path = %path.display(), metric = %def.name, "loaded metric");
            self.metrics.push(def);
        }
        Ok(self)
    }

    pub fn build(self) -> Result<SchemaRegistry> {
        let mut facts = HashMap::new();
        for builder in self.facts {
            let fact = builder.build(&self.defaults)?;
            if facts.contains_key(&fact.name) {
                return Err(ReportingError::Validation(format!(
                    "fact '{}' declared twice",
                    fact.name
                )));
            }
            facts.insert(fact.name.clone(), Arc::new(fact));
        }

        for fact in facts.values() {
            for decl in fact.dimensions.values() {
                if let DimensionKind::Related { fact: related, .. } = &decl.kind {
                    if !facts.contains_key(related) {
                        return Err(ReportingError::UnknownFact(related.clone()));
                    }
                }
            }
            if self.search.is_none() && (fact.uses_search() || self.defaults.search_fallback) {
                return Err(ReportingError::SearchBackendUnavailable(format!(
                    "fact '{}' declares search filters",
                    fact.name
                )));
            }
        }

        let mut registry = SchemaRegistry {
            facts,
            metrics: HashMap::new(),
            dialects: self.dialects,
            search: self.search,
            defaults: self.defaults,
        };

        let mut metrics = HashMap::new();
        for def in self.metrics {
            let metric = Metric::new(&registry, def)?;
            if metrics.contains_key(metric.name()) {
                return Err(ReportingError::Validation(format!(
                    "metric '{}' declared twice",
                    metric.name()
                )));
            }
            metrics.insert(metric.name().to_string(), metric);
        }
        registry.metrics = metrics;

        tracing::info!(
            facts = registry.facts.len(),
            metrics = registry.metrics.len(),
            "schema registry built"
        );
        Ok(registry)
    }
}

fn yaml_files(dir: PathBuf) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Err(ReportingError::Validation(format!(
            "directory not found: {}",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for pattern in ["*.yml", "*.yaml"] {
        for entry in glob(&format!("{}/{pattern}", dir.display()))
            .map_err(|e| ReportingError::Other(e.into()))?
            .flatten()
        {
            files.push(entry);
        }
    }
    files.sort();
    Ok(files)
}
