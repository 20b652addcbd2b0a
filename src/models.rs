//! Model catalog and comparison selection.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::Backend;
use crate::config::SelectionBounds;
use crate::error::Result;
use crate::ui::{NotificationKind, Ui};

// -- Catalog wire types -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiModel {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context_window: u64,
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AiModel {
    pub fn typed_capabilities(&self) -> Vec<Capability> {
        self.capabilities.iter().map(|c| Capability::parse(c)).collect()
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.iter().any(|c| Capability::parse(c) == cap)
    }
}

/// Provider name → models.
pub type GroupedModels = BTreeMap<String, Vec<AiModel>>;

/// Capability name → model IDs, as served by `/models/capabilities`.
pub type ModelCapabilities = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBreakdown {
    pub provider: String,
    pub model_count: u64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub total_models: u64,
    pub total_providers: u64,
    pub average_cost: f64,
    pub cost_range: Range,
    pub context_window_range: Range,
    #[serde(default)]
    pub by_provider: Vec<ProviderBreakdown>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Text,
    Vision,
    Reasoning,
    Coding,
    Mathematics,
    FunctionCalling,
    Unknown,
}

impl Capability {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "text" => Capability::Text,
            "vision" => Capability::Vision,
            "reasoning" => Capability::Reasoning,
            "coding" => Capability::Coding,
            "mathematics" => Capability::Mathematics,
            "function-calling" => Capability::FunctionCalling,
            _ => Capability::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Vision => "vision",
            Capability::Reasoning => "reasoning",
            Capability::Coding => "coding",
            Capability::Mathematics => "mathematics",
            Capability::FunctionCalling => "function-calling",
            Capability::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Catalog ----------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub capability: Option<Capability>,
    pub provider: Option<String>,
    pub query: Option<String>,
}

/// Locally cached copy of the four catalog endpoints.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    pub models: Vec<AiModel>,
    pub grouped: GroupedModels,
    pub capabilities: ModelCapabilities,
    pub stats: Option<ModelStats>,
    pub has_fetched: bool,
    pub last_error: Option<String>,
}

impl ModelCatalog {
    async fn fetch_all(backend: &dyn Backend) -> Result<(Vec<AiModel>, GroupedModels, ModelCapabilities, ModelStats)> {
        tokio::try_join!(
            backend.list_models(),
            backend.grouped_models(),
            backend.capabilities(),
            backend.model_stats(),
        )
    }

    /// Fetch every dataset concurrently; failure is surfaced to the user.
    pub async fn load(&mut self, backend: &Arc<dyn Backend>, ui: &Ui) -> Result<()> {
        match self.refresh_from(backend.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                ui.notify(
                    NotificationKind::Error,
                    "Failed to Load Models",
                    Some(e.user_message()),
                    Some(8_000),
                );
                Err(e)
            }
        }
    }

    /// Background prefetch: failure is only logged.
    pub async fn load_silently(&mut self, backend: &Arc<dyn Backend>) {
        match self.refresh_from(backend.as_ref()).await {
            Ok(()) => info!(models = self.models.len(), "catalog refreshed in background"),
            Err(e) => warn!(error = %e, "background catalog fetch failed"),
        }
    }

    async fn refresh_from(&mut self, backend: &dyn Backend) -> Result<()> {
        self.last_error = None;
        let outcome = Self::fetch_all(backend).await;
        self.has_fetched = true;
        match outcome {
            Ok((models, grouped, capabilities, stats)) => {
                self.models = models;
                self.grouped = grouped;
                self.capabilities = capabilities;
                self.stats = Some(stats);
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.user_message());
                Err(e)
            }
        }
    }

    pub fn providers(&self) -> Vec<&str> {
        self.grouped.keys().map(String::as_str).collect()
    }

    pub fn by_id(&self, id: &str) -> Option<&AiModel> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn by_provider(&self, provider: &str) -> &[AiModel] {
        self.grouped.get(provider).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_capability(&self, cap: Capability) -> Vec<&AiModel> {
        let ids = match self.capabilities.get(cap.as_str()) {
            Some(ids) => ids,
            None => return Vec::new(),
        };
        self.models.iter().filter(|m| ids.contains(&m.id)).collect()
    }

    pub fn filter(&self, f: &CatalogFilter) -> Vec<&AiModel> {
        let cap_ids = f
            .capability
            .and_then(|c| self.capabilities.get(c.as_str()));
        let query = f.query.as_ref().map(|q| q.to_lowercase());

        self.models
            .iter()
            .filter(|m| cap_ids.map_or(true, |ids| ids.contains(&m.id)))
            .filter(|m| f.provider.as_ref().map_or(true, |p| &m.provider == p))
            .filter(|m| {
                let q = match &query {
                    Some(q) if !q.is_empty() => q,
                    _ => return true,
                };
                m.name.to_lowercase().contains(q)
                    || m.description.to_lowercase().contains(q)
                    || m.provider.to_lowercase().contains(q)
                    || m.capabilities.iter().any(|c| c.to_lowercase().contains(q))
            })
            .collect()
    }
}

// -- Selection --------------------------------------------------------------

/// Ordered, bounded set of model IDs picked for a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    ids: Vec<String>,
    bounds: SelectionBounds,
}

impl ModelSelection {
    pub fn new(bounds: SelectionBounds) -> Self {
        Self {
            ids: Vec::new(),
            bounds,
        }
    }

    /// Returns whether the model was added.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.ids.contains(&id) || self.ids.len() >= self.bounds.max_models {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn remove(&mut self, id: &str) {
        self.ids.retain(|m| m != id);
    }

    pub fn toggle(&mut self, id: &str) {
        if self.contains(id) {
            self.remove(id);
        } else {
            self.add(id);
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|m| m == id)
    }

    pub fn can_start_comparison(&self) -> bool {
        self.ids.len() >= self.bounds.min_models
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.bounds.max_models
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resolve the selected IDs against a catalog, skipping unknown ones.
    pub fn details<'a>(&self, catalog: &'a ModelCatalog) -> Vec<&'a AiModel> {
        self.ids.iter().filter_map(|id| catalog.by_id(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn model(id: &str, provider: &str, caps: &[&str]) -> AiModel {
        AiModel {
            id: id.into(),
            name: id.to_uppercase(),
            provider: provider.into(),
            description: format!("{provider} model"),
            context_window: 128_000,
            cost_per_1k_tokens: 0.01,
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn catalog() -> ModelCatalog {
        let models = vec![
            model("gpt-4o", "OpenAI", &["text", "vision"]),
            model("claude-3", "Anthropic", &["text", "coding"]),
            model("grok-2", "xAI", &["reasoning"]),
        ];
        let mut grouped = GroupedModels::new();
        for m in &models {
            grouped.entry(m.provider.clone()).or_default().push(m.clone());
        }
        let mut capabilities = ModelCapabilities::new();
        capabilities.insert("vision".into(), vec!["gpt-4o".into()]);
        capabilities.insert("coding".into(), vec!["claude-3".into()]);
        ModelCatalog {
            models,
            grouped,
            capabilities,
            ..Default::default()
        }
    }

    #[rstest]
    #[case("text", Capability::Text)]
    #[case("Vision", Capability::Vision)]
    #[case("function-calling", Capability::FunctionCalling)]
    #[case("telepathy", Capability::Unknown)]
    fn capability_parse(#[case] raw: &str, #[case] expected: Capability) {
        assert_eq!(Capability::parse(raw), expected);
    }

    #[test]
    fn model_json_uses_camel_case() {
        let raw = r#"{"id":"m","name":"M","provider":"OpenAI","description":"d",
            "contextWindow":8192,"costPer1kTokens":0.5,"capabilities":["coding"]}"#;
        let m: AiModel = serde_json::from_str(raw).unwrap();
        assert_eq!(m.context_window, 8192);
        assert!(m.has_capability(Capability::Coding));
    }

    #[test]
    fn filter_by_capability_and_query() {
        let cat = catalog();
        let vision = cat.filter(&CatalogFilter {
            capability: Some(Capability::Vision),
            ..Default::default()
        });
        assert_eq!(vision.len(), 1);
        assert_eq!(vision[0].id, "gpt-4o");

        let anthropic = cat.filter(&CatalogFilter {
            query: Some("anthropic".into()),
            ..Default::default()
        });
        assert_eq!(anthropic.len(), 1);
        assert_eq!(anthropic[0].id, "claude-3");
    }

    #[test]
    fn by_provider_unknown_is_empty() {
        assert!(catalog().by_provider("Nobody").is_empty());
        assert_eq!(catalog().providers(), vec!["Anthropic", "OpenAI", "xAI"]);
    }

    #[test]
    fn selection_respects_max_and_dedup() {
        let mut sel = ModelSelection::new(SelectionBounds::default());
        assert!(sel.add("a"));
        assert!(!sel.add("a"));
        assert!(sel.add("b"));
        assert!(sel.add("c"));
        assert!(!sel.add("d"));
        assert!(sel.is_full());
        assert_eq!(sel.as_slice(), &["a", "b", "c"]);
    }

    #[test]
    fn selection_can_start_needs_min() {
        let mut sel = ModelSelection::new(SelectionBounds::default());
        sel.add("a");
        assert!(!sel.can_start_comparison());
        sel.toggle("b");
        assert!(sel.can_start_comparison());
        sel.toggle("b");
        assert!(!sel.can_start_comparison());
    }

    #[test]
    fn selection_details_skips_unknown() {
        let mut sel = ModelSelection::new(SelectionBounds::default());
        sel.add("gpt-4o");
        sel.add("ghost");
        let cat = catalog();
        let details = sel.details(&cat);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].provider, "OpenAI");
    }
}
