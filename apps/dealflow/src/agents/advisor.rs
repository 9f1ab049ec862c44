// Advisory text generation for routing
//
// Generated text never drives control flow directly: it is mapped back onto a
// Role and the Router decides whether that role is eligible.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::errors::{AgentError, AgentResult};
use super::prompts::{library, PromptTemplate};
use super::router::{Next, Router};
use crate::domain::run::{Role, SharedState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            temperature: 0.0,
            max_tokens: 16,
        }
    }
}

/// A generative-text backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_text(&self, prompt: &str, config: &GenerationConfig) -> AgentResult<String>;
}

/// Asks a chain of generators for a routing hint
///
/// Each generator gets `timeout`; the first answer that names a role wins.
/// Any failure falls through to the next generator and finally to `None`,
/// which leaves the deterministic table in charge.
pub struct Advisor {
    generators: Vec<Arc<dyn TextGenerator>>,
    timeout: Duration,
    config: GenerationConfig,
    template: PromptTemplate,
}

impl Advisor {
    pub fn new(generators: Vec<Arc<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self {
            generators,
            timeout,
            config: GenerationConfig::default(),
            template: library::routing_advice(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn advise(&self, state: &SharedState, router: &Router) -> Option<Role> {
        let prompt = self.prompt(state, router);

        for generator in &self.generators {
            let result = tokio::time::timeout(
                self.timeout,
                generator.generate_text(&prompt, &self.config),
            )
            .await
            .unwrap_or(Err(AgentError::LlmTimeout(self.timeout)));

            match result {
                Ok(text) => match parse_role(&text) {
                    Some(role) => {
                        debug!(
                            generator = generator.name(),
                            prompt = %self.template.reference(),
                            advice = %role,
                            "Routing advice received"
                        );
                        return Some(role);
                    }
                    None => warn!(generator = generator.name(), "Advice named no known worker"),
                },
                Err(e) => warn!(generator = generator.name(), error = %e, "Advisor call failed"),
            }
        }
        None
    }

    fn prompt(&self, state: &SharedState, router: &Router) -> String {
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for deal in state.deals() {
            *by_status.entry(deal.status().to_string()).or_default() += 1;
        }
        let deals = by_status
            .iter()
            .map(|(status, n)| format!("{}={}", status, n))
            .collect::<Vec<_>>()
            .join(", ");
        let candidates = router
            .candidates(state)
            .iter()
            .filter_map(|c| match c.next {
                Next::Worker(role) => Some(role.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", ");

        let vars = HashMap::from([
            (
                "market".to_string(),
                format!("{:.1}", state.context().market_conditions.market_score),
            ),
            ("capital".to_string(), state.uncommitted_capital().to_string()),
            ("deals".to_string(), deals),
            ("candidates".to_string(), candidates),
        ]);
        self.template.render(&vars)
    }
}

/// First word of `text` that names a role
pub fn parse_role(text: &str) -> Option<Role> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .find_map(|w| w.parse().ok())
}
