//! Resolving a free-form experiment name to one corpus title.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{self, strip_quotes, ChatMessage, ChatOptions, LlmClient};

#[async_trait]
pub trait TitleMatcher: Send + Sync {
    /// Pick the title closest to `query`. The result is not guaranteed to be
    /// one of `titles`; callers look it up leniently.
    async fn resolve(&self, query: &str, titles: &[String]) -> anyhow::Result<String>;
}

/// Asks the chat model to copy the best title from the list.
pub struct LlmTitleMatcher {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmTitleMatcher {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

const MATCH_SYSTEM: &str = "You are a helpful assistant that matches experiment names to titles.";

fn match_prompt(query: &str, titles: &[String]) -> String {
    let listing = titles
        .iter()
        .map(|t| format!("- {}", t))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Titles:\n{}\n\nWhich title is closest to the experiment \"{}\"? \
         Copy that title exactly as written in the list. \
         Output only the title, without quotation marks.",
        listing, query
    )
}

#[async_trait]
impl TitleMatcher for LlmTitleMatcher {
    async fn resolve(&self, query: &str, titles: &[String]) -> anyhow::Result<String> {
        if titles.is_empty() {
            return Ok(String::new());
        }
        let messages = [
            ChatMessage::system(MATCH_SYSTEM),
            ChatMessage::user(match_prompt(query, titles)),
        ];
        let answer = llm::complete_text(
            self.llm.as_ref(),
            &self.model,
            &messages,
            ChatOptions::temperature(0.0),
        )
        .await?;
        let resolved = strip_quotes(&answer);
        tracing::debug!("Model resolved '{}' to '{}'", query, resolved);
        Ok(resolved)
    }
}

/// Offline matcher scoring titles by string similarity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimilarityTitleMatcher;

impl SimilarityTitleMatcher {
    const CONTAINMENT_BONUS: f64 = 0.5;

    pub fn score(query: &str, title: &str) -> f64 {
        let q = query.trim().to_lowercase();
        let t = title.trim().to_lowercase();
        if q.is_empty() || t.is_empty() {
            return 0.0;
        }
        let mut score =
            0.5 * strsim::normalized_levenshtein(&q, &t) + 0.5 * strsim::jaro_winkler(&q, &t);
        if t.contains(&q) || q.contains(&t) {
            score += Self::CONTAINMENT_BONUS;
        }
        score
    }
}

#[async_trait]
impl TitleMatcher for SimilarityTitleMatcher {
    async fn resolve(&self, query: &str, titles: &[String]) -> anyhow::Result<String> {
        // Strictly greater keeps the earliest title on ties.
        let mut best: Option<(&String, f64)> = None;
        for title in titles {
            let score = Self::score(query, title);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((title, score));
            }
        }
        Ok(best.map(|(t, _)| t.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedClient;

    fn titles(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn similarity_prefers_containing_title() {
        let list = titles(&["Pendulum", "Spring Constant", "Optics Bench"]);
        let resolved = SimilarityTitleMatcher.resolve("spring const", &list).await.unwrap();
        assert_eq!(resolved, "Spring Constant");
    }

    #[tokio::test]
    async fn similarity_handles_cjk_titles() {
        let list = titles(&["单摆测重力加速度", "弹簧劲度系数的测量"]);
        let resolved = SimilarityTitleMatcher.resolve("弹簧劲度系数", &list).await.unwrap();
        assert_eq!(resolved, "弹簧劲度系数的测量");
    }

    #[tokio::test]
    async fn similarity_empty_list_is_empty_title() {
        assert_eq!(SimilarityTitleMatcher.resolve("x", &[]).await.unwrap(), "");
    }

    #[tokio::test]
    async fn llm_matcher_lists_titles_and_strips_quotes() {
        let llm = Arc::new(ScriptedClient::texts(["\"Spring Constant\"\n"]));
        let matcher = LlmTitleMatcher::new(llm.clone(), "chat");

        let resolved = matcher
            .resolve("spring const", &titles(&["Spring Constant", "Optics"]))
            .await
            .unwrap();
        assert_eq!(resolved, "Spring Constant");

        let request = &llm.requests()[0];
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.prompt_text().contains("- Spring Constant\n- Optics"));
        assert!(request.prompt_text().contains("\"spring const\""));
    }

    #[tokio::test]
    async fn llm_matcher_skips_call_without_titles() {
        let llm = Arc::new(ScriptedClient::texts(Vec::<String>::new()));
        let matcher = LlmTitleMatcher::new(llm.clone(), "chat");
        assert_eq!(matcher.resolve("anything", &[]).await.unwrap(), "");
        assert_eq!(llm.call_count(), 0);
    }
}
