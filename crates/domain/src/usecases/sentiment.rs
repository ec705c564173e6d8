//! Sentiment stage - VADER polarity over title and snippet

use crate::model::{CanonicalItem, Sentiment, SentimentLabel};

#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze_text(&self, text: &str) -> Sentiment {
        let analyzer = vader_sentiment::SentimentIntensityAnalyzer::new();
        let scores = analyzer.polarity_scores(text);
        let get = |key: &str| scores.get(key).copied().unwrap_or(0.0);
        let compound = get("compound");

        Sentiment {
            label: SentimentLabel::from_compound(compound),
            score: compound,
            positive: get("pos"),
            negative: get("neg"),
            neutral: get("neu"),
        }
    }

    pub fn analyze(&self, item: &CanonicalItem) -> Sentiment {
        self.analyze_text(&format!("{} {}", item.title, item.snippet))
    }
}
