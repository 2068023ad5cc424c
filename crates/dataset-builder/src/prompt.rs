/// Emitted as `output` when the completion call fails or comes back blank.
pub const FALLBACK_OUTPUT: &str = "Sentiment: Unknown\nReason: API call failed.";

pub fn build_prompt(instruction: &str, headline: &str) -> String {
    format!(
        "{instruction}\n\n### Headline:\n{headline}\n\n### Output Format:\nSentiment: <Bullish / Bearish / Neutral>\nReason: <Short reason>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt("Classify this.", "Fed holds rates");
        assert_eq!(
            prompt,
            "Classify this.\n\n### Headline:\nFed holds rates\n\n### Output Format:\n\
             Sentiment: <Bullish / Bearish / Neutral>\nReason: <Short reason>"
        );
    }
}
