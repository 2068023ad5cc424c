use rand::Rng;

/// Instruction phrasings drawn from for every generated record.
pub const INSTRUCTION_TEMPLATES: [&str; 10] = [
    "Analyze the sentiment of this stock market news headline.",
    "Determine if the following stock market news headline is bullish, bearish, or neutral.",
    "Classify the sentiment expressed in this financial news headline.",
    "Identify the market sentiment in the headline provided.",
    "Assess whether this headline indicates a positive, negative, or neutral sentiment.",
    "Evaluate the investor sentiment reflected in the following news headline.",
    "Detect the sentiment in the given stock-related news headline.",
    "Is this stock news headline bullish, bearish, or neutral? Justify your answer.",
    "Provide sentiment analysis (bullish, bearish, neutral) for the following headline.",
    "What is the likely market reaction to this news headline? Label the sentiment.",
];

pub fn choose_instruction<R: Rng>(rng: &mut R) -> &'static str {
    INSTRUCTION_TEMPLATES[rng.gen_range(0..INSTRUCTION_TEMPLATES.len())]
}
