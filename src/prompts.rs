// Contains the prompt used to explain a selected term.

pub fn explanation_prompt(selected_text: &str) -> String {
    format!(
        r#"You are an AI assistant helping explain technical terms and concepts. The user has selected the text "{selected_text}" from an AI chat conversation.

Please provide a clear, concise explanation of this term/concept in 2-3 sentences. Focus on:
- What it means in context
- Why it might be relevant
- Keep it brief but informative

If this appears to be a technical term, acronym, or concept, explain it simply. If it's regular text, acknowledge that it's not a term that needs explanation.

Response format: Direct explanation without meta-commentary."#,
        selected_text = selected_text
    )
}

/// A cheap request used to check that a key works.
pub const CONNECTION_CHECK_PROMPT: &str = r#"Explain what "API" means in one sentence."#;
