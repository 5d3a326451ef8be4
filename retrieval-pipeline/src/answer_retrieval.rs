use std::collections::BTreeMap;

use crate::RetrievedChunk;

pub const PENSION_DISCLAIMER: &str = "DISCLAIMER: I am an AI model; this response is informed by FCA Handbook PS25/22; for personal advice, please consult a financial advisor.";
pub const GENERAL_DISCLAIMER: &str =
    "DISCLAIMER: I am an AI model; please consult a financial advisor.";

/// Render customer attributes one `key: value` pair per line, in key order.
pub fn format_customer_context(context: &BTreeMap<String, String>) -> String {
    context
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Chunk texts joined for the prompt, best match first.
pub fn chunks_to_reference_data(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|retrieved| retrieved.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn create_classification_prompt(query: &str) -> String {
    format!(
        r#"
Classify the following query into ONE category:
- Pensions
- Insurance
- None

Query: "{query}"

Respond with exactly one word: Pensions, Insurance, or None.
"#
    )
}

/// Pension prompt grounded in the retrieved reference chunks. The reference
/// data is for the model only and must not be quoted back verbatim.
pub fn create_grounded_pension_prompt(
    customer_context: &str,
    chunks: &[RetrievedChunk],
    query: &str,
) -> String {
    format!(
        r"
You are an AI assistant for a pensions customer.
Use the following context to answer the user's question with the top 3 details from the FCA reference data.

Customer Context:
{customer_context}

Internal FCA Reference Data (for your use only):
{reference}

User Question:
{query}

Guidelines for your response:
- Provide accurate, compliant information about pensions.
- Include general knowledge like tax-free allowances, contribution limits, and standard rules where relevant.
- Do NOT give personalized advice or recommend specific actions.
- Keep it informative and educational.
- End with this disclaimer:
'{PENSION_DISCLAIMER}'
",
        reference = chunks_to_reference_data(chunks),
    )
}

/// Pension prompt used when no reference data could be retrieved.
pub fn create_ungrounded_pension_prompt(customer_context: &str, query: &str) -> String {
    format!(
        r"
You are an AI assistant for a pensions customer.

Customer Context:
{customer_context}

User Question:
{query}

Guidelines for your response:
- Provide accurate, compliant, general information about pensions.
- Do NOT give personalized advice or recommend specific actions.
- Keep it informative and educational.
- End with this disclaimer:
'{GENERAL_DISCLAIMER}'
"
    )
}

pub fn create_insurance_prompt(customer_context: &str, query: &str) -> String {
    format!(
        r"
Customer Context:
{customer_context}

User Question:
{query}

Provide a clear, compliant response.
Always end with this disclaimer:
'{GENERAL_DISCLAIMER}'
"
    )
}

/// Append `disclaimer` unless the reply already ends with it.
pub fn with_disclaimer(reply: &str, disclaimer: &str) -> String {
    let trimmed = reply.trim_end();
    let bare = trimmed.trim_end_matches(['\'', '"']);
    if bare.ends_with(disclaimer) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        disclaimer.to_string()
    } else {
        format!("{trimmed}\n\n{disclaimer}")
    }
}

#[cfg(test)]
mod tests {
    use common::storage::types::text_chunk::TextChunk;

    use super::*;

    fn retrieved(text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: TextChunk::new("fca.pdf".into(), 0, text.into(), vec![1.0]),
            score,
        }
    }

    #[test]
    fn grounded_prompt_carries_reference_data_in_rank_order() {
        let chunks = vec![
            retrieved("Annual allowance is 60,000 GBP.", 0.9),
            retrieved("Tax-free lump sum is capped.", 0.7),
        ];
        let prompt = create_grounded_pension_prompt("Plan: SIPP", &chunks, "What can I pay in?");

        let first = prompt.find("Annual allowance").expect("first chunk present");
        let second = prompt.find("Tax-free lump sum").expect("second chunk present");
        assert!(first < second);
        assert!(prompt.contains("Plan: SIPP"));
        assert!(prompt.contains("What can I pay in?"));
        assert!(prompt.contains(PENSION_DISCLAIMER));
    }

    #[test]
    fn ungrounded_prompt_has_no_reference_section() {
        let prompt = create_ungrounded_pension_prompt("Plan: SIPP", "What can I pay in?");
        assert!(!prompt.contains("Reference Data"));
        assert!(prompt.contains(GENERAL_DISCLAIMER));
    }

    #[test]
    fn customer_context_is_rendered_in_key_order() {
        let context = BTreeMap::from([
            ("Provider".to_string(), "Acme".to_string()),
            ("Balance".to_string(), "12000".to_string()),
        ]);
        assert_eq!(format_customer_context(&context), "Balance: 12000\nProvider: Acme");
    }

    #[test]
    fn disclaimer_is_appended_once() {
        let reply = with_disclaimer("Drawdown lets you take income.", GENERAL_DISCLAIMER);
        assert!(reply.ends_with(GENERAL_DISCLAIMER));
        assert_eq!(with_disclaimer(&reply, GENERAL_DISCLAIMER), reply);

        let quoted = format!("Answer.\n'{GENERAL_DISCLAIMER}'\n");
        assert_eq!(
            with_disclaimer(&quoted, GENERAL_DISCLAIMER),
            quoted.trim_end()
        );
        assert_eq!(with_disclaimer("  ", GENERAL_DISCLAIMER), GENERAL_DISCLAIMER);
    }
}
