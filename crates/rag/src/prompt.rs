use underwrite_core::Chunk;
use underwrite_llm::{CONTEXT_END, CONTEXT_START};

/// The single analytical question asked of every report. Also used as the
/// retrieval query.
pub const ASSESSMENT_QUERY: &str = "You are an expert insurance underwriter. Your task is to provide a risk assessment of the property based on the provided appraisal report and the official underwriting guidelines.

Perform the following actions:
1. **Summary of Findings:** Briefly summarize the key conditions of the property (roof, foundation, electrical, etc.) as described in the report.
2. **Guideline Compliance Check:** For each finding, explicitly compare it against the provided underwriting guidelines. State whether it complies or violates a rule.
3. **Final Decision:** Based on your analysis, provide a clear, final decision: **APPROVE**, **REJECT**, or **REVIEW REQUIRED**.
4. **Justification:** Provide a concise justification for your final decision, referencing the specific findings and guidelines that led to it.

Present the entire analysis in a clear, structured format using Markdown.";

pub const SYSTEM_PROMPT: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Every chunk verbatim, in the given order, under a provenance header.
pub fn render_context(chunks: &[Chunk]) -> String {
    let mut context = String::new();
    context.push_str(CONTEXT_START);
    context.push('\n');
    for chunk in chunks {
        context.push_str(&format!("[DOC: {}]\n{}\n\n", chunk.metadata.label(), chunk.text));
    }
    context.push_str(CONTEXT_END);
    context.push('\n');
    context
}

pub fn stuff_prompt(query: &str, context: &str) -> String {
    format!("{}\nQuestion: {}\nAnswer:", context, query.trim())
}
