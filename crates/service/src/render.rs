use pulldown_cmark::{html, Event, Options, Parser};

use underwrite_rag::AssessmentResult;

/// Markdown to HTML. Raw HTML in the model output is shown as text.
pub fn render_markdown(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
        .map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail.
    let _ = pulldown_cmark_escape::escape_html(&mut out, text);
    out
}

pub fn result_page(result: &AssessmentResult) -> String {
    let mut body = String::new();
    body.push_str("<h2>Automated Underwriting Assessment</h2>\n");
    if let Some(decision) = result.decision {
        body.push_str(&format!(
            "<p class=\"decision\">Decision: <strong>{}</strong></p>\n",
            decision.label()
        ));
    }
    body.push_str("<article>\n");
    body.push_str(&render_markdown(&result.narrative));
    body.push_str("</article>\n");
    body.push_str(&format!(
        "<details>\n<summary>Show sources used for the assessment ({})</summary>\n<ol>\n",
        result.sources.len()
    ));
    for chunk in &result.sources {
        body.push_str(&format!(
            "<li><strong>{}</strong>\n<pre>{}</pre></li>\n",
            escape_html(&chunk.metadata.label()),
            escape_html(&chunk.text)
        ));
    }
    body.push_str("</ol>\n</details>\n");
    page(&body)
}

pub fn error_page(message: &str) -> String {
    page(&format!(
        "<h2>Assessment failed</h2>\n<p class=\"error\">{}</p>\n",
        escape_html(message)
    ))
}

fn page(body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Automated Underwriting Platform</title>\n<style>body{{font-family:system-ui,sans-serif;max-width:56rem;margin:2rem auto;padding:0 1rem}}.error{{color:#b42318}}pre{{white-space:pre-wrap;background:#f5f7fa;padding:.5rem}}</style>\n</head>\n<body>\n<h1>Automated Underwriting Platform</h1>\n{body}<p><a href=\"/\">Start a new assessment</a></p>\n</body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use underwrite_core::{ChunkConfig, Chunker, SourceDocument};
    use underwrite_rag::{Decision, TokenUsage};

    #[test]
    fn markdown_renders_headings_and_emphasis() {
        let html = render_markdown("## Final Decision\n\n**REJECT**\n");
        assert!(html.contains("<h2>Final Decision</h2>"));
        assert!(html.contains("<strong>REJECT</strong>"));
    }

    #[test]
    fn raw_html_in_narrative_is_escaped() {
        let html = render_markdown("<script>alert(1)</script>\n\nok <b>x</b>");
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn result_page_lists_sources_in_details() {
        let sources = Chunker::new(ChunkConfig::default())
            .unwrap()
            .split_documents(&[SourceDocument::new("Foundation: <minor> cracks.", "report.pdf", Some(1))]);
        let page = result_page(&AssessmentResult {
            narrative: "## Final Decision\n\n**REVIEW REQUIRED**".to_string(),
            sources,
            decision: Some(Decision::ReviewRequired),
            usage: TokenUsage::default(),
        });
        assert!(page.contains("<details>"));
        assert!(page.contains("Show sources used for the assessment (1)"));
        assert!(page.contains("report.pdf, page 2"));
        assert!(page.contains("Foundation: &lt;minor&gt; cracks."));
    }

    #[test]
    fn escape_html_covers_attribute_quotes() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & Jerry's</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;"
        );
    }

    #[test]
    fn error_page_escapes_message() {
        let page = error_page("Could not read <report>.pdf");
        assert!(page.contains("Could not read &lt;report&gt;.pdf"));
    }
}
