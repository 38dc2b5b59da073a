//! Dashboard page rendering.

use handlebars::Handlebars;
use serde::Serialize;
use threat_hunt_core::{Dashboard, DashboardSummary, HuntError, HuntView};

const INDEX_TEMPLATE_NAME: &str = "index";
const INDEX_TEMPLATE: &str = include_str!("../templates/index.hbs");

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("template error: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),
    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error(transparent)]
    Payload(#[from] HuntError),
}

pub struct DashboardPage {
    handlebars: Handlebars<'static>,
}

#[derive(Debug, Serialize)]
struct PageContext<'a> {
    summary: &'a DashboardSummary,
    severity_rows: Vec<SeverityRow<'a>>,
    hunts: Vec<HuntRow<'a>>,
    hunts_json: String,
}

#[derive(Debug, Serialize)]
struct HuntRow<'a> {
    #[serde(flatten)]
    hunt: &'a HuntView,
    score: String,
}

impl<'a> HuntRow<'a> {
    fn new(hunt: &'a HuntView) -> Self {
        let score = hunt
            .ai_score
            .map_or_else(|| "n/a".to_string(), |score| format!("{score:.2}"));
        Self { hunt, score }
    }
}

#[derive(Debug, Serialize)]
struct SeverityRow<'a> {
    name: &'a str,
    count: usize,
    percent: usize,
}

impl DashboardPage {
    pub fn new() -> Result<Self, PageError> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(INDEX_TEMPLATE_NAME, INDEX_TEMPLATE)
            .map_err(Box::new)?;
        Ok(Self { handlebars })
    }

    pub fn render(&self, dashboard: &Dashboard) -> Result<String, PageError> {
        let summary = &dashboard.summary;
        let severity_rows = summary
            .severity_counts
            .iter()
            .map(|(name, count)| SeverityRow {
                name,
                count,
                percent: percent_of(count, summary.total_hunts),
            })
            .collect();

        let context = PageContext {
            summary,
            severity_rows,
            hunts: dashboard.hunts.iter().map(HuntRow::new).collect(),
            hunts_json: script_safe_json(&dashboard.hunts_json()?),
        };
        Ok(self.handlebars.render(INDEX_TEMPLATE_NAME, &context)?)
    }
}

fn percent_of(count: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    count * 100 / total
}

/// Escapes markup-significant characters so a JSON document can sit inside a
/// `<script>` element without closing it early.
fn script_safe_json(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use threat_hunt_core::{parse_timestamp, HuntRecord};

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_record(name: &str) -> HuntRecord {
        HuntRecord {
            id: 1,
            name: name.to_string(),
            query_str: "dst_country NOT IN ('IN','US') AND bytes_out > 100000".to_string(),
            datasource: "NetFlow".to_string(),
            severity: "medium".to_string(),
            status: "open".to_string(),
            tags: vec!["exfiltration".to_string()],
            ai_score: Some(0.78),
            created_at: Some(must(parse_timestamp("2026-02-07T12:00:00Z"))),
            updated_at: None,
        }
    }

    #[test]
    fn script_payload_cannot_close_script_element() {
        let escaped = script_safe_json(r#"[{"name":"</script><b>x</b> & y"}]"#);
        assert!(!escaped.contains("</script>"));
        assert!(!escaped.contains('<'));

        let parsed: serde_json::Value = must(serde_json::from_str(&escaped));
        assert_eq!(parsed[0]["name"], "</script><b>x</b> & y");
    }

    #[test]
    fn table_cells_are_html_escaped() {
        let page = must(DashboardPage::new());
        let dashboard = must(Dashboard::from_records(&[fixture_record(
            "<script>alert(1)</script>",
        )]));
        let html = must(page.render(&dashboard));
        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn empty_dashboard_renders_zero_counts() {
        let page = must(DashboardPage::new());
        let dashboard = must(Dashboard::from_records(&[]));
        let html = must(page.render(&dashboard));
        assert!(html.contains("No hunts recorded."));
        assert!(html.contains(r#"<script type="application/json" id="hunts-data">[]</script>"#));
        assert!(html.contains(r#"data-severity="critical""#));
    }

    #[test]
    fn zero_score_is_shown_as_a_number() {
        let page = must(DashboardPage::new());
        let mut scored_zero = fixture_record("Quiet beacon");
        scored_zero.ai_score = Some(0.0);
        let mut unscored = fixture_record("Unscored");
        unscored.id = 2;
        unscored.ai_score = None;

        let dashboard = must(Dashboard::from_records(&[scored_zero, unscored]));
        let html = must(page.render(&dashboard));
        assert!(html.contains(r#"<td class="score">0.00</td>"#), "{html}");
        assert!(html.contains(r#"<td class="score">n/a</td>"#), "{html}");
        assert!(html.contains(r#""ai_score":0.0"#));
    }

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent_of(0, 0), 0);
        assert_eq!(percent_of(1, 4), 25);
        assert_eq!(percent_of(2, 4), 50);
    }
}
