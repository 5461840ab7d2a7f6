//! Keyword-driven financial analyzer.
//!
//! Pulls headline figures (revenue, margins, leverage, ...) out of the document
//! text with line-oriented patterns, scores them with a small rule set, and renders
//! a markdown report. Good enough to exercise the pipeline end to end; a model-backed
//! analyzer can replace it behind the same [`Analyzer`] trait.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::analyzer::{AnalysisRequest, Analyzer};
use crate::pdf_text::{extract_text, PdfTextError};
use crate::result::{AnalysisError, AnalysisOutput};

/// Ordered: the first metric whose pattern matches a line wins that line's figure
/// only for metrics not yet seen.
static METRIC_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("revenue", r"(?i)\b(total\s+)?revenue\b"),
        ("net_income", r"(?i)\b(net\s+income|net\s+earnings|profit)\b"),
        ("operating_income", r"(?i)\b(operating\s+income|operating\s+profit|EBIT)\b"),
        ("ebitda", r"(?i)\bEBITDA\b"),
        ("eps", r"(?i)\b(EPS|earnings\s+per\s+share)\b"),
        ("debt", r"(?i)\b(total\s+debt|long-?term\s+debt)\b"),
        ("cash", r"(?i)\bcash(\s+and\s+cash\s+equivalents)?\b"),
        ("fcf", r"(?i)\b(free\s+cash\s+flow|FCF)\b"),
        ("gross_margin", r"(?i)\bgross\s+margin\b"),
        ("operating_margin", r"(?i)\boperating\s+margin\b"),
        ("net_margin", r"(?i)\bnet\s+margin\b"),
        ("current_ratio", r"(?i)\bcurrent\s+ratio\b"),
        ("quick_ratio", r"(?i)\bquick\s+ratio\b"),
        ("roe", r"(?i)\b(ROE|return\s+on\s+equity)\b"),
        ("roa", r"(?i)\b(ROA|return\s+on\s+assets)\b"),
        ("yoy", r"(?i)\b(YoY|year[-\s]*over[-\s]*year)\b"),
        ("growth", r"(?i)\b(growth|increase|decrease)\b"),
    ]
    .into_iter()
    .filter_map(|(key, pat)| Regex::new(pat).ok().map(|re| (key, re)))
    .collect()
});

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<open>\()?(?P<sign>-)?[$€£₹]?(?P<int>\d{1,3}(?:,\d{3})+|\d+)(?P<frac>\.\d+)?\)?\s?(?P<unit>%|billion|million|thousand|[bmk]\b)?",
    )
    .ok()
});

const DETAIL_ROWS: &[(&str, &str)] = &[
    ("Revenue", "revenue"),
    ("Net Income", "net_income"),
    ("Operating Income", "operating_income"),
    ("EBITDA", "ebitda"),
    ("EPS", "eps"),
    ("Debt", "debt"),
    ("Cash", "cash"),
    ("Free Cash Flow", "fcf"),
    ("Gross Margin", "gross_margin"),
    ("Operating Margin", "operating_margin"),
    ("Net Margin", "net_margin"),
    ("Current Ratio", "current_ratio"),
    ("Quick Ratio", "quick_ratio"),
    ("ROE", "roe"),
    ("ROA", "roa"),
    ("YoY Revenue Growth", "yoy_revenue_growth"),
];

/// Figures recognised in a document, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FinancialMetrics(BTreeMap<String, f64>);

impl FinancialMetrics {
    /// Scan `text` line by line for known metrics.
    pub fn parse(text: &str) -> Self {
        let mut metrics = BTreeMap::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            for (key, pattern) in METRIC_PATTERNS.iter() {
                if !pattern.is_match(line) {
                    continue;
                }
                let Some(value) = last_number(line) else {
                    continue;
                };
                let target = match *key {
                    "yoy" | "growth" if line.to_lowercase().contains("revenue") => "yoy_revenue_growth",
                    "yoy" | "growth" => "growth_indicator",
                    other => other,
                };
                metrics.entry(target.to_string()).or_insert(value);
            }
        }

        let mut out = Self(metrics);
        out.derive_margins();
        out
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn derive_margins(&mut self) {
        let Some(revenue) = self.get("revenue").filter(|r| *r != 0.0) else {
            return;
        };
        if let Some(ni) = self.get("net_income") {
            self.0.entry("net_margin".into()).or_insert(ni * 100.0 / revenue);
        }
        if let Some(oi) = self.get("operating_income") {
            self.0.entry("operating_margin".into()).or_insert(oi * 100.0 / revenue);
        }
    }
}

/// Outcome of the rule-based scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub score: i32,
    pub recommendation: &'static str,
    pub signals: Vec<&'static str>,
}

impl Assessment {
    pub fn of(m: &FinancialMetrics) -> Self {
        let mut score = 0;
        let mut signals = Vec::new();
        let mut note = |delta: i32, signal: &'static str| {
            score += delta;
            signals.push(signal);
        };

        if let Some(roe) = m.get("roe") {
            match roe {
                r if r >= 15.0 => note(2, "Strong ROE"),
                r if r >= 8.0 => note(1, "Healthy ROE"),
                _ => note(-1, "Weak ROE"),
            }
        }
        if let Some(nm) = m.get("net_margin") {
            match nm {
                v if v >= 15.0 => note(2, "High net margin"),
                v if v >= 8.0 => note(1, "Moderate net margin"),
                _ => note(-1, "Thin net margin"),
            }
        }
        if let Some(g) = m.get("yoy_revenue_growth") {
            if g >= 10.0 {
                note(2, "Double-digit YoY growth");
            } else if g >= 3.0 {
                note(1, "Positive YoY growth");
            } else if g < 0.0 {
                note(-1, "Negative YoY growth");
            }
        }
        if let (Some(rev), Some(debt)) = (m.get("revenue"), m.get("debt")) {
            if rev != 0.0 {
                let leverage = debt / rev;
                if leverage > 1.0 {
                    note(-2, "High leverage vs revenue");
                } else if leverage > 0.5 {
                    note(-1, "Elevated leverage");
                }
            }
        }
        if let (Some(cash), Some(debt)) = (m.get("cash"), m.get("debt")) {
            if cash >= debt {
                note(1, "Cash covers debt");
            } else {
                note(0, "Cash below debt");
            }
        }
        if let Some(fcf) = m.get("fcf") {
            if fcf > 0.0 {
                note(1, "Positive FCF");
            } else {
                note(-1, "Negative FCF");
            }
        }
        if m.get("ebitda").is_some_and(|e| e <= 0.0) {
            note(-2, "EBITDA at or below zero");
        }

        let recommendation = match score {
            s if s >= 3 => "Buy",
            s if s >= 1 => "Accumulate / Hold",
            s if s >= -1 => "Neutral / Watch",
            _ => "Sell / Reduce",
        };

        Self {
            score,
            recommendation,
            signals,
        }
    }
}

/// Reference analyzer over PDF text.
#[derive(Debug, Clone, Default)]
pub struct FinancialAnalyzer {
    max_pages: Option<usize>,
}

impl FinancialAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only read the first `n` pages (useful for very long filings).
    pub fn with_max_pages(mut self, n: usize) -> Self {
        self.max_pages = Some(n);
        self
    }

    /// Render the report for already-extracted text.
    pub fn report(query: &str, text: &str) -> AnalysisOutput {
        let metrics = FinancialMetrics::parse(text);
        let assessment = Assessment::of(&metrics);

        let mut lines = vec![
            "# Investment Analysis".to_string(),
            format!("Query: {query}"),
            String::new(),
            format!("- Recommendation: {}", assessment.recommendation),
            format!("- Score: {}", assessment.score),
        ];
        if !assessment.signals.is_empty() {
            lines.push(format!("- Signals: {}", assessment.signals.join(", ")));
        }

        lines.push(String::new());
        lines.push("## Key Metrics".to_string());
        let mut any = false;
        for (label, key) in DETAIL_ROWS {
            if let Some(v) = metrics.get(key) {
                lines.push(format!("- {label}: {}", format_metric(key, v)));
                any = true;
            }
        }
        if !any {
            lines.push("- No recognisable financial figures found".to_string());
        }

        AnalysisOutput::new(lines.join("\n")).with_metrics(serde_json::json!({
            "score": assessment.score,
            "recommendation": assessment.recommendation,
            "signals": assessment.signals,
            "figures": metrics,
        }))
    }
}

impl Analyzer for FinancialAnalyzer {
    fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutput, AnalysisError> {
        let bytes = std::fs::read(&request.document_path)
            .map_err(|e| AnalysisError::Unreadable(format!("{}: {e}", request.document_path.display())))?;

        let pages = extract_text(&bytes, self.max_pages).map_err(|e| match e {
            PdfTextError::Parse(msg) => AnalysisError::Unreadable(msg),
            PdfTextError::NoPages => AnalysisError::InvalidInput("document has no pages".into()),
        })?;

        let text = pages.join("\n");
        if text.trim().is_empty() {
            return Err(AnalysisError::InvalidInput("document has no extractable text".into()));
        }

        Ok(Self::report(&request.query, &text))
    }
}

fn last_number(line: &str) -> Option<f64> {
    let re = NUMBER.as_ref()?;
    let caps = re.captures_iter(line).last()?;

    let int: String = caps.name("int")?.as_str().chars().filter(|c| *c != ',').collect();
    let frac = caps.name("frac").map_or("", |m| m.as_str());
    let mut value: f64 = format!("{int}{frac}").parse().ok()?;

    value *= match caps.name("unit").map(|u| u.as_str().to_ascii_lowercase()).as_deref() {
        Some("billion" | "b") => 1e9,
        Some("million" | "m") => 1e6,
        Some("thousand" | "k") => 1e3,
        _ => 1.0,
    };

    if caps.name("open").is_some() || caps.name("sign").is_some() {
        value = -value;
    }
    Some(value)
}

fn format_metric(key: &str, v: f64) -> String {
    if key.ends_with("margin") || matches!(key, "roe" | "roa" | "yoy_revenue_growth") {
        return format!("{v:.2}%");
    }
    match v.abs() {
        a if a >= 1e9 => format!("{:.2}B", v / 1e9),
        a if a >= 1e6 => format!("{:.2}M", v / 1e6),
        a if a >= 1e3 => format!("{:.2}K", v / 1e3),
        _ => format!("{v:.2}"),
    }
}
