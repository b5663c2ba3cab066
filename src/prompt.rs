//! Prompt construction
//!
//! One template per intent. Figures always carry their unit and currency,
//! and only the most recent few conversation turns are included.

use crate::analysis;
use crate::models::{ContextBundle, ConversationTurn, FinancialRecord, Intent};
use serde::{Deserialize, Serialize};

/// Longest slice of a previous answer carried into a new prompt
const MAX_HISTORY_RESPONSE_CHARS: usize = 600;

const PERSONA: &str = r#"You are an expert Oil & Gas Financial Analyst covering the integrated energy majors.

Guidelines:
- Base every statement on the financial data provided below
- Quote figures with their units and currency exactly as given
- Say plainly when the data provided does not answer part of the question
- Balance opportunities against risks
- Use a professional, concise analyst tone"#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    CompanyPerformance,
    Comparison,
    Trend,
    Clarification,
}

impl PromptTemplate {
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::SingleCompanyPerformance => PromptTemplate::CompanyPerformance,
            Intent::MultiCompanyComparison => PromptTemplate::Comparison,
            Intent::TrendAnalysis => PromptTemplate::Trend,
            Intent::Unsupported => PromptTemplate::Clarification,
        }
    }

    fn focus(&self) -> &'static str {
        match self {
            PromptTemplate::CompanyPerformance => {
                "For this performance question, cover the headline results, profitability, cash generation, balance sheet strength and production, noting quarter-over-quarter movement where several periods are shown."
            }
            PromptTemplate::Comparison => {
                "For this comparison, set the companies side by side for the same periods, state which leads on each metric and by how much, and explain the main differences."
            }
            PromptTemplate::Trend => {
                "For this trend question, describe the direction and size of change across the periods in order, call out inflection points and compute period-over-period changes where useful."
            }
            PromptTemplate::Clarification => {
                "The question does not name a company covered by the available data. Ask the user which company they mean."
            }
        }
    }
}

/// Everything the gateway needs to produce an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub intent: Intent,
    pub template: PromptTemplate,
    pub text: String,
    /// Conversation turns rendered into `text`
    pub history_turns: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Kept so a degraded answer can be built without the model
    pub bundle: ContextBundle,
    /// Set only for unsupported queries; shown to the user as-is
    pub clarification: Option<String>,
}

pub struct PromptBuilder {
    history_turns: usize,
    max_tokens: u32,
    temperature: f32,
}

impl PromptBuilder {
    pub fn new(history_turns: usize, max_tokens: u32, temperature: f32) -> Self {
        Self {
            history_turns,
            max_tokens,
            temperature,
        }
    }

    /// Render the prompt for `bundle.intent`. For unsupported queries
    /// `bundle.company_names` lists the companies the data covers.
    pub fn build(&self, bundle: ContextBundle, history: &[ConversationTurn], query: &str) -> PromptPayload {
        let template = PromptTemplate::for_intent(bundle.intent);
        let recent = &history[history.len().saturating_sub(self.history_turns)..];

        let mut text = String::with_capacity(2048);
        text.push_str(PERSONA);
        text.push_str("\n\n");
        text.push_str(template.focus());
        text.push_str("\n\n");

        if template != PromptTemplate::Clarification {
            text.push_str("=== AVAILABLE FINANCIAL DATA ===\n");
            render_records(&mut text, &bundle);
            for note in &bundle.notes {
                text.push_str(&format!("Note: {}\n", note));
            }
            text.push('\n');
        }

        if analysis::applies_to(bundle.intent) {
            render_ratios(&mut text, &bundle);
        }

        if !recent.is_empty() {
            text.push_str("=== RECENT CONVERSATION ===\n");
            for turn in recent {
                text.push_str(&format!("- User: {}\n", turn.query.trim()));
                text.push_str(&format!("- Analyst: {}\n", truncate_chars(turn.response.trim(), MAX_HISTORY_RESPONSE_CHARS)));
            }
            text.push('\n');
        }

        text.push_str("=== USER QUESTION ===\n");
        text.push_str(query.trim());
        text.push_str("\n\n=== ANALYSIS REQUEST ===\n");
        text.push_str(
            "Answer the user's question using the data above. Include specific numbers with their units and keep the response engaging but professional.\n",
        );

        let clarification = (template == PromptTemplate::Clarification).then(|| clarification_message(&bundle));

        PromptPayload {
            intent: bundle.intent,
            template,
            text,
            history_turns: recent.len(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            bundle,
            clarification,
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(3, 2000, 0.3)
    }
}

fn render_records(out: &mut String, bundle: &ContextBundle) {
    if bundle.records.is_empty() {
        out.push_str("No stored figures matched this question.\n");
        return;
    }

    for (company_id, name) in &bundle.company_names {
        let records: Vec<&FinancialRecord> = bundle
            .records
            .iter()
            .filter(|r| &r.company_id == company_id)
            .collect();
        if records.is_empty() {
            continue;
        }

        out.push_str(&format!("\n{}:\n", name));
        for record in records {
            out.push_str(&format!(
                "- {} {}: {}\n",
                record.period,
                record.metric_type.label(),
                record.display_value()
            ));
        }
    }
}

/// Skipped entirely when no ratio can be computed from the records
fn render_ratios(out: &mut String, bundle: &ContextBundle) {
    let ratios = analysis::ratios_for(bundle);
    if ratios.is_empty() {
        return;
    }

    out.push_str("=== DERIVED METRICS ===\n");
    for company in &ratios {
        out.push_str(&format!("{} ({}):\n", bundle.company_name(&company.company_id), company.period));
        for part in company.describe() {
            out.push_str(&format!("- {}\n", part));
        }
    }
    if let Some(ranking) = analysis::ranking_line(bundle, &ratios) {
        out.push_str(&format!("Composite ranking: {}\n", ranking));
    }
    out.push('\n');
}

fn clarification_message(bundle: &ContextBundle) -> String {
    let names: Vec<&str> = bundle.company_names.iter().map(|(_, name)| name.as_str()).collect();
    let coverage = match names.as_slice() {
        [] => "the oil & gas companies in my dataset".to_string(),
        [only] => only.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    };

    format!(
        "I can only answer questions about the financial results of {}, and your question doesn't mention any of them. Which company are you interested in?\n\nTry asking:\n- \"How did Shell perform in Q3 2024?\"\n- \"Compare BP and Chevron revenue\"\n- \"ExxonMobil production over the last 4 quarters\"",
        coverage
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
