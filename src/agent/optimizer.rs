//! Content optimizer
//!
//! Compresses a page snapshot, the task goal and recent history into a
//! context string that fits a token budget. The goal and the last failure
//! are always kept. Page text is dropped first, then history, then the
//! lowest-priority elements. If not a single element fits, the optimizer
//! reports a degraded context instead of returning an empty element list.

use std::collections::HashSet;

use thiserror::Error;

use crate::browser::{InteractiveElement, PageSnapshot};

/// Rough token estimate: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// The budget cannot hold the mandatory context plus one element
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("degraded context: {required} tokens needed, budget is {budget}")]
pub struct DegradedContext {
    pub budget: usize,
    pub required: usize,
}

/// Scores elements for relevance to the goal. Higher is kept first.
pub trait ElementScorer: Send + Sync {
    fn score(&self, element: &InteractiveElement, keywords: &[String]) -> f64;
}

/// Default scorer: element kind plus goal keyword hits
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl ElementScorer for KeywordScorer {
    fn score(&self, element: &InteractiveElement, keywords: &[String]) -> f64 {
        let mut score = 0.0;
        if element.is_clickable() {
            score += 10.0;
        } else if element.is_input() {
            score += 8.0;
        } else {
            score += 2.0;
        }
        if !element.label.trim().is_empty() {
            score += 2.0;
        }

        let haystack = format!("{} {}", element.label, element.context).to_lowercase();
        let hits = keywords
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .count();
        score + hits as f64 * 4.0
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "from", "about", "into", "through", "during", "before",
    "after", "above", "below", "between", "among", "this", "that", "these", "those", "our",
    "you", "your", "his", "her", "its", "they", "them", "their", "please", "all",
];

/// Lowercase goal words worth matching against element labels
pub fn goal_keywords(goal: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    goal.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Everything the optimizer may put into a context
#[derive(Debug, Clone, Copy)]
pub struct OptimizerInput<'a> {
    pub goal: &'a str,
    pub snapshot: &'a PageSnapshot,
    /// Recent step summaries, oldest first
    pub history: &'a [String],
    /// Why the previous attempt failed or was refused
    pub last_failure: Option<&'a str>,
    /// Standing notes such as user guidance
    pub notes: &'a [String],
}

/// Context handed to the model oracle
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedContext {
    pub text: String,
    /// Estimated tokens of `text`
    pub tokens: usize,
    pub elements_included: usize,
    pub elements_total: usize,
    pub history_included: usize,
    pub text_truncated: bool,
}

impl OptimizedContext {
    /// Whether every element of the snapshot made it in
    pub fn is_complete(&self) -> bool {
        self.elements_included == self.elements_total
    }
}

/// Budgeted context builder
pub struct ContentOptimizer {
    token_budget: usize,
    scorer: Box<dyn ElementScorer>,
}

impl ContentOptimizer {
    pub fn new(token_budget: usize) -> Self {
        Self {
            token_budget,
            scorer: Box::new(KeywordScorer),
        }
    }

    /// Replace the relevance policy
    pub fn with_scorer(mut self, scorer: Box<dyn ElementScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Build a context that fits the budget
    pub fn optimize(&self, input: &OptimizerInput<'_>) -> Result<OptimizedContext, DegradedContext> {
        let snapshot = input.snapshot;
        let header = render_header(input);
        let mandatory = estimate_tokens(&header);
        let elements_total = snapshot.elements.len();

        let element_lines: Vec<String> = snapshot.elements.iter().map(render_element).collect();
        let cheapest_element = element_lines
            .iter()
            .map(|l| estimate_tokens(l))
            .min()
            .map(|t| t + estimate_tokens(ELEMENTS_HEADING));

        let required = mandatory + cheapest_element.unwrap_or(0);
        if required > self.token_budget {
            return Err(DegradedContext {
                budget: self.token_budget,
                required,
            });
        }

        // Part-by-part estimates are summed, so the total is an upper bound
        // on the estimate of the joined text.
        let mut remaining = self.token_budget - mandatory;

        // Elements, by priority
        let keywords = goal_keywords(input.goal);
        let mut order: Vec<(usize, f64)> = snapshot
            .elements
            .iter()
            .enumerate()
            .map(|(i, el)| (i, self.scorer.score(el, &keywords)))
            .collect();
        order.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let mut included = vec![false; elements_total];
        if elements_total > 0 {
            remaining -= estimate_tokens(ELEMENTS_HEADING);
            for (i, _) in &order {
                let cost = estimate_tokens(&element_lines[*i]);
                if cost <= remaining {
                    remaining -= cost;
                    included[*i] = true;
                }
            }
        }
        let elements_included = included.iter().filter(|&&b| b).count();

        // History, newest first
        let mut history_keep = Vec::new();
        if !input.history.is_empty() && estimate_tokens(HISTORY_HEADING) < remaining {
            let mut budget = remaining - estimate_tokens(HISTORY_HEADING);
            for line in input.history.iter().rev() {
                let cost = estimate_tokens(&history_line(line));
                if cost > budget {
                    break;
                }
                budget -= cost;
                history_keep.push(line.as_str());
            }
            if !history_keep.is_empty() {
                remaining = budget;
            }
        }
        history_keep.reverse();

        // Page text, truncated to whatever is left
        let mut page_text = None;
        let mut text_truncated = false;
        let text = snapshot.text.trim();
        if !text.is_empty() {
            let heading = estimate_tokens(TEXT_HEADING);
            let full = estimate_tokens(&text_line(text));
            if heading + full <= remaining {
                page_text = Some(text.to_string());
            } else {
                text_truncated = true;
                if heading < remaining {
                    let avail = remaining - heading;
                    let max_chars = (avail * 4).saturating_sub(TRUNCATION_MARK.len() + 1);
                    if max_chars > 0 {
                        let cut: String = text.chars().take(max_chars).collect();
                        page_text = Some(format!("{}{}", cut, TRUNCATION_MARK));
                    }
                }
            }
        }

        let mut out = header;
        if elements_included > 0 {
            out.push_str(ELEMENTS_HEADING);
            for (i, line) in element_lines.iter().enumerate() {
                if included[i] {
                    out.push_str(line);
                }
            }
        }
        if !history_keep.is_empty() {
            out.push_str(HISTORY_HEADING);
            for line in &history_keep {
                out.push_str(&history_line(line));
            }
        }
        if let Some(text) = page_text {
            out.push_str(TEXT_HEADING);
            out.push_str(&text_line(&text));
        }

        Ok(OptimizedContext {
            tokens: estimate_tokens(&out),
            text: out,
            elements_included,
            elements_total,
            history_included: history_keep.len(),
            text_truncated,
        })
    }
}

const ELEMENTS_HEADING: &str = "\n## Interactive elements\n";
const HISTORY_HEADING: &str = "\n## Recent steps\n";
const TEXT_HEADING: &str = "\n## Page text\n";
const TRUNCATION_MARK: &str = " [truncated]";

fn render_header(input: &OptimizerInput<'_>) -> String {
    let mut out = format!(
        "## Goal\n{}\n\n## Page\nURL: {}\nTitle: {}\n",
        input.goal, input.snapshot.url, input.snapshot.title
    );
    if let Some(failure) = input.last_failure {
        out.push_str(&format!("\n## Previous attempt failed\n{}\n", failure));
    }
    if !input.notes.is_empty() {
        out.push_str("\n## Notes\n");
        for note in input.notes {
            out.push_str(&format!("- {}\n", note));
        }
    }
    out
}

fn render_element(el: &InteractiveElement) -> String {
    let mut line = format!("[{}] {} \"{}\"", el.id, el.role, el.label);
    if let Some(value) = &el.value {
        line.push_str(&format!(" value=\"{}\"", value));
    }
    if !el.context.is_empty() {
        line.push_str(&format!(" ({})", el.context));
    }
    line.push('\n');
    line
}

fn history_line(summary: &str) -> String {
    format!("- {}\n", summary)
}

fn text_line(text: &str) -> String {
    format!("{}\n", text)
}
