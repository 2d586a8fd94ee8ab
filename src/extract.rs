//! Field extraction from a rendered page.
//!
//! The page's markup belongs to someone else and can change at any time, so
//! the rule is a trait: the status checker only needs a selector to wait on
//! and a pure function from HTML to the watched field's text.

use crate::config::TargetConfig;
use scraper::{ElementRef, Html, Selector};

/// Strategy for locating the watched field in a loaded document.
pub trait ExtractionRule {
    /// Selector that must be present before extraction is attempted.
    fn ready_selector(&self) -> &str;

    /// Return the trimmed field text, or `None` when no element matches.
    fn extract(&self, html: &str) -> Option<String>;
}

/// Finds the first card whose heading contains a marker and reads the text
/// of its primary action (a button, falling back to a link).
pub struct CardRule {
    card_css: String,
    card: Selector,
    heading: Selector,
    heading_marker: String,
    actions: Vec<Selector>,
}

impl CardRule {
    pub fn new(
        card_selector: &str,
        heading_selector: &str,
        heading_marker: &str,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            card_css: card_selector.to_string(),
            card: parse_selector(card_selector)?,
            heading: parse_selector(heading_selector)?,
            heading_marker: heading_marker.to_string(),
            actions: vec![parse_selector("button")?, parse_selector("a")?],
        })
    }

    pub fn from_config(target: &TargetConfig) -> Result<Self, ExtractError> {
        Self::new(
            &target.card_selector,
            &target.heading_selector,
            &target.heading_marker,
        )
    }

    fn heading_matches(&self, card: ElementRef<'_>) -> bool {
        card.select(&self.heading)
            .next()
            .map(|h| trimmed_text(h).contains(&self.heading_marker))
            .unwrap_or(false)
    }

    fn primary_action(&self, card: ElementRef<'_>) -> Option<String> {
        self.actions.iter().find_map(|sel| {
            card.select(sel)
                .next()
                .map(trimmed_text)
                .filter(|text| !text.is_empty())
        })
    }
}

impl ExtractionRule for CardRule {
    fn ready_selector(&self) -> &str {
        &self.card_css
    }

    fn extract(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let card = document
            .select(&self.card)
            .find(|card| self.heading_matches(*card))?;
        self.primary_action(card)
    }
}

fn trimmed_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// Errors building an extraction rule.
#[derive(Debug)]
pub enum ExtractError {
    Selector { selector: String, reason: String },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Selector { selector, reason } => {
                write!(f, "invalid CSS selector {selector:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ExtractError {}
