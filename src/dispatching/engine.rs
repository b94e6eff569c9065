//! Rule engine for multi-criteria candidate ranking.
//!
//! Rules are applied in sequence: the next rule is consulted only when the
//! previous one ties within `epsilon`. A final tie-breaker makes the order
//! total.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{rules, DispatchingRule, RuleScore, SelectionContext};
use crate::models::Provider;

/// How ties are broken after all rules are exhausted.
#[derive(Debug, Clone, Default)]
pub enum TieBreaker {
    /// Leave tied providers in input order (stable sort).
    #[default]
    NextRule,
    /// Deterministic by provider ID (lexicographic).
    ById,
}

/// A composable rule engine for provider ranking.
///
/// # Example
/// ```
/// use u_dispatch::dispatching::RuleEngine;
/// use u_dispatch::dispatching::rules;
///
/// let engine = RuleEngine::new()
///     .with_rule(rules::Rating)
///     .with_tie_breaker(rules::ReviewCount);
/// ```
#[derive(Clone)]
pub struct RuleEngine {
    rules: Vec<Arc<dyn DispatchingRule>>,
    tie_breaker: TieBreaker,
    epsilon: f64,
}

impl RuleEngine {
    /// Creates an empty rule engine.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            tie_breaker: TieBreaker::NextRule,
            epsilon: 1e-9,
        }
    }

    /// The dispatch order for immediate requests: proximity, then most recent
    /// activity, then rating, then review count, then provider ID.
    ///
    /// Proximity is inert when the context carries no distances, which gives
    /// the non-geographic order.
    pub fn standard() -> Self {
        Self::new()
            .with_rule(rules::Proximity)
            .with_tie_breaker(rules::RecentActivity)
            .with_tie_breaker(rules::Rating)
            .with_tie_breaker(rules::ReviewCount)
            .with_final_tie_breaker(TieBreaker::ById)
    }

    /// Adds a primary rule.
    pub fn with_rule<R: DispatchingRule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Adds a rule consulted only when all earlier rules tie.
    pub fn with_tie_breaker<R: DispatchingRule + 'static>(self, rule: R) -> Self {
        self.with_rule(rule)
    }

    /// Sets the final tie-breaking strategy.
    pub fn with_final_tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
        self.tie_breaker = tie_breaker;
        self
    }

    /// Sorts providers by priority (highest priority first).
    ///
    /// Returns indices into the original slice.
    pub fn sort_indices(&self, providers: &[Provider], context: &SelectionContext) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..providers.len()).collect();
        indices.sort_by(|&a, &b| self.compare(&providers[a], &providers[b], context));
        indices
    }

    /// Returns the index of the highest-priority provider.
    pub fn select_best(&self, providers: &[Provider], context: &SelectionContext) -> Option<usize> {
        self.sort_indices(providers, context).first().copied()
    }

    /// Evaluates a single provider and returns scores from each rule.
    pub fn evaluate(&self, provider: &Provider, context: &SelectionContext) -> Vec<RuleScore> {
        self.rules
            .iter()
            .map(|rule| rule.evaluate(provider, context))
            .collect()
    }

    fn compare(&self, a: &Provider, b: &Provider, context: &SelectionContext) -> Ordering {
        for rule in &self.rules {
            let score_a = rule.evaluate(a, context);
            let score_b = rule.evaluate(b, context);

            if (score_a - score_b).abs() > self.epsilon {
                return score_a.partial_cmp(&score_b).unwrap_or(Ordering::Equal);
            }
        }

        match &self.tie_breaker {
            TieBreaker::NextRule => Ordering::Equal,
            TieBreaker::ById => a.id.cmp(&b.id),
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("tie_breaker", &self.tie_breaker)
            .finish()
    }
}
