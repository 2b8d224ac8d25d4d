//! Layered anchor resolution
//!
//! A record is matched against the text-bearing elements of the live
//! document by an ordered list of strategies, cheapest first. The first
//! strategy that clears its threshold wins. A miss is not an error: the
//! record stays unresolved until the next reconciliation pass.

use std::collections::HashSet;

use serde::Serialize;

use super::similarity::{passes_length_ratio, similarity};
use crate::annotations::{normalize_text, AnnotationRecord};
use crate::config::AnchoringConfig;
use crate::dom::{Document, NodeId};

/// Block and inline elements that can anchor a record
pub const CANDIDATE_TAGS: &[&str] = &[
    "p", "div", "span", "li", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "pre", "code", "a", "em", "strong", "b", "i", "u", "article", "section", "label", "dd", "dt",
    "figcaption", "caption", "summary", "mark", "q", "cite", "small", "font", "main", "aside",
    "header", "footer", "nav",
];

/// Subtrees never scanned for candidates
const SKIPPED_SUBTREES: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Which strategy produced an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Exact,
    Fuzzy,
    Context,
}

/// A located region for a record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub element: NodeId,
    /// 0..=1, from the tier that matched
    pub confidence: f64,
    pub tier: MatchTier,
}

/// One text-bearing element, captured once per pass
#[derive(Debug, Clone)]
pub struct Candidate {
    pub element: NodeId,
    /// Normalized rendered text
    pub text: String,
    pub char_len: usize,
    pub depth: usize,
    /// Index of the nearest candidate ancestor
    parent: Option<usize>,
}

/// Candidates in document order
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Scan the document. Marker wrappers are never candidates themselves,
    /// but the content they wrap is.
    pub fn collect(doc: &Document, min_len: usize, marker_attribute: &str) -> Self {
        let mut set = CandidateSet::default();
        set.walk(doc, doc.root(), None, min_len, marker_attribute);
        set
    }

    fn walk(
        &mut self,
        doc: &Document,
        node: NodeId,
        parent: Option<usize>,
        min_len: usize,
        marker_attribute: &str,
    ) {
        for &child in doc.children(node) {
            let Some(name) = doc.tag_name(child) else {
                continue;
            };
            if SKIPPED_SUBTREES.contains(&name) {
                continue;
            }

            let mut next_parent = parent;
            let is_marker = doc.attr(child, marker_attribute).is_some();
            if !is_marker && CANDIDATE_TAGS.contains(&name) {
                let text = normalize_text(&doc.text_content(child));
                let char_len = text.chars().count();
                if char_len > min_len {
                    self.candidates.push(Candidate {
                        element: child,
                        text,
                        char_len,
                        depth: doc.depth(child),
                        parent,
                    });
                    next_parent = Some(self.candidates.len() - 1);
                }
            }

            self.walk(doc, child, next_parent, min_len, marker_attribute);
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }
}

/// Normalized evidence taken from a record
#[derive(Debug, Clone)]
pub struct MatchTarget {
    pub text: String,
    pub char_len: usize,
    pub before: String,
    pub after: String,
}

impl MatchTarget {
    /// `None` when the record has no text to match
    pub fn from_record(record: &AnnotationRecord) -> Option<Self> {
        let text = normalize_text(&record.original_text);
        if text.is_empty() {
            return None;
        }
        Some(Self {
            char_len: text.chars().count(),
            text,
            before: normalize_text(&record.context.before),
            after: normalize_text(&record.context.after),
        })
    }

    fn has_context(&self) -> bool {
        !self.before.is_empty() || !self.after.is_empty()
    }

    /// `before + text + after`, normalized
    fn with_context(&self, raw: &AnnotationRecord) -> String {
        normalize_text(&format!(
            "{}{}{}",
            raw.context.before, raw.original_text, raw.context.after
        ))
    }
}

/// One matching tier. The resolver walks a list of these in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchStrategy {
    /// Literal containment, confidence 1.0
    Exact,
    /// Best edit-distance score over candidates of plausible length
    Fuzzy {
        threshold: f64,
        min_length_ratio: f64,
    },
    /// Candidate must contain the captured context; scored on
    /// `before + text + after`
    Context { threshold: f64 },
}

impl MatchStrategy {
    pub fn tier(&self) -> MatchTier {
        match self {
            MatchStrategy::Exact => MatchTier::Exact,
            MatchStrategy::Fuzzy { .. } => MatchTier::Fuzzy,
            MatchStrategy::Context { .. } => MatchTier::Context,
        }
    }

    pub fn attempt(
        &self,
        record: &AnnotationRecord,
        target: &MatchTarget,
        candidates: &CandidateSet,
    ) -> Option<Anchor> {
        match self {
            MatchStrategy::Exact => exact_match(target, candidates),
            MatchStrategy::Fuzzy {
                threshold,
                min_length_ratio,
            } => {
                let pool = candidates
                    .iter()
                    .filter(|c| passes_length_ratio(c.char_len, target.char_len, *min_length_ratio));
                best_scoring(&target.text, pool, *threshold).map(|(element, confidence)| Anchor {
                    element,
                    confidence,
                    tier: MatchTier::Fuzzy,
                })
            }
            MatchStrategy::Context { threshold } => {
                if !target.has_context() {
                    return None;
                }
                let combined = target.with_context(record);
                let pool = candidates.iter().filter(|c| {
                    (target.before.is_empty() || c.text.contains(&target.before))
                        && (target.after.is_empty() || c.text.contains(&target.after))
                });
                best_scoring(&combined, pool, *threshold).map(|(element, confidence)| Anchor {
                    element,
                    confidence,
                    tier: MatchTier::Context,
                })
            }
        }
    }
}

/// Innermost candidates containing the text; ties go to document order
fn exact_match(target: &MatchTarget, candidates: &CandidateSet) -> Option<Anchor> {
    let containing: Vec<usize> = candidates
        .candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.text.contains(&target.text))
        .map(|(i, _)| i)
        .collect();

    // Any candidate ancestor of a match also matches, so a match is innermost
    // exactly when no other match names it as parent.
    let has_matching_child: HashSet<usize> = containing
        .iter()
        .filter_map(|&i| candidates.candidates[i].parent)
        .collect();

    containing
        .into_iter()
        .find(|i| !has_matching_child.contains(i))
        .map(|i| Anchor {
            element: candidates.candidates[i].element,
            confidence: 1.0,
            tier: MatchTier::Exact,
        })
}

/// Highest similarity strictly above `threshold`. Equal scores prefer the
/// deeper element, then document order.
fn best_scoring<'a>(
    needle: &str,
    pool: impl Iterator<Item = &'a Candidate>,
    threshold: f64,
) -> Option<(NodeId, f64)> {
    let needle_len = needle.chars().count();
    let mut best: Option<(&Candidate, f64)> = None;

    for candidate in pool {
        // Distance is at least the length gap, which caps the score
        let (short, long) = if candidate.char_len < needle_len {
            (candidate.char_len, needle_len)
        } else {
            (needle_len, candidate.char_len)
        };
        let ceiling = if long == 0 { 1.0 } else { short as f64 / long as f64 };
        let floor = best.map(|(_, s)| s).unwrap_or(threshold);
        if ceiling < floor || ceiling <= threshold {
            continue;
        }

        let score = similarity(needle, &candidate.text);
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score || (score == current_score && candidate.depth > current.depth)
            }
        };
        if better {
            best = Some((candidate, score));
        }
    }

    best.filter(|(_, score)| *score > threshold)
        .map(|(c, score)| (c.element, score))
}

/// Ordered strategy list plus the candidate scan settings
#[derive(Debug, Clone)]
pub struct AnchorResolver {
    strategies: Vec<MatchStrategy>,
    min_candidate_len: usize,
    marker_attribute: String,
}

impl AnchorResolver {
    /// Exact, then fuzzy, then context, with thresholds from config
    pub fn new(config: &AnchoringConfig, marker_attribute: &str) -> Self {
        Self::with_strategies(
            vec![
                MatchStrategy::Exact,
                MatchStrategy::Fuzzy {
                    threshold: config.fuzzy_threshold,
                    min_length_ratio: config.min_length_ratio,
                },
                MatchStrategy::Context {
                    threshold: config.context_threshold,
                },
            ],
            config.min_candidate_len,
            marker_attribute,
        )
    }

    pub fn with_strategies(
        strategies: Vec<MatchStrategy>,
        min_candidate_len: usize,
        marker_attribute: &str,
    ) -> Self {
        Self {
            strategies,
            min_candidate_len,
            marker_attribute: marker_attribute.to_string(),
        }
    }

    pub fn strategies(&self) -> &[MatchStrategy] {
        &self.strategies
    }

    pub fn candidates(&self, doc: &Document) -> CandidateSet {
        CandidateSet::collect(doc, self.min_candidate_len, &self.marker_attribute)
    }

    /// Try each strategy in order against a pre-collected candidate set
    pub fn resolve(&self, record: &AnnotationRecord, candidates: &CandidateSet) -> Option<Anchor> {
        let Some(target) = MatchTarget::from_record(record) else {
            tracing::debug!(id = %record.id, "Skipping resolution of empty annotation text");
            return None;
        };

        for strategy in &self.strategies {
            if let Some(anchor) = strategy.attempt(record, &target, candidates) {
                tracing::debug!(
                    id = %record.id,
                    tier = ?anchor.tier,
                    confidence = anchor.confidence,
                    "Annotation anchored"
                );
                return Some(anchor);
            }
        }

        tracing::debug!(id = %record.id, candidates = candidates.len(), "Annotation unresolved");
        None
    }

    /// Collect candidates and resolve a single record
    pub fn resolve_in(&self, doc: &Document, record: &AnnotationRecord) -> Option<Anchor> {
        let candidates = self.candidates(doc);
        self.resolve(record, &candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::NewAnnotation;
    use chrono::Utc;

    const MARKER: &str = "data-annotation-id";

    fn record(text: &str) -> AnnotationRecord {
        NewAnnotation::highlight("https://example.com/", text).into_record("r-1".into(), Utc::now())
    }

    fn record_with_context(text: &str, before: &str, after: &str) -> AnnotationRecord {
        NewAnnotation::highlight("https://example.com/", text)
            .with_context(before, after)
            .into_record("r-ctx".into(), Utc::now())
    }

    fn resolver() -> AnchorResolver {
        AnchorResolver::new(&AnchoringConfig::default(), MARKER)
    }

    fn element_text(doc: &Document, anchor: &Anchor) -> String {
        normalize_text(&doc.text_content(anchor.element))
    }

    #[test]
    fn test_exact_match_prefers_innermost() {
        let doc = Document::parse_html(
            "<body><div><section><p>intro</p><p>say hello world today</p></section></div></body>",
        )
        .unwrap();

        let anchor = resolver().resolve_in(&doc, &record("hello world")).unwrap();
        assert_eq!(anchor.tier, MatchTier::Exact);
        assert_eq!(anchor.confidence, 1.0);
        assert_eq!(doc.tag_name(anchor.element), Some("p"));
        assert_eq!(element_text(&doc, &anchor), "say hello world today");
    }

    #[test]
    fn test_exact_match_ties_break_by_document_order() {
        let doc = Document::parse_html("<div><p>hello world</p><p>hello world again</p></div>")
            .unwrap();

        let anchor = resolver().resolve_in(&doc, &record("hello world")).unwrap();
        let first_p = doc.children(doc.children(doc.root())[0])[0];
        assert_eq!(anchor.element, first_p);
    }

    #[test]
    fn test_exact_match_across_inline_markup() {
        let doc = Document::parse_html("<p>hello <b>wide</b>\n   world</p>").unwrap();
        let anchor = resolver().resolve_in(&doc, &record("hello wide world")).unwrap();
        assert_eq!(anchor.tier, MatchTier::Exact);
        assert_eq!(doc.tag_name(anchor.element), Some("p"));
    }

    #[test]
    fn test_exact_precedence_over_later_tiers() {
        // A near-identical element sits earlier; exact still wins
        let doc = Document::parse_html(
            "<div><p>the quick brown fox jumps</p><p>the quick brown fox jumped</p></div>",
        )
        .unwrap();

        let anchor = resolver()
            .resolve_in(&doc, &record("the quick brown fox jumped"))
            .unwrap();
        assert_eq!(anchor.tier, MatchTier::Exact);
        assert_eq!(element_text(&doc, &anchor), "the quick brown fox jumped");
    }

    #[test]
    fn test_fuzzy_match_after_rewrite() {
        let doc = Document::parse_html("<div><p>unrelated text</p><p>hello, world!</p></div>")
            .unwrap();

        let anchor = resolver().resolve_in(&doc, &record("hello world")).unwrap();
        assert_eq!(anchor.tier, MatchTier::Fuzzy);
        assert!(anchor.confidence > 0.7);
        assert_eq!(element_text(&doc, &anchor), "hello, world!");
    }

    #[test]
    fn test_fuzzy_equal_scores_prefer_deeper_element() {
        let doc = Document::parse_html("<div><p>hello, world!</p></div>").unwrap();
        let anchor = resolver().resolve_in(&doc, &record("hello world")).unwrap();
        assert_eq!(doc.tag_name(anchor.element), Some("p"));
    }

    #[test]
    fn test_fuzzy_threshold_is_strict() {
        let strategies = vec![MatchStrategy::Fuzzy {
            threshold: 0.75,
            min_length_ratio: 0.5,
        }];
        let strict = AnchorResolver::with_strategies(strategies, 2, MARKER);
        // 3 edits over 12 chars scores exactly 0.75
        let doc = Document::parse_html("<p>abcdefghixyz</p>").unwrap();
        assert!(strict.resolve_in(&doc, &record("abcdefghijkl")).is_none());
    }

    #[test]
    fn test_fuzzy_skips_short_candidates() {
        let doc = Document::parse_html("<p>hello</p>").unwrap();
        let strategies = vec![MatchStrategy::Fuzzy {
            threshold: 0.1,
            min_length_ratio: 0.5,
        }];
        let lenient = AnchorResolver::with_strategies(strategies, 2, MARKER);
        assert!(lenient
            .resolve_in(&doc, &record("hello there, general kenobi"))
            .is_none());
    }

    #[test]
    fn test_context_match_when_text_changed() {
        let doc = Document::parse_html(
            "<div><p>Before the change we wrote colour twice, then after it.</p><p>noise here</p></div>",
        )
        .unwrap();
        let rec = record_with_context("color ONCE", "Before the change we wrote ", ", then after it.");

        let anchor = resolver().resolve_in(&doc, &rec).unwrap();
        assert_eq!(anchor.tier, MatchTier::Context);
        assert!(anchor.confidence > 0.6);
        assert!(anchor.confidence <= 1.0);
        assert_eq!(doc.tag_name(anchor.element), Some("p"));
    }

    #[test]
    fn test_context_requires_fragments_in_candidate() {
        let doc = Document::parse_html("<p>completely different paragraph text</p>").unwrap();
        let rec = record_with_context("zzzz", "missing prefix", "missing suffix");
        assert!(resolver().resolve_in(&doc, &rec).is_none());
    }

    #[test]
    fn test_context_tier_needs_context() {
        let strategies = vec![MatchStrategy::Context { threshold: 0.0 }];
        let only_context = AnchorResolver::with_strategies(strategies, 2, MARKER);
        let doc = Document::parse_html("<p>anything at all</p>").unwrap();
        assert!(only_context.resolve_in(&doc, &record("anything")).is_none());
    }

    #[test]
    fn test_empty_text_rejected() {
        let doc = Document::parse_html("<p>some text</p>").unwrap();
        let mut rec = record("placeholder");
        rec.original_text = "   ".to_string();
        assert!(resolver().resolve_in(&doc, &rec).is_none());
    }

    #[test]
    fn test_unresolvable_returns_none() {
        let doc = Document::parse_html("<p>nothing relevant</p>").unwrap();
        assert!(resolver()
            .resolve_in(&doc, &record("an entirely different sentence about ships"))
            .is_none());
    }

    #[test]
    fn test_candidates_skip_markers_and_scripts() {
        let doc = Document::parse_html(
            "<div><span data-annotation-id=\"x\"><p>wrapped text</p></span><script>var s = 'wrapped text';</script><p>a</p></div>",
        )
        .unwrap();

        let set = CandidateSet::collect(&doc, 2, MARKER);
        let tags: Vec<&str> = set.iter().filter_map(|c| doc.tag_name(c.element)).collect();
        // The marker span is skipped, its inner p kept, "a" is too short
        assert_eq!(tags, vec!["div", "p"]);
    }

    #[test]
    fn test_strategy_order_is_data() {
        let only_exact = AnchorResolver::with_strategies(vec![MatchStrategy::Exact], 2, MARKER);
        let doc = Document::parse_html("<p>hello, world!</p>").unwrap();
        assert!(only_exact.resolve_in(&doc, &record("hello world")).is_none());
        assert_eq!(resolver().strategies().len(), 3);
        assert_eq!(resolver().strategies()[0].tier(), MatchTier::Exact);
    }
}
