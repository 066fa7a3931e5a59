//! Keep / archive / discard retention policy.
//!
//! The policy is an ordered rule list evaluated top to bottom; the first
//! matching rule decides. Keep rules come first, archive rules after them,
//! and anything no rule claims is discarded.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::{Message, MessageRole};
use crate::context::classifier::{Category, Classification, Importance};

/// What happens to a non-recent turn during a compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Stays in the live transcript verbatim.
    Keep,
    /// Moves to the archive store and leaves the live transcript.
    Archive,
    /// Dropped with no record.
    Discard,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Keep => write!(f, "keep"),
            Disposition::Archive => write!(f, "archive"),
            Disposition::Discard => write!(f, "discard"),
        }
    }
}

/// Flags the rules consult besides the classification itself.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    pub preserve_error_context: bool,
    pub preserve_code_blocks: bool,
    /// Code turns at or under this many characters count as small.
    pub small_code_chars: usize,
}

impl Default for PolicyContext {
    fn default() -> Self {
        Self {
            preserve_error_context: true,
            preserve_code_blocks: true,
            small_code_chars: 1_500,
        }
    }
}

type Predicate = fn(&Classification, &Message, &PolicyContext) -> bool;

/// One predicate-to-disposition rule.
#[derive(Clone, Copy)]
pub struct RetentionRule {
    pub name: &'static str,
    pub disposition: Disposition,
    pub predicate: Predicate,
}

impl fmt::Debug for RetentionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionRule")
            .field("name", &self.name)
            .field("disposition", &self.disposition)
            .finish()
    }
}

impl RetentionRule {
    pub fn matches(&self, c: &Classification, turn: &Message, ctx: &PolicyContext) -> bool {
        (self.predicate)(c, turn, ctx)
    }
}

// ── Standard rules ─────────────────────────────────────────────────

fn is_critical(c: &Classification, _: &Message, _: &PolicyContext) -> bool {
    c.importance == Importance::Critical
}

fn is_correction_or_decision(c: &Classification, _: &Message, _: &PolicyContext) -> bool {
    c.has(Category::UserCorrection) || c.has(Category::KeyDecision)
}

fn is_preserved_error(c: &Classification, _: &Message, ctx: &PolicyContext) -> bool {
    ctx.preserve_error_context && c.has(Category::ErrorReport)
}

fn is_small_code(c: &Classification, turn: &Message, ctx: &PolicyContext) -> bool {
    ctx.preserve_code_blocks
        && c.has(Category::CodeSnippet)
        && turn.text().len() <= ctx.small_code_chars
}

fn is_preference(c: &Classification, _: &Message, _: &PolicyContext) -> bool {
    c.has(Category::UserPreference)
}

fn is_high_or_medium(c: &Classification, _: &Message, _: &PolicyContext) -> bool {
    matches!(c.importance, Importance::High | Importance::Medium)
}

fn is_archivable_category(c: &Classification, _: &Message, _: &PolicyContext) -> bool {
    c.has(Category::UserRequest) || c.has(Category::CodeSnippet) || c.has(Category::FileContent)
}

/// Ordered retention rules.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    rules: Vec<RetentionRule>,
    context: PolicyContext,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::standard(PolicyContext::default())
    }
}

impl RetentionPolicy {
    /// The standard cascade: keep critical, corrections, decisions,
    /// preserved errors, small code and preferences; archive high/medium
    /// turns, requests, code and file content; discard the rest.
    pub fn standard(context: PolicyContext) -> Self {
        use Disposition::{Archive, Keep};
        let rule = |name, disposition, predicate: Predicate| RetentionRule {
            name,
            disposition,
            predicate,
        };
        Self {
            rules: vec![
                rule("critical", Keep, is_critical),
                rule("correction_or_decision", Keep, is_correction_or_decision),
                rule("error_context", Keep, is_preserved_error),
                rule("small_code", Keep, is_small_code),
                rule("preference", Keep, is_preference),
                rule("high_or_medium", Archive, is_high_or_medium),
                rule("archivable_category", Archive, is_archivable_category),
            ],
            context,
        }
    }

    /// A policy with custom rules.
    pub fn with_rules(rules: Vec<RetentionRule>, context: PolicyContext) -> Self {
        Self { rules, context }
    }

    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    pub fn context(&self) -> &PolicyContext {
        &self.context
    }

    pub fn set_context(&mut self, context: PolicyContext) {
        self.context = context;
    }

    /// Decide one turn. Returns the disposition and the deciding rule's name
    /// (`"default"` when nothing matched).
    pub fn decide(&self, c: &Classification, turn: &Message) -> (Disposition, &'static str) {
        self.rules
            .iter()
            .find(|r| r.matches(c, turn, &self.context))
            .map_or((Disposition::Discard, "default"), |r| {
                (r.disposition, r.name)
            })
    }

    /// Partition `indices` of `turns` by disposition.
    pub fn partition(
        &self,
        turns: &[Message],
        classifications: &[Classification],
        indices: impl IntoIterator<Item = usize>,
    ) -> Partition {
        let mut partition = Partition::default();
        for i in indices {
            let (disposition, _) = self.decide(&classifications[i], &turns[i]);
            match disposition {
                Disposition::Keep => partition.keep.push(i),
                Disposition::Archive => partition.archive.push(i),
                Disposition::Discard => partition.discard.push(i),
            }
        }
        partition
    }
}

/// Turn indices split by disposition, each list in original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub keep: Vec<usize>,
    pub archive: Vec<usize>,
    pub discard: Vec<usize>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.keep.len() + self.archive.len() + self.discard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn disposition_of(&self, index: usize) -> Option<Disposition> {
        if self.keep.contains(&index) {
            Some(Disposition::Keep)
        } else if self.archive.contains(&index) {
            Some(Disposition::Archive)
        } else if self.discard.contains(&index) {
            Some(Disposition::Discard)
        } else {
            None
        }
    }

    fn reassign(&mut self, index: usize, to: Disposition) -> bool {
        if self.disposition_of(index) == Some(to) {
            return false;
        }
        self.keep.retain(|&i| i != index);
        self.archive.retain(|&i| i != index);
        self.discard.retain(|&i| i != index);
        let list = match to {
            Disposition::Keep => &mut self.keep,
            Disposition::Archive => &mut self.archive,
            Disposition::Discard => &mut self.discard,
        };
        let at = list.partition_point(|&i| i < index);
        list.insert(at, index);
        true
    }

    /// Give each tool call and its results one disposition, so the live
    /// transcript never holds a result without its call or the reverse.
    ///
    /// A group with any kept member is kept whole; otherwise a group with
    /// any archived member is archived whole. Kept results whose call is
    /// not in `turns` move to the archive. Returns the number of turns moved.
    pub fn bind_tool_pairs(&mut self, turns: &[Message]) -> usize {
        let pairing = ToolPairing::scan(turns);
        let mut moved = 0;
        for group in &pairing.groups {
            let target = if group.iter().any(|i| self.keep.contains(i)) {
                Disposition::Keep
            } else if group.iter().any(|i| self.archive.contains(i)) {
                Disposition::Archive
            } else {
                continue;
            };
            for &i in group {
                if self.reassign(i, target) {
                    moved += 1;
                }
            }
        }
        for &i in &pairing.orphans {
            if self.keep.contains(&i) && self.reassign(i, Disposition::Archive) {
                moved += 1;
            }
        }
        moved
    }
}

// ── Tool-call pairing ──────────────────────────────────────────────

/// Assistant tool-call turns matched with the tool results answering them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPairing {
    /// Issuing turn first, then its results, in order.
    pub groups: Vec<Vec<usize>>,
    /// Tool results whose call id no earlier turn issued.
    pub orphans: Vec<usize>,
}

impl ToolPairing {
    pub fn scan(turns: &[Message]) -> Self {
        let mut issuer: HashMap<&str, usize> = HashMap::new();
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut orphans = Vec::new();
        for (i, turn) in turns.iter().enumerate() {
            for call in turn.tool_calls.iter().flatten() {
                issuer.insert(call.id.as_str(), i);
            }
            if turn.role != MessageRole::Tool {
                continue;
            }
            match turn.tool_call_id.as_deref().and_then(|id| issuer.get(id)) {
                Some(&call) => groups.entry(call).or_insert_with(|| vec![call]).push(i),
                None => orphans.push(i),
            }
        }
        Self {
            groups: groups.into_values().collect(),
            orphans,
        }
    }

    /// The group containing `index`, if any.
    pub fn group_of(&self, index: usize) -> Option<&[usize]> {
        self.groups
            .iter()
            .find(|g| g.contains(&index))
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(importance: Importance, categories: &[Category]) -> Classification {
        categories
            .iter()
            .fold(Classification::default().with_importance(importance), |c, cat| {
                c.with_category(*cat)
            })
    }

    fn decide(c: &Classification, turn: &Message) -> (Disposition, &'static str) {
        RetentionPolicy::default().decide(c, turn)
    }

    #[test]
    fn critical_is_kept() {
        let c = classified(Importance::Critical, &[]);
        assert_eq!(decide(&c, &Message::user("x")), (Disposition::Keep, "critical"));
    }

    #[test]
    fn low_importance_decision_is_still_kept() {
        let c = classified(Importance::Low, &[Category::KeyDecision]);
        assert_eq!(decide(&c, &Message::user("x")).0, Disposition::Keep);
    }

    #[test]
    fn error_context_respects_flag() {
        let c = classified(Importance::Low, &[Category::ErrorReport]);
        let turn = Message::tool_result("c", "error: boom");
        assert_eq!(decide(&c, &turn), (Disposition::Keep, "error_context"));

        let policy = RetentionPolicy::standard(PolicyContext {
            preserve_error_context: false,
            ..PolicyContext::default()
        });
        assert_eq!(policy.decide(&c, &turn).0, Disposition::Discard);
    }

    #[test]
    fn small_code_kept_large_code_archived() {
        let c = classified(Importance::Medium, &[Category::CodeSnippet]);
        let small = Message::assistant_text("```rust\nfn a() {}\n```");
        assert_eq!(decide(&c, &small), (Disposition::Keep, "small_code"));

        let large = Message::assistant_text(format!("```\n{}\n```", "x".repeat(2_000)));
        assert_eq!(decide(&c, &large), (Disposition::Archive, "high_or_medium"));
    }

    #[test]
    fn low_code_snippet_archived_by_category() {
        let c = classified(Importance::Low, &[Category::CodeSnippet]);
        let large = Message::assistant_text("y".repeat(3_000));
        assert_eq!(decide(&c, &large), (Disposition::Archive, "archivable_category"));
    }

    #[test]
    fn keep_wins_over_archive() {
        let c = classified(Importance::High, &[Category::UserPreference]);
        assert_eq!(decide(&c, &Message::user("x")).0, Disposition::Keep);
    }

    #[test]
    fn low_and_noise_discarded() {
        for importance in [Importance::Low, Importance::Noise] {
            let c = classified(importance, &[]);
            assert_eq!(
                decide(&c, &Message::assistant_text("x")),
                (Disposition::Discard, "default")
            );
        }
    }

    #[test]
    fn pairing_groups_calls_with_results() {
        use crate::ToolCall;
        let turns = vec![
            Message::user("look at the build"),
            Message::assistant_tool_calls(vec![
                ToolCall::function("c1", "shell", "{}"),
                ToolCall::function("c2", "shell", "{}"),
            ]),
            Message::tool_result("c1", "ok"),
            Message::tool_result("c2", "error: build failed"),
            Message::tool_result("c9", "stray"),
        ];
        let pairing = ToolPairing::scan(&turns);
        assert_eq!(pairing.groups, vec![vec![1, 2, 3]]);
        assert_eq!(pairing.orphans, vec![4]);
        assert_eq!(pairing.group_of(3), Some(&[1, 2, 3][..]));
        assert_eq!(pairing.group_of(0), None);
    }

    #[test]
    fn kept_result_pulls_in_its_call() {
        use crate::ToolCall;
        let turns = vec![
            Message::assistant_tool_calls(vec![ToolCall::function("c1", "shell", "{}")]),
            Message::tool_result("c1", "error: build failed"),
            Message::assistant_tool_calls(vec![ToolCall::function("c2", "shell", "{}")]),
            Message::tool_result("c2", "listing"),
            Message::tool_result("c7", "error: orphan"),
        ];
        let mut p = Partition {
            keep: vec![1, 4],
            archive: vec![3],
            discard: vec![0, 2],
        };
        assert_eq!(p.bind_tool_pairs(&turns), 3);
        assert_eq!(p.keep, vec![0, 1]);
        assert_eq!(p.archive, vec![2, 3, 4]);
        assert!(p.discard.is_empty());
        assert_eq!(p.len(), turns.len());
    }

    #[test]
    fn partition_is_complete_and_disjoint() {
        let turns = vec![
            Message::user("a"),
            Message::user("b"),
            Message::user("c"),
        ];
        let cs = vec![
            classified(Importance::Critical, &[]),
            classified(Importance::Medium, &[]),
            classified(Importance::Noise, &[]),
        ];
        let p = RetentionPolicy::default().partition(&turns, &cs, 0..3);
        assert_eq!(p.keep, vec![0]);
        assert_eq!(p.archive, vec![1]);
        assert_eq!(p.discard, vec![2]);
        assert_eq!(p.len(), 3);
        for i in 0..3 {
            assert!(p.disposition_of(i).is_some());
        }
    }

    #[test]
    fn custom_rules_replace_cascade() {
        fn everything(_: &Classification, _: &Message, _: &PolicyContext) -> bool {
            true
        }
        let policy = RetentionPolicy::with_rules(
            vec![RetentionRule {
                name: "archive_all",
                disposition: Disposition::Archive,
                predicate: everything,
            }],
            PolicyContext::default(),
        );
        let c = classified(Importance::Critical, &[]);
        assert_eq!(policy.decide(&c, &Message::user("x")).1, "archive_all");
    }
}
