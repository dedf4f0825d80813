//! Name correspondence between the two trees.
//!
//! Names match either exactly or through weighted substitution rules. Rules
//! are directional (they rewrite one name to predict the other), so a pair is
//! tried in both directions and the better direction wins.

use regex::Regex;
use tracing::debug;
use treecmp_common::{MatchCommands, MatchRule, TreeCmpError};

/// Weight of a literal name match; always beats any rule
pub const EXACT_WEIGHT: u32 = 0;

/// A successful name match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub weight: u32,
    pub commands: MatchCommands,
}

impl MatchOutcome {
    fn exact() -> Self {
        Self {
            weight: EXACT_WEIGHT,
            commands: MatchCommands::none(),
        }
    }
}

/// A match rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    regex: Regex,
    replacement: String,
    first_command: Option<String>,
    second_command: Option<String>,
    weight: u32,
}

impl CompiledRule {
    pub fn compile(rule: &MatchRule) -> Result<Self, TreeCmpError> {
        rule.validate()?;

        let regex = Regex::new(&rule.pattern).map_err(|e| TreeCmpError::InvalidRule {
            pattern: rule.pattern.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            regex,
            replacement: translate_replacement(&rule.replacement),
            first_command: non_empty(&rule.first_command),
            second_command: non_empty(&rule.second_command),
            weight: rule.weight,
        })
    }

    /// Rewrite `name`, or `None` if the pattern does not match it
    pub fn apply(&self, name: &str) -> Option<String> {
        if !self.regex.is_match(name) {
            return None;
        }
        Some(self.regex.replace_all(name, self.replacement.as_str()).into_owned())
    }
}

fn non_empty(command: &Option<String>) -> Option<String> {
    command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Convert `\N` back-references to the regex crate's `${N}` form. `$N`
/// references pass through unchanged and `\\` is a literal backslash.
fn translate_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 4);
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(d) if d.is_ascii_digit() => {
                let mut group = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    group.push(*d);
                    chars.next();
                }
                out.push_str("${");
                out.push_str(&group);
                out.push('}');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Decides whether two item names correspond
#[derive(Debug, Clone)]
pub enum NameMatcher {
    /// Only identical names match
    Exact,
    /// Identical names, or names related by one of the rules
    RuleBased(Vec<CompiledRule>),
}

impl NameMatcher {
    /// `Exact` when there are no rules
    pub fn from_rules(rules: &[MatchRule]) -> Result<Self, TreeCmpError> {
        if rules.is_empty() {
            return Ok(NameMatcher::Exact);
        }
        let compiled = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Compiled {} match rules", compiled.len());
        Ok(NameMatcher::RuleBased(compiled))
    }

    pub fn is_fuzzy(&self) -> bool {
        matches!(self, NameMatcher::RuleBased(rules) if !rules.is_empty())
    }

    /// Match `a` (left) against `b` (right)
    pub fn compare(&self, a: &str, b: &str) -> Option<MatchOutcome> {
        if a == b {
            return Some(MatchOutcome::exact());
        }

        let NameMatcher::RuleBased(rules) = self else {
            return None;
        };

        let forward = best_rule(rules, a, b);
        let backward = best_rule(rules, b, a);

        match (forward, backward) {
            (Some(f), Some(r)) if r.weight < f.weight => Some(r.reversed()),
            (Some(f), _) => Some(f.forward()),
            (None, Some(r)) => Some(r.reversed()),
            (None, None) => None,
        }
    }
}

struct RuleHit<'a> {
    rule: &'a CompiledRule,
    weight: u32,
}

impl RuleHit<'_> {
    fn forward(&self) -> MatchOutcome {
        MatchOutcome {
            weight: self.weight,
            commands: MatchCommands {
                left: self.rule.first_command.clone(),
                right: self.rule.second_command.clone(),
            },
        }
    }

    fn reversed(&self) -> MatchOutcome {
        MatchOutcome {
            weight: self.weight,
            commands: MatchCommands {
                left: self.rule.second_command.clone(),
                right: self.rule.first_command.clone(),
            },
        }
    }
}

/// Lowest-weight rule rewriting `from` into `to`; the earliest rule wins ties
fn best_rule<'a>(rules: &'a [CompiledRule], from: &str, to: &str) -> Option<RuleHit<'a>> {
    let mut best: Option<RuleHit<'a>> = None;
    for rule in rules {
        if best.as_ref().is_some_and(|hit| hit.weight <= rule.weight) {
            continue;
        }
        if rule.apply(from).as_deref() == Some(to) {
            best = Some(RuleHit {
                rule,
                weight: rule.weight,
            });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(rules: Vec<MatchRule>) -> NameMatcher {
        NameMatcher::from_rules(&rules).unwrap()
    }

    #[test]
    fn test_exact_matcher() {
        let m = NameMatcher::Exact;
        assert_eq!(m.compare("a.txt", "a.txt").map(|o| o.weight), Some(0));
        assert!(m.compare("a.txt", "A.txt").is_none());
        assert!(!m.is_fuzzy());
    }

    #[test]
    fn test_no_rules_is_exact() {
        assert!(matches!(matcher(vec![]), NameMatcher::Exact));
    }

    #[test]
    fn test_backslash_group_replacement() {
        let m = matcher(vec![MatchRule::new(r".*\.c$", r"\0pp", 1)]);
        let outcome = m.compare("foo.c", "foo.cpp").unwrap();
        assert_eq!(outcome.weight, 1);
        assert!(outcome.commands.is_empty());
    }

    #[test]
    fn test_reverse_direction() {
        let m = matcher(vec![MatchRule::new(r"(.*)\.gz$", "$1", 3).with_commands(
            Some("gunzip".to_string()),
            None,
        )]);

        let forward = m.compare("log.txt.gz", "log.txt").unwrap();
        assert_eq!(forward.commands.left.as_deref(), Some("gunzip"));
        assert_eq!(forward.commands.right, None);

        let reverse = m.compare("log.txt", "log.txt.gz").unwrap();
        assert_eq!(reverse.weight, 3);
        assert_eq!(reverse.commands.left, None);
        assert_eq!(reverse.commands.right.as_deref(), Some("gunzip"));
    }

    #[test]
    fn test_lowest_weight_selected() {
        let m = matcher(vec![
            MatchRule::new(r"^a$", "b", 5),
            MatchRule::new(r"^a$", "b", 2),
            MatchRule::new(r"^a$", "b", 8),
        ]);
        assert_eq!(m.compare("a", "b").unwrap().weight, 2);
    }

    #[test]
    fn test_first_declared_rule_wins_ties() {
        let m = matcher(vec![
            MatchRule::new(r"^a$", "b", 2).with_commands(Some("first".to_string()), None),
            MatchRule::new(r"^a$", "b", 2).with_commands(Some("second".to_string()), None),
        ]);
        let outcome = m.compare("a", "b").unwrap();
        assert_eq!(outcome.commands.left.as_deref(), Some("first"));
    }

    #[test]
    fn test_better_direction_wins() {
        let m = matcher(vec![
            MatchRule::new(r"^x$", "y", 6).with_commands(Some("fwd".to_string()), None),
            MatchRule::new(r"^y$", "x", 4).with_commands(Some("rev".to_string()), None),
        ]);
        let outcome = m.compare("x", "y").unwrap();
        assert_eq!(outcome.weight, 4);
        assert_eq!(outcome.commands.right.as_deref(), Some("rev"));
    }

    #[test]
    fn test_equal_names_beat_rules() {
        let m = matcher(vec![MatchRule::new(r"(.*)", "$1", 1).with_commands(
            Some("cmd".to_string()),
            None,
        )]);
        let outcome = m.compare("same", "same").unwrap();
        assert_eq!(outcome.weight, EXACT_WEIGHT);
        assert!(outcome.commands.is_empty());
    }

    #[test]
    fn test_no_match() {
        let m = matcher(vec![MatchRule::new(r"(.*)\.c$", "$1.cpp", 1)]);
        assert!(m.compare("foo.c", "bar.cpp").is_none());
        assert!(m.compare("foo.h", "foo.cpp").is_none());
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let bad_regex = NameMatcher::from_rules(&[MatchRule::new("(", "x", 1)]);
        assert!(matches!(bad_regex, Err(TreeCmpError::InvalidRule { .. })));

        let zero_weight = NameMatcher::from_rules(&[MatchRule::new("a", "b", 0)]);
        assert!(matches!(zero_weight, Err(TreeCmpError::InvalidRule { .. })));
    }

    #[test]
    fn test_translate_replacement() {
        assert_eq!(translate_replacement(r"\0pp"), "${0}pp");
        assert_eq!(translate_replacement(r"\1-\12"), "${1}-${12}");
        assert_eq!(translate_replacement(r"a\\b"), r"a\b");
        assert_eq!(translate_replacement("$1.txt"), "$1.txt");
    }
}
