//! Per-message reaction state: one symbol per user, aggregated for display.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ChatError, ChatResult};
use crate::model::{MessageId, ReactionMap, UserId};

const MAX_SYMBOL_LEN: usize = 32;

const LABELS: [(&str, &str); 20] = [
    ("👍", "Like"),
    ("❤️", "Love"),
    ("😂", "Laugh"),
    ("😊", "Smile"),
    ("😮", "Surprised"),
    ("😢", "Sad"),
    ("😡", "Angry"),
    ("🎉", "Celebrate"),
    ("🔥", "Fire"),
    ("💯", "100"),
    ("👏", "Clap"),
    ("🙏", "Pray"),
    ("🤔", "Thinking"),
    ("😴", "Sleepy"),
    ("🤮", "Sick"),
    ("💪", "Strong"),
    ("🎯", "Target"),
    ("🚀", "Rocket"),
    ("⭐", "Star"),
    ("💎", "Diamond"),
];

pub fn label_for(symbol: &str) -> &'static str {
    LABELS
        .iter()
        .find(|(known, _)| *known == symbol)
        .map_or("Custom", |(_, label)| *label)
}

pub fn validate_symbol(symbol: &str) -> ChatResult<()> {
    if symbol.trim().is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return Err(ChatError::InvalidSymbol);
    }
    Ok(())
}

/// Toggles `user`'s reaction on the message identified by `target`.
///
/// Reacting with the symbol the user already has removes it; any other
/// symbol replaces the previous one. The input map is left untouched.
pub fn toggle(
    target: Option<&MessageId>,
    reactions: &ReactionMap,
    user: &UserId,
    symbol: &str,
) -> ChatResult<ReactionMap> {
    if target.is_none() {
        return Err(ChatError::InvalidTarget);
    }
    validate_symbol(symbol)?;

    let mut next = reactions.clone();
    if next.get(user).map(String::as_str) == Some(symbol) {
        next.remove(user);
    } else {
        next.insert(user.clone(), symbol.to_owned());
    }
    Ok(next)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionCount {
    pub symbol: String,
    pub count: usize,
    pub label: &'static str,
    /// Set when the viewer's own reaction is this symbol.
    pub mine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReactionSummary {
    pub counts: Vec<ReactionCount>,
    pub total: usize,
}

/// Groups reactions by symbol. Ordered by count descending, then symbol, so
/// unchanged input always renders the same way.
pub fn aggregate(reactions: &ReactionMap) -> Vec<ReactionCount> {
    let mut by_symbol: BTreeMap<&str, usize> = BTreeMap::new();
    for symbol in reactions.values() {
        if symbol.is_empty() {
            continue;
        }
        *by_symbol.entry(symbol.as_str()).or_default() += 1;
    }

    let mut counts: Vec<ReactionCount> = by_symbol
        .into_iter()
        .map(|(symbol, count)| ReactionCount {
            symbol: symbol.to_owned(),
            count,
            label: label_for(symbol),
            mine: false,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.symbol.cmp(&b.symbol)));
    counts
}

pub fn aggregate_for(reactions: &ReactionMap, viewer: &UserId) -> ReactionSummary {
    let own = reactions.get(viewer);
    let counts: Vec<ReactionCount> = aggregate(reactions)
        .into_iter()
        .map(|mut count| {
            count.mine = own == Some(&count.symbol);
            count
        })
        .collect();
    let total = counts.iter().map(|c| c.count).sum();

    ReactionSummary { counts, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn map(entries: &[(&str, &str)]) -> ReactionMap {
        entries
            .iter()
            .map(|(u, s)| (user(u), (*s).to_owned()))
            .collect()
    }

    #[test]
    fn toggle_twice_returns_to_absent() {
        let id = MessageId::parse("m1").unwrap();
        let alice = user("alice");
        let start = map(&[("bob", "❤️")]);

        let once = toggle(Some(&id), &start, &alice, "👍").unwrap();
        assert_eq!(once.get(&alice).map(String::as_str), Some("👍"));

        let twice = toggle(Some(&id), &once, &alice, "👍").unwrap();
        assert_eq!(twice, start);
    }

    #[test]
    fn new_symbol_replaces_previous_one() {
        let id = MessageId::parse("m1").unwrap();
        let alice = user("alice");
        let start = map(&[("alice", "👍")]);

        let next = toggle(Some(&id), &start, &alice, "🔥").unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next.get(&alice).map(String::as_str), Some("🔥"));
    }

    #[test]
    fn missing_target_or_symbol_is_rejected() {
        let id = MessageId::parse("m1").unwrap();
        let alice = user("alice");
        let start = ReactionMap::new();

        assert_eq!(
            toggle(None, &start, &alice, "👍"),
            Err(ChatError::InvalidTarget)
        );
        assert_eq!(
            toggle(Some(&id), &start, &alice, " "),
            Err(ChatError::InvalidSymbol)
        );
        assert_eq!(
            toggle(Some(&id), &start, &alice, &"x".repeat(40)),
            Err(ChatError::InvalidSymbol)
        );
    }

    #[test]
    fn aggregate_counts_per_symbol() {
        let reactions = map(&[("a", "👍"), ("b", "👍"), ("c", "❤️")]);
        let counts = aggregate(&reactions);

        let mut pairs: Vec<(String, usize)> =
            counts.iter().map(|c| (c.symbol.clone(), c.count)).collect();
        pairs.sort();
        let mut expected = vec![("👍".to_owned(), 2), ("❤️".to_owned(), 1)];
        expected.sort();
        assert_eq!(pairs, expected);

        assert_eq!(counts[0].symbol, "👍");
        assert_eq!(counts[0].label, "Like");
    }

    #[test]
    fn aggregate_is_stable_and_labels_unknown_symbols() {
        let reactions = map(&[("a", "🦀"), ("b", "🔥")]);
        let first = aggregate(&reactions);
        assert_eq!(first, aggregate(&reactions));
        assert_eq!(first.iter().find(|c| c.symbol == "🦀").unwrap().label, "Custom");
        assert_eq!(first.iter().find(|c| c.symbol == "🔥").unwrap().label, "Fire");
    }

    #[test]
    fn summary_marks_viewer_reaction() {
        let reactions = map(&[("alice", "😂"), ("bob", "👍"), ("carol", "👍")]);
        let summary = aggregate_for(&reactions, &user("alice"));

        assert_eq!(summary.total, 3);
        let mine: Vec<&str> = summary
            .counts
            .iter()
            .filter(|c| c.mine)
            .map(|c| c.symbol.as_str())
            .collect();
        assert_eq!(mine, vec!["😂"]);
    }
}
