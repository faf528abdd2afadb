// Re-parents sub-challenge list items ("Mini-desafio:") under the achievement
// item ("Conquista:") they belong to, and collapses doubled arrow markers.
//
// Every item ends in one of three states: achievement, attached
// sub-challenge, or unattached sub-challenge (left in place and flagged).
// A sub-challenge already sitting in an achievement's sub-list is never
// moved again, so re-running the repair on its own output changes nothing.

use crate::config::RepairConfig;
use crate::error::RestructureError;
use crate::rules::labels::contains_ci;
use crate::tree::{MarkupTree, MarkupTreeMut, NodeId, NodeKind};
use crate::types::RepairReport;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemRole {
    Achievement,
    SubChallenge,
}

pub struct HierarchyRepair {
    config: RepairConfig,
    repeated_glyph: Regex,
}

impl HierarchyRepair {
    pub fn new(config: &RepairConfig) -> Result<Self, RestructureError> {
        let glyph = regex::escape(&config.arrow_glyph);
        if glyph.is_empty() {
            return Err(RestructureError::Config("arrow_glyph must not be empty".to_string()));
        }
        let repeated_glyph = Regex::new(&format!(r"{glyph}(?:\s*{glyph})+"))
            .map_err(|e| RestructureError::Config(format!("bad arrow glyph: {e}")))?;
        Ok(Self {
            config: config.clone(),
            repeated_glyph,
        })
    }

    pub fn repair<T: MarkupTreeMut + ?Sized>(&self, tree: &mut T) -> RepairReport {
        let mut report = RepairReport {
            duplicate_markers_collapsed: self.collapse_duplicate_markers(tree),
            ..RepairReport::default()
        };

        let root = tree.root();
        let items: Vec<(NodeId, ItemRole)> = tree
            .descendants(root)
            .into_iter()
            .filter(|&id| matches!(tree.kind(id), NodeKind::ListItem))
            .filter_map(|id| self.classify(&*tree, id).map(|role| (id, role)))
            .collect();
        let achievements: HashSet<NodeId> = items
            .iter()
            .filter(|(_, role)| *role == ItemRole::Achievement)
            .map(|(id, _)| *id)
            .collect();

        let mut last_achievement: Option<NodeId> = None;
        let mut unattached = Vec::new();
        let mut sources = Vec::new();
        for &(item, role) in &items {
            if role == ItemRole::Achievement {
                last_achievement = Some(item);
                continue;
            }
            if self.is_nested(&*tree, item, &achievements) {
                report.already_nested += 1;
                continue;
            }
            // Nothing precedes the item in document order that could own it
            let owner = last_achievement.and_then(|_| find_owner(&*tree, item, &achievements));
            match owner {
                Some(owner) => {
                    let source = tree.parent(item);
                    let sub_list = self.sub_list(tree, owner);
                    tree.append_child(sub_list, item);
                    sources.extend(source);
                    report.attached += 1;
                }
                None => {
                    warn!(
                        "sub-challenge {:?} has no owning achievement; left in place",
                        tree.normalized_text(item)
                    );
                    unattached.push(item);
                }
            }
        }

        for &(item, role) in &items {
            match role {
                ItemRole::Achievement => {
                    tree.add_class(item, &self.config.achievement_class);
                    let owns_items = self
                        .existing_sub_list(&*tree, item)
                        .is_some_and(|list| tree.children(list).iter().any(|&c| is_item(&*tree, c)));
                    if owns_items {
                        tree.add_class(item, &self.config.has_sub_challenge_class);
                    }
                }
                ItemRole::SubChallenge => tree.add_class(item, &self.config.sub_challenge_class),
            }
        }
        for &item in &unattached {
            tree.add_class(item, &self.config.unattached_class);
        }

        let mut removed = HashSet::new();
        for list in sources {
            if removed.contains(&list) || !tree.kind(list).is_list() {
                continue;
            }
            if !tree.children(list).iter().any(|&c| is_item(&*tree, c)) && tree.is_blank(list) {
                tree.detach(list);
                removed.insert(list);
            }
        }

        report.achievements = achievements.len();
        report.unattached = unattached.len();
        debug!(
            "hierarchy repair: {} achievement(s), {} attached, {} already nested, {} unattached, {} marker(s) collapsed",
            report.achievements,
            report.attached,
            report.already_nested,
            report.unattached,
            report.duplicate_markers_collapsed
        );
        report
    }

    fn classify<T: MarkupTree + ?Sized>(&self, tree: &T, item: NodeId) -> Option<ItemRole> {
        let text = own_text(tree, item);
        if contains_ci(&text, &self.config.achievement_label) {
            Some(ItemRole::Achievement)
        } else if contains_ci(&text, &self.config.sub_challenge_label) {
            Some(ItemRole::SubChallenge)
        } else {
            None
        }
    }

    fn is_nested<T: MarkupTree + ?Sized>(&self, tree: &T, item: NodeId, achievements: &HashSet<NodeId>) -> bool {
        tree.parent(item).is_some_and(|list| {
            tree.has_class(list, &self.config.sub_list_class)
                && tree.parent(list).is_some_and(|owner| achievements.contains(&owner))
        })
    }

    fn existing_sub_list<T: MarkupTree + ?Sized>(&self, tree: &T, achievement: NodeId) -> Option<NodeId> {
        tree.children(achievement)
            .iter()
            .copied()
            .find(|&c| tree.kind(c).is_list() && tree.has_class(c, &self.config.sub_list_class))
    }

    /// The achievement's sub-list, created on first use.
    fn sub_list<T: MarkupTreeMut + ?Sized>(&self, tree: &mut T, achievement: NodeId) -> NodeId {
        if let Some(list) = self.existing_sub_list(&*tree, achievement) {
            return list;
        }
        let list = tree.create_node(NodeKind::List { ordered: false });
        tree.add_class(list, &self.config.sub_list_class);
        tree.append_child(achievement, list);
        list
    }

    fn is_marker<T: MarkupTree + ?Sized>(&self, tree: &T, id: NodeId) -> bool {
        tree.kind(id).is_run()
            && (tree.text_content(id).contains(&self.config.arrow_glyph)
                || self.config.marker_classes.iter().any(|c| tree.has_class(id, c)))
    }

    /// Returns the number of glyph repetitions removed.
    fn collapse_duplicate_markers<T: MarkupTreeMut + ?Sized>(&self, tree: &mut T) -> usize {
        let glyph = self.config.arrow_glyph.as_str();
        let mut collapsed = 0;
        let root = tree.root();

        // An inner marker nested in an outer marker of the same kind is
        // unwrapped, then its text merged with the neighbours.
        for id in tree.descendants(root) {
            if !self.is_marker(&*tree, id) {
                continue;
            }
            let nested = tree
                .ancestors(id)
                .into_iter()
                .take_while(|&a| !tree.kind(a).is_block())
                .any(|a| tree.kind(a) == tree.kind(id) && self.is_marker(&*tree, a));
            if let (true, Some(parent)) = (nested, tree.parent(id)) {
                tree.unwrap_node(id);
                merge_adjacent_text(tree, parent);
            }
        }

        for id in tree.descendants(root) {
            let NodeKind::Text(text) = tree.kind(id) else {
                continue;
            };
            let repeats = self.repeated_glyph.find_iter(text).count();
            if repeats > 0 {
                let replaced = self.repeated_glyph.replace_all(text, glyph).into_owned();
                tree.set_text(id, replaced);
                collapsed += repeats;
            }
        }

        // A glyph directly followed by a run that opens with the glyph again
        for block in tree.descendants(root) {
            if !matches!(tree.kind(block), NodeKind::ListItem | NodeKind::Paragraph) {
                continue;
            }
            let mut after_glyph = false;
            for id in inline_text_nodes(&*tree, block) {
                let text = match tree.kind(id) {
                    NodeKind::Text(text) => text.clone(),
                    _ => continue,
                };
                if text.trim().is_empty() {
                    continue;
                }
                let mut current = text.clone();
                if after_glyph {
                    if let Some(rest) = text.trim_start().strip_prefix(glyph) {
                        collapsed += 1;
                        if rest.trim().is_empty() {
                            detach_with_blank_runs(tree, id, block);
                            continue;
                        }
                        current = rest.to_string();
                        tree.set_text(id, current.clone());
                    }
                }
                after_glyph = current.trim_end().ends_with(glyph);
            }
        }
        collapsed
    }
}

/// Staged backward search for the achievement that owns a sub-challenge.
/// The first stage that finds one wins.
fn find_owner<T: MarkupTree + ?Sized>(tree: &T, item: NodeId, achievements: &HashSet<NodeId>) -> Option<NodeId> {
    // 1. nearest preceding sibling achievement
    if let Some(owner) = tree
        .preceding_siblings(item)
        .into_iter()
        .find(|s| achievements.contains(s))
    {
        return Some(owner);
    }

    let parent = tree.parent(item)?;
    let list = tree.kind(parent).is_list().then_some(parent);
    if let Some(list) = list {
        // 2. the last achievement of a preceding sibling list
        for sibling in tree.preceding_siblings(list) {
            if achievements.contains(&sibling) {
                return Some(sibling);
            }
            if tree.kind(sibling).is_heading() {
                break;
            }
            if tree.kind(sibling).is_list() {
                if let Some(owner) = last_achievement_in(tree, sibling, achievements) {
                    return Some(owner);
                }
            }
        }
        // 3. the list sits directly inside an achievement
        if let Some(owner) = tree.parent(list).filter(|p| achievements.contains(p)) {
            return Some(owner);
        }
    }

    // 4. an achievement nested in a preceding structural block
    let mut current = match list {
        Some(list) => tree.parent(list)?,
        None => parent,
    };
    while current != tree.root() {
        for sibling in tree.preceding_siblings(current) {
            if tree.kind(sibling).is_heading() {
                return None;
            }
            if achievements.contains(&sibling) {
                return Some(sibling);
            }
            if let Some(owner) = last_achievement_in(tree, sibling, achievements) {
                return Some(owner);
            }
        }
        current = tree.parent(current)?;
    }
    None
}

fn last_achievement_in<T: MarkupTree + ?Sized>(
    tree: &T,
    node: NodeId,
    achievements: &HashSet<NodeId>,
) -> Option<NodeId> {
    tree.descendants(node)
        .into_iter()
        .filter(|d| achievements.contains(d))
        .last()
}

fn is_item<T: MarkupTree + ?Sized>(tree: &T, id: NodeId) -> bool {
    matches!(tree.kind(id), NodeKind::ListItem)
}

/// Text of a list item without its nested lists.
fn own_text<T: MarkupTree + ?Sized>(tree: &T, item: NodeId) -> String {
    let mut out = String::new();
    for &child in tree.children(item) {
        if !tree.kind(child).is_list() {
            tree.collect_text(child, &mut out);
            out.push(' ');
        }
    }
    out
}

/// Text nodes of a block's own inline content, in document order.
fn inline_text_nodes<T: MarkupTree + ?Sized>(tree: &T, block: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = tree.children(block).iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        match tree.kind(id) {
            NodeKind::Text(_) => out.push(id),
            kind if kind.is_block() => {}
            _ => stack.extend(tree.children(id).iter().rev().copied()),
        }
    }
    out
}

fn merge_adjacent_text<T: MarkupTreeMut + ?Sized>(tree: &mut T, parent: NodeId) {
    let mut previous: Option<(NodeId, String)> = None;
    for child in tree.children(parent).to_vec() {
        let NodeKind::Text(text) = tree.kind(child) else {
            previous = None;
            continue;
        };
        let text = text.clone();
        match previous.take() {
            Some((prev, prev_text)) => {
                let merged = format!("{prev_text}{text}");
                tree.set_text(prev, merged.clone());
                tree.detach(child);
                previous = Some((prev, merged));
            }
            None => previous = Some((child, text)),
        }
    }
}

fn detach_with_blank_runs<T: MarkupTreeMut + ?Sized>(tree: &mut T, id: NodeId, block: NodeId) {
    let mut current = tree.parent(id);
    tree.detach(id);
    while let Some(node) = current {
        if node == block || !tree.kind(node).is_run() || !tree.is_blank(node) {
            break;
        }
        current = tree.parent(node);
        tree.detach(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DocTree;

    fn repairer() -> HierarchyRepair {
        HierarchyRepair::new(&RepairConfig::default()).unwrap()
    }

    fn item(tree: &mut DocTree, list: NodeId, text: &str) -> NodeId {
        let li = tree.element(list, NodeKind::ListItem);
        tree.text(li, text);
        li
    }

    #[test]
    fn test_flat_list_nests_under_preceding_achievement() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        let a1 = item(&mut tree, list, "Conquista: A1");
        let s1 = item(&mut tree, list, "Mini-desafio: S1");
        let a2 = item(&mut tree, list, "Conquista: A2");

        let report = repairer().repair(&mut tree);
        assert_eq!(report.attached, 1);
        assert_eq!(report.achievements, 2);
        let sub_list = tree.parent(s1).unwrap();
        assert!(tree.has_class(sub_list, "mini-challenges-list"));
        assert_eq!(tree.parent(sub_list), Some(a1));
        assert!(tree.has_class(a1, "has-mini-challenge"));
        assert!(!tree.has_class(a2, "has-mini-challenge"));
        assert_eq!(tree.children(a2).len(), 1);
        assert_eq!(tree.children(list), &[a1, a2]);
    }

    #[test]
    fn test_preceding_list_and_emptied_list_removed() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let first = tree.element(root, NodeKind::List { ordered: false });
        item(&mut tree, first, "Conquista: A0");
        let a1 = item(&mut tree, first, "Conquista: A1");
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "texto entre listas");
        let second = tree.element(root, NodeKind::List { ordered: false });
        let s1 = item(&mut tree, second, "↳ Mini-desafio: S1");

        let report = repairer().repair(&mut tree);
        assert_eq!(report.attached, 1);
        assert_eq!(tree.parent(tree.parent(s1).unwrap()), Some(a1));
        assert!(!tree.is_ancestor_of(root, second));
    }

    #[test]
    fn test_heading_stops_search_and_item_is_flagged() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let first = tree.element(root, NodeKind::List { ordered: false });
        item(&mut tree, first, "Conquista: A1");
        let h = tree.element(root, NodeKind::Heading(2));
        tree.text(h, "Parte 2");
        let second = tree.element(root, NodeKind::List { ordered: false });
        let s1 = item(&mut tree, second, "Mini-desafio: órfão");

        let report = repairer().repair(&mut tree);
        assert_eq!(report.unattached, 1);
        assert_eq!(tree.parent(s1), Some(second));
        assert!(tree.has_class(s1, "mini-challenge-unattached"));
    }

    #[test]
    fn test_nested_under_achievement_moves_into_sub_list() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        let a1 = item(&mut tree, list, "Conquista: A1");
        let inner = tree.element(a1, NodeKind::List { ordered: false });
        let s1 = item(&mut tree, inner, "Mini-desafio: S1");

        repairer().repair(&mut tree);
        let sub_list = tree.parent(s1).unwrap();
        assert!(tree.has_class(sub_list, "mini-challenges-list"));
        assert_eq!(tree.parent(sub_list), Some(a1));
        assert!(!tree.is_ancestor_of(root, inner));
    }

    #[test]
    fn test_repeated_arrows_collapse() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        item(&mut tree, list, "Conquista: A1");
        item(&mut tree, list, "↳ ↳ Mini-desafio: X");
        let li = item(&mut tree, list, "↳ ");
        let em = tree.element(li, NodeKind::Emphasis);
        tree.text(em, "↳ Mini-desafio: Y");

        let report = repairer().repair(&mut tree);
        assert_eq!(report.duplicate_markers_collapsed, 2);
        let html = tree.to_html();
        assert!(!html.contains("↳ ↳"));
        assert!(html.contains("↳ Mini-desafio: X"));
        assert!(html.contains("<em> Mini-desafio: Y</em>"));
    }

    #[test]
    fn test_nested_marker_of_same_kind_is_unwrapped() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        let li = tree.element(list, NodeKind::ListItem);
        let outer = tree.element(li, NodeKind::Emphasis);
        tree.text(outer, "↳ ");
        let inner = tree.element(outer, NodeKind::Emphasis);
        tree.text(inner, "↳");
        tree.text(outer, " Mini-desafio: Z");

        repairer().repair(&mut tree);
        assert_eq!(tree.children(outer).len(), 1);
        assert_eq!(tree.text_content(outer), "↳ Mini-desafio: Z");
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        item(&mut tree, list, "Conquista: A1");
        item(&mut tree, list, "↳ ↳ Mini-desafio: S1");
        item(&mut tree, list, "Mini-desafio: S2");

        let repair = repairer();
        repair.repair(&mut tree);
        let first = tree.to_html();
        let report = repair.repair(&mut tree);
        assert_eq!(tree.to_html(), first);
        assert_eq!(report.attached, 0);
        assert_eq!(report.already_nested, 2);
    }
}
