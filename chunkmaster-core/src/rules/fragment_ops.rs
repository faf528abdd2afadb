// Editing helpers for the small scratch trees built from part spans,
// route descriptions and pitfall items.

use super::labels::LabelSet;
use crate::tree::{DocTree, FragmentNode, MarkupFragment, MarkupTree, MarkupTreeMut, NodeId, NodeKind};

/// Root-level nodes of a scratch tree as an owned fragment.
pub fn root_fragment(tree: &DocTree) -> MarkupFragment {
    tree.to_fragment(tree.children(tree.root()))
}

/// Remove separator artifacts left at the edges of a scratch tree: blank
/// root-level nodes, leading/trailing rules, and a leading colon or dash in
/// the first text.
pub fn tidy(tree: &mut DocTree) {
    let root = tree.root();
    for child in tree.children(root).to_vec() {
        if !matches!(tree.kind(child), NodeKind::Rule) && tree.is_blank(child) {
            tree.detach(child);
        }
    }
    while let Some(&first) = tree.children(root).first() {
        if matches!(tree.kind(first), NodeKind::Rule) {
            tree.detach(first);
        } else {
            break;
        }
    }
    while let Some(&last) = tree.children(root).last() {
        if matches!(tree.kind(last), NodeKind::Rule) {
            tree.detach(last);
        } else {
            break;
        }
    }
    strip_leading_separator(tree);
}

fn strip_leading_separator(tree: &mut DocTree) {
    let root = tree.root();
    let first_text = tree.descendants(root).into_iter().find(|&id| {
        matches!(tree.kind(id), NodeKind::Text(text) if !text.trim().is_empty())
    });
    let Some(id) = first_text else {
        return;
    };
    let NodeKind::Text(text) = tree.kind(id) else {
        return;
    };
    let original = text.clone();
    let stripped = original
        .trim_start()
        .trim_start_matches([':', '-', '–', '—'])
        .trim_start()
        .to_string();
    if stripped.is_empty() {
        detach_with_blank_ancestors(tree, id);
        strip_leading_separator(tree);
    } else if stripped != original {
        tree.set_text(id, stripped);
    }
}

/// Detach a node, then any ancestors left blank by the removal, stopping
/// below the root.
pub fn detach_with_blank_ancestors(tree: &mut DocTree, id: NodeId) {
    let mut current = tree.parent(id);
    tree.detach(id);
    while let Some(node) = current {
        if node == tree.root() || !tree.is_blank(node) {
            break;
        }
        current = tree.parent(node);
        tree.detach(node);
    }
}

/// Cut the first occurrence of any label out of the text nodes of a
/// scratch tree. Returns true when something was removed.
pub fn remove_label_text(tree: &mut DocTree, labels: &LabelSet) -> bool {
    let root = tree.root();
    for id in tree.descendants(root) {
        let NodeKind::Text(text) = tree.kind(id) else {
            continue;
        };
        let Some((_, (start, end))) = labels.find(text) else {
            continue;
        };
        let remaining = format!("{}{}", &text[..start], &text[end..]);
        if remaining.trim().is_empty() {
            detach_with_blank_ancestors(tree, id);
        } else {
            tree.set_text(id, remaining);
        }
        return true;
    }
    false
}

/// Split the given subtrees at the first occurrence of a label, returning
/// the content before and after it (the label itself is dropped).
pub fn split_at_label(
    tree: &dyn MarkupTree,
    roots: &[NodeId],
    labels: &LabelSet,
) -> Option<(MarkupFragment, MarkupFragment)> {
    let (target, start, end) = roots.iter().find_map(|&root| {
        std::iter::once(root)
            .chain(tree.descendants(root))
            .find_map(|id| match tree.kind(id) {
                NodeKind::Text(text) => labels.find(text).map(|(_, (s, e))| (id, s, e)),
                _ => None,
            })
    })?;

    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut passed = false;
    for &root in roots {
        if root == target || tree.is_ancestor_of(root, target) {
            let (b, a) = split_node(tree, root, target, start, end);
            before.extend(b);
            after.extend(a);
            passed = true;
        } else if passed {
            after.push(tree.clone_subtree(root));
        } else {
            before.push(tree.clone_subtree(root));
        }
    }
    Some((MarkupFragment::new(before), MarkupFragment::new(after)))
}

fn split_node(
    tree: &dyn MarkupTree,
    id: NodeId,
    target: NodeId,
    start: usize,
    end: usize,
) -> (Option<FragmentNode>, Option<FragmentNode>) {
    if id == target {
        let NodeKind::Text(text) = tree.kind(id) else {
            return (None, None);
        };
        let piece = |s: &str| (!s.trim().is_empty()).then(|| FragmentNode::text(s));
        return (piece(&text[..start]), piece(&text[end..]));
    }
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut passed = false;
    for &child in tree.children(id) {
        if child == target || tree.is_ancestor_of(child, target) {
            let (b, a) = split_node(tree, child, target, start, end);
            before.extend(b);
            after.extend(a);
            passed = true;
        } else if passed {
            after.push(tree.clone_subtree(child));
        } else {
            before.push(tree.clone_subtree(child));
        }
    }
    let shell = |children: Vec<FragmentNode>| {
        (!children.is_empty()).then(|| FragmentNode {
            kind: tree.kind(id).clone(),
            classes: tree.classes(id).to_vec(),
            children,
        })
    };
    (shell(before), shell(after))
}

/// Rebuild a fragment, drop a label from it and tidy the edges.
pub fn strip_label(fragment: &MarkupFragment, labels: &LabelSet) -> MarkupFragment {
    let mut tree = DocTree::from_fragment(fragment);
    remove_label_text(&mut tree, labels);
    tidy(&mut tree);
    root_fragment(&tree)
}

/// Tidy the edges of a fragment.
pub fn tidy_fragment(fragment: &MarkupFragment) -> MarkupFragment {
    let mut tree = DocTree::from_fragment(fragment);
    tidy(&mut tree);
    root_fragment(&tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelSpec;

    fn pitfall_item() -> (DocTree, NodeId) {
        let mut tree = DocTree::new();
        let root = tree.root();
        let li = tree.element(root, NodeKind::ListItem);
        let strong = tree.element(li, NodeKind::Strong);
        tree.text(strong, "Problema:");
        tree.text(li, " decorar sem entender. ");
        let strong = tree.element(li, NodeKind::Strong);
        tree.text(strong, "Solução:");
        tree.text(li, " explique com suas palavras.");
        (tree, li)
    }

    #[test]
    fn test_split_at_label_in_run() {
        let (tree, li) = pitfall_item();
        let labels = LabelSet::new(&[LabelSpec::any_case("Solução:")]);
        let (before, after) = split_at_label(&tree, tree.children(li), &labels).unwrap();
        assert_eq!(before.plain_text(), "Problema: decorar sem entender.");
        assert_eq!(after.plain_text(), "explique com suas palavras.");
    }

    #[test]
    fn test_strip_label_drops_empty_run() {
        let (tree, li) = pitfall_item();
        let fragment = tree.to_fragment(&tree.children(li)[..2]);
        let labels = LabelSet::new(&[LabelSpec::any_case("Problema:")]);
        let stripped = strip_label(&fragment, &labels);
        assert_eq!(stripped.nodes.len(), 1);
        assert_eq!(stripped.plain_text(), "decorar sem entender.");
    }

    #[test]
    fn test_tidy_removes_edge_rules_and_colons() {
        let mut tree = DocTree::new();
        let root = tree.root();
        tree.element(root, NodeKind::Rule);
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, ": texto");
        tree.element(root, NodeKind::Paragraph);
        tree.element(root, NodeKind::Rule);
        tidy(&mut tree);
        assert_eq!(tree.children(root), &[p]);
        assert_eq!(tree.text_content(p), "texto");
    }
}
