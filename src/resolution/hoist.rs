// Copyright 2026 the spm authors. MIT license.

use super::ResolvedNode;

/// Hoists every grandchild up one level where doing so causes no name
/// conflict, deduplicating identical subtrees. One bottom-up pass in
/// insertion order; the grandchild snapshot is taken before mutation, so
/// entries hoisted into this node are only reconsidered when the parent
/// level is processed.
pub fn optimize_tree(node: &mut ResolvedNode) {
  for child in &mut node.children {
    optimize_tree(child);
  }
  let child_count = node.children.len();
  for child_index in 0..child_count {
    let grandchildren = node.children[child_index]
      .children
      .iter()
      .map(|grandchild| (grandchild.name.clone(), grandchild.reference.clone()))
      .collect::<Vec<_>>();
    for (name, reference) in grandchildren {
      let maybe_sibling = node
        .children
        .iter()
        .position(|sibling| sibling.name == name);
      match maybe_sibling {
        None => {
          if let Some(grandchild) =
            remove_child(&mut node.children[child_index], &name)
          {
            node.children.push(grandchild);
          }
        }
        Some(sibling_index)
          if node.children[sibling_index].reference == reference =>
        {
          // the sibling subsumes this copy
          remove_child(&mut node.children[child_index], &name);
        }
        Some(_) => {
          // a sibling with a different reference pins the grandchild in
          // place
        }
      }
    }
  }
}

fn remove_child(
  node: &mut ResolvedNode,
  name: &str,
) -> Option<ResolvedNode> {
  let index = node.children.iter().position(|child| child.name == name)?;
  Some(node.children.remove(index))
}
