use std::collections::HashMap;

use crate::server::{SurfaceId, ToplevelId};

pub type NodeId = u64;

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// Grouping node. `owner` is set only on the root tree of a toplevel.
    Tree { owner: Option<ToplevelId> },
    Surface { surface: SurfaceId, width: i32, height: i32 },
    Rect { width: i32, height: i32, color: u32 },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// Bottom to top.
    pub children: Vec<NodeId>,
    pub x: i32,
    pub y: i32,
    pub enabled: bool,
}

/// A node that produces pixels, in layout coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct PaintItem {
    pub node: NodeId,
    pub x: i32,
    pub y: i32,
    pub kind: NodeKind,
}

/// Retained scene graph. Positions are relative to the parent node; a
/// disabled node hides its whole subtree from painting and hit testing.
pub struct Scene {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: NodeId,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            0,
            Node {
                kind: NodeKind::Tree { owner: None },
                parent: None,
                children: Vec::new(),
                x: 0,
                y: 0,
                enabled: true,
            },
        );
        Self { nodes, root: 0, next_id: 1 }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn insert(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let parent = if self.nodes.contains_key(&parent) {
            parent
        } else {
            log::warn!("[scene] Parent node {} missing, attaching to root", parent);
            self.root
        };

        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                parent: Some(parent),
                children: Vec::new(),
                x: 0,
                y: 0,
                enabled: true,
            },
        );
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    pub fn create_tree(&mut self, parent: NodeId, owner: Option<ToplevelId>) -> NodeId {
        self.insert(parent, NodeKind::Tree { owner })
    }

    pub fn create_surface(&mut self, parent: NodeId, surface: SurfaceId) -> NodeId {
        self.insert(parent, NodeKind::Surface { surface, width: 0, height: 0 })
    }

    pub fn create_rect(&mut self, parent: NodeId, width: i32, height: i32, color: u32) -> NodeId {
        self.insert(parent, NodeKind::Rect { width, height, color })
    }

    pub fn set_position(&mut self, id: NodeId, x: i32, y: i32) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.x = x;
            node.y = y;
        }
    }

    pub fn position(&self, id: NodeId) -> (i32, i32) {
        self.nodes.get(&id).map(|n| (n.x, n.y)).unwrap_or((0, 0))
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.enabled = enabled;
        }
    }

    pub fn set_rect_size(&mut self, id: NodeId, w: i32, h: i32) {
        if let Some(Node { kind: NodeKind::Rect { width, height, .. }, .. }) = self.nodes.get_mut(&id) {
            *width = w;
            *height = h;
        }
    }

    pub fn rect_size(&self, id: NodeId) -> Option<(i32, i32)> {
        match self.nodes.get(&id)?.kind {
            NodeKind::Rect { width, height, .. } => Some((width, height)),
            _ => None,
        }
    }

    pub fn set_surface_size(&mut self, id: NodeId, w: i32, h: i32) {
        if let Some(Node { kind: NodeKind::Surface { width, height, .. }, .. }) = self.nodes.get_mut(&id) {
            *width = w;
            *height = h;
        }
    }

    /// Moves the node above all of its siblings.
    pub fn raise_to_top(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != id);
            p.children.push(id);
        }
    }

    /// Destroys the node and its subtree. Unknown ids are ignored.
    pub fn destroy(&mut self, id: NodeId) {
        if id == self.root {
            let children = self
                .nodes
                .get_mut(&id)
                .map(|n| std::mem::take(&mut n.children))
                .unwrap_or_default();
            for child in children {
                self.destroy_subtree(child);
            }
            return;
        }

        let Some(parent) = self.nodes.get(&id).map(|n| n.parent) else {
            return;
        };
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| *c != id);
        }
        self.destroy_subtree(id);
    }

    fn destroy_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.destroy_subtree(child);
            }
        }
    }

    /// Layout coordinates of the node, or `None` if it does not exist.
    pub fn coords(&self, id: NodeId) -> Option<(i32, i32)> {
        let mut node = self.nodes.get(&id)?;
        let (mut x, mut y) = (node.x, node.y);
        while let Some(parent) = node.parent.and_then(|p| self.nodes.get(&p)) {
            x = x.saturating_add(parent.x);
            y = y.saturating_add(parent.y);
            node = parent;
        }
        Some((x, y))
    }

    /// Whether the node and all of its ancestors are enabled.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|c| self.nodes.get(&c)) {
            if !node.enabled {
                return false;
            }
            current = node.parent;
        }
        current.is_none()
    }

    /// Topmost surface or rect node under the layout point, with the point in
    /// node-local coordinates.
    pub fn node_at(&self, lx: f64, ly: f64) -> Option<(NodeId, f64, f64)> {
        self.node_at_inner(self.root, 0, 0, lx, ly)
    }

    fn node_at_inner(&self, id: NodeId, ox: i32, oy: i32, lx: f64, ly: f64) -> Option<(NodeId, f64, f64)> {
        let node = self.nodes.get(&id)?;
        if !node.enabled {
            return None;
        }
        let nx = ox.saturating_add(node.x);
        let ny = oy.saturating_add(node.y);

        for child in node.children.iter().rev() {
            if let Some(hit) = self.node_at_inner(*child, nx, ny, lx, ly) {
                return Some(hit);
            }
        }

        let (w, h) = match node.kind {
            NodeKind::Surface { width, height, .. } => (width, height),
            NodeKind::Rect { width, height, .. } => (width, height),
            NodeKind::Tree { .. } => return None,
        };
        let rx = lx - nx as f64;
        let ry = ly - ny as f64;
        if rx >= 0.0 && ry >= 0.0 && rx < w as f64 && ry < h as f64 {
            Some((id, rx, ry))
        } else {
            None
        }
    }

    /// Nearest ancestor tree carrying an owner, starting from the parent.
    pub fn owner_of(&self, id: NodeId) -> Option<ToplevelId> {
        let mut current = self.nodes.get(&id)?.parent;
        while let Some(node) = current.and_then(|c| self.nodes.get(&c)) {
            if let NodeKind::Tree { owner: Some(owner) } = node.kind {
                return Some(owner);
            }
            current = node.parent;
        }
        None
    }

    /// Visible drawable nodes, bottom to top.
    pub fn paint_order(&self) -> Vec<PaintItem> {
        let mut items = Vec::new();
        self.collect_paint(self.root, 0, 0, &mut items);
        items
    }

    fn collect_paint(&self, id: NodeId, ox: i32, oy: i32, items: &mut Vec<PaintItem>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if !node.enabled {
            return;
        }
        let nx = ox.saturating_add(node.x);
        let ny = oy.saturating_add(node.y);
        if !matches!(node.kind, NodeKind::Tree { .. }) {
            items.push(PaintItem { node: id, x: nx, y: ny, kind: node.kind.clone() });
        }
        for child in &node.children {
            self.collect_paint(*child, nx, ny, items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_with_size(scene: &mut Scene, parent: NodeId, surface: SurfaceId, w: i32, h: i32) -> NodeId {
        let node = scene.create_surface(parent, surface);
        scene.set_surface_size(node, w, h);
        node
    }

    #[test]
    fn test_node_at_prefers_topmost() {
        let mut scene = Scene::new();
        let root = scene.root();
        let a = scene.create_tree(root, Some(1));
        let b = scene.create_tree(root, Some(2));
        let sa = surface_with_size(&mut scene, a, 10, 100, 100);
        let sb = surface_with_size(&mut scene, b, 20, 100, 100);
        scene.set_position(b, 50, 50);

        let (hit, sx, sy) = scene.node_at(60.0, 70.0).unwrap();
        assert_eq!(hit, sb);
        assert_eq!((sx, sy), (10.0, 20.0));

        scene.raise_to_top(a);
        assert_eq!(scene.node_at(60.0, 70.0).unwrap().0, sa);
        assert_eq!(scene.children(root).last(), Some(&a));
    }

    #[test]
    fn test_node_at_skips_disabled_subtrees() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, Some(1));
        surface_with_size(&mut scene, tree, 10, 20, 20);
        scene.set_enabled(tree, false);
        assert!(scene.node_at(5.0, 5.0).is_none());
        assert!(scene.paint_order().is_empty());
    }

    #[test]
    fn test_rect_is_hit_but_has_no_owner_surface() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, Some(7));
        let rect = scene.create_rect(tree, 10, 2, 0xFFFFA500);
        scene.set_position(rect, 0, -2);
        let (hit, _, _) = scene.node_at(3.0, -1.0).unwrap();
        assert_eq!(hit, rect);
        assert_eq!(scene.owner_of(rect), Some(7));
    }

    #[test]
    fn test_owner_walks_through_unowned_trees() {
        let mut scene = Scene::new();
        let root = scene.root();
        let toplevel = scene.create_tree(root, Some(3));
        let popup = scene.create_tree(toplevel, None);
        let nested = scene.create_tree(popup, None);
        let surface = surface_with_size(&mut scene, nested, 9, 10, 10);
        assert_eq!(scene.owner_of(surface), Some(3));

        let orphan = scene.create_tree(root, None);
        let lone = scene.create_surface(orphan, 4);
        assert_eq!(scene.owner_of(lone), None);
    }

    #[test]
    fn test_coords_accumulate_parents() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, None);
        scene.set_position(tree, 100, 50);
        let child = scene.create_tree(tree, None);
        scene.set_position(child, -5, 7);
        assert_eq!(scene.coords(child), Some((95, 57)));
        assert_eq!(scene.coords(999), None);
    }

    #[test]
    fn test_destroy_removes_subtree_and_tolerates_unknown() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, None);
        let child = scene.create_surface(tree, 1);
        scene.destroy(tree);
        assert!(scene.node(tree).is_none());
        assert!(scene.node(child).is_none());
        assert!(scene.children(root).is_empty());
        scene.destroy(tree);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn test_destroy_root_clears_everything() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, None);
        scene.create_rect(tree, 1, 1, 0);
        scene.destroy(root);
        assert_eq!(scene.len(), 1);
        assert!(scene.children(root).is_empty());
    }

    #[test]
    fn test_paint_order_is_bottom_to_top() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, None);
        scene.set_position(tree, 10, 10);
        let surface = surface_with_size(&mut scene, tree, 1, 5, 5);
        let rect = scene.create_rect(tree, 5, 2, 0xFF000000);
        scene.set_position(rect, 0, -2);

        let items = scene.paint_order();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].node, surface);
        assert_eq!((items[1].x, items[1].y), (10, 8));
    }

    #[test]
    fn test_visibility_follows_ancestors() {
        let mut scene = Scene::new();
        let root = scene.root();
        let tree = scene.create_tree(root, None);
        let child = scene.create_surface(tree, 1);
        assert!(scene.is_visible(child));
        scene.set_enabled(tree, false);
        assert!(!scene.is_visible(child));
        assert!(!scene.is_visible(12345));
    }
}
