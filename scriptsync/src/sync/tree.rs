use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Object with a lazily fetched script collection.
    Object,
    /// One script under an object.
    Leaf,
    /// Object whose content is its own definition; selected directly.
    Template,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNode {
    pub name: String,
    /// Script name to on-disk flag, filled on expand.
    pub children: BTreeMap<String, bool>,
    pub expanded: bool,
    folder_on_disk: bool,
}

impl ObjectNode {
    pub fn new(name: impl Into<String>, folder_on_disk: bool) -> Self {
        Self {
            name: name.into(),
            children: BTreeMap::new(),
            expanded: false,
            folder_on_disk,
        }
    }

    /// Before the first expand only the local folder is known; afterwards
    /// the per-script flags decide.
    pub fn has_any_on_disk(&self) -> bool {
        if self.expanded {
            self.children.values().any(|on_disk| *on_disk)
        } else {
            self.folder_on_disk
        }
    }

    pub fn leaves(&self) -> impl Iterator<Item = LeafNode> + '_ {
        self.children.iter().map(|(name, on_disk)| LeafNode {
            parent: self.name.clone(),
            name: name.clone(),
            on_disk: *on_disk,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub parent: String,
    pub name: String,
    pub on_disk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateNode {
    pub name: String,
    pub on_disk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    Object(ObjectNode),
    Leaf(LeafNode),
    Template(TemplateNode),
}

impl TreeNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::Object(_) => NodeKind::Object,
            TreeNode::Leaf(_) => NodeKind::Leaf,
            TreeNode::Template(_) => NodeKind::Template,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::Object(node) => &node.name,
            TreeNode::Leaf(node) => &node.name,
            TreeNode::Template(node) => &node.name,
        }
    }

    pub fn on_disk(&self) -> bool {
        match self {
            TreeNode::Object(node) => node.has_any_on_disk(),
            TreeNode::Leaf(node) => node.on_disk,
            TreeNode::Template(node) => node.on_disk,
        }
    }

    pub fn children(&self) -> Vec<TreeNode> {
        match self {
            TreeNode::Object(node) => node.leaves().map(TreeNode::Leaf).collect(),
            TreeNode::Leaf(_) | TreeNode::Template(_) => Vec::new(),
        }
    }

    /// Selectable leaves resolve to a fetchable reference; objects expand
    /// instead.
    pub fn leaf_ref(&self) -> Option<LeafRef> {
        match self {
            TreeNode::Object(_) => None,
            TreeNode::Leaf(node) => Some(LeafRef::script(&node.parent, &node.name)),
            TreeNode::Template(node) => Some(LeafRef::template(&node.name)),
        }
    }
}

/// Remote identity of one script or template within the active scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeafRef {
    pub parent: Option<String>,
    pub name: String,
}

impl LeafRef {
    pub fn script(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            name: name.into(),
        }
    }

    pub fn template(name: impl Into<String>) -> Self {
        Self {
            parent: None,
            name: name.into(),
        }
    }
}

/// Plain-text outline of a tree, one line per node, `*` marking nodes that
/// exist in the local mirror.
pub fn render_lines(nodes: &[TreeNode]) -> Vec<String> {
    let mut lines = Vec::new();
    for node in nodes {
        let marker = if node.on_disk() { '*' } else { ' ' };
        lines.push(format!("{marker} {}", node.name()));
        for child in node.children() {
            let marker = if child.on_disk() { '*' } else { ' ' };
            lines.push(format!("{marker}   {}", child.name()));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_on_disk_follows_folder_until_expanded() {
        let mut node = ObjectNode::new("Account Utils", true);
        assert!(node.has_any_on_disk());

        node.expanded = true;
        node.children.insert("Service_PreInvokeMethod".into(), false);
        assert!(!node.has_any_on_disk());

        node.children.insert("(declarations)".into(), true);
        assert!(node.has_any_on_disk());
    }

    #[test]
    fn kinds_switch_between_expand_and_select() {
        let mut object = ObjectNode::new("Account", false);
        object.children.insert("BusComp_PreWriteRecord".into(), true);
        let object = TreeNode::Object(object);
        assert_eq!(object.kind(), NodeKind::Object);
        assert_eq!(object.leaf_ref(), None);

        let children = object.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].kind(), NodeKind::Leaf);
        assert_eq!(
            children[0].leaf_ref(),
            Some(LeafRef::script("Account", "BusComp_PreWriteRecord"))
        );

        let template = TreeNode::Template(TemplateNode {
            name: "CCPageContainer".into(),
            on_disk: false,
        });
        assert_eq!(template.leaf_ref(), Some(LeafRef::template("CCPageContainer")));
        assert!(template.children().is_empty());
    }

    #[test]
    fn renders_markers_for_local_files() {
        let mut object = ObjectNode::new("Utils", false);
        object.expanded = true;
        object.children.insert("A".into(), true);
        object.children.insert("B".into(), false);
        let lines = render_lines(&[TreeNode::Object(object)]);
        assert_eq!(lines, vec!["* Utils", "*   A", "    B"]);
    }
}
