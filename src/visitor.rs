use crate::validate::{ComponentIR, ComponentNode, ElementNode, ExpressionNode, TemplateNode, TextNode};

/// The TemplateVisitor trait defines the single traversal mechanism for component templates.
///
/// Rules:
/// 1. Traversal is in document order: an element is visited before its children.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call `walk_*` functions to continue traversal unless pruning is intended.
pub trait TemplateVisitor {
    fn visit_root(&mut self, root: &ComponentIR) {
        walk_root(self, root);
    }

    fn visit_node(&mut self, node: &TemplateNode) {
        walk_node(self, node);
    }

    fn visit_element(&mut self, element: &ElementNode) {
        walk_element(self, element);
    }

    fn visit_component(&mut self, _component: &ComponentNode) {
        // Nested components own their own template
    }

    fn visit_text(&mut self, _text: &TextNode) {
        // Leaf node, nothing to walk by default
    }

    fn visit_expression(&mut self, _expression: &ExpressionNode) {
        // Leaf node, nothing to walk by default
    }

    fn visit_children(&mut self, children: &[TemplateNode]) {
        walk_children(self, children);
    }
}

pub fn walk_root<V: TemplateVisitor + ?Sized>(visitor: &mut V, root: &ComponentIR) {
    visitor.visit_children(&root.nodes);
}

pub fn walk_children<V: TemplateVisitor + ?Sized>(visitor: &mut V, children: &[TemplateNode]) {
    for node in children {
        visitor.visit_node(node);
    }
}

pub fn walk_node<V: TemplateVisitor + ?Sized>(visitor: &mut V, node: &TemplateNode) {
    match node {
        TemplateNode::Element(el) => visitor.visit_element(el),
        TemplateNode::Component(c) => visitor.visit_component(c),
        TemplateNode::Text(t) => visitor.visit_text(t),
        TemplateNode::Expression(e) => visitor.visit_expression(e),
    }
}

pub fn walk_element<V: TemplateVisitor + ?Sized>(visitor: &mut V, element: &ElementNode) {
    visitor.visit_children(&element.children);
}

/// Names of the components a template instantiates, in document order.
pub fn nested_components(root: &ComponentIR) -> Vec<String> {
    struct Collector(Vec<String>);

    impl TemplateVisitor for Collector {
        fn visit_component(&mut self, component: &ComponentNode) {
            self.0.push(component.name.clone());
        }
    }

    let mut collector = Collector(Vec::new());
    collector.visit_root(root);
    collector.0
}
