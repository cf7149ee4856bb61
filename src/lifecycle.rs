//! Lifecycle plan.
//!
//! A `ComponentPlan` is the compiled, serializable form of a component: the
//! scheduled derived pass, every host node to create in document order, every
//! binding with its dependency set, event subscriptions, handler bodies and
//! nested instances. The JS emitter and the Rust runtime both consume it.

use crate::expression::{parse_expression, Expr, Stmt};
use crate::graph::{DeclarationModel, DependencyGraph};
use crate::schedule::schedule;
use crate::scope::{ComponentScope, HandlerTarget};
use crate::validate::{
    validate_component, AttributeValue, ComponentIR, ComponentNode, CompileError, ElementNode,
    ExpressionNode, PropValueIR, TextNode, MODULE_GLOBALS, RESERVED_NAMES,
};
use crate::visitor::{nested_components, walk_element, TemplateVisitor};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

lazy_static! {
    static ref NON_IDENT_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_$]").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAN TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPlan {
    pub name: String,
    pub states: Vec<StatePlan>,
    /// Derived declarations in scheduled order.
    pub derived: Vec<DerivedStep>,
    /// Host nodes in document order.
    pub nodes: Vec<NodePlan>,
    pub bindings: Vec<BindingPlan>,
    pub events: Vec<EventPlan>,
    pub handlers: Vec<HandlerPlan>,
    pub children: Vec<ChildPlan>,
    /// Every node and nested instance in document order.
    pub placements: Vec<Placement>,
    pub props: Vec<String>,
    pub callbacks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePlan {
    pub name: String,
    pub init: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStep {
    pub name: String,
    pub body: Expr,
    pub dependencies: Vec<String>,
    /// False when no dependency can change after mount.
    pub reactive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlan {
    /// Variable name in the emitted module.
    pub var: String,
    pub kind: NodeKind,
    /// Parent node; `None` for nodes appended to the mount container.
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeKind {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text {
        value: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingPlan {
    pub node: usize,
    pub target: BindingTarget,
    pub expr: Expr,
    pub dependencies: Vec<String>,
    pub reactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BindingTarget {
    Text,
    Attribute { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPlan {
    pub node: usize,
    pub event: String,
    pub handler: HandlerRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HandlerRef {
    /// Index into `ComponentPlan::handlers`.
    Local { index: usize },
    /// A callback prop received from the parent.
    Callback { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerPlan {
    pub name: String,
    /// Lowered body followed by a single `RequestUpdate` of `mutates`.
    pub body: Vec<Stmt>,
    pub mutates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildPlan {
    pub var: String,
    pub component: String,
    pub parent: Option<usize>,
    pub props: Vec<ChildProp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildProp {
    pub name: String,
    pub value: ChildPropValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChildPropValue {
    Expression {
        expr: Expr,
        dependencies: Vec<String>,
        reactive: bool,
    },
    Callback {
        handler: HandlerRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Placement {
    Node { index: usize },
    Child { index: usize },
}

impl ComponentPlan {
    /// Prop names the component accepts from a parent: value props, then callbacks.
    pub fn exported(&self) -> Vec<String> {
        self.props.iter().chain(self.callbacks.iter()).cloned().collect()
    }

    pub fn handler_index(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name == name)
    }

    /// Placements appended directly to the mount container.
    pub fn roots(&self) -> impl Iterator<Item = Placement> + '_ {
        self.placements.iter().copied().filter(|p| match *p {
            Placement::Node { index } => self.nodes[index].parent.is_none(),
            Placement::Child { index } => self.children[index].parent.is_none(),
        })
    }
}

impl ChildPropValue {
    pub fn dependencies(&self) -> &[String] {
        match self {
            ChildPropValue::Expression { dependencies, .. } => dependencies,
            ChildPropValue::Callback { .. } => &[],
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAN BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the lifecycle plan of one component.
pub fn plan_component(ir: &ComponentIR) -> Result<ComponentPlan, CompileError> {
    validate_component(ir)?;

    let scope = ComponentScope::new(ir);
    let model = DeclarationModel::build(ir, &scope)?;
    tracing::debug!(
        component = %ir.name,
        states = model.states.len(),
        derived = model.derived.len(),
        handlers = model.handlers.len(),
        "built declaration model"
    );
    let order = schedule(&model)?;

    let mut builder = TemplateBuilder {
        scope: &scope,
        model: &model,
        counter: 1,
        taken: declared_names(ir),
        parent: None,
        nodes: Vec::new(),
        bindings: Vec::new(),
        events: Vec::new(),
        children: Vec::new(),
        placements: Vec::new(),
        error: None,
    };
    builder.visit_root(ir);
    if let Some(err) = builder.error {
        return Err(err);
    }

    let mut binding_deps: Vec<Vec<String>> =
        builder.bindings.iter().map(|b| b.dependencies.clone()).collect();
    for child in &builder.children {
        for prop in &child.props {
            binding_deps.push(prop.value.dependencies().to_vec());
        }
    }
    let graph = DependencyGraph::build(&model, &binding_deps);
    let volatile = graph.volatile_names(&model);
    let is_reactive = |deps: &[String]| deps.iter().any(|d| volatile.contains(d));

    let derived = order
        .iter()
        .map(|&i| {
            let decl = &model.derived[i];
            DerivedStep {
                name: decl.name.clone(),
                body: decl.body.clone(),
                dependencies: decl.dependencies.clone(),
                reactive: volatile.contains(&decl.name),
            }
        })
        .collect();

    let mut bindings = builder.bindings;
    for binding in &mut bindings {
        binding.reactive = is_reactive(&binding.dependencies);
    }
    let mut children = builder.children;
    for child in &mut children {
        for prop in &mut child.props {
            if let ChildPropValue::Expression {
                dependencies,
                reactive,
                ..
            } = &mut prop.value
            {
                *reactive = is_reactive(dependencies);
            }
        }
    }

    let handlers = model
        .handlers
        .iter()
        .map(|h| {
            let mut body = h.body.clone();
            if !h.mutates.is_empty() {
                body.push(Stmt::RequestUpdate {
                    names: h.mutates.clone(),
                });
            }
            HandlerPlan {
                name: h.name.clone(),
                body,
                mutates: h.mutates.clone(),
            }
        })
        .collect();

    let plan = ComponentPlan {
        name: ir.name.clone(),
        states: model
            .states
            .iter()
            .map(|s| StatePlan {
                name: s.name.clone(),
                init: s.init.clone(),
            })
            .collect(),
        derived,
        nodes: builder.nodes,
        bindings,
        events: builder.events,
        handlers,
        children,
        placements: builder.placements,
        props: ir.props.clone(),
        callbacks: ir.callbacks.clone(),
    };
    tracing::debug!(
        component = %plan.name,
        nodes = plan.nodes.len(),
        bindings = plan.bindings.len(),
        children = plan.children.len(),
        "planned lifecycle"
    );
    Ok(plan)
}

/// Names the emitted module already binds before any node variable.
fn declared_names(ir: &ComponentIR) -> HashSet<String> {
    ir.states
        .iter()
        .map(|s| s.name.clone())
        .chain(ir.derived.iter().map(|d| d.name.clone()))
        .chain(ir.handlers.iter().map(|h| h.name.clone()))
        .chain(ir.callbacks.iter().cloned())
        .chain(nested_components(ir))
        .chain(RESERVED_NAMES.iter().map(|n| n.to_string()))
        .chain(MODULE_GLOBALS.iter().map(|n| n.to_string()))
        .collect()
}

struct TemplateBuilder<'a> {
    scope: &'a ComponentScope,
    model: &'a DeclarationModel,
    counter: usize,
    /// Identifiers already in module scope.
    taken: HashSet<String>,
    parent: Option<usize>,
    nodes: Vec<NodePlan>,
    bindings: Vec<BindingPlan>,
    events: Vec<EventPlan>,
    children: Vec<ChildPlan>,
    placements: Vec<Placement>,
    error: Option<CompileError>,
}

impl<'a> TemplateBuilder<'a> {
    fn next_var(&mut self, prefix: &str) -> String {
        let base = NON_IDENT_CHARS.replace_all(prefix, "_").to_lowercase();
        loop {
            let var = format!("{}_{}", base, self.counter);
            self.counter += 1;
            if self.taken.insert(var.clone()) {
                return var;
            }
        }
    }

    fn push_node(&mut self, var: String, kind: NodeKind) -> usize {
        let index = self.nodes.len();
        self.nodes.push(NodePlan {
            var,
            kind,
            parent: self.parent,
        });
        self.placements.push(Placement::Node { index });
        index
    }

    fn bind(&mut self, node: usize, target: BindingTarget, code: &str, origin: &str) -> Result<(), CompileError> {
        let expr = parse_expression(code, origin)?;
        let dependencies = self.scope.dependencies(&expr, origin)?;
        self.bindings.push(BindingPlan {
            node,
            target,
            expr,
            dependencies,
            reactive: false,
        });
        Ok(())
    }

    fn handler_ref(&self, name: &str, origin: &str) -> Result<HandlerRef, CompileError> {
        match self.scope.resolve_handler(name, origin)? {
            HandlerTarget::Local(name) => {
                let index = self
                    .model
                    .handlers
                    .iter()
                    .position(|h| h.name == name)
                    .ok_or_else(|| CompileError::UnresolvedReference {
                        name: name.clone(),
                        declaration: origin.to_string(),
                    })?;
                Ok(HandlerRef::Local { index })
            }
            HandlerTarget::Callback(name) => Ok(HandlerRef::Callback { name }),
        }
    }

    fn element(&mut self, element: &ElementNode) -> Result<usize, CompileError> {
        let var = self.next_var(&element.tag);
        let attributes = element
            .attributes
            .iter()
            .filter_map(|a| match &a.value {
                AttributeValue::Static(v) => Some((a.name.clone(), v.clone())),
                AttributeValue::Dynamic(_) => None,
            })
            .collect();
        let index = self.push_node(
            var,
            NodeKind::Element {
                tag: element.tag.clone(),
                attributes,
            },
        );

        for attr in &element.attributes {
            if let AttributeValue::Dynamic(dynamic) = &attr.value {
                let origin = format!("attribute '{}' of <{}>", attr.name, element.tag);
                self.bind(
                    index,
                    BindingTarget::Attribute {
                        name: attr.name.clone(),
                    },
                    &dynamic.code,
                    &origin,
                )?;
            }
        }
        for event in &element.events {
            let origin = format!("'{}' event of <{}>", event.event, element.tag);
            let handler = self.handler_ref(&event.handler, &origin)?;
            self.events.push(EventPlan {
                node: index,
                event: event.event.clone(),
                handler,
            });
        }
        Ok(index)
    }

    fn child(&mut self, component: &ComponentNode) -> Result<(), CompileError> {
        let var = self.next_var(&component.name);
        let mut props = Vec::with_capacity(component.props.len());
        for prop in &component.props {
            let origin = format!("prop '{}' of <{}>", prop.name, component.name);
            let value = match &prop.value {
                PropValueIR::Expression(code) => {
                    let expr = parse_expression(code, &origin)?;
                    let dependencies = self.scope.dependencies(&expr, &origin)?;
                    ChildPropValue::Expression {
                        expr,
                        dependencies,
                        reactive: false,
                    }
                }
                PropValueIR::Static(value) => ChildPropValue::Expression {
                    expr: Expr::Str {
                        value: value.clone(),
                    },
                    dependencies: Vec::new(),
                    reactive: false,
                },
                PropValueIR::Callback(handler) => ChildPropValue::Callback {
                    handler: self.handler_ref(handler, &origin)?,
                },
            };
            props.push(ChildProp {
                name: prop.name.clone(),
                value,
            });
        }

        let index = self.children.len();
        self.children.push(ChildPlan {
            var,
            component: component.name.clone(),
            parent: self.parent,
            props,
        });
        self.placements.push(Placement::Child { index });
        Ok(())
    }

    fn record(&mut self, result: Result<(), CompileError>) {
        if let Err(err) = result {
            if self.error.is_none() {
                self.error = Some(err);
            }
        }
    }
}

impl<'a> TemplateVisitor for TemplateBuilder<'a> {
    fn visit_element(&mut self, element: &ElementNode) {
        if self.error.is_some() {
            return;
        }
        match self.element(element) {
            Ok(index) => {
                let outer = self.parent.replace(index);
                walk_element(self, element);
                self.parent = outer;
            }
            Err(err) => self.record(Err(err)),
        }
    }

    fn visit_component(&mut self, component: &ComponentNode) {
        if self.error.is_some() {
            return;
        }
        let result = self.child(component);
        self.record(result);
    }

    fn visit_text(&mut self, text: &TextNode) {
        let var = self.next_var("txt");
        self.push_node(
            var,
            NodeKind::Text {
                value: text.value.clone(),
            },
        );
    }

    fn visit_expression(&mut self, expression: &ExpressionNode) {
        if self.error.is_some() {
            return;
        }
        let var = self.next_var("txt");
        let index = self.push_node(
            var,
            NodeKind::Text {
                value: String::new(),
            },
        );
        let result = self.bind(index, BindingTarget::Text, &expression.expression, "text binding");
        self.record(result);
    }
}
