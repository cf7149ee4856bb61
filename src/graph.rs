//! Declaration model and dependency graph.
//!
//! Every derived declaration and binding gets a resolved dependency set (a
//! list of state or derived names). The graph maps each producer name to the
//! consumers that read it.

use crate::expression::{assigned_names, parse_expression, parse_statements, requested_names, Expr, Stmt};
use crate::scope::ComponentScope;
use crate::validate::{ComponentIR, CompileError};
use std::collections::{BTreeMap, HashMap, HashSet};

// ═══════════════════════════════════════════════════════════════════════════════
// DECLARATION MODEL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct StateDecl {
    pub name: String,
    pub init: Expr,
}

#[derive(Debug, Clone)]
pub struct DerivedDecl {
    pub name: String,
    pub body: Expr,
    /// Resolved dependency names, in order of first appearance.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HandlerDecl {
    pub name: String,
    /// Lowered statements, explicit `requestUpdate` calls removed.
    pub body: Vec<Stmt>,
    /// Every name the handler assigns or explicitly requests an update for.
    pub mutates: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeclarationModel {
    pub component: String,
    pub states: Vec<StateDecl>,
    pub derived: Vec<DerivedDecl>,
    pub handlers: Vec<HandlerDecl>,
    pub props: Vec<String>,
    pub callbacks: Vec<String>,
}

impl DeclarationModel {
    /// Lower every declaration of a component and resolve its dependencies.
    pub fn build(ir: &ComponentIR, scope: &ComponentScope) -> Result<Self, CompileError> {
        let mut states = Vec::with_capacity(ir.states.len());
        for (i, state) in ir.states.iter().enumerate() {
            let origin = format!("initializer of '{}'", state.name);
            let init = parse_expression(&state.init, &origin)?;
            // Initializers run in declaration order and may only read earlier state.
            for dep in scope.dependencies(&init, &origin)? {
                if !ir.states[..i].iter().any(|s| s.name == dep) {
                    return Err(CompileError::UnresolvedReference {
                        name: dep,
                        declaration: format!("{} of <{}>", origin, ir.name),
                    });
                }
            }
            states.push(StateDecl {
                name: state.name.clone(),
                init,
            });
        }

        let mut derived = Vec::with_capacity(ir.derived.len());
        for decl in &ir.derived {
            let origin = format!("derived '{}'", decl.name);
            let body = parse_expression(&decl.body, &origin)?;
            let inferred = scope.dependencies(&body, &origin)?;
            let dependencies = match &decl.dependencies {
                Some(explicit) => scope.annotated(explicit, &origin)?,
                None => inferred,
            };
            derived.push(DerivedDecl {
                name: decl.name.clone(),
                body,
                dependencies,
            });
        }

        let mut handlers = Vec::with_capacity(ir.handlers.len());
        for handler in &ir.handlers {
            let origin = format!("handler '{}'", handler.name);
            let lowered = parse_statements(&handler.body, &origin)?;
            scope.check_handler(&handler.name, &lowered)?;

            let mut mutates = assigned_names(&lowered);
            for name in requested_names(&lowered) {
                if !mutates.contains(&name) {
                    mutates.push(name);
                }
            }
            handlers.push(HandlerDecl {
                name: handler.name.clone(),
                body: strip_request_updates(lowered),
                mutates,
            });
        }

        Ok(Self {
            component: ir.name.clone(),
            states,
            derived,
            handlers,
            props: ir.props.clone(),
            callbacks: ir.callbacks.clone(),
        })
    }

    pub fn derived_index(&self, name: &str) -> Option<usize> {
        self.derived.iter().position(|d| d.name == name)
    }
}

fn strip_request_updates(body: Vec<Stmt>) -> Vec<Stmt> {
    body.into_iter()
        .filter_map(|stmt| match stmt {
            Stmt::RequestUpdate { .. } => None,
            Stmt::If {
                test,
                consequent,
                alternate,
            } => Some(Stmt::If {
                test,
                consequent: strip_request_updates(consequent),
                alternate: strip_request_updates(alternate),
            }),
            other => Some(other),
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPENDENCY GRAPH
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Consumer {
    /// Index into `DeclarationModel::derived`.
    Derived(usize),
    /// Index into the component's binding list.
    Binding(usize),
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<Consumer>>,
}

impl DependencyGraph {
    pub fn build(model: &DeclarationModel, bindings: &[Vec<String>]) -> Self {
        let mut edges: BTreeMap<String, Vec<Consumer>> = BTreeMap::new();
        for s in &model.states {
            edges.entry(s.name.clone()).or_default();
        }
        for (i, d) in model.derived.iter().enumerate() {
            edges.entry(d.name.clone()).or_default();
            for dep in &d.dependencies {
                edges.entry(dep.clone()).or_default().push(Consumer::Derived(i));
            }
        }
        for (i, deps) in bindings.iter().enumerate() {
            for dep in deps {
                edges.entry(dep.clone()).or_default().push(Consumer::Binding(i));
            }
        }
        Self { edges }
    }

    pub fn consumers_of(&self, producer: &str) -> &[Consumer] {
        self.edges.get(producer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names whose value can change after mount: state assigned by a
    /// handler, exported props, and everything derived from them.
    pub fn volatile_names(&self, model: &DeclarationModel) -> HashSet<String> {
        let mut volatile: HashSet<String> = HashSet::new();
        let mut queue: Vec<String> = model
            .handlers
            .iter()
            .flat_map(|h| h.mutates.iter().cloned())
            .chain(model.props.iter().cloned())
            .collect();

        while let Some(name) = queue.pop() {
            if !volatile.insert(name.clone()) {
                continue;
            }
            for consumer in self.consumers_of(&name) {
                if let Consumer::Derived(i) = consumer {
                    queue.push(model.derived[*i].name.clone());
                }
            }
        }
        volatile
    }
}

/// First dependency cycle among derived declarations, in discovery order.
///
/// The search is depth-first from each declaration in source order and follows
/// dependencies in the order they appear in the body.
pub fn find_cycle(derived: &[DerivedDecl]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        i: usize,
        derived: &[DerivedDecl],
        index: &HashMap<&str, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[i] = Mark::OnStack;
        stack.push(i);
        for dep in &derived[i].dependencies {
            let Some(&j) = index.get(dep.as_str()) else {
                continue;
            };
            match marks[j] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&k| k == j).unwrap_or(0);
                    return Some(stack[start..].iter().map(|&k| derived[k].name.clone()).collect());
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(j, derived, index, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[i] = Mark::Done;
        None
    }

    let index: HashMap<&str, usize> = derived
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();
    let mut marks = vec![Mark::Unvisited; derived.len()];
    let mut stack = Vec::new();
    for i in 0..derived.len() {
        if marks[i] == Mark::Unvisited {
            if let Some(cycle) = visit(i, derived, &index, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{DerivedIR, HandlerIR, SourceLocation, StateIR};

    fn derived(name: &str, deps: &[&str]) -> DerivedDecl {
        DerivedDecl {
            name: name.to_string(),
            body: Expr::Undefined,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_cycle_reported_in_discovery_order() {
        let decls = vec![
            derived("total", &["count"]),
            derived("a", &["b"]),
            derived("b", &["c"]),
            derived("c", &["a"]),
        ];
        assert_eq!(find_cycle(&decls).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_self_dependency_is_one_member_cycle() {
        let decls = vec![derived("loop", &["loop"])];
        assert_eq!(find_cycle(&decls).unwrap(), vec!["loop"]);
    }

    #[test]
    fn test_acyclic_has_no_cycle() {
        let decls = vec![derived("double", &["count"]), derived("quad", &["double"])];
        assert!(find_cycle(&decls).is_none());
    }

    #[test]
    fn test_model_merges_explicit_request_updates() {
        let ir = ComponentIR {
            name: "Form".to_string(),
            states: vec![
                StateIR {
                    name: "first".to_string(),
                    init: "''".to_string(),
                    location: SourceLocation::default(),
                },
                StateIR {
                    name: "last".to_string(),
                    init: "''".to_string(),
                    location: SourceLocation::default(),
                },
            ],
            derived: vec![DerivedIR {
                name: "full".to_string(),
                body: "`${first} ${last}`".to_string(),
                dependencies: None,
                location: SourceLocation::default(),
            }],
            handlers: vec![HandlerIR {
                name: "reset".to_string(),
                body: "first = ''; requestUpdate(['first', 'last'])".to_string(),
                location: SourceLocation::default(),
            }],
            ..Default::default()
        };
        let scope = ComponentScope::new(&ir);
        let model = DeclarationModel::build(&ir, &scope).unwrap();
        assert_eq!(model.derived[0].dependencies, vec!["first", "last"]);
        assert_eq!(model.handlers[0].mutates, vec!["first", "last"]);
        assert_eq!(model.handlers[0].body.len(), 1);
    }

    #[test]
    fn test_initializer_cannot_read_later_state() {
        let ir = ComponentIR {
            name: "Order".to_string(),
            states: vec![
                StateIR {
                    name: "a".to_string(),
                    init: "b + 1".to_string(),
                    location: SourceLocation::default(),
                },
                StateIR {
                    name: "b".to_string(),
                    init: "1".to_string(),
                    location: SourceLocation::default(),
                },
            ],
            ..Default::default()
        };
        let scope = ComponentScope::new(&ir);
        assert!(matches!(
            DeclarationModel::build(&ir, &scope),
            Err(CompileError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_volatile_names_follow_derived_chain() {
        let model = DeclarationModel {
            component: "C".to_string(),
            states: vec![
                StateDecl {
                    name: "count".to_string(),
                    init: Expr::Undefined,
                },
                StateDecl {
                    name: "label".to_string(),
                    init: Expr::Undefined,
                },
            ],
            derived: vec![derived("double", &["count"]), derived("title", &["label"])],
            handlers: vec![HandlerDecl {
                name: "inc".to_string(),
                body: vec![],
                mutates: vec!["count".to_string()],
            }],
            ..Default::default()
        };
        let graph = DependencyGraph::build(&model, &[vec!["double".to_string()]]);
        let volatile = graph.volatile_names(&model);
        assert!(volatile.contains("double"));
        assert!(!volatile.contains("title"));
        assert_eq!(graph.consumers_of("double"), &[Consumer::Binding(0)]);
    }
}
