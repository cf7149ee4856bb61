use crate::expression::{Expr, Stmt};
use crate::validate::{ComponentIR, CompileError};
use std::collections::{HashMap, HashSet};

lazy_static::lazy_static! {
    /// Host and global identifiers an expression may read without declaring.
    /// They are never dependencies.
    pub static ref HOST_GLOBALS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("Math");
        s.insert("String");
        s.insert("Number");
        s.insert("Boolean");
        s.insert("parseInt");
        s.insert("parseFloat");
        s.insert("isNaN");
        s.insert("console");
        s
    };
}

/// What a name in a component's scope refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    State,
    Derived,
    Handler,
    Callback,
    Global,
}

impl NameKind {
    /// State and derived names are the only producers in the dependency graph.
    pub fn is_reactive(self) -> bool {
        matches!(self, NameKind::State | NameKind::Derived)
    }
}

/// Target of an event binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerTarget {
    Local(String),
    Callback(String),
}

pub struct ComponentScope {
    component: String,
    names: HashMap<String, NameKind>,
}

impl ComponentScope {
    pub fn new(ir: &ComponentIR) -> Self {
        let mut names = HashMap::new();
        for s in &ir.states {
            names.insert(s.name.clone(), NameKind::State);
        }
        for d in &ir.derived {
            names.insert(d.name.clone(), NameKind::Derived);
        }
        for h in &ir.handlers {
            names.insert(h.name.clone(), NameKind::Handler);
        }
        for c in &ir.callbacks {
            names.insert(c.clone(), NameKind::Callback);
        }
        Self {
            component: ir.name.clone(),
            names,
        }
    }

    pub fn classify(&self, name: &str) -> Option<NameKind> {
        if let Some(kind) = self.names.get(name) {
            return Some(*kind);
        }
        if HOST_GLOBALS.contains(name) {
            return Some(NameKind::Global);
        }
        None
    }

    /// Resolve every name an expression reads and return its dependency set:
    /// the state and derived names, in first-occurrence order.
    pub fn dependencies(&self, expr: &Expr, declaration: &str) -> Result<Vec<String>, CompileError> {
        for target in expr.call_targets() {
            if self.classify(&target) != Some(NameKind::Global) {
                return Err(self.unresolved(&target, declaration));
            }
        }

        let mut deps = Vec::new();
        for name in expr.free_names() {
            match self.classify(&name) {
                Some(kind) if kind.is_reactive() => deps.push(name),
                Some(NameKind::Global) => {}
                // Handlers and callbacks are not values.
                _ => return Err(self.unresolved(&name, declaration)),
            }
        }
        Ok(deps)
    }

    /// Check an explicit dependency annotation.
    pub fn annotated(&self, names: &[String], declaration: &str) -> Result<Vec<String>, CompileError> {
        let mut deps = Vec::new();
        for name in names {
            match self.classify(name) {
                Some(kind) if kind.is_reactive() => {
                    if !deps.contains(name) {
                        deps.push(name.clone());
                    }
                }
                _ => return Err(self.unresolved(name, declaration)),
            }
        }
        Ok(deps)
    }

    /// Resolve a handler body. Assignment targets must be state variables.
    pub fn check_handler(&self, handler: &str, body: &[Stmt]) -> Result<(), CompileError> {
        let declaration = format!("handler '{}'", handler);
        for stmt in body {
            for expr in stmt.expressions() {
                self.dependencies(expr, &declaration)?;
            }
            match stmt {
                Stmt::Assign { target, .. } | Stmt::Update { target, .. } => {
                    self.check_assignable(target, handler)?;
                }
                Stmt::RequestUpdate { names } => {
                    for name in names {
                        if !self.classify(name).is_some_and(NameKind::is_reactive) {
                            return Err(self.unresolved(name, &declaration));
                        }
                    }
                }
                Stmt::If {
                    consequent,
                    alternate,
                    ..
                } => {
                    self.check_handler(handler, consequent)?;
                    self.check_handler(handler, alternate)?;
                }
                Stmt::Eval { .. } => {}
            }
        }
        Ok(())
    }

    fn check_assignable(&self, target: &str, handler: &str) -> Result<(), CompileError> {
        match self.classify(target) {
            Some(NameKind::State) => Ok(()),
            Some(NameKind::Derived) => Err(CompileError::DerivedAssignment {
                name: target.to_string(),
                handler: handler.to_string(),
            }),
            _ => Err(self.unresolved(target, &format!("handler '{}'", handler))),
        }
    }

    pub fn resolve_handler(&self, name: &str, declaration: &str) -> Result<HandlerTarget, CompileError> {
        match self.classify(name) {
            Some(NameKind::Handler) => Ok(HandlerTarget::Local(name.to_string())),
            Some(NameKind::Callback) => Ok(HandlerTarget::Callback(name.to_string())),
            _ => Err(self.unresolved(name, declaration)),
        }
    }

    fn unresolved(&self, name: &str, declaration: &str) -> CompileError {
        CompileError::UnresolvedReference {
            name: name.to_string(),
            declaration: format!("{} of <{}>", declaration, self.component),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_expression, parse_statements};
    use crate::validate::{DerivedIR, HandlerIR, SourceLocation, StateIR};

    fn scope() -> ComponentScope {
        ComponentScope::new(&ComponentIR {
            name: "Counter".to_string(),
            states: vec![StateIR {
                name: "count".to_string(),
                init: "0".to_string(),
                location: SourceLocation::default(),
            }],
            derived: vec![DerivedIR {
                name: "double".to_string(),
                body: "count * 2".to_string(),
                dependencies: None,
                location: SourceLocation::default(),
            }],
            handlers: vec![HandlerIR {
                name: "increment".to_string(),
                body: "count++".to_string(),
                location: SourceLocation::default(),
            }],
            callbacks: vec!["onChange".to_string()],
            ..Default::default()
        })
    }

    #[test]
    fn test_globals_are_not_dependencies() {
        let expr = parse_expression("Math.max(count, double) + String(count)", "t").unwrap();
        assert_eq!(scope().dependencies(&expr, "t").unwrap(), vec!["count", "double"]);
    }

    #[test]
    fn test_unknown_name_is_unresolved() {
        let expr = parse_expression("count + missing", "t").unwrap();
        let err = scope().dependencies(&expr, "text binding").unwrap_err();
        match err {
            CompileError::UnresolvedReference { name, declaration } => {
                assert_eq!(name, "missing");
                assert!(declaration.contains("text binding"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_call_target_is_unresolved() {
        let expr = parse_expression("format(count)", "t").unwrap();
        assert!(scope().dependencies(&expr, "t").is_err());
    }

    #[test]
    fn test_handler_cannot_assign_derived() {
        let body = parse_statements("double = 4", "h").unwrap();
        assert!(matches!(
            scope().check_handler("reset", &body),
            Err(CompileError::DerivedAssignment { .. })
        ));
    }

    #[test]
    fn test_event_targets_resolve_to_handlers_or_callbacks() {
        let s = scope();
        assert_eq!(
            s.resolve_handler("onChange", "e").unwrap(),
            HandlerTarget::Callback("onChange".to_string())
        );
        assert!(s.resolve_handler("count", "e").is_err());
    }
}
