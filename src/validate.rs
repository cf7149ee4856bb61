#[cfg(feature = "napi")]
use napi_derive::napi;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::visitor::nested_components;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_UNRESOLVED_REFERENCE: &str = "C-ERR-SCOPE-001";
pub const ERR_CYCLIC_DEPENDENCY: &str = "C-ERR-CYCLE-001";
pub const ERR_DUPLICATE_DECLARATION: &str = "C-ERR-DECL-001";
pub const ERR_DERIVED_ASSIGNMENT: &str = "C-ERR-DECL-002";
pub const ERR_INVALID_EXPRESSION: &str = "C-ERR-SYNTAX-001";
pub const ERR_INVALID_IDENTIFIER: &str = "C-ERR-SYNTAX-002";
pub const ERR_UNKNOWN_COMPONENT: &str = "C-ERR-COMPOSE-001";
pub const ERR_UNKNOWN_PROP: &str = "C-ERR-COMPOSE-002";
pub const ERR_RECURSIVE_COMPOSITION: &str = "C-ERR-COMPOSE-003";
pub const ERR_INVALID_INPUT: &str = "C-ERR-INPUT-001";

/// Names the emitted module declares for itself. Component authors may not
/// shadow them.
pub const RESERVED_NAMES: &[&str] = &[
    "requestUpdate",
    "runDerived",
    "pending",
    "flushing",
    "lifecycle",
    "handlers",
    "target",
    "props",
    "changed",
    "callbacks",
    "subscriptions",
    "subscribe",
    "phase",
    "names",
    "container",
];

/// Host globals the emitted module calls by name.
pub const MODULE_GLOBALS: &[&str] = &["document", "String", "Set", "Error", "Object", "undefined"];

/// JavaScript reserved words, including strict-mode and module ones.
const JS_RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "arguments", "eval",
];

lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

pub fn is_valid_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name) && !JS_RESERVED_WORDS.contains(&name)
}

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_UNRESOLVED_REFERENCE => {
            "Every name read by a binding or declaration resolves at compile time."
        }
        ERR_CYCLIC_DEPENDENCY => {
            "Derived declarations are recomputed in a single forward pass per change batch."
        }
        ERR_DUPLICATE_DECLARATION => "Every declared name is unique within its component.",
        ERR_DERIVED_ASSIGNMENT => "Derived values are only ever a function of their dependencies.",
        ERR_INVALID_EXPRESSION => "Every expression is lowered before code generation.",
        ERR_INVALID_IDENTIFIER => "Every declared name can be emitted verbatim.",
        ERR_UNKNOWN_COMPONENT => "All nested components are resolved at compile time.",
        ERR_UNKNOWN_PROP => "Parents only forward props a child declares it accepts.",
        ERR_RECURSIVE_COMPOSITION => "Mounting a component tree always terminates.",
        ERR_INVALID_INPUT => "Only well-formed component IR reaches the compiler.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors that abort compilation of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UnresolvedReference {
        name: String,
        declaration: String,
    },
    CyclicDependency {
        cycle: Vec<String>,
    },
    DuplicateDeclaration {
        name: String,
        component: String,
    },
    DerivedAssignment {
        name: String,
        handler: String,
    },
    InvalidExpression {
        code: String,
        origin: String,
        reason: String,
    },
    InvalidIdentifier {
        name: String,
        reason: String,
    },
    UnknownComponent {
        name: String,
        parent: String,
    },
    UnknownProp {
        component: String,
        prop: String,
        parent: String,
    },
    RecursiveComposition {
        chain: Vec<String>,
    },
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedReference { .. } => ERR_UNRESOLVED_REFERENCE,
            Self::CyclicDependency { .. } => ERR_CYCLIC_DEPENDENCY,
            Self::DuplicateDeclaration { .. } => ERR_DUPLICATE_DECLARATION,
            Self::DerivedAssignment { .. } => ERR_DERIVED_ASSIGNMENT,
            Self::InvalidExpression { .. } => ERR_INVALID_EXPRESSION,
            Self::InvalidIdentifier { .. } => ERR_INVALID_IDENTIFIER,
            Self::UnknownComponent { .. } => ERR_UNKNOWN_COMPONENT,
            Self::UnknownProp { .. } => ERR_UNKNOWN_PROP,
            Self::RecursiveComposition { .. } => ERR_RECURSIVE_COMPOSITION,
        }
    }

    fn hints(&self) -> Vec<String> {
        match self {
            Self::UnresolvedReference { name, .. } => vec![format!(
                "Declare `{}` as state or as a derived declaration.",
                name
            )],
            Self::CyclicDependency { cycle } => {
                let mut path = cycle.clone();
                if let Some(first) = cycle.first() {
                    path.push(first.clone());
                }
                vec![
                    format!("Dependency path: {}", path.join(" -> ")),
                    "Move one of these values into state and assign it from a handler."
                        .to_string(),
                ]
            }
            Self::DerivedAssignment { name, .. } => vec![format!(
                "Assign the inputs of `{}` instead; it is recomputed automatically.",
                name
            )],
            Self::UnknownProp { component, .. } => vec![format!(
                "List the prop in the `props` or `callbacks` of <{}>.",
                component
            )],
            _ => vec![],
        }
    }

    /// Serializable form of the error for the JSON bridge.
    pub fn to_diagnostic(&self, file: &str) -> Diagnostic {
        Diagnostic {
            code: self.code().to_string(),
            message: self.to_string(),
            guarantee: get_guarantee(self.code()).to_string(),
            file: file.to_string(),
            hints: self.hints(),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedReference { name, declaration } => {
                write!(f, "Unresolved reference '{}' in {}", name, declaration)
            }
            Self::CyclicDependency { cycle } => {
                write!(f, "Cyclic dependency between [{}]", cycle.join(", "))
            }
            Self::DuplicateDeclaration { name, component } => {
                write!(f, "'{}' is declared more than once in <{}>", name, component)
            }
            Self::DerivedAssignment { name, handler } => {
                write!(
                    f,
                    "Derived value '{}' is assigned in handler '{}'",
                    name, handler
                )
            }
            Self::InvalidExpression {
                code,
                origin,
                reason,
            } => {
                write!(f, "Cannot compile '{}' in {}: {}", code, origin, reason)
            }
            Self::InvalidIdentifier { name, reason } => {
                write!(f, "Invalid identifier '{}': {}", name, reason)
            }
            Self::UnknownComponent { name, parent } => {
                write!(f, "Unknown component <{}> used in <{}>", name, parent)
            }
            Self::UnknownProp {
                component,
                prop,
                parent,
            } => {
                write!(
                    f,
                    "<{}> passes '{}' to <{}>, which does not accept it",
                    parent, prop, component
                )
            }
            Self::RecursiveComposition { chain } => {
                write!(f, "Component contains itself: {}", chain.join(" > "))
            }
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub hints: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// A component as handed over by the front-end parser.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentIR {
    pub name: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub states: Vec<StateIR>,
    #[serde(default)]
    pub derived: Vec<DerivedIR>,
    #[serde(default)]
    pub handlers: Vec<HandlerIR>,
    /// State variables a parent may set.
    #[serde(default)]
    pub props: Vec<String>,
    /// Callback props a parent may pass one of its handlers through.
    #[serde(default)]
    pub callbacks: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateIR {
    pub name: String,
    #[serde(default = "undefined_source")]
    pub init: String,
    #[serde(default)]
    pub location: SourceLocation,
}

fn undefined_source() -> String {
    "undefined".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedIR {
    pub name: String,
    pub body: String,
    /// Explicit dependency annotation. Replaces the inferred set when present.
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerIR {
    pub name: String,
    pub body: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
    Expression(ExpressionNode),
    Component(ComponentNode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: Vec<AttributeIR>,
    #[serde(default)]
    pub events: Vec<EventIR>,
    #[serde(default)]
    pub children: Vec<TemplateNode>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
    #[serde(default)]
    pub location: SourceLocation,
}

/// A dynamic text slot: `{expression}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionNode {
    pub expression: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub name: String,
    #[serde(default)]
    pub props: Vec<PropIR>,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Static(String),
    Dynamic(ExpressionIR),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionIR {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeIR {
    pub name: String,
    pub value: AttributeValue,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIR {
    pub event: String,
    /// Name of a handler of this component, or of one of its callback props.
    pub handler: String,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropIR {
    pub name: String,
    pub value: PropValueIR,
    #[serde(default)]
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum PropValueIR {
    Expression(String),
    Callback(String),
    Static(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Structural checks that run before any expression is lowered.
pub fn validate_component(ir: &ComponentIR) -> Result<(), CompileError> {
    check_identifier(&ir.name)?;

    let mut seen: HashSet<&str> = HashSet::new();
    let declared = ir
        .states
        .iter()
        .map(|s| s.name.as_str())
        .chain(ir.derived.iter().map(|d| d.name.as_str()))
        .chain(ir.handlers.iter().map(|h| h.name.as_str()))
        .chain(ir.callbacks.iter().map(|c| c.as_str()));

    let nested = nested_components(ir);
    for name in declared {
        check_identifier(name)?;
        if RESERVED_NAMES.contains(&name) || MODULE_GLOBALS.contains(&name) {
            return Err(CompileError::InvalidIdentifier {
                name: name.to_string(),
                reason: "the name is reserved by the generated module".to_string(),
            });
        }
        if nested.iter().any(|c| c == name) {
            return Err(CompileError::InvalidIdentifier {
                name: name.to_string(),
                reason: "the name is used by a nested component".to_string(),
            });
        }
        if !seen.insert(name) {
            return Err(CompileError::DuplicateDeclaration {
                name: name.to_string(),
                component: ir.name.clone(),
            });
        }
    }

    let mut exported = HashSet::new();
    for prop in &ir.props {
        if !ir.states.iter().any(|s| &s.name == prop) {
            return Err(CompileError::UnresolvedReference {
                name: prop.clone(),
                declaration: format!("the exported props of <{}>", ir.name),
            });
        }
        if !exported.insert(prop.as_str()) {
            return Err(CompileError::DuplicateDeclaration {
                name: prop.clone(),
                component: ir.name.clone(),
            });
        }
    }

    validate_nodes(&ir.nodes)
}

fn validate_nodes(nodes: &[TemplateNode]) -> Result<(), CompileError> {
    for node in nodes {
        match node {
            TemplateNode::Element(el) => {
                if el.tag.is_empty() {
                    return Err(CompileError::InvalidIdentifier {
                        name: el.tag.clone(),
                        reason: "element tags cannot be empty".to_string(),
                    });
                }
                validate_nodes(&el.children)?;
            }
            TemplateNode::Component(c) => {
                check_identifier(&c.name)?;
                let mut names = HashSet::new();
                for prop in &c.props {
                    check_identifier(&prop.name)?;
                    if !names.insert(prop.name.as_str()) {
                        return Err(CompileError::DuplicateDeclaration {
                            name: prop.name.clone(),
                            component: c.name.clone(),
                        });
                    }
                }
            }
            TemplateNode::Text(_) | TemplateNode::Expression(_) => {}
        }
    }
    Ok(())
}

fn check_identifier(name: &str) -> Result<(), CompileError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(CompileError::InvalidIdentifier {
            name: name.to_string(),
            reason: "expected a JavaScript identifier that is not a reserved word".to_string(),
        })
    }
}
