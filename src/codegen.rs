//! Codegen module for the component compiler
//!
//! Emits one ES module per component plan. The module's default export is a
//! factory; every call returns a fresh lifecycle object
//! (`exported`, `mount`, `apply`, `update`, `unmount`, plus `children` under
//! explicit teardown) with its own `pending` set and `flushing` flag.

use crate::eval::format_number;
use crate::expression::{BinaryOp, Callee, Expr, LogicalOp, Stmt, UnaryOp, UpdateOp};
use crate::lifecycle::{
    BindingTarget, ChildPropValue, ComponentPlan, HandlerRef, NodeKind, Placement,
};
use crate::options::{CompileOptions, ReentrancyPolicy, TeardownPolicy};

// ═══════════════════════════════════════════════════════════════════════════════
// EXPRESSION PRINTING
// ═══════════════════════════════════════════════════════════════════════════════

const PREC_LAMBDA: u8 = 2;
const PREC_CONDITIONAL: u8 = 3;
const PREC_OR: u8 = 4;
const PREC_AND: u8 = 5;
const PREC_UNARY: u8 = 15;
const PREC_MEMBER: u8 = 18;
const PREC_PRIMARY: u8 = 20;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::StrictEq | BinaryOp::StrictNotEq => 9,
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => 10,
        BinaryOp::Add | BinaryOp::Sub => 12,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 13,
        BinaryOp::Exp => 14,
    }
}

fn logical_precedence(op: LogicalOp) -> u8 {
    match op {
        LogicalOp::Or | LogicalOp::Coalesce => PREC_OR,
        LogicalOp::And => PREC_AND,
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Lambda { .. } => PREC_LAMBDA,
        Expr::Conditional { .. } => PREC_CONDITIONAL,
        Expr::Logical { op, .. } => logical_precedence(*op),
        Expr::Binary { op, .. } => binary_precedence(*op),
        Expr::Unary { .. } => PREC_UNARY,
        Expr::Call { .. } | Expr::Member { .. } | Expr::Index { .. } => PREC_MEMBER,
        Expr::Number { value } if *value < 0.0 => PREC_UNARY,
        _ => PREC_PRIMARY,
    }
}

fn print_at(expr: &Expr, min: u8) -> String {
    let code = print_expr(expr);
    if precedence(expr) < min {
        format!("({})", code)
    } else {
        code
    }
}

fn print_args(args: &[Expr]) -> String {
    args.iter()
        .map(|a| print_at(a, PREC_LAMBDA))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print a lowered expression back to JavaScript source.
pub fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::Undefined => "undefined".to_string(),
        Expr::Null => "null".to_string(),
        Expr::Bool { value } => value.to_string(),
        Expr::Number { value } => format_number(*value),
        Expr::Str { value } => format!("\"{}\"", escape_js_string(value)),
        Expr::Ident { name } => name.clone(),
        Expr::Template {
            quasis,
            expressions,
        } => {
            let mut out = String::from("`");
            for (i, quasi) in quasis.iter().enumerate() {
                out.push_str(&escape_template(quasi));
                if let Some(e) = expressions.get(i) {
                    out.push_str("${");
                    out.push_str(&print_expr(e));
                    out.push('}');
                }
            }
            out.push('`');
            out
        }
        Expr::Array { elements } => format!("[{}]", print_args(elements)),
        Expr::Unary { op, argument } => {
            let operand = match argument.as_ref() {
                Expr::Unary { .. } => format!("({})", print_expr(argument)),
                other => print_at(other, PREC_UNARY),
            };
            match op {
                UnaryOp::Neg => format!("-{}", operand),
                UnaryOp::Plus => format!("+{}", operand),
                UnaryOp::Not => format!("!{}", operand),
                UnaryOp::Typeof => format!("typeof {}", operand),
            }
        }
        Expr::Binary { op, left, right } => {
            let prec = binary_precedence(*op);
            // `**` is right-associative and rejects a unary left operand.
            let (l, r) = if *op == BinaryOp::Exp {
                (print_at(left, PREC_UNARY + 1), print_at(right, prec))
            } else {
                (print_at(left, prec), print_at(right, prec + 1))
            };
            format!("{} {} {}", l, op.as_js(), r)
        }
        Expr::Logical { op, left, right } => {
            let prec = logical_precedence(*op);
            let side = |e: &Expr, min: u8| match e {
                // `??` cannot be mixed with `&&`/`||` without parentheses.
                Expr::Logical { op: inner, .. } if inner != op => format!("({})", print_expr(e)),
                _ => print_at(e, min),
            };
            format!("{} {} {}", side(left, prec), op.as_js(), side(right, prec + 1))
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => format!(
            "{} ? {} : {}",
            print_at(test, PREC_CONDITIONAL + 1),
            print_at(consequent, PREC_LAMBDA),
            print_at(alternate, PREC_LAMBDA)
        ),
        Expr::Call { callee, arguments } => match callee {
            Callee::Function { name } => format!("{}({})", name, print_args(arguments)),
            Callee::Method { object, method } => format!(
                "{}.{}({})",
                print_receiver(object),
                method,
                print_args(arguments)
            ),
        },
        Expr::Member { object, property } => format!("{}.{}", print_receiver(object), property),
        Expr::Index { object, index } => {
            format!("{}[{}]", print_receiver(object), print_expr(index))
        }
        Expr::Lambda { params, body } => {
            format!("({}) => {}", params.join(", "), print_at(body, PREC_LAMBDA))
        }
    }
}

fn print_receiver(object: &Expr) -> String {
    match object {
        Expr::Number { .. } => format!("({})", print_expr(object)),
        other => print_at(other, PREC_MEMBER),
    }
}

fn print_stmt(stmt: &Stmt, indent: &str, out: &mut Vec<String>) {
    match stmt {
        Stmt::Assign { target, op, value } => {
            out.push(format!("{}{} {} {};", indent, target, op.as_js(), print_expr(value)));
        }
        Stmt::Update { target, op } => {
            let op = match op {
                UpdateOp::Increment => "++",
                UpdateOp::Decrement => "--",
            };
            out.push(format!("{}{}{};", indent, target, op));
        }
        Stmt::If {
            test,
            consequent,
            alternate,
        } => {
            out.push(format!("{}if ({}) {{", indent, print_expr(test)));
            let inner = format!("{}  ", indent);
            for s in consequent {
                print_stmt(s, &inner, out);
            }
            if alternate.is_empty() {
                out.push(format!("{}}}", indent));
            } else {
                out.push(format!("{}}} else {{", indent));
                for s in alternate {
                    print_stmt(s, &inner, out);
                }
                out.push(format!("{}}}", indent));
            }
        }
        Stmt::Eval { expr } => out.push(format!("{}{};", indent, print_expr(expr))),
        Stmt::RequestUpdate { names } => {
            out.push(format!("{}requestUpdate({});", indent, name_list(names)));
        }
    }
}

fn name_list(names: &[String]) -> String {
    let quoted: Vec<String> = names
        .iter()
        .map(|n| format!("\"{}\"", escape_js_string(n)))
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn changed_test(deps: &[String]) -> String {
    deps.iter()
        .map(|d| format!("changed.has(\"{}\")", escape_js_string(d)))
        .collect::<Vec<_>>()
        .join(" || ")
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE EMISSION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Code {
    imports: Vec<String>,
    declarations: Vec<String>,
    derived: Vec<String>,
    handlers: Vec<String>,
    mount: Vec<String>,
    apply: Vec<String>,
    update: Vec<String>,
    unmount: Vec<String>,
}

fn handler_expr(handler: &HandlerRef) -> String {
    match handler {
        HandlerRef::Local { index } => format!("handlers[{}]", index),
        HandlerRef::Callback { name } => format!("callbacks.{}", name),
    }
}

/// Emit the JavaScript module for one component plan.
pub fn generate_module(plan: &ComponentPlan, options: &CompileOptions) -> String {
    let mut code = Code::default();

    let mut imported: Vec<&str> = Vec::new();
    for child in &plan.children {
        if !imported.contains(&child.component.as_str()) {
            imported.push(&child.component);
            code.imports.push(format!(
                "import {} from \"./{}.js\";",
                child.component, child.component
            ));
        }
    }

    // State and derived values live in factory scope.
    for state in &plan.states {
        code.declarations
            .push(format!("let {} = {};", state.name, print_expr(&state.init)));
    }
    for step in &plan.derived {
        code.declarations.push(format!("let {};", step.name));
    }
    let vars: Vec<&str> = plan
        .nodes
        .iter()
        .map(|n| n.var.as_str())
        .chain(plan.children.iter().map(|c| c.var.as_str()))
        .collect();
    if !vars.is_empty() {
        code.declarations.push(format!("let {};", vars.join(", ")));
    }

    // Derived pass: only declarations that can change after mount.
    for step in plan.derived.iter().filter(|s| s.reactive) {
        code.derived
            .push(format!("if ({}) {{", changed_test(&step.dependencies)));
        code.derived
            .push(format!("  {} = {};", step.name, print_expr(&step.body)));
        code.derived
            .push(format!("  changed.add(\"{}\");", escape_js_string(&step.name)));
        code.derived.push("}".to_string());
    }

    for handler in &plan.handlers {
        code.handlers.push(format!("function {}() {{", handler.name));
        for stmt in &handler.body {
            print_stmt(stmt, "  ", &mut code.handlers);
        }
        code.handlers.push("},".to_string());
    }

    emit_mount(plan, &mut code);
    emit_apply(plan, &mut code);

    for prop in &plan.props {
        code.update.push(format!(
            "if (\"{p}\" in props) {{ {p} = props.{p}; names.push(\"{p}\"); }}",
            p = prop
        ));
    }
    // Callback props are bound at mount and never replaced.

    code.unmount
        .push("for (const [node, event, handler] of subscriptions.reverse()) {".to_string());
    code.unmount
        .push("  node.removeEventListener(event, handler);".to_string());
    code.unmount.push("}".to_string());
    code.unmount.push("subscriptions.length = 0;".to_string());
    let roots: Vec<Placement> = plan.roots().collect();
    for placement in roots.iter().rev() {
        if let Placement::Node { index } = placement {
            code.unmount
                .push(format!("target.removeChild({});", plan.nodes[*index].var));
        }
    }
    if options.teardown == TeardownPolicy::Recursive {
        for child in plan.children.iter().rev() {
            code.unmount.push(format!("{}.unmount();", child.var));
        }
    }

    assemble(plan, options, &code)
}

fn emit_mount(plan: &ComponentPlan, code: &mut Code) {
    for prop in &plan.props {
        code.mount
            .push(format!("if (\"{p}\" in props) {p} = props.{p};", p = prop));
    }
    for callback in &plan.callbacks {
        code.mount.push(format!(
            "if (\"{c}\" in props) callbacks.{c} = props.{c};",
            c = callback
        ));
    }
    for step in &plan.derived {
        code.mount
            .push(format!("{} = {};", step.name, print_expr(&step.body)));
    }

    for node in &plan.nodes {
        match &node.kind {
            NodeKind::Element { tag, attributes } => {
                code.mount.push(format!(
                    "{} = document.createElement(\"{}\");",
                    node.var,
                    escape_js_string(tag)
                ));
                for (name, value) in attributes {
                    code.mount.push(format!(
                        "{}.setAttribute(\"{}\", \"{}\");",
                        node.var,
                        escape_js_string(name),
                        escape_js_string(value)
                    ));
                }
            }
            NodeKind::Text { value } => {
                code.mount.push(format!(
                    "{} = document.createTextNode(\"{}\");",
                    node.var,
                    escape_js_string(value)
                ));
            }
        }
    }
    for binding in &plan.bindings {
        code.mount.push(write_binding(plan, binding.node, &binding.target, &binding.expr));
    }
    for event in &plan.events {
        code.mount.push(format!(
            "subscribe({}, \"{}\", {});",
            plan.nodes[event.node].var,
            escape_js_string(&event.event),
            handler_expr(&event.handler)
        ));
    }

    for placement in &plan.placements {
        match *placement {
            Placement::Node { index } => {
                let node = &plan.nodes[index];
                let into = node
                    .parent
                    .map(|p| plan.nodes[p].var.as_str())
                    .unwrap_or("container");
                code.mount
                    .push(format!("{}.appendChild({});", into, node.var));
            }
            Placement::Child { index } => {
                let child = &plan.children[index];
                let into = child
                    .parent
                    .map(|p| plan.nodes[p].var.clone())
                    .unwrap_or_else(|| "container".to_string());
                let props: Vec<String> = child
                    .props
                    .iter()
                    .map(|p| match &p.value {
                        ChildPropValue::Expression { expr, .. } => {
                            format!("{}: {}", p.name, print_at(expr, PREC_LAMBDA))
                        }
                        ChildPropValue::Callback { handler } => {
                            format!("{}: {}", p.name, handler_expr(handler))
                        }
                    })
                    .collect();
                code.mount
                    .push(format!("{} = {}();", child.var, child.component));
                code.mount.push(format!(
                    "{}.mount({}, {{ {} }});",
                    child.var,
                    into,
                    props.join(", ")
                ));
            }
        }
    }
}

fn write_binding(plan: &ComponentPlan, node: usize, target: &BindingTarget, expr: &Expr) -> String {
    let var = &plan.nodes[node].var;
    let value = format!("String({})", print_expr(expr));
    match target {
        BindingTarget::Text => format!("{}.data = {};", var, value),
        BindingTarget::Attribute { name } => {
            format!("{}.setAttribute(\"{}\", {});", var, escape_js_string(name), value)
        }
    }
}

fn emit_apply(plan: &ComponentPlan, code: &mut Code) {
    for binding in plan.bindings.iter().filter(|b| b.reactive) {
        code.apply.push(format!(
            "if ({}) {}",
            changed_test(&binding.dependencies),
            write_binding(plan, binding.node, &binding.target, &binding.expr)
        ));
    }

    for child in &plan.children {
        let forwarded: Vec<(&str, &Expr, &[String])> = child
            .props
            .iter()
            .filter_map(|p| match &p.value {
                ChildPropValue::Expression {
                    expr,
                    dependencies,
                    reactive: true,
                } => Some((p.name.as_str(), expr, dependencies.as_slice())),
                _ => None,
            })
            .collect();
        if forwarded.is_empty() {
            continue;
        }
        code.apply.push("{".to_string());
        code.apply.push("  const props = {};".to_string());
        for (name, expr, deps) in forwarded {
            code.apply.push(format!(
                "  if ({}) props.{} = {};",
                changed_test(deps),
                name,
                print_expr(expr)
            ));
        }
        code.apply.push(format!(
            "  if (Object.keys(props).length > 0) {}.update(props);",
            child.var
        ));
        code.apply.push("}".to_string());
    }
}

fn push_indented(out: &mut Vec<String>, lines: &[String], depth: usize) {
    let pad = "  ".repeat(depth);
    out.extend(lines.iter().map(|l| format!("{}{}", pad, l)));
}

fn flush_body(plan: &ComponentPlan, options: &CompileOptions) -> Vec<String> {
    let mut lines = vec!["flushing = true;".to_string()];
    match options.reentrancy {
        ReentrancyPolicy::Buffer => {
            lines.push("const changed = pending;".to_string());
            lines.push("pending = new Set();".to_string());
            lines.push("runDerived(changed);".to_string());
            lines.push("try {".to_string());
            lines.push("  lifecycle.apply(changed);".to_string());
            lines.push("} finally {".to_string());
            lines.push("  flushing = false;".to_string());
            lines.push("}".to_string());
        }
        ReentrancyPolicy::Redrain => {
            lines.push("let passes = 0;".to_string());
            lines.push("try {".to_string());
            lines.push("  do {".to_string());
            lines.push(format!(
                "    if (passes > {}) throw new Error(\"UpdateLoop: <{}> kept requesting updates\");",
                options.max_redrain_passes, plan.name
            ));
            lines.push("    const changed = pending;".to_string());
            lines.push("    pending = new Set();".to_string());
            lines.push("    runDerived(changed);".to_string());
            lines.push("    lifecycle.apply(changed);".to_string());
            lines.push("    passes += 1;".to_string());
            lines.push("  } while (pending.size > 0);".to_string());
            lines.push("} finally {".to_string());
            lines.push("  flushing = false;".to_string());
            lines.push("}".to_string());
        }
    }
    lines
}

fn assemble(plan: &ComponentPlan, options: &CompileOptions, code: &Code) -> String {
    let mut out = Vec::new();
    if !code.imports.is_empty() {
        out.push(code.imports.join("\n"));
        out.push(String::new());
    }
    out.push(format!("export default function {}() {{", plan.name));
    push_indented(&mut out, &code.declarations, 1);
    out.push("  let pending = new Set();".to_string());
    out.push("  let flushing = false;".to_string());
    out.push("  let phase = \"created\";".to_string());
    out.push("  let target;".to_string());
    out.push("  const callbacks = {};".to_string());
    out.push("  const subscriptions = [];".to_string());
    out.push(String::new());
    out.push("  function subscribe(node, event, handler) {".to_string());
    out.push("    if (!handler) return;".to_string());
    out.push("    node.addEventListener(event, handler);".to_string());
    out.push("    subscriptions.push([node, event, handler]);".to_string());
    out.push("  }".to_string());
    out.push(String::new());
    out.push("  function runDerived(changed) {".to_string());
    push_indented(&mut out, &code.derived, 2);
    out.push("  }".to_string());
    out.push(String::new());
    out.push("  function requestUpdate(names) {".to_string());
    out.push("    for (const name of names) pending.add(name);".to_string());
    out.push("    if (flushing) return;".to_string());
    push_indented(&mut out, &flush_body(plan, options), 2);
    out.push("  }".to_string());
    out.push(String::new());
    out.push("  const handlers = [".to_string());
    push_indented(&mut out, &code.handlers, 2);
    out.push("  ];".to_string());
    out.push(String::new());
    out.push("  const lifecycle = {".to_string());
    if options.emit_exported {
        out.push(format!("    exported() {{ return {}; }},", name_list(&plan.exported())));
    }
    out.push("    mount(container, props = {}) {".to_string());
    out.push(format!(
        "      if (phase !== \"created\") throw new Error(\"AlreadyMounted: <{}>\");",
        plan.name
    ));
    out.push("      target = container;".to_string());
    push_indented(&mut out, &code.mount, 3);
    out.push("      phase = \"mounted\";".to_string());
    out.push("      return lifecycle;".to_string());
    out.push("    },".to_string());
    out.push("    apply(changed) {".to_string());
    out.push(format!(
        "      if (phase !== \"mounted\") throw new Error(\"NotMounted: <{}>\");",
        plan.name
    ));
    out.push("      changed = changed instanceof Set ? changed : new Set(changed);".to_string());
    push_indented(&mut out, &code.apply, 3);
    out.push("    },".to_string());
    out.push("    update(props) {".to_string());
    out.push(format!(
        "      if (phase !== \"mounted\") throw new Error(\"NotMounted: <{}>\");",
        plan.name
    ));
    out.push("      const names = [];".to_string());
    push_indented(&mut out, &code.update, 3);
    out.push("      if (names.length > 0) requestUpdate(names);".to_string());
    out.push("    },".to_string());
    if options.teardown == TeardownPolicy::Explicit {
        let vars: Vec<&str> = plan.children.iter().map(|c| c.var.as_str()).collect();
        // Nested instances outlive unmount; the owner tears them down.
        out.push(format!("    children() {{ return [{}]; }},", vars.join(", ")));
    }
    out.push("    unmount() {".to_string());
    out.push(format!(
        "      if (phase !== \"mounted\") throw new Error(\"NotMounted: <{}>\");",
        plan.name
    ));
    push_indented(&mut out, &code.unmount, 3);
    out.push("      pending.clear();".to_string());
    out.push("      phase = \"unmounted\";".to_string());
    out.push("    },".to_string());
    out.push("  };".to_string());
    out.push("  return lifecycle;".to_string());
    out.push("}".to_string());

    let mut text = out.join("\n");
    text.push('\n');
    text
}

fn escape_js_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn escape_template(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
