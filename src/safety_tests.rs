//! Safety gate tests
//!
//! Structural guarantees that must hold for every compiled component:
//! - mount followed by unmount leaves the container as it was found
//! - every subscription is released
//! - every compile error carries a stable code and guarantee

#[cfg(test)]
mod tests {
    use crate::finalize::{compile_component, compile_program};
    use crate::host::{HostCall, MemoryHost};
    use crate::options::CompileOptions;
    use crate::runtime::Props;
    use crate::validate::{
        ComponentIR, CompileError, ERR_CYCLIC_DEPENDENCY, ERR_DERIVED_ASSIGNMENT,
        ERR_DUPLICATE_DECLARATION, ERR_UNRESOLVED_REFERENCE,
    };
    use serde_json::json;

    fn ir(value: serde_json::Value) -> ComponentIR {
        serde_json::from_value(value).unwrap()
    }

    fn form() -> serde_json::Value {
        json!([
            {
                "name": "Form",
                "states": [
                    { "name": "name", "init": "''" },
                    { "name": "agreed", "init": "false" }
                ],
                "derived": [{ "name": "ready", "body": "name.length > 0 && agreed" }],
                "handlers": [
                    { "name": "type", "body": "name = name + 'x'" },
                    { "name": "agree", "body": "agreed = !agreed" }
                ],
                "nodes": [
                    { "type": "text", "value": "Sign up" },
                    {
                        "type": "element",
                        "tag": "form",
                        "children": [
                            {
                                "type": "element",
                                "tag": "input",
                                "attributes": [{ "name": "value", "value": { "code": "name" } }],
                                "events": [{ "event": "input", "handler": "type" }]
                            },
                            {
                                "type": "element",
                                "tag": "input",
                                "attributes": [{ "name": "type", "value": "checkbox" }],
                                "events": [{ "event": "change", "handler": "agree" }]
                            },
                            { "type": "component", "name": "Status", "props": [
                                { "name": "ok", "value": { "kind": "expression", "value": "ready" } }
                            ] }
                        ]
                    },
                    { "type": "component", "name": "Status", "props": [
                        { "name": "ok", "value": { "kind": "static", "value": "footer" } }
                    ] }
                ]
            },
            {
                "name": "Status",
                "states": [{ "name": "ok", "init": "false" }],
                "props": ["ok"],
                "nodes": [{
                    "type": "element",
                    "tag": "span",
                    "attributes": [{ "name": "data-ok", "value": { "code": "String(ok)" } }],
                    "children": [{ "type": "expression", "expression": "ok ? 'ready' : 'waiting'" }]
                }]
            }
        ])
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // MOUNT / UNMOUNT BALANCE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_unmount_restores_container() {
        let components: Vec<ComponentIR> = serde_json::from_value(form()).unwrap();
        let program = compile_program(components, &CompileOptions::default())
            .unwrap()
            .program();
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut form = program.instantiate("Form").unwrap();

        form.mount(&mut host, container, Props::new()).unwrap();
        assert_eq!(host.texts(container), vec!["Sign up", "waiting", "ready"]);
        assert_eq!(host.live_subscriptions(), 2);

        form.fire(&mut host, "type").unwrap();
        form.fire(&mut host, "agree").unwrap();
        assert_eq!(host.texts(container), vec!["Sign up", "ready", "ready"]);

        form.unmount(&mut host).unwrap();
        assert!(host.children(container).is_empty());
        assert_eq!(host.live_subscriptions(), 0);

        let appended = host.count(|c| matches!(c, HostCall::Append { parent, .. } if *parent == container));
        let removed = host.count(|c| matches!(c, HostCall::Remove { parent, .. } if *parent == container));
        assert_eq!(appended, removed);
        let subscribed = host.count(|c| matches!(c, HostCall::Subscribe { .. }));
        let unsubscribed = host.count(|c| matches!(c, HostCall::Unsubscribe { .. }));
        assert_eq!(subscribed, unsubscribed);
    }

    #[test]
    fn test_container_keeps_foreign_children() {
        let components: Vec<ComponentIR> = serde_json::from_value(form()).unwrap();
        let program = compile_program(components, &CompileOptions::default())
            .unwrap()
            .program();
        let mut host = MemoryHost::new();
        let container = host.container();
        let foreign = crate::host::HostTree::create_element_node(&mut host, "aside");
        crate::host::HostTree::append_child(&mut host, container, foreign);

        let mut status = program.instantiate("Status").unwrap();
        status.mount(&mut host, container, Props::new()).unwrap();
        assert_eq!(host.children(container).len(), 2);
        status.unmount(&mut host).unwrap();
        assert_eq!(host.children(container), vec![foreign]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // COMPILE-TIME GATES
    // ═══════════════════════════════════════════════════════════════════════════════

    fn code_of(value: serde_json::Value) -> &'static str {
        compile_component(&ir(value), &CompileOptions::default())
            .unwrap_err()
            .code()
    }

    #[test]
    fn test_unresolved_reference_gate() {
        let code = code_of(json!({
            "name": "Broken",
            "nodes": [{ "type": "expression", "expression": "missing + 1" }]
        }));
        assert_eq!(code, ERR_UNRESOLVED_REFERENCE);
    }

    #[test]
    fn test_cyclic_dependency_gate() {
        let code = code_of(json!({
            "name": "Loop",
            "derived": [
                { "name": "a", "body": "b + 1" },
                { "name": "b", "body": "a + 1" }
            ]
        }));
        assert_eq!(code, ERR_CYCLIC_DEPENDENCY);
    }

    #[test]
    fn test_duplicate_and_derived_assignment_gates() {
        let duplicate = code_of(json!({
            "name": "Twice",
            "states": [{ "name": "x", "init": "1" }, { "name": "x", "init": "2" }]
        }));
        assert_eq!(duplicate, ERR_DUPLICATE_DECLARATION);

        let assigned = code_of(json!({
            "name": "Writer",
            "states": [{ "name": "x", "init": "1" }],
            "derived": [{ "name": "y", "body": "x * 2" }],
            "handlers": [{ "name": "poke", "body": "y = 3" }]
        }));
        assert_eq!(assigned, ERR_DERIVED_ASSIGNMENT);
    }

    #[test]
    fn test_every_error_has_a_guarantee() {
        let errors = vec![
            CompileError::UnresolvedReference {
                name: "x".into(),
                declaration: "text binding".into(),
            },
            CompileError::CyclicDependency {
                cycle: vec!["a".into()],
            },
            CompileError::DuplicateDeclaration {
                name: "x".into(),
                component: "C".into(),
            },
            CompileError::DerivedAssignment {
                name: "y".into(),
                handler: "h".into(),
            },
            CompileError::InvalidExpression {
                code: "+".into(),
                origin: "text binding".into(),
                reason: "bad".into(),
            },
            CompileError::InvalidIdentifier {
                name: "1x".into(),
                reason: "bad".into(),
            },
            CompileError::UnknownComponent {
                name: "X".into(),
                parent: "P".into(),
            },
            CompileError::UnknownProp {
                component: "X".into(),
                prop: "p".into(),
                parent: "P".into(),
            },
            CompileError::RecursiveComposition {
                chain: vec!["A".into(), "A".into()],
            },
        ];
        for err in errors {
            let diagnostic = err.to_diagnostic("App.comp");
            assert!(diagnostic.code.starts_with("C-ERR-"));
            assert_ne!(diagnostic.guarantee, "Unknown invariant.");
            assert_eq!(diagnostic.file, "App.comp");
            assert_eq!(diagnostic.message, err.to_string());
        }
    }
}
