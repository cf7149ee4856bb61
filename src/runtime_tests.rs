//! Runtime behaviour of compiled components against the in-memory host.

#[cfg(test)]
mod tests {
    use crate::eval::Value;
    use crate::finalize::{compile_component, compile_program};
    use crate::host::{HandlerKey, HostTree, MemoryHost};
    use crate::options::{CompileOptions, ReentrancyPolicy, RuntimeOptions};
    use crate::runtime::{Program, Props, RuntimeError};
    use crate::validate::ComponentIR;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn program(components: serde_json::Value, options: CompileOptions) -> Program {
        let irs: Vec<ComponentIR> = serde_json::from_value(components).unwrap();
        compile_program(irs, &options).unwrap().program()
    }

    fn counter() -> serde_json::Value {
        json!([{
            "name": "Counter",
            "states": [{ "name": "counter", "init": "0" }],
            "handlers": [{ "name": "increment", "body": "counter += 1" }],
            "nodes": [{
                "type": "element",
                "tag": "button",
                "events": [{ "event": "click", "handler": "increment" }],
                "children": [{ "type": "expression", "expression": "counter" }]
            }]
        }])
    }

    fn doubler() -> serde_json::Value {
        json!([{
            "name": "Doubler",
            "states": [{ "name": "counter", "init": "1" }],
            "derived": [
                { "name": "quadruple", "body": "double * 2" },
                { "name": "double", "body": "counter * 2" }
            ],
            "nodes": [{
                "type": "element",
                "tag": "div",
                "children": [
                    { "type": "expression", "expression": "counter" },
                    { "type": "expression", "expression": "double" },
                    { "type": "expression", "expression": "double" },
                    { "type": "expression", "expression": "quadruple" }
                ]
            }]
        }])
    }

    /// An input whose bound value fires `change`, which updates another name.
    fn mirror(echo_body: &str) -> serde_json::Value {
        json!([{
            "name": "Mirror",
            "states": [
                { "name": "level", "init": "0" },
                { "name": "echoes", "init": "0" }
            ],
            "handlers": [
                { "name": "bump", "body": "level += 1" },
                { "name": "echo", "body": echo_body }
            ],
            "nodes": [
                {
                    "type": "element",
                    "tag": "input",
                    "attributes": [{ "name": "value", "value": { "code": "level" } }],
                    "events": [{ "event": "change", "handler": "echo" }]
                },
                {
                    "type": "element",
                    "tag": "span",
                    "children": [{ "type": "expression", "expression": "echoes" }]
                }
            ]
        }])
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // PROPAGATION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_click_updates_counter_text() {
        let program = program(counter(), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Counter").unwrap();

        instance.mount(&mut host, container, Props::new()).unwrap();
        assert_eq!(host.texts(container), vec!["0"]);

        let button = host.find_all(container, "button")[0];
        let key = host.handlers_for(button, "click")[0];
        instance.dispatch(&mut host, key).unwrap();
        assert_eq!(host.texts(container), vec!["1"]);
        assert_eq!(instance.value("counter"), Some(&Value::Number(1.0)));
        assert_eq!(instance.stats().passes, 1);
    }

    #[test]
    fn test_derived_chain_updates_in_one_pass() {
        let program = program(doubler(), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Doubler").unwrap();

        instance.mount(&mut host, container, Props::new()).unwrap();
        assert_eq!(host.texts(container), vec!["1", "2", "2", "4"]);

        instance.assign("counter", 2);
        instance
            .request_update(&mut host, &["counter".to_string()])
            .unwrap();
        assert_eq!(host.texts(container), vec!["2", "4", "4", "8"]);
        assert_eq!(instance.stats().passes, 1);
        assert_eq!(instance.stats().binding_writes, 8);
    }

    #[test]
    fn test_derived_pass_is_idempotent() {
        let program = program(doubler(), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Doubler").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();
        instance.assign("counter", 5);

        let pending: BTreeSet<String> = ["counter".to_string()].into_iter().collect();
        instance.run_derived_pass(&mut pending.clone());
        let first = (
            instance.value("double").cloned(),
            instance.value("quadruple").cloned(),
        );
        instance.run_derived_pass(&mut pending.clone());
        let second = (
            instance.value("double").cloned(),
            instance.value("quadruple").cloned(),
        );

        assert_eq!(first, (Some(Value::Number(10.0)), Some(Value::Number(20.0))));
        assert_eq!(first, second);
    }

    #[test]
    fn test_unrelated_names_leave_bindings_untouched() {
        let program = program(doubler(), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Doubler").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();
        host.clear_calls();

        instance.apply(&mut host, &["elsewhere".to_string()]).unwrap();
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_dynamic_attribute_follows_state() {
        let components = json!([{
            "name": "Toggle",
            "states": [{ "name": "open", "init": "false" }],
            "handlers": [{ "name": "toggle", "body": "open = !open" }],
            "nodes": [{
                "type": "element",
                "tag": "div",
                "attributes": [
                    { "name": "id", "value": "panel" },
                    { "name": "class", "value": { "code": "open ? 'open' : 'closed'" } }
                ],
                "events": [{ "event": "click", "handler": "toggle" }]
            }]
        }]);
        let program = program(components, CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Toggle").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();

        let div = host.find_all(container, "div")[0];
        assert_eq!(host.attribute(div, "id"), Some("panel"));
        assert_eq!(host.attribute(div, "class"), Some("closed"));
        instance.fire(&mut host, "toggle").unwrap();
        assert_eq!(host.attribute(div, "class"), Some("open"));
    }

    #[test]
    fn test_exported_prop_overrides_initializer() {
        let components = json!([{
            "name": "Badge",
            "states": [{ "name": "label", "init": "'none'" }],
            "props": ["label"],
            "nodes": [{ "type": "expression", "expression": "label.toUpperCase()" }]
        }]);
        let program = program(components, CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Badge").unwrap();

        let mut props = Props::new();
        props.insert("label".to_string(), Value::str("new").into());
        instance.mount(&mut host, container, props).unwrap();
        assert_eq!(host.texts(container), vec!["NEW"]);
        assert_eq!(instance.exported(), vec!["label"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // RE-ENTRANCY
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_redrain_runs_requests_made_during_apply() {
        let program = program(mirror("echoes = level"), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Mirror").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();
        let input = host.find_all(container, "input")[0];
        host.fire_on_write(input, "value", "change");

        instance.fire(&mut host, "bump").unwrap();
        assert_eq!(host.attribute(input, "value"), Some("1"));
        assert_eq!(host.texts(container), vec!["1"]);
        assert_eq!(instance.stats().passes, 2);
        assert!(instance.pending().is_empty());
    }

    #[test]
    fn test_buffer_keeps_requests_until_next_trigger() {
        let options = CompileOptions {
            reentrancy: ReentrancyPolicy::Buffer,
            ..Default::default()
        };
        let program = program(mirror("echoes = level"), options);
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Mirror").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();
        let input = host.find_all(container, "input")[0];
        host.fire_on_write(input, "value", "change");

        instance.fire(&mut host, "bump").unwrap();
        assert_eq!(instance.value("echoes"), Some(&Value::Number(1.0)));
        assert_eq!(host.texts(container), vec!["0"]);
        assert_eq!(instance.pending(), vec!["echoes"]);
        assert_eq!(instance.stats().passes, 1);

        instance.fire(&mut host, "bump").unwrap();
        assert_eq!(host.texts(container), vec!["1"]);
        assert_eq!(instance.pending(), vec!["echoes"]);
    }

    #[test]
    fn test_redrain_limit_reports_update_loop() {
        let options = CompileOptions {
            max_redrain_passes: 3,
            ..Default::default()
        };
        let program = program(mirror("level += 1"), options);
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Mirror").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();
        let input = host.find_all(container, "input")[0];
        host.fire_on_write(input, "value", "change");

        assert_eq!(
            instance.fire(&mut host, "bump"),
            Err(RuntimeError::UpdateLoop {
                component: "Mirror".to_string(),
                passes: 3
            })
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LIFECYCLE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_lifecycle_misuse_is_reported() {
        let program = program(counter(), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Counter").unwrap();
        let not_mounted: Result<(), RuntimeError> = Err(RuntimeError::NotMounted {
            component: "Counter".to_string(),
        });
        let already: Result<(), RuntimeError> = Err(RuntimeError::AlreadyMounted {
            component: "Counter".to_string(),
        });

        assert_eq!(instance.apply(&mut host, &[]), not_mounted);
        assert_eq!(instance.unmount(&mut host), not_mounted);

        instance.mount(&mut host, container, Props::new()).unwrap();
        assert_eq!(instance.mount(&mut host, container, Props::new()), already);

        instance.unmount(&mut host).unwrap();
        assert_eq!(instance.unmount(&mut host), not_mounted);
        assert_eq!(instance.fire(&mut host, "increment"), not_mounted);
        assert_eq!(
            instance.request_update(&mut host, &["counter".to_string()]),
            not_mounted
        );
        assert_eq!(instance.mount(&mut host, container, Props::new()), already);
    }

    #[test]
    fn test_unknown_component_and_handler() {
        let program = program(counter(), CompileOptions::default());
        assert!(matches!(
            program.instantiate("Missing"),
            Err(RuntimeError::UnknownComponent { .. })
        ));

        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Counter").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();

        let stranger = HandlerKey {
            instance: instance.id() + 10_000,
            handler: 0,
        };
        assert!(matches!(
            instance.dispatch(&mut host, stranger),
            Err(RuntimeError::UnknownHandler { .. })
        ));
        assert!(matches!(
            instance.fire(&mut host, "decrement"),
            Err(RuntimeError::UnknownHandler { .. })
        ));
    }

    #[test]
    fn test_missing_nested_component_fails_before_touching_host() {
        let irs: Vec<ComponentIR> = serde_json::from_value(json!([
            { "name": "Shell", "nodes": [
                { "type": "text", "value": "shell" },
                { "type": "component", "name": "Panel" }
            ] },
            { "name": "Panel", "nodes": [
                { "type": "element", "tag": "section" },
                { "type": "component", "name": "Missing" }
            ] }
        ]))
        .unwrap();
        let plans = irs
            .iter()
            .map(|ir| compile_component(ir, &CompileOptions::default()).unwrap().plan)
            .collect();
        let program = Program::new(plans, RuntimeOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut shell = program.instantiate("Shell").unwrap();

        for _ in 0..2 {
            match shell.mount(&mut host, container, Props::new()) {
                Err(RuntimeError::UnknownComponent { name }) => assert_eq!(name, "Missing"),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(!shell.is_mounted());
        assert!(host.calls().is_empty());
        assert!(host.children(container).is_empty());
    }

    #[test]
    fn test_instances_do_not_share_pending_state() {
        let program = program(counter(), CompileOptions::default());
        let mut host = MemoryHost::new();
        let first_root = host.container();
        let second_root = host.container();
        let mut first = program.instantiate("Counter").unwrap();
        let mut second = program.instantiate("Counter").unwrap();
        first.mount(&mut host, first_root, Props::new()).unwrap();
        second.mount(&mut host, second_root, Props::new()).unwrap();
        assert_ne!(first.id(), second.id());

        first.fire(&mut host, "increment").unwrap();
        first.fire(&mut host, "increment").unwrap();
        assert_eq!(host.texts(first_root), vec!["2"]);
        assert_eq!(host.texts(second_root), vec!["0"]);
        assert_eq!(second.stats().passes, 0);
    }

    #[test]
    fn test_fired_event_outside_tree_is_surfaced() {
        let program = program(mirror("echoes = level"), CompileOptions::default());
        let mut host = MemoryHost::new();
        let container = host.container();
        let mut instance = program.instantiate("Mirror").unwrap();
        instance.mount(&mut host, container, Props::new()).unwrap();
        let input = host.find_all(container, "input")[0];

        // A foreign handler subscribed on the same input.
        let foreign = HandlerKey {
            instance: instance.id() + 10_000,
            handler: 3,
        };
        host.subscribe(input, "focus", foreign);
        host.fire_on_write(input, "value", "focus");

        instance.fire(&mut host, "bump").unwrap();
        assert_eq!(instance.take_unowned_events(), vec![foreign]);
        assert!(instance.take_unowned_events().is_empty());
    }
}
