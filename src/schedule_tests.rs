//! Scheduler properties over generated declaration graphs.

#[cfg(test)]
mod tests {
    use crate::expression::Expr;
    use crate::graph::{DeclarationModel, DerivedDecl, StateDecl};
    use crate::schedule::{schedule, verify_order};
    use crate::validate::CompileError;
    use proptest::prelude::*;

    fn model(derived: Vec<DerivedDecl>) -> DeclarationModel {
        DeclarationModel {
            component: "Generated".to_string(),
            states: vec![StateDecl {
                name: "s".to_string(),
                init: Expr::Number { value: 0.0 },
            }],
            derived,
            ..Default::default()
        }
    }

    fn decl(name: String, dependencies: Vec<String>) -> DerivedDecl {
        DerivedDecl {
            name,
            body: Expr::Undefined,
            dependencies,
        }
    }

    /// Declarations `d0..dn` where `d{r}` may depend on any `d{j}` with
    /// `j < r`, listed in a shuffled source order.
    fn acyclic() -> impl Strategy<Value = Vec<DerivedDecl>> {
        (1usize..12).prop_flat_map(|n| {
            (
                proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            )
                .prop_map(move |(edges, source_order)| {
                    source_order
                        .into_iter()
                        .map(|rank| {
                            let mut deps: Vec<String> = (0..rank)
                                .filter(|&j| edges[rank][j])
                                .map(|j| format!("d{}", j))
                                .collect();
                            if edges[rank][rank] {
                                deps.push("s".to_string());
                            }
                            decl(format!("d{}", rank), deps)
                        })
                        .collect()
                })
        })
    }

    /// A chain `d0 <- d1 <- ... <- d{n-1}` closed by `d0` depending on
    /// `d{n-1}`, plus random extra edges.
    fn cyclic() -> impl Strategy<Value = Vec<DerivedDecl>> {
        (1usize..10).prop_flat_map(|n| {
            (
                proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n),
                Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            )
                .prop_map(move |(edges, source_order)| {
                    source_order
                        .into_iter()
                        .map(|rank| {
                            let mut deps = vec![format!("d{}", (rank + n - 1) % n)];
                            for j in 0..n {
                                let name = format!("d{}", j);
                                if edges[rank][j] && !deps.contains(&name) {
                                    deps.push(name);
                                }
                            }
                            decl(format!("d{}", rank), deps)
                        })
                        .collect()
                })
        })
    }

    proptest! {
        #[test]
        fn prop_order_places_producers_first(derived in acyclic()) {
            let model = model(derived);
            let order = schedule(&model).unwrap();

            let mut sorted = order.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..model.derived.len()).collect::<Vec<_>>());

            for (pos, &i) in order.iter().enumerate() {
                for dep in &model.derived[i].dependencies {
                    if let Some(producer) = model.derived_index(dep) {
                        let before = order[..pos].contains(&producer);
                        prop_assert!(before, "{} scheduled before {}", model.derived[i].name, dep);
                    }
                }
            }
            prop_assert!(verify_order(&model, &order).is_ok());
        }

        #[test]
        fn prop_cycles_are_always_rejected(derived in cyclic()) {
            let model = model(derived);
            match schedule(&model) {
                Err(CompileError::CyclicDependency { cycle }) => {
                    prop_assert!(!cycle.is_empty());
                    // Each member depends on the next; the last closes the loop.
                    for (k, name) in cycle.iter().enumerate() {
                        let next = &cycle[(k + 1) % cycle.len()];
                        let i = model.derived_index(name).unwrap();
                        prop_assert!(model.derived[i].dependencies.contains(next));
                    }
                }
                other => prop_assert!(false, "expected a cycle, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_independent_declarations_keep_source_order() {
        let model = model(vec![
            decl("b".to_string(), vec!["s".to_string()]),
            decl("a".to_string(), vec!["s".to_string()]),
            decl("c".to_string(), vec!["a".to_string()]),
        ]);
        assert_eq!(schedule(&model).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_consumer_listed_first_is_moved_after_producer() {
        let model = model(vec![
            decl("quadruple".to_string(), vec!["double".to_string()]),
            decl("double".to_string(), vec!["s".to_string()]),
        ]);
        assert_eq!(schedule(&model).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_verify_order_rejects_consumer_first() {
        let model = model(vec![
            decl("quadruple".to_string(), vec!["double".to_string()]),
            decl("double".to_string(), vec!["s".to_string()]),
        ]);
        assert!(matches!(
            verify_order(&model, &[0, 1]),
            Err(CompileError::CyclicDependency { .. })
        ));
    }
}
