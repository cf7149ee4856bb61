use crate::graph::{find_cycle, DeclarationModel};
use crate::validate::CompileError;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Order derived declarations so that every derived producer precedes its
/// consumers. Independent declarations keep source order.
///
/// Returns indices into `model.derived`.
pub fn schedule(model: &DeclarationModel) -> Result<Vec<usize>, CompileError> {
    let count = model.derived.len();
    let index: HashMap<&str, usize> = model
        .derived
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; count];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (i, decl) in model.derived.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &decl.dependencies {
            if let Some(&producer) = index.get(dep.as_str()) {
                if seen.insert(producer) {
                    in_degree[i] += 1;
                    consumers[producer].push(i);
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &consumer in &consumers[i] {
            in_degree[consumer] -= 1;
            if in_degree[consumer] == 0 {
                ready.push(Reverse(consumer));
            }
        }
    }

    if order.len() < count {
        let cycle = find_cycle(&model.derived).unwrap_or_else(|| {
            (0..count)
                .filter(|i| !order.contains(i))
                .map(|i| model.derived[i].name.clone())
                .collect()
        });
        return Err(CompileError::CyclicDependency { cycle });
    }

    verify_order(model, &order)?;
    tracing::debug!(
        component = %model.component,
        order = ?order.iter().map(|&i| model.derived[i].name.as_str()).collect::<Vec<_>>(),
        "scheduled derived declarations"
    );
    Ok(order)
}

/// Every declaration may only read state or declarations placed before it.
pub fn verify_order(model: &DeclarationModel, order: &[usize]) -> Result<(), CompileError> {
    let mut available: HashSet<&str> = model.states.iter().map(|s| s.name.as_str()).collect();
    for &i in order {
        let decl = &model.derived[i];
        if let Some(missing) = decl
            .dependencies
            .iter()
            .find(|dep| !available.contains(dep.as_str()))
        {
            let mut cycle = vec![decl.name.clone()];
            if missing != &decl.name {
                cycle.push(missing.clone());
            }
            return Err(CompileError::CyclicDependency { cycle });
        }
        available.insert(decl.name.as_str());
    }
    Ok(())
}
