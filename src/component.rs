use crate::validate::{ComponentIR, ComponentNode, CompileError, PropValueIR};
use crate::visitor::{nested_components, TemplateVisitor};
use std::collections::HashMap;

/// Components of one program, looked up by name.
pub struct ComponentRegistry<'a> {
    components: HashMap<&'a str, &'a ComponentIR>,
}

impl<'a> ComponentRegistry<'a> {
    pub fn new(components: &'a [ComponentIR]) -> Self {
        Self {
            components: components.iter().map(|c| (c.name.as_str(), c)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a ComponentIR> {
        self.components.get(name).copied()
    }

    /// Prop names a component accepts from a parent.
    pub fn exported(&self, name: &str) -> Option<Vec<String>> {
        self.get(name)
            .map(|c| c.props.iter().chain(c.callbacks.iter()).cloned().collect())
    }
}

struct InstanceCollector(Vec<ComponentNode>);

impl TemplateVisitor for InstanceCollector {
    fn visit_component(&mut self, component: &ComponentNode) {
        self.0.push(component.clone());
    }
}

/// Check every nested instance against the component it names.
pub fn validate_composition(components: &[ComponentIR]) -> Result<(), CompileError> {
    let registry = ComponentRegistry::new(components);

    for parent in components {
        let mut collector = InstanceCollector(Vec::new());
        collector.visit_root(parent);

        for instance in &collector.0 {
            let child = registry
                .get(&instance.name)
                .ok_or_else(|| CompileError::UnknownComponent {
                    name: instance.name.clone(),
                    parent: parent.name.clone(),
                })?;

            for prop in &instance.props {
                let accepted = match &prop.value {
                    PropValueIR::Callback(_) => child.callbacks.contains(&prop.name),
                    PropValueIR::Expression(_) | PropValueIR::Static(_) => {
                        child.props.contains(&prop.name)
                    }
                };
                if !accepted {
                    return Err(CompileError::UnknownProp {
                        component: child.name.clone(),
                        prop: prop.name.clone(),
                        parent: parent.name.clone(),
                    });
                }
            }
        }
    }

    check_recursion(&registry, components)
}

fn check_recursion(registry: &ComponentRegistry, components: &[ComponentIR]) -> Result<(), CompileError> {
    fn visit(
        name: &str,
        registry: &ComponentRegistry,
        chain: &mut Vec<String>,
        done: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        if let Some(start) = chain.iter().position(|c| c == name) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(name.to_string());
            return Err(CompileError::RecursiveComposition { chain: cycle });
        }
        if done.iter().any(|d| d == name) {
            return Ok(());
        }
        let Some(component) = registry.get(name) else {
            return Ok(());
        };

        chain.push(name.to_string());
        for nested in nested_components(component) {
            visit(&nested, registry, chain, done)?;
        }
        chain.pop();
        done.push(name.to_string());
        Ok(())
    }

    let mut done = Vec::new();
    for component in components {
        visit(&component.name, registry, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}
