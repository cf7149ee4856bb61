//! Rust execution of compiled component plans.
//!
//! Each `ComponentInstance` owns its batching state (`pending`, `flushing`),
//! its host nodes and subscriptions, and its nested instances. All work is
//! synchronous; the `flushing` flag only suppresses re-entrant passes.

use crate::eval::{execute, Evaluator, Value};
use crate::host::{HandlerKey, HostNode, HostTree, InstanceId, Subscription};
use crate::lifecycle::{BindingTarget, ChildPropValue, ComponentPlan, HandlerRef, NodeKind, Placement};
use crate::options::{ReentrancyPolicy, RuntimeOptions, TeardownPolicy};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    AlreadyMounted { component: String },
    NotMounted { component: String },
    UnknownComponent { name: String },
    UnknownHandler { handler: String },
    UpdateLoop { component: String, passes: u32 },
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyMounted { component } => {
                write!(f, "<{}> has already been mounted", component)
            }
            Self::NotMounted { component } => write!(f, "<{}> is not mounted", component),
            Self::UnknownComponent { name } => write!(f, "No compiled component named <{}>", name),
            Self::UnknownHandler { handler } => {
                write!(f, "No mounted instance owns handler {}", handler)
            }
            Self::UpdateLoop { component, passes } => write!(
                f,
                "<{}> kept requesting updates after {} extra passes",
                component, passes
            ),
        }
    }
}

impl std::error::Error for RuntimeError {}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRAM
// ═══════════════════════════════════════════════════════════════════════════════

/// A value or callback handed from a parent to a child.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Value(Value),
    Callback(HandlerKey),
}

impl From<Value> for PropValue {
    fn from(v: Value) -> Self {
        PropValue::Value(v)
    }
}

pub type Props = BTreeMap<String, PropValue>;

type Registry = HashMap<String, Arc<ComponentPlan>>;

/// A set of compiled components that can instantiate one another.
#[derive(Debug, Clone)]
pub struct Program {
    registry: Arc<Registry>,
    options: RuntimeOptions,
}

impl Program {
    pub fn new(plans: Vec<ComponentPlan>, options: RuntimeOptions) -> Self {
        let registry = plans
            .into_iter()
            .map(|p| (p.name.clone(), Arc::new(p)))
            .collect();
        Self {
            registry: Arc::new(registry),
            options,
        }
    }

    /// Factory: a fresh, unmounted instance of `name`.
    pub fn instantiate(&self, name: &str) -> Result<ComponentInstance, RuntimeError> {
        let plan = self
            .registry
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownComponent {
                name: name.to_string(),
            })?;
        Ok(ComponentInstance::new(
            Arc::clone(plan),
            Arc::clone(&self.registry),
            self.options,
        ))
    }

    pub fn exported(&self, name: &str) -> Option<Vec<String>> {
        self.registry.get(name).map(|p| p.exported())
    }

    pub fn plan(&self, name: &str) -> Option<&ComponentPlan> {
        self.registry.get(name).map(Arc::as_ref)
    }
}

/// Every component reachable from `plan` must be registered before any host
/// node is created.
fn check_tree(
    registry: &Registry,
    plan: &ComponentPlan,
    seen: &mut HashSet<String>,
) -> Result<(), RuntimeError> {
    for child in &plan.children {
        let child_plan = registry
            .get(&child.component)
            .ok_or_else(|| RuntimeError::UnknownComponent {
                name: child.component.clone(),
            })?;
        if seen.insert(child.component.clone()) {
            check_tree(registry, child_plan, seen)?;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Mounted,
    Unmounted,
}

/// Counters for observing an instance from tests and tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceStats {
    pub mounts: u32,
    pub prop_updates: u32,
    /// Derived passes run after mount.
    pub passes: u32,
    pub binding_writes: u32,
}

pub struct ComponentInstance {
    id: InstanceId,
    plan: Arc<ComponentPlan>,
    registry: Arc<Registry>,
    options: RuntimeOptions,
    state: LifecycleState,
    values: HashMap<String, Value>,
    pending: BTreeSet<String>,
    flushing: bool,
    container: Option<HostNode>,
    nodes: Vec<HostNode>,
    /// Nodes this instance appended to its container.
    roots: Vec<HostNode>,
    subscriptions: Vec<Subscription>,
    children: Vec<ComponentInstance>,
    callbacks: HashMap<String, HandlerKey>,
    /// Fired handlers this instance's subtree does not own.
    outbox: Vec<HandlerKey>,
    stats: InstanceStats,
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("component", &self.plan.name)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("children", &self.children.len())
            .finish()
    }
}

impl ComponentInstance {
    fn new(plan: Arc<ComponentPlan>, registry: Arc<Registry>, options: RuntimeOptions) -> Self {
        Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            plan,
            registry,
            options,
            state: LifecycleState::Created,
            values: HashMap::new(),
            pending: BTreeSet::new(),
            flushing: false,
            container: None,
            nodes: Vec::new(),
            roots: Vec::new(),
            subscriptions: Vec::new(),
            children: Vec::new(),
            callbacks: HashMap::new(),
            outbox: Vec::new(),
            stats: InstanceStats::default(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn component(&self) -> &str {
        &self.plan.name
    }

    pub fn is_mounted(&self) -> bool {
        self.state == LifecycleState::Mounted
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Prop names this component accepts from a parent.
    pub fn exported(&self) -> Vec<String> {
        self.plan.exported()
    }

    pub fn stats(&self) -> InstanceStats {
        self.stats
    }

    /// Names buffered for the next propagation pass.
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    pub fn child(&self, index: usize) -> Option<&ComponentInstance> {
        self.children.get(index)
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut ComponentInstance> {
        self.children.get_mut(index)
    }

    pub fn children_len(&self) -> usize {
        self.children.len()
    }

    pub fn handler_key(&self, handler: &str) -> Option<HandlerKey> {
        self.plan.handler_index(handler).map(|handler| HandlerKey {
            instance: self.id,
            handler,
        })
    }

    fn ensure_mounted(&self) -> Result<(), RuntimeError> {
        if self.is_mounted() {
            Ok(())
        } else {
            Err(RuntimeError::NotMounted {
                component: self.plan.name.clone(),
            })
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // mount
    // ───────────────────────────────────────────────────────────────────────────

    pub fn mount(
        &mut self,
        host: &mut dyn HostTree,
        container: HostNode,
        props: Props,
    ) -> Result<(), RuntimeError> {
        if self.state != LifecycleState::Created {
            return Err(RuntimeError::AlreadyMounted {
                component: self.plan.name.clone(),
            });
        }
        let plan = Arc::clone(&self.plan);

        let mut seen = HashSet::new();
        check_tree(&self.registry, &plan, &mut seen)?;
        let mut child_plans = Vec::with_capacity(plan.children.len());
        for child in &plan.children {
            let child_plan = self.registry.get(&child.component).ok_or_else(|| {
                RuntimeError::UnknownComponent {
                    name: child.component.clone(),
                }
            })?;
            child_plans.push(Arc::clone(child_plan));
        }

        for (name, prop) in props {
            match prop {
                PropValue::Value(v) if plan.props.contains(&name) => {
                    self.values.insert(name, v);
                }
                PropValue::Callback(key) if plan.callbacks.contains(&name) => {
                    self.callbacks.insert(name, key);
                }
                _ => tracing::warn!(component = %plan.name, prop = %name, "ignoring prop the component does not accept"),
            }
        }
        for state in &plan.states {
            if !self.values.contains_key(&state.name) {
                let v = Evaluator::new(&self.values).eval(&state.init);
                self.values.insert(state.name.clone(), v);
            }
        }
        for step in &plan.derived {
            let v = Evaluator::new(&self.values).eval(&step.body);
            self.values.insert(step.name.clone(), v);
        }

        for node in &plan.nodes {
            let handle = match &node.kind {
                NodeKind::Element { tag, attributes } => {
                    let el = host.create_element_node(tag);
                    for (name, value) in attributes {
                        host.set_attribute(el, name, value);
                    }
                    el
                }
                NodeKind::Text { value } => host.create_text_node(value),
            };
            self.nodes.push(handle);
        }
        for binding in &plan.bindings {
            let value = Evaluator::new(&self.values).eval(&binding.expr).to_js_string();
            self.write(host, binding.node, &binding.target, &value);
        }
        for event in &plan.events {
            let key = match &event.handler {
                HandlerRef::Local { index } => HandlerKey {
                    instance: self.id,
                    handler: *index,
                },
                HandlerRef::Callback { name } => match self.callbacks.get(name) {
                    Some(key) => *key,
                    None => {
                        tracing::warn!(component = %plan.name, callback = %name, "callback prop not provided, event left unbound");
                        continue;
                    }
                },
            };
            let sub = host.subscribe(self.nodes[event.node], &event.event, key);
            self.subscriptions.push(sub);
        }

        self.container = Some(container);
        self.place(host, container, &child_plans)?;

        self.state = LifecycleState::Mounted;
        self.stats.mounts += 1;
        tracing::debug!(component = %plan.name, instance = self.id, "mounted");
        Ok(())
    }

    /// Attach nodes and mount nested instances in template document order.
    fn place(
        &mut self,
        host: &mut dyn HostTree,
        container: HostNode,
        child_plans: &[Arc<ComponentPlan>],
    ) -> Result<(), RuntimeError> {
        let plan = Arc::clone(&self.plan);
        for placement in &plan.placements {
            match *placement {
                Placement::Node { index } => match plan.nodes[index].parent {
                    Some(p) => host.append_child(self.nodes[p], self.nodes[index]),
                    None => {
                        host.append_child(container, self.nodes[index]);
                        self.roots.push(self.nodes[index]);
                    }
                },
                Placement::Child { index } => {
                    let target = plan.children[index]
                        .parent
                        .map(|p| self.nodes[p])
                        .unwrap_or(container);
                    let props = self.child_props(index, None);
                    let mut child = ComponentInstance::new(
                        Arc::clone(&child_plans[index]),
                        Arc::clone(&self.registry),
                        self.options,
                    );
                    child.mount(host, target, props)?;
                    self.children.push(child);
                }
            }
        }
        Ok(())
    }

    /// Props of child `index`; with `changed`, only the props it affects.
    fn child_props(&self, index: usize, changed: Option<&BTreeSet<String>>) -> Props {
        let mut props = Props::new();
        for prop in &self.plan.children[index].props {
            match &prop.value {
                ChildPropValue::Expression {
                    expr, dependencies, ..
                } => {
                    if let Some(changed) = changed {
                        if !dependencies.iter().any(|d| changed.contains(d)) {
                            continue;
                        }
                    }
                    let v = Evaluator::new(&self.values).eval(expr);
                    props.insert(prop.name.clone(), PropValue::Value(v));
                }
                ChildPropValue::Callback { handler } => {
                    if changed.is_some() {
                        continue;
                    }
                    let key = match handler {
                        HandlerRef::Local { index } => Some(HandlerKey {
                            instance: self.id,
                            handler: *index,
                        }),
                        HandlerRef::Callback { name } => self.callbacks.get(name).copied(),
                    };
                    if let Some(key) = key {
                        props.insert(prop.name.clone(), PropValue::Callback(key));
                    }
                }
            }
        }
        props
    }

    fn write(&mut self, host: &mut dyn HostTree, node: usize, target: &BindingTarget, value: &str) {
        let handle = self.nodes[node];
        match target {
            BindingTarget::Text => host.set_text_value(handle, value),
            BindingTarget::Attribute { name } => host.set_attribute(handle, name, value),
        }
        self.stats.binding_writes += 1;
    }

    // ───────────────────────────────────────────────────────────────────────────
    // apply / requestUpdate
    // ───────────────────────────────────────────────────────────────────────────

    /// Binding-update step: rewrite every binding whose dependencies
    /// intersect `changed` and forward changed props to nested instances.
    pub fn apply(&mut self, host: &mut dyn HostTree, changed: &[String]) -> Result<(), RuntimeError> {
        self.ensure_mounted()?;
        let changed: BTreeSet<String> = changed.iter().cloned().collect();
        self.apply_changes(host, &changed)
    }

    fn apply_changes(&mut self, host: &mut dyn HostTree, changed: &BTreeSet<String>) -> Result<(), RuntimeError> {
        let plan = Arc::clone(&self.plan);
        for binding in &plan.bindings {
            if binding.dependencies.iter().any(|d| changed.contains(d)) {
                let value = Evaluator::new(&self.values).eval(&binding.expr).to_js_string();
                self.write(host, binding.node, &binding.target, &value);
            }
        }
        for index in 0..self.children.len() {
            let props = self.child_props(index, Some(changed));
            if props.is_empty() || !self.children[index].is_mounted() {
                continue;
            }
            self.children[index].update_props(host, props)?;
            self.collect_outbox(host, index)?;
        }
        Ok(())
    }

    /// Prop-update entry point used by a parent.
    ///
    /// Only value props are taken. Callback props are bound to subscriptions
    /// at mount and stay fixed for the life of the instance.
    pub fn update_props(&mut self, host: &mut dyn HostTree, props: Props) -> Result<(), RuntimeError> {
        self.ensure_mounted()?;
        self.stats.prop_updates += 1;
        let mut names = Vec::new();
        for (name, prop) in props {
            match prop {
                PropValue::Value(v) if self.plan.props.contains(&name) => {
                    self.values.insert(name.clone(), v);
                    names.push(name);
                }
                PropValue::Callback(_) if self.plan.callbacks.contains(&name) => {
                    tracing::warn!(component = %self.plan.name, prop = %name, "callback props are fixed at mount, ignoring new handler");
                }
                _ => tracing::warn!(component = %self.plan.name, prop = %name, "ignoring prop the component does not accept"),
            }
        }
        if names.is_empty() {
            return Ok(());
        }
        self.request_update(host, &names)
    }

    /// Set a state variable without scheduling a pass.
    pub fn assign(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn request_update(&mut self, host: &mut dyn HostTree, names: &[String]) -> Result<(), RuntimeError> {
        self.ensure_mounted()?;
        self.pending.extend(names.iter().cloned());
        if self.flushing {
            return Ok(());
        }
        self.flush(host)
    }

    fn flush(&mut self, host: &mut dyn HostTree) -> Result<(), RuntimeError> {
        self.flushing = true;
        let mut redrains = 0u32;
        let result = loop {
            let mut changed = std::mem::take(&mut self.pending);
            self.run_derived_pass(&mut changed);
            self.stats.passes += 1;
            tracing::trace!(component = %self.plan.name, changed = ?changed, "propagation pass");

            if let Err(err) = self.apply_changes(host, &changed) {
                break Err(err);
            }
            if let Err(err) = self.drain_fired(host) {
                break Err(err);
            }

            if self.pending.is_empty() {
                break Ok(());
            }
            match self.options.reentrancy {
                ReentrancyPolicy::Buffer => {
                    tracing::warn!(
                        component = %self.plan.name,
                        buffered = ?self.pending,
                        "updates requested during apply stay buffered until the next trigger"
                    );
                    break Ok(());
                }
                ReentrancyPolicy::Redrain => {
                    redrains += 1;
                    if redrains > self.options.max_redrain_passes {
                        break Err(RuntimeError::UpdateLoop {
                            component: self.plan.name.clone(),
                            passes: self.options.max_redrain_passes,
                        });
                    }
                }
            }
        };
        self.flushing = false;
        result
    }

    /// One forward pass over derived declarations in scheduled order.
    pub(crate) fn run_derived_pass(&mut self, changed: &mut BTreeSet<String>) {
        let plan = Arc::clone(&self.plan);
        for step in &plan.derived {
            if step.dependencies.iter().any(|d| changed.contains(d)) {
                let v = Evaluator::new(&self.values).eval(&step.body);
                self.values.insert(step.name.clone(), v);
                changed.insert(step.name.clone());
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // events
    // ───────────────────────────────────────────────────────────────────────────

    fn owns(&self, key: HandlerKey) -> bool {
        key.instance == self.id || self.children.iter().any(|c| c.owns(key))
    }

    /// Run the handler addressed by `key` on the instance in this tree that
    /// owns it. The handler's requested names are flushed once.
    pub fn dispatch(&mut self, host: &mut dyn HostTree, key: HandlerKey) -> Result<(), RuntimeError> {
        self.ensure_mounted()?;
        if key.instance == self.id {
            let plan = Arc::clone(&self.plan);
            let handler = plan
                .handlers
                .get(key.handler)
                .ok_or_else(|| RuntimeError::UnknownHandler {
                    handler: key.to_string(),
                })?;
            tracing::trace!(component = %plan.name, handler = %handler.name, "dispatch");
            let mut requested = Vec::new();
            execute(&handler.body, &mut self.values, &mut requested);
            return self.request_update(host, &requested);
        }

        let index = self
            .children
            .iter()
            .position(|c| c.owns(key))
            .ok_or_else(|| RuntimeError::UnknownHandler {
                handler: key.to_string(),
            })?;
        self.children[index].dispatch(host, key)?;
        self.collect_outbox(host, index)
    }

    /// Dispatch a host event by handler name on this instance.
    pub fn fire(&mut self, host: &mut dyn HostTree, handler: &str) -> Result<(), RuntimeError> {
        let key = self
            .handler_key(handler)
            .ok_or_else(|| RuntimeError::UnknownHandler {
                handler: format!("{} of <{}>", handler, self.plan.name),
            })?;
        self.dispatch(host, key)
    }

    fn route(&mut self, host: &mut dyn HostTree, key: HandlerKey) -> Result<(), RuntimeError> {
        if self.owns(key) {
            self.dispatch(host, key)
        } else {
            self.outbox.push(key);
            Ok(())
        }
    }

    fn drain_fired(&mut self, host: &mut dyn HostTree) -> Result<(), RuntimeError> {
        for key in host.take_fired_events() {
            self.route(host, key)?;
        }
        Ok(())
    }

    fn collect_outbox(&mut self, host: &mut dyn HostTree, index: usize) -> Result<(), RuntimeError> {
        let keys = std::mem::take(&mut self.children[index].outbox);
        for key in keys {
            self.route(host, key)?;
        }
        Ok(())
    }

    /// Fired handlers no instance in this tree owns.
    pub fn take_unowned_events(&mut self) -> Vec<HandlerKey> {
        std::mem::take(&mut self.outbox)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // unmount
    // ───────────────────────────────────────────────────────────────────────────

    pub fn unmount(&mut self, host: &mut dyn HostTree) -> Result<(), RuntimeError> {
        self.ensure_mounted()?;
        for sub in self.subscriptions.drain(..).rev() {
            host.unsubscribe(sub);
        }

        if let Some(container) = self.container.take() {
            for node in self.roots.drain(..).rev() {
                host.remove_child(container, node);
            }
        }
        self.nodes.clear();

        if self.options.teardown == TeardownPolicy::Recursive {
            for child in self.children.iter_mut().rev() {
                if child.is_mounted() {
                    child.unmount(host)?;
                }
            }
        }

        self.pending.clear();
        self.state = LifecycleState::Unmounted;
        tracing::debug!(component = %self.plan.name, instance = self.id, "unmounted");
        Ok(())
    }
}
