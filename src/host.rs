//! Host UI-tree interface and an in-memory recording host.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Stable identifier of a component instance.
pub type InstanceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostNode(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(pub u64);

/// Addresses one entry of one instance's handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerKey {
    pub instance: InstanceId,
    pub handler: usize,
}

impl std::fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}:{}", self.instance, self.handler)
    }
}

/// Host primitives the runtime drives.
pub trait HostTree {
    fn create_element_node(&mut self, tag: &str) -> HostNode;
    fn create_text_node(&mut self, value: &str) -> HostNode;
    fn append_child(&mut self, parent: HostNode, child: HostNode);
    fn remove_child(&mut self, parent: HostNode, child: HostNode);
    fn set_attribute(&mut self, node: HostNode, name: &str, value: &str);
    fn set_text_value(&mut self, node: HostNode, value: &str);
    fn subscribe(&mut self, node: HostNode, event: &str, handler: HandlerKey) -> Subscription;
    fn unsubscribe(&mut self, subscription: Subscription);

    /// Handlers of events the host fired synchronously while being mutated.
    fn take_fired_events(&mut self) -> Vec<HandlerKey> {
        Vec::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY HOST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    CreateElement { node: HostNode, tag: String },
    CreateText { node: HostNode, value: String },
    Append { parent: HostNode, child: HostNode },
    Remove { parent: HostNode, child: HostNode },
    SetAttribute { node: HostNode, name: String, value: String },
    SetText { node: HostNode, value: String },
    Subscribe { subscription: Subscription, node: HostNode, event: String },
    Unsubscribe { subscription: Subscription },
}

#[derive(Debug, Default)]
struct MemoryNode {
    tag: Option<String>,
    text: String,
    attributes: BTreeMap<String, String>,
    children: Vec<HostNode>,
}

/// In-memory host that records every call.
#[derive(Debug, Default)]
pub struct MemoryHost {
    next_id: u64,
    nodes: HashMap<HostNode, MemoryNode>,
    live: BTreeMap<Subscription, (HostNode, String, HandlerKey)>,
    calls: Vec<HostCall>,
    /// Attribute writes on a node fire the named event.
    triggers: HashSet<(HostNode, String, String)>,
    fired: Vec<HandlerKey>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detached element to mount components into.
    pub fn container(&mut self) -> HostNode {
        let node = self.alloc(Some("root".to_string()), String::new());
        self.calls.clear();
        node
    }

    fn alloc(&mut self, tag: Option<String>, text: String) -> HostNode {
        self.next_id += 1;
        let node = HostNode(self.next_id);
        self.nodes.insert(
            node,
            MemoryNode {
                tag,
                text,
                ..Default::default()
            },
        );
        node
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn children(&self, node: HostNode) -> Vec<HostNode> {
        self.nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: HostNode) -> Option<&str> {
        self.nodes.get(&node).and_then(|n| n.tag.as_deref())
    }

    pub fn attribute(&self, node: HostNode, name: &str) -> Option<&str> {
        self.nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name))
            .map(String::as_str)
    }

    /// Values of every text node under `root`, in document order.
    pub fn texts(&self, root: HostNode) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_texts(root, &mut out);
        out
    }

    fn collect_texts(&self, node: HostNode, out: &mut Vec<String>) {
        let Some(n) = self.nodes.get(&node) else {
            return;
        };
        if n.tag.is_none() {
            out.push(n.text.clone());
        }
        for child in &n.children {
            self.collect_texts(*child, out);
        }
    }

    pub fn text_content(&self, root: HostNode) -> String {
        self.texts(root).concat()
    }

    /// Elements with the given tag under `root`, in document order.
    pub fn find_all(&self, root: HostNode, tag: &str) -> Vec<HostNode> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Some(n) = self.nodes.get(&node) {
                if n.tag.as_deref() == Some(tag) && node != root {
                    out.push(node);
                }
                stack.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn live_subscriptions(&self) -> usize {
        self.live.len()
    }

    /// Handlers subscribed to `event` on `node`, in subscription order.
    pub fn handlers_for(&self, node: HostNode, event: &str) -> Vec<HandlerKey> {
        self.live
            .values()
            .filter(|(n, e, _)| *n == node && e == event)
            .map(|(_, _, key)| *key)
            .collect()
    }

    /// Make every write of `attribute` on `node` fire `event` synchronously.
    pub fn fire_on_write(&mut self, node: HostNode, attribute: &str, event: &str) {
        self.triggers
            .insert((node, attribute.to_string(), event.to_string()));
    }

    pub fn count(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl HostTree for MemoryHost {
    fn create_element_node(&mut self, tag: &str) -> HostNode {
        let node = self.alloc(Some(tag.to_string()), String::new());
        self.calls.push(HostCall::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text_node(&mut self, value: &str) -> HostNode {
        let node = self.alloc(None, value.to_string());
        self.calls.push(HostCall::CreateText {
            node,
            value: value.to_string(),
        });
        node
    }

    fn append_child(&mut self, parent: HostNode, child: HostNode) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(child);
        }
        self.calls.push(HostCall::Append { parent, child });
    }

    fn remove_child(&mut self, parent: HostNode, child: HostNode) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        self.calls.push(HostCall::Remove { parent, child });
    }

    fn set_attribute(&mut self, node: HostNode, name: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
        self.calls.push(HostCall::SetAttribute {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });

        let events: Vec<String> = self
            .triggers
            .iter()
            .filter(|(n, attr, _)| *n == node && attr == name)
            .map(|(_, _, event)| event.clone())
            .collect();
        for event in events {
            let keys = self.handlers_for(node, &event);
            self.fired.extend(keys);
        }
    }

    fn set_text_value(&mut self, node: HostNode, value: &str) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.text = value.to_string();
        }
        self.calls.push(HostCall::SetText {
            node,
            value: value.to_string(),
        });
    }

    fn subscribe(&mut self, node: HostNode, event: &str, handler: HandlerKey) -> Subscription {
        self.next_id += 1;
        let subscription = Subscription(self.next_id);
        self.live
            .insert(subscription, (node, event.to_string(), handler));
        self.calls.push(HostCall::Subscribe {
            subscription,
            node,
            event: event.to_string(),
        });
        subscription
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        self.live.remove(&subscription);
        self.calls.push(HostCall::Unsubscribe { subscription });
    }

    fn take_fired_events(&mut self) -> Vec<HandlerKey> {
        std::mem::take(&mut self.fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_host_tracks_tree_and_subscriptions() {
        let mut host = MemoryHost::new();
        let root = host.container();
        let p = host.create_element_node("p");
        let text = host.create_text_node("hi");
        host.append_child(p, text);
        host.append_child(root, p);
        assert_eq!(host.tag(p), Some("p"));
        assert_eq!(host.text_content(root), "hi");

        host.set_text_value(text, "bye");
        assert_eq!(host.text_content(root), "bye");

        let key = HandlerKey {
            instance: 1,
            handler: 0,
        };
        let sub = host.subscribe(p, "click", key);
        assert_eq!(host.handlers_for(p, "click"), vec![key]);
        host.unsubscribe(sub);
        assert_eq!(host.live_subscriptions(), 0);

        host.remove_child(root, p);
        assert!(host.children(root).is_empty());
        assert_eq!(host.count(|c| matches!(c, HostCall::Remove { .. })), 1);
    }

    #[test]
    fn test_attribute_write_fires_subscribed_handlers() {
        let mut host = MemoryHost::new();
        let input = host.create_element_node("input");
        let key = HandlerKey {
            instance: 7,
            handler: 2,
        };
        host.subscribe(input, "change", key);
        host.fire_on_write(input, "value", "change");

        host.set_attribute(input, "placeholder", "name");
        assert!(host.take_fired_events().is_empty());
        host.set_attribute(input, "value", "x");
        assert_eq!(host.take_fired_events(), vec![key]);
        assert_eq!(key.to_string(), "#7:2");
    }
}
