//! Dependency ordering for the listeners connected to one pump.
//!
//! Each listener may declare names it must run `after` and names it must run
//! `before`. Names need not be connected yet: a constraint on an absent
//! listener still links the two sides transitively, so `a before x` and
//! `b after x` order `a` ahead of `b` even while `x` is unknown.
//!
//! The connected listeners are kept in their resolved dispatch order. A new
//! registration is validated against that fixed order before anything is
//! mutated: it is rejected if it closes a cycle, or if honouring it would
//! move a listener that is already connected. Otherwise it is inserted
//! immediately ahead of its first connected successor, or appended when it
//! has none, so unconstrained listeners keep their insertion order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use crate::error::ListenError;
use crate::pump::Registration;

/// Resolved dispatch order for one pump.
#[derive(Default)]
pub(crate) struct ListenerOrder {
    entries: Vec<Rc<Registration>>,
}

impl ListenerOrder {
    /// Registrations in dispatch order.
    pub(crate) fn entries(&self) -> &[Rc<Registration>] {
        &self.entries
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_owned()).collect()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name() == name)
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Rc<Registration>> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// Validates and inserts `candidate`, leaving the order untouched on error.
    pub(crate) fn insert(
        &mut self,
        pump: &str,
        candidate: Rc<Registration>,
    ) -> Result<(), ListenError> {
        let name = candidate.name().to_owned();
        if self.contains(&name) {
            return Err(ListenError::DupListenerName {
                pump: pump.to_owned(),
                listener: name,
            });
        }

        let position = {
            let graph = Graph::build(
                self.entries
                    .iter()
                    .map(AsRef::as_ref)
                    .chain(std::iter::once(candidate.as_ref())),
            );
            if let Some(cycle) = graph.cycle_through(&name) {
                return Err(ListenError::Cycle {
                    pump: pump.to_owned(),
                    listener: name,
                    cycle,
                });
            }

            let ancestors = graph.reachable(&name, Direction::Backward);
            let descendants = graph.reachable(&name, Direction::Forward);
            let last_ancestor = self
                .entries
                .iter()
                .rposition(|e| ancestors.contains(e.name()));
            let first_descendant = self
                .entries
                .iter()
                .position(|e| descendants.contains(e.name()));

            match (last_ancestor, first_descendant) {
                (Some(ancestor), Some(descendant)) if ancestor > descendant => {
                    return Err(self.order_change(pump, &name, &graph));
                }
                (_, Some(descendant)) => descendant,
                (_, None) => self.entries.len(),
            }
        };

        self.entries.insert(position, candidate);
        Ok(())
    }

    /// Removes the registration named `name`, returning it when present.
    pub(crate) fn remove(&mut self, name: &str) -> Option<Rc<Registration>> {
        let index = self.entries.iter().position(|e| e.name() == name)?;
        Some(self.entries.remove(index))
    }

    /// Removes `registration` only if it is the instance currently connected.
    pub(crate) fn remove_instance(&mut self, registration: &Rc<Registration>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !Rc::ptr_eq(e, registration));
        self.entries.len() != before
    }

    pub(crate) fn clear(&mut self) -> Vec<Rc<Registration>> {
        std::mem::take(&mut self.entries)
    }

    fn order_change(&self, pump: &str, name: &str, graph: &Graph<'_>) -> ListenError {
        let was = self.names();
        let mut nodes: Vec<&str> = was.iter().map(String::as_str).collect();
        nodes.push(name);
        let now = graph.stable_sort(&nodes);
        let moved = now
            .iter()
            .filter(|n| n.as_str() != name)
            .zip(was.iter())
            .find(|(now_name, was_name)| now_name != was_name)
            .map_or_else(|| name.to_owned(), |(_, was_name)| was_name.clone());
        ListenError::OrderChange {
            pump: pump.to_owned(),
            listener: name.to_owned(),
            moved,
            was,
            now,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Precedence edges between listener names: `a -> b` means `a` runs first.
struct Graph<'a> {
    forward: BTreeMap<&'a str, BTreeSet<&'a str>>,
    backward: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl<'a> Graph<'a> {
    fn build(nodes: impl Iterator<Item = &'a Registration>) -> Self {
        let mut graph = Self {
            forward: BTreeMap::new(),
            backward: BTreeMap::new(),
        };
        for node in nodes {
            for after in node.after() {
                graph.add_edge(after.as_str(), node.name());
            }
            for before in node.before() {
                graph.add_edge(node.name(), before.as_str());
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &'a str, to: &'a str) {
        self.forward.entry(from).or_default().insert(to);
        self.backward.entry(to).or_default().insert(from);
    }

    fn neighbours(&self, node: &str, direction: Direction) -> impl Iterator<Item = &'a str> + '_ {
        let map = match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        };
        map.get(node).into_iter().flatten().copied()
    }

    /// Every name reachable from `start`, not counting `start` itself.
    fn reachable(&self, start: &str, direction: Direction) -> BTreeSet<&'a str> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&'a str> = self.neighbours(start, direction).collect();
        while let Some(node) = queue.pop_front() {
            if node == start || !seen.insert(node) {
                continue;
            }
            queue.extend(self.neighbours(node, direction));
        }
        seen
    }

    /// Shortest cycle passing through `start`, as `start -> ... -> start`.
    fn cycle_through(&self, start: &str) -> Option<Vec<String>> {
        // `None` marks a node discovered directly from `start`.
        let mut parent: BTreeMap<&'a str, Option<&'a str>> = BTreeMap::new();
        let mut queue: VecDeque<&'a str> = VecDeque::new();
        for next in self.neighbours(start, Direction::Forward) {
            if next == start {
                return Some(vec![start.to_owned(), start.to_owned()]);
            }
            if !parent.contains_key(next) {
                parent.insert(next, None);
                queue.push_back(next);
            }
        }

        while let Some(node) = queue.pop_front() {
            for next in self.neighbours(node, Direction::Forward) {
                if next == start {
                    let mut trail = Vec::new();
                    let mut cursor = Some(node);
                    while let Some(current) = cursor {
                        trail.push(current.to_owned());
                        cursor = parent.get(current).copied().flatten();
                    }
                    let mut path = vec![start.to_owned()];
                    path.extend(trail.into_iter().rev());
                    path.push(start.to_owned());
                    return Some(path);
                }
                if !parent.contains_key(next) {
                    parent.insert(next, Some(node));
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Topological order of `nodes`, breaking ties by their position in `nodes`.
    fn stable_sort(&self, nodes: &[&str]) -> Vec<String> {
        let successors: Vec<BTreeSet<&str>> = nodes
            .iter()
            .map(|n| self.reachable(n, Direction::Forward))
            .collect();
        let mut emitted = vec![false; nodes.len()];
        let mut order = Vec::with_capacity(nodes.len());

        while order.len() < nodes.len() {
            let ready = nodes.iter().enumerate().position(|(index, node)| {
                !emitted.get(index).copied().unwrap_or(true)
                    && nodes.iter().enumerate().all(|(other, _)| {
                        emitted.get(other).copied().unwrap_or(true)
                            || other == index
                            || !successors.get(other).is_some_and(|s| s.contains(node))
                    })
            });
            let Some(index) = ready else {
                break;
            };
            if let Some(flag) = emitted.get_mut(index) {
                *flag = true;
            }
            if let Some(node) = nodes.get(index) {
                order.push((*node).to_owned());
            }
        }
        order
    }
}
