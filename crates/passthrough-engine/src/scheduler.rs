//! Deferred work queued during the walk and drained at export.

use passthrough_xml::NodeId;

use crate::state::PropertyState;

/// A state kept alive for evaluation after the walk.
#[derive(Debug, Clone)]
pub struct DeferredItem {
    pub state: PropertyState,
    pub node: NodeId,
}

/// Fill items drain in enqueue order; required items drain in reverse, so that
/// nested optional structures are decided inside-out.
#[derive(Debug, Default)]
pub struct DeferredScheduler {
    fills: Vec<DeferredItem>,
    requireds: Vec<DeferredItem>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer_fill(&mut self, state: PropertyState, node: NodeId) {
        self.fills.push(DeferredItem { state, node });
    }

    pub fn defer_required(&mut self, state: PropertyState, node: NodeId) {
        self.requireds.push(DeferredItem { state, node });
    }

    pub fn pending_fills(&self) -> usize {
        self.fills.len()
    }

    pub fn pending_requireds(&self) -> usize {
        self.requireds.len()
    }

    /// Fill items in the order they were queued.
    pub fn take_fills(&mut self) -> Vec<DeferredItem> {
        std::mem::take(&mut self.fills)
    }

    /// Required items, most recently queued first.
    pub fn take_requireds(&mut self) -> Vec<DeferredItem> {
        let mut items = std::mem::take(&mut self.requireds);
        items.reverse();
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passthrough_xml::Document;

    #[test]
    fn drain_orders() {
        let doc = Document::parse_str("<a><b/><c/><d/></a>").unwrap();
        let ids: Vec<NodeId> = doc.element_children(doc.root()).collect();
        let mut s = DeferredScheduler::new();
        for id in &ids {
            s.defer_fill(PropertyState::root(), *id);
            s.defer_required(PropertyState::root(), *id);
        }
        assert_eq!(s.pending_fills(), 3);
        let fills: Vec<NodeId> = s.take_fills().into_iter().map(|i| i.node).collect();
        assert_eq!(fills, ids);
        let reqs: Vec<NodeId> = s.take_requireds().into_iter().map(|i| i.node).collect();
        assert_eq!(reqs, ids.iter().rev().copied().collect::<Vec<_>>());
        assert_eq!(s.pending_fills() + s.pending_requireds(), 0);
    }
}
