use registry::Node;

/// An iterator over candidate nodes for one call attempt sequence (§4.4).
/// Not `Iterator` because the client needs `Send` across `.await` points
/// and wants an explicit "none left" signal distinct from Rust's `None`
/// meaning "exhausted forever" vs. "no healthy node right now" — both map
/// to `None` here, the caller treats them identically per §4.5 step 3b.
pub trait Next: Send {
    fn next(&mut self) -> Option<Node>;
}

/// A fixed, pre-shuffled/ordered list of nodes consumed front to back.
/// Both the random and round-robin policies and the proxy hook produce
/// one of these; the difference is entirely in how the list was built.
pub struct ListNext {
    nodes: std::collections::VecDeque<Node>,
}

impl ListNext {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: nodes.into(),
        }
    }
}

impl Next for ListNext {
    fn next(&mut self) -> Option<Node> {
        self.nodes.pop_front()
    }
}
