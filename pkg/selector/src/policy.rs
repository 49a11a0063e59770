use rand::seq::SliceRandom;
use registry::Node;

/// How a `Selector` orders the healthy nodes it hands back (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Random,
    RoundRobin,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Random
    }
}

impl Policy {
    /// Orders `nodes` in place according to the policy. `cursor` is an
    /// opaque, monotonically advancing counter the caller owns (one per
    /// service name) used to rotate the round-robin starting point; it is
    /// ignored by `Random`.
    pub fn order(&self, nodes: &mut Vec<Node>, cursor: usize) {
        match self {
            Policy::Random => nodes.shuffle(&mut rand::thread_rng()),
            Policy::RoundRobin => {
                if !nodes.is_empty() {
                    let start = cursor % nodes.len();
                    nodes.rotate_left(start);
                }
            }
        }
    }
}
