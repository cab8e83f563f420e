//! Eligibility validation for replay candidates.

use crate::flow::{Flow, FlowKind};

/// Check whether a flow can be replayed.
///
/// Returns `None` for an eligible flow, or the reason it cannot be
/// replayed. Rules are evaluated in order; the first match wins. Pure:
/// no state, no I/O.
pub fn check(flow: &Flow) -> Option<&'static str> {
    if flow.live {
        return Some("Can't replay live flow.");
    }
    if flow.intercepted {
        return Some("Can't replay intercepted flow.");
    }
    let Some(request) = &flow.request else {
        return Some("Flow has missing request.");
    };
    if request.content.is_none() {
        return Some("Can't replay flow with missing content.");
    }
    match flow.kind {
        // WebSocket flows are filtered out of batches rather than
        // failing the whole call; the distinct message is logged by the
        // scheduler.
        FlowKind::WebSocket => Some("Can't replay WebSocket flows."),
        FlowKind::Tcp | FlowKind::Udp => Some("Can only replay HTTP flows."),
        FlowKind::Http => None,
    }
}
