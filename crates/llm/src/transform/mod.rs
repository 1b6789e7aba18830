//! The ordered ingress/egress transform pipeline.
//!
//! Ingress transforms run, in ascending priority order, against the
//! parsed [`ir::Request`] before a provider is called; egress transforms
//! run, in ascending priority order, against the [`ir::Response`] a
//! provider (or a synthetic-response ingress transform) produced. A
//! transform whose `applies` predicate returns `false` is skipped.

pub mod ensure_tool_call;
pub mod normalize;
pub mod propagate_finish_reasons;

use crate::ir;

pub trait IngressTransform: Send + Sync {
    fn priority(&self) -> i32;
    fn applies(&self, request: &ir::Request) -> bool;
    fn apply(&self, request: &mut ir::Request);
}

pub trait EgressTransform: Send + Sync {
    fn priority(&self) -> i32;
    fn applies(&self, request: &ir::Request, response: &ir::Response) -> bool;
    fn apply(&self, request: &ir::Request, response: &mut ir::Response);
}

/// The fixed ingress chain: `Normalize` (priority 0) then
/// `EnsureToolCall` (priority 100).
pub fn ingress_chain() -> Vec<Box<dyn IngressTransform>> {
    let mut chain: Vec<Box<dyn IngressTransform>> =
        vec![Box::new(normalize::NormalizeIngress), Box::new(ensure_tool_call::EnsureToolCallIngress)];
    chain.sort_by_key(|t| t.priority());
    chain
}

/// The fixed egress chain: `Normalize` (priority 0), `EnsureToolCall`
/// (priority 50), `PropagateFinishReasons` (priority 100).
pub fn egress_chain() -> Vec<Box<dyn EgressTransform>> {
    let mut chain: Vec<Box<dyn EgressTransform>> = vec![
        Box::new(normalize::NormalizeEgress),
        Box::new(ensure_tool_call::EnsureToolCallEgress),
        Box::new(propagate_finish_reasons::PropagateFinishReasons),
    ];
    chain.sort_by_key(|t| t.priority());
    chain
}

/// Run every applicable ingress transform, in priority order.
pub fn run_ingress(request: &mut ir::Request) {
    for transform in ingress_chain() {
        if transform.applies(request) {
            transform.apply(request);
        }
    }
}

/// Run every applicable egress transform, in priority order.
pub fn run_egress(request: &ir::Request, response: &mut ir::Response) {
    for transform in egress_chain() {
        if transform.applies(request, response) {
            transform.apply(request, response);
        }
    }
}
