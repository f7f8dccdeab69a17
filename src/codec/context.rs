//! Coding-context side channel.
//!
//! The server threads the route a request was dispatched to through to its
//! handler's [`Decodable`](super::Decodable) call via [`CodingContext`], the
//! same way the request's payload is. Declared-error-type reconstruction does
//! not go through this channel: it runs client-side, against the reconstruct
//! closures a route descriptor's `throws_type::<E>()` calls accumulate.

use crate::route::Route;

/// A small side-channel value threaded alongside decoding.
///
/// Unlike the `Value` tree itself, this is never transmitted; it exists
/// purely to give the decoding process access to local-only state.
#[derive(Debug, Default, Clone)]
pub struct CodingContext {
    route: Option<Route>,
}

impl CodingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(route: Route) -> Self {
        Self { route: Some(route) }
    }

    pub fn route(&self) -> Option<&Route> {
        self.route.as_ref()
    }
}
