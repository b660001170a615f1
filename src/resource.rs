//! Streamed resources and response continuations.
//!
//! A [`Resource`] is an application-exposed handler for out-of-band content
//! (downloads, images, upload targets). It is served through the session so
//! that resource requests share the session lock with event processing, but
//! it writes its own response and may *suspend* it: calling
//! [`ResourceContext::wait_for_more_data`] detaches the response from the
//! current request and parks it as a [`ResponseContinuation`] until either
//! the application produces more data and resumes it, or the session tears
//! down, whichever comes first.

use crate::http::{Request, ResponseWriter};
use crate::Result;

/// An application-exposed streamed resource.
pub trait Resource: Send {
    /// Handles one request (or continuation resume) against this resource.
    ///
    /// Writing the full response and returning completes the request. To
    /// defer completion, call [`ResourceContext::wait_for_more_data`]; the
    /// response is then parked and handed back on the next resume.
    fn handle_request(
        &mut self,
        request: &Request,
        response: &mut ResponseWriter,
        cx: &mut ResourceContext,
    ) -> Result<()>;
}

/// Per-invocation context handed to [`Resource::handle_request`].
#[derive(Debug, Default)]
pub struct ResourceContext {
    continuation_requested: bool,
    resumed: bool,
}

impl ResourceContext {
    pub(crate) fn new(resumed: bool) -> Self {
        Self {
            continuation_requested: false,
            resumed,
        }
    }

    /// Requests that this response be suspended instead of completed.
    ///
    /// At most one continuation per request is logically waiting for more
    /// data at a time; calling this twice in one invocation is idempotent.
    pub fn wait_for_more_data(&mut self) {
        self.continuation_requested = true;
    }

    /// Whether this invocation resumes a previously parked continuation.
    #[must_use]
    pub const fn is_continuation(&self) -> bool {
        self.resumed
    }

    pub(crate) const fn continuation_requested(&self) -> bool {
        self.continuation_requested
    }
}

/// A suspended resource response, owned by the session until resumed or
/// torn down.
pub struct ResponseContinuation {
    resource_name: String,
    request: Request,
    response: ResponseWriter,
}

impl ResponseContinuation {
    pub(crate) fn new(resource_name: String, request: Request, response: ResponseWriter) -> Self {
        Self {
            resource_name,
            request,
            response,
        }
    }

    /// The exposed name of the resource that parked this continuation.
    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub(crate) fn into_parts(self) -> (String, Request, ResponseWriter) {
        (self.resource_name, self.request, self.response)
    }

    /// Flushes the parked response without resuming the resource. Used at
    /// session teardown so no client is left waiting on a dead session.
    pub(crate) fn abort(self) {
        self.response.flush();
    }
}

impl std::fmt::Debug for ResponseContinuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseContinuation")
            .field("resource", &self.resource_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, ResponseKind};

    struct Chunked {
        chunks: Vec<&'static str>,
        served: usize,
    }

    impl Resource for Chunked {
        fn handle_request(
            &mut self,
            _request: &Request,
            response: &mut ResponseWriter,
            cx: &mut ResourceContext,
        ) -> Result<()> {
            response.write(self.chunks[self.served]);
            self.served += 1;
            if self.served < self.chunks.len() {
                cx.wait_for_more_data();
            }
            Ok(())
        }
    }

    #[test]
    fn continuation_round_trip() {
        let mut resource = Chunked {
            chunks: vec!["one,", "two"],
            served: 0,
        };
        let request = Request::builder(Method::Get, "/app").build();
        let (mut rw, probe) = ResponseWriter::probe(ResponseKind::Page);

        let mut cx = ResourceContext::new(false);
        resource
            .handle_request(&request, &mut rw, &mut cx)
            .expect("first chunk");
        assert!(cx.continuation_requested());
        assert!(!probe.is_flushed());

        let parked = ResponseContinuation::new("chunked".into(), request, rw);
        assert_eq!(parked.resource_name(), "chunked");

        let (_, request, mut rw) = parked.into_parts();
        let mut cx = ResourceContext::new(true);
        assert!(cx.is_continuation());
        resource
            .handle_request(&request, &mut rw, &mut cx)
            .expect("second chunk");
        assert!(!cx.continuation_requested());
        rw.flush();
        assert_eq!(probe.get().expect("flushed").body, "one,two");
    }

    #[test]
    fn abort_flushes_parked_response() {
        let request = Request::builder(Method::Get, "/app").build();
        let (mut rw, probe) = ResponseWriter::probe(ResponseKind::Page);
        rw.write("partial");
        let parked = ResponseContinuation::new("r".into(), request, rw);
        parked.abort();
        assert_eq!(probe.get().expect("flushed").body, "partial");
    }
}
