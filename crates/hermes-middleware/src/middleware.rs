//! The middleware contract.
//!
//! Every chain layer implements [`Middleware`]: a name for logging and
//! status reports, an enabled flag, and a `process` method that receives
//! the mutable request context, the buffered request, and a [`Next`]
//! callback to invoke the rest of the chain.
//!
//! Layers surface failures as `Err(HermesError)`; the outermost recovery
//! stage converts them into standard envelopes. A layer short-circuits by
//! returning without calling `next.run()`.

use std::future::Future;
use std::pin::Pin;

use hermes_core::{HermesError, RequestContext};

use crate::types::{Request, Response};

/// A boxed future, the return type of middleware processing.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The result of processing a request through a layer.
pub type HandlerResult = Result<Response, HermesError>;

/// The capability contract every chain layer implements.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the unique name of this layer, used in logs and status
    /// reports.
    fn name(&self) -> &'static str;

    /// Returns whether this layer participates in the chain.
    ///
    /// Disabled layers are skipped when the chain is built.
    fn enabled(&self) -> bool {
        true
    }

    /// Processes the request through this layer.
    ///
    /// Implementations must call `next.run()` exactly once unless they
    /// short-circuit with their own result.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// Callback to invoke the remainder of the chain.
///
/// Consuming `run` ensures a layer cannot invoke its downstream twice.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Stage {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(TerminalHandler<'a>),
}

/// The terminal handler at the end of the chain.
///
/// It receives the context synchronously and must produce an owned future,
/// so it clones whatever request state it needs up front.
pub type TerminalHandler<'a> =
    Box<dyn FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'a>;

impl<'a> Next<'a> {
    /// Wraps a middleware in front of the rest of the chain.
    pub(crate) fn stage(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Stage {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Creates the terminal `Next` that invokes the handler.
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Invokes the next layer or the terminal handler.
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> HandlerResult {
        match self.inner {
            NextInner::Stage { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}
