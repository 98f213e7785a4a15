//! Request dispatch surface: method registry, middleware, handler context,
//! and the framework API handed to application code.

pub mod api;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod middleware;

pub use api::FrameworkApi;
pub use context::{ReplySink, RpcContext};
pub use dispatcher::{RpcDispatcher, RpcHandler};
pub use error::{ErrorObj, RpcErr};
pub use middleware::{rate_limiter, Middleware, MiddlewareChain, MwDecision};
