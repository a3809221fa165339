// Application Layer - Use cases

pub mod constants;
pub mod invoker;

pub use invoker::{Completion, Invocation, InvocationHandle, InvokeRequest, Invoker};
