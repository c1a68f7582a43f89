//! # Taskbot Framework
//!
//! FSM-aware routing and dispatch for conversational bots.
//!
//! This layer provides:
//! - [`Filter`]s over events and the conversation's FSM state
//! - [`Router`]s holding categorized, prioritized handler registrations
//! - the [`Middleware`] chain and the standard middlewares
//! - the [`Dispatcher`], which serializes events per `(chat, user)` key and
//!   drives each one through a dispatch cycle
//!
//! ```text
//! event ─▶ KeySequencer ─▶ middleware chain ─▶ routers ─▶ handler
//!                               │                 │          │
//!                               ▼                 ▼          ▼
//!                          user store        FSM snapshot   Bot / FSM writes
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod handler;
pub mod middleware;
pub mod outcome;
pub mod resources;
pub mod router;
pub mod sequencer;

pub use context::{Context, FsmContext};
pub use dispatcher::{Dispatcher, DispatcherBuilder, ErrorHandler};
pub use error::{BoxError, DispatchError, DispatchResult, RegistrationError};
pub use filter::{CheckFn, Filter};
pub use handler::{
    BoxFuture, BoxedHandler, Handler, HandlerResponse, HandlerResult, into_handler,
};
pub use middleware::{BoxedMiddleware, Middleware, Next, from_fn};
pub use outcome::{CycleReport, CycleState, Outcome};
pub use resources::{I18n, Locale, SharedResources};
pub use router::{Category, Registration, Router};
pub use sequencer::{KeySequencer, Ticket};
