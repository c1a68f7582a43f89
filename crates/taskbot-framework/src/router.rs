//! Routers: ordered, filtered handler registrations.
//!
//! A [`Router`] groups registrations into four [`Category`] buckets. Within a
//! bucket, registrations are ordered by priority (lower first), then by
//! insertion order. The dispatcher consults routers category by category:
//!
//! ```text
//! for category in [Command, Action, Text, Fallback]:
//!     for router in inclusion order:
//!         for registration in (priority, insertion) order:
//!             if filter matches → run handler, stop
//! ```
//!
//! The first match wins and at most one handler runs per event.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut router = Router::new("tasks");
//! router
//!     .register(Category::Command, Filter::command("task"), start_task)?
//!     .register(
//!         Category::Text,
//!         Filter::plain_text().and(Filter::state(TaskState::AwaitingTaskText)),
//!         save_task_text,
//!     )?;
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use taskbot_core::FsmRecord;

use crate::context::Context;
use crate::error::{DispatchError, DispatchResult, RegistrationError};
use crate::filter::Filter;
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::middleware::Endpoint;
use crate::outcome::{CycleState, Outcome};

/// Routing buckets, listed in the order they are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Command,
    Action,
    Text,
    Fallback,
}

impl Category {
    /// Every category in routing order.
    pub const ORDER: [Category; 4] = [
        Category::Command,
        Category::Action,
        Category::Text,
        Category::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Action => "action",
            Self::Text => "text",
            Self::Fallback => "fallback",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filter/handler pair.
#[derive(Clone)]
pub struct Registration {
    name: String,
    category: Category,
    filter: Filter,
    handler: BoxedHandler,
    priority: i32,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("filter", &self.filter)
            .field("priority", &self.priority)
            .finish()
    }
}

/// An ordered set of registrations.
#[derive(Clone)]
pub struct Router {
    name: String,
    buckets: [Vec<Registration>; 4],
}

impl Router {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buckets: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a handler with an automatically generated name and the
    /// default priority `0`.
    pub fn register<H: Handler>(
        &mut self,
        category: Category,
        filter: Filter,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        let name = format!(
            "{}:{}#{}",
            self.name,
            category,
            self.bucket(category).len()
        );
        self.register_with_priority(name, category, filter, handler, 0)
    }

    /// Registers a named handler with the default priority `0`.
    pub fn register_named<H: Handler>(
        &mut self,
        name: impl Into<String>,
        category: Category,
        filter: Filter,
        handler: H,
    ) -> Result<&mut Self, RegistrationError> {
        self.register_with_priority(name, category, filter, handler, 0)
    }

    /// Registers a named handler. Lower priorities are tried first; equal
    /// priorities keep insertion order.
    ///
    /// Fails if the new registration would never be reached because a
    /// catch-all filter precedes it, or if it is a catch-all that would hide
    /// registrations already placed after it.
    pub fn register_with_priority<H: Handler>(
        &mut self,
        name: impl Into<String>,
        category: Category,
        filter: Filter,
        handler: H,
        priority: i32,
    ) -> Result<&mut Self, RegistrationError> {
        let name = name.into();
        if self.registrations().any(|r| r.name == name) {
            return Err(RegistrationError::DuplicateName {
                router: self.name.clone(),
                name,
            });
        }

        let bucket = &self.buckets[category.index()];
        let position = bucket.partition_point(|r| r.priority <= priority);

        if let Some(catch_all) = bucket[..position].iter().find(|r| r.filter.is_catch_all()) {
            return Err(RegistrationError::Shadowed {
                category,
                shadowed: name,
                catch_all: catch_all.name.clone(),
            });
        }
        if let Some(hidden) = bucket.get(position).filter(|_| filter.is_catch_all()) {
            return Err(RegistrationError::Shadowed {
                category,
                shadowed: hidden.name.clone(),
                catch_all: name,
            });
        }

        trace!(
            router = %self.name,
            registration = %name,
            %category,
            priority,
            filter = filter.label(),
            "Registering handler"
        );
        self.buckets[category.index()].insert(
            position,
            Registration {
                name,
                category,
                filter,
                handler: into_handler(handler),
                priority,
            },
        );
        Ok(self)
    }

    /// Registrations of one category, in matching order.
    pub fn bucket(&self, category: Category) -> &[Registration] {
        &self.buckets[category.index()]
    }

    /// Every registration, category by category.
    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.buckets.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn catch_all(&self, category: Category) -> Option<&Registration> {
        self.bucket(category).iter().find(|r| r.filter.is_catch_all())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("registrations", &self.len())
            .finish()
    }
}

// =============================================================================
// RouteTable
// =============================================================================

/// The frozen, ordered list of routers a dispatcher routes through.
#[derive(Debug, Default, Clone)]
pub(crate) struct RouteTable {
    routers: Vec<Router>,
}

impl RouteTable {
    /// Appends a router, refusing it if an earlier router's catch-all would
    /// hide any of its registrations.
    pub(crate) fn include(&mut self, router: Router) -> Result<(), RegistrationError> {
        for category in Category::ORDER {
            let Some(first) = router.bucket(category).first() else {
                continue;
            };
            if let Some(catch_all) = self.routers.iter().find_map(|r| r.catch_all(category)) {
                return Err(RegistrationError::Shadowed {
                    category,
                    shadowed: first.name.clone(),
                    catch_all: catch_all.name.clone(),
                });
            }
        }
        debug!(router = %router.name, registrations = router.len(), "Router included");
        self.routers.push(router);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.routers.iter().map(Router::len).sum()
    }

    /// Finds the first registration whose filter accepts the event.
    fn resolve(&self, ctx: &Context, snapshot: Option<&FsmRecord>) -> Option<&Registration> {
        let event = ctx.event();
        for category in Category::ORDER {
            for router in &self.routers {
                for registration in router.bucket(category) {
                    match registration.filter.check(event, snapshot) {
                        Ok(true) => return Some(registration),
                        Ok(false) => {}
                        Err(err) => warn!(
                            registration = %registration.name,
                            error = %err,
                            "Filter failed, treating as no match"
                        ),
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl Endpoint for RouteTable {
    async fn call(&self, ctx: Arc<Context>) -> DispatchResult<Outcome> {
        let snapshot = ctx.fsm().snapshot().await?;
        ctx.advance(CycleState::Routed);

        let Some(registration) = self.resolve(&ctx, snapshot.as_ref()) else {
            debug!("No registration matched, dropping event");
            return Ok(Outcome::NoMatch);
        };

        debug!(
            handler = %registration.name,
            category = %registration.category,
            "Handler selected"
        );
        ctx.advance(CycleState::HandlerExecuting);
        registration
            .handler
            .call(ctx)
            .await
            .map_err(|err| DispatchError::from_handler(&registration.name, err))?;

        Ok(Outcome::Handled {
            handler: registration.name.clone(),
        })
    }
}
