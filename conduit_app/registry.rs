use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    str::FromStr,
    sync::Arc,
};

use conduit_types::errors::{ApplicationError, RegistryError, Result};

use crate::{
    config::Config,
    cqrs::{Notification, NotificationHandler, Request, RequestHandler},
    pipeline::{GlobalAdapter, GlobalBehavior, Pipeline, PipelineBehavior},
};

type ErasedMap = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// What to do when a second handler is registered for the same request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail the registration with `RegistryError::DuplicateHandler`.
    #[default]
    Reject,
    /// The last registration wins.
    Replace,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown duplicate handler policy '{other}'")),
        }
    }
}

/// A group of handlers and behaviors registered together at startup.
pub trait HandlerModule {
    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError>;
}

trait HandlerBinding: Send + Sync {
    fn message_name(&self) -> &'static str;
    fn assemble(
        &self,
        globals: &[Arc<dyn GlobalBehavior>],
        behaviors: &ErasedMap,
    ) -> Box<dyn Any + Send + Sync>;
}

struct TypedBinding<R: Request> {
    handler: Arc<dyn RequestHandler<R>>,
}

impl<R: Request> HandlerBinding for TypedBinding<R> {
    fn message_name(&self) -> &'static str {
        type_name::<R>()
    }

    fn assemble(
        &self,
        globals: &[Arc<dyn GlobalBehavior>],
        behaviors: &ErasedMap,
    ) -> Box<dyn Any + Send + Sync> {
        let chain = compose_behaviors::<R>(globals, behaviors);
        Box::new(Pipeline::new(self.handler.clone(), chain))
    }
}

struct NotificationSlot {
    name: &'static str,
    handlers: Box<dyn Any + Send + Sync>,
}

/// Collects handler and behavior bindings, then freezes them into a `Registry`.
pub struct RegistryBuilder {
    policy: DuplicatePolicy,
    handlers: HashMap<TypeId, Box<dyn HandlerBinding>>,
    notifications: HashMap<TypeId, NotificationSlot>,
    behaviors: ErasedMap,
    behavior_names: HashMap<TypeId, &'static str>,
    globals: Vec<Arc<dyn GlobalBehavior>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            policy: DuplicatePolicy::default(),
            handlers: HashMap::new(),
            notifications: HashMap::new(),
            behaviors: HashMap::new(),
            behavior_names: HashMap::new(),
            globals: Vec::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new();
        builder.duplicate_policy(config.duplicate_policy);
        builder
    }

    pub fn duplicate_policy(&mut self, policy: DuplicatePolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Binds the single handler of request type `R`.
    pub fn handler<R, H>(&mut self, handler: H) -> Result<&mut Self, RegistryError>
    where
        R: Request,
        H: RequestHandler<R> + 'static,
    {
        let key = TypeId::of::<R>();
        if self.handlers.contains_key(&key) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(RegistryError::DuplicateHandler(type_name::<R>()));
                }
                DuplicatePolicy::Replace => {
                    tracing::warn!(request = type_name::<R>(), "Replacing registered handler");
                }
            }
        }

        self.handlers.insert(
            key,
            Box::new(TypedBinding::<R> {
                handler: Arc::new(handler),
            }),
        );
        Ok(self)
    }

    /// Appends a handler to the ones notified for `N`.
    pub fn notification_handler<N, H>(&mut self, handler: H) -> &mut Self
    where
        N: Notification,
        H: NotificationHandler<N> + 'static,
    {
        let slot = self
            .notifications
            .entry(TypeId::of::<N>())
            .or_insert_with(|| NotificationSlot {
                name: type_name::<N>(),
                handlers: Box::new(Vec::<Arc<dyn NotificationHandler<N>>>::new()),
            });

        if let Some(handlers) = slot
            .handlers
            .downcast_mut::<Vec<Arc<dyn NotificationHandler<N>>>>()
        {
            handlers.push(Arc::new(handler));
        }
        self
    }

    /// Adds a behavior to the pipeline of request type `R` only.
    pub fn behavior<R, B>(&mut self, behavior: B) -> &mut Self
    where
        R: Request,
        B: PipelineBehavior<R> + 'static,
    {
        let key = TypeId::of::<R>();
        let list = self
            .behaviors
            .entry(key)
            .or_insert_with(|| Box::new(Vec::<Arc<dyn PipelineBehavior<R>>>::new()));

        if let Some(list) = list.downcast_mut::<Vec<Arc<dyn PipelineBehavior<R>>>>() {
            list.push(Arc::new(behavior));
        }
        self.behavior_names.insert(key, type_name::<R>());
        self
    }

    /// Adds a behavior to the pipeline of every request type.
    pub fn global_behavior<B>(&mut self, behavior: B) -> &mut Self
    where
        B: GlobalBehavior + 'static,
    {
        self.globals.push(Arc::new(behavior));
        self
    }

    pub fn module(&mut self, module: &dyn HandlerModule) -> Result<&mut Self, RegistryError> {
        module.register(self)?;
        Ok(self)
    }

    /// Assembles one pipeline per registered request type.
    pub fn build(self) -> Registry {
        let pipelines: ErasedMap = self
            .handlers
            .iter()
            .map(|(key, binding)| (*key, binding.assemble(&self.globals, &self.behaviors)))
            .collect();

        for (key, name) in &self.behavior_names {
            if !self.handlers.contains_key(key) {
                tracing::warn!(request = *name, "Behaviors registered for a request without handler");
            }
        }

        let mut requests: Vec<&'static str> =
            self.handlers.values().map(|b| b.message_name()).collect();
        requests.sort_unstable();

        let mut notifications: Vec<&'static str> =
            self.notifications.values().map(|slot| slot.name).collect();
        notifications.sort_unstable();

        tracing::debug!(
            requests = requests.len(),
            notifications = notifications.len(),
            global_behaviors = self.globals.len(),
            "Registry built"
        );

        Registry {
            pipelines,
            notifications: self
                .notifications
                .into_iter()
                .map(|(key, slot)| (key, slot.handlers))
                .collect(),
            behaviors: self.behaviors,
            globals: self.globals,
            requests,
            notification_names: notifications,
        }
    }
}

/// Read-only bindings from message types to their handlers and behaviors.
/// It's safe to share between concurrent dispatches without locking.
pub struct Registry {
    pipelines: ErasedMap,
    notifications: ErasedMap,
    behaviors: ErasedMap,
    globals: Vec<Arc<dyn GlobalBehavior>>,
    requests: Vec<&'static str>,
    notification_names: Vec<&'static str>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The prebuilt pipeline of `R`, if a handler is bound to it.
    pub fn pipeline<R: Request>(&self) -> Option<&Pipeline<R>> {
        self.pipelines
            .get(&TypeId::of::<R>())
            .and_then(|pipeline| pipeline.downcast_ref::<Pipeline<R>>())
    }

    pub fn resolve_handler<R: Request>(&self) -> Result<Arc<dyn RequestHandler<R>>> {
        self.pipeline::<R>()
            .map(|pipeline| pipeline.handler().clone())
            .ok_or(ApplicationError::HandlerNotFound(type_name::<R>()))
    }

    /// Handlers of `N` in registration order, possibly none.
    pub fn resolve_notification_handlers<N: Notification>(
        &self,
    ) -> &[Arc<dyn NotificationHandler<N>>] {
        self.notifications
            .get(&TypeId::of::<N>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<Arc<dyn NotificationHandler<N>>>>())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Behaviors wrapping the handler of `R`, outermost first.
    pub fn resolve_behaviors<R: Request>(&self) -> Vec<Arc<dyn PipelineBehavior<R>>> {
        compose_behaviors::<R>(&self.globals, &self.behaviors)
    }

    /// Type names of every request with a bound handler, sorted.
    pub fn registered_requests(&self) -> &[&'static str] {
        &self.requests
    }

    /// Type names of every notification with at least one handler, sorted.
    pub fn registered_notifications(&self) -> &[&'static str] {
        &self.notification_names
    }
}

// Global behaviors come first, so on equal priority they wrap the specific
// ones; the sort is stable so registration order is kept within each group.
fn compose_behaviors<R: Request>(
    globals: &[Arc<dyn GlobalBehavior>],
    behaviors: &ErasedMap,
) -> Vec<Arc<dyn PipelineBehavior<R>>> {
    let mut chain: Vec<Arc<dyn PipelineBehavior<R>>> = globals
        .iter()
        .map(|global| Arc::new(GlobalAdapter(global.clone())) as Arc<dyn PipelineBehavior<R>>)
        .collect();

    if let Some(specific) = behaviors
        .get(&TypeId::of::<R>())
        .and_then(|list| list.downcast_ref::<Vec<Arc<dyn PipelineBehavior<R>>>>())
    {
        chain.extend(specific.iter().cloned());
    }

    chain.sort_by_key(|behavior| behavior.priority());
    chain
}
