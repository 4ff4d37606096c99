use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::owned::Owned;
use crate::schema::{Schema, TypedSchema};
use crate::scope::ScopeContext;

type BranchFn<T> = Box<dyn FnOnce(ScopeContext) -> BoxFuture<'static, Result<Owned<T>>> + Send>;
type WarmupFn = Box<dyn FnOnce(ScopeContext) -> BoxFuture<'static, Result<()>> + Send>;

/// One unit of work in a fork.
///
/// The closure runs inside the branch's own scope, `<parent>.<name>`, and
/// must return a value stamped with that scope.
pub struct Branch<T> {
    pub(crate) name: String,
    pub(crate) schema: Option<Value>,
    pub(crate) run: BranchFn<T>,
}

impl<T: Send + 'static> Branch<T> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(ScopeContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Owned<T>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schema: None,
            run: Box::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// A branch that makes a single inference call with `schema`.
    pub fn infer<S>(name: impl Into<String>, schema: S, prompt: impl Into<String>) -> Self
    where
        S: Schema<T> + 'static,
    {
        let descriptor = schema.descriptor();
        let prompt = prompt.into();
        Branch::new(name, move |ctx| async move { ctx.infer(&schema, prompt).await })
            .with_schema(descriptor)
    }
}

impl<T> Branch<T> {
    /// Declare the structural schema this branch produces.
    pub fn with_schema(mut self, descriptor: Value) -> Self {
        self.schema = Some(descriptor);
        self
    }

    pub fn with_schema_of<S: Schema<T>>(self, schema: &S) -> Self {
        self.with_schema(schema.descriptor())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }
}

impl<T> fmt::Debug for Branch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("schema", &self.schema.is_some())
            .finish_non_exhaustive()
    }
}

/// Caller-supplied warmup pass, run in `<parent>.warmup`.
pub struct WarmupTask {
    pub(crate) run: WarmupFn,
}

impl WarmupTask {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ScopeContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            run: Box::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Send `prompt` once and discard the answer. Meant to carry the shared
    /// context the branches will reuse.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        WarmupTask::new(move |ctx| async move {
            let schema = TypedSchema::<Value>::new();
            ctx.infer(&schema, prompt).await.map(|_| ())
        })
    }
}

impl fmt::Debug for WarmupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupTask").finish_non_exhaustive()
    }
}
