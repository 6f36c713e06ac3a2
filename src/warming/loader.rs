//! Named data loaders supplied by callers.
//!
//! Loaders fetch a value from the source of truth on a cache miss or for a
//! scheduled warmup. They are registered by name before first use.

use crate::cache::CacheValue;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Loads a value for a set of loader parameters
#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(&self, params: &Value) -> CacheResult<CacheValue>;
}

/// Adapter turning an async closure into a [`DataLoader`]
struct FnLoader<F, Fut, T, E> {
    name: String,
    func: F,
    _marker: PhantomData<fn() -> (Fut, T, E)>,
}

#[async_trait]
impl<F, Fut, T, E> DataLoader for FnLoader<F, Fut, T, E>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Into<CacheValue>,
    E: Display,
{
    async fn load(&self, params: &Value) -> CacheResult<CacheValue> {
        (self.func)(params.clone())
            .await
            .map(Into::into)
            .map_err(|e| CacheError::loader(&self.name, e))
    }
}

/// Registry of named loaders
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: Arc<DashMap<String, Arc<dyn DataLoader>>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.names())
            .finish()
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a loader under `name`
    pub fn register(&self, name: impl Into<String>, loader: Arc<dyn DataLoader>) {
        self.loaders.insert(name.into(), loader);
    }

    /// Register an async closure as a loader
    ///
    /// ```rust
    /// use tiercache_core::warming::LoaderRegistry;
    /// use serde_json::json;
    ///
    /// let registry = LoaderRegistry::new();
    /// registry.register_fn("prices", |params| async move {
    ///     Ok::<_, String>(json!({ "symbol": params["SYM"], "p": 1 }))
    /// });
    /// assert!(registry.contains("prices"));
    /// ```
    pub fn register_fn<F, Fut, T, E>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<CacheValue> + 'static,
        E: Display + 'static,
    {
        let name = name.into();
        let loader = FnLoader {
            name: name.clone(),
            func,
            _marker: PhantomData,
        };
        self.loaders.insert(name, Arc::new(loader));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.loaders.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaders.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Invoke a loader by name
    pub async fn load(&self, name: &str, params: &Value) -> CacheResult<CacheValue> {
        let loader = self
            .loaders
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::LoaderNotFound(name.to_string()))?;
        loader.load(params).await
    }
}
