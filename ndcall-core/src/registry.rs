#![forbid(unsafe_code)]

//! Named callables.
//!
//! The process-wide registry is created on first use from `NDCALL_CONFIG`
//! (or defaults), unless [`init_with`] installed one earlier.

use std::collections::BTreeMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::callable::Callable;
use crate::config::{DuplicatePolicy, NdcallConfig};
use crate::error::CallError;
use crate::kernels;

#[derive(Debug)]
pub struct Registry {
    config: NdcallConfig,
    callables: BTreeMap<String, Callable>,
}

impl Registry {
    /// An empty registry.
    pub fn new(config: NdcallConfig) -> Self {
        Registry {
            config,
            callables: BTreeMap::new(),
        }
    }

    /// A registry holding the builtins, if the config asks for them.
    pub fn with_builtins(config: NdcallConfig) -> Result<Self, CallError> {
        let mut registry = Registry::new(config);
        if registry.config.registry.builtins {
            for (name, callable) in kernels::builtins(&registry.config)? {
                registry.register(name, callable)?;
            }
        }
        Ok(registry)
    }

    pub fn config(&self) -> &NdcallConfig {
        &self.config
    }

    /// Adds `callable` under `name`. A repeated name follows the configured
    /// duplicate policy.
    pub fn register(&mut self, name: impl Into<String>, callable: Callable) -> Result<(), CallError> {
        let name = name.into();
        if self.callables.contains_key(&name) {
            match self.config.dispatch.duplicate_policy {
                DuplicatePolicy::FirstWins => {
                    warn!(name = %name, "callable already registered; keeping the first");
                    return Ok(());
                }
                DuplicatePolicy::LastWins => {
                    warn!(name = %name, "callable already registered; replacing it");
                }
                DuplicatePolicy::Reject => {
                    return Err(CallError::registration(&name, "name is already registered"));
                }
            }
        }
        debug!(name = %name, callable = %callable, "registered");
        self.callables.insert(name, callable);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Callable> {
        self.callables.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.callables.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Callable)> {
        self.callables.iter().map(|(k, v)| (k.as_str(), v))
    }
}

static GLOBAL: OnceLock<RwLock<Registry>> = OnceLock::new();

/// Installs the process-wide registry. Fails once it already exists.
pub fn init_with(config: NdcallConfig) -> Result<(), CallError> {
    let registry = Registry::with_builtins(config)?;
    GLOBAL
        .set(RwLock::new(registry))
        .map_err(|_| CallError::registration("registry", "the global registry is already initialized"))
}

pub fn global() -> &'static RwLock<Registry> {
    GLOBAL.get_or_init(|| {
        let config = NdcallConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable configuration");
            NdcallConfig::default()
        });
        let registry = Registry::with_builtins(config.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "builtin registration failed; starting empty");
            Registry::new(config)
        });
        RwLock::new(registry)
    })
}

pub fn get(name: &str) -> Option<Callable> {
    global().read().unwrap_or_else(PoisonError::into_inner).get(name)
}

pub fn register(name: impl Into<String>, callable: Callable) -> Result<(), CallError> {
    global()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, callable)
}

pub fn names() -> Vec<String> {
    global().read().unwrap_or_else(PoisonError::into_inner).names()
}
