//! Process-wide agent registry: a factory map written at init time and read
//! during dispatch. Static name and description let callers enumerate agents
//! without instantiating them.

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type AgentFactory = Box<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

pub struct AgentSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    factory: AgentFactory,
}

impl AgentSpec {
    pub fn new(
        id: &'static str,
        name: &'static str,
        description: &'static str,
        factory: impl Fn() -> Arc<dyn Agent> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            name,
            description,
            factory: Box::new(factory),
        }
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    specs: Mutex<HashMap<&'static str, AgentSpec>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: AgentSpec) {
        let mut specs = self.specs.lock().unwrap();
        if specs.insert(spec.id, spec).is_some() {
            log::warn!("agent registry: duplicate registration overwrote an earlier factory");
        }
    }

    pub fn create(&self, id: &str) -> Result<Arc<dyn Agent>> {
        let specs = self.specs.lock().unwrap();
        let spec = specs.get(id).ok_or_else(|| AgentError::UnknownAgent(id.to_string()))?;
        Ok((spec.factory)())
    }

    /// `(id, name, description)` triples, sorted by id, no instantiation.
    pub fn list(&self) -> Vec<(&'static str, &'static str, &'static str)> {
        let specs = self.specs.lock().unwrap();
        let mut out: Vec<_> = specs
            .values()
            .map(|s| (s.id, s.name, s.description))
            .collect();
        out.sort_by_key(|(id, _, _)| *id);
        out
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.list().into_iter().map(|(id, _, _)| id).collect()
    }
}
