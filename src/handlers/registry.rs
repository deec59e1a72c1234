use std::collections::HashMap;

use anyhow::{anyhow, Result};
use strum::IntoEnumIterator;

use crate::{logger, resource::K8sResource};

use super::{BuiltinKind, CrdInfo, CustomKindHandler, KindHandler, KindHandlerCapability};

/// Lookup table from `kind` to its handler. Handlers are only ever added.
#[derive(Debug, Clone, Default)]
pub struct KindHandlerRegistry {
    handlers: Vec<KindHandler>,
    index: HashMap<String, usize>,
}

impl KindHandlerRegistry {
    pub fn builtin() -> Self {
        Self::from_handlers(BuiltinKind::iter().map(KindHandler::from))
    }

    pub fn from_handlers(handlers: impl IntoIterator<Item = KindHandler>) -> Self {
        let mut registry = Self::default();

        for handler in handlers {
            if let Err(e) = registry.register(handler) {
                logger!(warn, "{}", e);
            }
        }

        registry
    }

    pub fn register(&mut self, handler: KindHandler) -> Result<()> {
        if self.index.contains_key(handler.kind()) {
            return Err(anyhow!("Kind {} is already registered", handler.kind()));
        }

        self.index
            .insert(handler.kind().to_string(), self.handlers.len());
        self.handlers.push(handler);

        Ok(())
    }

    /// Registers a handler for the kind declared by a CRD.
    pub fn register_crd(&mut self, crd: &K8sResource) -> Result<&KindHandler> {
        let info = CrdInfo::try_from(crd)?;

        self.register(CustomKindHandler::from_crd(&info).into())?;

        logger!(info, "Registered custom kind {} ({})", info.kind, info.group);

        self.find(&info.kind)
            .ok_or_else(|| anyhow!("Kind {} vanished after registration", info.kind))
    }

    pub fn find(&self, kind: &str) -> Option<&KindHandler> {
        self.index.get(kind).map(|i| &self.handlers[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &KindHandler> {
        self.handlers.iter()
    }

    pub fn non_custom(&self) -> impl Iterator<Item = &KindHandler> {
        self.handlers.iter().filter(|h| !h.is_custom())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
