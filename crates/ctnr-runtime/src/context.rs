//! Shared, process-wide resources handed to steps and the dispatcher.
//!
//! Mirrors §3's ownership rule: the session store, adapters, and template
//! catalog are constructed once at process startup and borrowed by
//! everything downstream; nothing here is a module-level singleton.

use std::sync::Arc;

use ctnr_core::config::CtnrConfig;
use ctnr_core::store::SessionStore;

use crate::adapters::{DockerAdapter, KindAdapter, KubectlAdapter, LlmAdapter, ScannerAdapter};
use crate::command::CommandRunner;
use crate::templates::TemplateCatalog;

/// Everything a step or the dispatcher needs that isn't part of its JSON
/// input or the session itself.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<CtnrConfig>,
    pub store: Arc<dyn SessionStore>,
    pub docker: Arc<DockerAdapter>,
    pub kubectl: Arc<KubectlAdapter>,
    pub kind: Arc<KindAdapter>,
    pub scanner: Arc<ScannerAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub templates: Arc<TemplateCatalog>,
}

impl AppContext {
    pub fn new(config: Arc<CtnrConfig>, store: Arc<dyn SessionStore>, llm: Arc<dyn LlmAdapter>) -> Self {
        let runner = CommandRunner::new();
        Self {
            config,
            store,
            docker: Arc::new(DockerAdapter::new(runner.clone())),
            kubectl: Arc::new(KubectlAdapter::new(runner.clone())),
            kind: Arc::new(KindAdapter::new(runner.clone())),
            scanner: Arc::new(ScannerAdapter::new(runner)),
            llm,
            templates: Arc::new(TemplateCatalog::new()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context(store_dir: &std::path::Path, llm_reply: &str) -> Arc<AppContext> {
    use crate::adapters::StaticLlmAdapter;
    use crate::store_sled::SledSessionStore;

    let store = SledSessionStore::open(store_dir.to_str().unwrap(), 64).unwrap();
    Arc::new(AppContext::new(
        Arc::new(CtnrConfig::default()),
        Arc::new(store),
        Arc::new(StaticLlmAdapter::new(llm_reply)),
    ))
}
