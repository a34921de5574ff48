//! Infoflow manager
//!
//! Bundles everything a rule may consult during one run. Read-only apart
//! from the results store, the arena and the termination flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::type_utils::TypeUtils;
use crate::config::InfoflowConfig;
use crate::features::taint_analysis::domain::{
    AbstractionArena, AccessPathFactory, TaintPropagationResults,
};
use crate::features::taint_analysis::ports::{
    Aliasing, InfoflowCfg, ReversibleSourceSinkManager, ReversibleTaintWrapper,
    SecondaryFlowListener,
};

pub struct InfoflowManager {
    run_id: Uuid,
    config: InfoflowConfig,
    icfg: Arc<dyn InfoflowCfg>,
    aliasing: Arc<dyn Aliasing>,
    source_sink_manager: Option<Arc<dyn ReversibleSourceSinkManager>>,
    taint_wrapper: Option<Arc<dyn ReversibleTaintWrapper>>,
    secondary_flow_listener: Option<Arc<dyn SecondaryFlowListener>>,
    access_path_factory: AccessPathFactory,
    type_utils: TypeUtils,
    results: Arc<TaintPropagationResults>,
    arena: Arc<AbstractionArena>,
    terminate: AtomicBool,
}

impl InfoflowManager {
    pub fn new(
        config: InfoflowConfig,
        icfg: Arc<dyn InfoflowCfg>,
        aliasing: Arc<dyn Aliasing>,
        type_utils: TypeUtils,
    ) -> Self {
        let access_path_factory = AccessPathFactory::new(&config);
        Self {
            run_id: Uuid::new_v4(),
            config,
            icfg,
            aliasing,
            source_sink_manager: None,
            taint_wrapper: None,
            secondary_flow_listener: None,
            access_path_factory,
            type_utils,
            results: Arc::new(TaintPropagationResults::new()),
            arena: Arc::new(AbstractionArena::new()),
            terminate: AtomicBool::new(false),
        }
    }

    pub fn with_source_sink_manager(mut self, ssm: Arc<dyn ReversibleSourceSinkManager>) -> Self {
        self.source_sink_manager = Some(ssm);
        self
    }

    pub fn with_taint_wrapper(mut self, wrapper: Arc<dyn ReversibleTaintWrapper>) -> Self {
        self.taint_wrapper = Some(wrapper);
        self
    }

    pub fn with_secondary_flow_listener(mut self, listener: Arc<dyn SecondaryFlowListener>) -> Self {
        self.secondary_flow_listener = Some(listener);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &InfoflowConfig {
        &self.config
    }

    pub fn icfg(&self) -> &dyn InfoflowCfg {
        self.icfg.as_ref()
    }

    pub fn aliasing(&self) -> &dyn Aliasing {
        self.aliasing.as_ref()
    }

    pub fn source_sink_manager(&self) -> Option<&dyn ReversibleSourceSinkManager> {
        self.source_sink_manager.as_deref()
    }

    pub fn taint_wrapper(&self) -> Option<&dyn ReversibleTaintWrapper> {
        self.taint_wrapper.as_deref()
    }

    pub fn secondary_flow_listener(&self) -> Option<&dyn SecondaryFlowListener> {
        self.secondary_flow_listener.as_deref()
    }

    pub fn access_path_factory(&self) -> &AccessPathFactory {
        &self.access_path_factory
    }

    pub fn type_utils(&self) -> &TypeUtils {
        &self.type_utils
    }

    pub fn results(&self) -> &Arc<TaintPropagationResults> {
        &self.results
    }

    pub fn arena(&self) -> &Arc<AbstractionArena> {
        &self.arena
    }

    /// Ask every rule and the solver to stop
    pub fn force_terminate(&self) {
        if !self.terminate.swap(true, Ordering::AcqRel) {
            tracing::info!(run_id = %self.run_id, "termination requested");
        }
    }

    /// Termination was requested or a result listener aborted the run
    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire) || self.results.is_aborted()
    }
}

impl std::fmt::Debug for InfoflowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoflowManager")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .field("results", &self.results.len())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
