use super::{ComponentState, Orchestrator};
use std::collections::HashMap;
use tracing::debug;

impl Orchestrator {
    /// Update component state
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let mut states = self.component_states.lock().await;
        states.insert(component.to_string(), state.clone());
        debug!("Component '{}' state changed to: {:?}", component, state);
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        let states = self.component_states.lock().await;
        states.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        let states = self.component_states.lock().await;
        states.clone()
    }

    /// Whether any component ended in [`ComponentState::Failed`]
    pub async fn any_component_failed(&self) -> bool {
        let states = self.component_states.lock().await;
        states.values().any(|s| *s == ComponentState::Failed)
    }
}
