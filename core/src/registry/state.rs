//! Installation state: what the registry wants versus what the runtime has.
//!
//! Entities whose best candidate still needs a task are *active*; the rest
//! are settled, either installed or given up on after a fatal failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::registry::EntityResources;
use crate::types::resource::RegisteredResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    /// Wins its entity; the runtime does not have this digest yet.
    Install,
    /// Wins its entity and the runtime reports this digest.
    Installed,
    /// Retracted; waiting to be removed or forgotten.
    Uninstall,
    /// A task for this digest failed fatally.
    Ignored,
    /// Another candidate wins the entity.
    Superseded,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Install => "install",
            ResourceState::Installed => "installed",
            ResourceState::Uninstall => "uninstall",
            ResourceState::Ignored => "ignored",
            ResourceState::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub resource: RegisteredResource,
    pub state: ResourceState,
}

/// All candidates of one entity, best first.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceGroup {
    pub entity_id: String,
    pub resources: Vec<ResourceStatus>,
}

impl ResourceGroup {
    /// State of the best candidate.
    pub fn state(&self) -> Option<ResourceState> {
        self.resources.first().map(|r| r.state)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            Some(ResourceState::Install | ResourceState::Uninstall)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallationState {
    /// Entities with work outstanding.
    pub active: Vec<ResourceGroup>,
    /// Entities the runtime has converged on, or that are ignored.
    pub installed: Vec<ResourceGroup>,
}

impl InstallationState {
    pub(crate) fn from_entities(entities: &BTreeMap<String, EntityResources>) -> Self {
        let mut out = InstallationState::default();
        for (entity, resources) in entities {
            let group = ResourceGroup {
                entity_id: entity.clone(),
                resources: resources
                    .iter()
                    .enumerate()
                    .map(|(i, r)| ResourceStatus {
                        resource: r.clone(),
                        state: state_of(resources, r, i == 0),
                    })
                    .collect(),
            };
            if group.is_active() {
                out.active.push(group);
            } else {
                out.installed.push(group);
            }
        }
        out
    }

    /// True when no entity is waiting for a task.
    pub fn is_settled(&self) -> bool {
        self.active.is_empty()
    }
}

fn state_of(resources: &EntityResources, r: &RegisteredResource, winner: bool) -> ResourceState {
    if !r.installable() {
        ResourceState::Uninstall
    } else if resources.is_ignored(r.digest()) {
        ResourceState::Ignored
    } else if !winner {
        ResourceState::Superseded
    } else if resources.installed_digest() == Some(r.digest()) {
        ResourceState::Installed
    } else {
        ResourceState::Install
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistry;
    use crate::types::resource::ResourcePayload;
    use crate::types::version::Version;

    fn module(url: &str, name: &str, version: &str, digest: &str) -> RegisteredResource {
        RegisteredResource::new(
            "p",
            url,
            &format!("module:{}", name),
            digest,
            0,
            Version::parse(version).unwrap(),
            ResourcePayload::Module {
                symbolic_name: name.into(),
                start_level: None,
            },
        )
    }

    fn states(group: &ResourceGroup) -> Vec<ResourceState> {
        group.resources.iter().map(|r| r.state).collect()
    }

    #[test]
    fn pending_and_installed_entities_are_told_apart() {
        let reg = ResourceRegistry::in_memory();
        reg.add_or_update(module("a1.jar", "a", "1.0.0", "d1"));
        reg.add_or_update(module("a2.jar", "a", "2.0.0", "d2"));
        reg.add_or_update(module("b.jar", "b", "1.0.0", "b1"));
        reg.sync_installed([("module:b", "b1")]);

        let state = reg.installation_state();
        assert!(!state.is_settled());
        assert_eq!(state.active.len(), 1);
        assert_eq!(state.active[0].entity_id, "module:a");
        assert_eq!(
            states(&state.active[0]),
            vec![ResourceState::Install, ResourceState::Superseded]
        );
        assert_eq!(state.installed[0].entity_id, "module:b");
        assert_eq!(state.installed[0].state(), Some(ResourceState::Installed));
    }

    #[test]
    fn ignored_winner_is_settled_until_retracted() {
        let reg = ResourceRegistry::in_memory();
        reg.add_or_update(module("a.jar", "a", "1.0.0", "d1"));
        reg.mark_ignored("module:a", "d1");
        let state = reg.installation_state();
        assert!(state.is_settled());
        assert_eq!(state.installed[0].state(), Some(ResourceState::Ignored));

        reg.remove("module:a", "d1");
        let state = reg.installation_state();
        assert_eq!(state.active[0].state(), Some(ResourceState::Uninstall));
    }

    #[test]
    fn serializes_states_in_kebab_case() {
        let reg = ResourceRegistry::in_memory();
        reg.add_or_update(module("a.jar", "a", "1.0.0", "d1"));
        let json = serde_json::to_value(reg.installation_state()).unwrap();
        assert_eq!(json["active"][0]["resources"][0]["state"], "install");
        assert!(json["installed"].as_array().unwrap().is_empty());
    }
}
