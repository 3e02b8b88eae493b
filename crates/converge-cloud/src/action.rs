//! Lifecycle actions and change planning

use crate::closed_enum;
use crate::descriptor::{Mutability, ResourceDescriptor};
use crate::desired::DesiredState;
use crate::error::Result;
use crate::state::ObservedState;
use crate::value::{AttrValue, Attributes};
use serde::{Deserialize, Serialize};

closed_enum! {
    /// Lifecycle action a resource kind may declare
    pub enum LifecycleAction {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
        Precheck => "PRECHECK",
        Upgrade => "UPGRADE",
        Rollback => "ROLLBACK",
    }
}

/// Kind of change a plan makes to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Create a new resource
    Create,
    /// Update mutable attributes in place
    Update,
    /// Delete and recreate (an immutable attribute changed)
    Replace,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Replace => write!(f, "replace"),
            ChangeKind::NoOp => write!(f, "no-op"),
        }
    }
}

/// One attribute whose desired value differs from the prior state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub name: String,
    pub before: Option<AttrValue>,
    pub after: AttrValue,
    pub forces_replacement: bool,
}

/// Planned change for a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub kind: String,

    pub change: ChangeKind,

    /// Attribute-level differences, in attribute name order
    pub changes: Vec<AttributeChange>,

    /// Validated desired attributes, defaults applied
    pub desired: Attributes,
}

impl Plan {
    /// Compare desired configuration with the prior observed state.
    ///
    /// Computed attributes and optional attributes absent from `desired`
    /// never produce a difference.
    pub fn compute(
        descriptor: &ResourceDescriptor,
        desired: &DesiredState,
        prior: Option<&ObservedState>,
    ) -> Result<Self> {
        let normalized = descriptor.normalize(desired)?;

        let Some(prior) = prior else {
            let changes = normalized
                .iter()
                .map(|(name, value)| AttributeChange {
                    name: name.clone(),
                    before: None,
                    after: value.clone(),
                    forces_replacement: false,
                })
                .collect();
            return Ok(Self {
                kind: descriptor.kind().to_string(),
                change: ChangeKind::Create,
                changes,
                desired: normalized,
            });
        };

        let mut changes = Vec::new();
        for (name, after) in &normalized {
            let before = prior.attributes.get(name);
            if before == Some(after) {
                continue;
            }
            let forces_replacement = descriptor
                .get_attribute(name)
                .is_some_and(|a| a.mutability == Mutability::Immutable);
            changes.push(AttributeChange {
                name: name.clone(),
                before: before.cloned(),
                after: after.clone(),
                forces_replacement,
            });
        }

        let change = if changes.is_empty() {
            ChangeKind::NoOp
        } else if changes.iter().any(|c| c.forces_replacement) {
            ChangeKind::Replace
        } else {
            ChangeKind::Update
        };

        Ok(Self {
            kind: descriptor.kind().to_string(),
            change,
            changes,
            desired: normalized,
        })
    }

    pub fn has_changes(&self) -> bool {
        self.change != ChangeKind::NoOp
    }

    /// Changed attributes as UPDATE parameters
    pub fn updates(&self) -> Attributes {
        self.changes
            .iter()
            .map(|c| (c.name.clone(), c.after.clone()))
            .collect()
    }

    /// Names of the attributes that force replacement
    pub fn replacement_reasons(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.forces_replacement)
            .map(|c| c.name.as_str())
            .collect()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.change, self.kind)?;
        if self.change != ChangeKind::NoOp {
            let names: Vec<&str> = self.changes.iter().map(|c| c.name.as_str()).collect();
            write!(f, " ({})", names.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AttrType, AttributeSchema};

    fn descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new("cluster", "id")
            .attribute(AttributeSchema::required("shape", AttrType::String))
            .attribute(AttributeSchema::optional("display_name", AttrType::String).mutable())
            .attribute(
                AttributeSchema::optional("node_count", AttrType::Number)
                    .mutable()
                    .with_default(2),
            )
            .attribute(AttributeSchema::optional("time_zone", AttrType::String))
            .attribute(AttributeSchema::computed("state", AttrType::String))
            .actions(&[
                LifecycleAction::Create,
                LifecycleAction::Update,
                LifecycleAction::Delete,
            ])
    }

    fn prior() -> ObservedState {
        ObservedState::new("cluster", "c-1")
            .with_attribute("shape", "X9M")
            .with_attribute("display_name", "primary")
            .with_attribute("node_count", 2)
            .with_attribute("time_zone", "UTC")
            .with_attribute("state", "AVAILABLE")
    }

    #[test]
    fn test_lifecycle_action_parse() {
        assert_eq!(
            "precheck".parse::<LifecycleAction>().unwrap(),
            LifecycleAction::Precheck
        );
        assert_eq!(LifecycleAction::Rollback.to_string(), "ROLLBACK");
        assert!("REBOOT".parse::<LifecycleAction>().is_err());
    }

    #[test]
    fn test_plan_create_without_prior() {
        let desired = DesiredState::new().with("shape", "X9M");
        let plan = Plan::compute(&descriptor(), &desired, None).unwrap();
        assert_eq!(plan.change, ChangeKind::Create);
        assert_eq!(plan.desired.get("node_count"), Some(&AttrValue::from(2)));
    }

    #[test]
    fn test_plan_noop_ignores_absent_and_computed() {
        let desired = DesiredState::new()
            .with("shape", "X9M")
            .with("display_name", "primary");
        let plan = Plan::compute(&descriptor(), &desired, Some(&prior())).unwrap();
        assert_eq!(plan.change, ChangeKind::NoOp);
        assert!(!plan.has_changes());
        assert_eq!(plan.to_string(), "no-op cluster");
    }

    #[test]
    fn test_plan_update_lists_mutable_changes() {
        let desired = DesiredState::new()
            .with("shape", "X9M")
            .with("display_name", "secondary")
            .with("node_count", 4);
        let plan = Plan::compute(&descriptor(), &desired, Some(&prior())).unwrap();

        assert_eq!(plan.change, ChangeKind::Update);
        assert_eq!(plan.changes.len(), 2);
        assert_eq!(plan.changes[0].name, "display_name");
        assert_eq!(plan.changes[0].before, Some(AttrValue::from("primary")));
        assert_eq!(plan.updates().len(), 2);
    }

    #[test]
    fn test_plan_replace_on_immutable_change() {
        let desired = DesiredState::new()
            .with("shape", "X10M")
            .with("display_name", "secondary");
        let plan = Plan::compute(&descriptor(), &desired, Some(&prior())).unwrap();
        assert_eq!(plan.change, ChangeKind::Replace);
        assert_eq!(plan.replacement_reasons(), vec!["shape"]);
    }
}
