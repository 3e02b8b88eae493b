//! Autonomous VM cluster on Exadata infrastructure

use crate::action::LifecycleAction;
use crate::closed_enum;
use crate::descriptor::{AttrType, AttributeSchema, ResourceDescriptor};

pub const KIND: &str = "autonomous_vm_cluster";

closed_enum! {
    /// Oracle license model of the cluster
    pub enum LicenseModel {
        LicenseIncluded => "LICENSE_INCLUDED",
        BringYourOwnLicense => "BRING_YOUR_OWN_LICENSE",
    }
}

pub fn descriptor() -> ResourceDescriptor {
    ResourceDescriptor::new(KIND, "id")
        .attribute(AttributeSchema::required("compartment_id", AttrType::String))
        .attribute(AttributeSchema::required("display_name", AttrType::String).mutable())
        .attribute(AttributeSchema::required("exadata_infrastructure_id", AttrType::String))
        .attribute(AttributeSchema::required("vm_cluster_network_id", AttrType::String))
        .attribute(AttributeSchema::optional("time_zone", AttrType::String))
        .attribute(AttributeSchema::optional("is_local_backup_enabled", AttrType::Bool))
        .attribute(
            AttributeSchema::optional("license_model", AttrType::one_of::<LicenseModel>())
                .with_default(LicenseModel::BringYourOwnLicense.to_string())
                .mutable(),
        )
        .attribute(AttributeSchema::optional("total_container_databases", AttrType::Number).mutable())
        .attribute(AttributeSchema::optional("cpu_core_count_per_node", AttrType::Number).mutable())
        .attribute(AttributeSchema::optional(
            "memory_per_oracle_compute_unit_in_gbs",
            AttrType::Number,
        ))
        .attribute(AttributeSchema::optional(
            "autonomous_data_storage_size_in_tbs",
            AttrType::Number,
        ))
        .attribute(AttributeSchema::optional(
            "freeform_tags",
            AttrType::list_of(AttrType::String),
        )
        .mutable())
        .attribute(AttributeSchema::computed("id", AttrType::String))
        .attribute(AttributeSchema::computed("lifecycle_state", AttrType::String))
        .attribute(AttributeSchema::computed("time_created", AttrType::String))
        .actions(&[
            LifecycleAction::Create,
            LifecycleAction::Update,
            LifecycleAction::Delete,
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desired::DesiredState;
    use crate::value::AttrValue;

    fn required() -> DesiredState {
        DesiredState::new()
            .with("compartment_id", "ocid1.compartment.1")
            .with("display_name", "avmc-1")
            .with("exadata_infrastructure_id", "ocid1.exadata.1")
            .with("vm_cluster_network_id", "ocid1.vmnet.1")
    }

    #[test]
    fn test_license_model_default() {
        let attrs = descriptor().validate_create(&required()).unwrap();
        assert_eq!(
            attrs.get("license_model"),
            Some(&AttrValue::from("BRING_YOUR_OWN_LICENSE"))
        );
    }

    #[test]
    fn test_license_model_case_insensitive() {
        let attrs = descriptor()
            .validate_create(&required().with("license_model", "license_included"))
            .unwrap();
        assert_eq!(
            attrs.get("license_model"),
            Some(&AttrValue::from("LICENSE_INCLUDED"))
        );
    }

    #[test]
    fn test_counts_accept_numeric_strings() {
        let attrs = descriptor()
            .validate_create(&required().with("total_container_databases", "4"))
            .unwrap();
        assert_eq!(
            attrs.get("total_container_databases"),
            Some(&AttrValue::Number(4.0))
        );
        assert!(
            descriptor()
                .validate_create(&required().with("cpu_core_count_per_node", "many"))
                .is_err()
        );
    }

    #[test]
    fn test_mutable_set() {
        let names: Vec<String> = descriptor()
            .mutable_attributes()
            .map(|a| a.name.clone())
            .collect();
        assert!(names.contains(&"display_name".to_string()));
        assert!(names.contains(&"license_model".to_string()));
        assert!(!names.contains(&"time_zone".to_string()));
    }
}
