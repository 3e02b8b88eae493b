//! Built-in resource descriptors
//!
//! Each submodule declares one resource kind as data. The engine itself
//! knows nothing about them beyond their [`ResourceDescriptor`].

pub mod autonomous_vm_cluster;
pub mod database_upgrade;
pub mod load_balancer_certificate;

use crate::descriptor::ResourceDescriptor;

/// Every built-in descriptor
pub fn catalog() -> Vec<ResourceDescriptor> {
    vec![
        autonomous_vm_cluster::descriptor(),
        database_upgrade::descriptor(),
        load_balancer_certificate::descriptor(),
    ]
}

/// Built-in descriptor for `kind`
pub fn lookup(kind: &str) -> Option<ResourceDescriptor> {
    catalog().into_iter().find(|d| d.kind() == kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_kinds_are_unique() {
        let kinds: HashSet<String> = catalog().iter().map(|d| d.kind().to_string()).collect();
        assert_eq!(kinds.len(), catalog().len());
    }

    #[test]
    fn test_lookup() {
        assert!(lookup(database_upgrade::KIND).is_some());
        assert!(lookup("object_storage_bucket").is_none());
    }

    #[test]
    fn test_identity_fields_are_declared() {
        for descriptor in catalog() {
            assert!(
                descriptor.get_attribute(descriptor.identity_field()).is_some(),
                "{} does not declare {}",
                descriptor.kind(),
                descriptor.identity_field()
            );
        }
    }
}
