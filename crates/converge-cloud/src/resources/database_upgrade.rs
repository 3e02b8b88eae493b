//! Database upgrade
//!
//! Not a resource in its own right: every PRECHECK, UPGRADE or ROLLBACK runs
//! against an existing database and leaves a history entry behind.

use crate::action::LifecycleAction;
use crate::closed_enum;
use crate::descriptor::{ActionSchema, AttrType, AttributeSchema, ResourceDescriptor};
use crate::enums::ClosedEnum;

pub const KIND: &str = "database_upgrade";

closed_enum! {
    /// Where the new database software comes from
    pub enum UpgradeSource {
        DbVersion => "DB_VERSION",
        DbSoftwareImage => "DB_SOFTWARE_IMAGE",
        DbHome => "DB_HOME",
    }
}

fn upgrade_params(action: LifecycleAction) -> ActionSchema {
    ActionSchema::new(action)
        .param(AttributeSchema::required("source", AttrType::one_of::<UpgradeSource>()))
        .param(AttributeSchema::optional("database_software_image_id", AttrType::String))
        .param(AttributeSchema::optional("db_version", AttrType::String))
        .param(AttributeSchema::optional("db_home_id", AttrType::String))
        .param(AttributeSchema::optional("options", AttrType::String))
        .require_when(
            "database_software_image_id",
            "source",
            UpgradeSource::DbSoftwareImage.as_str(),
        )
        .require_when("db_version", "source", UpgradeSource::DbVersion.as_str())
        .require_when("db_home_id", "source", UpgradeSource::DbHome.as_str())
}

pub fn descriptor() -> ResourceDescriptor {
    ResourceDescriptor::new(KIND, "database_id")
        .attribute(AttributeSchema::computed("database_id", AttrType::String))
        .attribute(AttributeSchema::computed("db_name", AttrType::String))
        .attribute(AttributeSchema::computed("db_version", AttrType::String))
        .attribute(AttributeSchema::computed("db_home_id", AttrType::String))
        .attribute(AttributeSchema::computed("character_set", AttrType::String))
        .attribute(AttributeSchema::computed("lifecycle_state", AttrType::String))
        .attribute(AttributeSchema::computed("lifecycle_details", AttrType::String))
        .action(upgrade_params(LifecycleAction::Precheck))
        .action(upgrade_params(LifecycleAction::Upgrade))
        .action(
            ActionSchema::new(LifecycleAction::Rollback)
                .param(AttributeSchema::optional("options", AttrType::String)),
        )
}
