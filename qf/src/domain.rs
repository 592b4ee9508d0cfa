//! Built-in field schema for device-management inventories, used when
//! QFILTER_ROOT holds no schema.toml.

use qfilter::{FieldDescriptor, FieldSchema, FieldSet};

pub const TARGET: &str = "target";
pub const DISTRIBUTION_SET: &str = "distributionset";
pub const TAG: &str = "tag";
pub const TARGET_TYPE: &str = "targettype";

pub fn builtin_schema() -> FieldSchema {
    let mut schema = FieldSchema::new();

    let metadata = FieldSet::new()
        .with("key", FieldDescriptor::text("key"))
        .with("value", FieldDescriptor::text("value"));

    schema
        .register_field(TARGET, "id", FieldDescriptor::text("controllerId"))
        .register_field(TARGET, "name", FieldDescriptor::text("name"))
        .register_field(TARGET, "description", FieldDescriptor::text("description"))
        .register_field(TARGET, "createdat", FieldDescriptor::number("createdAt"))
        .register_field(TARGET, "lastmodifiedat", FieldDescriptor::number("lastModifiedAt"))
        .register_field(TARGET, "controllerid", FieldDescriptor::text("controllerId"))
        .register_field(
            TARGET,
            "updatestatus",
            FieldDescriptor::enumeration("updateStatus", ["error", "in_sync", "pending", "registered", "unknown"]),
        )
        .register_field(TARGET, "ipaddress", FieldDescriptor::text("address"))
        .register_field(TARGET, "lastcontrollerrequestat", FieldDescriptor::number("lastTargetQuery"))
        .register_field(
            TARGET,
            "assignedds",
            FieldDescriptor::association("assignedDistributionSet", DISTRIBUTION_SET).with_default_sub_field("name"),
        )
        .register_field(
            TARGET,
            "installedds",
            FieldDescriptor::association("installedDistributionSet", DISTRIBUTION_SET).with_default_sub_field("name"),
        )
        .register_field(TARGET, "tag", FieldDescriptor::association("tags", TAG).with_default_sub_field("name"))
        .register_field(
            TARGET,
            "targettype",
            FieldDescriptor::association("targetType", TARGET_TYPE).with_default_sub_field("name"),
        )
        .register_field(TARGET, "attribute", FieldDescriptor::map("controllerAttributes"))
        .register_field(TARGET, "metadata", FieldDescriptor::embedded("metadata", metadata.clone()))
        .register_alias(TARGET, "lastrequest", "lastcontrollerrequestat");

    schema
        .register_field(DISTRIBUTION_SET, "id", FieldDescriptor::number("id"))
        .register_field(DISTRIBUTION_SET, "name", FieldDescriptor::text("name"))
        .register_field(DISTRIBUTION_SET, "version", FieldDescriptor::text("version"))
        .register_field(DISTRIBUTION_SET, "description", FieldDescriptor::text("description"))
        .register_field(DISTRIBUTION_SET, "type", FieldDescriptor::text("type.key"))
        .register_field(DISTRIBUTION_SET, "valid", FieldDescriptor::boolean("valid"))
        .register_field(DISTRIBUTION_SET, "complete", FieldDescriptor::boolean("complete"))
        .register_field(DISTRIBUTION_SET, "tag", FieldDescriptor::association("tags", TAG).with_default_sub_field("name"))
        .register_field(DISTRIBUTION_SET, "metadata", FieldDescriptor::embedded("metadata", metadata));

    schema
        .register_field(TAG, "id", FieldDescriptor::number("id"))
        .register_field(TAG, "name", FieldDescriptor::text("name"))
        .register_field(TAG, "description", FieldDescriptor::text("description"))
        .register_field(TAG, "colour", FieldDescriptor::text("colour"));

    schema
        .register_field(TARGET_TYPE, "id", FieldDescriptor::number("id"))
        .register_field(TARGET_TYPE, "name", FieldDescriptor::text("name"))
        .register_field(TARGET_TYPE, "key", FieldDescriptor::text("key"))
        .register_field(TARGET_TYPE, "description", FieldDescriptor::text("description"));

    schema
}
