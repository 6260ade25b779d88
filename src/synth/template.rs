//! Serializable CloudFormation template document.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Template format version emitted by synthesis.
pub const FORMAT_VERSION: &str = "2010-09-09";

/// CloudFormation template.
///
/// Maps are ordered so that synthesizing the same stack twice yields
/// byte-identical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    /// `AWSTemplateFormatVersion`.
    #[serde(rename = "AWSTemplateFormatVersion", default = "default_format_version")]
    pub format_version: String,
    /// Optional template description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input parameters keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    /// Resources keyed by logical id.
    #[serde(default)]
    pub resources: BTreeMap<String, TemplateResource>,
    /// Outputs keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, TemplateOutput>,
}

/// One entry of the `Resources` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateResource {
    /// Resource type, e.g. `AWS::S3::Bucket`.
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    /// Explicit ordering dependencies.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub depends_on: Vec<String>,
    /// Behaviour when the resource is removed from the stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,
    /// Behaviour when an update replaces the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

impl TemplateResource {
    /// Resource of the given type with no properties.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set a property.
    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// Add an explicit dependency. Adding the same dependency twice is a no-op.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Property lookup.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// One entry of the `Outputs` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateOutput {
    /// Output value, usually an intrinsic function.
    pub value: Value,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Template {
    /// Empty template.
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            description: None,
            parameters: BTreeMap::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Parse a template from JSON.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Render the template as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Resource lookup by logical id.
    pub fn resource(&self, id: &str) -> Option<&TemplateResource> {
        self.resources.get(id)
    }

    /// All resources of the given type, in logical-id order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a TemplateResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
            .map(|(id, resource)| (id.as_str(), resource))
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_cloudformation_keys() {
        let mut template = Template::new();
        template.resources.insert(
            "Store".into(),
            TemplateResource::new("AWS::S3::Bucket")
                .with_property("BucketName", json!("docs"))
                .depends_on("Other"),
        );

        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Resources"]["Store"]["Type"], "AWS::S3::Bucket");
        assert_eq!(value["Resources"]["Store"]["Properties"]["BucketName"], "docs");
        assert_eq!(value["Resources"]["Store"]["DependsOn"], json!(["Other"]));
        assert!(value.get("Outputs").is_none());
        assert!(value["Resources"]["Store"].get("DeletionPolicy").is_none());
    }

    #[test]
    fn accepts_scalar_depends_on() {
        let template = Template::from_json(
            r#"{
                "Resources": {
                    "A": { "Type": "AWS::SNS::Topic", "DependsOn": "B" },
                    "B": { "Type": "AWS::SNS::Topic" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(template.format_version, FORMAT_VERSION);
        assert_eq!(template.resource("A").unwrap().depends_on, vec!["B".to_string()]);
        assert_eq!(template.resources_of_type("AWS::SNS::Topic").count(), 2);
    }
}
