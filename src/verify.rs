//! Audit of a synthesized template against the pipeline's required topology.
//!
//! Checks operate on the template JSON only, so templates synthesized
//! earlier or edited by hand can be audited the same way as fresh output.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::config::StackConfig;
use crate::pipeline;
use crate::synth::intrinsics::literal_text;
use crate::synth::{Template, TemplateResource, deployment_order, references};

const BUCKET_TYPE: &str = "AWS::S3::Bucket";
const FUNCTION_TYPE: &str = "AWS::Lambda::Function";
const POLICY_TYPE: &str = "AWS::IAM::Policy";
const METHOD_TYPE: &str = "AWS::ApiGateway::Method";
const SECRET_READ_ACTION: &str = "secretsmanager:GetSecretValue";

/// Property being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Check {
    /// The bucket is deleted together with the stack.
    BucketRemoval,
    /// Both functions run as one role carrying exactly the expected managed policies.
    SharedRole,
    /// Only the upload function receives the bucket name.
    BucketNameEnv,
    /// Both functions receive both secret names.
    SecretNameEnv,
    /// Both functions can read both secrets.
    SecretGrants,
    /// The API exposes exactly the two expected routes.
    Routes,
    /// Object-created events invoke only the upload function.
    Notifications,
    /// Outputs are exactly the bucket name and API URL.
    Outputs,
    /// Every reference resolves and resources can be ordered.
    DependencyGraph,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Check::BucketRemoval => "bucket-removal",
            Check::SharedRole => "shared-role",
            Check::BucketNameEnv => "bucket-name-env",
            Check::SecretNameEnv => "secret-name-env",
            Check::SecretGrants => "secret-grants",
            Check::Routes => "routes",
            Check::Notifications => "notifications",
            Check::Outputs => "outputs",
            Check::DependencyGraph => "dependency-graph",
        };
        f.write_str(label)
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Property that does not hold.
    pub check: Check,
    /// What was found instead.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check, self.message)
    }
}

/// Expected route: verb, path, and the function it must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedRoute {
    /// Upper-case HTTP verb.
    pub method: String,
    /// Path below the API root.
    pub path: String,
    /// Logical id of the target function.
    pub function: String,
}

/// What a compliant template must contain.
#[derive(Debug, Clone)]
pub struct Expectations {
    /// Logical id of the bucket.
    pub bucket: String,
    /// Logical id of the upload function.
    pub upload_function: String,
    /// Logical id of the query function.
    pub query_function: String,
    /// Managed policy names expected on the shared role.
    pub managed_policies: Vec<String>,
    /// Environment key carrying the bucket name.
    pub bucket_env: String,
    /// Environment key and secret name pairs both functions must carry.
    pub secret_env: Vec<(String, String)>,
    /// Routes the API must expose, and no others.
    pub routes: Vec<ExpectedRoute>,
    /// Output carrying the bucket name.
    pub bucket_output: String,
    /// Output carrying the API URL.
    pub api_output: String,
}

impl Expectations {
    /// Expectations for the pipeline stack declared from `config`.
    pub fn for_pipeline(config: &StackConfig) -> Self {
        let route = |method: &str, path: &str, function: &str| ExpectedRoute {
            method: method.to_string(),
            path: path.to_string(),
            function: function.to_string(),
        };
        Self {
            bucket: pipeline::BUCKET_ID.to_string(),
            upload_function: pipeline::UPLOAD_FUNCTION_ID.to_string(),
            query_function: pipeline::QUERY_FUNCTION_ID.to_string(),
            managed_policies: pipeline::MANAGED_POLICIES.iter().map(|p| p.to_string()).collect(),
            bucket_env: pipeline::BUCKET_NAME_ENV.to_string(),
            secret_env: vec![
                (
                    pipeline::OPENAI_SECRET_ENV.to_string(),
                    config.openai_secret_name.clone(),
                ),
                (
                    pipeline::PINECONE_SECRET_ENV.to_string(),
                    config.pinecone_secret_name.clone(),
                ),
            ],
            routes: vec![
                route("POST", pipeline::UPLOAD_PATH, pipeline::UPLOAD_FUNCTION_ID),
                route("GET", pipeline::QUERY_PATH, pipeline::QUERY_FUNCTION_ID),
            ],
            bucket_output: pipeline::BUCKET_OUTPUT_ID.to_string(),
            api_output: pipeline::API_OUTPUT_ID.to_string(),
        }
    }

    fn functions(&self) -> [&str; 2] {
        [self.upload_function.as_str(), self.query_function.as_str()]
    }
}

/// Run every check; an empty result means the template is compliant.
pub fn verify_template(template: &Template, expected: &Expectations) -> Vec<Violation> {
    let mut audit = Audit {
        template,
        expected,
        violations: Vec::new(),
    };
    audit.bucket_removal();
    audit.shared_role();
    audit.bucket_name_env();
    audit.secret_name_env();
    audit.secret_grants();
    audit.routes();
    audit.notifications();
    audit.outputs();
    audit.dependency_graph();

    tracing::debug!(violations = audit.violations.len(), "Verified template");
    audit.violations
}

struct Audit<'a> {
    template: &'a Template,
    expected: &'a Expectations,
    violations: Vec<Violation>,
}

impl<'a> Audit<'a> {
    fn fail(&mut self, check: Check, message: impl Into<String>) {
        self.violations.push(Violation {
            check,
            message: message.into(),
        });
    }

    fn typed(&mut self, check: Check, id: &str, resource_type: &str) -> Option<&'a TemplateResource> {
        let template = self.template;
        match template.resource(id) {
            Some(resource) if resource.resource_type == resource_type => Some(resource),
            Some(resource) => {
                self.fail(
                    check,
                    format!("{id} is a {}, expected {resource_type}", resource.resource_type),
                );
                None
            }
            None => {
                self.fail(check, format!("{id} is missing"));
                None
            }
        }
    }

    fn bucket_removal(&mut self) {
        let (template, expected) = (self.template, self.expected);
        let buckets: Vec<&str> = template.resources_of_type(BUCKET_TYPE).map(|(id, _)| id).collect();
        if buckets.len() != 1 {
            self.fail(
                Check::BucketRemoval,
                format!("expected one bucket, found {}", buckets.len()),
            );
        }
        let Some(bucket) = self.typed(Check::BucketRemoval, &expected.bucket, BUCKET_TYPE) else {
            return;
        };
        for (attribute, policy) in [
            ("DeletionPolicy", &bucket.deletion_policy),
            ("UpdateReplacePolicy", &bucket.update_replace_policy),
        ] {
            if policy.as_deref() != Some("Delete") {
                self.fail(
                    Check::BucketRemoval,
                    format!("{attribute} is {policy:?}, expected Delete"),
                );
            }
        }
    }

    fn shared_role(&mut self) {
        let (template, expected) = (self.template, self.expected);
        let functions: Vec<&str> = template.resources_of_type(FUNCTION_TYPE).map(|(id, _)| id).collect();
        let mut roles = BTreeSet::new();
        for id in &functions {
            match template.resource(id).and_then(function_role) {
                Some(role) => {
                    roles.insert(role);
                }
                None => self.fail(Check::SharedRole, format!("{id} has no role")),
            }
        }
        for id in expected.functions() {
            if !functions.contains(&id) {
                self.fail(Check::SharedRole, format!("function {id} is missing"));
            }
        }
        if roles.len() != 1 {
            self.fail(
                Check::SharedRole,
                format!("functions use {} roles, expected one shared role", roles.len()),
            );
            return;
        }
        let Some(role_id) = roles.into_iter().next() else {
            return;
        };
        let Some(role) = self.typed(Check::SharedRole, &role_id, "AWS::IAM::Role") else {
            return;
        };

        let attached: BTreeSet<String> = role
            .property("ManagedPolicyArns")
            .and_then(Value::as_array)
            .map(|arns| {
                arns.iter()
                    .map(|arn| {
                        let text = literal_text(arn);
                        text.split_once(":policy/")
                            .map(|(_, name)| name.to_string())
                            .unwrap_or(text)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let wanted: BTreeSet<String> = expected.managed_policies.iter().cloned().collect();
        if attached != wanted {
            self.fail(
                Check::SharedRole,
                format!("{role_id} has managed policies {attached:?}, expected {wanted:?}"),
            );
        }
    }

    fn bucket_name_env(&mut self) {
        let (template, expected) = (self.template, self.expected);
        let bucket_name = template
            .resource(&expected.bucket)
            .and_then(|bucket| bucket.property("BucketName"));
        let key = expected.bucket_env.as_str();

        if let Some(env) = self.env(Check::BucketNameEnv, &expected.upload_function) {
            match (env.get(key), bucket_name) {
                (None, _) => self.fail(
                    Check::BucketNameEnv,
                    format!("{} lacks {key}", expected.upload_function),
                ),
                (Some(value), Some(name)) if value != name => self.fail(
                    Check::BucketNameEnv,
                    format!("{key} is {value}, but the bucket is named {name}"),
                ),
                _ => {}
            }
        }
        if let Some(env) = self.env(Check::BucketNameEnv, &expected.query_function) {
            if env.contains_key(key) {
                self.fail(
                    Check::BucketNameEnv,
                    format!("{} must not receive {key}", expected.query_function),
                );
            }
        }
    }

    fn secret_name_env(&mut self) {
        let expected = self.expected;
        for function in expected.functions() {
            let Some(env) = self.env(Check::SecretNameEnv, function) else {
                continue;
            };
            for (key, secret) in &expected.secret_env {
                match env.get(key).and_then(Value::as_str) {
                    Some(value) if value == secret => {}
                    found => self.fail(
                        Check::SecretNameEnv,
                        format!("{function} has {key}={found:?}, expected {secret}"),
                    ),
                }
            }
        }
    }

    fn secret_grants(&mut self) {
        let (template, expected) = (self.template, self.expected);
        for function in expected.functions() {
            let Some(role) = template.resource(function).and_then(function_role) else {
                self.fail(Check::SecretGrants, format!("{function} has no role"));
                continue;
            };
            let readable = self.readable_secrets(&role);
            for (_, secret) in &expected.secret_env {
                let pattern = format!(":secret:{secret}-??????");
                if !readable.iter().any(|arn| arn.ends_with(&pattern)) {
                    self.fail(
                        Check::SecretGrants,
                        format!("role {role} of {function} cannot read secret {secret}"),
                    );
                }
            }
        }
    }

    fn routes(&mut self) {
        let (template, expected) = (self.template, self.expected);
        let mut found = Vec::new();
        for (id, method) in template.resources_of_type(METHOD_TYPE) {
            let verb = method
                .property("HttpMethod")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let path = match method.property("ResourceId") {
                Some(resource) => self.resource_path(resource),
                None => None,
            };
            let Some(path) = path else {
                self.fail(Check::Routes, format!("{id} is not attached to a resolvable path"));
                continue;
            };
            let targets = method
                .property("Integration")
                .and_then(|integration| integration.get("Uri"))
                .map(references)
                .unwrap_or_default();
            let function = targets
                .into_iter()
                .find(|target| {
                    template
                        .resource(target)
                        .is_some_and(|resource| resource.resource_type == FUNCTION_TYPE)
                })
                .unwrap_or_default();
            found.push(ExpectedRoute {
                method: verb,
                path,
                function,
            });
        }

        for route in &expected.routes {
            let matches = found.iter().filter(|candidate| *candidate == route).count();
            if matches != 1 {
                self.fail(
                    Check::Routes,
                    format!(
                        "expected exactly one {} /{} -> {}, found {matches}",
                        route.method, route.path, route.function
                    ),
                );
            }
        }
        for route in &found {
            if !expected.routes.contains(route) {
                self.fail(
                    Check::Routes,
                    format!(
                        "unexpected route {} /{} -> {}",
                        route.method, route.path, route.function
                    ),
                );
            }
        }
    }

    fn notifications(&mut self) {
        let expected = self.expected;
        let Some(bucket) = self.typed(Check::Notifications, &expected.bucket, BUCKET_TYPE) else {
            return;
        };
        let configurations = bucket
            .property("NotificationConfiguration")
            .and_then(|config| config.get("LambdaConfigurations"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut created_targets = BTreeSet::new();
        for configuration in configurations {
            let event = configuration
                .get("Event")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !event.starts_with("s3:ObjectCreated:") {
                continue;
            }
            let targets = configuration.get("Function").map(references).unwrap_or_default();
            created_targets.extend(targets);
        }

        let wanted = BTreeSet::from([expected.upload_function.clone()]);
        if created_targets != wanted {
            self.fail(
                Check::Notifications,
                format!(
                    "object-created events invoke {created_targets:?}, expected only {}",
                    expected.upload_function
                ),
            );
        }
    }

    fn outputs(&mut self) {
        let (template, expected) = (self.template, self.expected);
        let keys: BTreeSet<&str> = template.outputs.keys().map(String::as_str).collect();
        let wanted = BTreeSet::from([expected.bucket_output.as_str(), expected.api_output.as_str()]);
        if keys != wanted {
            self.fail(
                Check::Outputs,
                format!("outputs are {keys:?}, expected {wanted:?}"),
            );
        }

        if let Some(output) = template.outputs.get(&expected.bucket_output) {
            let refers_to_bucket = output.value.get("Ref").and_then(Value::as_str)
                == Some(expected.bucket.as_str())
                || template
                    .resource(&expected.bucket)
                    .and_then(|bucket| bucket.property("BucketName"))
                    == Some(&output.value);
            if !refers_to_bucket {
                self.fail(
                    Check::Outputs,
                    format!("{} does not name the bucket", expected.bucket_output),
                );
            }
        }
        if let Some(output) = template.outputs.get(&expected.api_output) {
            let url = literal_text(&output.value);
            if !(url.starts_with("https://") && url.contains(".execute-api.")) {
                self.fail(
                    Check::Outputs,
                    format!("{} is not an API URL: {url}", expected.api_output),
                );
            }
        }
    }

    fn dependency_graph(&mut self) {
        if let Err(err) = deployment_order(self.template) {
            self.fail(Check::DependencyGraph, err.to_string());
        }
    }

    fn env(&mut self, check: Check, function: &str) -> Option<&'a serde_json::Map<String, Value>> {
        let resource = self.typed(check, function, FUNCTION_TYPE)?;
        let variables = resource
            .property("Environment")
            .and_then(|env| env.get("Variables"))
            .and_then(Value::as_object);
        if variables.is_none() {
            self.fail(check, format!("{function} has no environment"));
        }
        variables
    }

    /// Literal text of every secret ARN a role's attached inline policies allow reading.
    fn readable_secrets(&self, role: &str) -> Vec<String> {
        let mut arns = Vec::new();
        for (_, policy) in self.template.resources_of_type(POLICY_TYPE) {
            let attached = policy
                .property("Roles")
                .map(|roles| references(roles).contains(role))
                .unwrap_or(false);
            if !attached {
                continue;
            }
            let statements = policy
                .property("PolicyDocument")
                .and_then(|document| document.get("Statement"))
                .and_then(Value::as_array);
            for statement in statements.into_iter().flatten() {
                if statement.get("Effect").and_then(Value::as_str) != Some("Allow")
                    || !one_or_many(statement.get("Action")).any(|action| action == SECRET_READ_ACTION)
                {
                    continue;
                }
                if let Some(resource) = statement.get("Resource") {
                    match resource {
                        Value::Array(items) => arns.extend(items.iter().map(literal_text)),
                        other => arns.push(literal_text(other)),
                    }
                }
            }
        }
        arns
    }

    /// Resolve a method's `ResourceId` to its path by walking `ParentId` links up to the root.
    fn resource_path(&self, resource_id: &Value) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = resource_id.clone();
        for _ in 0..self.template.resources.len() + 1 {
            if current.get("Fn::GetAtt").is_some() {
                segments.reverse();
                return Some(segments.join("/"));
            }
            let id = current.get("Ref").and_then(Value::as_str)?;
            let resource = self.template.resource(id)?;
            segments.push(resource.property("PathPart")?.as_str()?.to_string());
            current = resource.property("ParentId")?.clone();
        }
        None
    }
}

fn function_role(function: &TemplateResource) -> Option<String> {
    function
        .property("Role")
        .map(references)
        .and_then(|targets| targets.into_iter().next())
}

fn one_or_many(value: Option<&Value>) -> impl Iterator<Item = &str> {
    let items: Vec<&str> = match value {
        Some(Value::String(single)) => vec![single.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    items.into_iter()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;
    use crate::pipeline::build_pipeline_stack;
    use crate::synth::{SynthOptions, synthesize};

    fn synthesized() -> (Template, Expectations, tempfile::TempDir) {
        synthesized_with(|_| {})
    }

    fn synthesized_with(
        overrides: impl FnOnce(&mut StackConfig),
    ) -> (Template, Expectations, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file_processing.py"), "def lambda_handler(e, c): pass\n").unwrap();
        let mut config = StackConfig {
            asset_dir: dir.path().to_path_buf(),
            ..StackConfig::default()
        };
        overrides(&mut config);
        let stack = build_pipeline_stack(&config).unwrap();
        let template = synthesize(&stack, &SynthOptions::default()).unwrap().template;
        (template, Expectations::for_pipeline(&config), dir)
    }

    fn checks(violations: &[Violation]) -> BTreeSet<Check> {
        violations.iter().map(|violation| violation.check).collect()
    }

    #[test]
    fn synthesized_pipeline_passes_every_check() {
        let (template, expected, _dir) = synthesized();
        let violations = verify_template(&template, &expected);
        assert!(violations.is_empty(), "{violations:#?}");
    }

    #[test]
    fn retained_bucket_is_flagged() {
        let (mut template, expected, _dir) = synthesized();
        template.resources.get_mut(pipeline::BUCKET_ID).unwrap().deletion_policy =
            Some("Retain".into());
        assert_eq!(
            checks(&verify_template(&template, &expected)),
            BTreeSet::from([Check::BucketRemoval])
        );
    }

    #[test]
    fn retained_bucket_on_replacement_is_flagged() {
        let (mut template, expected, _dir) = synthesized();
        template.resources.get_mut(pipeline::BUCKET_ID).unwrap().update_replace_policy =
            Some("Retain".into());
        let violations = verify_template(&template, &expected);
        assert_eq!(checks(&violations), BTreeSet::from([Check::BucketRemoval]));
        assert!(violations[0].message.contains("UpdateReplacePolicy"), "{violations:?}");
    }

    #[test]
    fn bucket_name_leaking_to_query_function_is_flagged() {
        let (mut template, expected, _dir) = synthesized();
        let query = template.resources.get_mut(pipeline::QUERY_FUNCTION_ID).unwrap();
        query.properties["Environment"]["Variables"]["BUCKET_NAME"] = json!("anything");
        assert_eq!(
            checks(&verify_template(&template, &expected)),
            BTreeSet::from([Check::BucketNameEnv])
        );
    }

    #[test]
    fn extra_notification_target_is_flagged() {
        let (mut template, expected, _dir) = synthesized();
        let bucket = template.resources.get_mut(pipeline::BUCKET_ID).unwrap();
        let configurations = bucket.properties["NotificationConfiguration"]["LambdaConfigurations"]
            .as_array_mut()
            .unwrap();
        configurations.push(json!({
            "Event": "s3:ObjectCreated:*",
            "Function": { "Fn::GetAtt": [pipeline::QUERY_FUNCTION_ID, "Arn"] }
        }));
        assert!(checks(&verify_template(&template, &expected)).contains(&Check::Notifications));
    }

    #[test]
    fn missing_grant_and_extra_output_are_flagged() {
        let (mut template, expected, _dir) = synthesized();
        let policy_id = format!("{}DefaultPolicy", pipeline::ROLE_ID);
        let policy = template.resources.get_mut(&policy_id).unwrap();
        policy.properties["PolicyDocument"]["Statement"]
            .as_array_mut()
            .unwrap()
            .pop();
        template.outputs.insert(
            "Extra".into(),
            crate::synth::TemplateOutput {
                value: json!("x"),
                description: None,
            },
        );

        let found = checks(&verify_template(&template, &expected));
        assert_eq!(found, BTreeSet::from([Check::SecretGrants, Check::Outputs]));
    }

    #[test]
    fn grant_on_a_longer_secret_name_does_not_cover_its_prefix() {
        let (mut template, expected, _dir) = synthesized_with(|config| {
            config.openai_secret_name = "key".into();
            config.pinecone_secret_name = "key-two".into();
        });
        let policy_id = format!("{}DefaultPolicy", pipeline::ROLE_ID);
        let statements = template.resources.get_mut(&policy_id).unwrap().properties
            ["PolicyDocument"]["Statement"]
            .as_array_mut()
            .unwrap();
        let before = statements.len();
        statements.retain(|statement| !literal_text(&statement["Resource"]).ends_with(":secret:key-??????"));
        assert_eq!(statements.len(), before - 1);

        let violations = verify_template(&template, &expected);
        assert_eq!(checks(&violations), BTreeSet::from([Check::SecretGrants]));
        assert!(violations.iter().all(|violation| violation.message.ends_with("secret key")));
    }

    #[test]
    fn rerouted_method_is_flagged() {
        let (mut template, expected, _dir) = synthesized();
        let (method_id, _) = template
            .resources_of_type(METHOD_TYPE)
            .find(|(_, method)| method.properties["HttpMethod"] == "GET")
            .map(|(id, method)| (id.to_string(), method.clone()))
            .unwrap();
        template.resources.get_mut(&method_id).unwrap().properties["HttpMethod"] = json!("DELETE");
        assert!(checks(&verify_template(&template, &expected)).contains(&Check::Routes));
    }
}
