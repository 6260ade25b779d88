//! Stack-to-template rendering.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::asset::{AssetManifest, AssetManifestEntry, object_key_for};
use crate::model::{
    Bucket, EnvValue, Function, LogicalId, OutputValue, Resource, RestApi, Role, Route, Stack,
};
use crate::naming;

use super::intrinsics::{
    ACCOUNT_ID, api_url, bucket_arn, execute_api_arn, get_att, lambda_integration_uri,
    managed_policy_arn, reference, secret_arn,
};
use super::template::{Template, TemplateOutput, TemplateResource};
use super::{SynthError, SynthOptions, SynthOutput, graph};

const POLICY_VERSION: &str = "2012-10-17";
const SECRET_READ_ACTIONS: [&str; 2] = [
    "secretsmanager:DescribeSecret",
    "secretsmanager:GetSecretValue",
];

/// Render a stack into a CloudFormation template.
///
/// Every code asset is fingerprinted so functions point at content-addressed
/// object keys. The finished template is checked for dangling references and
/// dependency cycles before it is returned.
pub fn synthesize(stack: &Stack, options: &SynthOptions) -> Result<SynthOutput, SynthError> {
    let mut renderer = Renderer::new(stack, options);
    renderer.resolve_bucket_names()?;
    renderer.resolve_assets()?;
    renderer.resolve_grants()?;

    for resource in stack.resources() {
        match resource {
            Resource::Bucket(bucket) => renderer.render_bucket(bucket)?,
            Resource::Role(role) => renderer.render_role(role)?,
            Resource::Secret(secret) => {
                tracing::debug!(id = %secret.id, secret = %secret.secret_name, "Secret resolved by name");
            }
            Resource::Function(function) => renderer.render_function(function)?,
            Resource::RestApi(api) => renderer.render_api(api)?,
        }
    }
    renderer.render_outputs()?;

    let Renderer {
        template, manifest, ..
    } = renderer;

    let order = graph::deployment_order(&template)?;
    tracing::info!(
        stack = stack.name(),
        resources = template.resources.len(),
        outputs = template.outputs.len(),
        first = order.first().map(String::as_str).unwrap_or(""),
        "Synthesized template"
    );

    Ok(SynthOutput { template, manifest })
}

struct Renderer<'a> {
    stack: &'a Stack,
    options: &'a SynthOptions,
    template: Template,
    manifest: AssetManifest,
    bucket_names: BTreeMap<LogicalId, String>,
    asset_keys: BTreeMap<PathBuf, String>,
    role_policies: BTreeMap<LogicalId, (LogicalId, BTreeSet<String>)>,
    api_stages: BTreeMap<LogicalId, LogicalId>,
}

impl<'a> Renderer<'a> {
    fn new(stack: &'a Stack, options: &'a SynthOptions) -> Self {
        let mut template = Template::new();
        template.description = options.description.clone();
        Self {
            stack,
            options,
            template,
            manifest: AssetManifest::new(options.asset_bucket_parameter.clone()),
            bucket_names: BTreeMap::new(),
            asset_keys: BTreeMap::new(),
            role_policies: BTreeMap::new(),
            api_stages: BTreeMap::new(),
        }
    }

    fn resolve_bucket_names(&mut self) -> Result<(), SynthError> {
        for resource in self.stack.resources() {
            if let Resource::Bucket(bucket) = resource {
                let name = bucket
                    .bucket_name
                    .clone()
                    .unwrap_or_else(|| naming::generated_bucket_name(self.stack.name(), &bucket.id));
                naming::validate_bucket_name(&name)?;
                self.bucket_names.insert(bucket.id.clone(), name);
            }
        }
        Ok(())
    }

    fn resolve_assets(&mut self) -> Result<(), SynthError> {
        for function in self.stack.functions() {
            let path = function.code.path().to_path_buf();
            if self.asset_keys.contains_key(&path) {
                continue;
            }
            let fingerprint = function.code.fingerprint()?;
            let object_key = object_key_for(&fingerprint);
            self.manifest.assets.push(AssetManifestEntry {
                source: path.display().to_string(),
                fingerprint,
                object_key: object_key.clone(),
            });
            self.asset_keys.insert(path, object_key);
        }

        if !self.asset_keys.is_empty() {
            self.template.parameters.insert(
                self.options.asset_bucket_parameter.clone(),
                json!({
                    "Type": "String",
                    "Description": "Bucket holding the packaged function code assets"
                }),
            );
        }
        Ok(())
    }

    /// Group secret grants by the grantee's role; grants to functions sharing a role collapse
    /// into one statement per secret.
    fn resolve_grants(&mut self) -> Result<(), SynthError> {
        for grant in self.stack.grants() {
            let function = self.function(&grant.grantee)?;
            let secret = self
                .stack
                .secret(&grant.secret)
                .ok_or_else(|| SynthError::Unresolved(grant.secret.clone()))?;
            let role = function.role.clone();
            let policy_id = role.child(&["DefaultPolicy"]);
            self.role_policies
                .entry(role)
                .or_insert_with(|| (policy_id, BTreeSet::new()))
                .1
                .insert(secret.secret_name.clone());
        }
        Ok(())
    }

    fn render_bucket(&mut self, bucket: &Bucket) -> Result<(), SynthError> {
        let name = self.bucket_name(&bucket.id)?;
        let policy = bucket.removal_policy.as_deletion_policy().to_string();
        let mut resource = TemplateResource::new("AWS::S3::Bucket")
            .with_property("BucketName", json!(name));
        resource.deletion_policy = Some(policy.clone());
        resource.update_replace_policy = Some(policy);

        let mut lambda_configurations = Vec::new();
        let mut permissions = BTreeSet::new();
        for notification in self.stack.notifications() {
            if notification.bucket != bucket.id {
                continue;
            }
            lambda_configurations.push(json!({
                "Event": notification.event.as_str(),
                "Function": get_att(notification.target.as_str(), "Arn"),
            }));

            let permission_id = bucket.id.child(&[notification.target.as_str(), "Permission"]);
            if permissions.insert(permission_id.clone()) {
                let permission = TemplateResource::new("AWS::Lambda::Permission")
                    .with_property("Action", json!("lambda:InvokeFunction"))
                    .with_property("FunctionName", get_att(notification.target.as_str(), "Arn"))
                    .with_property("Principal", json!("s3.amazonaws.com"))
                    .with_property("SourceAccount", reference(ACCOUNT_ID))
                    .with_property("SourceArn", bucket_arn(&name));
                self.insert(permission_id.as_str(), permission)?;
            }
        }

        if !lambda_configurations.is_empty() {
            resource = resource.with_property(
                "NotificationConfiguration",
                json!({ "LambdaConfigurations": lambda_configurations }),
            );
            for permission in permissions {
                resource = resource.depends_on(permission.as_str());
            }
        }

        self.insert(bucket.id.as_str(), resource)
    }

    fn render_role(&mut self, role: &Role) -> Result<(), SynthError> {
        let mut resource = TemplateResource::new("AWS::IAM::Role").with_property(
            "AssumeRolePolicyDocument",
            json!({
                "Version": POLICY_VERSION,
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Effect": "Allow",
                    "Principal": { "Service": role.assumed_by.as_str() }
                }]
            }),
        );
        if !role.managed_policies.is_empty() {
            let arns: Vec<Value> = role
                .managed_policies
                .iter()
                .map(|policy| managed_policy_arn(policy.name()))
                .collect();
            resource = resource.with_property("ManagedPolicyArns", Value::Array(arns));
        }
        self.insert(role.id.as_str(), resource)?;

        if let Some((policy_id, secret_names)) = self.role_policies.get(&role.id).cloned() {
            let statements: Vec<Value> = secret_names
                .iter()
                .map(|name| {
                    json!({
                        "Action": SECRET_READ_ACTIONS,
                        "Effect": "Allow",
                        "Resource": secret_arn(name),
                    })
                })
                .collect();
            let policy = TemplateResource::new("AWS::IAM::Policy")
                .with_property("PolicyName", json!(policy_id.as_str()))
                .with_property(
                    "PolicyDocument",
                    json!({ "Version": POLICY_VERSION, "Statement": statements }),
                )
                .with_property("Roles", json!([reference(role.id.as_str())]));
            self.insert(policy_id.as_str(), policy)?;
        }
        Ok(())
    }

    fn render_function(&mut self, function: &Function) -> Result<(), SynthError> {
        let object_key = self
            .asset_keys
            .get(function.code.path())
            .cloned()
            .ok_or_else(|| SynthError::Unresolved(function.id.clone()))?;

        let mut variables = Map::new();
        for (key, value) in &function.environment {
            let resolved = match value {
                EnvValue::Literal(text) => text.clone(),
                EnvValue::BucketName(id) => self.bucket_name(id)?,
                EnvValue::SecretName(id) => self
                    .stack
                    .secret(id)
                    .map(|secret| secret.secret_name.clone())
                    .ok_or_else(|| SynthError::Unresolved(id.clone()))?,
            };
            variables.insert(key.clone(), Value::String(resolved));
        }

        let mut resource = TemplateResource::new("AWS::Lambda::Function")
            .with_property(
                "Code",
                json!({
                    "S3Bucket": reference(&self.options.asset_bucket_parameter),
                    "S3Key": object_key,
                }),
            )
            .with_property("Handler", json!(function.handler))
            .with_property("Runtime", json!(function.runtime))
            .with_property("Role", get_att(function.role.as_str(), "Arn"))
            .with_property("Timeout", json!(function.timeout.as_secs()));
        if !variables.is_empty() {
            resource = resource.with_property("Environment", json!({ "Variables": variables }));
        }

        if let Some((policy_id, _)) = self.role_policies.get(&function.role) {
            resource = resource.depends_on(policy_id.as_str());
        }
        resource = resource.depends_on(function.role.as_str());

        self.insert(function.id.as_str(), resource)
    }

    fn render_api(&mut self, api: &RestApi) -> Result<(), SynthError> {
        self.insert(
            api.id.as_str(),
            TemplateResource::new("AWS::ApiGateway::RestApi").with_property("Name", json!(api.name)),
        )?;

        let routes: Vec<&Route> = self
            .stack
            .routes()
            .iter()
            .filter(|route| route.api == api.id)
            .collect();
        if routes.is_empty() {
            return Ok(());
        }

        let mut path_resources: BTreeMap<String, LogicalId> = BTreeMap::new();
        let mut methods = Vec::new();
        for route in &routes {
            let segments: Vec<&str> = route.segments().collect();
            let mut parent = get_att(api.id.as_str(), "RootResourceId");
            for depth in 0..segments.len() {
                let prefix = segments[..=depth].join("/");
                let resource_id = match path_resources.get(&prefix) {
                    Some(existing) => existing.clone(),
                    None => {
                        let resource_id = api.id.child(&segments[..=depth]);
                        let resource = TemplateResource::new("AWS::ApiGateway::Resource")
                            .with_property("ParentId", parent.clone())
                            .with_property("PathPart", json!(segments[depth]))
                            .with_property("RestApiId", reference(api.id.as_str()));
                        self.insert(resource_id.as_str(), resource)?;
                        path_resources.insert(prefix, resource_id.clone());
                        resource_id
                    }
                };
                parent = reference(resource_id.as_str());
            }

            let method = route.method.as_str();
            let mut method_parts = segments.clone();
            method_parts.push(method);
            let method_id = api.id.child(&method_parts);
            let resource = TemplateResource::new("AWS::ApiGateway::Method")
                .with_property("AuthorizationType", json!("NONE"))
                .with_property("HttpMethod", json!(method))
                .with_property(
                    "Integration",
                    json!({
                        "IntegrationHttpMethod": "POST",
                        "Type": "AWS_PROXY",
                        "Uri": lambda_integration_uri(route.target.as_str()),
                    }),
                )
                .with_property("ResourceId", parent)
                .with_property("RestApiId", reference(api.id.as_str()));
            self.insert(method_id.as_str(), resource)?;

            let arn_path: Vec<&str> = segments
                .iter()
                .map(|segment| if segment.starts_with('{') { "*" } else { *segment })
                .collect();
            let permission = TemplateResource::new("AWS::Lambda::Permission")
                .with_property("Action", json!("lambda:InvokeFunction"))
                .with_property("FunctionName", get_att(route.target.as_str(), "Arn"))
                .with_property("Principal", json!("apigateway.amazonaws.com"))
                .with_property(
                    "SourceArn",
                    execute_api_arn(api.id.as_str(), method, &arn_path.join("/")),
                );
            self.insert(method_id.child(&["Permission"]).as_str(), permission)?;
            methods.push(method_id);
        }

        let fingerprint = routes_fingerprint(&routes);
        let deployment_id = api.id.child(&["Deployment", fingerprint.as_str()]);
        let mut deployment = TemplateResource::new("AWS::ApiGateway::Deployment")
            .with_property("Description", json!(format!("Deployment of {}", api.name)))
            .with_property("RestApiId", reference(api.id.as_str()));
        for method in &methods {
            deployment = deployment.depends_on(method.as_str());
        }
        self.insert(deployment_id.as_str(), deployment)?;

        let stage_id = api.id.child(&["DeploymentStage", api.stage_name.as_str()]);
        let stage = TemplateResource::new("AWS::ApiGateway::Stage")
            .with_property("DeploymentId", reference(deployment_id.as_str()))
            .with_property("RestApiId", reference(api.id.as_str()))
            .with_property("StageName", json!(api.stage_name));
        self.insert(stage_id.as_str(), stage)?;
        self.api_stages.insert(api.id.clone(), stage_id);
        Ok(())
    }

    fn render_outputs(&mut self) -> Result<(), SynthError> {
        for output in self.stack.outputs() {
            let value = match &output.value {
                OutputValue::BucketName(bucket) => reference(bucket.as_str()),
                OutputValue::ApiUrl(api) => {
                    let stage = self.api_stages.get(api).ok_or_else(|| {
                        SynthError::ApiWithoutRoutes {
                            output: output.id.clone(),
                            api: api.clone(),
                        }
                    })?;
                    api_url(api.as_str(), stage.as_str())
                }
            };
            self.template.outputs.insert(
                output.id.to_string(),
                TemplateOutput {
                    value,
                    description: output.description.clone(),
                },
            );
        }
        Ok(())
    }

    fn insert(&mut self, id: &str, resource: TemplateResource) -> Result<(), SynthError> {
        if self.template.resources.contains_key(id) {
            return Err(SynthError::IdCollision(id.to_string()));
        }
        tracing::debug!(id, resource_type = %resource.resource_type, "Rendered resource");
        self.template.resources.insert(id.to_string(), resource);
        Ok(())
    }

    fn bucket_name(&self, id: &LogicalId) -> Result<String, SynthError> {
        self.bucket_names
            .get(id)
            .cloned()
            .ok_or_else(|| SynthError::Unresolved(id.clone()))
    }

    fn function(&self, id: &LogicalId) -> Result<&'a Function, SynthError> {
        self.stack
            .function(id)
            .ok_or_else(|| SynthError::Unresolved(id.clone()))
    }
}

/// Short hash over an API's routes. Embedding it in the deployment's logical id
/// replaces the deployment whenever the routes change, which is what makes the
/// gateway pick up new methods.
fn routes_fingerprint(routes: &[&Route]) -> String {
    let mut lines: Vec<String> = routes
        .iter()
        .map(|route| format!("{} {} {}", route.method, route.path, route.target))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())[..8].to_uppercase()
}
