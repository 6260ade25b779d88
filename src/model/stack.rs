//! Stack assembly: declaration pass, wiring pass, and reference validation.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::naming;

use super::{
    Bucket, EnvValue, EventNotification, Function, HttpMethod, LogicalId, Output, RestApi, Role,
    Route, SecretGrant, SecretRef,
};

/// Upper bound the platform enforces on function execution time.
pub const MAX_FUNCTION_TIMEOUT_SECS: u64 = 900;
const MAX_STACK_NAME_LEN: usize = 128;

/// Errors raised while declaring or wiring a stack.
#[derive(Debug, Error)]
pub enum StackError {
    /// Logical id was empty, too long, or not alphanumeric.
    #[error("invalid logical id '{0}': must be alphanumeric and start with a letter")]
    InvalidLogicalId(String),
    /// Stack name does not satisfy CloudFormation naming rules.
    #[error("invalid stack name '{0}': must start with a letter and contain only letters, digits and hyphens")]
    InvalidStackName(String),
    /// Two records were declared under the same logical id.
    #[error("duplicate logical id: {0}")]
    DuplicateId(LogicalId),
    /// Two outputs share a key.
    #[error("duplicate output: {0}")]
    DuplicateOutput(LogicalId),
    /// A record references an id that was never declared.
    #[error("{referrer} references undeclared resource {target}")]
    UnknownReference {
        /// Description of the referencing record.
        referrer: String,
        /// Missing id.
        target: LogicalId,
    },
    /// A record references a declared id of the wrong kind.
    #[error("{referrer} expects {target} to be a {expected}, found a {found}")]
    WrongKind {
        /// Description of the referencing record.
        referrer: String,
        /// Referenced id.
        target: LogicalId,
        /// Kind required by the reference.
        expected: ResourceKind,
        /// Kind actually declared under the id.
        found: ResourceKind,
    },
    /// Route path is empty or contains characters the gateway rejects.
    #[error("invalid route path '{0}'")]
    InvalidRoutePath(String),
    /// The same method and path were routed twice on one API.
    #[error("duplicate route {method} /{path} on {api}")]
    DuplicateRoute {
        /// Gateway carrying the route.
        api: LogicalId,
        /// Duplicated verb.
        method: HttpMethod,
        /// Duplicated path.
        path: String,
    },
    /// Function timeout is zero or above the platform limit.
    #[error("function {function}: timeout of {seconds}s is outside 1..=900")]
    InvalidTimeout {
        /// Offending function.
        function: LogicalId,
        /// Requested timeout in seconds.
        seconds: u64,
    },
    /// Bucket name violates S3 naming rules.
    #[error("invalid bucket name '{name}': {reason}")]
    InvalidBucketName {
        /// Rejected name.
        name: String,
        /// Rule that was violated.
        reason: &'static str,
    },
}

/// Kind of a declared record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Object storage container.
    Bucket,
    /// Execution role.
    Role,
    /// Secret reference.
    Secret,
    /// Compute function.
    Function,
    /// HTTP gateway.
    RestApi,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::Role => "role",
            ResourceKind::Secret => "secret",
            ResourceKind::Function => "function",
            ResourceKind::RestApi => "rest api",
        };
        f.write_str(label)
    }
}

/// Any declared record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Object storage container.
    Bucket(Bucket),
    /// Execution role.
    Role(Role),
    /// Secret reference.
    Secret(SecretRef),
    /// Compute function.
    Function(Function),
    /// HTTP gateway.
    RestApi(RestApi),
}

impl Resource {
    /// Logical id of the record.
    pub fn id(&self) -> &LogicalId {
        match self {
            Resource::Bucket(bucket) => &bucket.id,
            Resource::Role(role) => &role.id,
            Resource::Secret(secret) => &secret.id,
            Resource::Function(function) => &function.id,
            Resource::RestApi(api) => &api.id,
        }
    }

    /// Kind of the record.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Bucket(_) => ResourceKind::Bucket,
            Resource::Role(_) => ResourceKind::Role,
            Resource::Secret(_) => ResourceKind::Secret,
            Resource::Function(_) => ResourceKind::Function,
            Resource::RestApi(_) => ResourceKind::RestApi,
        }
    }
}

/// Validated, immutable collection of declared records and their wiring.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    resources: Vec<Resource>,
    index: HashMap<LogicalId, usize>,
    notifications: Vec<EventNotification>,
    grants: Vec<SecretGrant>,
    routes: Vec<Route>,
    outputs: Vec<Output>,
}

impl Stack {
    /// Stack name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared records in declaration order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Look up a declared record.
    pub fn resource(&self, id: &LogicalId) -> Option<&Resource> {
        self.index.get(id).map(|&position| &self.resources[position])
    }

    /// Look up a declared bucket.
    pub fn bucket(&self, id: &LogicalId) -> Option<&Bucket> {
        match self.resource(id) {
            Some(Resource::Bucket(bucket)) => Some(bucket),
            _ => None,
        }
    }

    /// Look up a declared function.
    pub fn function(&self, id: &LogicalId) -> Option<&Function> {
        match self.resource(id) {
            Some(Resource::Function(function)) => Some(function),
            _ => None,
        }
    }

    /// Look up a declared secret reference.
    pub fn secret(&self, id: &LogicalId) -> Option<&SecretRef> {
        match self.resource(id) {
            Some(Resource::Secret(secret)) => Some(secret),
            _ => None,
        }
    }

    /// Look up a declared role.
    pub fn role(&self, id: &LogicalId) -> Option<&Role> {
        match self.resource(id) {
            Some(Resource::Role(role)) => Some(role),
            _ => None,
        }
    }

    /// All declared functions.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.resources.iter().filter_map(|resource| match resource {
            Resource::Function(function) => Some(function),
            _ => None,
        })
    }

    /// Event notifications.
    pub fn notifications(&self) -> &[EventNotification] {
        &self.notifications
    }

    /// Secret read grants, de-duplicated.
    pub fn grants(&self) -> &[SecretGrant] {
        &self.grants
    }

    /// Gateway routes.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Deployment outputs.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }
}

/// Two-pass stack builder.
///
/// Resources are declared first; wiring records may then reference any
/// declared id. Nothing is resolved until [`StackBuilder::build`], so the
/// order in which records are added does not matter.
#[derive(Debug)]
pub struct StackBuilder {
    name: String,
    resources: Vec<Resource>,
    index: HashMap<LogicalId, usize>,
    notifications: Vec<EventNotification>,
    grants: Vec<SecretGrant>,
    routes: Vec<Route>,
    outputs: Vec<Output>,
}

impl StackBuilder {
    /// Start a stack, validating its name.
    pub fn new(name: impl Into<String>) -> Result<Self, StackError> {
        let name = name.into();
        validate_stack_name(&name)?;
        Ok(Self {
            name,
            resources: Vec::new(),
            index: HashMap::new(),
            notifications: Vec::new(),
            grants: Vec::new(),
            routes: Vec::new(),
            outputs: Vec::new(),
        })
    }

    /// Declare a bucket.
    pub fn bucket(&mut self, bucket: Bucket) -> Result<LogicalId, StackError> {
        if let Some(name) = bucket.bucket_name.as_deref() {
            naming::validate_bucket_name(name)?;
        }
        self.declare(Resource::Bucket(bucket))
    }

    /// Declare an execution role.
    pub fn role(&mut self, role: Role) -> Result<LogicalId, StackError> {
        self.declare(Resource::Role(role))
    }

    /// Declare a secret reference.
    pub fn secret(&mut self, secret: SecretRef) -> Result<LogicalId, StackError> {
        self.declare(Resource::Secret(secret))
    }

    /// Declare a function.
    pub fn function(&mut self, function: Function) -> Result<LogicalId, StackError> {
        let seconds = function.timeout.as_secs();
        if seconds == 0 || seconds > MAX_FUNCTION_TIMEOUT_SECS {
            return Err(StackError::InvalidTimeout {
                function: function.id,
                seconds,
            });
        }
        self.declare(Resource::Function(function))
    }

    /// Declare an HTTP gateway.
    pub fn rest_api(&mut self, api: RestApi) -> Result<LogicalId, StackError> {
        self.declare(Resource::RestApi(api))
    }

    /// Route a bucket event to a function.
    pub fn notify(&mut self, notification: EventNotification) -> &mut Self {
        if !self.notifications.contains(&notification) {
            self.notifications.push(notification);
        }
        self
    }

    /// Grant a function's role read access to a secret.
    pub fn grant_read(&mut self, secret: LogicalId, grantee: LogicalId) -> &mut Self {
        let grant = SecretGrant { secret, grantee };
        if !self.grants.contains(&grant) {
            self.grants.push(grant);
        }
        self
    }

    /// Add a gateway route.
    pub fn route(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    /// Add a deployment output.
    pub fn output(&mut self, output: Output) -> &mut Self {
        self.outputs.push(output);
        self
    }

    /// Resolve every cross-reference and freeze the stack.
    pub fn build(mut self) -> Result<Stack, StackError> {
        for resource in &self.resources {
            if let Resource::Function(function) = resource {
                self.validate_function(function)?;
            }
        }

        for notification in &self.notifications {
            let referrer = format!("notification {} -> {}", notification.bucket, notification.target);
            self.expect_kind(&referrer, &notification.bucket, ResourceKind::Bucket)?;
            self.expect_kind(&referrer, &notification.target, ResourceKind::Function)?;
        }

        for grant in &self.grants {
            let referrer = format!("grant {} -> {}", grant.secret, grant.grantee);
            self.expect_kind(&referrer, &grant.secret, ResourceKind::Secret)?;
            self.expect_kind(&referrer, &grant.grantee, ResourceKind::Function)?;
        }

        let mut seen_routes = Vec::new();
        for route in &mut self.routes {
            route.path = normalize_route_path(&route.path)?;
            let key = (route.api.clone(), route.method, route.path.clone());
            if seen_routes.contains(&key) {
                return Err(StackError::DuplicateRoute {
                    api: key.0,
                    method: key.1,
                    path: key.2,
                });
            }
            seen_routes.push(key);
        }
        for route in &self.routes {
            let referrer = format!("route {} /{}", route.method, route.path);
            self.expect_kind(&referrer, &route.api, ResourceKind::RestApi)?;
            self.expect_kind(&referrer, &route.target, ResourceKind::Function)?;
        }

        let mut output_ids = Vec::new();
        for output in &self.outputs {
            if output_ids.contains(&&output.id) {
                return Err(StackError::DuplicateOutput(output.id.clone()));
            }
            output_ids.push(&output.id);

            let referrer = format!("output {}", output.id);
            let expected = match output.value {
                super::OutputValue::BucketName(_) => ResourceKind::Bucket,
                super::OutputValue::ApiUrl(_) => ResourceKind::RestApi,
            };
            self.expect_kind(&referrer, output.value.source(), expected)?;
        }

        tracing::debug!(
            stack = %self.name,
            resources = self.resources.len(),
            notifications = self.notifications.len(),
            grants = self.grants.len(),
            routes = self.routes.len(),
            outputs = self.outputs.len(),
            "Stack wiring validated"
        );

        Ok(Stack {
            name: self.name,
            resources: self.resources,
            index: self.index,
            notifications: self.notifications,
            grants: self.grants,
            routes: self.routes,
            outputs: self.outputs,
        })
    }

    fn declare(&mut self, resource: Resource) -> Result<LogicalId, StackError> {
        let id = resource.id().clone();
        if self.index.contains_key(&id) {
            return Err(StackError::DuplicateId(id));
        }
        tracing::debug!(id = %id, kind = %resource.kind(), "Declared resource");
        self.index.insert(id.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(id)
    }

    fn validate_function(&self, function: &Function) -> Result<(), StackError> {
        let referrer = format!("function {}", function.id);
        self.expect_kind(&referrer, &function.role, ResourceKind::Role)?;
        for (key, value) in &function.environment {
            let referrer = format!("function {} environment {key}", function.id);
            match value {
                EnvValue::Literal(_) => {}
                EnvValue::BucketName(id) => self.expect_kind(&referrer, id, ResourceKind::Bucket)?,
                EnvValue::SecretName(id) => self.expect_kind(&referrer, id, ResourceKind::Secret)?,
            }
        }
        Ok(())
    }

    fn expect_kind(
        &self,
        referrer: &str,
        target: &LogicalId,
        expected: ResourceKind,
    ) -> Result<(), StackError> {
        let Some(&position) = self.index.get(target) else {
            return Err(StackError::UnknownReference {
                referrer: referrer.to_string(),
                target: target.clone(),
            });
        };
        let found = self.resources[position].kind();
        if found == expected {
            Ok(())
        } else {
            Err(StackError::WrongKind {
                referrer: referrer.to_string(),
                target: target.clone(),
                expected,
                found,
            })
        }
    }
}

fn validate_stack_name(name: &str) -> Result<(), StackError> {
    let starts_with_letter = name
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic());
    let allowed = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if starts_with_letter && allowed && name.len() <= MAX_STACK_NAME_LEN {
        Ok(())
    } else {
        Err(StackError::InvalidStackName(name.to_string()))
    }
}

/// Normalize a route path to `segment/segment`, rejecting characters the gateway refuses.
fn normalize_route_path(path: &str) -> Result<String, StackError> {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    if segments.is_empty() {
        return Err(StackError::InvalidRoutePath(path.to_string()));
    }

    for segment in &segments {
        let plain = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        let parameter = segment
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .is_some_and(|name| {
                !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if !plain && !parameter {
            return Err(StackError::InvalidRoutePath(path.to_string()));
        }
    }

    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::asset::CodeAsset;
    use crate::model::{OutputValue, RemovalPolicy, ServicePrincipal};

    fn id(value: &str) -> LogicalId {
        LogicalId::new(value).unwrap()
    }

    fn function(name: &str, role: &str) -> Function {
        Function {
            id: id(name),
            runtime: "python3.9".into(),
            handler: "handler.main".into(),
            code: CodeAsset::new("lambda"),
            role: id(role),
            timeout: Duration::from_secs(60),
            environment: BTreeMap::new(),
        }
    }

    fn builder_with_role() -> StackBuilder {
        let mut builder = StackBuilder::new("TestStack").unwrap();
        builder
            .role(Role::new(id("Role"), ServicePrincipal::lambda()))
            .unwrap();
        builder
    }

    #[test]
    fn rejects_duplicate_ids_across_kinds() {
        let mut builder = builder_with_role();
        let err = builder
            .secret(SecretRef::new(id("Role"), "some-secret"))
            .unwrap_err();
        assert!(matches!(err, StackError::DuplicateId(dup) if dup.as_str() == "Role"));
    }

    #[test]
    fn rejects_invalid_stack_names() {
        assert!(StackBuilder::new("9lives").is_err());
        assert!(StackBuilder::new("my_stack").is_err());
        assert!(StackBuilder::new("My-Stack-1").is_ok());
    }

    #[test]
    fn wiring_order_does_not_matter() {
        let mut builder = builder_with_role();
        builder.grant_read(id("Secret"), id("Worker"));
        builder.function(function("Worker", "Role")).unwrap();
        builder.secret(SecretRef::new(id("Secret"), "creds")).unwrap();

        let stack = builder.build().expect("grant declared before its targets");
        assert_eq!(stack.grants().len(), 1);
    }

    #[test]
    fn rejects_dangling_references() {
        let mut builder = builder_with_role();
        builder.function(function("Worker", "Role")).unwrap();
        builder.grant_read(id("Missing"), id("Worker"));

        let err = builder.build().unwrap_err();
        assert!(
            matches!(err, StackError::UnknownReference { ref target, .. } if target.as_str() == "Missing"),
            "{err}"
        );
    }

    #[test]
    fn rejects_references_of_the_wrong_kind() {
        let mut builder = builder_with_role();
        builder.function(function("Worker", "Role")).unwrap();
        builder.output(Output::new(id("Url"), OutputValue::ApiUrl(id("Worker"))));

        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            StackError::WrongKind {
                expected: ResourceKind::RestApi,
                found: ResourceKind::Function,
                ..
            }
        ));
    }

    #[test]
    fn function_role_must_be_a_role() {
        let mut builder = StackBuilder::new("TestStack").unwrap();
        builder
            .bucket(Bucket {
                id: id("Store"),
                removal_policy: RemovalPolicy::Destroy,
                bucket_name: None,
            })
            .unwrap();
        builder.function(function("Worker", "Store")).unwrap();
        assert!(matches!(builder.build(), Err(StackError::WrongKind { .. })));
    }

    #[test]
    fn rejects_out_of_range_timeouts() {
        let mut builder = builder_with_role();
        let mut slow = function("Slow", "Role");
        slow.timeout = Duration::from_secs(901);
        assert!(matches!(
            builder.function(slow),
            Err(StackError::InvalidTimeout { seconds: 901, .. })
        ));

        let mut instant = function("Instant", "Role");
        instant.timeout = Duration::from_millis(500);
        assert!(builder.function(instant).is_err());
    }

    #[test]
    fn grants_are_deduplicated() {
        let mut builder = builder_with_role();
        builder.function(function("Worker", "Role")).unwrap();
        builder.secret(SecretRef::new(id("Secret"), "creds")).unwrap();
        builder
            .grant_read(id("Secret"), id("Worker"))
            .grant_read(id("Secret"), id("Worker"));

        let stack = builder.build().unwrap();
        assert_eq!(stack.grants().len(), 1);
    }

    #[test]
    fn normalizes_and_validates_route_paths() {
        assert_eq!(normalize_route_path("/upload/").unwrap(), "upload");
        assert_eq!(normalize_route_path("docs/{doc_id}").unwrap(), "docs/{doc_id}");
        assert!(normalize_route_path("/").is_err());
        assert!(normalize_route_path("up load").is_err());
        assert!(normalize_route_path("docs/{}").is_err());
    }

    #[test]
    fn rejects_duplicate_routes_after_normalization() {
        let mut builder = builder_with_role();
        builder.function(function("Worker", "Role")).unwrap();
        builder
            .rest_api(RestApi {
                id: id("Api"),
                name: "Api".into(),
                stage_name: "prod".into(),
            })
            .unwrap();
        for path in ["upload", "/upload"] {
            builder.route(Route {
                api: id("Api"),
                method: HttpMethod::Post,
                path: path.into(),
                target: id("Worker"),
            });
        }
        assert!(matches!(builder.build(), Err(StackError::DuplicateRoute { .. })));
    }

    #[test]
    fn rejects_duplicate_outputs() {
        let mut builder = StackBuilder::new("TestStack").unwrap();
        builder
            .bucket(Bucket {
                id: id("Store"),
                removal_policy: RemovalPolicy::Destroy,
                bucket_name: None,
            })
            .unwrap();
        builder
            .output(Output::new(id("Name"), OutputValue::BucketName(id("Store"))))
            .output(Output::new(id("Name"), OutputValue::BucketName(id("Store"))));
        assert!(matches!(builder.build(), Err(StackError::DuplicateOutput(_))));
    }

    #[test]
    fn explicit_bucket_names_are_validated() {
        let mut builder = StackBuilder::new("TestStack").unwrap();
        let err = builder
            .bucket(Bucket {
                id: id("Store"),
                removal_policy: RemovalPolicy::Destroy,
                bucket_name: Some("Not_Valid".into()),
            })
            .unwrap_err();
        assert!(matches!(err, StackError::InvalidBucketName { .. }));
    }
}
