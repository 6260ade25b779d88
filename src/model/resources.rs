//! Declared resource records.
//!
//! Records are plain data. Cross-references between them are expressed as
//! [`LogicalId`]s and checked when the owning stack is built.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::asset::CodeAsset;

use super::LogicalId;

/// What happens to a resource's data when the owning stack is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Delete the resource together with its contents.
    Destroy,
    /// Orphan the resource and keep its contents.
    Retain,
}

impl RemovalPolicy {
    /// CloudFormation `DeletionPolicy` / `UpdateReplacePolicy` value.
    pub fn as_deletion_policy(self) -> &'static str {
        match self {
            RemovalPolicy::Destroy => "Delete",
            RemovalPolicy::Retain => "Retain",
        }
    }
}

/// Object storage container holding uploaded documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Logical id of the bucket.
    pub id: LogicalId,
    /// Teardown behaviour for the bucket and its objects.
    pub removal_policy: RemovalPolicy,
    /// Explicit physical name; generated during synthesis when absent.
    pub bucket_name: Option<String>,
}

/// Service allowed to assume a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal(String);

impl ServicePrincipal {
    /// Principal for an arbitrary service host, e.g. `states.amazonaws.com`.
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    /// Principal of the serverless function service.
    pub fn lambda() -> Self {
        Self::new("lambda.amazonaws.com")
    }

    /// Borrow the principal host name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// AWS-managed permission set attached to a role by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManagedPolicy(String);

impl ManagedPolicy {
    /// Reference an AWS managed policy, e.g. `service-role/AWSLambdaBasicExecutionRole`.
    pub fn aws_managed(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Policy name including any path prefix.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Execution identity assumed by compute functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    /// Logical id of the role.
    pub id: LogicalId,
    /// The only principal trusted to assume the role.
    pub assumed_by: ServicePrincipal,
    /// Managed permission sets attached to the role.
    pub managed_policies: Vec<ManagedPolicy>,
}

impl Role {
    /// Create a role with no attached policies.
    pub fn new(id: LogicalId, assumed_by: ServicePrincipal) -> Self {
        Self {
            id,
            assumed_by,
            managed_policies: Vec::new(),
        }
    }

    /// Attach a managed policy. Attaching the same policy twice is a no-op.
    pub fn with_managed_policy(mut self, policy: ManagedPolicy) -> Self {
        if !self.managed_policies.contains(&policy) {
            self.managed_policies.push(policy);
        }
        self
    }
}

/// By-name pointer to credential material managed outside the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    /// Logical id used to reference the secret inside the stack.
    pub id: LogicalId,
    /// Name of the pre-existing secret in the secret store.
    pub secret_name: String,
}

impl SecretRef {
    /// Reference a secret by name.
    pub fn new(id: LogicalId, secret_name: impl Into<String>) -> Self {
        Self {
            id,
            secret_name: secret_name.into(),
        }
    }
}

/// Value delivered to a function through an environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Fixed string.
    Literal(String),
    /// Physical name of a declared bucket.
    BucketName(LogicalId),
    /// Name of a referenced secret.
    SecretName(LogicalId),
}

/// Externally-authored compute unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Logical id of the function.
    pub id: LogicalId,
    /// Runtime identifier, e.g. `python3.9`.
    pub runtime: String,
    /// Entry point inside the code asset, e.g. `query_lambda.lambda_handler`.
    pub handler: String,
    /// Directory packaged as the function code.
    pub code: CodeAsset,
    /// Execution role assumed at invocation time.
    pub role: LogicalId,
    /// Hard execution limit enforced by the platform.
    pub timeout: Duration,
    /// Environment variables, keyed by variable name.
    pub environment: BTreeMap<String, EnvValue>,
}

/// HTTP gateway fronting the functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestApi {
    /// Logical id of the API.
    pub id: LogicalId,
    /// Display name of the API.
    pub name: String,
    /// Stage the API is deployed to; part of the base URL.
    pub stage_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_policy_maps_to_deletion_policy() {
        assert_eq!(RemovalPolicy::Destroy.as_deletion_policy(), "Delete");
        assert_eq!(RemovalPolicy::Retain.as_deletion_policy(), "Retain");
    }

    #[test]
    fn role_ignores_duplicate_policies() {
        let role = Role::new(LogicalId::new("LambdaRole").unwrap(), ServicePrincipal::lambda())
            .with_managed_policy(ManagedPolicy::aws_managed("AmazonS3FullAccess"))
            .with_managed_policy(ManagedPolicy::aws_managed("AmazonS3FullAccess"));

        assert_eq!(role.managed_policies.len(), 1);
        assert_eq!(role.assumed_by.as_str(), "lambda.amazonaws.com");
    }
}
