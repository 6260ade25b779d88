//! Human-readable topology of a declared stack.

use std::fmt::Write as _;

use crate::model::{EnvValue, OutputValue, Resource, Stack};

/// Render the declared records and their wiring as an indented text listing.
pub fn describe_stack(stack: &Stack) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stack {}", stack.name());

    let _ = writeln!(out, "Resources:");
    for resource in stack.resources() {
        let _ = writeln!(out, "  {} ({})", resource.id(), resource.kind());
        match resource {
            Resource::Bucket(bucket) => {
                let _ = writeln!(out, "    removal: {:?}", bucket.removal_policy);
                if let Some(name) = &bucket.bucket_name {
                    let _ = writeln!(out, "    name: {name}");
                }
            }
            Resource::Role(role) => {
                let _ = writeln!(out, "    assumed by: {}", role.assumed_by.as_str());
                for policy in &role.managed_policies {
                    let _ = writeln!(out, "    policy: {policy}");
                }
            }
            Resource::Secret(secret) => {
                let _ = writeln!(out, "    secret: {}", secret.secret_name);
            }
            Resource::Function(function) => {
                let _ = writeln!(
                    out,
                    "    {} {} timeout={}s role={}",
                    function.runtime,
                    function.handler,
                    function.timeout.as_secs(),
                    function.role
                );
                let _ = writeln!(out, "    code: {}", function.code.path().display());
                for (key, value) in &function.environment {
                    let value = match value {
                        EnvValue::Literal(text) => format!("{text:?}"),
                        EnvValue::BucketName(id) => format!("name of {id}"),
                        EnvValue::SecretName(id) => format!("secret name of {id}"),
                    };
                    let _ = writeln!(out, "    env {key} = {value}");
                }
            }
            Resource::RestApi(api) => {
                let _ = writeln!(out, "    name: {:?} stage: {}", api.name, api.stage_name);
            }
        }
    }

    if !stack.notifications().is_empty() {
        let _ = writeln!(out, "Notifications:");
        for notification in stack.notifications() {
            let _ = writeln!(
                out,
                "  {} {} -> {}",
                notification.bucket,
                notification.event.as_str(),
                notification.target
            );
        }
    }

    if !stack.grants().is_empty() {
        let _ = writeln!(out, "Secret grants:");
        for grant in stack.grants() {
            let _ = writeln!(out, "  {} readable by {}", grant.secret, grant.grantee);
        }
    }

    if !stack.routes().is_empty() {
        let _ = writeln!(out, "Routes:");
        for route in stack.routes() {
            let _ = writeln!(
                out,
                "  {} {} /{} -> {}",
                route.api, route.method, route.path, route.target
            );
        }
    }

    if !stack.outputs().is_empty() {
        let _ = writeln!(out, "Outputs:");
        for output in stack.outputs() {
            let source = match &output.value {
                OutputValue::BucketName(id) => format!("bucket name of {id}"),
                OutputValue::ApiUrl(id) => format!("URL of {id}"),
            };
            let _ = writeln!(out, "  {} = {source}", output.id);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::pipeline::build_pipeline_stack;

    #[test]
    fn lists_resources_and_wiring() {
        let stack = build_pipeline_stack(&StackConfig::default()).unwrap();
        let text = describe_stack(&stack);

        assert!(text.starts_with("Stack LlmProjectStack\n"));
        assert!(text.contains("  LLMPdfStorage (bucket)\n    removal: Destroy\n"));
        assert!(text.contains("    policy: service-role/AWSLambdaBasicExecutionRole\n"));
        assert!(text.contains("    env BUCKET_NAME = name of LLMPdfStorage\n"));
        assert!(text.contains("  LLMPdfStorage s3:ObjectCreated:* -> LLMPostLambda\n"));
        assert!(text.contains("  LLMApi POST /upload -> LLMPostLambda\n"));
        assert!(text.contains("  LLMApi GET /query -> LLMGetLambda\n"));
        assert_eq!(text.matches("readable by").count(), 4);
        assert!(text.ends_with("  ApiEndpoint = URL of LLMApi\n"));
    }
}
