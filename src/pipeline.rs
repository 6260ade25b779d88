//! Declaration of the document-question-answering stack.
//!
//! Uploaded documents land in a bucket whose object-created events trigger
//! the upload function; a second function answers questions. Both are
//! exposed through one REST API and share an execution role that can read
//! the two externally managed credentials.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::asset::CodeAsset;
use crate::config::StackConfig;
use crate::model::{
    Bucket, BucketEvent, EnvValue, EventNotification, Function, HttpMethod, LogicalId,
    ManagedPolicy, Output, OutputValue, RemovalPolicy, RestApi, Role, Route, SecretRef,
    ServicePrincipal, Stack, StackBuilder, StackError,
};

/// Logical id of the document bucket.
pub const BUCKET_ID: &str = "LLMPdfStorage";
/// Logical id of the shared execution role.
pub const ROLE_ID: &str = "LambdaRole";
/// Logical id of the model-provider credential reference.
pub const OPENAI_SECRET_ID: &str = "OpenAISecret";
/// Logical id of the vector-index credential reference.
pub const PINECONE_SECRET_ID: &str = "PineconeSecret";
/// Logical id of the upload-processing function.
pub const UPLOAD_FUNCTION_ID: &str = "LLMPostLambda";
/// Logical id of the query-processing function.
pub const QUERY_FUNCTION_ID: &str = "LLMGetLambda";
/// Logical id of the REST API.
pub const API_ID: &str = "LLMApi";
/// Output key carrying the bucket name.
pub const BUCKET_OUTPUT_ID: &str = "UploadBucketName";
/// Output key carrying the API base URL.
pub const API_OUTPUT_ID: &str = "ApiEndpoint";

/// Handler of the upload-processing function.
pub const UPLOAD_HANDLER: &str = "file_processing.lambda_handler";
/// Handler of the query-processing function.
pub const QUERY_HANDLER: &str = "query_lambda.lambda_handler";

/// Route path served by the upload function.
pub const UPLOAD_PATH: &str = "upload";
/// Route path served by the query function.
pub const QUERY_PATH: &str = "query";

/// Environment key holding the bucket name.
pub const BUCKET_NAME_ENV: &str = "BUCKET_NAME";
/// Environment key holding the model-provider secret name.
pub const OPENAI_SECRET_ENV: &str = "OPENAI_SECRET_NAME";
/// Environment key holding the vector-index secret name.
pub const PINECONE_SECRET_ENV: &str = "PINECONE_SECRET_NAME";

/// Managed policies attached to the shared role.
pub const MANAGED_POLICIES: [&str; 3] = [
    "AmazonTextractFullAccess",
    "AmazonS3FullAccess",
    "service-role/AWSLambdaBasicExecutionRole",
];

/// Declare and wire the pipeline stack.
pub fn build_pipeline_stack(config: &StackConfig) -> Result<Stack, StackError> {
    let mut builder = StackBuilder::new(&config.stack_name)?;

    let bucket = builder.bucket(Bucket {
        id: LogicalId::new(BUCKET_ID)?,
        removal_policy: RemovalPolicy::Destroy,
        bucket_name: config.bucket_name.clone(),
    })?;

    let role = MANAGED_POLICIES.iter().fold(
        Role::new(LogicalId::new(ROLE_ID)?, ServicePrincipal::lambda()),
        |role, name| role.with_managed_policy(ManagedPolicy::aws_managed(*name)),
    );
    let role = builder.role(role)?;

    let openai = builder.secret(SecretRef::new(
        LogicalId::new(OPENAI_SECRET_ID)?,
        &config.openai_secret_name,
    ))?;
    let pinecone = builder.secret(SecretRef::new(
        LogicalId::new(PINECONE_SECRET_ID)?,
        &config.pinecone_secret_name,
    ))?;

    let code = CodeAsset::new(config.asset_dir.clone());
    let timeout = Duration::from_secs(config.function_timeout_secs);
    let secret_env = BTreeMap::from([
        (OPENAI_SECRET_ENV.to_string(), EnvValue::SecretName(openai.clone())),
        (PINECONE_SECRET_ENV.to_string(), EnvValue::SecretName(pinecone.clone())),
    ]);

    let mut upload_env = secret_env.clone();
    upload_env.insert(BUCKET_NAME_ENV.to_string(), EnvValue::BucketName(bucket.clone()));
    let upload = builder.function(Function {
        id: LogicalId::new(UPLOAD_FUNCTION_ID)?,
        runtime: config.runtime.clone(),
        handler: UPLOAD_HANDLER.to_string(),
        code: code.clone(),
        role: role.clone(),
        timeout,
        environment: upload_env,
    })?;

    let query = builder.function(Function {
        id: LogicalId::new(QUERY_FUNCTION_ID)?,
        runtime: config.runtime.clone(),
        handler: QUERY_HANDLER.to_string(),
        code,
        role,
        timeout,
        environment: secret_env,
    })?;

    let api = builder.rest_api(RestApi {
        id: LogicalId::new(API_ID)?,
        name: config.api_name.clone(),
        stage_name: config.api_stage.clone(),
    })?;

    builder.notify(EventNotification {
        bucket: bucket.clone(),
        event: BucketEvent::ObjectCreated,
        target: upload.clone(),
    });
    for secret in [&openai, &pinecone] {
        for function in [&upload, &query] {
            builder.grant_read(secret.clone(), function.clone());
        }
    }
    builder
        .route(Route {
            api: api.clone(),
            method: HttpMethod::Post,
            path: UPLOAD_PATH.to_string(),
            target: upload,
        })
        .route(Route {
            api: api.clone(),
            method: HttpMethod::Get,
            path: QUERY_PATH.to_string(),
            target: query,
        })
        .output(
            Output::new(LogicalId::new(BUCKET_OUTPUT_ID)?, OutputValue::BucketName(bucket))
                .with_description("Bucket receiving uploaded documents"),
        )
        .output(
            Output::new(LogicalId::new(API_OUTPUT_ID)?, OutputValue::ApiUrl(api))
                .with_description("Base URL of the document API"),
        );

    let stack = builder.build()?;
    tracing::info!(
        stack = stack.name(),
        resources = stack.resources().len(),
        "Declared pipeline stack"
    );
    Ok(stack)
}
