//! Builders for CloudFormation intrinsic functions and partition-aware ARNs.

use serde_json::{Value, json};

pub(crate) const PARTITION: &str = "AWS::Partition";
pub(crate) const REGION: &str = "AWS::Region";
pub(crate) const ACCOUNT_ID: &str = "AWS::AccountId";
pub(crate) const URL_SUFFIX: &str = "AWS::URLSuffix";

/// `{"Ref": id}`
pub(crate) fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attribute]}`
pub(crate) fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

/// `{"Fn::Join": ["", parts]}`
pub(crate) fn join(parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": ["", parts] })
}

/// `{"Fn::Sub": template}`
pub(crate) fn sub(template: String) -> Value {
    json!({ "Fn::Sub": template })
}

/// ARN of an AWS managed IAM policy in the deployment partition.
pub(crate) fn managed_policy_arn(name: &str) -> Value {
    join(vec![
        json!("arn:"),
        reference(PARTITION),
        json!(format!(":iam::aws:policy/{name}")),
    ])
}

/// ARN pattern matching a secret by name, including the random suffix the
/// secret store appends to every secret ARN.
pub(crate) fn secret_arn(secret_name: &str) -> Value {
    sub(format!(
        "arn:${{{PARTITION}}}:secretsmanager:${{{REGION}}}:${{{ACCOUNT_ID}}}:secret:{secret_name}-??????"
    ))
}

/// ARN of a bucket with a known physical name.
pub(crate) fn bucket_arn(bucket_name: &str) -> Value {
    join(vec![
        json!("arn:"),
        reference(PARTITION),
        json!(format!(":s3:::{bucket_name}")),
    ])
}

/// URI the gateway calls to invoke a function through a proxy integration.
pub(crate) fn lambda_integration_uri(function_id: &str) -> Value {
    join(vec![
        json!("arn:"),
        reference(PARTITION),
        json!(":apigateway:"),
        reference(REGION),
        json!(":lambda:path/2015-03-31/functions/"),
        get_att(function_id, "Arn"),
        json!("/invocations"),
    ])
}

/// Execute-api ARN for one method and path on any stage of an API.
pub(crate) fn execute_api_arn(api_id: &str, method: &str, path: &str) -> Value {
    join(vec![
        json!("arn:"),
        reference(PARTITION),
        json!(":execute-api:"),
        reference(REGION),
        json!(":"),
        reference(ACCOUNT_ID),
        json!(":"),
        reference(api_id),
        json!(format!("/*/{method}/{path}")),
    ])
}

/// Base URL of a deployed API stage.
pub(crate) fn api_url(api_id: &str, stage_id: &str) -> Value {
    join(vec![
        json!("https://"),
        reference(api_id),
        json!(".execute-api."),
        reference(REGION),
        json!("."),
        reference(URL_SUFFIX),
        json!("/"),
        reference(stage_id),
        json!("/"),
    ])
}

/// Concatenate the literal string parts of a value, skipping intrinsics.
///
/// Used to recognise ARNs regardless of whether they were written as plain
/// strings, `Fn::Join` lists, or `Fn::Sub` templates.
pub(crate) fn literal_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            if let Some(Value::Array(args)) = map.get("Fn::Join") {
                if let Some(Value::Array(parts)) = args.get(1) {
                    return parts.iter().map(literal_text).collect();
                }
            }
            match map.get("Fn::Sub") {
                Some(Value::String(template)) => template.clone(),
                Some(Value::Array(args)) => args.first().map(literal_text).unwrap_or_default(),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_arn_uses_pseudo_parameters() {
        assert_eq!(
            secret_arn("openai-api-key-secret"),
            json!({
                "Fn::Sub": "arn:${AWS::Partition}:secretsmanager:${AWS::Region}:${AWS::AccountId}:secret:openai-api-key-secret-??????"
            })
        );
    }

    #[test]
    fn managed_policy_arn_is_partition_aware() {
        let arn = managed_policy_arn("AmazonS3FullAccess");
        assert_eq!(arn["Fn::Join"][1][1], json!({ "Ref": "AWS::Partition" }));
        assert_eq!(literal_text(&arn), "arn::iam::aws:policy/AmazonS3FullAccess");
    }

    #[test]
    fn literal_text_reads_plain_and_sub_values() {
        assert_eq!(literal_text(&json!("arn:aws:s3:::docs")), "arn:aws:s3:::docs");
        assert_eq!(literal_text(&sub("a-${X}".into())), "a-${X}");
        assert_eq!(literal_text(&reference("X")), "");
    }

    #[test]
    fn integration_uri_targets_function_arn() {
        let uri = lambda_integration_uri("Worker");
        let parts = uri["Fn::Join"][1].as_array().unwrap();
        assert!(parts.contains(&json!({ "Fn::GetAtt": ["Worker", "Arn"] })));
        assert!(literal_text(&uri).ends_with("/invocations"));
    }
}
