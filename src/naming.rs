//! Physical bucket naming: S3 rule validation and deterministic name generation.

use sha2::{Digest, Sha256};

use crate::model::{LogicalId, StackError};

const MIN_BUCKET_NAME_LEN: usize = 3;
const MAX_BUCKET_NAME_LEN: usize = 63;
const HASH_SUFFIX_LEN: usize = 8;
const RESERVED_PREFIXES: [&str; 3] = ["xn--", "sthree-", "amzn-s3-demo-"];

/// Check a bucket name against the S3 general-purpose bucket naming rules.
pub fn validate_bucket_name(name: &str) -> Result<(), StackError> {
    let reject = |reason: &'static str| {
        Err(StackError::InvalidBucketName {
            name: name.to_string(),
            reason,
        })
    };

    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&name.len()) {
        return reject("must be between 3 and 63 characters long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return reject("may only contain lowercase letters, digits, dots and hyphens");
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return reject("must begin and end with a letter or digit");
    }
    if name.contains("..") {
        return reject("must not contain consecutive dots");
    }
    if looks_like_ipv4(name) {
        return reject("must not be formatted as an IP address");
    }
    if RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
        return reject("must not use a reserved prefix");
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return reject("must not use a reserved suffix");
    }
    Ok(())
}

/// Derive a stable bucket name for a stack-owned bucket.
///
/// The name is `<stack>-<id>-<hash>`, lower-cased, with the stack/id prefix
/// trimmed so the whole name fits in 63 characters. The hash is the first 8
/// hex digits of SHA-256 over `<stack>/<id>`, so the same declaration always
/// maps to the same name while different stacks do not collide. When the
/// stack/id prefix would break a naming rule, such as a stack called
/// `Sthree-Docs` hitting a reserved prefix, the name is `bucket-<hash>`.
pub fn generated_bucket_name(stack_name: &str, id: &LogicalId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stack_name.as_bytes());
    hasher.update(b"/");
    hasher.update(id.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    let suffix = &digest[..HASH_SUFFIX_LEN];

    let mut prefix = sanitize(&format!("{stack_name}-{id}"));
    prefix.truncate(MAX_BUCKET_NAME_LEN - HASH_SUFFIX_LEN - 1);
    let prefix = prefix.trim_end_matches('-');

    let fallback = format!("bucket-{suffix}");
    if prefix.is_empty() {
        return fallback;
    }
    let candidate = format!("{prefix}-{suffix}");
    match validate_bucket_name(&candidate) {
        Ok(()) => candidate,
        Err(err) => {
            tracing::debug!(error = %err, fallback = %fallback, "Generated bucket name rejected");
            fallback
        }
    }
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out
}

fn looks_like_ipv4(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> LogicalId {
        LogicalId::new(value).unwrap()
    }

    #[test]
    fn generated_names_are_stable_and_valid() {
        let first = generated_bucket_name("LlmProjectStack", &id("LLMPdfStorage"));
        let second = generated_bucket_name("LlmProjectStack", &id("LLMPdfStorage"));
        assert_eq!(first, second);
        assert!(first.starts_with("llmprojectstack-llmpdfstorage-"), "{first}");
        assert_eq!(first.len(), "llmprojectstack-llmpdfstorage-".len() + HASH_SUFFIX_LEN);
        validate_bucket_name(&first).expect("generated name is valid");
    }

    #[test]
    fn generated_names_differ_between_stacks() {
        let dev = generated_bucket_name("Docs-Dev", &id("Store"));
        let prod = generated_bucket_name("Docs-Prod", &id("Store"));
        assert_ne!(dev, prod);
        assert!(dev.starts_with("docs-dev-store-"));
    }

    #[test]
    fn generated_names_fit_length_limit() {
        let long_stack = format!("S{}", "a".repeat(120));
        let name = generated_bucket_name(&long_stack, &id("Storage"));
        assert!(name.len() <= MAX_BUCKET_NAME_LEN, "{} chars", name.len());
        validate_bucket_name(&name).expect("truncated name is valid");
    }

    #[test]
    fn reserved_prefix_stack_names_fall_back_to_hash_name() {
        for stack in ["Sthree-Docs", "amzn-s3-demo-Docs"] {
            let name = generated_bucket_name(stack, &id("LLMPdfStorage"));
            validate_bucket_name(&name).unwrap_or_else(|err| panic!("{stack}: {err}"));
            assert!(name.starts_with("bucket-"), "{name}");
            assert_eq!(name.len(), "bucket-".len() + HASH_SUFFIX_LEN);
        }
        assert_ne!(
            generated_bucket_name("Sthree-Docs", &id("LLMPdfStorage")),
            generated_bucket_name("Sthree-Logs", &id("LLMPdfStorage"))
        );
    }

    #[test]
    fn validation_rejects_rule_violations() {
        let too_long = "a".repeat(64);
        for bad in [
            "ab",
            too_long.as_str(),
            "UpperCase",
            "under_score",
            "-leading",
            "trailing-",
            "double..dot",
            "192.168.0.1",
            "xn--punycode",
            "sthree-docs",
            "amzn-s3-demo-bucket",
            "name-s3alias",
        ] {
            assert!(validate_bucket_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn validation_accepts_typical_names() {
        for good in ["docs", "my.bucket.example", "llm-pdf-storage-2024"] {
            validate_bucket_name(good).unwrap_or_else(|err| panic!("{good}: {err}"));
        }
    }
}
