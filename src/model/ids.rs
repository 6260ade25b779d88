//! Logical identifiers for declared records.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::StackError;

const MAX_LOGICAL_ID_LEN: usize = 255;
const PART_HASH_LEN: usize = 4;

/// Template-unique key of a declared record.
///
/// Logical ids are ASCII alphanumeric and start with a letter, which is the
/// shape CloudFormation accepts for resource and output keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Validate and wrap a logical id.
    pub fn new(value: impl Into<String>) -> Result<Self, StackError> {
        let value = value.into();
        let starts_with_letter = value
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic());
        let alphanumeric = value.chars().all(|c| c.is_ascii_alphanumeric());

        if starts_with_letter && alphanumeric && value.len() <= MAX_LOGICAL_ID_LEN {
            Ok(Self(value))
        } else {
            Err(StackError::InvalidLogicalId(value))
        }
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the id of a record owned by this one.
    ///
    /// Each part is stripped of non-alphanumeric characters and capitalized, so
    /// `LLMApi` with `["upload", "POST"]` becomes `LLMApiUploadPOST`. A part that
    /// loses characters to stripping also gets a short hash of its raw text, so
    /// `{doc_id}` and `docid` stay distinct.
    pub fn child(&self, parts: &[&str]) -> LogicalId {
        let mut id = self.0.clone();
        for part in parts {
            let mut chars = part.chars().filter(char::is_ascii_alphanumeric);
            let Some(first) = chars.next() else {
                continue;
            };
            id.push(first.to_ascii_uppercase());
            id.extend(chars);
            if !part.chars().all(|c| c.is_ascii_alphanumeric()) {
                let digest = hex::encode(Sha256::digest(part.as_bytes()));
                id.push_str(&digest[..PART_HASH_LEN]);
            }
        }
        id.truncate(MAX_LOGICAL_ID_LEN);
        LogicalId(id)
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LogicalId {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for LogicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_ids() {
        let id = LogicalId::new("LLMPdfStorage").expect("valid id");
        assert_eq!(id.as_str(), "LLMPdfStorage");
        assert_eq!(id.to_string(), "LLMPdfStorage");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "1Bucket", "my-bucket", "Bucket Name", "Bücket"] {
            assert!(
                matches!(LogicalId::new(bad), Err(StackError::InvalidLogicalId(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(LogicalId::new("A".repeat(256)).is_err());
    }

    #[test]
    fn child_ids_are_capitalized_and_sanitized() {
        let api = LogicalId::new("LLMApi").unwrap();
        assert_eq!(api.child(&["upload", "POST"]).as_str(), "LLMApiUploadPOST");
        let nested = api.child(&["docs/v1", "deployment-stage"]);
        assert!(nested.as_str().starts_with("LLMApiDocsv1"), "{nested}");
        assert!(LogicalId::new(nested.as_str()).is_ok(), "{nested}");
        assert_eq!(api.child(&["", "--"]).as_str(), "LLMApi");
    }

    #[test]
    fn stripped_parts_do_not_collide_with_plain_parts() {
        let api = LogicalId::new("Api").unwrap();
        let param = api.child(&["docs", "{doc_id}"]);
        let plain = api.child(&["docs", "docid"]);
        assert_eq!(plain.as_str(), "ApiDocsDocid");
        assert_ne!(param, plain);
        assert!(param.as_str().starts_with("ApiDocsDocid"), "{param}");
        assert_eq!(param, api.child(&["docs", "{doc_id}"]));
    }

    #[test]
    fn child_ids_stay_within_length_limit() {
        let base = LogicalId::new("A".repeat(250)).unwrap();
        assert_eq!(base.child(&["Suffix"]).as_str().len(), MAX_LOGICAL_ID_LEN);
    }
}
