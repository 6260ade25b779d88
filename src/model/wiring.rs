//! Wiring records: triggers, routes, grants and outputs connecting declared resources.

use std::fmt;

use super::LogicalId;

/// HTTP verb served by a gateway route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl HttpMethod {
    /// Upper-case verb as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway route forwarding requests to a function without transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Gateway the route belongs to.
    pub api: LogicalId,
    /// HTTP verb matched by the route.
    pub method: HttpMethod,
    /// Path below the API root without leading slash, e.g. `upload` or `docs/search`.
    pub path: String,
    /// Function invoked for matching requests.
    pub target: LogicalId,
}

impl Route {
    /// Non-empty path segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|segment| !segment.is_empty())
    }
}

/// Storage event that can trigger a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketEvent {
    /// Any object creation (put, post, copy, multipart completion).
    ObjectCreated,
    /// Any object removal.
    ObjectRemoved,
}

impl BucketEvent {
    /// Notification event name understood by the storage service.
    pub fn as_str(self) -> &'static str {
        match self {
            BucketEvent::ObjectCreated => "s3:ObjectCreated:*",
            BucketEvent::ObjectRemoved => "s3:ObjectRemoved:*",
        }
    }
}

/// Routes a bucket event to a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotification {
    /// Bucket emitting the event.
    pub bucket: LogicalId,
    /// Event type routed to the target.
    pub event: BucketEvent,
    /// Function invoked for each event.
    pub target: LogicalId,
}

/// Read access on a secret granted to a function's execution role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretGrant {
    /// Secret being read.
    pub secret: LogicalId,
    /// Function whose role receives the grant.
    pub grantee: LogicalId,
}

/// Value surfaced after deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputValue {
    /// Physical name of a bucket.
    BucketName(LogicalId),
    /// Base URL of a gateway's deployed stage.
    ApiUrl(LogicalId),
}

impl OutputValue {
    /// Resource the output reads from.
    pub fn source(&self) -> &LogicalId {
        match self {
            OutputValue::BucketName(id) | OutputValue::ApiUrl(id) => id,
        }
    }
}

/// Named deployment output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Output key.
    pub id: LogicalId,
    /// Value surfaced under the key.
    pub value: OutputValue,
    /// Optional human-readable description.
    pub description: Option<String>,
}

impl Output {
    /// Output without a description.
    pub fn new(id: LogicalId, value: OutputValue) -> Self {
        Self {
            id,
            value,
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_segments_skip_empty_parts() {
        let route = Route {
            api: LogicalId::new("Api").unwrap(),
            method: HttpMethod::Get,
            path: "docs//search/".into(),
            target: LogicalId::new("Fn").unwrap(),
        };
        assert_eq!(route.segments().collect::<Vec<_>>(), vec!["docs", "search"]);
    }

    #[test]
    fn object_created_event_name() {
        assert_eq!(BucketEvent::ObjectCreated.as_str(), "s3:ObjectCreated:*");
        assert_eq!(HttpMethod::Post.to_string(), "POST");
    }
}
