//! Infrastructure-as-data model: immutable resource records, wiring records, and the stack that
//! ties them together.

mod ids;
mod resources;
mod stack;
mod wiring;

pub use ids::LogicalId;
pub use resources::{
    Bucket, EnvValue, Function, ManagedPolicy, RemovalPolicy, RestApi, Role, SecretRef,
    ServicePrincipal,
};
pub use stack::{
    MAX_FUNCTION_TIMEOUT_SECS, Resource, ResourceKind, Stack, StackBuilder, StackError,
};
pub use wiring::{
    BucketEvent, EventNotification, HttpMethod, Output, OutputValue, Route, SecretGrant,
};
