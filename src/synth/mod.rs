//! CloudFormation synthesis: renders a validated [`crate::model::Stack`] into a template and
//! checks the result for dangling references and dependency cycles.

pub mod graph;
pub(crate) mod intrinsics;
mod render;
pub mod template;

use std::path::PathBuf;

use thiserror::Error;

use crate::asset::{AssetError, AssetManifest};
use crate::model::{LogicalId, StackError};

pub use graph::{dependencies, deployment_order, references};
pub use render::synthesize;
pub use template::{Template, TemplateOutput, TemplateResource};

/// Default name of the template parameter holding the code asset bucket.
pub const ASSET_BUCKET_PARAMETER: &str = "AssetBucket";

/// Errors raised while rendering or checking a template.
#[derive(Debug, Error)]
pub enum SynthError {
    /// A code asset could not be fingerprinted.
    #[error(transparent)]
    Asset(#[from] AssetError),
    /// A stack record failed validation at render time, such as a bucket name.
    #[error(transparent)]
    Stack(#[from] StackError),
    /// A stack record pointed at an id missing from the stack.
    #[error("stack record {0} could not be resolved during synthesis")]
    Unresolved(LogicalId),
    /// Two rendered resources were assigned the same logical id.
    #[error("logical id {0} is produced by more than one resource")]
    IdCollision(String),
    /// A template value references something that is neither a resource nor a parameter.
    #[error("{from} references {target}, which is neither a resource nor a parameter")]
    DanglingReference {
        /// Resource or output holding the reference.
        from: String,
        /// Missing name.
        target: String,
    },
    /// Resources depend on each other in a loop.
    #[error("template has a dependency cycle involving: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    /// An API URL output was requested for an API that has nothing to deploy.
    #[error("output {output} needs a deployed stage, but API {api} has no routes")]
    ApiWithoutRoutes {
        /// Output requesting the URL.
        output: LogicalId,
        /// API without routes.
        api: LogicalId,
    },
    /// JSON rendering failed.
    #[error("failed to serialize template: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Writing synthesis output failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Knobs applied while rendering a stack.
#[derive(Debug, Clone)]
pub struct SynthOptions {
    /// Name of the template parameter holding the code asset bucket.
    pub asset_bucket_parameter: String,
    /// Template description.
    pub description: Option<String>,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            asset_bucket_parameter: ASSET_BUCKET_PARAMETER.to_string(),
            description: None,
        }
    }
}

/// Rendered template together with the assets it expects to be uploaded.
#[derive(Debug, Clone)]
pub struct SynthOutput {
    /// CloudFormation template.
    pub template: Template,
    /// Code assets referenced by the template.
    pub manifest: AssetManifest,
}

impl SynthOutput {
    /// Write `<stack>.template.json` and `assets.json` into `out_dir`, returning the template path.
    pub fn write_to(&self, out_dir: &std::path::Path, stack_name: &str) -> Result<PathBuf, SynthError> {
        let io_error = |path: &std::path::Path| {
            let path = path.to_path_buf();
            move |source| SynthError::Io { path, source }
        };

        std::fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;

        let template_path = out_dir.join(format!("{stack_name}.template.json"));
        std::fs::write(&template_path, self.template.to_json_pretty()?)
            .map_err(io_error(&template_path))?;

        let manifest_path = out_dir.join("assets.json");
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&self.manifest)?)
            .map_err(io_error(&manifest_path))?;

        tracing::info!(
            template = %template_path.display(),
            manifest = %manifest_path.display(),
            "Wrote synthesis output"
        );
        Ok(template_path)
    }
}
