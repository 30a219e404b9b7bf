use super::handlers::{flows, health};
use utoipa::OpenApi;

use crate::flows::challenge::{Challenge, ChallengeField, ErrorDetail, FieldKind};

#[derive(OpenApi)]
#[openapi(
    paths(health::health, flows::executor_get, flows::executor_post),
    components(schemas(
        Challenge,
        ChallengeField,
        ErrorDetail,
        FieldKind,
        health::Health
    )),
    tags(
        (name = "flows", description = "Flow planning and execution"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_documents_executor_routes() {
        let spec = openapi();
        assert!(spec.paths.paths.contains_key("/v1/flows/{slug}/executor"));
        assert!(spec.paths.paths.contains_key("/health"));
    }
}
