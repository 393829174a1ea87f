//! Router for the storage backend.
//!
//! - `GET /healthz`, `GET /readyz`: health checks
//! - `/{bucket}/{*key}`: object operations; the query string selects the
//!   multipart operation:
//!   - `POST ?uploads`: open a session
//!   - `POST ?targets&uploadId=…`: issue part targets
//!   - `PUT ?partNumber=N&uploadId=…`: upload one part
//!   - `POST ?uploadId=…`: complete
//!   - `DELETE ?uploadId=…`: abort
//!   - no query: plain PUT/GET/HEAD/DELETE
//!
//! The wildcard `*key` allows nested keys like `alice/photos/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, post_object, put_object},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router. State (`StorageService`) is supplied by the caller.
pub fn routes() -> Router<StorageService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object)
                .post(post_object),
        )
}
