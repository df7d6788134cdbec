//! Registry endpoints, media types, and default paths.

/// Base URL of the anonymous token service.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";

/// Base URL of the image registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// Service name passed to the token endpoint.
pub const REGISTRY_SERVICE: &str = "registry.docker.io";

/// Repository namespace for official images.
pub const LIBRARY_NAMESPACE: &str = "library";

/// Tag used when an image reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

/// `Accept` value for the initial manifest request.
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of a multi-platform Docker manifest list.
pub const MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// File extension of a downloaded layer archive inside the staging directory.
pub const LAYER_ARCHIVE_EXTENSION: &str = "tar";

/// Name prefix for per-run staging directories.
pub const STAGING_DIR_PREFIX: &str = "minibox-";

/// Path of the null device, relative to the staging root.
pub const DEV_NULL_PATH: &str = "dev/null";

/// Exit status reported when the pipeline fails before the child runs.
pub const PIPELINE_FAILURE_EXIT_CODE: i32 = 1;

/// Offset added to a signal number when a child is terminated by a signal.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;
