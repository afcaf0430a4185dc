//! Mapping AWS SDK errors onto [`CloudError`]
//!
//! Classification works on the service error code from
//! `ProvideErrorMetadata::code()`, never on Debug output.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use stackup_cloud::{CloudError, ResourceKind};

/// Codes meaning the looked-up resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidKeyPair.NotFound",
    "InvalidGroup.NotFound",
    "InvalidInstanceID.NotFound",
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "ListenerNotFound",
    "RuleNotFound",
];

/// Codes meaning the stable name is already taken
const CONFLICT_CODES: &[&str] = &[
    "InvalidKeyPair.Duplicate",
    "InvalidGroup.Duplicate",
    "DuplicateLoadBalancerName",
    "DuplicateTargetGroupName",
    "DuplicateListener",
    "PriorityInUse",
];

/// Rate limiting, service hiccups and dependents that have not let go yet
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "DependencyViolation",
    "ResourceInUse",
    "IncorrectState",
    "InternalError",
    "InternalFailure",
    "ServiceUnavailable",
    "Unavailable",
];

const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnrecognizedClientException",
    "InvalidClientTokenId",
    "ExpiredToken",
    "SignatureDoesNotMatch",
    "OptInRequired",
];

const ACCESS_DENIED_CODES: &[&str] = &[
    "UnauthorizedOperation",
    "AccessDenied",
    "AccessDeniedException",
];

/// Rejected request parameters. `InvalidAMIID.NotFound` lands here: a
/// missing image is a configuration problem, not an absent resource.
const INVALID_CONFIG_PREFIXES: &[&str] = &[
    "InvalidAMIID.",
    "InvalidParameter",
    "InvalidSubnet",
    "InvalidConfigurationRequest",
    "ValidationError",
    "Unsupported",
];

/// Classify a service error code for an operation on `kind` named `target`
pub fn classify_code(kind: ResourceKind, target: &str, code: Option<&str>, message: &str) -> CloudError {
    let Some(code) = code else {
        return CloudError::ApiError(message.to_string());
    };
    let detail = format!("{}: {}", code, message);

    if INVALID_CONFIG_PREFIXES.iter().any(|p| code.starts_with(p)) {
        CloudError::InvalidConfig(detail)
    } else if NOT_FOUND_CODES.contains(&code) {
        CloudError::not_found(kind, target)
    } else if CONFLICT_CODES.contains(&code) {
        CloudError::Conflict(format!("{} '{}': {}", kind, target, detail))
    } else if TRANSIENT_CODES.contains(&code) {
        CloudError::Transient(detail)
    } else if AUTH_CODES.contains(&code) {
        CloudError::AuthenticationFailed(detail)
    } else if ACCESS_DENIED_CODES.contains(&code) {
        CloudError::AccessDenied(detail)
    } else {
        CloudError::ApiError(detail)
    }
}

/// Convert any EC2 or ELBv2 SDK error
pub fn from_sdk<E, R>(kind: ResourceKind, target: &str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            CloudError::Transient(format!("{} '{}': {}", kind, target, DisplayErrorContext(&err)))
        }
        _ => {
            let message = err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            classify_code(kind, target, err.code(), &message)
        }
    }
}

/// Shorthand for `map_err` on SDK calls
pub(crate) fn sdk_err<E, R>(
    kind: ResourceKind,
    target: &str,
) -> impl FnOnce(SdkError<E, R>) -> CloudError + '_
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    move |err| from_sdk(kind, target, err)
}
