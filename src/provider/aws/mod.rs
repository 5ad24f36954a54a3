//! # AWS Secrets Manager Provider
//!
//! Reads secrets from AWS Secrets Manager.
//!
//! The secret value is expected to be a JSON object; see
//! [`flatten_json_secret`](crate::provider::flatten_json_secret) for how values
//! are converted. Authentication uses the SDK default credential chain, which
//! covers IRSA (`eks.amazonaws.com/role-arn` on the controller's service
//! account), environment credentials and instance profiles.

use crate::observability::metrics;
use crate::provider::{
    flatten_json_secret, ExternalSecretData, FetchContext, FetchError, SecretProvider,
};
use anyhow::Result;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Provider name used in pod annotations
pub const PROVIDER_NAME: &str = "aws-secretsmanager";

/// AWS Secrets Manager provider implementation
pub struct AwsSecretsManager {
    client: SecretsManagerClient,
    region: String,
}

impl std::fmt::Debug for AwsSecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretsManager")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsSecretsManager {
    /// Create a new AWS Secrets Manager client
    ///
    /// `region` overrides the region discovered by the SDK default chain.
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub async fn new(region: Option<&str>) -> Result<Self> {
        let sdk_config = Self::create_default_config(region).await;
        let region = sdk_config
            .region()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);

        info!(
            provider = PROVIDER_NAME,
            region = region.as_str(),
            "AWS Secrets Manager provider configured (default credential chain, IRSA supported)"
        );

        Ok(Self {
            client: SecretsManagerClient::new(&sdk_config),
            region,
        })
    }

    /// Create AWS SDK config using default credential chain
    async fn create_default_config(region: Option<&str>) -> SdkConfig {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        loader.load().await
    }

    async fn get_secret_value(&self, path: &str) -> Result<ExternalSecretData, FetchError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(path)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    provider = PROVIDER_NAME,
                    region = self.region.as_str(),
                    path = path,
                    error = %DisplayErrorContext(&e),
                    "GetSecretValue failed"
                );
                classify_sdk_error(path, &e)
            })?;

        if let Some(secret_string) = response.secret_string() {
            return flatten_json_secret(path, secret_string);
        }

        if let Some(blob) = response.secret_binary() {
            let text =
                std::str::from_utf8(blob.as_ref()).map_err(|e| FetchError::MalformedResponse {
                    path: path.to_string(),
                    reason: format!("binary secret is not UTF-8 text: {e}"),
                })?;
            return flatten_json_secret(path, text);
        }

        Err(FetchError::MalformedResponse {
            path: path.to_string(),
            reason: "secret has no string or binary value".to_string(),
        })
    }
}

#[async_trait]
impl SecretProvider for AwsSecretsManager {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        path: &str,
    ) -> Result<ExternalSecretData, FetchError> {
        let span = info_span!(
            "aws.secret.fetch",
            secret.path = path,
            region = self.region.as_str()
        );
        let start = Instant::now();

        async move {
            let result = ctx.run(self.get_secret_value(path)).await;
            let elapsed = start.elapsed().as_secs_f64();

            match &result {
                Ok(data) => {
                    debug!(keys = data.len(), "Fetched AWS secret");
                    metrics::record_provider_fetch(PROVIDER_NAME, "success", elapsed);
                }
                Err(e) => {
                    metrics::record_provider_fetch(PROVIDER_NAME, e.kind(), elapsed);
                }
            }

            result
        }
        .instrument(span)
        .await
    }
}

/// Classify an SDK error into the provider error taxonomy
fn classify_sdk_error<R>(path: &str, err: &SdkError<GetSecretValueError, R>) -> FetchError
where
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            classify_error_code(path, inner.code(), inner.message().unwrap_or_default())
        }
        SdkError::TimeoutError(_) => FetchError::Unavailable {
            message: "request to AWS Secrets Manager timed out".to_string(),
        },
        // Dispatch and response failures are network-level and worth retrying
        _ => FetchError::Unavailable {
            message: DisplayErrorContext(err).to_string(),
        },
    }
}

/// Classify an AWS error code
///
/// Unknown codes are treated as transient so a misclassified outage is retried
/// rather than abandoned.
fn classify_error_code(path: &str, code: Option<&str>, message: &str) -> FetchError {
    match code {
        Some(
            "ResourceNotFoundException" | "InvalidRequestException" | "InvalidParameterException",
        ) => FetchError::NotFound {
            path: path.to_string(),
        },
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "DecryptionFailure"
            | "ExpiredTokenException"
            | "InvalidSignatureException",
        ) => FetchError::AccessDenied {
            path: path.to_string(),
            message: message.to_string(),
        },
        Some("ThrottlingException" | "TooManyRequestsException" | "LimitExceededException") => {
            FetchError::Throttled {
                message: message.to_string(),
            }
        }
        Some(other) => FetchError::Unavailable {
            message: format!("{other}: {message}"),
        },
        None => FetchError::Unavailable {
            message: message.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_name() {
        assert_eq!(PROVIDER_NAME, "aws-secretsmanager");
    }

    #[test]
    fn test_not_found_codes_are_permanent() {
        for code in [
            "ResourceNotFoundException",
            "InvalidRequestException",
            "InvalidParameterException",
        ] {
            let err = classify_error_code("/prod/db", Some(code), "nope");
            assert_eq!(
                err,
                FetchError::NotFound {
                    path: "/prod/db".to_string()
                }
            );
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_access_denied_codes_are_permanent() {
        for code in ["AccessDeniedException", "DecryptionFailure", "ExpiredTokenException"] {
            let err = classify_error_code("/prod/db", Some(code), "denied");
            assert!(matches!(err, FetchError::AccessDenied { .. }), "{code}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_throttling_codes_are_transient() {
        let err = classify_error_code("/prod/db", Some("ThrottlingException"), "slow down");
        assert!(matches!(err, FetchError::Throttled { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unknown_codes_are_transient() {
        let err = classify_error_code("/prod/db", Some("InternalServiceError"), "boom");
        assert!(matches!(err, FetchError::Unavailable { .. }));
        assert!(err.is_transient());

        let err = classify_error_code("/prod/db", None, "no code");
        assert!(err.is_transient());
    }
}
