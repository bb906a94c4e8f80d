use crate::error::PatchClientError;

/// Outcome of a failed range request attempt.
///
/// Retryable failures are retried by splitting the outstanding ranges in half;
/// fatal ones are returned to the caller immediately.
#[derive(Debug)]
pub(crate) enum RangeAttemptError {
    FatalError(PatchClientError),
    RetryableError(PatchClientError),
}

impl RangeAttemptError {
    pub fn retryable(err: impl Into<PatchClientError>) -> Self {
        RangeAttemptError::RetryableError(err.into())
    }
}

/// Classifies an error raised while sending a request.
///
/// Connection failures, timeouts and dropped bodies are transient. Building the request or
/// failing inside middleware can never succeed on a retry.
pub(crate) fn on_request_failure(error: reqwest_middleware::Error) -> RangeAttemptError {
    let fatal = match &error {
        reqwest_middleware::Error::Middleware(_) => true,
        reqwest_middleware::Error::Reqwest(e) => e.is_builder(),
    };

    if fatal {
        RangeAttemptError::FatalError(error.into())
    } else {
        RangeAttemptError::RetryableError(error.into())
    }
}

/// Classifies an error raised while reading the response body.
pub(crate) fn on_body_failure(error: PatchClientError) -> RangeAttemptError {
    match error {
        PatchClientError::Cancelled => RangeAttemptError::FatalError(error),
        e => RangeAttemptError::RetryableError(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_failure_classification() {
        assert!(matches!(
            on_body_failure(PatchClientError::protocol("bad framing")),
            RangeAttemptError::RetryableError(PatchClientError::ProtocolError(_))
        ));
        assert!(matches!(
            on_body_failure(PatchClientError::Cancelled),
            RangeAttemptError::FatalError(PatchClientError::Cancelled)
        ));
    }

    #[test]
    fn test_request_failure_classification() {
        let err = reqwest_middleware::Error::Middleware(anyhow::anyhow!("middleware broke"));
        assert!(matches!(on_request_failure(err), RangeAttemptError::FatalError(_)));

        let builder_err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert!(builder_err.is_builder());
        let err = reqwest_middleware::Error::Reqwest(builder_err);
        assert!(matches!(on_request_failure(err), RangeAttemptError::FatalError(_)));
    }
}
