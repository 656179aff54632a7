//! `Path` and `Query` extractors whose rejections render as [`ApiError`].

use axum::{
    extract::{FromRequestParts, Path, Query},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use super::ApiError;

/// [`Path`] with rejections rendered as the JSON error envelope.
#[derive(Debug)]
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            // Missing or mismatched route params are a routing bug, not bad input.
            Err(rejection) if rejection.status().is_server_error() => {
                Err(ApiError::Internal(rejection.body_text()))
            }
            Err(rejection) => Err(ApiError::Validation(rejection.body_text())),
        }
    }
}

/// [`Query`] with rejections rendered as the JSON error envelope.
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| Self(value))
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Request, StatusCode};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Window {
        days: Option<String>,
    }

    fn parts(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_query_extracts_values() {
        let mut parts = parts("/api/usage/bot?days=3");
        let ApiQuery(window) = ApiQuery::<Window>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(window.days.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_duplicate_query_key_is_validation_error() {
        let mut parts = parts("/api/usage/bot?days=1&days=2");
        let err = ApiQuery::<Window>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        match err {
            ApiError::Validation(msg) => assert!(msg.contains("days"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_path_outside_router_is_internal_error() {
        // No matched route, so there are no path params to extract.
        let mut parts = parts("/api/client/acme");
        let err = ApiPath::<String>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Internal(_)), "{err:?}");
    }
}
