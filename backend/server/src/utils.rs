use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, OptionalFromRequest, Path, Query, Request},
    http::{StatusCode, header::CONTENT_TYPE, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use validator::{Validate, ValidationErrors};

use crate::{error::AppError, models::Pagination};

/// Response body shared by every endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

pub fn data<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        message: None,
        data: Some(data),
        pagination: None,
    })
    .into_response()
}

pub fn with_message<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(Envelope {
            success: true,
            message: Some(message.to_string()),
            data: Some(data),
            pagination: None,
        }),
    )
        .into_response()
}

pub fn message(message: &str) -> Response {
    Json(Envelope::<()> {
        success: true,
        message: Some(message.to_string()),
        data: None,
        pagination: None,
    })
    .into_response()
}

pub fn paged<T: Serialize>(data: T, pagination: Pagination) -> Response {
    Json(Envelope {
        success: true,
        message: None,
        data: Some(data),
        pagination: Some(pagination),
    })
    .into_response()
}

fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let messages: Vec<String> = fields
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| match &error.message {
                Some(message) => message.to_string(),
                None => format!("Invalid {field}"),
            })
        })
        .collect();

    if messages.is_empty() {
        errors.to_string()
    } else {
        messages.join("; ")
    }
}

/// JSON body, validated before the handler sees it.
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = <Json<T> as FromRequest<S>>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::invalid(rejection.body_text()))?;

        value
            .validate()
            .map_err(|errors| AppError::invalid(describe(&errors)))?;

        Ok(Valid(value))
    }
}

/// Absent when the request carries no JSON body at all.
impl<T, S> OptionalFromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        if !req.headers().contains_key(CONTENT_TYPE) {
            return Ok(None);
        }

        <Valid<T> as FromRequest<S>>::from_request(req, state)
            .await
            .map(Some)
    }
}

/// Query string, validated.
pub struct Params<T>(pub T);

impl<T, S> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = <Query<T> as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::invalid(rejection.body_text()))?;

        value
            .validate()
            .map_err(|errors| AppError::invalid(describe(&errors)))?;

        Ok(Params(value))
    }
}

/// Path parameters, with malformed ids answered in the standard envelope.
pub struct Id<T>(pub T);

impl<T, S> FromRequestParts<S> for Id<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = <Path<T> as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::invalid(rejection.body_text()))?;

        Ok(Id(value))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use validator::Validate;

    use super::*;

    #[derive(Validate)]
    struct Named {
        #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
        name: String,
    }

    #[test]
    fn test_describe_uses_messages() {
        let errors = Named { name: "x".into() }.validate().unwrap_err();

        assert_eq!(describe(&errors), "Name must be at least 2 characters");
    }

    #[test]
    fn test_envelope_skips_empty_fields() {
        let envelope = Envelope::<()> {
            success: true,
            message: Some("ok".into()),
            data: None,
            pagination: None,
        };

        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value, json!({ "success": true, "message": "ok" }));
    }
}
