//! HTTP error envelope.
//!
//! Every error response carries `{"errMessage": …, "requestId": …}`;
//! write successes answer `{"result": "OK"}`. The internal diagnostic
//! chain travels separately as a response extension for the logging
//! middleware.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::error::{AppError, ErrorReport};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub err_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OkEnvelope {
    pub result: &'static str,
}

pub fn ok_envelope() -> Json<OkEnvelope> {
    Json(OkEnvelope { result: "OK" })
}

/// An application error bound to the request that produced it.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    request_id: Option<i64>,
    report: ErrorReport,
}

impl ApiError {
    pub fn from_app(error: AppError, request_id: i64) -> Self {
        let status = error.status_code();
        Self {
            status,
            message: error.public_message(),
            request_id: Some(request_id),
            report: ErrorReport::from_error("infra::http", status, &error),
        }
    }

    pub fn from_message(
        status: StatusCode,
        message: impl Into<String>,
        request_id: Option<i64>,
    ) -> Self {
        let message = message.into();
        Self {
            status,
            message: message.clone(),
            request_id,
            report: ErrorReport::from_message("infra::http", status, message),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            err_message: self.message,
            request_id: self.request_id,
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}
