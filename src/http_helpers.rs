use crate::{
    services::status::{LiveStatus, LogJson, SystemInfo},
    templates,
};
use actix_web::{
    HttpResponse, HttpResponseBuilder,
    http::{StatusCode, header},
};
use anyhow::Result;
use log::error;
use serde::Serialize;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";
pub const APPLICATION_JSON: &str = "application/json";

/// Headers that keep browsers from caching device pages
pub fn no_cache(builder: &mut HttpResponseBuilder) -> &mut HttpResponseBuilder {
    builder
        .insert_header((header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"))
        .insert_header((header::PRAGMA, "no-cache"))
        .insert_header((header::EXPIRES, "0"))
}

/// Headers of the firmware update endpoints
pub fn close_connection(builder: &mut HttpResponseBuilder) -> &mut HttpResponseBuilder {
    builder
        .insert_header((header::CONNECTION, "close"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
}

/// Page `body` wrapped into the common page layout
pub fn html(status: StatusCode, body: &str) -> HttpResponse {
    no_cache(&mut HttpResponse::build(status))
        .content_type(TEXT_HTML)
        .body(templates::page(body))
}

pub fn fail(message: &str) -> HttpResponse {
    no_cache(&mut HttpResponse::InternalServerError())
        .content_type(TEXT_PLAIN)
        .body(format!("{message}\r\n"))
}

pub fn redirect_to_login() -> HttpResponse {
    HttpResponse::MovedPermanently()
        .insert_header((header::LOCATION, "/login"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .finish()
}

pub fn json<T: Serialize>(value: &T) -> HttpResponse {
    match serde_json::to_string(value) {
        Ok(json) => HttpResponse::Ok().content_type(APPLICATION_JSON).body(json),
        Err(e) => {
            error!("failed to serialize response: {e:#}");
            fail("failed to serialize response")
        }
    }
}

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for HttpResponse {
    fn into_response(self) -> HttpResponse {
        self
    }
}

impl ServiceResultResponse for SystemInfo {
    fn into_response(self) -> HttpResponse {
        json(&self)
    }
}

impl ServiceResultResponse for LiveStatus {
    fn into_response(self) -> HttpResponse {
        json(&self)
    }
}

impl ServiceResultResponse for LogJson {
    fn into_response(self) -> HttpResponse {
        json(&self)
    }
}

/// Convert a service result into a response
///
/// Errors are logged together with `operation` and answered with a
/// plain text 500 response.
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");
            fail(&e.to_string())
        }
    }
}
