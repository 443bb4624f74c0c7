use crate::application::{DbSession, SqlAssistant};
use crate::domain::db_connection::ConnectionRequest;
use crate::domain::error::{AppError, ConnectionErrorKind};
use actix_cors::Cors;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{dev::Server, get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

pub struct HttpState {
    pub assistant: Arc<SqlAssistant>,
}

impl HttpState {
    fn session(&self) -> &DbSession {
        self.assistant.session()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4096, message = "Question must be between 1 and 4096 characters"))]
    #[validate(custom(function = "validate_question", message = "Question cannot be blank"))]
    pub input: String,
}

fn validate_question(question: &str) -> Result<(), validator::ValidationError> {
    if question.trim().is_empty() {
        return Err(validator::ValidationError::new("blank_question"));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub output: String,
    pub sql: String,
}

fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Connection(..) | AppError::MissingApiKey(_) | AppError::InvalidApiKey(_) => {
            StatusCode::BAD_REQUEST
        }
        AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map an error onto a status and a message safe to show the caller.
/// Unclassified failures are logged in full and reported generically.
fn error_response(err: AppError) -> HttpResponse {
    let status = status_for(&err);
    let (code, detail) = match &err {
        AppError::Connection(kind, _) => (kind.as_str(), kind.user_message().to_string()),
        AppError::NotConnected => (
            "not_connected",
            "No database connection. Please set up a connection first.".to_string(),
        ),
        AppError::MissingApiKey(_) => (
            "missing_api_key",
            "No API key was found for the language model provider.".to_string(),
        ),
        AppError::InvalidApiKey(_) => (
            "invalid_api_key",
            "The language model rejected the configured API key.".to_string(),
        ),
        AppError::ValidationError(msg) => ("validation", msg.clone()),
        AppError::Timeout(_) => (
            "timeout",
            "The request took too long to complete. Please try again.".to_string(),
        ),
        _ => ("internal", "An unexpected error occurred.".to_string()),
    };

    if status.is_server_error() {
        error!(error = %err, code, "Request failed");
    } else {
        warn!(error = %err, code, "Request rejected");
    }
    HttpResponse::build(status).json(json!({ "error": code, "detail": detail }))
}

/// `/setup` bodies that do not deserialize (unknown `dbms`, out-of-range
/// port) describe a malformed connection target.
fn setup_json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let detail = err.to_string();
    let response = error_response(AppError::connection(ConnectionErrorKind::MalformedTarget, detail));
    InternalError::from_response(err, response).into()
}

fn query_json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let detail = err.to_string();
    let response = error_response(AppError::ValidationError(detail));
    InternalError::from_response(err, response).into()
}

async fn setup(data: web::Data<HttpState>, req: web::Json<ConnectionRequest>) -> impl Responder {
    let request = req.into_inner();
    info!(dbms = ?request.dbms, "Setting up database connection");

    if let Err(e) = data.session().open(&request).await {
        return error_response(e);
    }
    match data.assistant.verify_llm().await {
        Ok(()) => HttpResponse::Ok().json("Success"),
        Err(e) => error_response(e),
    }
}

async fn query(data: web::Data<HttpState>, req: web::Json<QueryRequest>) -> impl Responder {
    if let Err(e) = req.validate() {
        return error_response(AppError::ValidationError(e.to_string()));
    }

    match data.assistant.ask(&req.input).await {
        Ok(context) => HttpResponse::Ok().json(QueryResponse {
            output: context.answer.unwrap_or_default(),
            sql: context.generated_sql,
        }),
        Err(e) => error_response(e),
    }
}

#[post("/close-connection")]
async fn close_connection(data: web::Data<HttpState>) -> impl Responder {
    match data.session().close().await {
        Ok(()) => HttpResponse::Ok().json("Success"),
        Err(e) => error_response(e),
    }
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "connected": data.session().is_active().await,
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/setup")
            .app_data(web::JsonConfig::default().error_handler(setup_json_error))
            .route(web::post().to(setup)),
    )
    .service(
        web::resource("/query")
            .app_data(web::JsonConfig::default().error_handler(query_json_error))
            .route(web::post().to(query)),
    )
    .service(close_connection)
        .service(health);
}

pub fn start_server(assistant: Arc<SqlAssistant>, host: &str, port: u16) -> std::io::Result<Server> {
    let state = web::Data::new(HttpState { assistant });

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();
        App::new().wrap(cors).app_data(state.clone()).configure(configure)
    })
    .bind((host, port))?
    .run();

    info!(host, port, "HTTP server listening");
    Ok(server)
}
