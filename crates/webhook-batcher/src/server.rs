// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::http_utils::{
    create_text_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::intake::Intake;
use crate::record::Record;

pub const LOG_ENDPOINT_PATH: &str = "/log";
pub const HEALTHZ_ENDPOINT_PATH: &str = "/healthz";

/// HTTP front door: decodes webhook events and submits them to the intake.
pub struct IntakeServer {
    config: Arc<Config>,
    intake: Intake,
    shutdown: CancellationToken,
}

impl IntakeServer {
    pub fn new(config: Arc<Config>, intake: Intake, shutdown: CancellationToken) -> Self {
        IntakeServer {
            config,
            intake,
            shutdown,
        }
    }

    /// Accepts connections on `listener` until the shutdown token is cancelled.
    ///
    /// Returning drops this server's intake handle, which lets the supervisor flush what was
    /// accepted and stop.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let max_content_length = self.config.max_request_content_length;
        let intake = self.intake;
        let service = service_fn(move |req: Request<Incoming>| {
            // called for each http request
            let intake = intake.clone();
            IntakeServer::endpoint_handler(req, intake, max_content_length)
        });

        if let Ok(addr) = listener.local_addr() {
            info!("starting webhook server on {addr}");
        }

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                () = self.shutdown.cancelled() => {
                    debug!("Webhook server stopped accepting connections");
                    joinset.abort_all();
                    return Ok(());
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        req: Request<Incoming>,
        intake: Intake,
        max_content_length: usize,
    ) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::POST, LOG_ENDPOINT_PATH) => {
                Self::log_handler(req, intake, max_content_length).await
            }
            (&Method::GET, HEALTHZ_ENDPOINT_PATH) => {
                debug!("Received request on healthz endpoint");
                create_text_response("OK", StatusCode::OK)
            }
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn log_handler(
        req: Request<Incoming>,
        intake: Intake,
        max_content_length: usize,
    ) -> http::Result<HttpResponse> {
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            max_content_length,
            "Error processing webhook payload",
        ) {
            return response;
        }

        let body = match http_body_util::Limited::new(body, max_content_length)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading payload: {e}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        let record = match Record::from_slice(&body) {
            Ok(record) => record,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error unmarshalling json payload: {e}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        match intake.submit(record) {
            Ok(submission) => {
                debug!(?submission, "Received and parsed webhook payload");
                log_and_create_http_response("ok", StatusCode::OK)
            }
            Err(e) => log_and_create_http_response(
                &e.to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }
}
