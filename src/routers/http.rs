//! The public HTTP surface: `POST /v1/responses`, `GET`/`DELETE
//! /v1/responses/{id}`, `GET /v1/responses/{id}/input_items`, and
//! `GET /v1/models` (`spec.md` §2).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;

use antwort_protocol::{ApiError, PublicEvent, ResponsesRequest};

use crate::emitter::EventSink;
use crate::engine::{Engine, NullSink};
use crate::error::ApiErrorResponse;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response))
        .route("/v1/responses/{id}", get(get_response).delete(cancel_response))
        .route("/v1/responses/{id}/input_items", get(get_input_items))
        .route("/v1/models", get(list_models))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Forwards numbered public events onto an SSE channel. A send failure
/// (the receiver is gone, i.e. the client disconnected) is surfaced to the
/// engine as an error so the in-progress response is sealed
/// `response.cancelled` rather than computed for nobody.
struct ChannelSink(mpsc::UnboundedSender<Result<Event, Infallible>>);

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, event: PublicEvent) -> Result<(), ApiError> {
        let payload = serde_json::to_string(&event)
            .map_err(|e| ApiError::server_error(format!("failed to serialize event: {e}")))?;
        let wire_event = Event::default().event(event.kind.wire_name()).data(payload);
        self.0
            .send(Ok(wire_event))
            .map_err(|_| ApiError::cancelled())
    }
}

async fn create_response(
    State(state): State<AppState>,
    Json(req): Json<ResponsesRequest>,
) -> AxumResponse {
    if req.stream {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = state.engine.clone();
        tokio::spawn(async move {
            let mut sink = ChannelSink(tx.clone());
            let _ = engine.create_response(req, &mut sink).await;
            let _ = tx.send(Ok(Event::default().data("[DONE]")));
        });
        let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
            Box::pin(UnboundedReceiverStream::new(rx));
        Sse::new(stream).into_response()
    } else {
        let mut sink = NullSink;
        match state.engine.create_response(req, &mut sink).await {
            Ok(response) => Json(response).into_response(),
            Err(e) => ApiErrorResponse(e).into_response(),
        }
    }
}

async fn get_response(State(state): State<AppState>, Path(id): Path<String>) -> AxumResponse {
    match state.engine.get(&id).await {
        Some(response) => Json(response).into_response(),
        None => ApiErrorResponse(ApiError::not_found(format!("no response with id '{id}'"))).into_response(),
    }
}

/// Cancels the in-flight response (if any) and deletes its stored record
/// (if any); 404 only when neither applied (`spec.md` §6).
async fn cancel_response(State(state): State<AppState>, Path(id): Path<String>) -> AxumResponse {
    let cancelled = state.engine.cancel(&id).await;
    let deleted = state.engine.delete(&id).await;
    if !cancelled && !deleted {
        return ApiErrorResponse(ApiError::not_found(format!("no response with id '{id}'")))
            .into_response();
    }
    Json(json!({"id": id, "object": "response", "deleted": true})).into_response()
}

async fn get_input_items(State(state): State<AppState>, Path(id): Path<String>) -> AxumResponse {
    match state.engine.get_input_items(&id).await {
        Some(items) => Json(json!({"data": items})).into_response(),
        None => ApiErrorResponse(ApiError::not_found(format!("no response with id '{id}'"))).into_response(),
    }
}

async fn list_models(State(state): State<AppState>) -> AxumResponse {
    match state.engine.backend_list_models().await {
        Ok(models) => Json(json!({"data": models})).into_response(),
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}
