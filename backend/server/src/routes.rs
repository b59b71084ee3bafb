use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State as AxumState,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::NaiveDate;
use fountain::FillEvent;
use serde_json::json;
use tokio::select;
use tracing::{debug, info, warn};

use crate::{
    counters::{DailyCounter, DepartmentTotals},
    error::AppError,
    state::State,
    utils::{parse_day, today},
};

fn date_param(date: &str) -> Result<NaiveDate, AppError> {
    parse_day(date).ok_or_else(|| AppError::MalformedPayload(format!("{date} is not YYYY-MM-DD")))
}

pub async fn serial_handler(AxumState(state): AxumState<Arc<State>>) -> impl IntoResponse {
    Json(json!({ "serial": state.config.device_id() }))
}

pub async fn read_machine_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(date): Path<String>,
) -> Result<Json<DailyCounter>, AppError> {
    let date = date_param(&date)?;

    Ok(Json(state.counters.machine(date).await?))
}

pub async fn read_department_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(date): Path<String>,
) -> Result<Json<DepartmentTotals>, AppError> {
    let date = date_param(&date)?;

    Ok(Json(state.counters.department(date).await?))
}

pub async fn ws_handler(
    AxumState(state): AxumState<Arc<State>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| live_view(socket, state))
}

async fn live_view(mut socket: WebSocket, state: Arc<State>) {
    let snapshot = match state.counters.snapshot(today()).await {
        Ok((machine, department)) => FillEvent::Snapshot {
            machine: machine.totals(),
            department: department.totals(),
        },
        Err(e) => {
            warn!("Live view snapshot unavailable, sending zeroes: {e}");
            FillEvent::Snapshot {
                machine: Default::default(),
                department: Default::default(),
            }
        }
    };

    let mut subscription = state.hub.subscribe_with(&snapshot);
    let id = subscription.id;
    info!("Live view {id} connected");

    loop {
        select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => debug!("Ignoring frame from live view {id}"),
            },
            frame = subscription.frames.recv() => match frame {
                Some(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    state.hub.unsubscribe(id);
    info!("Live view {id} disconnected");
}
