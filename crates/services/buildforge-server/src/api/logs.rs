//! Server-sent-events log streaming (§6.4): bridges a per-task Log Bus
//! subscription onto an HTTP response. The subscriber task also polls the
//! task row after each record so a `status` event fires on every status
//! transition without a second client request; `completed` carries the
//! final task (with its `error_kind`/`error_message`, if any) once the bus
//! closes the stream.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use buildforge_core::ids::TaskId;
use buildforge_core::log_bus::LogEvent;
use buildforge_core::model::task::{Task, TaskRepo, TaskStatus};
use buildforge_core::Kind;

use crate::error::Result as ServerResult;
use crate::state::AppState;

/// Sends `status`, and on a terminal `failed` transition also `error` (and
/// `timeout` when the failure's kind is `Timeout`), the one time the task's
/// status actually changes (§6.4). Returns `false` if the client went away.
async fn emit_status_events(
    tx: &tokio::sync::mpsc::Sender<Event>,
    task: &Task,
    last_status: &mut Option<TaskStatus>,
) -> bool {
    if *last_status == Some(task.status) {
        return true;
    }
    *last_status = Some(task.status);
    let Ok(data) = serde_json::to_string(task) else {
        return true;
    };
    if tx.send(Event::default().event("status").data(data.clone())).await.is_err() {
        return false;
    }
    if task.status == TaskStatus::Failed {
        if tx.send(Event::default().event("error").data(data.clone())).await.is_err() {
            return false;
        }
        if task.error_kind == Some(Kind::Timeout) && tx.send(Event::default().event("timeout").data(data)).await.is_err() {
            return false;
        }
    }
    true
}

pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ServerResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let task_id = TaskId(id);
    TaskRepo::get_by_id(&state.runtime.db, task_id).await?;

    let runtime = state.runtime.clone();
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(64);

    tokio::spawn(async move {
        if tx.send(Event::default().event("connected").data("{}")).await.is_err() {
            return;
        }

        let subscription = runtime.log_bus.subscribe(task_id).await;
        let mut last_status = None;

        loop {
            match subscription.recv().await {
                LogEvent::Record(record) => {
                    let Ok(data) = serde_json::to_string(&record) else {
                        continue;
                    };
                    if tx.send(Event::default().event("log").data(data)).await.is_err() {
                        return;
                    }

                    if let Ok(task) = TaskRepo::get_by_id(&runtime.db, task_id).await {
                        if !emit_status_events(&tx, &task, &mut last_status).await {
                            return;
                        }
                    }
                }
                LogEvent::Heartbeat => {
                    if tx.send(Event::default().event("heartbeat").data("")).await.is_err() {
                        return;
                    }
                }
                LogEvent::LimitReached(dropped) => {
                    let data = serde_json::json!({ "dropped": dropped }).to_string();
                    if tx.send(Event::default().event("limit_reached").data(data)).await.is_err() {
                        return;
                    }
                }
                LogEvent::Closed => {
                    let body = match TaskRepo::get_by_id(&runtime.db, task_id).await {
                        Ok(task) => {
                            if !emit_status_events(&tx, &task, &mut last_status).await {
                                return;
                            }
                            serde_json::json!({ "final": true, "task": task })
                        }
                        Err(_) => serde_json::json!({ "final": true }),
                    };
                    let _ = tx.send(Event::default().event("completed").data(body.to_string())).await;
                    return;
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
