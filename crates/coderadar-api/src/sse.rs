//! Server-sent events for one job's event channel.
//!
//! Each delivery is sent with `event: <type>` (progress, insight, completed,
//! failed) and the JSON-encoded event as data. The stream ends after the
//! terminal event; slow clients get a `lagged` event with the skip count.

use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use coderadar_core::{topic_for, Delivery};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;

pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state.engine.orchestrator.job(&job_id).await?;
    let topic = topic_for(&job_id);
    let events = state.engine.stores.events.subscribe(&topic);

    // Read the job after subscribing: a job that is already terminal will
    // publish nothing more, so its final state is replayed as a single event.
    let job = state.engine.orchestrator.job(&job_id).await?;
    let replay = if job.is_terminal() {
        state.engine.stores.events.close(&topic).await;
        terminal_event(&job)
    } else {
        None
    };
    let live = events.filter_map(|delivery| async move {
        match delivery {
            Delivery::Event(event) => {
                let name = event.kind.name();
                let json = serde_json::to_string(&event).ok()?;
                Some(Event::default().event(name).data(json))
            }
            Delivery::Lagged(skipped) => {
                tracing::debug!(skipped, "SSE client lagged, skipping events");
                Some(
                    Event::default()
                        .event("lagged")
                        .data(format!("{{\"skipped\":{}}}", skipped)),
                )
            }
        }
    });

    let stream = match replay {
        Some(event) => stream::iter(vec![event]).boxed(),
        None => live.boxed(),
    }
    .map(Ok::<_, Infallible>);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn terminal_event(job: &coderadar_core::Job) -> Option<Event> {
    use coderadar_core::{AnalysisEvent, EventKind, JobStatus};

    let kind = match job.status {
        JobStatus::Completed => EventKind::Completed {
            result: Box::new(job.result.clone()?),
        },
        JobStatus::Failed => EventKind::Failed {
            message: job.error_message.clone().unwrap_or_default(),
        },
        JobStatus::Pending | JobStatus::Processing => return None,
    };
    let event = AnalysisEvent::new(job.job_id.clone(), kind);
    let json = serde_json::to_string(&event).ok()?;
    Some(Event::default().event(event.kind.name()).data(json))
}
