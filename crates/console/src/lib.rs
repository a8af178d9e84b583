//! Terminal host for the reactive query layer.
//!
//! The console seeds a preview store, binds a `Query<ItemModel>` to it and
//! re-renders the item list every time the query signals a change, while a
//! background task keeps writing new items.

pub mod config;
pub mod error;

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use domain::{ItemModel, insert_item, preview_store};
use query::{EngineState, Query, QueryEnvironment, QueryError, QueryEvent, QueryResults};
use record_store::InMemoryRecordStore;
use tokio::task::JoinHandle;

pub use config::Config;
pub use error::ConsoleError;

/// What happened during one console run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub renders: usize,
    pub failures: usize,
    pub items: usize,
}

/// Runs the console until the background writes are reflected in the
/// rendered list or `shutdown` resolves, whichever comes first.
pub async fn run(
    config: Config,
    shutdown: impl Future<Output = ()>,
    out: &mut impl Write,
) -> Result<RunSummary, ConsoleError> {
    let store = preview_store(config.preview_items)?;
    let env = QueryEnvironment::new(Arc::new(store.clone()));

    let mut query = Query::<ItemModel>::new(config.filter());
    query.on_invalidate(|event| tracing::debug!(?event, "item list invalidated"));
    query.update(&env)?;

    let mut writer = spawn_writer(store, &config);
    let mut writer_done = false;
    let mut summary = RunSummary::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("shutdown requested");
                break;
            }
            written = &mut writer, if !writer_done => {
                writer_done = true;
                let written = written??;
                tracing::info!(written, "background writer finished");
            }
            events = query.next_change() => {
                match events {
                    Ok(events) => handle_events(&query, &events, &mut summary, out)?,
                    Err(QueryError::Idle) => break,
                    Err(error) => return Err(error.into()),
                }
            }
        }

        if writer_done {
            if query.refresh_if_needed() {
                render(query.results()?, out)?;
                summary.renders += 1;
            }
            if query.engine().state() != EngineState::Fetching {
                break;
            }
        }
    }

    if !writer_done {
        writer.abort();
    }
    summary.items = query.results().map(QueryResults::len).unwrap_or_default();
    Ok(summary)
}

fn spawn_writer(
    store: InMemoryRecordStore,
    config: &Config,
) -> JoinHandle<Result<usize, record_store::StoreError>> {
    let writes = config.writes;
    let interval = config.write_interval;
    tokio::spawn(async move {
        for i in 0..writes {
            tokio::time::sleep(interval).await;
            let title = format!("Written {}", i + 1);
            insert_item(&store, Utc::now(), Some(&title))?;
        }
        Ok(writes)
    })
}

fn handle_events(
    query: &Query<ItemModel>,
    events: &[QueryEvent],
    summary: &mut RunSummary,
    out: &mut impl Write,
) -> Result<(), ConsoleError> {
    for event in events {
        if let QueryEvent::Failed { error } = event {
            tracing::warn!(%error, "refresh failed; showing last results");
            summary.failures += 1;
        }
    }
    if events.iter().any(QueryEvent::is_change) {
        render(query.results()?, out)?;
        summary.renders += 1;
    }
    Ok(())
}

/// Writes one line per item.
pub fn render(results: &QueryResults<ItemModel>, out: &mut impl Write) -> std::io::Result<()> {
    metrics::counter!("console_renders_total").increment(1);
    writeln!(out, "--- {} items ---", results.len())?;
    for item in results {
        writeln!(out, "{}", item.label())?;
    }
    out.flush()
}
