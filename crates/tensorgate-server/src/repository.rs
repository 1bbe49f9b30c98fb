//! Repository monitoring: load a model when its `config.pbtxt` appears,
//! unload it when the file goes away. Events wait out a short settle delay
//! so half-written exports are not picked up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tensorgate_core::ParameterMap;
use tensorgate_runtime::SharedState;

const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Start watching the repository. The returned watcher must be kept alive
/// for as long as monitoring should continue.
pub fn watch(state: Arc<SharedState>, repository: &Path) -> anyhow::Result<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>(64);
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = tx.blocking_send(event);
    })?;
    watcher.watch(repository, RecursiveMode::Recursive)?;

    tokio::spawn(dispatch_events(state, rx));
    info!(repository = %repository.display(), "repository monitoring enabled");
    Ok(watcher)
}

async fn dispatch_events(state: Arc<SharedState>, mut rx: mpsc::Receiver<notify::Result<Event>>) {
    while let Some(event) = rx.recv().await {
        match event {
            Ok(event) => handle_event(&state, event).await,
            Err(err) => warn!(error = %err, "repository watch error"),
        }
    }
}

/// The model a config path belongs to: `{repo}/{model}/config.pbtxt`.
fn model_of(path: &Path) -> Option<String> {
    if path.file_name()? != "config.pbtxt" {
        return None;
    }
    Some(path.parent()?.file_name()?.to_str()?.to_string())
}

async fn handle_event(state: &SharedState, event: Event) {
    let models: Vec<(String, PathBuf)> = event
        .paths
        .iter()
        .filter_map(|path| model_of(path).map(|model| (model, path.clone())))
        .collect();
    if models.is_empty() {
        return;
    }

    match event.kind {
        EventKind::Create(_) => {
            tokio::time::sleep(SETTLE_DELAY).await;
            for (model, path) in models {
                debug!(model = %model, path = %path.display(), "config added");
                if let Err(err) = state.model_load(&model, &ParameterMap::new()).await {
                    info!(model = %model, error = %err, "failed to load watched model");
                }
            }
        }
        EventKind::Remove(_) => {
            tokio::time::sleep(SETTLE_DELAY).await;
            for (model, path) in models {
                debug!(model = %model, path = %path.display(), "config removed");
                if let Err(err) = state.model_unload(&model).await {
                    info!(model = %model, error = %err, "failed to unload watched model");
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_paths_map_to_their_model() {
        assert_eq!(
            model_of(Path::new("/repo/resnet50/config.pbtxt")),
            Some("resnet50".to_string())
        );
        assert_eq!(model_of(Path::new("/repo/resnet50/1/saved_model.onnx")), None);
    }
}
