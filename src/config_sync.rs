//! Debounced upload of project configuration edits.
//!
//! Edits tend to arrive in bursts (one per keystroke in a settings form).
//! [`ConfigSync`] runs a background task that holds the most recent config
//! and sends it with `POST /api/projects/{name}` only once no further edit
//! has arrived for the debounce window. Only the last config of a burst is
//! sent. An edit for a different project first sends the pending one.
//!
//! Send failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use tex_timelapse_core::backend::Backend;
use tex_timelapse_core::models::ProjectConfig;

enum Command {
    Schedule {
        project: String,
        config: ProjectConfig,
    },
    Flush(oneshot::Sender<()>),
}

pub struct ConfigSync {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ConfigSync {
    /// Start the uploader. Must be called from within a tokio runtime.
    pub fn spawn(backend: Arc<dyn Backend>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(backend, debounce, rx));
        Self { tx, task }
    }

    /// Queue `config` for upload, replacing any not-yet-sent config.
    pub fn schedule(&self, project: &str, config: ProjectConfig) {
        let cmd = Command::Schedule {
            project: project.to_string(),
            config,
        };
        if self.tx.send(cmd).is_err() {
            tracing::warn!(project, "config uploader has stopped; edit dropped");
        }
    }

    /// Send any pending config now and wait for the attempt to finish.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Flush and stop the background task.
    pub async fn shutdown(self) {
        self.flush().await;
        drop(self.tx);
        let _ = self.task.await;
    }
}

async fn run(
    backend: Arc<dyn Backend>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Option<(String, ProjectConfig)> = None;

    loop {
        let cmd = if pending.is_some() {
            tokio::select! {
                cmd = rx.recv() => cmd,
                _ = tokio::time::sleep(debounce) => {
                    send(backend.as_ref(), pending.take()).await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match cmd {
            None => {
                send(backend.as_ref(), pending.take()).await;
                break;
            }
            Some(Command::Schedule { project, config }) => {
                if pending.as_ref().is_some_and(|(p, _)| *p != project) {
                    send(backend.as_ref(), pending.take()).await;
                }
                pending = Some((project, config));
            }
            Some(Command::Flush(done)) => {
                send(backend.as_ref(), pending.take()).await;
                let _ = done.send(());
            }
        }
    }
}

async fn send(backend: &dyn Backend, pending: Option<(String, ProjectConfig)>) {
    let Some((project, config)) = pending else {
        return;
    };
    match backend.save_config(&project, &config).await {
        Ok(()) => tracing::debug!(project = %project, "config saved"),
        Err(e) => tracing::warn!(project = %project, error = %e, "config upload failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tex_timelapse_core::backend::memory::InMemoryBackend;

    fn cfg(rows: u32) -> ProjectConfig {
        ProjectConfig {
            rows: Some(rows),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_only_last() {
        let backend = Arc::new(InMemoryBackend::new());
        let sync = ConfigSync::spawn(backend.clone(), Duration::from_millis(1000));

        sync.schedule("thesis", cfg(1));
        tokio::time::sleep(Duration::from_millis(400)).await;
        sync.schedule("thesis", cfg(2));
        tokio::time::sleep(Duration::from_millis(400)).await;
        sync.schedule("thesis", cfg(3));
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(backend.saved_configs().is_empty(), "sent inside the window");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let saved = backend.saved_configs();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "thesis");
        assert_eq!(saved[0].1.rows, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sends_immediately() {
        let backend = Arc::new(InMemoryBackend::new());
        let sync = ConfigSync::spawn(backend.clone(), Duration::from_millis(5000));
        sync.schedule("thesis", cfg(4));
        sync.flush().await;
        assert_eq!(backend.saved_configs().len(), 1);

        // nothing left to send
        sync.flush().await;
        assert_eq!(backend.saved_configs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_switch_sends_previous() {
        let backend = Arc::new(InMemoryBackend::new());
        let sync = ConfigSync::spawn(backend.clone(), Duration::from_millis(1000));
        sync.schedule("a", cfg(1));
        sync.schedule("b", cfg(2));
        sync.shutdown().await;
        let saved: Vec<String> = backend.saved_configs().into_iter().map(|(p, _)| p).collect();
        assert_eq!(saved, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_swallowed() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_offline(true);
        let sync = ConfigSync::spawn(backend.clone(), Duration::from_millis(1000));
        sync.schedule("thesis", cfg(1));
        sync.flush().await;
        backend.set_offline(false);
        sync.schedule("thesis", cfg(2));
        sync.flush().await;
        assert_eq!(backend.saved_configs().len(), 1);
    }
}
