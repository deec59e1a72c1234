use async_trait::async_trait;
use tokio::task::AbortHandle;

/// Long running background task that is stopped by aborting its handle.
#[async_trait]
pub trait AbortWorker {
    async fn run(&self);

    fn spawn(&self) -> AbortHandle
    where
        Self: Clone + Send + Sync + 'static,
    {
        let worker = self.clone();
        tokio::spawn(async move { worker.run().await }).abort_handle()
    }
}
