use tokio_cron_scheduler::{Job, JobScheduler};
use anyhow::Result;
use tracing::{debug, info};
use std::future::Future;
use std::sync::Arc;

pub struct TaskScheduler {
    scheduler: JobScheduler,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    /// 注册按 cron 表达式执行的异步任务
    pub async fn add_cron_job<F, Fut>(&self, name: &'static str, cron_expr: &str, job_fn: Arc<F>) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let job_fn = Arc::clone(&job_fn);
            Box::pin(async move {
                debug!("执行定时任务: {}", name);
                job_fn().await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("已注册定时任务 {} ({})", name, cron_expr);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}
