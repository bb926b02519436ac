use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use pediaquiz::config::DEFAULT_CONFIG_PATH;
use pediaquiz::pipeline::JobStatus;
use pediaquiz::storage::ObjectStore;
use pediaquiz::utils::{logger, scheduler::TaskScheduler};
use pediaquiz::{build_router, AppConfig, AppContext};

#[derive(Parser)]
#[command(name = "pediaquiz")]
#[command(about = "儿科题库内容生成流水线", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 初始化目录、配置和数据库
    Init,
    /// 启动 RPC 服务与超时清理任务
    Serve,
    /// 导入本地文件并触发上传事件
    Ingest {
        /// 上传者用户 ID
        #[arg(long)]
        uid: String,
        /// 本地文件路径
        #[arg(long)]
        file: String,
        /// 指定内容类型（默认按扩展名推断）
        #[arg(long)]
        content_type: Option<String>,
    },
    /// 查看待处理任务
    Queue,
    /// 手动重试出错的任务
    Retry {
        /// 任务 ID
        #[arg(long)]
        job: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    info!("pediaquiz 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_command().await?,
        Commands::Serve => serve_command().await?,
        Commands::Ingest { uid, file, content_type } => ingest_command(uid, file, content_type).await?,
        Commands::Queue => queue_command().await?,
        Commands::Retry { job } => retry_command(job).await?,
    }

    Ok(())
}

async fn load_context() -> Result<AppContext> {
    let config = AppConfig::load()?;
    Ok(AppContext::from_config(config).await?)
}

async fn init_command() -> Result<()> {
    info!("初始化系统...");

    tokio::fs::create_dir_all("config").await?;
    let config = if Path::new(DEFAULT_CONFIG_PATH).exists() {
        info!("配置文件已存在，保留: {}", DEFAULT_CONFIG_PATH);
        AppConfig::load()?
    } else {
        let config = AppConfig::default();
        config.save(DEFAULT_CONFIG_PATH)?;
        info!("已生成配置文件: {}", DEFAULT_CONFIG_PATH);
        config
    };

    // 建目录并初始化数据库表
    AppContext::from_config(config).await?;
    info!("数据库初始化完成");

    info!("✅ 系统初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 配置 AI API 密钥与事件令牌", DEFAULT_CONFIG_PATH);
    info!("  2. 运行 'pediaquiz serve' 启动服务");
    Ok(())
}

async fn serve_command() -> Result<()> {
    let ctx = Arc::new(load_context().await?);
    let bind_addr = ctx.config.server.bind_addr.clone();
    let sweep_cron = ctx.config.pipeline.sweep_cron.clone();

    let scheduler = TaskScheduler::new().await?;
    let pipeline = ctx.pipeline.clone();
    let sweep = Arc::new(move || {
        let pipeline = pipeline.clone();
        async move {
            match pipeline.sweep_stale_jobs().await {
                Ok(0) => {}
                Ok(n) => info!("超时清理: {} 个任务标记为 error", n),
                Err(e) => error!("超时清理失败: {}", e),
            }
        }
    });
    scheduler.add_cron_job("stale-stage-sweep", &sweep_cron, sweep).await?;
    scheduler.start().await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("无法监听 {}", bind_addr))?;
    info!("RPC 服务监听 http://{}", bind_addr);

    axum::serve(listener, build_router(ctx))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("等待停止信号失败: {}", e);
            }
            info!("收到停止信号");
        })
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

fn guess_content_type(file: &Path) -> &'static str {
    match file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("txt") | Some("md") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        _ => "application/octet-stream",
    }
}

async fn ingest_command(uid: String, file: String, content_type: Option<String>) -> Result<()> {
    let ctx = load_context().await?;
    let local = Path::new(&file);
    let file_name = match local.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => bail!("无法识别文件名: {}", file),
    };
    let content_type = content_type.unwrap_or_else(|| guess_content_type(local).to_string());

    let data = tokio::fs::read(local)
        .await
        .with_context(|| format!("读取文件失败: {}", file))?;
    let object_path = format!("uploads/{}/{}", uid, file_name);
    ctx.store.write(&object_path, &data).await?;
    info!("已写入对象存储: {} ({} 字节)", object_path, data.len());

    let (job, created) = ctx.pipeline.on_object_finalized(&object_path, &content_type).await?;
    if !created {
        info!("任务 {} 已存在，状态 {}", job.id, job.status);
        return Ok(());
    }

    match ctx.pipeline.run_ocr(&job.id).await {
        Ok(job) => info!("✅ 任务 {} -> {}", job.id, job.status),
        Err(e) => info!("❌ 任务 {} OCR 失败: {}", job.id, e),
    }
    Ok(())
}

async fn queue_command() -> Result<()> {
    let ctx = load_context().await?;
    let jobs = ctx.pipeline.pending_jobs().await?;

    if jobs.is_empty() {
        info!("没有待处理的任务");
        return Ok(());
    }

    info!("待处理任务 {} 个:", jobs.len());
    for job in &jobs {
        info!(
            "  {} [{}] {} ({}){}",
            job.id,
            job.status,
            job.file_name,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.error.as_deref().map(|e| format!(" 错误: {}", e)).unwrap_or_default()
        );
    }
    Ok(())
}

async fn retry_command(job_id: String) -> Result<()> {
    let ctx = load_context().await?;
    let job = ctx.pipeline.retry_job(&job_id).await?;
    info!("✅ 任务 {} 已恢复到 {}", job.id, job.status);

    if job.status == JobStatus::PendingOcr {
        match ctx.pipeline.run_ocr(&job.id).await {
            Ok(job) => info!("✅ 任务 {} -> {}", job.id, job.status),
            Err(e) => info!("❌ 任务 {} OCR 失败: {}", job.id, e),
        }
    }
    Ok(())
}
