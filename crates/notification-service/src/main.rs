//! 通知扇出服务
//!
//! 消费活动事件并为订阅者生成通知的后台进程入口。

use std::sync::Arc;

use anyhow::Result;
use herald_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    dlq::DlqProducer,
    kafka::{KafkaConsumer, KafkaProducer},
    observability,
    retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use herald_notifications::{
    cache::RedisNotificationCache,
    fanout::{AudienceResolver, FanoutPipeline, KafkaEventSource},
    repository::{NotificationRepository, SubscriptionRepository},
};

const SERVICE_NAME: &str = "herald-notifications";

#[tokio::main]
async fn main() -> Result<()> {
    // .env 仅用于本地开发，不存在时忽略
    dotenvy::dotenv().ok();

    // 1. 加载配置：config/default.toml -> config/{env}.toml -> config/{service}.toml -> HERALD_* 环境变量
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    // 2. 初始化可观测性
    let _guard = observability::init(&config.observability, &config.service_name).await?;

    info!("Starting {}...", config.service_name);
    info!(
        environment = %config.environment,
        workers = config.fanout.workers,
        resolve_max_retries = config.fanout.resolve_max_retries,
        "Configuration loaded"
    );
    if config.is_production() && config.observability.otlp_endpoint.is_none() {
        warn!("生产环境未配置 OTLP endpoint，分布式追踪已关闭");
    }

    // 3. 初始化数据库连接并执行迁移
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    db.run_migrations().await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    // 4. 初始化 Redis 缓存
    let cache = Arc::new(Cache::new(&config.redis)?);
    cache.health_check().await?;
    info!("Redis connection established");

    // 5. 创建仓储与缓存
    let subscription_repo = Arc::new(SubscriptionRepository::new(pool.clone()));
    let notification_repo = Arc::new(NotificationRepository::new(pool.clone()));
    let notification_cache = Arc::new(RedisNotificationCache::new(cache.clone()));

    // 6. 组装扇出管道
    let resolve_retry = if config.fanout.resolve_max_retries > 0 {
        RetryPolicy::with_max_retries(config.fanout.resolve_max_retries)
    } else {
        RetryPolicy::no_retry()
    };
    let mut pipeline = FanoutPipeline::new(
        AudienceResolver::new(subscription_repo),
        notification_repo,
        notification_cache,
    )
    .with_workers(config.fanout.workers)
    .with_resolve_retry(resolve_retry);
    if let Some(delay) = config.fanout.cache_reinvalidate_delay() {
        pipeline = pipeline.with_cache_reinvalidation(delay);
    }
    let pipeline = Arc::new(pipeline);

    // 7. 创建 Kafka 事件源（拒绝的消息写入死信 topic）
    let consumer = KafkaConsumer::new(&config.kafka, None)?;
    consumer.subscribe(&[config.kafka.activity_topic.as_str()])?;
    let producer = KafkaProducer::new(&config.kafka)?;
    let dlq = DlqProducer::new(
        producer,
        &config.kafka.dead_letter_topic,
        &config.service_name,
    );
    let source = Arc::new(KafkaEventSource::new(consumer, dlq));

    // 8. 运行管道直到收到关闭信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(pipeline.run(source, shutdown_rx));

    shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        warn!("扇出管道已提前退出");
    }

    if let Err(e) = runner.await {
        error!(error = %e, "扇出管道异常退出");
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
