use condo_billing::api::{self, AppState};
use condo_billing::{create_pool, run_migrations, AppConfig, PgStore};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");

    if config.database.run_migrations {
        run_migrations(&pool).await?;
        info!("Migrations applied");
    }

    // 计费服务共用同一个存储
    let store = PgStore::new(pool);
    let state = AppState::new(store, &config.billing);
    let app = api::router(state);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/condominiums/:id/expenses                 - record expense");
    info!("  POST /api/condominiums/:id/closings                 - monthly closing");
    info!("  POST /api/closings/batch                            - batch closing");
    info!("  GET  /api/condominiums/:id/closings/:period/export  - CSV export");
    info!("  POST /api/condominiums/:id/proration-rules/default  - default rule");
    info!("  POST /api/proration-rules/:id/factors               - recompute factors");
    info!("  POST /api/units/:id/payments                        - register payment");
    info!("  GET  /api/payments/:id                              - payment receipt");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
