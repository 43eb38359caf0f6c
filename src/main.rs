use std::sync::Arc;

use structopt::StructOpt;
use tokio::sync::broadcast;

use bi_chat::auth::sms::SmsGateway;
use bi_chat::auth::SessionAuth;
use bi_chat::chat_history::ChatPersistence;
use bi_chat::config::{AppConfig, Opt};
use bi_chat::context::AppContext;
use bi_chat::idgen::IdIssuer;
use bi_chat::reactor::Reactor;
use bi_chat::room::RoomDirectory;
use bi_chat::server::Server;
use bi_chat::store::{build_db_pool, build_kv_pool};
use bi_chat::worker::WorkerPool;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = Opt::from_args();
    let config = AppConfig::from(opt);

    let db_pool = build_db_pool(&config.db_path, config.db_pool_size)?;
    let (kv_pool, _kv_store) = build_kv_pool(&config);

    let ctx = Arc::new(AppContext {
        rooms: RoomDirectory::new(),
        ids: IdIssuer::new(config.worker_id),
        sms: SmsGateway::logging_default(),
        auth: SessionAuth::new(db_pool.clone(), kv_pool.clone()),
        chat: ChatPersistence::new(db_pool.clone(), kv_pool.clone()),
        kv_pool,
        config,
    });
    let port = ctx.config.port;

    let worker_pool = Arc::new(WorkerPool::new(ctx.config.workers, ctx.config.queue_capacity));
    let reactor = Reactor::new()?;
    let server = Server::new(ctx.clone(), worker_pool.clone());

    let (notify_shutdown, shutdown_rx) = broadcast::channel(1);

    reactor.run(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received, starting graceful shutdown");
                let _ = notify_shutdown.send(());
            }
        });

        if let Err(e) = server.run(&reactor, port, shutdown_rx).await {
            tracing::error!(error = %e, "server loop exited with error");
        }
    });

    worker_pool.shutdown();
    Ok(())
}
