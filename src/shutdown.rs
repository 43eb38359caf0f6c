use tokio::sync::broadcast;

pub type ShutdownListener = broadcast::Receiver<()>;
