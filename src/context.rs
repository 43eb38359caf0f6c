//! Shared application state handed to every worker task.
//!
//! Bundles the components spec.md §2 lists above the networking substrate
//! (SessionAuth, RoomDirectory, ChatPersistence, IdIssuer) plus the SMS
//! gateway, behind one `Arc` the server clones into each connection task.

use std::sync::Arc;

use crate::auth::sms::SmsGateway;
use crate::auth::SessionAuth;
use crate::chat_history::ChatPersistence;
use crate::config::AppConfig;
use crate::idgen::IdIssuer;
use crate::room::RoomDirectory;
use crate::store::KvPool;

pub struct AppContext {
    pub config: AppConfig,
    pub auth: SessionAuth,
    pub rooms: RoomDirectory,
    pub chat: ChatPersistence,
    pub ids: IdIssuer,
    pub sms: SmsGateway,
    pub kv_pool: KvPool,
}

pub type SharedContext = Arc<AppContext>;
