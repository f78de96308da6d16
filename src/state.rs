use std::sync::Arc;

use crate::config::Config;
use crate::notifications::NotificationStore;
use crate::router::EventRouter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub router: Arc<EventRouter>,
    pub notifications: Arc<NotificationStore>,
}
