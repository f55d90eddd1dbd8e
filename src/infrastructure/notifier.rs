use crate::{config::AppConfig, telegram::transport::Transport};

/// Sends `text` to every configured admin, logging a warning per failure.
pub async fn notify_admins(transport: &dyn Transport, config: &AppConfig, text: &str) {
    for admin_id in &config.admin_user_ids {
        if let Err(err) = transport.send_text(*admin_id, text).await {
            tracing::warn!(
                target: "telegram",
                error = %err,
                admin_id,
                "failed to send admin notification"
            );
        }
    }
}
