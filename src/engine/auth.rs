use crate::engine::admin::{EngineAdmin, EngineError};

const ROOT_USER: &str = "root";
const ROOT_ROLE: &str = "root";

/// One-time, idempotent auth setup: create the root user, grant it the root
/// role, enable authentication. Safe to re-run; callers gate this on
/// leadership so only one member attempts it.
pub async fn initialize_auth(
    logger: &slog::Logger,
    engine: &dyn EngineAdmin,
    root_password: &str,
) -> Result<(), EngineError> {
    match engine.user_add(ROOT_USER, root_password).await {
        Ok(()) => {}
        Err(EngineError::Rpc(msg)) if msg.contains("already exists") => {
            slog::debug!(logger, "Root user already exists");
        }
        // The engine refuses user RPCs with an empty-name error once auth is
        // already enabled without credentials; nothing left to do.
        Err(EngineError::Rpc(msg)) if msg.contains("user name is empty") => {
            slog::debug!(logger, "Auth already enabled");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    engine.user_grant_role(ROOT_USER, ROOT_ROLE).await?;

    match engine.auth_enable().await {
        Ok(()) => {
            slog::info!(logger, "Authentication enabled");
            Ok(())
        }
        Err(EngineError::Rpc(msg)) if msg.contains("already enabled") => Ok(()),
        Err(e) => Err(e),
    }
}
