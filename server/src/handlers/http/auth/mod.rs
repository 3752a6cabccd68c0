pub mod login;
pub mod logout;
pub mod refresh;

// Re-export main handlers
pub use login::handle_login;
pub use logout::handle_logout;
pub use refresh::handle_refresh;

use crate::AppState;
use crate::security::SecurityError;

/// Full logout: deactivate the session AND revoke every outstanding token
/// for the user, as one logical unit.  Deactivating the session alone
/// would leave issued refresh tokens able to mint new sessions.
pub async fn terminate_login(
    state: &AppState,
    session_id: &str,
    user_id: i64,
) -> Result<(), SecurityError> {
    state.sessions.deactivate(session_id).await?;
    state.tokens.revoke_all_for_user(user_id).await?;
    Ok(())
}
