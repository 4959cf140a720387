pub mod channels;
pub mod contacts;
pub mod health;
pub mod messages;
pub mod read_state;
pub mod users;

use validator::Validate;

use parley_shared::{AppError, AppResult, ErrorCode};

/// Run the request's validation rules, mapping failures to `ValidationError`.
pub(crate) fn validated<T: Validate>(req: T) -> AppResult<T> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;
    Ok(req)
}
