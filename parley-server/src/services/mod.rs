//! Business operations. Each public function runs in one store transaction;
//! callers publish live changes after it returns.

pub mod contacts;
pub mod directory;
pub mod feed;
pub mod identity;
pub mod membership;
pub mod read_state;

#[cfg(test)]
pub(crate) mod test_support;
