//! Utility functions and helpers.

pub mod http;
#[cfg(test)]
pub(crate) mod test_server;

/// Truncate a response body for inclusion in an error message.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}
