//! I/O utilities

/// Run an io future under a timeout, a zero duration means no timeout.
///
/// The elapsed timer is converted to `io::ErrorKind::TimedOut`.
#[macro_export]
macro_rules! io_with_timeout {
    ($timeout: expr, $f: expr) => {{
        let _timeout: ::std::time::Duration = $timeout;
        if _timeout.is_zero() {
            $f.await
        } else {
            match ::tokio::time::timeout(_timeout, $f).await {
                Ok(r) => r,
                Err(_) => Err(::std::io::Error::from(::std::io::ErrorKind::TimedOut)),
            }
        }
    }};
}
pub use io_with_timeout;
