use std::thread::sleep;
use std::time::Duration;

use indicatif::ProgressStyle;
use log::warn;

use crate::error::Result;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
    )
    .expect("failed to build progress style")
    .progress_chars("#>-")
}

/// 有界指数退避重试
///
/// 只重试瞬时错误，其余错误立即返回；重试次数耗尽后返回最后一次的错误。
pub fn retry_with_backoff<T>(
    attempts: u32,
    base_delay: Duration,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("第 {attempt} 次尝试失败，{} ms 后重试: {e}", delay.as_millis());
                sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::Error;

    fn transient() -> Error {
        Error::TransientIo(io::Error::new(io::ErrorKind::TimedOut, "timeout"))
    }

    #[test]
    fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(transient()) } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Decode("bad".to_string()))
        });
        assert!(matches!(result, Err(Error::Decode(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
