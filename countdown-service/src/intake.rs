use countdown_shared::api::StartRequest;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::AppError;
use crate::service::CountdownNotifier;

/// Parse one intake line: a JSON start request, or a bare task id.
pub fn parse_line(line: &str) -> Result<StartRequest, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed)
    } else {
        Ok(StartRequest::new(trimmed))
    }
}

/// Feed newline-delimited start requests into `notifier` until EOF or
/// cancellation. Returns how many countdowns were started.
pub async fn serve_lines<R>(
    reader: R,
    notifier: &CountdownNotifier,
    cancel: CancellationToken,
) -> Result<usize, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0usize;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("intake: cancelled");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("intake: end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(req) => {
                if notifier.handle_request(&req).await.is_some() {
                    accepted += 1;
                }
            }
            Err(e) => {
                warn!(error=%e, "intake: malformed start request; skipping");
            }
        }
    }
    Ok(accepted)
}
