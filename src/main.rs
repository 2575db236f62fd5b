use anyhow::Context;
use serde::Serialize;
use srs_scheduler::{Config, Db, ReviewState, Scheduler, SubmitResponse};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// One line of output per input event.
#[derive(Serialize)]
#[serde(untagged)]
enum Outcome {
    Recorded { success: bool, data: ReviewState },
    Failed { success: bool, error: String, retryable: bool },
}

impl Outcome {
    fn malformed(error: String) -> Self {
        log::error!("unreadable event: {}", error);
        Outcome::Failed {
            success: false,
            retryable: false,
            error: format!("malformed event: {}", error),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env()?;
    log::info!(
        "opening {} (max attempts {}, store timeout {:?})",
        config.database_url,
        config.scheduler.max_attempts,
        config.scheduler.store_timeout
    );

    let db = Db::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    let scheduler = Scheduler::new(Arc::new(db), config.scheduler);

    run(&scheduler, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Processes newline-separated events until `input` is exhausted. A bad
/// line yields a failed outcome and the loop moves on to the next one.
async fn run<R, W>(scheduler: &Scheduler, mut input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if input.read_until(b'\n', &mut raw).await? == 0 {
            break;
        }

        let Some(outcome) = handle_line(scheduler, &raw).await else {
            continue;
        };

        let mut out = serde_json::to_vec(&outcome)?;
        out.push(b'\n');
        output.write_all(&out).await?;
        output.flush().await?;
    }

    Ok(())
}

/// `None` for blank lines.
async fn handle_line(scheduler: &Scheduler, raw: &[u8]) -> Option<Outcome> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => return Some(Outcome::malformed(e.to_string())),
    };
    if line.is_empty() {
        return None;
    }

    let submission = match serde_json::from_str::<SubmitResponse>(line) {
        Ok(submission) => submission,
        Err(e) => return Some(Outcome::malformed(e.to_string())),
    };

    let outcome = match scheduler.record_submission(submission).await {
        Ok(state) => Outcome::Recorded { success: true, data: state },
        Err(e) => {
            log::error!("{}", e);
            Outcome::Failed {
                success: false,
                retryable: e.is_retryable(),
                error: e.to_string(),
            }
        }
    };
    Some(outcome)
}
