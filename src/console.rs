// Line-oriented control console (stdin of the binary)

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::session::SessionController;

/// Why the console stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// `/quit` was entered
    Quit,
    /// Input reached end of file; the process keeps serving until a signal
    Closed,
}

/// Read commands until `/quit` or end of input.
///
/// `/connect`, `/disconnect` and `/status` control the session; any other
/// non-empty line is sent as user text. Status lines go to `out`.
pub async fn run_console<R, W>(
    input: R,
    out: &mut W,
    controller: &SessionController,
) -> Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" => return Ok(ConsoleExit::Quit),
            "/connect" => controller.connect().await?,
            "/disconnect" => controller.disconnect(true).await?,
            "/status" => {
                let info = controller.info();
                let status = format!(
                    "status={} session={} thinking={} audio_degraded={} messages={}\n",
                    info.status,
                    info.session_id.as_deref().unwrap_or("-"),
                    info.thinking,
                    info.audio_degraded,
                    controller.messages().len()
                );
                out.write_all(status.as_bytes()).await?;
                out.flush().await?;
            }
            text => {
                if !controller.send_text(text).await? {
                    warn!("Not connected; use /connect first");
                }
            }
        }
    }

    info!("Console input closed");
    Ok(ConsoleExit::Closed)
}
