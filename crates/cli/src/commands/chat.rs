//! `stepwise chat`: One streamed chat turn without tools.

use std::io::Write;

pub async fn run(message: String, conversation: String) -> Result<(), Box<dyn std::error::Error>> {
    let (_config, state) = super::load_state()?;

    let mut pieces = state.chat.chat_stream(&message, &conversation).await?;
    let mut stdout = std::io::stdout();
    while let Some(piece) = pieces.recv().await {
        let text = piece?;
        write!(stdout, "{text}")?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}
